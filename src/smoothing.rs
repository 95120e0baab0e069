//! Exponential smoothing of the head position for render-ready motion.
//!
//! Each axis is an independent first-order lag:
//! `current += (target - current) * factor` once per frame. When the
//! remaining distance falls below epsilon the value snaps onto the target
//! and the filter stops consuming frames until the target moves again.

use crate::constants::{DEFAULT_SMOOTHING_FACTOR, SMOOTHING_EPSILON};
use crate::normalizer::HeadPosition;
use crate::schedule::{CancelToken, FrameClock};
use crate::{Error, Result};
use log::debug;
use tokio::sync::watch;

/// A scalar converging toward a target
#[derive(Debug, Clone)]
pub struct SmoothedScalar {
    current: f64,
    target: f64,
    factor: f64,
    epsilon: f64,
    active: bool,
}

impl SmoothedScalar {
    /// Create a settled filter at `initial` with the given smoothing factor.
    ///
    /// # Errors
    ///
    /// Returns an error if `factor` is outside (0, 1]
    pub fn new(initial: f64, factor: f64) -> Result<Self> {
        Self::with_epsilon(initial, factor, SMOOTHING_EPSILON)
    }

    /// Like [`SmoothedScalar::new`] with a custom snap distance.
    ///
    /// # Errors
    ///
    /// Returns an error if `factor` is outside (0, 1] or `epsilon` is not positive
    pub fn with_epsilon(initial: f64, factor: f64, epsilon: f64) -> Result<Self> {
        validate_factor(factor)?;
        if !(epsilon.is_finite() && epsilon > 0.0) {
            return Err(Error::SmoothingError(format!("Epsilon must be positive, got {epsilon}")));
        }
        if !initial.is_finite() {
            return Err(Error::SmoothingError(format!("Initial value must be finite, got {initial}")));
        }
        Ok(Self {
            current: initial,
            target: initial,
            factor,
            epsilon,
            active: false,
        })
    }

    /// Point the filter at a new target. Non-finite targets are ignored.
    pub fn set_target(&mut self, target: f64) {
        if target.is_finite() && target != self.target {
            self.target = target;
            self.active = true;
        }
    }

    /// Advance one frame and return the new value
    pub fn tick(&mut self) -> f64 {
        if !self.active {
            return self.current;
        }
        let diff = self.target - self.current;
        if diff.abs() < self.epsilon {
            self.current = self.target;
            self.active = false;
        } else {
            self.current += diff * self.factor;
        }
        self.current
    }

    /// Whether the filter still needs frames to converge
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active
    }

    #[must_use]
    pub fn current(&self) -> f64 {
        self.current
    }

    #[must_use]
    pub fn target(&self) -> f64 {
        self.target
    }

    #[must_use]
    pub fn factor(&self) -> f64 {
        self.factor
    }
}

/// Check a smoothing factor lies in (0, 1].
///
/// # Errors
///
/// Returns a smoothing error describing the rejected value
pub fn validate_factor(factor: f64) -> Result<()> {
    if factor.is_finite() && factor > 0.0 && factor <= 1.0 {
        Ok(())
    } else {
        Err(Error::SmoothingError(format!("Smoothing factor must be in (0, 1], got {factor}")))
    }
}

/// Two independent smoothed axes
#[derive(Debug, Clone)]
pub struct SmoothedPosition {
    x: SmoothedScalar,
    y: SmoothedScalar,
}

impl SmoothedPosition {
    /// # Errors
    ///
    /// Returns an error if the factor or epsilon is invalid
    pub fn new(initial: HeadPosition, factor: f64, epsilon: f64) -> Result<Self> {
        Ok(Self {
            x: SmoothedScalar::with_epsilon(initial.x, factor, epsilon)?,
            y: SmoothedScalar::with_epsilon(initial.y, factor, epsilon)?,
        })
    }

    pub fn set_target(&mut self, target: HeadPosition) {
        self.x.set_target(target.x);
        self.y.set_target(target.y);
    }

    /// Advance both axes one frame. A settled axis is left untouched.
    pub fn tick(&mut self) -> HeadPosition {
        HeadPosition::new(self.x.tick(), self.y.tick())
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.x.is_active() || self.y.is_active()
    }

    #[must_use]
    pub fn current(&self) -> HeadPosition {
        HeadPosition::new(self.x.current(), self.y.current())
    }
}

impl Default for SmoothedPosition {
    fn default() -> Self {
        let axis = SmoothedScalar {
            current: 0.0,
            target: 0.0,
            factor: DEFAULT_SMOOTHING_FACTOR,
            epsilon: SMOOTHING_EPSILON,
            active: false,
        };
        Self { x: axis.clone(), y: axis }
    }
}

/// Frame-paced driver feeding published targets through a [`SmoothedPosition`].
///
/// The task ticks only while the position is converging; once settled it
/// sleeps until a new target arrives or it is cancelled.
pub struct SmoothingTask {
    position: SmoothedPosition,
    targets: watch::Receiver<HeadPosition>,
    output: watch::Sender<HeadPosition>,
    clock: FrameClock,
    cancel: CancelToken,
}

impl SmoothingTask {
    #[must_use]
    pub fn new(
        position: SmoothedPosition,
        targets: watch::Receiver<HeadPosition>,
        output: watch::Sender<HeadPosition>,
        clock: FrameClock,
        cancel: CancelToken,
    ) -> Self {
        Self {
            position,
            targets,
            output,
            clock,
            cancel,
        }
    }

    /// Run until cancelled, or until the target feed closes and the value has settled
    pub async fn run(self) {
        let Self {
            mut position,
            mut targets,
            output,
            mut clock,
            cancel,
        } = self;

        position.set_target(*targets.borrow_and_update());
        let mut feed_open = true;

        loop {
            if cancel.is_cancelled() {
                break;
            }

            if position.is_active() {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    changed = targets.changed(), if feed_open => {
                        if changed.is_ok() {
                            position.set_target(*targets.borrow_and_update());
                        } else {
                            feed_open = false;
                        }
                    }
                    () = clock.tick() => {
                        output.send_replace(position.tick());
                    }
                }
            } else if feed_open {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    changed = targets.changed() => {
                        if changed.is_ok() {
                            position.set_target(*targets.borrow_and_update());
                        } else {
                            feed_open = false;
                        }
                    }
                }
            } else {
                break;
            }
        }

        debug!("Smoothing task stopped at {:?}", position.current());
    }
}
