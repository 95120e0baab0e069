//! Tracking lifecycle state machine.
//!
//! `Idle -> Loading -> Tracking`, with `Error` reachable from `Loading` and
//! `Tracking` and left only by a retry back to `Idle`. The machine is pure:
//! [`LifecycleState::on`] returns the next state and the side effects the
//! session must perform. Any (state, event) pair not in the table is ignored.

use crate::error::TrackingFailure;

/// Top-level session state
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LifecycleState {
    #[default]
    Idle,
    Loading,
    /// Detector ready; `visible` while camera and detection loop are running
    Tracking { visible: bool },
    Error(TrackingFailure),
}

/// Triggers for lifecycle transitions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    StartRequested,
    BackendResolved,
    BackendFailed(TrackingFailure),
    VisibilityChanged(bool),
    CameraFailed(TrackingFailure),
    /// The consumer went away
    Exit,
    RetryRequested,
}

/// Work the session performs when a transition fires
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    ResolveBackend,
    NotifyReady,
    /// Acquire the camera and start the detection loop together
    StartTracking,
    /// Cancel the detection loop and release the camera together
    StopTracking,
    NotifyError(TrackingFailure),
    /// Forget the resolved detector and published positions
    ClearSession,
}

/// Outcome of a handled event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub next: LifecycleState,
    pub effects: Vec<Effect>,
}

impl Transition {
    fn to(next: LifecycleState, effects: Vec<Effect>) -> Option<Self> {
        Some(Self { next, effects })
    }
}

impl LifecycleState {
    /// Apply `event`; `None` means the event is ignored in this state
    #[must_use]
    pub fn on(&self, event: &LifecycleEvent) -> Option<Transition> {
        use LifecycleEvent as E;
        use LifecycleState as S;

        match (self, event) {
            (S::Idle, E::StartRequested) => Transition::to(S::Loading, vec![Effect::ResolveBackend]),

            (S::Loading, E::BackendResolved) => {
                Transition::to(S::Tracking { visible: false }, vec![Effect::NotifyReady])
            }
            (S::Loading, E::BackendFailed(reason)) => {
                Transition::to(S::Error(reason.clone()), vec![Effect::NotifyError(reason.clone())])
            }
            (S::Loading, E::Exit) => Transition::to(S::Idle, vec![Effect::ClearSession]),

            (S::Tracking { visible: false }, E::VisibilityChanged(true)) => {
                Transition::to(S::Tracking { visible: true }, vec![Effect::StartTracking])
            }
            (S::Tracking { visible: true }, E::VisibilityChanged(false)) => {
                Transition::to(S::Tracking { visible: false }, vec![Effect::StopTracking])
            }
            (S::Tracking { visible: true }, E::CameraFailed(reason)) => Transition::to(
                S::Error(reason.clone()),
                vec![Effect::StopTracking, Effect::NotifyError(reason.clone())],
            ),
            (S::Tracking { visible }, E::Exit) => {
                let mut effects = Vec::with_capacity(2);
                if *visible {
                    effects.push(Effect::StopTracking);
                }
                effects.push(Effect::ClearSession);
                Transition::to(S::Idle, effects)
            }

            (S::Error(_), E::RetryRequested) => Transition::to(S::Idle, vec![Effect::ClearSession]),

            _ => None,
        }
    }

    #[must_use]
    pub fn is_tracking(&self) -> bool {
        matches!(self, Self::Tracking { .. })
    }

    /// Failure recorded in the error state
    #[must_use]
    pub fn failure(&self) -> Option<&TrackingFailure> {
        match self {
            Self::Error(reason) => Some(reason),
            _ => None,
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Loading => "Loading",
            Self::Tracking { .. } => "Tracking",
            Self::Error(_) => "Error",
        }
    }
}
