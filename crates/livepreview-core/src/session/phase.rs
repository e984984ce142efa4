//! Session lifecycle phases and the transition function.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Where the current preview attempt is
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Nothing requested yet
    #[default]
    Idle,
    /// Creation request sent, sandbox not announced
    Booting,
    /// Sandbox exists, app server inside it still starting
    Building,
    /// Preview URL is servable
    Ready,
    /// Fatal remote failure; trailing logs may still arrive
    Error,
    /// Explicitly stopped; terminal for this session instance
    Stopped,
}

impl Phase {
    /// Booting, building or serving
    pub fn is_active(self) -> bool {
        matches!(self, Phase::Booting | Phase::Building | Phase::Ready)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Idle => write!(f, "idle"),
            Phase::Booting => write!(f, "booting"),
            Phase::Building => write!(f, "building"),
            Phase::Ready => write!(f, "ready"),
            Phase::Error => write!(f, "error"),
            Phase::Stopped => write!(f, "stopped"),
        }
    }
}

/// Inputs to the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// User asked for a preview
    StartRequested,
    /// `ready` frame arrived. `loopback` is false when the URL is served by
    /// infrastructure that finished building before announcing itself.
    SandboxReady { loopback: bool },
    /// Readiness heuristic matched a log line
    ServerReachable,
    /// Fatal error frame, or the creation request failed
    Failed,
    /// Explicit stop or unmount
    Stop,
}

impl fmt::Display for SessionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionEvent::StartRequested => write!(f, "start"),
            SessionEvent::SandboxReady { loopback: true } => write!(f, "ready(loopback)"),
            SessionEvent::SandboxReady { loopback: false } => write!(f, "ready(remote)"),
            SessionEvent::ServerReachable => write!(f, "reachable"),
            SessionEvent::Failed => write!(f, "failed"),
            SessionEvent::Stop => write!(f, "stop"),
        }
    }
}

/// A transition the state machine refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid transition from {from} on {event}")]
pub struct TransitionError {
    pub from: Phase,
    pub event: SessionEvent,
}

/// Compute the next phase, rejecting anything the lifecycle does not allow.
pub fn transition(from: Phase, event: SessionEvent) -> Result<Phase, TransitionError> {
    use Phase::*;
    use SessionEvent::*;

    let next = match (from, event) {
        (_, Stop) => Stopped,

        (Idle, StartRequested) => Booting,

        (Booting | Error, SandboxReady { loopback: true }) => Building,
        (Booting | Error, SandboxReady { loopback: false }) => Ready,

        (Building | Error, ServerReachable) => Ready,

        (Booting | Building, Failed) => Error,

        _ => return Err(TransitionError { from, event }),
    };
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_loopback() {
        let phase = transition(Phase::Idle, SessionEvent::StartRequested).unwrap();
        assert_eq!(phase, Phase::Booting);
        let phase = transition(phase, SessionEvent::SandboxReady { loopback: true }).unwrap();
        assert_eq!(phase, Phase::Building);
        let phase = transition(phase, SessionEvent::ServerReachable).unwrap();
        assert_eq!(phase, Phase::Ready);
    }

    #[test]
    fn test_remote_url_skips_building() {
        let phase =
            transition(Phase::Booting, SessionEvent::SandboxReady { loopback: false }).unwrap();
        assert_eq!(phase, Phase::Ready);
    }

    #[test]
    fn test_stop_from_every_phase() {
        for phase in [
            Phase::Idle,
            Phase::Booting,
            Phase::Building,
            Phase::Ready,
            Phase::Error,
            Phase::Stopped,
        ] {
            assert_eq!(transition(phase, SessionEvent::Stop), Ok(Phase::Stopped));
        }
    }

    #[test]
    fn test_failure_only_while_starting() {
        assert_eq!(
            transition(Phase::Booting, SessionEvent::Failed),
            Ok(Phase::Error)
        );
        assert_eq!(
            transition(Phase::Building, SessionEvent::Failed),
            Ok(Phase::Error)
        );
        assert!(transition(Phase::Ready, SessionEvent::Failed).is_err());
        assert!(transition(Phase::Idle, SessionEvent::Failed).is_err());
    }

    #[test]
    fn test_error_recovers_on_later_signals() {
        assert_eq!(
            transition(Phase::Error, SessionEvent::SandboxReady { loopback: true }),
            Ok(Phase::Building)
        );
        assert_eq!(
            transition(Phase::Error, SessionEvent::ServerReachable),
            Ok(Phase::Ready)
        );
    }

    #[test]
    fn test_rejected_transitions() {
        let cases = [
            (Phase::Idle, SessionEvent::SandboxReady { loopback: true }),
            (Phase::Idle, SessionEvent::ServerReachable),
            (Phase::Booting, SessionEvent::StartRequested),
            (Phase::Booting, SessionEvent::ServerReachable),
            (Phase::Ready, SessionEvent::ServerReachable),
            (Phase::Ready, SessionEvent::SandboxReady { loopback: false }),
            (Phase::Stopped, SessionEvent::StartRequested),
            (Phase::Stopped, SessionEvent::ServerReachable),
        ];
        for (from, event) in cases {
            let err = transition(from, event).unwrap_err();
            assert_eq!(err, TransitionError { from, event });
        }
    }

    #[test]
    fn test_is_active() {
        assert!(Phase::Booting.is_active());
        assert!(Phase::Ready.is_active());
        assert!(!Phase::Error.is_active());
        assert!(!Phase::Stopped.is_active());
    }
}
