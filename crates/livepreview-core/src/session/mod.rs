//! Preview session state
//!
//! The `Session` is owned by the controller. Everything else sees copies.

pub mod phase;

pub use phase::{transition, Phase, SessionEvent, TransitionError};

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use uuid::Uuid;

use crate::log_sink::now_micros;
use crate::protocol::ProcessId;
use crate::readiness::StatusCaption;

/// The current preview attempt
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    /// Local identity of this attempt; frames from an older attempt are
    /// dropped by comparing against it
    pub id: String,
    /// Remote sandbox identity, known after the `ready` frame
    pub sandbox_id: Option<String>,
    /// Preview URL, known after the `ready` frame
    pub url: Option<String>,
    pub process_id: Option<ProcessId>,
    pub phase: Phase,
    /// Whether the UI should show a loading indicator
    pub loading: bool,
    pub caption: Option<StatusCaption>,
    /// Set once a readiness marker matched; never cleared within a session
    pub server_reachable: bool,
    pub started_at: Option<u64>,
}

impl Session {
    /// Fresh session in `Idle`
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            sandbox_id: None,
            url: None,
            process_id: None,
            phase: Phase::Idle,
            loading: false,
            caption: None,
            server_reachable: false,
            started_at: None,
        }
    }

    /// Apply a lifecycle event, returning the previous phase on success
    pub fn apply(&mut self, event: SessionEvent) -> Result<Phase, TransitionError> {
        let next = transition(self.phase, event)?;
        let previous = self.phase;
        self.phase = next;
        if event == SessionEvent::StartRequested {
            self.started_at = Some(now_micros());
        }
        Ok(previous)
    }

    /// Drop everything learned about the remote side
    pub fn reset_remote(&mut self) {
        self.sandbox_id = None;
        self.url = None;
        self.process_id = None;
        self.caption = None;
        self.loading = false;
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether a preview URL points at the sandbox host's own loopback
/// interface. Those are raw dev servers that still need to finish booting.
pub fn is_loopback_url(url: &str) -> bool {
    let host = reqwest::Url::parse(url)
        .ok()
        .and_then(|parsed| parsed.host_str().map(str::to_string));

    match host {
        Some(host) => {
            let host = host.trim_start_matches('[').trim_end_matches(']');
            match host.parse::<IpAddr>() {
                Ok(ip) => ip.is_loopback() || ip.is_unspecified(),
                Err(_) => host.eq_ignore_ascii_case("localhost") || host.ends_with(".localhost"),
            }
        }
        None => {
            let lowered = url.to_ascii_lowercase();
            lowered.contains("localhost")
                || lowered.contains("127.0.0.1")
                || lowered.contains("0.0.0.0")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_session_is_idle() {
        let session = Session::new();
        assert_eq!(session.phase, Phase::Idle);
        assert!(!session.loading);
        assert!(session.sandbox_id.is_none());
        assert!(!session.id.is_empty());
    }

    #[test]
    fn test_apply_records_start_time() {
        let mut session = Session::new();
        let previous = session.apply(SessionEvent::StartRequested).unwrap();
        assert_eq!(previous, Phase::Idle);
        assert_eq!(session.phase, Phase::Booting);
        assert!(session.started_at.is_some());
    }

    #[test]
    fn test_apply_rejects_without_mutation() {
        let mut session = Session::new();
        assert!(session.apply(SessionEvent::ServerReachable).is_err());
        assert_eq!(session.phase, Phase::Idle);
    }

    #[test]
    fn test_reset_remote() {
        let mut session = Session::new();
        session.sandbox_id = Some("sb1".to_string());
        session.url = Some("http://localhost:3000".to_string());
        session.process_id = Some(ProcessId::Number(42));
        session.loading = true;
        session.reset_remote();
        assert!(session.sandbox_id.is_none());
        assert!(session.url.is_none());
        assert!(session.process_id.is_none());
        assert!(!session.loading);
    }

    #[test]
    fn test_loopback_detection() {
        assert!(is_loopback_url("http://localhost:3000"));
        assert!(is_loopback_url("http://LOCALHOST:5173/"));
        assert!(is_loopback_url("http://127.0.0.1:8080"));
        assert!(is_loopback_url("http://0.0.0.0:3000"));
        assert!(is_loopback_url("http://[::1]:3000"));
        assert!(is_loopback_url("http://app.localhost:3000"));
        assert!(!is_loopback_url("https://app.example.dev"));
        assert!(!is_loopback_url("https://3000-sb1.sandbox.example.dev"));
    }

    #[test]
    fn test_loopback_detection_unparseable() {
        assert!(is_loopback_url("localhost:3000"));
        assert!(!is_loopback_url("not a url"));
    }
}
