//! Wire types of the sandbox session stream.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of the long-running process inside the sandbox. Sandboxes
/// report either a numeric pid or an opaque string.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum ProcessId {
    Number(i64),
    Text(String),
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessId::Number(n) => write!(f, "{n}"),
            ProcessId::Text(s) => write!(f, "{s}"),
        }
    }
}

/// One decoded frame of the session stream
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamEvent {
    /// Free-text output from the sandbox tooling
    Log {
        #[serde(default)]
        message: String,
    },
    /// Error-shaped output; most are transient warnings
    Error {
        #[serde(default)]
        message: String,
    },
    /// The sandbox exists and has an address
    #[serde(rename_all = "camelCase")]
    Ready {
        sandbox_id: String,
        #[serde(default)]
        url: Option<String>,
        #[serde(default)]
        process_id: Option<ProcessId>,
    },
    /// Keep-alive; carries nothing
    Heartbeat,
}

impl StreamEvent {
    /// Frame type as it appears on the wire
    pub fn kind(&self) -> &'static str {
        match self {
            StreamEvent::Log { .. } => "log",
            StreamEvent::Error { .. } => "error",
            StreamEvent::Ready { .. } => "ready",
            StreamEvent::Heartbeat => "heartbeat",
        }
    }
}

/// Immediate (non-streaming) answer to a creation request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SandboxInfo {
    pub sandbox_id: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub process_id: Option<ProcessId>,
}

impl From<SandboxInfo> for StreamEvent {
    fn from(info: SandboxInfo) -> Self {
        StreamEvent::Ready {
            sandbox_id: info.sandbox_id,
            url: info.url,
            process_id: info.process_id,
        }
    }
}

/// Body of a teardown request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TeardownRequest {
    pub sandbox_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ready_frame_decoding() {
        let json = r#"{"type":"ready","sandboxId":"sb1","url":"https://app.example.dev","processId":42}"#;
        let event: StreamEvent = serde_json::from_str(json).unwrap();
        assert_eq!(
            event,
            StreamEvent::Ready {
                sandbox_id: "sb1".to_string(),
                url: Some("https://app.example.dev".to_string()),
                process_id: Some(ProcessId::Number(42)),
            }
        );
        assert_eq!(event.kind(), "ready");
    }

    #[test]
    fn test_string_process_id() {
        let json = r#"{"type":"ready","sandboxId":"sb1","url":"http://localhost:3000","processId":"proc-7"}"#;
        let event: StreamEvent = serde_json::from_str(json).unwrap();
        match event {
            StreamEvent::Ready { process_id, .. } => {
                assert_eq!(process_id, Some(ProcessId::Text("proc-7".to_string())));
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn test_heartbeat_and_extra_fields() {
        let event: StreamEvent =
            serde_json::from_str(r#"{"type":"heartbeat","ts":1700000000}"#).unwrap();
        assert_eq!(event, StreamEvent::Heartbeat);

        let event: StreamEvent =
            serde_json::from_str(r#"{"type":"log","message":"hi","stream":"stdout"}"#).unwrap();
        assert_eq!(
            event,
            StreamEvent::Log {
                message: "hi".to_string()
            }
        );
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        assert!(serde_json::from_str::<StreamEvent>(r#"{"type":"progress","pct":3}"#).is_err());
        assert!(serde_json::from_str::<StreamEvent>(r#"{"message":"no type"}"#).is_err());
    }

    #[test]
    fn test_sandbox_info_into_ready() {
        let info: SandboxInfo =
            serde_json::from_str(r#"{"sandboxId":"sb9","url":"https://x.dev","processId":1}"#)
                .unwrap();
        let event: StreamEvent = info.into();
        assert_eq!(event.kind(), "ready");
    }

    #[test]
    fn test_teardown_request_shape() {
        let body = serde_json::to_string(&TeardownRequest {
            sandbox_id: "sb1".to_string(),
        })
        .unwrap();
        assert_eq!(body, r#"{"sandboxId":"sb1"}"#);
    }
}
