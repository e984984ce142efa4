//! Messages exchanged with the embedded preview frame.

use serde::{Deserialize, Serialize};

use crate::log_sink::LogLevel;

/// Console method the frame-side interceptor captured
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleLevel {
    Log,
    Warn,
    Error,
}

impl From<ConsoleLevel> for LogLevel {
    fn from(level: ConsoleLevel) -> Self {
        match level {
            ConsoleLevel::Log => LogLevel::Info,
            ConsoleLevel::Warn => LogLevel::Warn,
            ConsoleLevel::Error => LogLevel::Error,
        }
    }
}

/// Frame/host message protocol
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum BridgeMessage {
    /// frame → host: forwarded console or runtime error output
    Console {
        level: ConsoleLevel,
        #[serde(default)]
        message: String,
    },
    /// frame → host: the frame asks for the interceptor source
    InjectConsoleInterceptor,
    /// host → frame: interceptor source as text
    ConsoleInterceptorScript { script: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_console_message_decoding() {
        let msg: BridgeMessage =
            serde_json::from_str(r#"{"type":"console","level":"warn","message":"careful"}"#)
                .unwrap();
        assert_eq!(
            msg,
            BridgeMessage::Console {
                level: ConsoleLevel::Warn,
                message: "careful".to_string()
            }
        );
    }

    #[test]
    fn test_wire_names() {
        let request: BridgeMessage =
            serde_json::from_str(r#"{"type":"inject-console-interceptor"}"#).unwrap();
        assert_eq!(request, BridgeMessage::InjectConsoleInterceptor);

        let reply = serde_json::to_value(BridgeMessage::ConsoleInterceptorScript {
            script: "void 0".to_string(),
        })
        .unwrap();
        assert_eq!(reply["type"], "console-interceptor-script");
        assert_eq!(reply["script"], "void 0");
    }

    #[test]
    fn test_unknown_level_rejected() {
        assert!(serde_json::from_str::<BridgeMessage>(
            r#"{"type":"console","level":"trace","message":"x"}"#
        )
        .is_err());
    }

    #[test]
    fn test_level_mapping() {
        assert_eq!(LogLevel::from(ConsoleLevel::Log), LogLevel::Info);
        assert_eq!(LogLevel::from(ConsoleLevel::Error), LogLevel::Error);
    }
}
