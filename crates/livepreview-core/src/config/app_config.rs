use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::defaults;
use crate::error::{PreviewError, Result};

/// Preview controller configuration
///
/// Every field has a default, so a partial JSON file is enough to override
/// just the parts that differ.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PreviewConfig {
    /// Sandbox API endpoints and credentials
    pub api: ApiConfig,

    /// Stream reader behaviour
    pub stream: StreamConfig,

    /// Payload packaging
    pub packager: PackagerConfig,

    /// Session history persistence
    pub history: HistoryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub create_path: String,
    pub teardown_path: String,
    pub process_logs_path: String,

    /// Bearer token sent with every request
    pub auth_token: Option<String>,

    /// Refuse to start a session when `auth_token` is unset
    pub require_auth: bool,

    pub connect_timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::DEFAULT_API_BASE_URL.to_string(),
            create_path: defaults::DEFAULT_CREATE_PATH.to_string(),
            teardown_path: defaults::DEFAULT_TEARDOWN_PATH.to_string(),
            process_logs_path: defaults::DEFAULT_PROCESS_LOGS_PATH.to_string(),
            auth_token: None,
            require_auth: false,
            connect_timeout_secs: defaults::DEFAULT_CONNECT_TIMEOUT_SECS,
        }
    }
}

impl ApiConfig {
    /// Join the base URL with an endpoint path
    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Prefix that marks a frame line in the response body
    pub frame_prefix: String,

    /// Open the process-log companion channel once the sandbox is ready
    pub process_logs: bool,

    /// Seconds of silence before a stall warning; 0 disables the watchdog
    pub stall_warning_secs: u64,

    /// Grace period for a cancelled reader to finish (milliseconds)
    pub cancel_grace_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            frame_prefix: defaults::DEFAULT_FRAME_PREFIX.to_string(),
            process_logs: true,
            stall_warning_secs: defaults::DEFAULT_STALL_WARNING_SECS,
            cancel_grace_ms: defaults::DEFAULT_CANCEL_GRACE_MS,
        }
    }
}

impl StreamConfig {
    pub fn stall_warning(&self) -> Option<Duration> {
        (self.stall_warning_secs > 0).then(|| Duration::from_secs(self.stall_warning_secs))
    }

    pub fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PackagerConfig {
    /// gzip level, 0-9
    pub compression_level: u32,
}

impl Default for PackagerConfig {
    fn default() -> Self {
        Self {
            compression_level: defaults::DEFAULT_COMPRESSION_LEVEL,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct HistoryConfig {
    pub enabled: bool,

    /// Database location; falls back to the platform data directory
    pub path: Option<PathBuf>,
}

impl HistoryConfig {
    pub fn resolved_path(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(|| {
            let mut path = dirs::data_dir().unwrap_or_else(|| PathBuf::from("."));
            path.push(defaults::DEFAULT_DATA_DIR_NAME);
            path.push(defaults::DEFAULT_HISTORY_DB_NAME);
            path
        })
    }
}

impl PreviewConfig {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            PreviewError::Config(format!("Failed to read {}: {e}", path.display()))
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|e| {
            PreviewError::Config(format!("Invalid config {}: {e}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.api.base_url.trim().is_empty() {
            return Err(PreviewError::Config("api.base_url is empty".to_string()));
        }
        if self.stream.frame_prefix.is_empty() {
            return Err(PreviewError::Config(
                "stream.frame_prefix is empty".to_string(),
            ));
        }
        if self.packager.compression_level > 9 {
            return Err(PreviewError::Config(format!(
                "packager.compression_level must be 0-9, got {}",
                self.packager.compression_level
            )));
        }
        Ok(())
    }

    pub fn with_api_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.api.base_url = base_url.into();
        self
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.api.auth_token = Some(token.into());
        self
    }

    pub fn with_stream_config(mut self, stream: StreamConfig) -> Self {
        self.stream = stream;
        self
    }

    pub fn with_history(mut self, path: PathBuf) -> Self {
        self.history = HistoryConfig {
            enabled: true,
            path: Some(path),
        };
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = PreviewConfig::new();
        assert_eq!(config.stream.frame_prefix, "data: ");
        assert_eq!(config.packager.compression_level, 6);
        assert!(!config.history.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_endpoint_joining() {
        let api = ApiConfig {
            base_url: "https://sandbox.example.dev/".to_string(),
            ..ApiConfig::default()
        };
        assert_eq!(
            api.endpoint("/api/sandbox/create"),
            "https://sandbox.example.dev/api/sandbox/create"
        );
    }

    #[test]
    fn test_partial_json_load() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"api": {{"base_url": "https://sb.example.dev", "require_auth": true}}}}"#
        )
        .unwrap();

        let config = PreviewConfig::load(file.path()).unwrap();
        assert_eq!(config.api.base_url, "https://sb.example.dev");
        assert!(config.api.require_auth);
        assert_eq!(config.api.create_path, "/api/sandbox/create");
        assert_eq!(config.stream.stall_warning_secs, 60);
    }

    #[test]
    fn test_invalid_compression_level() {
        let mut config = PreviewConfig::new();
        config.packager.compression_level = 12;
        assert!(matches!(config.validate(), Err(PreviewError::Config(_))));
    }

    #[test]
    fn test_stall_warning_disabled() {
        let stream = StreamConfig {
            stall_warning_secs: 0,
            ..StreamConfig::default()
        };
        assert!(stream.stall_warning().is_none());
    }
}
