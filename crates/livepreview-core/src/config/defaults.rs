/// Default sandbox API base URL
pub const DEFAULT_API_BASE_URL: &str = "http://127.0.0.1:8787";

/// Default session creation endpoint
pub const DEFAULT_CREATE_PATH: &str = "/api/sandbox/create";

/// Default teardown endpoint
pub const DEFAULT_TEARDOWN_PATH: &str = "/api/sandbox/stop";

/// Default process-log companion endpoint
pub const DEFAULT_PROCESS_LOGS_PATH: &str = "/api/sandbox/logs";

/// Default connect timeout (seconds). Applies to connection setup only.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Prefix that marks a protocol frame line
pub const DEFAULT_FRAME_PREFIX: &str = "data: ";

/// Seconds without any frame before a stall warning is logged
pub const DEFAULT_STALL_WARNING_SECS: u64 = 60;

/// How long stop waits for a cancelled reader to wind down (milliseconds)
pub const DEFAULT_CANCEL_GRACE_MS: u64 = 2000;

/// Default gzip level for the packaged payload
pub const DEFAULT_COMPRESSION_LEVEL: u32 = 6;

/// Directory under the platform data dir used for history
pub const DEFAULT_DATA_DIR_NAME: &str = "livepreview";

/// History database file name
pub const DEFAULT_HISTORY_DB_NAME: &str = "history.db";
