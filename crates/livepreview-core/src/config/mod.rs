//! Configuration
//!
//! - `app_config`: configuration structure and loading
//! - `defaults`: default configuration values

pub mod app_config;
pub mod defaults;

pub use app_config::{ApiConfig, HistoryConfig, PackagerConfig, PreviewConfig, StreamConfig};
