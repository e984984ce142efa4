//! LivePreview Core Library
//!
//! Session control for live previews of a project running in a remote,
//! ephemeral sandbox. This crate has no frontend dependency: hosts plug in
//! through the [`events::EventSink`] and [`bridge::HostEnvironment`] traits.
//!
//! # Modules
//!
//! - [`packager`] - Project filtering and payload packaging (zip, then gzip)
//! - [`export`] - Uncompressed download archive
//! - [`client`] - Sandbox API trait and HTTP client
//! - [`protocol`] - Stream frames, incremental decoder, reader task
//! - [`readiness`] - Log-line heuristics for captions and reachability
//! - [`session`] - Session state and lifecycle transitions
//! - [`bridge`] - Console bridge to the embedded preview frame
//! - [`log_sink`] - Unified, ordered log shared by every producer
//! - [`controller`] - Orchestration of all of the above
//! - [`storage`] - Session history
//! - [`events`] - Event sink trait for decoupling from frontends
//! - [`config`] - Configuration
//! - [`error`] - Error types

pub mod bridge;
pub mod client;
pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod export;
pub mod log_sink;
pub mod packager;
pub mod protocol;
pub mod readiness;
pub mod session;
pub mod storage;

// Re-export commonly used types
pub use bridge::{BridgeMessage, ChannelHost, ConsoleBridge, FrameId, HostEnvironment};
pub use client::{CreateSessionResponse, HttpSandboxClient, SandboxApi};
pub use config::PreviewConfig;
pub use controller::PreviewController;
pub use error::{PreviewError, Result};
pub use events::{EventSink, NoOpEventSink, Notification, PhaseChange, StdoutEventSink};
pub use log_sink::{LogEntry, LogLevel, LogOrigin, LogSink};
pub use packager::{
    unpack, ConversationMessage, DefaultFileFilter, FileFilter, PackagedPayload, Packager,
    ProjectFile,
};
pub use protocol::{SandboxInfo, StreamEvent};
pub use readiness::{classify, Classification, StatusCaption};
pub use session::{Phase, Session};
pub use storage::{SessionHistory, SessionTranscript, TranscriptInfo};
