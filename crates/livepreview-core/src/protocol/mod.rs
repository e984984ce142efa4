//! Sandbox session stream protocol
//!
//! The creation endpoint answers with newline-delimited lines; lines that
//! start with the frame prefix carry one JSON object discriminated by
//! `type` (`log`, `error`, `ready`, `heartbeat`).

pub mod decoder;
pub mod frame;
pub mod reader;

pub use decoder::FrameDecoder;
pub use frame::{ProcessId, SandboxInfo, StreamEvent, TeardownRequest};
pub use reader::{spawn_reader, wait_finished, ByteStream, FrameHandler, ReaderHandle, ReaderOutcome};
