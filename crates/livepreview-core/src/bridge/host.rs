//! Host environment capability
//!
//! Everything the bridge needs from the page embedding the preview frame:
//! posting messages into a frame, inserting a script element, evaluating
//! code, and a feed of messages posted back by any window.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use tokio::sync::{broadcast, Mutex};

use super::messages::BridgeMessage;
use super::BridgeError;

const INBOUND_CAPACITY: usize = 256;

/// Identity of an embedded frame's content window
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameId(pub String);

impl FrameId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A message posted to the host by some window
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    /// Window that posted it; compared against the preview frame
    pub source: FrameId,
    /// Raw payload, untrusted
    pub payload: Value,
}

#[async_trait]
pub trait HostEnvironment: Send + Sync {
    /// Post a message into `frame`
    async fn send_message(&self, frame: &FrameId, message: &BridgeMessage)
        -> Result<(), BridgeError>;

    /// Insert a `<script>` element with inline `source` into `frame`
    async fn create_element(&self, frame: &FrameId, source: &str) -> Result<(), BridgeError>;

    /// Evaluate `script` directly in `frame`
    async fn evaluate(&self, frame: &FrameId, script: &str) -> Result<(), BridgeError>;

    /// Messages posted to the host from now on, from any source
    fn on_message(&self) -> broadcast::Receiver<InboundMessage>;
}

/// What a [`ChannelHost`] was asked to do
#[derive(Debug, Clone, PartialEq)]
pub enum HostCall {
    ScriptElement { frame: FrameId, source: String },
    Evaluate { frame: FrameId, script: String },
    Message { frame: FrameId, message: BridgeMessage },
}

/// Which operations a sandboxed frame permits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameCapabilities {
    pub script_element: bool,
    pub evaluate: bool,
    pub messaging: bool,
}

impl Default for FrameCapabilities {
    fn default() -> Self {
        Self {
            script_element: true,
            evaluate: true,
            messaging: true,
        }
    }
}

impl FrameCapabilities {
    /// A frame that only talks through messages
    pub fn messaging_only() -> Self {
        Self {
            script_element: false,
            evaluate: false,
            messaging: true,
        }
    }

    pub fn none() -> Self {
        Self {
            script_element: false,
            evaluate: false,
            messaging: false,
        }
    }
}

/// Channel-backed host. Records every call in order and lets the embedder
/// (or a test) post inbound messages with [`ChannelHost::post`].
pub struct ChannelHost {
    capabilities: FrameCapabilities,
    inbound: broadcast::Sender<InboundMessage>,
    calls: Mutex<Vec<HostCall>>,
}

impl ChannelHost {
    pub fn new(capabilities: FrameCapabilities) -> Self {
        let (inbound, _) = broadcast::channel(INBOUND_CAPACITY);
        Self {
            capabilities,
            inbound,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Deliver a message as if `source` had posted it
    pub fn post(&self, source: FrameId, payload: Value) {
        // No listener attached is fine.
        let _ = self.inbound.send(InboundMessage { source, payload });
    }

    pub async fn calls(&self) -> Vec<HostCall> {
        self.calls.lock().await.clone()
    }

    /// Messages sent into frames, in order
    pub async fn sent_messages(&self) -> Vec<BridgeMessage> {
        self.calls
            .lock()
            .await
            .iter()
            .filter_map(|call| match call {
                HostCall::Message { message, .. } => Some(message.clone()),
                _ => None,
            })
            .collect()
    }
}

impl Default for ChannelHost {
    fn default() -> Self {
        Self::new(FrameCapabilities::default())
    }
}

#[async_trait]
impl HostEnvironment for ChannelHost {
    async fn send_message(
        &self,
        frame: &FrameId,
        message: &BridgeMessage,
    ) -> Result<(), BridgeError> {
        if !self.capabilities.messaging {
            return Err(BridgeError::ChannelClosed);
        }
        self.calls.lock().await.push(HostCall::Message {
            frame: frame.clone(),
            message: message.clone(),
        });
        Ok(())
    }

    async fn create_element(&self, frame: &FrameId, source: &str) -> Result<(), BridgeError> {
        if !self.capabilities.script_element {
            return Err(BridgeError::Blocked("script element insertion".to_string()));
        }
        self.calls.lock().await.push(HostCall::ScriptElement {
            frame: frame.clone(),
            source: source.to_string(),
        });
        Ok(())
    }

    async fn evaluate(&self, frame: &FrameId, script: &str) -> Result<(), BridgeError> {
        if !self.capabilities.evaluate {
            return Err(BridgeError::Blocked("direct evaluation".to_string()));
        }
        self.calls.lock().await.push(HostCall::Evaluate {
            frame: frame.clone(),
            script: script.to_string(),
        });
        Ok(())
    }

    fn on_message(&self) -> broadcast::Receiver<InboundMessage> {
        self.inbound.subscribe()
    }
}
