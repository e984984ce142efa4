//! Console bridge
//!
//! Surfaces the embedded preview frame's console output in the unified log.
//! After the frame loads, an interceptor script is injected through the
//! first [`InjectionStrategy`] the frame permits. The frame then posts
//! `console` messages back; only messages whose source is the preview frame
//! are accepted, everything else is ignored.
//!
//! The frame is untrusted and may never run the interceptor. Injection
//! failure is logged at debug level and otherwise ignored.

pub mod host;
pub mod injection;
pub mod messages;
pub mod script;

pub use host::{ChannelHost, FrameCapabilities, FrameId, HostCall, HostEnvironment, InboundMessage};
pub use injection::{first_success, InjectionStrategy};
pub use messages::{BridgeMessage, ConsoleLevel};
pub use script::INTERCEPTOR_SCRIPT;

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::error::PreviewError;
use crate::log_sink::{LogOrigin, LogSink};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BridgeError {
    /// The frame's sandbox refused the operation
    #[error("blocked by frame sandbox: {0}")]
    Blocked(String),

    /// Messages can no longer reach the frame
    #[error("frame channel closed")]
    ChannelClosed,

    #[error("serialization failed: {0}")]
    Serialization(String),
}

impl From<BridgeError> for PreviewError {
    fn from(err: BridgeError) -> Self {
        PreviewError::Bridge(err.to_string())
    }
}

/// An attached bridge. Dropping it stops the listener as well.
pub struct BridgeHandle {
    frame: FrameId,
    strategy: Option<InjectionStrategy>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl BridgeHandle {
    pub fn frame(&self) -> &FrameId {
        &self.frame
    }

    /// Strategy that delivered the interceptor, if any did
    pub fn strategy(&self) -> Option<InjectionStrategy> {
        self.strategy
    }

    /// Stop listening. Safe to call on a listener that already ended.
    pub async fn detach(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            if !e.is_cancelled() {
                warn!("Console bridge listener for {} panicked: {}", self.frame, e);
            }
        }
        debug!("Console bridge detached from {}", self.frame);
    }
}

pub struct ConsoleBridge;

impl ConsoleBridge {
    /// Start listening for `frame`'s messages and inject the interceptor.
    ///
    /// The listener is subscribed before injection so a handshake request
    /// sent by a freshly injected script is never missed.
    pub async fn attach(
        host: Arc<dyn HostEnvironment>,
        frame: FrameId,
        sink: LogSink,
    ) -> BridgeHandle {
        let inbound = host.on_message();
        let (shutdown, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(listen(
            host.clone(),
            frame.clone(),
            sink,
            inbound,
            shutdown_rx,
        ));

        let strategy = match first_success(InjectionStrategy::ALL, |strategy| {
            let host = &*host;
            let frame = &frame;
            async move { strategy.attempt(host, frame).await }
        })
        .await
        {
            Ok(strategy) => {
                debug!("Console interceptor injected into {} via {}", frame, strategy);
                Some(strategy)
            }
            Err(failures) => {
                for (strategy, error) in &failures {
                    debug!("Interceptor injection via {} failed: {}", strategy, error);
                }
                debug!("No console output will be forwarded from {}", frame);
                None
            }
        };

        BridgeHandle {
            frame,
            strategy,
            shutdown,
            task,
        }
    }
}

async fn listen(
    host: Arc<dyn HostEnvironment>,
    frame: FrameId,
    sink: LogSink,
    mut inbound: broadcast::Receiver<InboundMessage>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let message = tokio::select! {
            biased;
            // Also fires when the handle is dropped.
            _ = shutdown.changed() => break,
            received = inbound.recv() => match received {
                Ok(message) => message,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Console bridge lagged, {} frame messages dropped", skipped);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        };

        if message.source != frame {
            trace!("Ignoring message from foreign source {}", message.source);
            continue;
        }

        let parsed: BridgeMessage = match serde_json::from_value(message.payload) {
            Ok(parsed) => parsed,
            Err(e) => {
                trace!("Ignoring unrecognized frame message: {}", e);
                continue;
            }
        };

        match parsed {
            BridgeMessage::Console { level, message } => {
                sink.append(LogOrigin::Browser, level.into(), message).await;
            }
            BridgeMessage::InjectConsoleInterceptor => {
                if let Err(e) = host
                    .send_message(&frame, &injection::interceptor_reply())
                    .await
                {
                    debug!("Could not answer interceptor request from {}: {}", frame, e);
                }
            }
            // Host-to-frame only.
            BridgeMessage::ConsoleInterceptorScript { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log_sink::LogLevel;
    use serde_json::json;
    use std::time::Duration;

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn test_console_messages_reach_sink() {
        let host = Arc::new(ChannelHost::default());
        let sink = LogSink::detached();
        let frame = FrameId::new("preview");
        let handle = ConsoleBridge::attach(host.clone(), frame.clone(), sink.clone()).await;
        assert_eq!(handle.strategy(), Some(InjectionStrategy::ScriptElement));

        host.post(
            frame.clone(),
            json!({"type": "console", "level": "error", "message": "TypeError: x is undefined"}),
        );
        host.post(
            frame,
            json!({"type": "console", "level": "log", "message": "rendered"}),
        );
        settle().await;

        let entries = sink.entries_from(LogOrigin::Browser).await;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].level, LogLevel::Error);
        assert_eq!(entries[1].message, "rendered");
        handle.detach().await;
    }

    #[tokio::test]
    async fn test_foreign_sources_are_ignored() {
        let host = Arc::new(ChannelHost::default());
        let sink = LogSink::detached();
        let handle =
            ConsoleBridge::attach(host.clone(), FrameId::new("preview"), sink.clone()).await;

        host.post(
            FrameId::new("ad-frame"),
            json!({"type": "console", "level": "log", "message": "spoofed"}),
        );
        host.post(FrameId::new("preview"), json!({"hello": "world"}));
        settle().await;

        assert!(sink.is_empty().await);
        handle.detach().await;
    }

    #[tokio::test]
    async fn test_handshake_request_is_answered() {
        let host = Arc::new(ChannelHost::new(FrameCapabilities::messaging_only()));
        let sink = LogSink::detached();
        let frame = FrameId::new("preview");
        let handle = ConsoleBridge::attach(host.clone(), frame.clone(), sink).await;
        assert_eq!(handle.strategy(), Some(InjectionStrategy::Handshake));

        host.post(frame, json!({"type": "inject-console-interceptor"}));
        settle().await;

        let sent = host.sent_messages().await;
        // One proactive push, one reply to the request
        assert_eq!(sent.len(), 2);
        assert!(sent
            .iter()
            .all(|m| matches!(m, BridgeMessage::ConsoleInterceptorScript { .. })));
        handle.detach().await;
    }

    #[tokio::test]
    async fn test_total_injection_failure_is_not_fatal() {
        let host = Arc::new(ChannelHost::new(FrameCapabilities::none()));
        let sink = LogSink::detached();
        let handle = ConsoleBridge::attach(host.clone(), FrameId::new("preview"), sink.clone()).await;
        assert_eq!(handle.strategy(), None);
        assert!(sink.is_empty().await);
        handle.detach().await;
    }

    #[tokio::test]
    async fn test_detach_stops_forwarding() {
        let host = Arc::new(ChannelHost::default());
        let sink = LogSink::detached();
        let frame = FrameId::new("preview");
        let handle = ConsoleBridge::attach(host.clone(), frame.clone(), sink.clone()).await;
        handle.detach().await;

        host.post(
            frame,
            json!({"type": "console", "level": "log", "message": "late"}),
        );
        settle().await;
        assert!(sink.is_empty().await);
    }
}
