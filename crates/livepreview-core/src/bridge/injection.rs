//! Interceptor injection strategies, tried in order of preference.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;

use super::host::{FrameId, HostEnvironment};
use super::messages::BridgeMessage;
use super::script::INTERCEPTOR_SCRIPT;
use super::BridgeError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InjectionStrategy {
    /// Insert an inline `<script>` element
    ScriptElement,
    /// Evaluate the source in the frame's context
    DirectEval,
    /// Push the source as a `console-interceptor-script` message for a
    /// cooperating frame to run. The frame may also pull it by sending
    /// `inject-console-interceptor`.
    Handshake,
}

impl InjectionStrategy {
    /// Preference order
    pub const ALL: [InjectionStrategy; 3] = [
        InjectionStrategy::ScriptElement,
        InjectionStrategy::DirectEval,
        InjectionStrategy::Handshake,
    ];

    pub async fn attempt(
        self,
        host: &dyn HostEnvironment,
        frame: &FrameId,
    ) -> Result<(), BridgeError> {
        match self {
            InjectionStrategy::ScriptElement => {
                host.create_element(frame, INTERCEPTOR_SCRIPT).await
            }
            InjectionStrategy::DirectEval => host.evaluate(frame, INTERCEPTOR_SCRIPT).await,
            InjectionStrategy::Handshake => {
                host.send_message(frame, &interceptor_reply()).await
            }
        }
    }
}

impl fmt::Display for InjectionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InjectionStrategy::ScriptElement => write!(f, "script element"),
            InjectionStrategy::DirectEval => write!(f, "direct eval"),
            InjectionStrategy::Handshake => write!(f, "handshake"),
        }
    }
}

pub(crate) fn interceptor_reply() -> BridgeMessage {
    BridgeMessage::ConsoleInterceptorScript {
        script: INTERCEPTOR_SCRIPT.to_string(),
    }
}

/// Run `attempt` over `candidates` in order and stop at the first success.
/// On total failure every candidate's error is returned, in order.
pub async fn first_success<C, E, F, Fut>(
    candidates: impl IntoIterator<Item = C>,
    mut attempt: F,
) -> Result<C, Vec<(C, E)>>
where
    C: Clone,
    F: FnMut(C) -> Fut,
    Fut: Future<Output = Result<(), E>>,
{
    let mut failures = Vec::new();
    for candidate in candidates {
        match attempt(candidate.clone()).await {
            Ok(()) => return Ok(candidate),
            Err(e) => failures.push((candidate, e)),
        }
    }
    Err(failures)
}
