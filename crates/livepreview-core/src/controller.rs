//! Preview session controller
//!
//! Owns the [`Session`] and everything attached to it: the creation
//! request, the frame stream reader, the process-log companion channel,
//! the stall watchdog and the console bridge. Protocol frames and user
//! actions are the only things that change the session.
//!
//! Frames are dispatched with the session lock held, so a stop that has
//! marked the session `Stopped` is never followed by another dispatch for
//! that session. [`EventSink`] implementations must not call back into the
//! controller.

use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use futures::StreamExt;
use tracing::{debug, info, warn};

use async_trait::async_trait;

use crate::bridge::{BridgeHandle, ConsoleBridge, FrameId, HostEnvironment};
use crate::client::{CreateSessionResponse, SandboxApi};
use crate::config::PreviewConfig;
use crate::error::{PreviewError, Result};
use crate::events::{EventSink, Notification, PhaseChange};
use crate::log_sink::{now_micros, LogOrigin, LogSink};
use crate::packager::{ConversationMessage, DefaultFileFilter, Packager, ProjectFile};
use crate::protocol::{
    spawn_reader, wait_finished, ByteStream, FrameDecoder, FrameHandler, ProcessId, ReaderHandle,
    ReaderOutcome, StreamEvent,
};
use crate::readiness::{classify, is_fatal_error};
use crate::session::{is_loopback_url, transition, Phase, Session, SessionEvent};
use crate::storage::{SessionHistory, SessionTranscript};

/// Smallest watchdog polling period
const MIN_WATCHDOG_TICK: Duration = Duration::from_millis(250);

/// Handle to the preview controller. Cheap to clone.
#[derive(Clone)]
pub struct PreviewController {
    inner: Arc<ControllerInner>,
}

struct ControllerInner {
    config: PreviewConfig,
    api: Arc<dyn SandboxApi>,
    events: Arc<dyn EventSink>,
    packager: Packager,
    sink: LogSink,
    history: Option<SessionHistory>,
    /// Serializes `start` calls
    start_gate: Mutex<()>,
    state: Mutex<ControllerState>,
}

struct ControllerState {
    session: Session,
    reader: Option<ReaderHandle>,
    process_reader: Option<ReaderHandle>,
    watchdog: Option<JoinHandle<()>>,
    bridge: Option<BridgeHandle>,
    last_frame: Instant,
    stall_reported: bool,
    /// Bumped by every stop or unmount
    stop_generation: u64,
}

impl ControllerState {
    fn is_current(&self, session_id: &str) -> bool {
        self.session.id == session_id && self.session.phase != Phase::Stopped
    }
}

/// Remote and background resources detached from the state for release
#[derive(Default)]
struct Detached {
    reader: Option<ReaderHandle>,
    process_reader: Option<ReaderHandle>,
    watchdog: Option<JoinHandle<()>>,
    bridge: Option<BridgeHandle>,
    sandbox_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shutdown {
    Stop,
    Unmount,
}

impl PreviewController {
    /// Controller with the default file filter and, when enabled, the
    /// configured history database
    pub fn new(config: PreviewConfig, api: Arc<dyn SandboxApi>, events: Arc<dyn EventSink>) -> Self {
        let packager = Packager::new(
            Arc::new(DefaultFileFilter::new()),
            config.packager.compression_level,
        );
        let history = if config.history.enabled {
            let path = config.history.resolved_path();
            match SessionHistory::open(&path) {
                Ok(history) => Some(history),
                Err(e) => {
                    warn!("Session history disabled: {}", e);
                    None
                }
            }
        } else {
            None
        };
        Self::from_parts(config, api, events, packager, history)
    }

    pub fn from_parts(
        config: PreviewConfig,
        api: Arc<dyn SandboxApi>,
        events: Arc<dyn EventSink>,
        packager: Packager,
        history: Option<SessionHistory>,
    ) -> Self {
        let sink = LogSink::new(events.clone());
        Self {
            inner: Arc::new(ControllerInner {
                config,
                api,
                events,
                packager,
                sink,
                history,
                start_gate: Mutex::new(()),
                state: Mutex::new(ControllerState {
                    session: Session::new(),
                    reader: None,
                    process_reader: None,
                    watchdog: None,
                    bridge: None,
                    last_frame: Instant::now(),
                    stall_reported: false,
                    stop_generation: 0,
                }),
            }),
        }
    }

    pub fn config(&self) -> &PreviewConfig {
        &self.inner.config
    }

    /// The unified log
    pub fn sink(&self) -> LogSink {
        self.inner.sink.clone()
    }

    pub fn history(&self) -> Option<&SessionHistory> {
        self.inner.history.as_ref()
    }

    /// Snapshot of the current session
    pub async fn session(&self) -> Session {
        self.inner.state.lock().await.session.clone()
    }

    /// Package `files` and request a new sandbox session.
    ///
    /// Returns once the request has been answered; frames are processed in
    /// the background. Precondition and transport failures are returned and
    /// also raised as a notification.
    pub async fn start(
        &self,
        files: Vec<ProjectFile>,
        conversation: Vec<ConversationMessage>,
    ) -> Result<Session> {
        let inner = &self.inner;
        let _gate = inner.start_gate.lock().await;

        if inner.state.lock().await.session.phase.is_active() {
            let err = PreviewError::SessionActive;
            inner.notify(Notification::info("Preview already running", err.to_string())).await;
            return Err(err);
        }

        // Leftovers of an errored session: trailing stream, sandbox.
        let (leftovers, generation) = {
            let mut state = inner.state.lock().await;
            (inner.detach_all(&mut state), state.stop_generation)
        };
        inner.release(leftovers).await;

        if let Err(e) = inner.api.preflight() {
            inner.notify_failure(&e).await;
            return Err(e);
        }

        let payload = match inner.packager.pack_async(files, conversation).await {
            Ok(payload) => payload,
            Err(e) => {
                inner.notify_failure(&e).await;
                return Err(e);
            }
        };

        let session_id = {
            let mut state = inner.state.lock().await;
            if state.stop_generation != generation {
                debug!("Stopped while packaging, not requesting a sandbox");
                return Ok(state.session.clone());
            }
            inner.sink.clear().await;
            state.session = Session::new();
            inner.apply_event(&mut state, SessionEvent::StartRequested).await;
            state.session.loading = true;
            state.last_frame = Instant::now();
            state.stall_reported = false;
            inner
                .sink
                .info(
                    LogOrigin::Terminal,
                    format!(
                        "Packaged {} files ({} bytes archived, {} bytes compressed)",
                        payload.file_count, payload.archive_size, payload.compressed_size
                    ),
                )
                .await;
            state.session.id.clone()
        };

        info!("Starting preview session {}", session_id);

        match inner.api.create_session(&payload).await {
            Err(e) => {
                {
                    let mut state = inner.state.lock().await;
                    if state.is_current(&session_id) {
                        state.session.loading = false;
                        inner.apply_event(&mut state, SessionEvent::Failed).await;
                        inner
                            .sink
                            .error(LogOrigin::Terminal, format!("Session request failed: {e}"))
                            .await;
                    }
                }
                inner.notify_failure(&e).await;
                Err(e)
            }
            Ok(CreateSessionResponse::Immediate(info)) => {
                let mut state = inner.state.lock().await;
                if !state.is_current(&session_id) {
                    drop(state);
                    // Stopped while the request was in flight.
                    inner.teardown_remote(&info.sandbox_id).await;
                    return Ok(self.session().await);
                }
                inner
                    .dispatch(&mut state, &session_id, LogOrigin::Server, info.into())
                    .await;
                Ok(state.session.clone())
            }
            Ok(CreateSessionResponse::Streaming(stream)) => {
                let mut state = inner.state.lock().await;
                if !state.is_current(&session_id) {
                    debug!("Session {} stopped before its stream opened", session_id);
                    tokio::spawn(release_orphaned_stream(
                        Arc::downgrade(&self.inner),
                        stream,
                    ));
                    return Ok(state.session.clone());
                }
                let handler = Arc::new(StreamHandler {
                    inner: Arc::downgrade(&self.inner),
                    session_id: session_id.clone(),
                    origin: LogOrigin::Server,
                });
                state.reader = Some(spawn_reader(
                    stream,
                    inner.config.stream.frame_prefix.clone(),
                    handler,
                ));
                if let Some(period) = inner.config.stream.stall_warning() {
                    state.watchdog = Some(spawn_watchdog(
                        Arc::downgrade(&self.inner),
                        session_id,
                        period,
                    ));
                }
                Ok(state.session.clone())
            }
        }
    }

    /// Stop the session. Idempotent; never fails because of remote cleanup.
    pub async fn stop(&self) -> Session {
        self.inner.shutdown(Shutdown::Stop).await
    }

    /// Mandatory cleanup when the embedding view goes away. Runs every
    /// teardown step regardless of phase.
    pub async fn unmount(&self) -> Session {
        self.inner.shutdown(Shutdown::Unmount).await
    }

    /// Wait until the current session stream has ended
    pub async fn wait(&self) -> Session {
        let finished = {
            let state = self.inner.state.lock().await;
            state.reader.as_ref().map(|r| r.finished())
        };
        if let Some(mut finished) = finished {
            wait_finished(&mut finished).await;
        }
        self.session().await
    }

    /// The preview frame finished loading: attach the console bridge,
    /// replacing any bridge attached to an earlier load.
    pub async fn frame_loaded(&self, host: Arc<dyn HostEnvironment>, frame: FrameId) {
        let handle = ConsoleBridge::attach(host, frame, self.inner.sink.clone()).await;
        let previous = {
            let mut state = self.inner.state.lock().await;
            state.bridge.replace(handle)
        };
        if let Some(previous) = previous {
            previous.detach().await;
        }
    }
}

impl ControllerInner {
    async fn notify(&self, notification: Notification) {
        if let Err(e) = self.events.emit_notification(&notification).await {
            warn!("Failed to emit notification: {}", e);
        }
    }

    async fn notify_failure(&self, error: &PreviewError) {
        let title = if error.is_precondition() {
            "Cannot start preview"
        } else if error.is_transport() {
            "Preview request failed"
        } else {
            "Preview failed"
        };
        self.notify(Notification::error(title, error.to_string())).await;
    }

    async fn emit_phase(&self, session: &Session, from: Phase) {
        let change = PhaseChange {
            session_id: session.id.clone(),
            from,
            to: session.phase,
            url: session.url.clone(),
        };
        if let Err(e) = self.events.emit_phase_changed(&change).await {
            warn!("Failed to emit phase change: {}", e);
        }
    }

    /// Apply a lifecycle event; rejected transitions are ignored
    async fn apply_event(&self, state: &mut ControllerState, event: SessionEvent) -> bool {
        match state.session.apply(event) {
            Ok(from) => {
                debug!("Session {}: {} -> {}", state.session.id, from, state.session.phase);
                if state.session.phase == Phase::Ready || state.session.phase == Phase::Error {
                    state.session.loading = false;
                }
                self.emit_phase(&state.session, from).await;
                true
            }
            Err(e) => {
                debug!("Ignoring event: {}", e);
                false
            }
        }
    }

    async fn announce_ready(&self, state: &ControllerState) {
        let message = match &state.session.url {
            Some(url) => format!("Preview ready at {url}"),
            None => "Preview ready".to_string(),
        };
        self.sink.info(LogOrigin::Terminal, message).await;
    }

    /// Handle one frame for `session_id`. Caller holds the state lock.
    async fn dispatch(
        self: &Arc<Self>,
        state: &mut ControllerState,
        session_id: &str,
        origin: LogOrigin,
        event: StreamEvent,
    ) {
        if !state.is_current(session_id) {
            return;
        }
        state.last_frame = Instant::now();
        state.stall_reported = false;

        match event {
            StreamEvent::Heartbeat => {}
            StreamEvent::Log { message } => {
                self.sink.info(origin, message.as_str()).await;
                self.observe_log(state, &message).await;
            }
            StreamEvent::Error { message } => {
                self.sink.error(origin, message.as_str()).await;
                if origin == LogOrigin::Server && is_fatal_error(&message) {
                    state.session.loading = false;
                    if matches!(state.session.phase, Phase::Booting | Phase::Building) {
                        self.apply_event(state, SessionEvent::Failed).await;
                    }
                }
            }
            StreamEvent::Ready {
                sandbox_id,
                url,
                process_id,
            } => {
                if origin != LogOrigin::Server {
                    debug!("Ignoring ready frame from {} channel", origin);
                    return;
                }
                self.on_ready(state, sandbox_id, url, process_id).await;
            }
        }
    }

    async fn observe_log(&self, state: &mut ControllerState, message: &str) {
        let classification = classify(message);

        if let Some(caption) = classification.caption {
            if state.session.caption != Some(caption) {
                state.session.caption = Some(caption);
                if let Err(e) = self.events.emit_caption(&state.session.id, &caption).await {
                    warn!("Failed to emit caption: {}", e);
                }
            }
        }

        if !classification.reachable || state.session.server_reachable {
            return;
        }
        match state.session.phase {
            Phase::Building | Phase::Error => {
                state.session.server_reachable = true;
                if self.apply_event(state, SessionEvent::ServerReachable).await {
                    self.announce_ready(state).await;
                }
            }
            // Remembered until the ready frame arrives.
            Phase::Booting | Phase::Ready => state.session.server_reachable = true,
            Phase::Idle | Phase::Stopped => {}
        }
    }

    async fn on_ready(
        self: &Arc<Self>,
        state: &mut ControllerState,
        sandbox_id: String,
        url: Option<String>,
        process_id: Option<ProcessId>,
    ) {
        let loopback = url.as_deref().map(is_loopback_url).unwrap_or(true);
        let event = SessionEvent::SandboxReady { loopback };
        // A repeated announcement must not replace the sandbox we will tear down.
        if let Err(e) = transition(state.session.phase, event) {
            debug!("Ignoring ready frame for {}: {}", sandbox_id, e);
            return;
        }
        let first_announcement = state.session.sandbox_id.is_none();

        state.session.sandbox_id = Some(sandbox_id.clone());
        state.session.url = url;
        state.session.process_id = process_id;

        if !self.apply_event(state, event).await {
            return;
        }

        match state.session.phase {
            Phase::Ready => self.announce_ready(state).await,
            Phase::Building if state.session.server_reachable => {
                if self.apply_event(state, SessionEvent::ServerReachable).await {
                    self.announce_ready(state).await;
                }
            }
            _ => {
                state.session.loading = true;
                self.sink
                    .info(
                        LogOrigin::Terminal,
                        format!("Sandbox {sandbox_id} is up, waiting for the app server"),
                    )
                    .await;
            }
        }

        if first_announcement
            && self.config.stream.process_logs
            && state.process_reader.is_none()
        {
            tokio::spawn(open_process_logs(
                Arc::downgrade(self),
                state.session.id.clone(),
                sandbox_id,
            ));
        }
    }

    async fn on_stream_closed(&self, session_id: &str, origin: LogOrigin, outcome: ReaderOutcome) {
        let mut state = self.state.lock().await;
        if state.session.id != session_id {
            return;
        }

        match origin {
            LogOrigin::Process => {
                state.process_reader = None;
                if let ReaderOutcome::Failed(reason) = &outcome {
                    self.sink
                        .warn(
                            LogOrigin::Terminal,
                            format!("Process log channel closed: {reason}"),
                        )
                        .await;
                }
            }
            _ => {
                state.reader = None;
                if let Some(watchdog) = state.watchdog.take() {
                    watchdog.abort();
                }
                if state.session.phase == Phase::Stopped {
                    return;
                }
                match outcome {
                    ReaderOutcome::Completed => {
                        if state.process_reader.is_none() {
                            state.session.loading = false;
                        }
                        self.sink
                            .info(LogOrigin::Terminal, "Sandbox stream closed")
                            .await;
                    }
                    ReaderOutcome::Failed(reason) => {
                        // Phase is kept; the sandbox may well be serving.
                        state.session.loading = false;
                        self.sink
                            .error(
                                LogOrigin::Terminal,
                                format!("Sandbox stream interrupted: {reason}"),
                            )
                            .await;
                    }
                    ReaderOutcome::Cancelled => {}
                }
            }
        }
    }

    fn detach_all(&self, state: &mut ControllerState) -> Detached {
        Detached {
            reader: state.reader.take(),
            process_reader: state.process_reader.take(),
            watchdog: state.watchdog.take(),
            bridge: state.bridge.take(),
            sandbox_id: state.session.sandbox_id.take(),
        }
    }

    /// Release detached resources. Every step runs whatever the previous
    /// one did.
    async fn release(&self, detached: Detached) {
        let grace = self.config.stream.cancel_grace();
        if let Some(reader) = detached.reader {
            reader.cancel(grace).await;
        }
        if let Some(reader) = detached.process_reader {
            reader.cancel(grace).await;
        }
        if let Some(watchdog) = detached.watchdog {
            watchdog.abort();
        }
        if let Some(bridge) = detached.bridge {
            bridge.detach().await;
        }
        if let Some(sandbox_id) = detached.sandbox_id {
            self.teardown_remote(&sandbox_id).await;
        }
    }

    async fn teardown_remote(&self, sandbox_id: &str) {
        match self.api.teardown(sandbox_id).await {
            Ok(()) => debug!("Sandbox {} torn down", sandbox_id),
            Err(e) => {
                warn!("Sandbox teardown for {} failed: {}", sandbox_id, e);
                self.sink
                    .warn(
                        LogOrigin::Terminal,
                        format!("Could not release sandbox {sandbox_id}: {e}"),
                    )
                    .await;
            }
        }
    }

    async fn shutdown(&self, reason: Shutdown) -> Session {
        let (detached, previous, snapshot) = {
            let mut state = self.state.lock().await;
            state.stop_generation += 1;
            let previous = state.session.phase;
            let url = state.session.url.clone();
            let detached = self.detach_all(&mut state);
            state.session.reset_remote();
            state.session.server_reachable = false;
            if previous != Phase::Stopped {
                self.apply_event(&mut state, SessionEvent::Stop).await;
            }
            // Keep the URL in the snapshot used for history.
            let mut snapshot = state.session.clone();
            snapshot.url = url;
            snapshot.sandbox_id = detached.sandbox_id.clone();
            (detached, previous, snapshot)
        };

        self.release(detached).await;

        if previous != Phase::Stopped {
            let message = match reason {
                Shutdown::Stop => "Preview stopped",
                Shutdown::Unmount => "Preview closed",
            };
            self.sink.info(LogOrigin::Terminal, message).await;
            if previous != Phase::Idle {
                self.save_history(&snapshot, previous).await;
            }
        }

        self.state.lock().await.session.clone()
    }

    async fn save_history(&self, session: &Session, final_phase: Phase) {
        let Some(history) = &self.history else {
            return;
        };
        let ended_at = now_micros();
        let transcript = SessionTranscript {
            id: session.id.clone(),
            sandbox_id: session.sandbox_id.clone(),
            url: session.url.clone(),
            final_phase,
            started_at: session.started_at.unwrap_or(ended_at),
            ended_at,
            entries: self.sink.entries().await,
        };
        if let Err(e) = history.save(&transcript).await {
            warn!("Failed to save session transcript {}: {}", session.id, e);
        }
    }
}

/// Routes reader callbacks into the controller
struct StreamHandler {
    inner: Weak<ControllerInner>,
    session_id: String,
    origin: LogOrigin,
}

#[async_trait]
impl FrameHandler for StreamHandler {
    async fn on_frame(&self, event: StreamEvent) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        let mut state = inner.state.lock().await;
        inner
            .dispatch(&mut state, &self.session_id, self.origin, event)
            .await;
    }

    async fn on_closed(&self, outcome: ReaderOutcome) {
        if let Some(inner) = self.inner.upgrade() {
            inner
                .on_stream_closed(&self.session_id, self.origin, outcome)
                .await;
        }
    }
}

/// Read a stream nobody wants any more until it names its sandbox, then
/// release that sandbox. Gives up after the cancel grace period.
async fn release_orphaned_stream(inner: Weak<ControllerInner>, mut stream: ByteStream) {
    let Some(controller) = inner.upgrade() else {
        return;
    };
    let mut decoder = FrameDecoder::new(controller.config.stream.frame_prefix.clone());

    let sandbox_id = tokio::time::timeout(controller.config.stream.cancel_grace(), async {
        while let Some(chunk) = stream.next().await {
            let Ok(chunk) = chunk else {
                return None;
            };
            for event in decoder.push(&chunk) {
                if let StreamEvent::Ready { sandbox_id, .. } = event {
                    return Some(sandbox_id);
                }
            }
        }
        None
    })
    .await;

    match sandbox_id {
        Ok(Some(sandbox_id)) => controller.teardown_remote(&sandbox_id).await,
        Ok(None) => debug!("Orphaned stream ended without naming a sandbox"),
        Err(_) => debug!("Orphaned stream named no sandbox within the grace period"),
    }
}

async fn open_process_logs(inner: Weak<ControllerInner>, session_id: String, sandbox_id: String) {
    let Some(controller) = inner.upgrade() else {
        return;
    };
    let stream = match controller.api.process_logs(&sandbox_id).await {
        Ok(stream) => stream,
        Err(e) => {
            debug!("Process log channel for {} unavailable: {}", sandbox_id, e);
            return;
        }
    };

    let mut state = controller.state.lock().await;
    if !state.is_current(&session_id) || state.process_reader.is_some() {
        return;
    }
    let handler = Arc::new(StreamHandler {
        inner,
        session_id,
        origin: LogOrigin::Process,
    });
    state.process_reader = Some(spawn_reader(
        stream,
        controller.config.stream.frame_prefix.clone(),
        handler,
    ));
}

fn spawn_watchdog(inner: Weak<ControllerInner>, session_id: String, stall: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval((stall / 4).max(MIN_WATCHDOG_TICK));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let Some(controller) = inner.upgrade() else {
                return;
            };
            let mut state = controller.state.lock().await;
            if !state.is_current(&session_id) {
                return;
            }
            if !state.stall_reported && state.last_frame.elapsed() >= stall {
                state.stall_reported = true;
                controller
                    .sink
                    .warn(
                        LogOrigin::Terminal,
                        format!("No output from the sandbox for {}s", stall.as_secs()),
                    )
                    .await;
            }
        }
    })
}
