//! Stream reader task
//!
//! Drives a [`FrameDecoder`] over a byte stream on its own task and hands
//! every frame, strictly in arrival order, to a [`FrameHandler`]. The task
//! can be cancelled cooperatively; once cancellation is observed no further
//! frame is dispatched.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::decoder::FrameDecoder;
use super::frame::StreamEvent;
use crate::error::PreviewError;

/// Boxed body stream as handed over by a [`crate::client::SandboxApi`]
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, PreviewError>> + Send>>;

/// How a reader ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReaderOutcome {
    /// The remote side closed the stream
    Completed,
    /// Cancelled locally
    Cancelled,
    /// The transport broke mid-stream
    Failed(String),
}

/// Receiver of decoded frames
#[async_trait]
pub trait FrameHandler: Send + Sync + 'static {
    /// Called once per frame, in order, never concurrently
    async fn on_frame(&self, event: StreamEvent);

    /// Called exactly once when the reader stops, whatever the reason
    async fn on_closed(&self, outcome: ReaderOutcome);
}

/// Owner's handle to a running reader.
///
/// Dropping the handle also cancels the reader.
pub struct ReaderHandle {
    cancel: watch::Sender<bool>,
    finished: watch::Receiver<bool>,
    task: JoinHandle<()>,
}

impl ReaderHandle {
    /// Cancel the reader and wait up to `grace` for it to wind down; a
    /// reader still busy after that is aborted. Consumes the handle, so a
    /// reader is cancelled at most once. Never fails, even if the reader
    /// already ended.
    pub async fn cancel(self, grace: Duration) {
        let ReaderHandle {
            cancel,
            mut finished,
            task,
        } = self;

        // Err only means the task is gone already.
        let _ = cancel.send(true);

        if tokio::time::timeout(grace, wait_finished(&mut finished))
            .await
            .is_err()
        {
            warn!("Stream reader did not stop within {:?}; aborting", grace);
            task.abort();
        }
    }

    /// Watch that flips to `true` when the reader has stopped
    pub fn finished(&self) -> watch::Receiver<bool> {
        self.finished.clone()
    }

    pub fn is_finished(&self) -> bool {
        *self.finished.borrow() || self.task.is_finished()
    }
}

/// Wait until a reader's `finished` watch reports completion
pub async fn wait_finished(finished: &mut watch::Receiver<bool>) {
    loop {
        if *finished.borrow() {
            return;
        }
        // Sender dropped means the task is gone.
        if finished.changed().await.is_err() {
            return;
        }
    }
}

/// Spawn a reader task over `stream`
pub fn spawn_reader<H: FrameHandler>(
    stream: ByteStream,
    prefix: impl Into<String>,
    handler: Arc<H>,
) -> ReaderHandle {
    let (cancel_tx, mut cancel_rx) = watch::channel(false);
    let (finished_tx, finished_rx) = watch::channel(false);
    let prefix = prefix.into();

    let task = tokio::spawn(async move {
        let outcome = read_frames(stream, prefix, &mut cancel_rx, handler.as_ref()).await;
        debug!("Stream reader closed: {:?}", outcome);
        handler.on_closed(outcome).await;
        let _ = finished_tx.send(true);
    });

    ReaderHandle {
        cancel: cancel_tx,
        finished: finished_rx,
        task,
    }
}

async fn read_frames<H: FrameHandler>(
    mut stream: ByteStream,
    prefix: String,
    cancel_rx: &mut watch::Receiver<bool>,
    handler: &H,
) -> ReaderOutcome {
    let mut decoder = FrameDecoder::new(prefix);

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel_rx.changed() => return ReaderOutcome::Cancelled,
            chunk = stream.next() => chunk,
        };

        let events = match next {
            Some(Ok(chunk)) => decoder.push(&chunk),
            Some(Err(e)) => return ReaderOutcome::Failed(e.to_string()),
            None => {
                let tail = decoder.finish();
                if dispatch(tail, cancel_rx, handler).await {
                    return ReaderOutcome::Cancelled;
                }
                if decoder.skipped_frames() > 0 {
                    debug!("Skipped {} undecodable frames", decoder.skipped_frames());
                }
                return ReaderOutcome::Completed;
            }
        };

        if dispatch(events, cancel_rx, handler).await {
            return ReaderOutcome::Cancelled;
        }
    }
}

/// Returns true when cancellation interrupted dispatch
async fn dispatch<H: FrameHandler>(
    events: Vec<StreamEvent>,
    cancel_rx: &watch::Receiver<bool>,
    handler: &H,
) -> bool {
    for event in events {
        if *cancel_rx.borrow() {
            return true;
        }
        handler.on_frame(event).await;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        frames: Mutex<Vec<StreamEvent>>,
        closed: Mutex<Vec<ReaderOutcome>>,
    }

    #[async_trait]
    impl FrameHandler for Recorder {
        async fn on_frame(&self, event: StreamEvent) {
            self.frames.lock().await.push(event);
        }

        async fn on_closed(&self, outcome: ReaderOutcome) {
            self.closed.lock().await.push(outcome);
        }
    }

    fn chunks(parts: &[&'static str]) -> ByteStream {
        let items: Vec<Result<Bytes, PreviewError>> = parts
            .iter()
            .map(|p| Ok(Bytes::from_static(p.as_bytes())))
            .collect();
        Box::pin(stream::iter(items))
    }

    #[tokio::test]
    async fn test_frames_dispatched_in_order() {
        let recorder = Arc::new(Recorder::default());
        let handle = spawn_reader(
            chunks(&[
                "data: {\"type\":\"log\",\"message\":\"1\"}\ndata: {\"type\":\"lo",
                "g\",\"message\":\"2\"}\n",
                "data: {\"type\":\"log\",\"message\":\"3\"}",
            ]),
            "data: ",
            recorder.clone(),
        );
        wait_finished(&mut handle.finished()).await;

        let messages: Vec<String> = recorder
            .frames
            .lock()
            .await
            .iter()
            .map(|e| match e {
                StreamEvent::Log { message } => message.clone(),
                other => panic!("unexpected frame {other:?}"),
            })
            .collect();
        assert_eq!(messages, vec!["1", "2", "3"]);
        assert_eq!(
            recorder.closed.lock().await.as_slice(),
            &[ReaderOutcome::Completed]
        );
    }

    #[tokio::test]
    async fn test_transport_error_ends_reader() {
        let recorder = Arc::new(Recorder::default());
        let items: Vec<Result<Bytes, PreviewError>> = vec![
            Ok(Bytes::from_static(b"data: {\"type\":\"heartbeat\"}\n")),
            Err(PreviewError::Transport("connection reset".to_string())),
            Ok(Bytes::from_static(b"data: {\"type\":\"heartbeat\"}\n")),
        ];
        let handle = spawn_reader(Box::pin(stream::iter(items)), "data: ", recorder.clone());
        wait_finished(&mut handle.finished()).await;

        assert_eq!(recorder.frames.lock().await.len(), 1);
        assert!(matches!(
            recorder.closed.lock().await.first(),
            Some(ReaderOutcome::Failed(msg)) if msg.contains("connection reset")
        ));
    }

    #[tokio::test]
    async fn test_cancel_stops_pending_reader() {
        let recorder = Arc::new(Recorder::default());
        let body = stream::iter(vec![Ok::<_, PreviewError>(Bytes::from_static(
            b"data: {\"type\":\"heartbeat\"}\n",
        ))])
        .chain(stream::pending());
        let handle = spawn_reader(Box::pin(body), "data: ", recorder.clone());

        tokio::time::sleep(Duration::from_millis(20)).await;
        let mut finished = handle.finished();
        handle.cancel(Duration::from_secs(1)).await;
        wait_finished(&mut finished).await;

        assert_eq!(recorder.frames.lock().await.len(), 1);
        assert_eq!(
            recorder.closed.lock().await.as_slice(),
            &[ReaderOutcome::Cancelled]
        );
    }

    #[tokio::test]
    async fn test_cancel_after_completion_is_harmless() {
        let recorder = Arc::new(Recorder::default());
        let handle = spawn_reader(chunks(&[]), "data: ", recorder.clone());
        wait_finished(&mut handle.finished()).await;
        assert!(handle.is_finished());

        handle.cancel(Duration::from_millis(50)).await;
        assert_eq!(recorder.closed.lock().await.len(), 1);
    }
}
