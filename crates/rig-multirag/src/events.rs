//! Request-scoped progress events
//!
//! Each run gets its own bounded channel: many producers (the root graph and
//! every research branch) share a cloneable [`ProgressReporter`], and one
//! consumer drains an [`EventReceiver`] until the terminal event.
//!
//! A consumer that goes away must never stall the run. The first failed send
//! marks the reporter closed and cancels the run's token; later reports are
//! no-ops.

use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Kind of a progress event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    Update,
    /// A piece of the final answer as it is generated
    AnswerFragment,
    End,
    ServerError,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Update => "update",
            EventKind::AnswerFragment => "answer-fragment",
            EventKind::End => "end",
            EventKind::ServerError => "server-error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, EventKind::End | EventKind::ServerError)
    }
}

/// One human-readable progress record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub kind: EventKind,
    /// Stage or agent that produced the event
    pub source: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    pub fn new(kind: EventKind, source: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            source: source.into(),
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn update(source: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(EventKind::Update, source, message)
    }

    pub fn is_terminal(&self) -> bool {
        self.kind.is_terminal()
    }

    /// Render as a Server-Sent Events frame
    pub fn sse_frame(&self) -> String {
        let data = serde_json::json!({
            "message_source": self.source,
            "message": self.message,
            "timestamp": self.timestamp.to_rfc3339(),
        });
        format!("event: {}\ndata: {}\n\n", self.kind.as_str(), data)
    }
}

struct ReporterInner {
    tx: mpsc::Sender<ProgressEvent>,
    closed: AtomicBool,
    terminated: AtomicBool,
    send_timeout: Duration,
    cancel: CancellationToken,
}

/// Producer side of a progress channel
///
/// Cheap to clone; every branch holds its own clone.
#[derive(Clone, Default)]
pub struct ProgressReporter {
    inner: Option<Arc<ReporterInner>>,
}

impl std::fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("attached", &self.inner.is_some())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl ProgressReporter {
    /// Reporter with no consumer; events only go to the log
    pub fn detached() -> Self {
        Self { inner: None }
    }

    /// Push an update event
    pub async fn report(&self, source: &str, message: impl Into<String>) {
        self.send(ProgressEvent::update(source, message)).await;
    }

    /// Push one fragment of the streamed final answer
    pub async fn answer_fragment(&self, source: &str, fragment: impl Into<String>) {
        self.send(ProgressEvent::new(EventKind::AnswerFragment, source, fragment))
            .await;
    }

    /// Push the terminal `end` event
    pub async fn finish(&self, source: &str, message: impl Into<String>) {
        self.send(ProgressEvent::new(EventKind::End, source, message)).await;
    }

    /// Push the terminal `server-error` event
    pub async fn fail(&self, source: &str, message: impl Into<String>) {
        self.send(ProgressEvent::new(EventKind::ServerError, source, message))
            .await;
    }

    /// Check if the consumer has gone away
    pub fn is_closed(&self) -> bool {
        self.inner
            .as_ref()
            .map(|inner| inner.closed.load(Ordering::Acquire))
            .unwrap_or(false)
    }

    /// Check if a terminal event has been sent
    pub fn is_terminated(&self) -> bool {
        self.inner
            .as_ref()
            .map(|inner| inner.terminated.load(Ordering::Acquire))
            .unwrap_or(false)
    }

    async fn send(&self, event: ProgressEvent) {
        debug!(source = %event.source, kind = event.kind.as_str(), "{}", event.message);

        let Some(inner) = &self.inner else {
            return;
        };

        if inner.terminated.load(Ordering::Acquire) {
            debug!("Progress channel already terminated, dropping event");
            return;
        }
        if event.is_terminal() && inner.terminated.swap(true, Ordering::AcqRel) {
            return;
        }
        if inner.closed.load(Ordering::Acquire) {
            return;
        }

        match tokio::time::timeout(inner.send_timeout, inner.tx.send(event)).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => {
                if !inner.closed.swap(true, Ordering::AcqRel) {
                    warn!("Progress consumer disconnected, cancelling run");
                    inner.cancel.cancel();
                }
            }
            Err(_) => {
                warn!(
                    timeout_ms = inner.send_timeout.as_millis() as u64,
                    "Progress consumer stalled, event dropped"
                );
            }
        }
    }
}

/// Consumer side of a progress channel
///
/// Yields events in arrival order and stops after the first terminal event.
#[derive(Debug)]
pub struct EventReceiver {
    rx: mpsc::Receiver<ProgressEvent>,
    finished: bool,
}

impl EventReceiver {
    /// Receive the next event, or `None` once the run has ended
    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        if self.finished {
            return None;
        }
        let event = self.rx.recv().await;
        match &event {
            Some(e) if e.is_terminal() => {
                self.finished = true;
                self.rx.close();
            }
            None => self.finished = true,
            _ => {}
        }
        event
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Adapt into a stream ending after the terminal event
    pub fn into_stream(self) -> impl Stream<Item = ProgressEvent> + Send + Unpin {
        Box::pin(futures::stream::unfold(self, |mut receiver| async move {
            receiver.recv().await.map(|event| (event, receiver))
        }))
    }
}

/// Create the channel for one run
///
/// `cancel` is triggered if the consumer disconnects.
pub fn progress_channel(
    capacity: usize,
    send_timeout: Duration,
    cancel: CancellationToken,
) -> (ProgressReporter, EventReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let reporter = ProgressReporter {
        inner: Some(Arc::new(ReporterInner {
            tx,
            closed: AtomicBool::new(false),
            terminated: AtomicBool::new(false),
            send_timeout,
            cancel,
        })),
    };
    (
        reporter,
        EventReceiver {
            rx,
            finished: false,
        },
    )
}
