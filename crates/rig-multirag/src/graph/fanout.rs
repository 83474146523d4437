//! Dynamic fan-out primitive
//!
//! Branches discovered at runtime are started with [`FanOut::spawn`] and
//! collected with [`join_all`]. The primitive only needs a [`TaskSpawner`]
//! to hand tasks to, so it is not tied to one executor. A panicking branch is
//! reported as a [`JoinFailure`] instead of tearing down the caller.

use futures::channel::oneshot;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Something that can run a detached task to completion
pub trait TaskSpawner: Send + Sync {
    fn spawn_boxed(&self, task: BoxFuture<'static, ()>);
}

/// Spawns onto the ambient tokio runtime
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSpawner;

impl TaskSpawner for TokioSpawner {
    fn spawn_boxed(&self, task: BoxFuture<'static, ()>) {
        tokio::spawn(task);
    }
}

/// Why a branch produced no value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinFailure {
    /// The task panicked
    Panicked(String),
    /// The task was dropped before completing (e.g. runtime shutdown)
    Dropped,
}

impl std::fmt::Display for JoinFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JoinFailure::Panicked(message) => write!(f, "panicked: {}", message),
            JoinFailure::Dropped => write!(f, "task dropped before completion"),
        }
    }
}

/// Handle to one spawned branch
#[derive(Debug)]
pub struct BranchHandle<T> {
    label: String,
    rx: oneshot::Receiver<std::thread::Result<T>>,
}

impl<T> BranchHandle<T> {
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Wait for this branch alone
    pub async fn join(self) -> Joined<T> {
        let outcome = match self.rx.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(payload)) => Err(JoinFailure::Panicked(panic_message(payload.as_ref()))),
            Err(_) => Err(JoinFailure::Dropped),
        };
        if let Err(failure) = &outcome {
            warn!(branch = %self.label, %failure, "Branch did not complete");
        }
        Joined {
            label: self.label,
            outcome,
        }
    }
}

/// Result of joining a branch
#[derive(Debug)]
pub struct Joined<T> {
    pub label: String,
    pub outcome: Result<T, JoinFailure>,
}

/// Spawns branches, optionally bounding how many run at once
#[derive(Clone)]
pub struct FanOut {
    spawner: Arc<dyn TaskSpawner>,
    permits: Option<Arc<Semaphore>>,
}

impl Default for FanOut {
    fn default() -> Self {
        Self::new(TokioSpawner)
    }
}

impl FanOut {
    pub fn new(spawner: impl TaskSpawner + 'static) -> Self {
        Self {
            spawner: Arc::new(spawner),
            permits: None,
        }
    }

    /// Bound concurrent branches; `0` means unbounded
    pub fn with_concurrency(mut self, limit: usize) -> Self {
        self.permits = (limit > 0).then(|| Arc::new(Semaphore::new(limit)));
        self
    }

    /// Start a branch
    pub fn spawn<T, F>(&self, label: impl Into<String>, task: F) -> BranchHandle<T>
    where
        T: Send + 'static,
        F: Future<Output = T> + Send + 'static,
    {
        let label = label.into();
        let (tx, rx) = oneshot::channel();
        let permits = self.permits.clone();
        let name = label.clone();

        let wrapped = async move {
            // Semaphore is never closed, so acquire only fails if it is dropped
            let _permit = match permits {
                Some(semaphore) => semaphore.acquire_owned().await.ok(),
                None => None,
            };
            debug!(branch = %name, "Branch started");
            let outcome = AssertUnwindSafe(task).catch_unwind().await;
            let _ = tx.send(outcome);
        };

        self.spawner.spawn_boxed(wrapped.boxed());
        BranchHandle { label, rx }
    }
}

/// Wait for every branch to reach a terminal state
///
/// Results are returned in spawn order; failed branches are included.
pub async fn join_all<T>(handles: Vec<BranchHandle<T>>) -> Vec<Joined<T>> {
    futures::future::join_all(handles.into_iter().map(BranchHandle::join)).await
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
