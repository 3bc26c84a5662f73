//! Coordination store abstraction
//!
//! The registry consumes a hierarchical, strongly consistent store with
//! persistent and ephemeral nodes and child-change subscriptions. Concrete
//! clients implement [`CoordinationStore`]; [`MemoryStore`] is an in-process
//! implementation.

pub mod memory;

pub use memory::{MemorySession, MemoryStore};

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Node already exists: {0}")]
    NodeExists(String),

    #[error("Node does not exist: {0}")]
    NoNode(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Session closed")]
    SessionClosed,

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChildEventKind {
    ChildAdded,
    ChildRemoved,
}

/// Change notification for a watched path
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChildEvent {
    pub kind: ChildEventKind,
    /// Full path of the node that was added or removed
    pub path: String,
}

/// Receiver of child-change notifications
#[async_trait]
pub trait ChildEventListener: Send + Sync + 'static {
    async fn on_child_event(&self, event: ChildEvent);
}

/// Session-scoped client of the coordination store
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Create `path` and any missing ancestors as persistent nodes
    async fn ensure_path(&self, path: &str) -> StoreResult<()>;

    /// Create a node removed by the store when this session ends
    async fn create_ephemeral(&self, path: &str) -> StoreResult<()>;

    /// List the child segments of `path` in store order
    async fn list_children(&self, path: &str) -> StoreResult<Vec<String>>;

    /// Deliver future child-added/child-removed events under `path` to
    /// `listener`. With `recursive`, changes below direct children are
    /// delivered too.
    async fn subscribe(
        &self,
        path: &str,
        recursive: bool,
        listener: Arc<dyn ChildEventListener>,
    ) -> StoreResult<Subscription>;

    /// Release the session; ephemeral nodes owned by it are removed
    async fn close(&self) -> StoreResult<()>;
}

/// Handle to an active subscription. Dropping it stops event delivery.
pub struct Subscription {
    path: String,
    task: JoinHandle<()>,
}

impl Subscription {
    /// Drive `listener` with every event received on `events`
    pub fn spawn(
        path: impl Into<String>,
        mut events: mpsc::UnboundedReceiver<ChildEvent>,
        listener: Arc<dyn ChildEventListener>,
    ) -> Self {
        let task = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                listener.on_child_event(event).await;
            }
        });
        Self {
            path: path.into(),
            task,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stop delivering events
    pub fn cancel(self) {
        self.task.abort();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("path", &self.path)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Bound a store operation by `limit`
pub async fn with_timeout<T, F>(limit: Duration, operation: &str, fut: F) -> StoreResult<T>
where
    F: Future<Output = StoreResult<T>>,
{
    match time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Unavailable(format!(
            "{} timed out after {:?}",
            operation, limit
        ))),
    }
}

/// Parent of an absolute path; the root is its own parent
pub(crate) fn parent_path(path: &str) -> &str {
    match path.rsplit_once('/') {
        Some(("", _)) | None => "/",
        Some((parent, _)) => parent,
    }
}
