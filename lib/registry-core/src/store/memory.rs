//! In-process coordination store
//!
//! `MemoryStore` is the shared tree; each `MemorySession` is one client
//! session against it. Ephemeral nodes belong to the session that created
//! them and disappear when it is closed, dropped or expired.

use super::{
    parent_path, ChildEvent, ChildEventKind, ChildEventListener, CoordinationStore,
    StoreError, StoreResult, Subscription,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Debug)]
struct Node {
    ephemeral_owner: Option<u64>,
}

struct Watcher {
    path: String,
    recursive: bool,
    sender: mpsc::UnboundedSender<ChildEvent>,
}

impl Watcher {
    fn matches(&self, parent: &str) -> bool {
        if self.path == parent {
            return true;
        }
        if !self.recursive {
            return false;
        }
        if self.path == "/" {
            return true;
        }
        parent
            .strip_prefix(self.path.as_str())
            .is_some_and(|rest| rest.starts_with('/'))
    }
}

struct Tree {
    nodes: BTreeMap<String, Node>,
    watchers: Vec<Watcher>,
    live_sessions: HashSet<u64>,
    available: bool,
}

impl Tree {
    fn check_session(&self, session: u64) -> StoreResult<()> {
        if !self.available {
            return Err(StoreError::Unavailable("connection refused".to_string()));
        }
        if !self.live_sessions.contains(&session) {
            return Err(StoreError::SessionClosed);
        }
        Ok(())
    }

    fn exists(&self, path: &str) -> bool {
        path == "/" || self.nodes.contains_key(path)
    }

    fn children(&self, path: &str) -> Vec<String> {
        let prefix = if path == "/" {
            "/".to_string()
        } else {
            format!("{}/", path)
        };
        self.nodes
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .filter_map(|(key, _)| {
                let segment = &key[prefix.len()..];
                (!segment.contains('/')).then(|| segment.to_string())
            })
            .collect()
    }

    fn insert(&mut self, path: &str, ephemeral_owner: Option<u64>) {
        self.nodes
            .insert(path.to_string(), Node { ephemeral_owner });
        self.notify(path, ChildEventKind::ChildAdded);
    }

    fn notify(&mut self, path: &str, kind: ChildEventKind) {
        let parent = parent_path(path);
        // Watchers whose subscription was dropped have a closed receiver.
        self.watchers.retain(|watcher| {
            if watcher.sender.is_closed() {
                return false;
            }
            if watcher.matches(parent) {
                let event = ChildEvent {
                    kind,
                    path: path.to_string(),
                };
                return watcher.sender.send(event).is_ok();
            }
            true
        });
    }

    fn end_session(&mut self, session: u64) -> usize {
        if !self.live_sessions.remove(&session) {
            return 0;
        }
        let owned: Vec<String> = self
            .nodes
            .iter()
            .filter(|(_, node)| node.ephemeral_owner == Some(session))
            .map(|(path, _)| path.clone())
            .collect();
        for path in &owned {
            self.nodes.remove(path);
            self.notify(path, ChildEventKind::ChildRemoved);
        }
        owned.len()
    }
}

struct Shared {
    tree: Mutex<Tree>,
    next_session: AtomicU64,
    latency_ms: AtomicU64,
}

impl Shared {
    fn tree(&self) -> MutexGuard<'_, Tree> {
        self.tree.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn simulate_latency(&self) {
        let latency = self.latency_ms.load(Ordering::Relaxed);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
    }
}

/// Shared in-memory tree that sessions connect to
#[derive(Clone)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                tree: Mutex::new(Tree {
                    nodes: BTreeMap::new(),
                    watchers: Vec::new(),
                    live_sessions: HashSet::new(),
                    available: true,
                }),
                next_session: AtomicU64::new(1),
                latency_ms: AtomicU64::new(0),
            }),
        }
    }

    /// Open a new session
    pub fn connect(&self) -> MemorySession {
        let id = self.shared.next_session.fetch_add(1, Ordering::Relaxed);
        self.shared.tree().live_sessions.insert(id);
        debug!("Opened coordination store session {}", id);
        MemorySession {
            id,
            shared: self.shared.clone(),
        }
    }

    /// End a session as if its client had crashed
    pub fn expire_session(&self, session: u64) -> usize {
        let removed = self.shared.tree().end_session(session);
        debug!(
            "Expired session {}, removed {} ephemeral nodes",
            session, removed
        );
        removed
    }

    /// Toggle whether client operations succeed
    pub fn set_available(&self, available: bool) {
        self.shared.tree().available = available;
    }

    /// Delay applied to every client operation
    pub fn set_latency(&self, latency: Duration) {
        self.shared
            .latency_ms
            .store(latency.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn exists(&self, path: &str) -> bool {
        self.shared.tree().exists(path)
    }

    pub fn children(&self, path: &str) -> Vec<String> {
        self.shared.tree().children(path)
    }

    /// Number of live subscriptions on exactly `path`
    pub fn watcher_count(&self, path: &str) -> usize {
        self.shared
            .tree()
            .watchers
            .iter()
            .filter(|watcher| watcher.path == path && !watcher.sender.is_closed())
            .count()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// One client session against a [`MemoryStore`]
pub struct MemorySession {
    id: u64,
    shared: Arc<Shared>,
}

impl MemorySession {
    pub fn id(&self) -> u64 {
        self.id
    }
}

fn validate_path(path: &str) -> StoreResult<()> {
    let valid = path == "/"
        || (path.starts_with('/')
            && !path.ends_with('/')
            && !path[1..].split('/').any(str::is_empty));
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidPath(path.to_string()))
    }
}

#[async_trait]
impl CoordinationStore for MemorySession {
    async fn ensure_path(&self, path: &str) -> StoreResult<()> {
        validate_path(path)?;
        self.shared.simulate_latency().await;
        let mut tree = self.shared.tree();
        tree.check_session(self.id)?;

        let mut current = String::new();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            current.push('/');
            current.push_str(segment);
            if !tree.exists(&current) {
                tree.insert(&current, None);
            }
        }
        Ok(())
    }

    async fn create_ephemeral(&self, path: &str) -> StoreResult<()> {
        validate_path(path)?;
        self.shared.simulate_latency().await;
        let mut tree = self.shared.tree();
        tree.check_session(self.id)?;

        if tree.exists(path) {
            return Err(StoreError::NodeExists(path.to_string()));
        }
        let parent = parent_path(path);
        if !tree.exists(parent) {
            return Err(StoreError::NoNode(parent.to_string()));
        }
        tree.insert(path, Some(self.id));
        Ok(())
    }

    async fn list_children(&self, path: &str) -> StoreResult<Vec<String>> {
        validate_path(path)?;
        self.shared.simulate_latency().await;
        let tree = self.shared.tree();
        tree.check_session(self.id)?;

        if !tree.exists(path) {
            return Err(StoreError::NoNode(path.to_string()));
        }
        Ok(tree.children(path))
    }

    async fn subscribe(
        &self,
        path: &str,
        recursive: bool,
        listener: Arc<dyn ChildEventListener>,
    ) -> StoreResult<Subscription> {
        validate_path(path)?;
        self.shared.simulate_latency().await;
        let (sender, events) = mpsc::unbounded_channel();
        {
            let mut tree = self.shared.tree();
            tree.check_session(self.id)?;
            tree.watchers.push(Watcher {
                path: path.to_string(),
                recursive,
                sender,
            });
        }
        Ok(Subscription::spawn(path, events, listener))
    }

    async fn close(&self) -> StoreResult<()> {
        let removed = self.shared.tree().end_session(self.id);
        debug!(
            "Closed coordination store session {}, removed {} ephemeral nodes",
            self.id, removed
        );
        Ok(())
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        self.shared.tree().end_session(self.id);
    }
}
