//! Cross-tree registry: owns every live [`MessageTree`], dispatches work through a
//! per-root FIFO, and exposes cancellation primitives that never cross tree boundaries
//! (§4.9).

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::message_tree::{IncomingMessage, MessageNode, MessageTree, NodeState, TreeError, new_root};

/// Callbacks the owner (the messaging front end's `Handler`) injects so the manager can
/// drive UI updates without knowing anything about a concrete chat platform.
pub trait QueueCallbacks: Send + Sync {
    /// The pending-node ordering for `tree` changed; reposition any "queued" UI.
    fn on_queue_changed(&self, tree: &MessageTree);
    /// `node` was just dequeued and its processor task is starting.
    fn on_node_started(&self, tree: &MessageTree, node_id: &str);
}

/// Everything removed by a `remove_branch` call.
pub struct RemovedBranch {
    /// The node ids removed, in removal order.
    pub removed_nodes: Vec<String>,
    /// The tree they belonged to.
    pub root_id: String,
    /// True if removing this branch emptied the tree entirely (the tree itself was dropped).
    pub removed_entire_tree: bool,
}

/// The nodes a cancellation touched, for UI updates.
pub struct CancelOutcome {
    /// Node ids that were running and had their cancellation token signaled.
    pub cancelled_running: Vec<String>,
    /// Node ids that were pending and got pulled out of their queue.
    pub cancelled_pending: Vec<String>,
}

impl CancelOutcome {
    fn empty() -> Self {
        Self {
            cancelled_running: Vec::new(),
            cancelled_pending: Vec::new(),
        }
    }

    /// All affected node ids, running first.
    pub fn all(&self) -> impl Iterator<Item = &str> {
        self.cancelled_running.iter().chain(self.cancelled_pending.iter()).map(String::as_str)
    }
}

struct RunningTask {
    handle: JoinHandle<()>,
    cancellation: CancellationToken,
}

struct TreeEntry {
    tree: MessageTree,
    running: HashMap<String, RunningTask>,
}

/// Owns `{root_id → MessageTree}` plus the flat `{node_id → root_id}` index that lets a
/// reply to *any* node in a tree resolve back to that tree.
pub struct TreeQueueManager {
    trees: Mutex<HashMap<String, TreeEntry>>,
    node_index: Mutex<HashMap<String, String>>,
    /// Maps a bot-owned status-message id to the real node it hosts the transcript for
    /// (§9 "Reply-target lookup across status vs user messages").
    status_index: Mutex<HashMap<String, String>>,
    callbacks: Arc<dyn QueueCallbacks>,
}

impl TreeQueueManager {
    /// Build a manager with the given UI callback set.
    pub fn new(callbacks: Arc<dyn QueueCallbacks>) -> Self {
        Self {
            trees: Mutex::new(HashMap::new()),
            node_index: Mutex::new(HashMap::new()),
            status_index: Mutex::new(HashMap::new()),
            callbacks,
        }
    }

    /// Resolve any node id (or registered status-message id) to the tree root it belongs to.
    pub async fn root_of(&self, node_id: &str) -> Option<String> {
        if let Some(root_id) = self.node_index.lock().await.get(node_id).cloned() {
            return Some(root_id);
        }
        let owning_node = self.status_index.lock().await.get(node_id).cloned()?;
        self.node_index.lock().await.get(&owning_node).cloned()
    }

    /// Register `node_id` as belonging to `root_id` in the flat index.
    pub async fn index_node(&self, node_id: impl Into<String>, root_id: impl Into<String>) {
        self.node_index.lock().await.insert(node_id.into(), root_id.into());
    }

    /// Register `status_message_id` as the live-transcript surface for `node_id`, so a
    /// reply to the status message resolves back to `node_id` rather than being treated
    /// as a reply to a bare message id with no owning node (§9).
    pub async fn index_status_message(&self, status_message_id: impl Into<String>, node_id: impl Into<String>) {
        self.status_index.lock().await.insert(status_message_id.into(), node_id.into());
    }

    /// Resolve a reply target (either a user/assistant node id or a status-message id)
    /// to the node it logically replies to (§9 `resolve_parent_node_id`).
    pub async fn resolve_parent_node_id(&self, reply_target_id: &str) -> Option<String> {
        if let Some(owning_node) = self.status_index.lock().await.get(reply_target_id).cloned() {
            return Some(owning_node);
        }
        self.node_index.lock().await.contains_key(reply_target_id).then(|| reply_target_id.to_owned())
    }

    /// Create a brand-new tree rooted at `node_id`.
    pub async fn create_root(&self, node_id: impl Into<String>, incoming: IncomingMessage) -> MessageNode {
        let node_id = node_id.into();
        let root = new_root(node_id.clone(), incoming);
        let tree = MessageTree::new(root.clone());
        self.trees.lock().await.insert(
            node_id.clone(),
            TreeEntry {
                tree,
                running: HashMap::new(),
            },
        );
        self.node_index.lock().await.insert(node_id, root.node_id.clone());
        root
    }

    /// Insert a pre-built root node (already carrying any fields the caller set, such as a
    /// status message id) as a brand-new tree. `node.root_id` must equal `node.node_id`.
    pub async fn insert_root(&self, node: MessageNode) {
        let node_id = node.node_id.clone();
        let root_id = node.root_id.clone();
        let tree = MessageTree::new(node);
        self.trees.lock().await.insert(
            node_id.clone(),
            TreeEntry {
                tree,
                running: HashMap::new(),
            },
        );
        self.node_index.lock().await.insert(node_id, root_id);
    }

    /// Attach a new node as a child of `parent_id`'s tree.
    pub async fn add_child(&self, parent_id: &str, node: MessageNode) -> Result<(), TreeError> {
        let root_id = self.root_of(parent_id).await.ok_or_else(|| TreeError::NodeNotFound(parent_id.to_owned()))?;
        let node_id = node.node_id.clone();
        let mut trees = self.trees.lock().await;
        let entry = trees.get_mut(&root_id).ok_or_else(|| TreeError::NodeNotFound(parent_id.to_owned()))?;
        entry.tree.add_child(parent_id, node)?;
        drop(trees);
        self.node_index.lock().await.insert(node_id, root_id);
        Ok(())
    }

    /// Run a read-only closure against the tree owning `node_id`.
    pub async fn with_tree<R>(&self, node_id: &str, f: impl FnOnce(&MessageTree) -> R) -> Option<R> {
        let root_id = self.root_of(node_id).await?;
        let trees = self.trees.lock().await;
        trees.get(&root_id).map(|entry| f(&entry.tree))
    }

    /// Update a node's state, enforcing the tree's terminal-transition invariant.
    pub async fn update_state(
        &self,
        node_id: &str,
        new_state: NodeState,
        session_id: Option<String>,
        error: Option<String>,
    ) -> Result<(), TreeError> {
        let root_id = self.root_of(node_id).await.ok_or_else(|| TreeError::NodeNotFound(node_id.to_owned()))?;
        let mut trees = self.trees.lock().await;
        let entry = trees.get_mut(&root_id).ok_or_else(|| TreeError::NodeNotFound(node_id.to_owned()))?;
        entry.tree.update_state(node_id, new_state, session_id, error)
    }

    /// Set the bot-owned status message id hosting `node_id`'s live transcript.
    pub async fn set_status_message_id(&self, node_id: &str, status_message_id: i64) -> Result<(), TreeError> {
        let root_id = self.root_of(node_id).await.ok_or_else(|| TreeError::NodeNotFound(node_id.to_owned()))?;
        let mut trees = self.trees.lock().await;
        let entry = trees.get_mut(&root_id).ok_or_else(|| TreeError::NodeNotFound(node_id.to_owned()))?;
        entry.tree.set_status_message_id(node_id, status_message_id)
    }

    /// Set a single key in `node_id`'s opaque context map (e.g. `cancel_reason`).
    pub async fn set_context(&self, node_id: &str, key: &str, value: serde_json::Value) -> Result<(), TreeError> {
        let root_id = self.root_of(node_id).await.ok_or_else(|| TreeError::NodeNotFound(node_id.to_owned()))?;
        let mut trees = self.trees.lock().await;
        let entry = trees.get_mut(&root_id).ok_or_else(|| TreeError::NodeNotFound(node_id.to_owned()))?;
        entry.tree.set_context(node_id, key, value)
    }

    /// True if `node_id`'s task has been asked to cancel — processors poll this
    /// cooperatively instead of being hard-aborted, so they can still render a final
    /// "Stopped."/"Cancelled" status before exiting (§4.10, §5 "Cancellation").
    pub async fn is_cancelled(&self, node_id: &str) -> bool {
        let Some(root_id) = self.root_of(node_id).await else { return false };
        let trees = self.trees.lock().await;
        trees
            .get(&root_id)
            .and_then(|entry| entry.running.get(node_id))
            .map(|task| task.cancellation.is_cancelled())
            .unwrap_or(false)
    }

    /// Enqueue `node_id` onto its tree's FIFO; if the tree is idle, dequeue immediately and
    /// spawn `processor_fn(node_id, cancellation)`. On task completion, dequeues the next
    /// pending node if any (§4.9).
    pub async fn enqueue<F, Fut>(self: &Arc<Self>, node_id: String, processor_fn: F)
    where
        F: Fn(String, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let root_id = match self.root_of(&node_id).await {
            Some(root_id) => root_id,
            None => return,
        };

        let processor_fn = Arc::new(processor_fn);
        {
            let mut trees = self.trees.lock().await;
            let Some(entry) = trees.get_mut(&root_id) else { return };
            entry.tree.enqueue(node_id.clone());
            self.callbacks.on_queue_changed(&entry.tree);
        }

        self.drain_next(root_id, processor_fn).await;
    }

    async fn drain_next<F, Fut>(self: &Arc<Self>, root_id: String, processor_fn: Arc<F>)
    where
        F: Fn(String, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let next = {
            let mut trees = self.trees.lock().await;
            let Some(entry) = trees.get_mut(&root_id) else { return };
            let next = entry.tree.dequeue();
            if let Some(node_id) = &next {
                let _ = entry.tree.update_state(node_id, NodeState::InProgress, None, None);
                self.callbacks.on_node_started(&entry.tree, node_id);
            }
            next
        };

        let Some(node_id) = next else { return };

        let cancellation = CancellationToken::new();
        let manager = Arc::clone(self);
        let task_processor = Arc::clone(&processor_fn);
        let task_node_id = node_id.clone();
        let task_root_id = root_id.clone();
        let task_cancellation = cancellation.clone();
        let handle = tokio::spawn(async move {
            (task_processor)(task_node_id, task_cancellation).await;
            manager.on_task_finished(task_root_id, processor_fn).await;
        });

        let mut trees = self.trees.lock().await;
        if let Some(entry) = trees.get_mut(&root_id) {
            entry.running.insert(node_id, RunningTask { handle, cancellation });
        }
    }

    async fn on_task_finished<F, Fut>(self: Arc<Self>, root_id: String, processor_fn: Arc<F>)
    where
        F: Fn(String, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        {
            let mut trees = self.trees.lock().await;
            if let Some(entry) = trees.get_mut(&root_id) {
                entry.running.retain(|_, task| !task.handle.is_finished());
            }
        }
        self.drain_next(root_id, processor_fn).await;
    }

    /// Cancel `node_id`: signal its running task's cancellation token, or remove it from
    /// its queue if pending. Does not touch descendants (§4.9, §8 "affects only n").
    pub async fn cancel_node(&self, node_id: &str) -> CancelOutcome {
        let Some(root_id) = self.root_of(node_id).await else {
            return CancelOutcome::empty();
        };
        let mut trees = self.trees.lock().await;
        let Some(entry) = trees.get_mut(&root_id) else {
            return CancelOutcome::empty();
        };
        self.cancel_node_in(entry, node_id)
    }

    fn cancel_node_in(&self, entry: &mut TreeEntry, node_id: &str) -> CancelOutcome {
        let mut outcome = CancelOutcome::empty();
        if let Some(task) = entry.running.get(node_id) {
            task.cancellation.cancel();
            outcome.cancelled_running.push(node_id.to_owned());
        } else if entry.tree.remove_from_queue(node_id) {
            outcome.cancelled_pending.push(node_id.to_owned());
        }
        outcome
    }

    /// Cancel `node_id` and every descendant's queued/running task (§4.9, §8 "affects
    /// exactly n and its descendants").
    pub async fn cancel_branch(&self, node_id: &str) -> CancelOutcome {
        let Some(root_id) = self.root_of(node_id).await else {
            return CancelOutcome::empty();
        };
        let mut trees = self.trees.lock().await;
        let Some(entry) = trees.get_mut(&root_id) else {
            return CancelOutcome::empty();
        };

        let descendants = entry.tree.get_descendants(node_id);
        let mut outcome = self.cancel_node_in(entry, node_id);
        for descendant_id in descendants {
            let sub = self.cancel_node_in(entry, &descendant_id);
            outcome.cancelled_running.extend(sub.cancelled_running);
            outcome.cancelled_pending.extend(sub.cancelled_pending);
        }
        outcome
    }

    /// Cancel every running/pending task in every tree.
    pub async fn cancel_all(&self) -> CancelOutcome {
        let mut trees = self.trees.lock().await;
        let mut outcome = CancelOutcome::empty();
        for entry in trees.values_mut() {
            let node_ids: Vec<String> = entry.tree.node_ids().map(str::to_owned).collect();
            for node_id in node_ids {
                let sub = self.cancel_node_in(entry, &node_id);
                outcome.cancelled_running.extend(sub.cancelled_running);
                outcome.cancelled_pending.extend(sub.cancelled_pending);
            }
        }
        outcome
    }

    /// Transition `node_id` to `Error`; if `propagate`, also marks every `Pending`
    /// descendant `Error` and pulls them out of their queues ("parent failed").
    pub async fn mark_node_error(&self, node_id: &str, message: &str, propagate: bool) -> Result<Vec<String>, TreeError> {
        let root_id = self.root_of(node_id).await.ok_or_else(|| TreeError::NodeNotFound(node_id.to_owned()))?;
        let mut trees = self.trees.lock().await;
        let entry = trees.get_mut(&root_id).ok_or_else(|| TreeError::NodeNotFound(node_id.to_owned()))?;

        entry.tree.update_state(node_id, NodeState::Error, None, Some(message.to_owned()))?;
        let mut affected = vec![node_id.to_owned()];

        if propagate {
            for descendant_id in entry.tree.get_descendants(node_id) {
                let is_pending = entry.tree.get(&descendant_id).map(|n| n.state == NodeState::Pending).unwrap_or(false);
                if is_pending {
                    let _ = entry.tree.update_state(&descendant_id, NodeState::Error, None, Some("parent failed".to_owned()));
                    entry.tree.remove_from_queue(&descendant_id);
                    affected.push(descendant_id);
                }
            }
        }

        self.callbacks.on_queue_changed(&entry.tree);
        Ok(affected)
    }

    /// Purge `node_id` and its descendants from the tree and the flat index.
    pub async fn remove_branch(&self, node_id: &str) -> Option<RemovedBranch> {
        let root_id = self.root_of(node_id).await?;
        let mut trees = self.trees.lock().await;
        let entry = trees.get_mut(&root_id)?;

        let descendants = entry.tree.get_descendants(node_id);
        let mut removed_nodes = Vec::new();
        for descendant_id in descendants.into_iter().rev() {
            self.cancel_node_in(entry, &descendant_id);
            if entry.tree.remove_node(&descendant_id).is_some() {
                removed_nodes.push(descendant_id);
            }
        }
        self.cancel_node_in(entry, node_id);
        let removed_entire_tree = node_id == root_id;
        if removed_entire_tree {
            entry.tree.remove_node(node_id);
            removed_nodes.push(node_id.to_owned());
            trees.remove(&root_id);
        } else if entry.tree.remove_node(node_id).is_some() {
            removed_nodes.push(node_id.to_owned());
        }
        drop(trees);

        let mut index = self.node_index.lock().await;
        for removed_id in &removed_nodes {
            index.remove(removed_id);
        }
        drop(index);

        let mut status_index = self.status_index.lock().await;
        status_index.retain(|_, owning_node| !removed_nodes.contains(owning_node));

        Some(RemovedBranch {
            removed_nodes,
            root_id,
            removed_entire_tree,
        })
    }

    /// Snapshot every live tree's root id and node count (`/stats`).
    pub async fn stats(&self) -> (usize, usize) {
        let trees = self.trees.lock().await;
        let live_trees = trees.len();
        let total_nodes = trees.values().map(|entry| entry.tree.node_count()).sum();
        (live_trees, total_nodes)
    }

    /// Serializable snapshots of every live tree, for persistence.
    pub async fn snapshot_all(&self) -> HashMap<String, MessageTree> {
        let trees = self.trees.lock().await;
        trees.iter().map(|(root_id, entry)| (root_id.clone(), entry.tree.clone())).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct NoopCallbacks;
    impl QueueCallbacks for NoopCallbacks {
        fn on_queue_changed(&self, _tree: &MessageTree) {}
        fn on_node_started(&self, _tree: &MessageTree, _node_id: &str) {}
    }

    fn incoming(text: &str) -> IncomingMessage {
        IncomingMessage {
            chat_id: 1,
            message_thread_id: None,
            text: text.to_owned(),
            reply_to_node_id: None,
        }
    }

    #[tokio::test]
    async fn enqueue_processes_immediately_when_tree_is_idle() {
        let manager = Arc::new(TreeQueueManager::new(Arc::new(NoopCallbacks)));
        manager.create_root("r", incoming("hi")).await;
        let processed = Arc::new(AtomicUsize::new(0));
        let processed_clone = Arc::clone(&processed);
        manager
            .enqueue("r".to_owned(), move |_node_id, _cancellation| {
                let processed = Arc::clone(&processed_clone);
                async move {
                    processed.fetch_add(1, Ordering::SeqCst);
                }
            })
            .await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(processed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancel_branch_leaves_unrelated_trees_untouched() {
        let manager = Arc::new(TreeQueueManager::new(Arc::new(NoopCallbacks)));
        manager.create_root("r1", incoming("a")).await;
        manager.create_root("r2", incoming("b")).await;
        manager
            .add_child("r1", MessageNode::new("c1", "r1", Some("r1".to_owned()), incoming("c1")))
            .await
            .unwrap();

        let outcome = manager.cancel_branch("r1").await;
        assert!(outcome.all().any(|id| id == "r1"));
        assert!(outcome.all().any(|id| id == "c1"));
        assert!(!outcome.all().any(|id| id == "r2"));
    }

    #[tokio::test]
    async fn mark_node_error_propagates_to_pending_descendants_only() {
        let manager = Arc::new(TreeQueueManager::new(Arc::new(NoopCallbacks)));
        manager.create_root("r", incoming("a")).await;
        manager
            .add_child("r", MessageNode::new("c", "r", Some("r".to_owned()), incoming("c")))
            .await
            .unwrap();

        let affected = manager.mark_node_error("r", "boom", true).await.unwrap();
        assert!(affected.contains(&"r".to_owned()));
        assert!(affected.contains(&"c".to_owned()));

        let child_state = manager.with_tree("c", |tree| tree.get("c").unwrap().state).await.unwrap();
        assert_eq!(child_state, NodeState::Error);
    }

    #[tokio::test]
    async fn cancel_node_signals_the_token_without_aborting_the_task() {
        let manager = Arc::new(TreeQueueManager::new(Arc::new(NoopCallbacks)));
        manager.create_root("r", incoming("a")).await;
        let saw_cancel = Arc::new(AtomicUsize::new(0));
        let saw_cancel_clone = Arc::clone(&saw_cancel);
        manager
            .enqueue("r".to_owned(), move |_node_id, cancellation| {
                let saw_cancel = Arc::clone(&saw_cancel_clone);
                async move {
                    cancellation.cancelled().await;
                    saw_cancel.fetch_add(1, Ordering::SeqCst);
                }
            })
            .await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        manager.cancel_node("r").await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(saw_cancel.load(Ordering::SeqCst), 1);
    }
}
