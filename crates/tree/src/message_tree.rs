//! Per-chat conversation tree: nodes, parent/child links, state machine, and the per-tree
//! FIFO processing queue (§3, §4.8).

use std::collections::{HashMap, VecDeque};

use jiff::Zoned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A node's position in its lifecycle. Terminal states (`Completed`, `Error`) never
/// transition again (§3 invariant).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    /// Waiting in the tree's queue, not yet dequeued.
    Pending,
    /// Currently being processed; at most one per tree.
    InProgress,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Error,
}

impl NodeState {
    fn is_terminal(self) -> bool {
        matches!(self, NodeState::Completed | NodeState::Error)
    }
}

/// The platform message that originated a node: where it came from and what it said.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomingMessage {
    /// The chat (or channel/guild-scoped thread root) the message arrived in.
    pub chat_id: i64,
    /// Platform-specific thread id, for platforms with forum-style topics.
    pub message_thread_id: Option<i64>,
    /// The message text as the user sent it (commands already stripped upstream, if any).
    pub text: String,
    /// The node id this message replied to, if any, prior to resolution.
    pub reply_to_node_id: Option<String>,
}

/// One node in a conversation tree (§3 `MessageNode`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageNode {
    /// Platform-unique message id; also this node's identity.
    pub node_id: String,
    /// The tree root this node belongs to.
    pub root_id: String,
    /// The parent node id, or `None` for the root.
    pub parent_id: Option<String>,
    /// Current lifecycle state.
    pub state: NodeState,
    /// The originating platform message.
    pub incoming: IncomingMessage,
    /// Id of the bot's own status message hosting the live transcript.
    pub status_message_id: Option<i64>,
    /// Backend session id, populated once the CLI session reports one.
    pub session_id: Option<String>,
    /// User-facing error text, set when `state == Error`.
    pub error_message: Option<String>,
    /// Opaque per-node context, e.g. `cancel_reason`.
    pub context: HashMap<String, serde_json::Value>,
    /// Creation timestamp.
    pub created_at: Zoned,
    /// Last-mutation timestamp.
    pub updated_at: Zoned,
}

impl MessageNode {
    /// Construct a new, `Pending` node.
    pub fn new(node_id: impl Into<String>, root_id: impl Into<String>, parent_id: Option<String>, incoming: IncomingMessage) -> Self {
        let now = Zoned::now();
        Self {
            node_id: node_id.into(),
            root_id: root_id.into(),
            parent_id,
            state: NodeState::Pending,
            incoming,
            status_message_id: None,
            session_id: None,
            error_message: None,
            context: HashMap::new(),
            created_at: now.clone(),
            updated_at: now,
        }
    }
}

/// Failure modes for tree mutation operations.
#[derive(Debug, Error)]
pub enum TreeError {
    /// `add_child`'s named parent doesn't exist in this tree.
    #[error("parent node {0} not found")]
    ParentNotFound(String),
    /// The node named in an operation doesn't exist in this tree.
    #[error("node {0} not found")]
    NodeNotFound(String),
    /// Attempted to transition a node that is already in a terminal state.
    #[error("node {0} is already terminal and cannot transition")]
    AlreadyTerminal(String),
    /// `add_root` called on a tree that already has a root.
    #[error("tree {0} already has a root")]
    RootAlreadyExists(String),
}

/// A per-chat conversation tree: a node set, a child index, and a FIFO of pending node ids.
///
/// All operations are intended to run behind a single per-tree mutex (§5); this type itself
/// does no locking — `TreeQueueManager` owns that discipline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageTree {
    /// This tree's root node id.
    pub root_id: String,
    nodes: HashMap<String, MessageNode>,
    children: HashMap<String, Vec<String>>,
    queue: VecDeque<String>,
}

impl MessageTree {
    /// Start a new tree rooted at `root`.
    pub fn new(root: MessageNode) -> Self {
        let root_id = root.root_id.clone();
        let mut nodes = HashMap::new();
        nodes.insert(root.node_id.clone(), root);
        Self {
            root_id,
            nodes,
            children: HashMap::new(),
            queue: VecDeque::new(),
        }
    }

    /// Look up a node by id.
    pub fn get(&self, node_id: &str) -> Option<&MessageNode> {
        self.nodes.get(node_id)
    }

    /// Attach `node` as a child of `parent_id`. Rejects if the parent is missing. If the
    /// parent is already in `Error` state, the new child is created already `Error` too
    /// (§4.8 "rejects when parent is missing or has terminal state with ERROR propagated").
    pub fn add_child(&mut self, parent_id: &str, mut node: MessageNode) -> Result<(), TreeError> {
        let parent = self.nodes.get(parent_id).ok_or_else(|| TreeError::ParentNotFound(parent_id.to_owned()))?;
        if parent.state == NodeState::Error {
            node.state = NodeState::Error;
            node.error_message = Some("parent failed".to_owned());
        }
        self.children.entry(parent_id.to_owned()).or_default().push(node.node_id.clone());
        self.nodes.insert(node.node_id.clone(), node);
        Ok(())
    }

    /// Transition `node_id` to `new_state`, enforcing that terminal states never transition
    /// again, optionally recording a captured session id or error message.
    pub fn update_state(
        &mut self,
        node_id: &str,
        new_state: NodeState,
        session_id: Option<String>,
        error: Option<String>,
    ) -> Result<(), TreeError> {
        let node = self.nodes.get_mut(node_id).ok_or_else(|| TreeError::NodeNotFound(node_id.to_owned()))?;
        if node.state.is_terminal() {
            return Err(TreeError::AlreadyTerminal(node_id.to_owned()));
        }
        node.state = new_state;
        if let Some(session_id) = session_id {
            node.session_id = Some(session_id);
        }
        if let Some(error) = error {
            node.error_message = Some(error);
        }
        node.updated_at = Zoned::now();
        Ok(())
    }

    /// Push `node_id` onto the tree's FIFO.
    pub fn enqueue(&mut self, node_id: String) {
        self.queue.push_back(node_id);
    }

    /// Pop the next pending node id, but only when no node in the tree is `InProgress`.
    pub fn dequeue(&mut self) -> Option<String> {
        if self.nodes.values().any(|n| n.state == NodeState::InProgress) {
            return None;
        }
        self.queue.pop_front()
    }

    /// Remove `node_id` from the queue without dequeuing it (used by cancellation).
    pub fn remove_from_queue(&mut self, node_id: &str) -> bool {
        let before = self.queue.len();
        self.queue.retain(|id| id != node_id);
        self.queue.len() != before
    }

    /// Walk ancestors of `node_id` until a `Completed` node with a `session_id` is found —
    /// the fork source for a new branch (§4.8 "Session inheritance").
    pub fn get_parent_session_id(&self, node_id: &str) -> Option<String> {
        let mut current = self.nodes.get(node_id)?.parent_id.clone();
        while let Some(candidate_id) = current {
            let candidate = self.nodes.get(&candidate_id)?;
            if candidate.state == NodeState::Completed {
                if let Some(session_id) = &candidate.session_id {
                    return Some(session_id.clone());
                }
            }
            current = candidate.parent_id.clone();
        }
        None
    }

    /// All descendants of `node_id`, in breadth-first order, not including `node_id` itself.
    pub fn get_descendants(&self, node_id: &str) -> Vec<String> {
        let mut out = Vec::new();
        let mut frontier = VecDeque::from([node_id.to_owned()]);
        while let Some(current) = frontier.pop_front() {
            if let Some(kids) = self.children.get(&current) {
                for kid in kids {
                    out.push(kid.clone());
                    frontier.push_back(kid.clone());
                }
            }
        }
        out
    }

    /// Direct children of `node_id`.
    pub fn children_of(&self, node_id: &str) -> &[String] {
        self.children.get(node_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Ordered pending node ids, for UI repositioning.
    pub fn queue_snapshot(&self) -> Vec<String> {
        self.queue.iter().cloned().collect()
    }

    /// True if no node in this tree is pending or in progress.
    pub fn is_idle(&self) -> bool {
        self.queue.is_empty() && !self.nodes.values().any(|n| n.state == NodeState::InProgress)
    }

    /// Total node count, used by `/stats`.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// All node ids currently in the tree.
    pub fn node_ids(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    /// Set the bot-owned status message id hosting this node's live transcript.
    pub fn set_status_message_id(&mut self, node_id: &str, status_message_id: i64) -> Result<(), TreeError> {
        let node = self.nodes.get_mut(node_id).ok_or_else(|| TreeError::NodeNotFound(node_id.to_owned()))?;
        node.status_message_id = Some(status_message_id);
        Ok(())
    }

    /// Set a single key in a node's opaque context map (e.g. `cancel_reason`).
    pub fn set_context(&mut self, node_id: &str, key: &str, value: serde_json::Value) -> Result<(), TreeError> {
        let node = self.nodes.get_mut(node_id).ok_or_else(|| TreeError::NodeNotFound(node_id.to_owned()))?;
        node.context.insert(key.to_owned(), value);
        Ok(())
    }

    /// Remove `node_id` and detach it from its parent's child list. Used by `remove_branch`;
    /// does not recurse — callers remove descendants themselves in the order they choose.
    pub fn remove_node(&mut self, node_id: &str) -> Option<MessageNode> {
        let node = self.nodes.remove(node_id)?;
        if let Some(parent_id) = &node.parent_id {
            if let Some(siblings) = self.children.get_mut(parent_id) {
                siblings.retain(|id| id != node_id);
            }
        }
        self.children.remove(node_id);
        self.queue.retain(|id| id != node_id);
        Some(node)
    }
}

/// Build the first node of a brand-new tree, where `root_id == node_id`.
pub fn new_root(node_id: impl Into<String>, incoming: IncomingMessage) -> MessageNode {
    let node_id = node_id.into();
    MessageNode::new(node_id.clone(), node_id, None, incoming)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn incoming(text: &str) -> IncomingMessage {
        IncomingMessage {
            chat_id: 1,
            message_thread_id: None,
            text: text.to_owned(),
            reply_to_node_id: None,
        }
    }

    #[test]
    fn dequeue_blocked_while_a_node_is_in_progress() {
        let root = new_root("r", incoming("hi"));
        let mut tree = MessageTree::new(root);
        tree.enqueue("r".to_owned());
        tree.update_state("r", NodeState::InProgress, None, None).unwrap();
        assert_eq!(tree.dequeue(), None);
    }

    #[test]
    fn terminal_state_never_transitions_again() {
        let root = new_root("r", incoming("hi"));
        let mut tree = MessageTree::new(root);
        tree.update_state("r", NodeState::Completed, Some("s1".to_owned()), None).unwrap();
        let err = tree.update_state("r", NodeState::Error, None, Some("boom".to_owned())).unwrap_err();
        assert!(matches!(err, TreeError::AlreadyTerminal(_)));
    }

    #[test]
    fn fork_source_walks_up_to_nearest_completed_session() {
        let root = new_root("r", incoming("hi"));
        let mut tree = MessageTree::new(root);
        tree.update_state("r", NodeState::Completed, Some("s1".to_owned()), None).unwrap();
        let child = MessageNode::new("c", "r", Some("r".to_owned()), incoming("reply"));
        tree.add_child("r", child).unwrap();
        assert_eq!(tree.get_parent_session_id("c"), Some("s1".to_owned()));
    }

    #[test]
    fn get_descendants_is_breadth_first_and_excludes_self() {
        let root = new_root("r", incoming("hi"));
        let mut tree = MessageTree::new(root);
        tree.add_child("r", MessageNode::new("a", "r", Some("r".to_owned()), incoming("a"))).unwrap();
        tree.add_child("a", MessageNode::new("b", "r", Some("a".to_owned()), incoming("b"))).unwrap();
        let descendants = tree.get_descendants("r");
        assert_eq!(descendants, vec!["a".to_owned(), "b".to_owned()]);
    }

    #[test]
    fn add_child_rejects_missing_parent() {
        let root = new_root("r", incoming("hi"));
        let mut tree = MessageTree::new(root);
        let err = tree
            .add_child("nope", MessageNode::new("c", "r", Some("nope".to_owned()), incoming("c")))
            .unwrap_err();
        assert!(matches!(err, TreeError::ParentNotFound(_)));
    }
}
