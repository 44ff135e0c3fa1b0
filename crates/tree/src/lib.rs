//! Tree-based conversation queue: each incoming message becomes a node in a per-chat
//! tree, processed one at a time per root while trees run in parallel (§3, §4.8, §4.9).

pub mod message_tree;
pub mod queue_manager;

pub use message_tree::{IncomingMessage, MessageNode, MessageTree, NodeState, TreeError, new_root};
pub use queue_manager::{CancelOutcome, QueueCallbacks, RemovedBranch, TreeQueueManager};
