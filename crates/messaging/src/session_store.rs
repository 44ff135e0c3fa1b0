//! Durable per-chat state: tree snapshots, the node→root index, and the message-id log
//! used for best-effort chat cleanup on `/clear` (§3 "SessionStore", §6 "Persisted state
//! layout"). Grounded on the original's JSON-file + lock persistence idiom, with the
//! schema widened to tree snapshots per spec §3/§6 rather than single session records.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tree::MessageTree;

/// Whether a logged message was sent by the user or by us.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Sent by the user.
    In,
    /// Sent by this process.
    Out,
}

/// What a logged message was: a slash command, ordinary content, or a live-edited status
/// message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// A `/stop`, `/stats`, or `/clear` invocation (or its reply).
    Command,
    /// Ordinary conversational content.
    Content,
    /// A bot-owned status message.
    Status,
}

/// One entry in a chat's message log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggedMessage {
    /// The platform message id.
    pub message_id: String,
    /// Who sent it.
    pub direction: Direction,
    /// What kind of message it was.
    pub kind: MessageKind,
    /// When it was recorded.
    pub recorded_at: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoreData {
    #[serde(default)]
    roots: HashMap<String, MessageTree>,
    #[serde(default)]
    node_index: HashMap<String, String>,
    #[serde(default)]
    msg_log: HashMap<String, Vec<LoggedMessage>>,
}

/// Persistent KV store for tree snapshots, the reply-resolution index, and per-chat
/// message logs. All mutations are coalesced to a single JSON file; the last write wins
/// (§5 "SessionStore writes"): concurrent mutators queue on `write_lock`, but each checks
/// `written_version` before touching disk and skips its own write entirely if a writer ahead
/// of it in the queue already persisted a snapshot at least as new.
pub struct SessionStore {
    path: PathBuf,
    data: Mutex<StoreData>,
    write_lock: Mutex<()>,
    version: AtomicU64,
    written_version: AtomicU64,
}

impl SessionStore {
    /// Load (or initialize empty) state from `path`.
    pub async fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let data = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_default(),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => StoreData::default(),
            Err(err) => return Err(err.into()),
        };
        Ok(Self {
            path,
            data: Mutex::new(data),
            write_lock: Mutex::new(()),
            version: AtomicU64::new(0),
            written_version: AtomicU64::new(0),
        })
    }

    /// Persist the current state of `self.data`, coalescing with any in-flight or queued
    /// persist calls and writing atomically via a temp file + rename in the same directory.
    async fn persist(&self) -> anyhow::Result<()> {
        let my_version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
        let _write_guard = self.write_lock.lock().await;
        if self.written_version.load(Ordering::SeqCst) >= my_version {
            // A writer ahead of us in the queue already flushed a snapshot that is at least
            // this new; our mutation, committed before we got `my_version`, is in it.
            return Ok(());
        }

        let serialized = {
            let data = self.data.lock().await;
            serde_json::to_string_pretty(&*data)?
        };

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let tmp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, serialized).await?;
        tokio::fs::rename(&tmp_path, &self.path).await?;

        self.written_version.store(my_version, Ordering::SeqCst);
        Ok(())
    }

    /// Save (or overwrite) a tree's snapshot.
    pub async fn save_tree(&self, root_id: &str, tree: &MessageTree) -> anyhow::Result<()> {
        {
            let mut data = self.data.lock().await;
            data.roots.insert(root_id.to_owned(), tree.clone());
        }
        self.persist().await
    }

    /// Remove a tree's snapshot entirely (used when `/clear` removes the whole tree).
    pub async fn remove_tree(&self, root_id: &str) -> anyhow::Result<()> {
        {
            let mut data = self.data.lock().await;
            data.roots.remove(root_id);
        }
        self.persist().await
    }

    /// Register `node_id` (a user message id or a status message id) as belonging to
    /// `root_id`, so replies to either resolve to the same tree (§9).
    pub async fn register_node(&self, node_id: &str, root_id: &str) -> anyhow::Result<()> {
        {
            let mut data = self.data.lock().await;
            data.node_index.insert(node_id.to_owned(), root_id.to_owned());
        }
        self.persist().await
    }

    /// Drop every index entry for the given node ids (after `remove_branch`/`/clear`).
    pub async fn remove_node_mappings(&self, node_ids: &[String]) -> anyhow::Result<()> {
        {
            let mut data = self.data.lock().await;
            for node_id in node_ids {
                data.node_index.remove(node_id);
            }
        }
        self.persist().await
    }

    /// Append one entry to `chat_id`'s message log.
    pub async fn record_message_id(&self, chat_id: &str, message_id: &str, direction: Direction, kind: MessageKind) -> anyhow::Result<()> {
        {
            let mut data = self.data.lock().await;
            data.msg_log.entry(chat_id.to_owned()).or_default().push(LoggedMessage {
                message_id: message_id.to_owned(),
                direction,
                kind,
                recorded_at: jiff::Zoned::now().to_string(),
            });
        }
        self.persist().await
    }

    /// All logged message ids for a chat, in the order they were recorded.
    pub async fn get_message_ids_for_chat(&self, chat_id: &str) -> Vec<String> {
        let data = self.data.lock().await;
        data.msg_log
            .get(chat_id)
            .map(|entries| entries.iter().map(|e| e.message_id.clone()).collect())
            .unwrap_or_default()
    }

    /// Truncate all persistent state: every tree, every index entry, every message log.
    pub async fn clear_all(&self) -> anyhow::Result<()> {
        {
            let mut data = self.data.lock().await;
            *data = StoreData::default();
        }
        self.persist().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tree::{IncomingMessage, MessageTree, new_root};

    fn sample_tree() -> MessageTree {
        let incoming = IncomingMessage {
            chat_id: 1,
            message_thread_id: None,
            text: "hi".to_owned(),
            reply_to_node_id: None,
        };
        MessageTree::new(new_root("r", incoming))
    }

    #[tokio::test]
    async fn save_then_reload_round_trips_tree_and_index() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.json");

        let store = SessionStore::load(&path).await.unwrap();
        store.save_tree("r", &sample_tree()).await.unwrap();
        store.register_node("r", "r").await.unwrap();
        store
            .record_message_id("1", "r", Direction::In, MessageKind::Content)
            .await
            .unwrap();

        let reloaded = SessionStore::load(&path).await.unwrap();
        assert_eq!(reloaded.get_message_ids_for_chat("1").await, vec!["r".to_owned()]);
    }

    #[tokio::test]
    async fn clear_all_truncates_every_section() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.json");
        let store = SessionStore::load(&path).await.unwrap();
        store.save_tree("r", &sample_tree()).await.unwrap();
        store.clear_all().await.unwrap();
        let data = store.data.lock().await;
        assert!(data.roots.is_empty());
    }

    #[tokio::test]
    async fn concurrent_saves_coalesce_and_leave_no_temp_file_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.json");
        let store = std::sync::Arc::new(SessionStore::load(&path).await.unwrap());

        let mut tasks = Vec::new();
        for i in 0..20 {
            let store = std::sync::Arc::clone(&store);
            tasks.push(tokio::spawn(async move {
                store.save_tree(&format!("r{i}"), &sample_tree()).await.unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let reloaded = SessionStore::load(&path).await.unwrap();
        assert_eq!(reloaded.data.lock().await.roots.len(), 20);
        assert!(!path.with_extension("json.tmp").exists());
    }
}
