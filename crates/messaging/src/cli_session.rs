//! The `CLISession` port: starting tasks against the interactive CLI subprocess and
//! consuming its event stream, consumed but not implemented by this crate (§6).

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::Deserialize;

/// One event yielded by a running CLI task. Known `type`s are listed in §6; any other
/// value is still deserializable (`extra` captures the rest of the payload) so the
/// Handler can tolerate upstream additions it doesn't understand.
#[derive(Debug, Clone, Deserialize)]
pub struct CliEvent {
    /// Discriminant: `session_info`, `thinking_start|delta|chunk|stop`,
    /// `text_start|delta|chunk|stop`, `tool_use_start|delta|stop`, `tool_use`,
    /// `tool_result`, `block_stop`, `error`, `complete`, or an unrecognized value.
    #[serde(rename = "type")]
    pub kind: String,
    /// `session_info` events carry the backend's real session id here.
    pub session_id: Option<String>,
    /// Free-form text payload for `*_delta`/`*_chunk` events.
    pub text: Option<String>,
    /// Tool name, for `tool_use*` events.
    pub name: Option<String>,
    /// Tool input/result payload, for `tool_use`/`tool_result` events.
    pub content: Option<serde_json::Value>,
    /// User-facing message, for `error` events.
    pub message: Option<String>,
    /// Any fields this struct doesn't name explicitly.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A single running (or resumable) CLI session handle.
#[async_trait]
pub trait CliSession: Send + Sync {
    /// Start a task, optionally resuming (or forking from) `session_id`. The returned
    /// stream yields one `CliEvent` per emitted line until the task completes or errors.
    async fn start_task(&self, prompt: &str, session_id: Option<&str>, fork_session: bool) -> BoxStream<'static, CliEvent>;
}

/// Summary statistics for `/stats` (§6 "get_stats").
#[derive(Debug, Clone, Copy, Default)]
pub struct CliStats {
    /// Number of CLI sessions currently checked out.
    pub active_sessions: usize,
}

/// Acquires and releases bounded CLI session slots; the core requests/releases slots but
/// does not itself bound them (§5 "Shared resources").
#[async_trait]
pub trait CliManager: Send + Sync {
    /// Acquire a session: resume `session_id` if given, else start a fresh one. Returns
    /// the session handle, its id (real or temporary), and whether it's newly created.
    async fn get_or_create_session(&self, session_id: Option<&str>) -> Result<(std::sync::Arc<dyn CliSession>, String, bool), CliSessionError>;

    /// Replace a temporary session id with the real one the backend reported.
    async fn register_real_session_id(&self, temp_id: &str, real_id: &str);

    /// Release a session slot back to the pool.
    async fn remove_session(&self, session_id: &str);

    /// Cancel every active session (used by `/stop` global and `/clear` global).
    async fn stop_all(&self) -> usize;

    /// Current utilization, for `/stats`.
    async fn get_stats(&self) -> CliStats;
}

/// Failure acquiring a CLI session (e.g. the session-slot pool is exhausted).
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct CliSessionError(pub String);
