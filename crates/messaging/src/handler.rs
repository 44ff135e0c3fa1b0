//! Platform-agnostic entry point: turns one incoming chat message into a tree node, queues
//! it, and drives a single node's CLI interaction to completion (§4.10).

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tree::{CancelOutcome, IncomingMessage, MessageNode, MessageTree, NodeState, QueueCallbacks, TreeQueueManager};

use crate::cli_session::CliManager;
use crate::commands::{ReplyTarget, command_name, handle_clear, handle_stats, handle_stop};
use crate::platform::ChatPlatform;
use crate::render_ctx::RenderCtx;
use crate::session_store::{Direction, MessageKind, SessionStore};
use crate::transcript::{TranscriptBuffer, status_for_event};

/// Messages whose text starts with one of these are the bot's own status-message echoes,
/// never re-queued as new incoming nodes (§4.10a).
const STATUS_MESSAGE_PREFIXES: &[&str] = &["🔄", "✅", "❌", "⏳", "🛑"];

fn is_status_echo(text: &str) -> bool {
    STATUS_MESSAGE_PREFIXES.iter().any(|prefix| text.starts_with(prefix))
}

/// UI-repositioning callbacks handed to `TreeQueueManager`; kept separate from `Handler`
/// itself so the manager doesn't need a cyclic reference back to its owner (§9 "process-wide
/// singletons via explicit handle").
struct QueuePositionCallbacks {
    platform: Arc<dyn ChatPlatform>,
    render_ctx: RenderCtx,
    parse_mode: Option<&'static str>,
}

impl QueueCallbacks for QueuePositionCallbacks {
    fn on_queue_changed(&self, tree: &MessageTree) {
        let mut position = 0usize;
        for node_id in tree.queue_snapshot() {
            let Some(node) = tree.get(&node_id) else { continue };
            if node.state != NodeState::Pending {
                continue;
            }
            position += 1;
            let text = self
                .render_ctx
                .format_status("📋", "Queued", Some(&format!("(position {position}) - waiting...")));
            let chat_id = node.incoming.chat_id.to_string();
            let Some(status_message_id) = node.status_message_id else { continue };
            let platform = Arc::clone(&self.platform);
            let parse_mode = self.parse_mode;
            tokio::spawn(async move {
                let _ = platform.queue_edit_message(&chat_id, &status_message_id.to_string(), &text, parse_mode, true).await;
            });
        }
    }

    fn on_node_started(&self, tree: &MessageTree, node_id: &str) {
        let Some(node) = tree.get(node_id) else { return };
        if node.state == NodeState::Error {
            return;
        }
        let Some(status_message_id) = node.status_message_id else { return };
        let text = self.render_ctx.format_status("🔄", "Processing...", None);
        let chat_id = node.incoming.chat_id.to_string();
        let platform = Arc::clone(&self.platform);
        let parse_mode = self.parse_mode;
        tokio::spawn(async move {
            let _ = platform.queue_edit_message(&chat_id, &status_message_id.to_string(), &text, parse_mode, true).await;
        });
    }
}

struct UiThrottle {
    last_update: Instant,
    last_text: Option<String>,
}

impl UiThrottle {
    fn new() -> Self {
        Self {
            last_update: Instant::now() - Duration::from_secs(2),
            last_text: None,
        }
    }
}

/// Owns the three external ports plus the tree registry, and is the single place the
/// per-platform rendering context lives once chosen at construction (§9).
pub struct Handler {
    pub(crate) platform: Arc<dyn ChatPlatform>,
    pub(crate) cli_manager: Arc<dyn CliManager>,
    pub(crate) session_store: Arc<SessionStore>,
    pub(crate) tree_queue: Mutex<Arc<TreeQueueManager>>,
    pub(crate) render_ctx: RenderCtx,
    pub(crate) parse_mode: Option<&'static str>,
}

impl Handler {
    /// Build a handler wired to the given platform, CLI manager, and persistent store. The
    /// rendering flavor is chosen once from `platform.name()` (§9).
    pub fn new(platform: Arc<dyn ChatPlatform>, cli_manager: Arc<dyn CliManager>, session_store: Arc<SessionStore>) -> Arc<Self> {
        let render_ctx = RenderCtx::for_platform(platform.name());
        let parse_mode = if platform.name().eq_ignore_ascii_case("discord") { None } else { Some("MarkdownV2") };
        let callbacks = Arc::new(QueuePositionCallbacks {
            platform: Arc::clone(&platform),
            render_ctx,
            parse_mode,
        });
        Arc::new(Self {
            platform,
            cli_manager,
            session_store,
            tree_queue: Mutex::new(Arc::new(TreeQueueManager::new(callbacks))),
            render_ctx,
            parse_mode,
        })
    }

    /// Swap in a fresh, empty tree registry (used by `/clear` global).
    pub(crate) async fn reset_tree_queue(&self) {
        let callbacks = Arc::new(QueuePositionCallbacks {
            platform: Arc::clone(&self.platform),
            render_ctx: self.render_ctx,
            parse_mode: self.parse_mode,
        });
        *self.tree_queue.lock().await = Arc::new(TreeQueueManager::new(callbacks));
    }

    pub(crate) async fn tree_queue(&self) -> Arc<TreeQueueManager> {
        Arc::clone(&*self.tree_queue.lock().await)
    }

    pub(crate) async fn send_command_reply(&self, chat_id: &str, message_thread_id: Option<&str>, text: &str) {
        let _ = self
            .platform
            .queue_send_message(chat_id, text, None, message_thread_id, self.parse_mode, false)
            .await;
    }

    pub(crate) async fn delete_message_ids(&self, chat_id: &str, message_ids: &[String]) {
        const BATCH_SIZE: usize = 100;
        for batch in message_ids.chunks(BATCH_SIZE) {
            let _ = self.platform.queue_delete_messages(chat_id, batch, true).await;
        }
    }

    /// Apply a cancellation outcome to the UI: nodes that were only queued never reached
    /// `process_node`, so this renders their final status itself; nodes that were running
    /// get their `cancel_reason` recorded so their own processor task renders its own
    /// terminal status once it observes the cancellation (§4.10, §5 "Cancellation").
    pub(crate) async fn mark_cancelled(&self, outcome: &CancelOutcome, reason: &str) {
        let tree_queue = self.tree_queue().await;
        for node_id in &outcome.cancelled_running {
            let _ = tree_queue.set_context(node_id, "cancel_reason", serde_json::json!(reason)).await;
        }

        for node_id in &outcome.cancelled_pending {
            let _ = tree_queue.update_state(node_id, NodeState::Error, None, Some("Cancelled by user".to_owned())).await;
            let node_info = tree_queue.with_tree(node_id, |tree| tree.get(node_id).map(|n| (n.incoming.chat_id, n.status_message_id))).await.flatten();
            if let Some((chat_id, Some(status_message_id))) = node_info {
                let text = self.render_ctx.format_status("⏹", "Stopped.", None);
                let _ = self
                    .platform
                    .queue_edit_message(&chat_id.to_string(), &status_message_id.to_string(), &text, self.parse_mode, true)
                    .await;
            }
        }

        let mut touched_roots = Vec::new();
        for node_id in outcome.all() {
            if let Some(root_id) = tree_queue.root_of(node_id).await {
                if !touched_roots.contains(&root_id) {
                    touched_roots.push(root_id);
                }
            }
        }
        for root_id in touched_roots {
            if let Some(snapshot) = tree_queue.with_tree(&root_id, |tree| tree.clone()).await {
                let _ = self.session_store.save_tree(&root_id, &snapshot).await;
            }
        }
    }

    /// Handle one incoming platform message: command dispatch, echo filtering, tree
    /// attach-or-create, status message send/edit, persistence, enqueue (§4.10 steps 1-7).
    pub async fn handle_message(self: &Arc<Self>, node_id: String, incoming: IncomingMessage, pre_sent_status_message_id: Option<i64>) {
        let chat_id = incoming.chat_id.to_string();
        let message_thread_id = incoming.message_thread_id.map(|id| id.to_string());

        let is_command = command_name(&incoming.text).is_some();
        let _ = self
            .session_store
            .record_message_id(&chat_id, &node_id, Direction::In, if is_command { MessageKind::Command } else { MessageKind::Content })
            .await;

        if let Some(command) = command_name(&incoming.text) {
            let reply = match incoming.reply_to_node_id.as_deref() {
                Some(target) => match self.tree_queue().await.resolve_parent_node_id(target).await {
                    Some(resolved) => ReplyTarget::Resolved(resolved),
                    None => ReplyTarget::Unresolved,
                },
                None => ReplyTarget::None,
            };
            match command {
                "/stop" => handle_stop(self, &chat_id, message_thread_id.as_deref(), reply).await,
                "/stats" => handle_stats(self, &chat_id, message_thread_id.as_deref()).await,
                "/clear" => handle_clear(self, &chat_id, message_thread_id.as_deref(), &node_id, reply).await,
                _ => {}
            }
            return;
        }

        if is_status_echo(&incoming.text) {
            return;
        }

        let tree_queue = self.tree_queue().await;
        let parent_node_id = match incoming.reply_to_node_id.as_deref() {
            Some(target) => tree_queue.resolve_parent_node_id(target).await,
            None => None,
        };

        let status_text = self.initial_status(&tree_queue, parent_node_id.as_deref()).await;
        let status_message_id = match pre_sent_status_message_id {
            Some(id) => {
                let _ = self.platform.queue_edit_message(&chat_id, &id.to_string(), &status_text, self.parse_mode, false).await;
                id
            }
            None => {
                let sent = self
                    .platform
                    .queue_send_message(&chat_id, &status_text, Some(&node_id), message_thread_id.as_deref(), self.parse_mode, false)
                    .await;
                match sent.ok().and_then(|id| id.parse::<i64>().ok()) {
                    Some(id) => id,
                    None => return,
                }
            }
        };
        let _ = self
            .session_store
            .record_message_id(&chat_id, &status_message_id.to_string(), Direction::Out, MessageKind::Status)
            .await;

        let mut node = MessageNode::new(node_id.clone(), node_id.clone(), parent_node_id.clone(), incoming);
        node.status_message_id = Some(status_message_id);

        let root_id = match &parent_node_id {
            Some(parent_id) => match tree_queue.add_child(parent_id, node).await {
                Ok(()) => tree_queue.root_of(parent_id).await,
                Err(_) => None,
            },
            None => {
                let root_id = node.root_id.clone();
                tree_queue.insert_root(node).await;
                Some(root_id)
            }
        };

        let Some(root_id) = root_id else { return };

        tree_queue.index_node(status_message_id.to_string(), root_id.clone()).await;
        tree_queue.index_status_message(status_message_id.to_string(), node_id.clone()).await;
        let _ = self.session_store.register_node(&node_id, &root_id).await;
        let _ = self.session_store.register_node(&status_message_id.to_string(), &root_id).await;

        if let Some(snapshot) = tree_queue.with_tree(&root_id, |tree| tree.clone()).await {
            let _ = self.session_store.save_tree(&root_id, &snapshot).await;
        }

        let handler = Arc::clone(self);
        tree_queue
            .enqueue(node_id.clone(), move |node_id, cancellation| {
                let handler = Arc::clone(&handler);
                async move { handler.process_node(node_id, cancellation).await }
            })
            .await;

        let queue_position = tree_queue.with_tree(&node_id, |tree| tree.queue_snapshot().iter().position(|id| id == &node_id)).await.flatten();
        if let Some(position) = queue_position {
            let text = self
                .render_ctx
                .format_status("📋", "Queued", Some(&format!("(position {}) - waiting...", position + 1)));
            let _ = self
                .platform
                .queue_edit_message(&chat_id, &status_message_id.to_string(), &text, self.parse_mode, true)
                .await;
        }
    }

    async fn initial_status(&self, tree_queue: &TreeQueueManager, parent_node_id: Option<&str>) -> String {
        let Some(parent_node_id) = parent_node_id else {
            return self.render_ctx.format_status("⏳", "Launching new Claude CLI instance...", None);
        };
        let Some(root_id) = tree_queue.root_of(parent_node_id).await else {
            return self.render_ctx.format_status("🔄", "Continuing conversation...", None);
        };
        let busy_and_queue_len = tree_queue.with_tree(&root_id, |tree| (!tree.is_idle(), tree.queue_snapshot().len())).await;
        match busy_and_queue_len {
            Some((true, queue_len)) => {
                let position = queue_len + 1;
                self.render_ctx.format_status("📋", "Queued", Some(&format!("(position {position}) - waiting...")))
            }
            _ => self.render_ctx.format_status("🔄", "Continuing conversation...", None),
        }
    }

    /// Core task processor: acquires a CLI session, drains its event stream into the
    /// transcript, throttles UI edits, and handles completion/error/cancellation (§4.10).
    pub async fn process_node(self: Arc<Self>, node_id: String, cancellation: CancellationToken) {
        let tree_queue = self.tree_queue().await;
        let Some(node) = tree_queue.with_tree(&node_id, |tree| tree.get(&node_id).cloned()).await.flatten() else {
            return;
        };
        let chat_id = node.incoming.chat_id.to_string();
        let Some(status_message_id) = node.status_message_id else { return };
        let status_message_id = status_message_id.to_string();

        let parent_session_id = if node.parent_id.is_some() {
            tree_queue.with_tree(&node_id, |tree| tree.get_parent_session_id(&node_id)).await.flatten()
        } else {
            None
        };

        let mut transcript = TranscriptBuffer::new();
        let mut throttle = UiThrottle::new();
        let mut had_transcript_events = false;
        let mut captured_session_id: Option<String> = None;
        let mut temp_session_id: Option<String> = None;

        let (cli_session, session_or_temp_id, is_new) = match self.cli_manager.get_or_create_session(None).await {
            Ok(acquired) => acquired,
            Err(err) => {
                transcript.apply_text_line(&format!("❌ {err}"));
                self.update_ui(&chat_id, &status_message_id, &transcript, Some("⏳ Session limit reached"), true, &mut throttle).await;
                let _ = tree_queue.update_state(&node_id, NodeState::Error, None, Some(err.0)).await;
                return;
            }
        };
        if is_new {
            temp_session_id = Some(session_or_temp_id);
        } else {
            captured_session_id = Some(session_or_temp_id);
        }

        let mut events = cli_session
            .start_task(&node.incoming.text, parent_session_id.as_deref(), parent_session_id.is_some())
            .await;

        let mut was_cancelled = false;
        loop {
            let next_event = tokio::select! {
                _ = cancellation.cancelled() => {
                    was_cancelled = true;
                    None
                }
                event = events.next() => event,
            };
            if was_cancelled {
                break;
            }
            let Some(event) = next_event else { break };

            if event.kind == "session_info" {
                if let Some(real_session_id) = &event.session_id {
                    if let Some(temp_id) = temp_session_id.take() {
                        self.cli_manager.register_real_session_id(&temp_id, real_session_id).await;
                    }
                    captured_session_id = Some(real_session_id.clone());
                    let _ = tree_queue.update_state(&node_id, NodeState::InProgress, Some(real_session_id.clone()), None).await;
                    if let Some(snapshot) = tree_queue.with_tree(&node_id, |tree| tree.clone()).await {
                        let _ = self.session_store.save_tree(&tree_queue.root_of(&node_id).await.unwrap_or_default(), &snapshot).await;
                    }
                }
                continue;
            }

            if TranscriptBuffer::is_transcript_event(&event.kind) {
                transcript.apply(&event);
                had_transcript_events = true;
            }

            if let Some(status) = status_for_event(&self.render_ctx, &event) {
                self.update_ui(&chat_id, &status_message_id, &transcript, Some(&status), false, &mut throttle).await;
            } else if event.kind == "block_stop" {
                self.update_ui(&chat_id, &status_message_id, &transcript, None, true, &mut throttle).await;
            } else if event.kind == "complete" {
                if !had_transcript_events {
                    transcript.apply_text_line("Done.");
                }
                let status = self.render_ctx.format_status("✅", "Complete", None);
                self.update_ui(&chat_id, &status_message_id, &transcript, Some(&status), true, &mut throttle).await;
                if let Some(session_id) = &captured_session_id {
                    let _ = tree_queue.update_state(&node_id, NodeState::Completed, Some(session_id.clone()), None).await;
                    if let Some(snapshot) = tree_queue.with_tree(&node_id, |tree| tree.clone()).await {
                        let root_id = tree_queue.root_of(&node_id).await.unwrap_or_default();
                        let _ = self.session_store.save_tree(&root_id, &snapshot).await;
                    }
                }
            } else if event.kind == "error" {
                let error_message = event.message.clone().unwrap_or_else(|| "Unknown error".to_owned());
                let status = self.render_ctx.format_status("❌", "Error", None);
                self.update_ui(&chat_id, &status_message_id, &transcript, Some(&status), true, &mut throttle).await;
                self.propagate_error(&tree_queue, &node_id, &error_message).await;
            }
        }

        if was_cancelled {
            let cancel_reason = tree_queue.with_tree(&node_id, |tree| tree.get(&node_id).and_then(|n| n.context.get("cancel_reason").and_then(|v| v.as_str().map(str::to_owned)))).await.flatten();
            if cancel_reason.as_deref() == Some("stop") {
                let status = self.render_ctx.format_status("⏹", "Stopped.", None);
                self.update_ui(&chat_id, &status_message_id, &transcript, Some(&status), true, &mut throttle).await;
            } else {
                transcript.apply_text_line("Task was cancelled");
                let status = self.render_ctx.format_status("❌", "Cancelled", None);
                self.update_ui(&chat_id, &status_message_id, &transcript, Some(&status), true, &mut throttle).await;
            }
            let _ = tree_queue.update_state(&node_id, NodeState::Error, None, Some("Cancelled by user".to_owned())).await;
            if let Some(snapshot) = tree_queue.with_tree(&node_id, |tree| tree.clone()).await {
                let root_id = tree_queue.root_of(&node_id).await.unwrap_or_default();
                let _ = self.session_store.save_tree(&root_id, &snapshot).await;
            }
        }

        if let Some(session_id) = captured_session_id.or(temp_session_id) {
            self.cli_manager.remove_session(&session_id).await;
        }
    }

    async fn propagate_error(&self, tree_queue: &TreeQueueManager, node_id: &str, error_message: &str) {
        let Ok(affected) = tree_queue.mark_node_error(node_id, error_message, true).await else {
            return;
        };
        for child_id in affected.iter().skip(1) {
            let Some((chat_id, status_message_id)) = tree_queue
                .with_tree(child_id, |tree| tree.get(child_id).map(|n| (n.incoming.chat_id, n.status_message_id)))
                .await
                .flatten()
            else {
                continue;
            };
            let Some(status_message_id) = status_message_id else { continue };
            let text = self.render_ctx.format_status("❌", "Cancelled:", Some("Parent task failed"));
            let platform = Arc::clone(&self.platform);
            let parse_mode = self.parse_mode;
            tokio::spawn(async move {
                let _ = platform.queue_edit_message(&chat_id.to_string(), &status_message_id.to_string(), &text, parse_mode, true).await;
            });
        }
        if let Some(root_id) = tree_queue.root_of(node_id).await {
            if let Some(snapshot) = tree_queue.with_tree(&root_id, |tree| tree.clone()).await {
                let _ = self.session_store.save_tree(&root_id, &snapshot).await;
            }
        }
    }

    async fn update_ui(
        &self,
        chat_id: &str,
        status_message_id: &str,
        transcript: &TranscriptBuffer,
        status: Option<&str>,
        force: bool,
        throttle: &mut UiThrottle,
    ) {
        if !force && throttle.last_update.elapsed() < Duration::from_secs(1) {
            return;
        }
        throttle.last_update = Instant::now();
        let display = transcript.render(&self.render_ctx, self.render_ctx.limit_chars, status);
        if display.is_empty() || Some(&display) == throttle.last_text.as_ref() {
            return;
        }
        throttle.last_text = Some(display.clone());
        let _ = self.platform.queue_edit_message(chat_id, status_message_id, &display, self.parse_mode, false).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli_session::{CliSession, CliSessionError, CliStats};
    use crate::platform::PlatformError;
    use async_trait::async_trait;
    use futures::stream;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::time::Duration as StdDuration;
    use tokio::sync::Mutex as TokioMutex;

    struct RecordingPlatform {
        next_id: AtomicI64,
        edits: TokioMutex<Vec<String>>,
    }

    impl RecordingPlatform {
        fn new() -> Self {
            Self {
                next_id: AtomicI64::new(1000),
                edits: TokioMutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ChatPlatform for RecordingPlatform {
        fn name(&self) -> &str {
            "telegram"
        }

        async fn queue_send_message(
            &self,
            _chat_id: &str,
            _text: &str,
            _reply_to: Option<&str>,
            _message_thread_id: Option<&str>,
            _parse_mode: Option<&str>,
            _fire_and_forget: bool,
        ) -> Result<String, PlatformError> {
            Ok(self.next_id.fetch_add(1, Ordering::SeqCst).to_string())
        }

        async fn queue_edit_message(&self, _chat_id: &str, _message_id: &str, text: &str, _parse_mode: Option<&str>, _fire_and_forget: bool) -> Result<(), PlatformError> {
            self.edits.lock().await.push(text.to_owned());
            Ok(())
        }

        async fn queue_delete_message(&self, _chat_id: &str, _message_id: &str, _fire_and_forget: bool) -> Result<(), PlatformError> {
            Ok(())
        }
    }

    struct StubCliSession;

    #[async_trait]
    impl CliSession for StubCliSession {
        async fn start_task(&self, _prompt: &str, _session_id: Option<&str>, _fork_session: bool) -> futures::stream::BoxStream<'static, crate::cli_session::CliEvent> {
            let events = vec![
                crate::cli_session::CliEvent {
                    kind: "text_start".to_owned(),
                    session_id: None,
                    text: None,
                    name: None,
                    content: None,
                    message: None,
                    extra: serde_json::Map::new(),
                },
                crate::cli_session::CliEvent {
                    kind: "text_delta".to_owned(),
                    session_id: None,
                    text: Some("hi there".to_owned()),
                    name: None,
                    content: None,
                    message: None,
                    extra: serde_json::Map::new(),
                },
                crate::cli_session::CliEvent {
                    kind: "complete".to_owned(),
                    session_id: None,
                    text: None,
                    name: None,
                    content: None,
                    message: None,
                    extra: serde_json::Map::new(),
                },
            ];
            stream::iter(events).boxed()
        }
    }

    struct StubCliManager;

    #[async_trait]
    impl CliManager for StubCliManager {
        async fn get_or_create_session(&self, _session_id: Option<&str>) -> Result<(Arc<dyn CliSession>, String, bool), CliSessionError> {
            Ok((Arc::new(StubCliSession), "temp-1".to_owned(), true))
        }

        async fn register_real_session_id(&self, _temp_id: &str, _real_id: &str) {}
        async fn remove_session(&self, _session_id: &str) {}
        async fn stop_all(&self) -> usize {
            0
        }
        async fn get_stats(&self) -> CliStats {
            CliStats::default()
        }
    }

    fn incoming(text: &str) -> IncomingMessage {
        IncomingMessage {
            chat_id: 42,
            message_thread_id: None,
            text: text.to_owned(),
            reply_to_node_id: None,
        }
    }

    #[tokio::test]
    async fn handle_message_creates_root_tree_and_runs_to_completion() {
        let platform = Arc::new(RecordingPlatform::new());
        let cli_manager = Arc::new(StubCliManager);
        let dir = tempfile::tempdir().unwrap();
        let session_store = Arc::new(SessionStore::load(dir.path().join("sessions.json")).await.unwrap());

        let handler = Handler::new(platform, cli_manager, session_store);
        handler.handle_message("m1".to_owned(), incoming("hello"), None).await;

        tokio::time::sleep(StdDuration::from_millis(50)).await;

        let tree_queue = handler.tree_queue().await;
        let state = tree_queue.with_tree("m1", |tree| tree.get("m1").map(|n| n.state)).await.flatten();
        assert_eq!(state, Some(NodeState::Completed));
    }

    #[test]
    fn status_echoes_are_recognized_by_prefix() {
        assert!(is_status_echo("🔄 Processing..."));
        assert!(!is_status_echo("hello there"));
    }
}
