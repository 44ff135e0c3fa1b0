//! `/stop`, `/stats`, `/clear` dispatch (§6 "Commands").

use crate::handler::Handler;
use crate::session_store::{Direction, MessageKind};

/// True if `text` is one of the recognized slash commands (ignoring any `@botname`
/// suffix platforms append).
pub fn command_name(text: &str) -> Option<&str> {
    let first_word = text.split_whitespace().next()?;
    let base = first_word.split('@').next().unwrap_or(first_word);
    matches!(base, "/stop" | "/stats" | "/clear").then_some(base)
}

/// What `/stop` and `/clear` should scope to, distinguishing "not a reply at all" (global
/// scope) from "a reply whose target isn't a tracked node" (a no-op, not a global fallback).
pub enum ReplyTarget {
    /// The command wasn't a reply to anything; apply it chat-wide.
    None,
    /// The command replied to a message, but it isn't a tracked node (expired, foreign, etc.).
    Unresolved,
    /// The command replied to a message that resolved to this tracked node id.
    Resolved(String),
}

/// `/stop`: reply-scoped cancels one node, standalone cancels everything, an unresolved
/// reply is a no-op (§6).
pub async fn handle_stop(handler: &Handler, chat_id: &str, message_thread_id: Option<&str>, reply: ReplyTarget) {
    let tree_queue = handler.tree_queue().await;
    let count = match reply {
        ReplyTarget::Resolved(node_id) => {
            let outcome = tree_queue.cancel_node(&node_id).await;
            let count = outcome.all().count();
            handler.mark_cancelled(&outcome, "stop").await;
            count
        }
        ReplyTarget::Unresolved => {
            let text = handler
                .render_ctx
                .format_status("⏹", "Stopped.", Some("Nothing to stop for that message."));
            handler.send_command_reply(chat_id, message_thread_id, &text).await;
            return;
        }
        ReplyTarget::None => {
            let outcome = tree_queue.cancel_all().await;
            let count = outcome.all().count();
            handler.mark_cancelled(&outcome, "stop").await;
            count
        }
    };

    let noun = if count == 1 { "request" } else { "requests" };
    let text = handler.render_ctx.format_status("⏹", "Stopped.", Some(&format!("Cancelled {count} {noun}.")));
    handler.send_command_reply(chat_id, message_thread_id, &text).await;
}

/// `/stats`: active CLI sessions + live tree count (§6).
pub async fn handle_stats(handler: &Handler, chat_id: &str, message_thread_id: Option<&str>) {
    let cli_stats = handler.cli_manager.get_stats().await;
    let (tree_count, _total_nodes) = handler.tree_queue().await.stats().await;
    let text = format!(
        "📊 {}\n{}\n{}",
        handler.render_ctx.bold("Stats"),
        handler.render_ctx.escape_text(&format!("• Active CLI: {}", cli_stats.active_sessions)),
        handler.render_ctx.escape_text(&format!("• Message Trees: {tree_count}")),
    );
    handler.send_command_reply(chat_id, message_thread_id, &text).await;
}

/// `/clear`: reply-scoped deletes one branch, standalone wipes the whole chat, an unresolved
/// reply is a no-op rather than falling through to the chat-wide wipe (§6).
pub async fn handle_clear(handler: &Handler, chat_id: &str, message_thread_id: Option<&str>, command_message_id: &str, reply: ReplyTarget) {
    match reply {
        ReplyTarget::Resolved(node_id) => clear_branch(handler, chat_id, message_thread_id, command_message_id, &node_id).await,
        ReplyTarget::Unresolved => {
            let text = handler
                .render_ctx
                .format_status("🗑", "Cleared.", Some("Nothing to clear for that message."));
            handler.send_command_reply(chat_id, message_thread_id, &text).await;
        }
        ReplyTarget::None => clear_all(handler, chat_id, message_thread_id, command_message_id).await,
    }
}

async fn clear_branch(handler: &Handler, chat_id: &str, message_thread_id: Option<&str>, command_message_id: &str, branch_root_id: &str) {
    let tree_queue = handler.tree_queue().await;
    let Some(root_id) = tree_queue.root_of(branch_root_id).await else {
        let text = handler
            .render_ctx
            .format_status("🗑", "Cleared.", Some("Nothing to clear for that message."));
        handler.send_command_reply(chat_id, message_thread_id, &text).await;
        return;
    };

    let descendant_ids = tree_queue
        .with_tree(branch_root_id, |tree| tree.get_descendants(branch_root_id))
        .await
        .unwrap_or_default();

    let outcome = tree_queue.cancel_branch(branch_root_id).await;
    handler.mark_cancelled(&outcome, "clear").await;

    let mut message_ids: Vec<String> = Vec::new();
    for node_id in descendant_ids.iter().chain(std::iter::once(&branch_root_id.to_owned())) {
        if let Some((user_msg, status_msg)) = tree_queue
            .with_tree(node_id, |tree| tree.get(node_id).map(|n| (n.node_id.clone(), n.status_message_id)))
            .await
            .flatten()
        {
            message_ids.push(user_msg);
            if let Some(status_msg) = status_msg {
                message_ids.push(status_msg.to_string());
            }
        }
    }
    message_ids.push(command_message_id.to_owned());
    message_ids.sort();
    message_ids.dedup();

    handler.delete_message_ids(chat_id, &message_ids).await;

    if let Some(removed) = tree_queue.remove_branch(branch_root_id).await {
        let _ = handler.session_store.remove_node_mappings(&removed.removed_nodes).await;
        if removed.removed_entire_tree {
            let _ = handler.session_store.remove_tree(&removed.root_id).await;
        } else if let Some(updated) = tree_queue.with_tree(&root_id, |tree| tree.clone()).await {
            let _ = handler.session_store.save_tree(&removed.root_id, &updated).await;
        }
    }
}

async fn clear_all(handler: &Handler, chat_id: &str, message_thread_id: Option<&str>, command_message_id: &str) {
    handler.cli_manager.stop_all().await;
    let outcome = handler.tree_queue().await.cancel_all().await;
    handler.mark_cancelled(&outcome, "clear").await;

    let mut message_ids = handler.session_store.get_message_ids_for_chat(chat_id).await;
    message_ids.push(command_message_id.to_owned());
    message_ids.sort();
    message_ids.dedup();

    handler.delete_message_ids(chat_id, &message_ids).await;

    let _ = handler.session_store.clear_all().await;
    handler.reset_tree_queue().await;

    let text = handler.render_ctx.format_status("🗑", "Cleared.", None);
    handler.send_command_reply(chat_id, message_thread_id, &text).await;
    let _ = handler
        .session_store
        .record_message_id(chat_id, command_message_id, Direction::In, MessageKind::Command)
        .await;
}
