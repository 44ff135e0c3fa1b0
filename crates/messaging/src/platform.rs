//! The `ChatPlatform` port: everything the messaging front end needs from a concrete
//! chat platform (Telegram, Discord, …), consumed but not implemented by this crate (§6).

use async_trait::async_trait;

/// A platform-specific message id, opaque to this crate.
pub type MessageId = String;

/// Errors a platform adapter can report back; the Handler renders these via
/// `get_user_facing_error_message` rather than propagating platform-specific types.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct PlatformError(pub String);

/// Send/edit/delete primitives a chat platform adapter exposes to the core (§6 "Platform
/// port"). All mutating calls return a `message_id` so the Handler can track status
/// messages; `fire_and_forget` calls are dispatched without the caller waiting.
#[async_trait]
pub trait ChatPlatform: Send + Sync {
    /// Selects the renderer: `"discord"` chooses Discord markdown + a 1900-char limit,
    /// anything else chooses Telegram MarkdownV2 + a 3900-char limit.
    fn name(&self) -> &str;

    /// Send a new message, optionally as a reply, returning the new message's id.
    async fn queue_send_message(
        &self,
        chat_id: &str,
        text: &str,
        reply_to: Option<&str>,
        message_thread_id: Option<&str>,
        parse_mode: Option<&str>,
        fire_and_forget: bool,
    ) -> Result<MessageId, PlatformError>;

    /// Edit an existing message's text in place.
    async fn queue_edit_message(
        &self,
        chat_id: &str,
        message_id: &str,
        text: &str,
        parse_mode: Option<&str>,
        fire_and_forget: bool,
    ) -> Result<(), PlatformError>;

    /// Delete a single message, best-effort.
    async fn queue_delete_message(&self, chat_id: &str, message_id: &str, fire_and_forget: bool) -> Result<(), PlatformError>;

    /// Delete a batch of messages in one call, for platforms that support it. The default
    /// implementation falls back to one `queue_delete_message` per id.
    async fn queue_delete_messages(&self, chat_id: &str, message_ids: &[String], fire_and_forget: bool) -> Result<(), PlatformError> {
        for message_id in message_ids {
            self.queue_delete_message(chat_id, message_id, fire_and_forget).await?;
        }
        Ok(())
    }
}
