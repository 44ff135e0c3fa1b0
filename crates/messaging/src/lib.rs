//! Platform-agnostic messaging front end: turns incoming chat messages into tree-queued
//! CLI interactions and renders their live transcript back to the originating platform.

pub mod cli_session;
pub mod commands;
pub mod handler;
pub mod platform;
pub mod render_ctx;
pub mod session_store;
pub mod transcript;

pub use cli_session::{CliEvent, CliManager, CliSession, CliSessionError, CliStats};
pub use handler::Handler;
pub use platform::{ChatPlatform, MessageId, PlatformError};
pub use render_ctx::RenderCtx;
pub use session_store::{Direction, LoggedMessage, MessageKind, SessionStore};
pub use transcript::TranscriptBuffer;
