use secrecy::SecretString;
use serde::Deserialize;
use std::path::PathBuf;

/// Messaging front end: which chat platforms are wired up, and where tree/session state
/// persists (§3 SessionStore, §6 Persisted state layout).
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MessagingConfig {
    /// Telegram platform credentials, if enabled.
    pub telegram: Option<PlatformConfig>,
    /// Discord platform credentials, if enabled.
    pub discord: Option<PlatformConfig>,
    /// Path to the durable `sessions.json`-equivalent KV file (§4.11).
    pub session_store_path: PathBuf,
    /// Status-message prefixes the Handler treats as its own echoed-back output (§4.10a).
    pub status_message_prefixes: StatusMessagePrefixes,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            telegram: None,
            discord: None,
            session_store_path: PathBuf::from("sessions.json"),
            status_message_prefixes: StatusMessagePrefixes::default(),
        }
    }
}

/// Bot token and any platform-specific addressing the `ChatPlatform` port adapter needs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PlatformConfig {
    /// Bot token; wrapped so it never appears in `Debug` output.
    pub token: Option<SecretString>,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self { token: None }
    }
}

/// Prefixes that mark a message as one the bot itself sent (so the Handler never re-queues
/// its own status-message edits as new incoming nodes). Resolved from `original_source`
/// (`messaging/handler.py`'s `STATUS_MESSAGE_PREFIXES`) since the distilled spec names the
/// mechanism without enumerating it.
#[derive(Debug, Clone, Deserialize)]
#[serde(transparent)]
pub struct StatusMessagePrefixes(pub Vec<String>);

impl Default for StatusMessagePrefixes {
    fn default() -> Self {
        Self(
            ["🔄", "✅", "❌", "⏳", "🛑"]
                .into_iter()
                .map(str::to_owned)
                .collect(),
        )
    }
}

impl StatusMessagePrefixes {
    /// True if `text` begins with one of the configured status-message prefixes.
    pub fn matches(&self, text: &str) -> bool {
        self.0.iter().any(|prefix| text.starts_with(prefix.as_str()))
    }
}
