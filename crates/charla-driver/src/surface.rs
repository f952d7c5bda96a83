use std::time::Duration;

use crate::error::Result;

/// One chat-list row with a numeric unread badge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboxEntry {
    /// The row's visible title/number — the system-wide chat key.
    pub chat_id: String,
    pub unread: u32,
}

/// The last message container of the open conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    /// Direction comes from DOM markers, never from text heuristics.
    pub from_us: bool,
    pub text: Option<String>,
}

/// The browser-automation seam. `WaDriver` implements it over the live
/// WhatsApp Web tab; the runtime tests drive the loop with a scripted fake.
///
/// All methods block the calling thread — the browser session is owned by
/// the orchestrator thread and a tick is serial by design.
pub trait ChatSurface: Send {
    /// Block until the conversation-list pane is visible.
    fn wait_for_ready(&self, timeout: Duration) -> Result<()>;

    /// Chat rows with a positive numeric badge. Non-numeric badges (muted
    /// markers, "•") are ignored.
    fn scan_inbox(&self) -> Result<Vec<InboxEntry>>;

    /// Click the row with this title and wait for the composer.
    fn open_chat(&self, chat_id: &str) -> Result<()>;

    /// Inspect the last message of the open conversation.
    fn read_last_incoming(&self) -> Result<Option<IncomingMessage>>;

    /// Type into the composer character by character, then press Enter.
    fn type_and_send(&self, text: &str, per_char_delay: Duration) -> Result<()>;

    /// Leave the conversation and make sure the composer is unfocused.
    fn exit_chat(&self) -> Result<()>;

    /// Search for a chat by id and open the top result. Used by the
    /// outbound worker; cleans the search box up on every return path.
    fn find_and_open_chat(&self, chat_id: &str) -> Result<()>;
}
