use serde::{Deserialize, Serialize};

/// A known chat partner, keyed by the WhatsApp Web visible title/number.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    pub chat_id: String,
    pub display_name: Option<String>,
    /// When false the chat never receives an automated reply; the outbound
    /// queue may still target it.
    pub auto_enabled: bool,
    pub created_at: String,
    pub updated_at: String,
}

/// Operator-authored briefing for a chat. `objective` is the first-class
/// input to the strategy reasoner.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatProfile {
    pub chat_id: String,
    pub initial_context: String,
    pub objective: String,
    pub instructions: String,
    pub is_ready: bool,
    pub updated_at: String,
}

/// Partial update for `upsert_profile`; `None` fields keep the stored value.
#[derive(Debug, Clone, Default)]
pub struct ProfilePatch {
    pub initial_context: Option<String>,
    pub objective: Option<String>,
    pub instructions: Option<String>,
    pub is_ready: Option<bool>,
}

#[derive(Debug, Clone, Default)]
pub struct ChatCounter {
    pub chat_id: String,
    pub assistant_replies_count: u32,
    pub strategy_version: u32,
    pub last_reasoned_at: Option<String>,
    pub last_reply_at: Option<String>,
}

/// One versioned strategy row. At most one row per chat is active.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Strategy {
    pub id: i64,
    pub chat_id: String,
    pub version: u32,
    pub strategy_text: String,
    pub source_snapshot: Option<String>,
    pub created_at: String,
    pub is_active: bool,
}

/// A configured model slot, referenced by routing rules.
#[derive(Debug, Clone)]
pub struct ModelSlot {
    pub id: i64,
    pub name: String,
    pub provider: String,
    pub config: Option<serde_json::Value>,
    pub active: bool,
}

/// One routing rule. Rules are evaluated in id (insertion) order.
#[derive(Debug, Clone)]
pub struct RouteRule {
    pub id: i64,
    pub name: String,
    pub every_n_messages: u32,
    pub model_name: Option<String>,
    pub enabled: bool,
}

#[derive(Debug, Clone)]
pub struct DailyContext {
    pub id: i64,
    pub effective_date: String,
    pub text: String,
    pub source: Option<String>,
}

#[derive(Debug, Clone)]
pub struct UserNote {
    pub id: i64,
    pub user_id: String,
    pub text: String,
    pub source: Option<String>,
    pub created_at: String,
}
