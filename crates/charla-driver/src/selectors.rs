//! Prioritized selector lists, one per operation. WhatsApp Web reshuffles
//! its DOM regularly; trying a short ordered list keeps minor changes from
//! forcing a rewrite. The driver logs which selector matched.

/// The conversation-list pane; its presence means the client is loaded.
pub const PANE_SIDE: &str = "#pane-side";

/// Chat rows inside the pane.
pub const CHAT_ROWS: &[&str] = &["div[role='listitem']", "div[role='row']"];

/// Elements carrying the row title (the chat id).
pub const ROW_TITLE: &[&str] = &["span[title]", "span[dir='auto']"];

/// Message containers in an open conversation.
pub const MESSAGE_CONTAINERS: &[&str] = &[
    "div[data-testid='msg-container']",
    ".message-in, .message-out",
];

/// Markers that a message container is outgoing (ours).
pub const OUTGOING_MARKERS: &[&str] = &[".message-out", "[data-testid*='outgoing']"];

/// The selectable text span inside a message container.
pub const MESSAGE_TEXT: &str = "span.selectable-text";

/// The composer input, most specific first.
pub const COMPOSER: &[&str] = &[
    "footer div[contenteditable='true'][data-tab][data-lexical-editor='true']",
    "footer div[contenteditable='true'][data-tab]",
    "div[contenteditable='true'][data-tab='10']",
    "div[contenteditable='true'][data-tab]",
    "div[aria-label*='mensaje']",
    "div[aria-label*='message']",
];

/// Activating the global chat search.
pub const SEARCH_BOX: &[&str] = &[
    "div[data-testid='chat-list-search']",
    "div[data-tab='3']",
    "div[title='Buscar o empezar un chat nuevo']",
    "label[data-testid='chat-list-search-label']",
];

/// The search text input once the box is active.
pub const SEARCH_INPUT: &[&str] = &[
    "div[data-testid='chat-list-search'] div[contenteditable='true']",
    "div[data-tab='3'][contenteditable='true']",
    "div[contenteditable='true'][data-tab='3']",
];

/// Search result rows, in click-preference order.
pub const SEARCH_RESULTS: &[&str] = &[
    "div[data-testid='cell-frame-container'] div[role='gridcell']",
    "div[data-testid='cell-frame-container']",
    "div[role='listitem'] div[role='gridcell']",
    "div[role='listitem']",
    "div[data-animate-chat-entry]",
];

/// Evidence that a conversation is actually open.
pub const CHAT_OPEN_INDICATORS: &[&str] = &[
    "div[data-testid='conversation-compose-box-input']",
    "footer div[contenteditable='true'][data-tab='10']",
    "div[data-tab='10'][contenteditable='true']",
    "footer div[role='textbox']",
    "div[contenteditable='true'][role='textbox']",
    "header[data-testid='conversation-header']",
    "div[data-testid='conversation-header']",
    "div[data-testid='conversation-panel-messages']",
    "div[role='application'][data-tab='6']",
    "div[data-testid='conversation-panel-wrapper']",
    "footer[data-testid='compose-box']",
];

/// Closing the search overlay.
pub const SEARCH_CLOSE: &[&str] = &[
    "span[data-icon='close-refreshed']",
    "button[aria-label='Cerrar búsqueda']",
    "span[aria-hidden='true'][data-icon='close-refreshed']",
];

/// Fallback target to dismiss the search overlay.
pub const CHAT_LIST: &str = "div[data-testid='chat-list']";

/// Sidebar icons used by the exit round trip (status tab, then back to chats).
pub const STATUS_TAB: &str = "span[data-icon='status-outline']";
pub const CHATS_TAB: &str = "span[data-icon='chats-outline']";
