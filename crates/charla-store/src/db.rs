use rusqlite::{Connection, Result};

/// Initialise all tables. Safe to call on every startup (idempotent).
pub fn init_db(conn: &Connection) -> Result<()> {
    create_conversation_tables(conn)?;
    create_chat_tables(conn)?;
    create_routing_tables(conn)?;
    create_context_tables(conn)?;
    Ok(())
}

/// Append-only snapshot log. `context` holds the encrypted JSON turn array.
fn create_conversation_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS conversations (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            chat_id     TEXT NOT NULL,
            created_at  TEXT NOT NULL,
            context     TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_conversations_chat
            ON conversations(chat_id, created_at DESC);",
    )
}

fn create_chat_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS contacts (
            chat_id       TEXT PRIMARY KEY,
            display_name  TEXT,
            auto_enabled  INTEGER NOT NULL DEFAULT 1,
            created_at    TEXT NOT NULL,
            updated_at    TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS chat_profiles (
            chat_id          TEXT PRIMARY KEY,
            initial_context  TEXT NOT NULL DEFAULT '',
            objective        TEXT NOT NULL DEFAULT '',
            instructions     TEXT NOT NULL DEFAULT '',
            is_ready         INTEGER NOT NULL DEFAULT 0,
            updated_at       TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS chat_counters (
            chat_id                  TEXT PRIMARY KEY,
            assistant_replies_count  INTEGER NOT NULL DEFAULT 0,
            strategy_version         INTEGER NOT NULL DEFAULT 0,
            last_reasoned_at         TEXT,
            last_reply_at            TEXT
        );
        CREATE TABLE IF NOT EXISTS chat_strategies (
            id               INTEGER PRIMARY KEY AUTOINCREMENT,
            chat_id          TEXT NOT NULL,
            version          INTEGER NOT NULL,
            strategy_text    TEXT NOT NULL,
            source_snapshot  TEXT,
            created_at       TEXT NOT NULL,
            is_active        INTEGER NOT NULL DEFAULT 1,
            UNIQUE(chat_id, version)
        );
        CREATE INDEX IF NOT EXISTS idx_strategies_chat
            ON chat_strategies(chat_id, is_active);",
    )
}

fn create_routing_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS models (
            id        INTEGER PRIMARY KEY AUTOINCREMENT,
            name      TEXT UNIQUE NOT NULL,
            provider  TEXT NOT NULL,
            config    TEXT,
            active    INTEGER NOT NULL DEFAULT 1
        );
        CREATE TABLE IF NOT EXISTS rules (
            id                INTEGER PRIMARY KEY AUTOINCREMENT,
            name              TEXT NOT NULL,
            every_n_messages  INTEGER NOT NULL DEFAULT 0,
            model_id          INTEGER REFERENCES models(id),
            enabled           INTEGER NOT NULL DEFAULT 1
        );",
    )
}

fn create_context_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS daily_contexts (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            effective_date  TEXT NOT NULL,
            text            TEXT NOT NULL,
            source          TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_daily_date
            ON daily_contexts(effective_date);
        CREATE TABLE IF NOT EXISTS user_contexts (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id     TEXT NOT NULL,
            text        TEXT NOT NULL,
            source      TEXT,
            created_at  TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_user_contexts_user
            ON user_contexts(user_id, created_at DESC);",
    )
}
