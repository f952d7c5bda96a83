use std::sync::Mutex;

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension};
use tracing::{debug, warn};

use charla_core::config::{ModelSeed, RuleSeed};
use charla_core::types::Turn;

use crate::crypto::ContextCipher;
use crate::db::init_db;
use crate::error::{Result, StoreError};
use crate::types::*;

/// Owns every persisted row: conversations, contacts, profiles, counters,
/// strategies, model routing and the free-form context blobs.
///
/// Thread-safe: wraps the SQLite connection in a Mutex. Every operation is
/// self-contained — no transaction lives across calls, so the orchestrator can
/// interleave ticks freely.
pub struct Store {
    db: Mutex<Connection>,
    cipher: ContextCipher,
}

impl Store {
    /// Open (and bootstrap) the database at `path`.
    pub fn open(path: &str, cipher: ContextCipher) -> Result<Self> {
        if let Some(parent) = std::path::Path::new(path).parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let conn = Connection::open(path)?;
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
            cipher,
        })
    }

    /// In-memory store, used by tests.
    pub fn in_memory(cipher: ContextCipher) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
            cipher,
        })
    }

    pub fn cipher(&self) -> &ContextCipher {
        &self.cipher
    }

    // --- conversation snapshots --------------------------------------------

    /// Insert a new encrypted snapshot of the rolling turn log. Append-only.
    pub fn append_context(&self, chat_id: &str, turns: &[Turn]) -> Result<()> {
        let json = serde_json::to_string(turns)?;
        let token = self.cipher.encrypt(&json);
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO conversations (chat_id, created_at, context) VALUES (?1, ?2, ?3)",
            rusqlite::params![chat_id, Utc::now().to_rfc3339(), token],
        )?;
        Ok(())
    }

    /// Decode the most recent snapshot for a chat.
    ///
    /// Missing history and decryption failures both come back as an empty
    /// sequence — an unreadable snapshot must never wedge the reply loop.
    pub fn load_last_context(&self, chat_id: &str) -> Result<Vec<Turn>> {
        let db = self.db.lock().unwrap();
        let stored: Option<String> = db
            .query_row(
                "SELECT context FROM conversations
                 WHERE chat_id = ?1
                 ORDER BY id DESC
                 LIMIT 1",
                rusqlite::params![chat_id],
                |row| row.get(0),
            )
            .optional()?;

        let Some(stored) = stored else {
            return Ok(Vec::new());
        };

        let json = match self.cipher.decrypt(&stored) {
            Ok(j) => j,
            Err(e) => {
                warn!(chat = %chat_id, error = %e, "snapshot decryption failed, treating history as empty");
                return Ok(Vec::new());
            }
        };
        match serde_json::from_str(&json) {
            Ok(turns) => Ok(turns),
            Err(e) => {
                warn!(chat = %chat_id, error = %e, "snapshot JSON unreadable, treating history as empty");
                Ok(Vec::new())
            }
        }
    }

    /// Append the new snapshot, stamp `last_reply_at` and bump the assistant
    /// reply counter in a single transaction. Returns the new counter value.
    ///
    /// This is the commit point of a reply: once this returns, the cooldown
    /// clock is running even if the browser send afterwards fails.
    pub fn commit_assistant_turn(&self, chat_id: &str, turns: &[Turn]) -> Result<u32> {
        let json = serde_json::to_string(turns)?;
        let token = self.cipher.encrypt(&json);
        let now = Utc::now().to_rfc3339();

        let mut db = self.db.lock().unwrap();
        let tx = db.transaction()?;
        tx.execute(
            "INSERT INTO conversations (chat_id, created_at, context) VALUES (?1, ?2, ?3)",
            rusqlite::params![chat_id, now, token],
        )?;
        tx.execute(
            "INSERT INTO chat_counters (chat_id) VALUES (?1)
             ON CONFLICT(chat_id) DO NOTHING",
            rusqlite::params![chat_id],
        )?;
        tx.execute(
            "UPDATE chat_counters
             SET assistant_replies_count = assistant_replies_count + 1,
                 last_reply_at = ?2
             WHERE chat_id = ?1",
            rusqlite::params![chat_id, now],
        )?;
        let count: u32 = tx.query_row(
            "SELECT assistant_replies_count FROM chat_counters WHERE chat_id = ?1",
            rusqlite::params![chat_id],
            |row| row.get(0),
        )?;
        tx.commit()?;
        Ok(count)
    }

    // --- contacts -----------------------------------------------------------

    pub fn add_or_update_contact(
        &self,
        chat_id: &str,
        name: Option<&str>,
        auto_enabled: Option<bool>,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO contacts (chat_id, display_name, auto_enabled, created_at, updated_at)
             VALUES (?1, ?2, COALESCE(?3, 1), ?4, ?4)
             ON CONFLICT(chat_id) DO UPDATE SET
                 display_name = COALESCE(?2, display_name),
                 auto_enabled = COALESCE(?3, auto_enabled),
                 updated_at   = ?4",
            rusqlite::params![chat_id, name, auto_enabled, now],
        )?;
        Ok(())
    }

    pub fn get_contact(&self, chat_id: &str) -> Result<Option<Contact>> {
        let db = self.db.lock().unwrap();
        let contact = db
            .query_row(
                "SELECT chat_id, display_name, auto_enabled, created_at, updated_at
                 FROM contacts WHERE chat_id = ?1",
                rusqlite::params![chat_id],
                |row| {
                    Ok(Contact {
                        chat_id: row.get(0)?,
                        display_name: row.get(1)?,
                        auto_enabled: row.get(2)?,
                        created_at: row.get(3)?,
                        updated_at: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(contact)
    }

    /// True iff the contact exists with auto_enabled AND a ready profile
    /// exists. Both gates must be open before any automated reply.
    pub fn is_ready_to_reply(&self, chat_id: &str) -> Result<bool> {
        let db = self.db.lock().unwrap();
        let ready: Option<bool> = db
            .query_row(
                "SELECT c.auto_enabled AND p.is_ready
                 FROM contacts c
                 JOIN chat_profiles p ON p.chat_id = c.chat_id
                 WHERE c.chat_id = ?1",
                rusqlite::params![chat_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(ready.unwrap_or(false))
    }

    // --- profiles -----------------------------------------------------------

    pub fn get_profile(&self, chat_id: &str) -> Result<Option<ChatProfile>> {
        let db = self.db.lock().unwrap();
        let profile = db
            .query_row(
                "SELECT chat_id, initial_context, objective, instructions, is_ready, updated_at
                 FROM chat_profiles WHERE chat_id = ?1",
                rusqlite::params![chat_id],
                row_to_profile,
            )
            .optional()?;
        Ok(profile.map(|p| self.decode_profile(p)))
    }

    /// `initial_context` is written encrypted (the reasoner mirrors its
    /// priority context there); legacy plaintext rows pass through the sniff.
    fn decode_profile(&self, mut profile: ChatProfile) -> ChatProfile {
        match self.cipher.decrypt(&profile.initial_context) {
            Ok(text) => profile.initial_context = text,
            Err(e) => {
                warn!(chat = %profile.chat_id, error = %e, "profile context unreadable, treating as empty");
                profile.initial_context = String::new();
            }
        }
        profile
    }

    /// Create or partially update a profile. `None` patch fields keep the
    /// stored value.
    pub fn upsert_profile(&self, chat_id: &str, mut patch: ProfilePatch) -> Result<ChatProfile> {
        // Encrypt-on-write; readers sniff the sentinel and fall back to
        // plaintext for rows that predate encryption.
        patch.initial_context = patch
            .initial_context
            .map(|text| self.cipher.encrypt(&text));

        let now = Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO chat_profiles
                 (chat_id, initial_context, objective, instructions, is_ready, updated_at)
             VALUES (?1, COALESCE(?2, ''), COALESCE(?3, ''), COALESCE(?4, ''), COALESCE(?5, 0), ?6)
             ON CONFLICT(chat_id) DO UPDATE SET
                 initial_context = COALESCE(?2, initial_context),
                 objective       = COALESCE(?3, objective),
                 instructions    = COALESCE(?4, instructions),
                 is_ready        = COALESCE(?5, is_ready),
                 updated_at      = ?6",
            rusqlite::params![
                chat_id,
                patch.initial_context,
                patch.objective,
                patch.instructions,
                patch.is_ready,
                now
            ],
        )?;
        let profile = db.query_row(
            "SELECT chat_id, initial_context, objective, instructions, is_ready, updated_at
             FROM chat_profiles WHERE chat_id = ?1",
            rusqlite::params![chat_id],
            row_to_profile,
        )?;
        Ok(self.decode_profile(profile))
    }

    // --- counters -----------------------------------------------------------

    pub fn get_counter(&self, chat_id: &str) -> Result<ChatCounter> {
        let db = self.db.lock().unwrap();
        let counter = db
            .query_row(
                "SELECT chat_id, assistant_replies_count, strategy_version,
                        last_reasoned_at, last_reply_at
                 FROM chat_counters WHERE chat_id = ?1",
                rusqlite::params![chat_id],
                |row| {
                    Ok(ChatCounter {
                        chat_id: row.get(0)?,
                        assistant_replies_count: row.get(1)?,
                        strategy_version: row.get(2)?,
                        last_reasoned_at: row.get(3)?,
                        last_reply_at: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(counter.unwrap_or_else(|| ChatCounter {
            chat_id: chat_id.to_string(),
            ..ChatCounter::default()
        }))
    }

    pub fn increment_reply_counter(&self, chat_id: &str) -> Result<u32> {
        let mut db = self.db.lock().unwrap();
        let tx = db.transaction()?;
        tx.execute(
            "INSERT INTO chat_counters (chat_id) VALUES (?1)
             ON CONFLICT(chat_id) DO NOTHING",
            rusqlite::params![chat_id],
        )?;
        tx.execute(
            "UPDATE chat_counters
             SET assistant_replies_count = assistant_replies_count + 1
             WHERE chat_id = ?1",
            rusqlite::params![chat_id],
        )?;
        let count: u32 = tx.query_row(
            "SELECT assistant_replies_count FROM chat_counters WHERE chat_id = ?1",
            rusqlite::params![chat_id],
            |row| row.get(0),
        )?;
        tx.commit()?;
        Ok(count)
    }

    pub fn reset_reply_counter(&self, chat_id: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE chat_counters SET assistant_replies_count = 0 WHERE chat_id = ?1",
            rusqlite::params![chat_id],
        )?;
        Ok(())
    }

    pub fn stamp_last_reply(&self, chat_id: &str, at: DateTime<Utc>) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO chat_counters (chat_id, last_reply_at) VALUES (?1, ?2)
             ON CONFLICT(chat_id) DO UPDATE SET last_reply_at = ?2",
            rusqlite::params![chat_id, at.to_rfc3339()],
        )?;
        Ok(())
    }

    /// Time of the last committed reply, if any.
    pub fn last_reply_at(&self, chat_id: &str) -> Result<Option<DateTime<Utc>>> {
        let counter = self.get_counter(chat_id)?;
        Ok(counter
            .last_reply_at
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc)))
    }

    // --- strategies ---------------------------------------------------------

    pub fn get_active_strategy(&self, chat_id: &str) -> Result<Option<Strategy>> {
        let db = self.db.lock().unwrap();
        let strategy = db
            .query_row(
                "SELECT id, chat_id, version, strategy_text, source_snapshot, created_at, is_active
                 FROM chat_strategies
                 WHERE chat_id = ?1 AND is_active = 1",
                rusqlite::params![chat_id],
                row_to_strategy,
            )
            .optional()?;
        Ok(strategy)
    }

    /// All strategy versions for a chat, oldest first (audit view).
    pub fn list_strategies(&self, chat_id: &str) -> Result<Vec<Strategy>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, chat_id, version, strategy_text, source_snapshot, created_at, is_active
             FROM chat_strategies
             WHERE chat_id = ?1
             ORDER BY version",
        )?;
        let rows = stmt.query_map(rusqlite::params![chat_id], row_to_strategy)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Deactivate the prior active strategy, insert version `max + 1` as the
    /// new active one and record it on the counter — one transaction.
    /// Returns the new version number (dense, 1-based).
    pub fn activate_new_strategy(
        &self,
        chat_id: &str,
        strategy_text: &str,
        source_snapshot: &str,
    ) -> Result<u32> {
        let now = Utc::now().to_rfc3339();
        let mut db = self.db.lock().unwrap();
        let tx = db.transaction()?;

        let max_version: u32 = tx.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM chat_strategies WHERE chat_id = ?1",
            rusqlite::params![chat_id],
            |row| row.get(0),
        )?;
        let version = max_version + 1;

        tx.execute(
            "UPDATE chat_strategies SET is_active = 0 WHERE chat_id = ?1 AND is_active = 1",
            rusqlite::params![chat_id],
        )?;
        tx.execute(
            "INSERT INTO chat_strategies
                 (chat_id, version, strategy_text, source_snapshot, created_at, is_active)
             VALUES (?1, ?2, ?3, ?4, ?5, 1)",
            rusqlite::params![chat_id, version, strategy_text, source_snapshot, now],
        )?;
        tx.execute(
            "INSERT INTO chat_counters (chat_id, strategy_version, last_reasoned_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(chat_id) DO UPDATE SET
                 strategy_version = ?2,
                 last_reasoned_at = ?3",
            rusqlite::params![chat_id, version, now],
        )?;
        tx.commit()?;

        debug!(chat = %chat_id, version, "activated new strategy");
        Ok(version)
    }

    // --- model routing ------------------------------------------------------

    /// Upsert configured model and rule seeds. Config order becomes rule
    /// priority order on first sync.
    pub fn sync_routing(&self, models: &[ModelSeed], rules: &[RuleSeed]) -> Result<()> {
        let mut db = self.db.lock().unwrap();
        let tx = db.transaction()?;
        for seed in models {
            let config = seed
                .config
                .as_ref()
                .map(|v| serde_json::to_string(v))
                .transpose()?;
            tx.execute(
                "INSERT INTO models (name, provider, config, active)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(name) DO UPDATE SET
                     provider = ?2, config = ?3, active = ?4",
                rusqlite::params![seed.name, seed.provider, config, seed.active],
            )?;
        }
        for seed in rules {
            let model_id: Option<i64> = tx
                .query_row(
                    "SELECT id FROM models WHERE name = ?1",
                    rusqlite::params![seed.model],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(model_id) = model_id else {
                return Err(StoreError::UnknownModel(seed.model.clone()));
            };
            // Rules have no natural key; replace by name.
            tx.execute(
                "DELETE FROM rules WHERE name = ?1",
                rusqlite::params![seed.name],
            )?;
            tx.execute(
                "INSERT INTO rules (name, every_n_messages, model_id, enabled)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![seed.name, seed.every_n_messages, model_id, seed.enabled],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn route_rules(&self) -> Result<Vec<RouteRule>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT r.id, r.name, r.every_n_messages, m.name, r.enabled
             FROM rules r
             LEFT JOIN models m ON m.id = r.model_id
             ORDER BY r.id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(RouteRule {
                id: row.get(0)?,
                name: row.get(1)?,
                every_n_messages: row.get(2)?,
                model_name: row.get(3)?,
                enabled: row.get(4)?,
            })
        })?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn model_slots(&self) -> Result<Vec<ModelSlot>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, name, provider, config, active FROM models ORDER BY id",
        )?;
        let rows = stmt.query_map([], |row| {
            let config_json: Option<String> = row.get(3)?;
            Ok(ModelSlot {
                id: row.get(0)?,
                name: row.get(1)?,
                provider: row.get(2)?,
                config: config_json.and_then(|j| serde_json::from_str(&j).ok()),
                active: row.get(4)?,
            })
        })?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn find_model(&self, name: &str) -> Result<Option<ModelSlot>> {
        Ok(self.model_slots()?.into_iter().find(|m| m.name == name))
    }

    /// The analyst model: an active model whose name mentions "reasoner",
    /// else the first active model.
    pub fn reasoner_model(&self) -> Result<Option<String>> {
        let slots = self.model_slots()?;
        let reasoner = slots
            .iter()
            .find(|m| m.active && m.name.to_lowercase().contains("reasoner"))
            .or_else(|| slots.iter().find(|m| m.active));
        Ok(reasoner.map(|m| m.name.clone()))
    }

    // --- daily and user context --------------------------------------------

    pub fn add_daily_context(&self, date: NaiveDate, text: &str, source: Option<&str>) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO daily_contexts (effective_date, text, source) VALUES (?1, ?2, ?3)",
            rusqlite::params![date.to_string(), text, source],
        )?;
        Ok(())
    }

    /// The newest daily context entry effective on `date`.
    pub fn daily_context_for(&self, date: NaiveDate) -> Result<Option<DailyContext>> {
        let db = self.db.lock().unwrap();
        let ctx = db
            .query_row(
                "SELECT id, effective_date, text, source FROM daily_contexts
                 WHERE effective_date = ?1
                 ORDER BY id DESC
                 LIMIT 1",
                rusqlite::params![date.to_string()],
                |row| {
                    Ok(DailyContext {
                        id: row.get(0)?,
                        effective_date: row.get(1)?,
                        text: row.get(2)?,
                        source: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(ctx)
    }

    pub fn add_user_note(&self, user_id: &str, text: &str, source: Option<&str>) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO user_contexts (user_id, text, source, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![user_id, text, source, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Notes for a user, newest first.
    pub fn user_notes(&self, user_id: &str) -> Result<Vec<UserNote>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, user_id, text, source, created_at FROM user_contexts
             WHERE user_id = ?1
             ORDER BY created_at DESC",
        )?;
        let rows = stmt.query_map(rusqlite::params![user_id], |row| {
            Ok(UserNote {
                id: row.get(0)?,
                user_id: row.get(1)?,
                text: row.get(2)?,
                source: row.get(3)?,
                created_at: row.get(4)?,
            })
        })?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }
}

fn row_to_profile(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChatProfile> {
    Ok(ChatProfile {
        chat_id: row.get(0)?,
        initial_context: row.get(1)?,
        objective: row.get(2)?,
        instructions: row.get(3)?,
        is_ready: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

fn row_to_strategy(row: &rusqlite::Row<'_>) -> rusqlite::Result<Strategy> {
    Ok(Strategy {
        id: row.get(0)?,
        chat_id: row.get(1)?,
        version: row.get(2)?,
        strategy_text: row.get(3)?,
        source_snapshot: row.get(4)?,
        created_at: row.get(5)?,
        is_active: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> Store {
        let cipher = ContextCipher::new(&[7u8; 32]).unwrap();
        Store::in_memory(cipher).unwrap()
    }

    #[test]
    fn context_roundtrip() {
        let store = test_store();
        let turns = vec![Turn::user("hola"), Turn::assistant("buenas, ¿qué tal?")];
        store.append_context("+57 300", &turns).unwrap();
        assert_eq!(store.load_last_context("+57 300").unwrap(), turns);
    }

    #[test]
    fn missing_history_is_empty() {
        let store = test_store();
        assert!(store.load_last_context("nadie").unwrap().is_empty());
    }

    #[test]
    fn corrupted_snapshot_reads_as_empty() {
        let store = test_store();
        {
            let db = store.db.lock().unwrap();
            db.execute(
                "INSERT INTO conversations (chat_id, created_at, context)
                 VALUES ('c', '2026-01-01T00:00:00Z', 'enc::not-base64!')",
                [],
            )
            .unwrap();
        }
        assert!(store.load_last_context("c").unwrap().is_empty());
    }

    #[test]
    fn load_returns_latest_snapshot_only() {
        let store = test_store();
        store.append_context("c", &[Turn::user("uno")]).unwrap();
        let newer = vec![Turn::user("uno"), Turn::assistant("dos")];
        store.append_context("c", &newer).unwrap();
        assert_eq!(store.load_last_context("c").unwrap(), newer);
    }

    #[test]
    fn is_ready_requires_contact_and_profile() {
        let store = test_store();
        assert!(!store.is_ready_to_reply("c").unwrap());

        store.add_or_update_contact("c", Some("Laura"), Some(true)).unwrap();
        assert!(!store.is_ready_to_reply("c").unwrap());

        store
            .upsert_profile(
                "c",
                ProfilePatch {
                    is_ready: Some(true),
                    ..ProfilePatch::default()
                },
            )
            .unwrap();
        assert!(store.is_ready_to_reply("c").unwrap());

        store.add_or_update_contact("c", None, Some(false)).unwrap();
        assert!(!store.is_ready_to_reply("c").unwrap());
    }

    #[test]
    fn profile_patch_keeps_unset_fields() {
        let store = test_store();
        store
            .upsert_profile(
                "c",
                ProfilePatch {
                    objective: Some("agendar demo".into()),
                    instructions: Some("tono formal".into()),
                    ..ProfilePatch::default()
                },
            )
            .unwrap();
        let updated = store
            .upsert_profile(
                "c",
                ProfilePatch {
                    initial_context: Some("cliente nuevo".into()),
                    is_ready: Some(true),
                    ..ProfilePatch::default()
                },
            )
            .unwrap();
        assert_eq!(updated.objective, "agendar demo");
        assert_eq!(updated.instructions, "tono formal");
        assert_eq!(updated.initial_context, "cliente nuevo");
        assert!(updated.is_ready);
    }

    #[test]
    fn profile_context_is_encrypted_at_rest_with_plaintext_sniff() {
        let store = test_store();
        store
            .upsert_profile(
                "c",
                ProfilePatch {
                    initial_context: Some("cliente evalúa".into()),
                    ..ProfilePatch::default()
                },
            )
            .unwrap();

        let raw: String = {
            let db = store.db.lock().unwrap();
            db.query_row(
                "SELECT initial_context FROM chat_profiles WHERE chat_id = 'c'",
                [],
                |row| row.get(0),
            )
            .unwrap()
        };
        assert!(crate::crypto::is_encrypted(&raw));
        assert_eq!(store.get_profile("c").unwrap().unwrap().initial_context, "cliente evalúa");

        // Legacy plaintext rows read back unchanged.
        {
            let db = store.db.lock().unwrap();
            db.execute(
                "UPDATE chat_profiles SET initial_context = 'texto antiguo' WHERE chat_id = 'c'",
                [],
            )
            .unwrap();
        }
        assert_eq!(store.get_profile("c").unwrap().unwrap().initial_context, "texto antiguo");
    }

    #[test]
    fn counters_increment_and_reset() {
        let store = test_store();
        assert_eq!(store.increment_reply_counter("c").unwrap(), 1);
        assert_eq!(store.increment_reply_counter("c").unwrap(), 2);
        store.reset_reply_counter("c").unwrap();
        assert_eq!(store.get_counter("c").unwrap().assistant_replies_count, 0);
    }

    #[test]
    fn commit_assistant_turn_is_one_transaction() {
        let store = test_store();
        let turns = vec![Turn::user("hola"), Turn::assistant("hey")];
        let n = store.commit_assistant_turn("c", &turns).unwrap();
        assert_eq!(n, 1);
        let counter = store.get_counter("c").unwrap();
        assert!(counter.last_reply_at.is_some());
        assert_eq!(store.load_last_context("c").unwrap(), turns);
    }

    #[test]
    fn strategy_versions_are_dense_with_single_active() {
        let store = test_store();
        assert_eq!(store.activate_new_strategy("c", "v1", "s1").unwrap(), 1);
        assert_eq!(store.activate_new_strategy("c", "v2", "s2").unwrap(), 2);
        assert_eq!(store.activate_new_strategy("c", "v3", "s3").unwrap(), 3);

        let all = store.list_strategies("c").unwrap();
        let versions: Vec<u32> = all.iter().map(|s| s.version).collect();
        assert_eq!(versions, vec![1, 2, 3]);
        assert_eq!(all.iter().filter(|s| s.is_active).count(), 1);

        let active = store.get_active_strategy("c").unwrap().unwrap();
        assert_eq!(active.version, 3);
        assert_eq!(active.strategy_text, "v3");

        let counter = store.get_counter("c").unwrap();
        assert_eq!(counter.strategy_version, 3);
        assert!(counter.last_reasoned_at.is_some());
    }

    #[test]
    fn routing_sync_and_lookup() {
        use charla_core::config::{ModelSeed, RuleSeed};
        let store = test_store();
        store
            .sync_routing(
                &[
                    ModelSeed {
                        name: "rapido".into(),
                        provider: "lmstudio".into(),
                        config: None,
                        active: true,
                    },
                    ModelSeed {
                        name: "reasoner-largo".into(),
                        provider: "openai".into(),
                        config: None,
                        active: true,
                    },
                ],
                &[RuleSeed {
                    name: "cada-cinco".into(),
                    every_n_messages: 5,
                    model: "reasoner-largo".into(),
                    enabled: true,
                }],
            )
            .unwrap();

        let rules = store.route_rules().unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].model_name.as_deref(), Some("reasoner-largo"));

        assert_eq!(store.reasoner_model().unwrap().unwrap(), "reasoner-largo");

        // Re-sync is idempotent.
        store
            .sync_routing(
                &[ModelSeed {
                    name: "rapido".into(),
                    provider: "lmstudio".into(),
                    config: None,
                    active: false,
                }],
                &[],
            )
            .unwrap();
        let slot = store.find_model("rapido").unwrap().unwrap();
        assert!(!slot.active);
    }

    #[test]
    fn unknown_rule_model_is_rejected() {
        use charla_core::config::RuleSeed;
        let store = test_store();
        let err = store
            .sync_routing(
                &[],
                &[RuleSeed {
                    name: "rota".into(),
                    every_n_messages: 2,
                    model: "no-existe".into(),
                    enabled: true,
                }],
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::UnknownModel(_)));
    }

    #[test]
    fn daily_and_user_contexts() {
        let store = test_store();
        let today = Utc::now().date_naive();
        store.add_daily_context(today, "promo vigente", Some("ops")).unwrap();
        let daily = store.daily_context_for(today).unwrap().unwrap();
        assert_eq!(daily.text, "promo vigente");
        assert!(store
            .daily_context_for(today.pred_opt().unwrap())
            .unwrap()
            .is_none());

        store.add_user_note("u", "prefiere tardes", None).unwrap();
        store.add_user_note("u", "tiene dos perros", None).unwrap();
        let notes = store.user_notes("u").unwrap();
        assert_eq!(notes.len(), 2);
    }
}
