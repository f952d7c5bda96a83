//! Inbound detection loop and the reply pipeline. One eligible chat is
//! processed per tick; every guard runs before any DOM work on that chat.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use charla_agent::{GenerateRequest, Generator, GeneratorError, Registry, TurnRouter};
use charla_context::{emergency, guard, ContextLoader};
use charla_core::types::{Role, Turn};
use charla_driver::{ChatSurface, DriverError};
use charla_reasoner::StrategyReasoner;
use charla_store::{Store, StoreError};

/// Snapshots keep a rolling view of this many trailing turns.
const MAX_SNAPSHOT_TURNS: usize = 40;
/// Deferral applied on a rate limit without a Retry-After hint.
const DEFAULT_RATE_LIMIT_DEFER: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum TickError {
    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Per-tick view of the global flags, read once by the orchestrator.
#[derive(Debug, Clone, Copy)]
pub struct TickFlags {
    pub respond_to_all: bool,
    pub require_contact_profile: bool,
}

pub struct InboundLoop {
    store: Arc<Store>,
    registry: Arc<Registry>,
    router: TurnRouter,
    loader: Arc<ContextLoader>,
    reasoner: Arc<StrategyReasoner>,
    cooldown: chrono::Duration,
    strategy_refresh_every: u32,
    typing_delay: Duration,
    /// Chats skipped until a deadline after a provider rate limit.
    deferred: HashMap<String, DateTime<Utc>>,
}

impl InboundLoop {
    pub fn new(
        store: Arc<Store>,
        registry: Arc<Registry>,
        router: TurnRouter,
        loader: Arc<ContextLoader>,
        reasoner: Arc<StrategyReasoner>,
        cooldown: chrono::Duration,
        strategy_refresh_every: u32,
        typing_delay: Duration,
    ) -> Self {
        Self {
            store,
            registry,
            router,
            loader,
            reasoner,
            cooldown,
            strategy_refresh_every,
            typing_delay,
            deferred: HashMap::new(),
        }
    }

    /// Scan the inbox and process the first eligible unread chat.
    /// Returns whether a reply pipeline ran this tick.
    pub async fn tick(
        &mut self,
        surface: &dyn ChatSurface,
        flags: TickFlags,
    ) -> Result<bool, TickError> {
        let entries = surface.scan_inbox()?;
        let now = Utc::now();

        for entry in entries {
            let chat_id = entry.chat_id;

            if let Some(until) = self.deferred.get(&chat_id) {
                if now < *until {
                    debug!(chat = %chat_id, "deferred after rate limit, skipping");
                    continue;
                }
                self.deferred.remove(&chat_id);
            }

            // Cooldown check comes before any DOM work on the chat.
            if let Some(last) = self.store.last_reply_at(&chat_id)? {
                if now - last < self.cooldown {
                    debug!(chat = %chat_id, "in cooldown, skipping");
                    continue;
                }
            }

            if !flags.respond_to_all
                && flags.require_contact_profile
                && !self.store.is_ready_to_reply(&chat_id)?
            {
                debug!(chat = %chat_id, "not enabled for automation, skipping");
                continue;
            }

            if let Err(e) = surface.open_chat(&chat_id) {
                warn!(chat = %chat_id, error = %e, "could not open chat");
                continue;
            }

            let incoming = match surface.read_last_incoming() {
                Ok(Some(m)) => m,
                Ok(None) => {
                    let _ = surface.exit_chat();
                    continue;
                }
                Err(e) => {
                    warn!(chat = %chat_id, error = %e, "could not read last message");
                    let _ = surface.exit_chat();
                    continue;
                }
            };

            // Our own message still showing an unread badge: never answer it.
            if incoming.from_us {
                debug!(chat = %chat_id, "last message is ours, skipping");
                let _ = surface.exit_chat();
                continue;
            }
            let Some(text) = incoming.text else {
                debug!(chat = %chat_id, "no extractable text, skipping");
                let _ = surface.exit_chat();
                continue;
            };

            info!(chat = %chat_id, preview = %truncate(&text, 50), "inbound message");
            self.reply_pipeline(surface, &chat_id, &text).await?;
            let _ = surface.exit_chat();
            return Ok(true);
        }
        Ok(false)
    }

    /// Generate, post-filter, persist and send one reply.
    async fn reply_pipeline(
        &mut self,
        surface: &dyn ChatSurface,
        chat_id: &str,
        text: &str,
    ) -> Result<(), TickError> {
        let history = self.store.load_last_context(chat_id)?;
        let turn_index = history.iter().filter(|t| t.role == Role::Assistant).count() as u32;

        let Some(model_name) = self.router.choose_for(chat_id, turn_index)? else {
            warn!(chat = %chat_id, "no model configured, cannot reply");
            return Ok(());
        };
        let Some(slot) = self.store.find_model(&model_name)? else {
            warn!(chat = %chat_id, model = %model_name, "model config disappeared");
            return Ok(());
        };
        let Some((generator, api_model)) = self.registry.resolve(&slot) else {
            warn!(chat = %chat_id, model = %model_name, provider = %slot.provider, "generator not configured");
            return Ok(());
        };

        let prompt = self.loader.build(chat_id, &history, text, &api_model)?;
        let request = GenerateRequest {
            model: api_model.clone(),
            messages: prompt.messages.clone(),
            temperature: Some(prompt.temperature),
            max_tokens: prompt.max_tokens,
            timeout: charla_agent::generator::DEFAULT_CHAT_TIMEOUT,
        };

        let reply = match generator.generate(&request).await {
            Ok(r) => r.content,
            Err(GeneratorError::RateLimited { retry_after }) => {
                let defer = retry_after.unwrap_or(DEFAULT_RATE_LIMIT_DEFER);
                warn!(chat = %chat_id, defer_secs = defer.as_secs(), "rate limited, deferring chat");
                self.deferred.insert(
                    chat_id.to_string(),
                    Utc::now() + chrono::Duration::from_std(defer).unwrap_or(chrono::Duration::seconds(60)),
                );
                return Ok(());
            }
            Err(e) => {
                // No error text ever reaches the user; the turn just doesn't happen.
                error!(chat = %chat_id, error = %e, "generation failed, no reply sent");
                return Ok(());
            }
        };

        if reply.trim().is_empty() {
            warn!(chat = %chat_id, "empty generation, no reply sent");
            return Ok(());
        }

        let reply = self
            .enforce_reply_rules(chat_id, &generator, &request, reply, text)
            .await;

        // Commit before sending: snapshot, last_reply_at and counter move in
        // one transaction, and the cooldown clock starts at the commit.
        let mut full_history = history;
        full_history.push(Turn::user(text));
        full_history.push(Turn::assistant(reply.clone()));
        let tail_start = full_history.len().saturating_sub(MAX_SNAPSHOT_TURNS);
        let n = self
            .store
            .commit_assistant_turn(chat_id, &full_history[tail_start..])?;

        if let Err(e) = surface.type_and_send(&reply, self.typing_delay) {
            error!(chat = %chat_id, error = %e, "browser send failed after commit");
            return Err(e.into());
        }
        info!(chat = %chat_id, replies = n, "reply sent");

        if n >= self.strategy_refresh_every {
            self.store.reset_reply_counter(chat_id)?;
            let reasoner = Arc::clone(&self.reasoner);
            let chat = chat_id.to_string();
            // Best effort: a failed refresh only costs this cycle's update.
            tokio::spawn(async move {
                match reasoner.refresh(&chat).await {
                    Ok(outcome) => {
                        info!(chat = %chat, version = outcome.version, "strategy refresh complete")
                    }
                    Err(e) => warn!(chat = %chat, error = %e, "strategy refresh failed"),
                }
            });
        }
        Ok(())
    }

    /// Post-filter against the banned-phrase list: one corrective retry,
    /// then the emergency table.
    async fn enforce_reply_rules(
        &self,
        chat_id: &str,
        generator: &Arc<dyn Generator>,
        request: &GenerateRequest,
        reply: String,
        inbound: &str,
    ) -> String {
        let Some(phrase) = guard::violates(&reply) else {
            return reply;
        };
        warn!(chat = %chat_id, phrase, "reply rejected by post-filter, retrying");

        let mut retry = request.clone();
        // The corrective instruction lands right before the final user turn.
        let insert_at = retry.messages.len().saturating_sub(1);
        retry
            .messages
            .insert(insert_at, Turn::system(guard::corrective_system()));

        match generator.generate(&retry).await {
            Ok(second) if guard::violates(&second.content).is_none()
                && !second.content.trim().is_empty() =>
            {
                info!(chat = %chat_id, "corrective retry accepted");
                second.content
            }
            Ok(_) => {
                warn!(chat = %chat_id, "retry still violates rules, using emergency reply");
                emergency::emergency_reply(inbound).to_string()
            }
            Err(e) => {
                warn!(chat = %chat_id, error = %e, "corrective retry failed, using emergency reply");
                emergency::emergency_reply(inbound).to_string()
            }
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}
