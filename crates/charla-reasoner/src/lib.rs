//! Periodic strategy refresh. Consumes the recent conversation plus the
//! chat's objective and produces a new versioned strategy, an updated
//! priority context and durable profile notes.

pub mod parse;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tracing::{info, warn};

use charla_agent::{GenerateRequest, Generator, GeneratorError, Registry};
use charla_core::types::{Role, Turn};
use charla_store::types::ProfilePatch;
use charla_store::{Store, StoreError};

use parse::{parse_analysis, Analysis};

/// Cap on the conversation excerpt stored in the audit snapshot.
const SNAPSHOT_EXCERPT_CHARS: usize = 4_000;

#[derive(Debug, Error)]
pub enum ReasonerError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Generator(#[from] GeneratorError),

    #[error("no active model configured for analysis")]
    NoModel,

    #[error("model '{0}' references an unconfigured generator")]
    UnknownGenerator(String),

    #[error("analyst produced nothing usable and no prior strategy exists")]
    EmptyAnalysis,

    #[error("context file error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct ReasonerSettings {
    /// Analyst model name; when unset the store's reasoner-model lookup
    /// applies (an active model named "*reasoner*", else the first active).
    pub model: Option<String>,
    pub max_tokens: u32,
    pub timeout: Duration,
    /// How many trailing turns the analyst sees.
    pub history_turns: usize,
    pub contextos_dir: PathBuf,
}

/// What a refresh actually changed, for logging and tests.
#[derive(Debug, Clone)]
pub struct RefreshOutcome {
    pub version: u32,
    pub wrote_contexto: bool,
    pub wrote_perfil: bool,
}

pub struct StrategyReasoner {
    store: Arc<Store>,
    registry: Arc<Registry>,
    settings: ReasonerSettings,
}

impl StrategyReasoner {
    pub fn new(store: Arc<Store>, registry: Arc<Registry>, settings: ReasonerSettings) -> Self {
        Self {
            store,
            registry,
            settings,
        }
    }

    /// Run one analysis pass for a chat and persist its effects:
    /// contexto.txt is rewritten, perfil.txt gains a timestamped entry, the
    /// profile mirrors the new priority context, and a new strategy version
    /// becomes active. The live conversation log is never touched.
    pub async fn refresh(&self, chat_id: &str) -> Result<RefreshOutcome, ReasonerError> {
        let profile = self.store.get_profile(chat_id)?;
        let previous = self.store.get_active_strategy(chat_id)?;
        let history = self.store.load_last_context(chat_id)?;
        let tail_start = history.len().saturating_sub(self.settings.history_turns);
        let snapshot = render_snapshot(&history[tail_start..]);

        let perfil_text = profile
            .as_ref()
            .map(|p| {
                let mut parts = Vec::new();
                if !p.initial_context.trim().is_empty() {
                    parts.push(format!("Contexto inicial: {}", p.initial_context));
                }
                if !p.objective.trim().is_empty() {
                    parts.push(format!("Objetivo: {}", p.objective));
                }
                if !p.instructions.trim().is_empty() {
                    parts.push(format!("Instrucciones: {}", p.instructions));
                }
                parts.join("\n")
            })
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| "(sin perfil)".to_string());

        let previous_text = previous
            .as_ref()
            .map(|s| s.strategy_text.clone())
            .filter(|t| !t.trim().is_empty());

        let messages = build_analyst_messages(
            profile.as_ref().map(|p| p.objective.as_str()).unwrap_or(""),
            &perfil_text,
            previous_text.as_deref().unwrap_or("(sin estrategia previa)"),
            &snapshot,
        );

        let (generator, api_model) = self.resolve_analyst()?;
        let request = GenerateRequest {
            model: api_model,
            messages,
            temperature: Some(0.3),
            max_tokens: self.settings.max_tokens,
            timeout: self.settings.timeout,
        };

        let reply = generator.generate(&request).await?;
        let analysis = parse_analysis(&reply.content);
        if analysis.is_empty() {
            warn!(chat = %chat_id, "analyst reply had no extractable sections");
        }

        let strategy_text = match (
            non_empty(&analysis.estrategia),
            previous_text.as_deref(),
        ) {
            (Some(fresh), _) => fresh.to_string(),
            (None, Some(prev)) => prev.to_string(),
            (None, None) => return Err(ReasonerError::EmptyAnalysis),
        };

        let wrote = self.write_context_files(chat_id, &analysis)?;

        if let Some(contexto) = non_empty(&analysis.contexto_prioritario) {
            self.store.upsert_profile(
                chat_id,
                ProfilePatch {
                    initial_context: Some(contexto.to_string()),
                    is_ready: Some(true),
                    ..ProfilePatch::default()
                },
            )?;
        } else {
            self.store.upsert_profile(
                chat_id,
                ProfilePatch {
                    is_ready: Some(true),
                    ..ProfilePatch::default()
                },
            )?;
        }

        let source_snapshot = serde_json::json!({
            "profile": perfil_text,
            "prev_strategy": previous_text.as_deref().unwrap_or(""),
            "excerpt": truncate_chars(&snapshot, SNAPSHOT_EXCERPT_CHARS),
            "at": Utc::now().to_rfc3339(),
        })
        .to_string();

        let version = self
            .store
            .activate_new_strategy(chat_id, &strategy_text, &source_snapshot)?;

        info!(
            chat = %chat_id,
            version,
            wrote_contexto = wrote.0,
            wrote_perfil = wrote.1,
            "strategy refreshed"
        );

        Ok(RefreshOutcome {
            version,
            wrote_contexto: wrote.0,
            wrote_perfil: wrote.1,
        })
    }

    fn resolve_analyst(&self) -> Result<(Arc<dyn Generator>, String), ReasonerError> {
        let model_name = match &self.settings.model {
            Some(m) => m.clone(),
            None => self.store.reasoner_model()?.ok_or(ReasonerError::NoModel)?,
        };
        let slot = self
            .store
            .find_model(&model_name)?
            .ok_or_else(|| ReasonerError::UnknownGenerator(model_name.clone()))?;
        self.registry
            .resolve(&slot)
            .ok_or(ReasonerError::UnknownGenerator(model_name))
    }

    /// Persist the analyst outputs to the per-chat files, encrypted at rest.
    /// contexto.txt is overwritten with its two labelled sections; perfil.txt
    /// is an append-log with timestamped headers.
    fn write_context_files(
        &self,
        chat_id: &str,
        analysis: &Analysis,
    ) -> Result<(bool, bool), ReasonerError> {
        let chat_dir = self.settings.contextos_dir.join(format!("chat_{chat_id}"));
        std::fs::create_dir_all(&chat_dir)?;
        let cipher = self.store.cipher();

        let mut wrote_contexto = false;
        let mut blocks = Vec::new();
        if let Some(ctx) = non_empty(&analysis.contexto_prioritario) {
            blocks.push(format!("CONTEXTO PRIORITARIO:\n{ctx}"));
        }
        if let Some(strat) = non_empty(&analysis.estrategia) {
            blocks.push(format!("ESTRATEGIA:\n{strat}"));
        }
        if !blocks.is_empty() {
            let token = cipher.encrypt(&blocks.join("\n\n"));
            std::fs::write(chat_dir.join("contexto.txt"), token)?;
            wrote_contexto = true;
        }

        let mut wrote_perfil = false;
        if let Some(update) = non_empty(&analysis.perfil_update) {
            let perfil_path = chat_dir.join("perfil.txt");
            let existing = read_existing(&perfil_path, cipher);
            let stamp = Utc::now().to_rfc3339();
            let appended = if existing.is_empty() {
                format!("[Actualización {stamp}]\n{update}")
            } else {
                format!("{existing}\n\n[Actualización {stamp}]\n{update}")
            };
            std::fs::write(perfil_path, cipher.encrypt(&appended))?;
            wrote_perfil = true;
        }

        Ok((wrote_contexto, wrote_perfil))
    }
}

/// The analyst instruction and its context, in the neutral message shape.
fn build_analyst_messages(
    objective: &str,
    perfil_text: &str,
    previous_strategy: &str,
    snapshot: &str,
) -> Vec<Turn> {
    let mut messages = vec![Turn::system(
        "Eres un estratega de conversaciones. NO hables con el usuario final.\n\
         Devuelve SOLO JSON válido con las claves: perfil_update, \
         contexto_prioritario, estrategia.\n\
         - perfil_update: hechos duraderos sobre gustos, metas y datos del \
         usuario relevantes al objetivo.\n\
         - contexto_prioritario: resumen corto del estado actual de la \
         conversación.\n\
         - estrategia: plan operativo concreto para los próximos 10 mensajes \
         del respondedor.\n\
         No uses markdown. No incluyas comentarios fuera del JSON.",
    )];

    if objective.trim().is_empty() {
        messages.push(Turn::user(
            "No hay objetivo definido. Genera una estrategia de conversación \
             genérica de calificación y acercamiento.",
        ));
    } else {
        messages.push(Turn::user(format!(
            "OBJETIVO PRIORITARIO CON ESTE CONTACTO:\n{objective}\n\n\
             TODA la estrategia debe orientarse a lograr este objetivo."
        )));
    }

    messages.push(Turn::user(format!("Perfil actual del chat:\n{perfil_text}")));
    messages.push(Turn::user(format!("Estrategia vigente:\n{previous_strategy}")));
    messages.push(Turn::user(format!("Snapshot reciente:\n{snapshot}")));
    messages
}

fn render_snapshot(turns: &[Turn]) -> String {
    turns
        .iter()
        .map(|t| {
            let role = match t.role {
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::System => "system",
            };
            format!("{role}: {}", t.content)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn non_empty(s: &str) -> Option<&str> {
    let t = s.trim();
    (!t.is_empty()).then_some(t)
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

fn read_existing(path: &Path, cipher: &charla_store::ContextCipher) -> String {
    let Ok(raw) = std::fs::read_to_string(path) else {
        return String::new();
    };
    match cipher.decrypt(raw.trim()) {
        Ok(text) => text,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "existing perfil unreadable, starting fresh");
            String::new()
        }
    }
}
