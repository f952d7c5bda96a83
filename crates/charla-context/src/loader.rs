use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use charla_agent::catalog;
use charla_core::types::{Role, Turn};
use charla_store::{ContextCipher, Store};

use crate::guard;
use crate::rag::{PassageRetriever, DEFAULT_TOP_K};

/// Messages under this length that open with a known greeting may take the
/// collapsed fast path (when enabled).
const FAST_PATH_MAX_LEN: usize = 25;
const FAST_PATH_GREETINGS: &[&str] = &["hola", "buenas", "hey", "ola", "hi", "hello"];
/// Output cap for fast-path replies.
const FAST_PATH_MAX_TOKENS: u32 = 128;

/// Loader inputs that come from config, resolved once at startup.
#[derive(Debug, Clone)]
pub struct LoaderOptions {
    /// Fixed base system prompt (layer 1).
    pub base_system: String,
    /// Global guide documents: perfil.txt, ejemplo_chat.txt, ultimo_contexto.txt.
    pub docs_dir: PathBuf,
    /// Per-chat context files: chat_<id>/{perfil,contexto,objetivo}.txt.
    pub contextos_dir: PathBuf,
    /// Collapse the preamble for short greetings. Off by default.
    pub fast_path: bool,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// The fully composed generator input for one turn.
#[derive(Debug, Clone)]
pub struct ComposedPrompt {
    pub messages: Vec<Turn>,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Which budget-trim bucket a preamble turn belongs to. Older conversation
/// turns go first, then user notes, then RAG; core layers are never dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Layer {
    Core,
    UserNotes,
    Rag,
}

/// Assembles the layered prompt preamble: base system, behaviour rules,
/// global guides, per-chat files, profile, active strategy, daily note, user
/// notes, RAG and the conversation tail.
pub struct ContextLoader {
    store: Arc<Store>,
    opts: LoaderOptions,
    retriever: Option<Arc<dyn PassageRetriever>>,
}

impl ContextLoader {
    pub fn new(
        store: Arc<Store>,
        opts: LoaderOptions,
        retriever: Option<Arc<dyn PassageRetriever>>,
    ) -> Self {
        Self {
            store,
            opts,
            retriever,
        }
    }

    /// Compose the full message list for a generator call.
    ///
    /// `history` is the decoded conversation tail; `inbound` becomes the final
    /// user turn. Store reads propagate errors; file and RAG layers degrade
    /// silently.
    pub fn build(
        &self,
        chat_id: &str,
        history: &[Turn],
        inbound: &str,
        model: &str,
    ) -> charla_store::Result<ComposedPrompt> {
        if self.opts.fast_path && is_fast_path_greeting(inbound) {
            debug!(chat = %chat_id, "fast path: collapsed preamble");
            return Ok(ComposedPrompt {
                messages: vec![
                    Turn::system(self.opts.base_system.clone()),
                    Turn::user(inbound),
                ],
                max_tokens: self.opts.max_tokens.min(FAST_PATH_MAX_TOKENS),
                temperature: self.opts.temperature,
            });
        }

        let profile = self.store.get_profile(chat_id)?;
        let mut preamble: Vec<(Layer, Turn)> = Vec::new();

        // 1. Base system prompt.
        preamble.push((Layer::Core, Turn::system(self.opts.base_system.clone())));

        // 2. Consolidated behaviour block, with objective priming when set.
        let mut behaviour = guard::behaviour_rules().to_string();
        if let Some(objective) = profile.as_ref().map(|p| p.objective.trim()).filter(|o| !o.is_empty()) {
            behaviour.push_str(&format!(
                "\n\nOBJETIVO DE ESTA CONVERSACIÓN (prioridad):\n{objective}\n\
                 - Cada mensaje debe acercar la conversación a este objetivo.\n\
                 - Evalúa el progreso y ajusta tu enfoque."
            ));
        }
        preamble.push((Layer::Core, Turn::system(behaviour)));

        // 3. Global guide documents, then the per-chat context files.
        let cipher = self.store.cipher();
        for (file, label) in [
            ("ejemplo_chat.txt", "GUÍA DE CONVERSACIÓN - estilo y comportamiento (seguir siempre)"),
            ("perfil.txt", "PERFIL GLOBAL - información general sobre ti"),
            ("ultimo_contexto.txt", "CONTEXTO GLOBAL RECIENTE"),
        ] {
            if let Some(text) = read_context_file(&self.opts.docs_dir.join(file), cipher) {
                preamble.push((Layer::Core, Turn::system(format!("{label}:\n{text}"))));
            }
        }
        let chat_dir = self.opts.contextos_dir.join(format!("chat_{chat_id}"));
        for (file, label) in [
            ("perfil.txt", "PERFIL DE USUARIO - información específica sobre este usuario"),
            ("contexto.txt", "CONTEXTO DE USUARIO - estado actual de la conversación"),
            ("objetivo.txt", "OBJETIVO DEL CHAT - qué se busca lograr"),
        ] {
            if let Some(text) = read_context_file(&chat_dir.join(file), cipher) {
                preamble.push((Layer::Core, Turn::system(format!("{label}:\n{text}"))));
            }
        }

        // 4. Profile blocks from the store.
        if let Some(profile) = &profile {
            if !profile.initial_context.trim().is_empty() {
                preamble.push((
                    Layer::Core,
                    Turn::system(format!("Contexto inicial del chat: {}", profile.initial_context)),
                ));
            }
            if !profile.objective.trim().is_empty() {
                preamble.push((
                    Layer::Core,
                    Turn::system(format!(
                        "Objetivo del chat (a cumplir en la conversación): {}",
                        profile.objective
                    )),
                ));
            }
            if !profile.instructions.trim().is_empty() {
                preamble.push((
                    Layer::Core,
                    Turn::system(format!("Instrucciones adicionales: {}", profile.instructions)),
                ));
            }
        }

        // 5. Active strategy, labelled with its version.
        if let Some(strategy) = self.store.get_active_strategy(chat_id)? {
            preamble.push((
                Layer::Core,
                Turn::system(format!(
                    "ESTRATEGIA ACTIVA (v{}) - seguir estrictamente:\n{}",
                    strategy.version, strategy.strategy_text
                )),
            ));
        }

        // 6. Daily context for today.
        if let Some(daily) = self.store.daily_context_for(Utc::now().date_naive())? {
            preamble.push((
                Layer::Core,
                Turn::system(format!("CONTEXTO DEL DÍA ({}):\n{}", daily.effective_date, daily.text)),
            ));
        }

        // 7. User notes, deduplicated by text.
        let notes = self.store.user_notes(chat_id)?;
        let mut seen = std::collections::HashSet::new();
        let unique: Vec<&str> = notes
            .iter()
            .map(|n| n.text.trim())
            .filter(|t| !t.is_empty() && seen.insert(t.to_string()))
            .collect();
        if !unique.is_empty() {
            preamble.push((
                Layer::UserNotes,
                Turn::system(format!("NOTAS SOBRE EL USUARIO:\n- {}", unique.join("\n- "))),
            ));
        }

        // 8. RAG passages keyed by the inbound message. Silent on failure.
        if let Some(retriever) = &self.retriever {
            match retriever.retrieve(inbound, DEFAULT_TOP_K) {
                Ok(passages) if !passages.is_empty() => {
                    preamble.push((
                        Layer::Rag,
                        Turn::system(format!("CONTEXTO RAG (pasajes relevantes):\n{}", passages.join("\n\n"))),
                    ));
                }
                Ok(_) => {}
                Err(e) => debug!(chat = %chat_id, error = %e, "RAG unavailable, omitting layer"),
            }
        }

        // 9. Conversation tail: user/assistant turns only.
        let mut tail: Vec<Turn> = history
            .iter()
            .filter(|t| t.role != Role::System)
            .cloned()
            .collect();

        // Token budget guard against the model's documented window.
        let window = catalog::lookup(model);
        let budget = window.context_window.saturating_sub(self.opts.max_tokens) as usize;
        trim_to_budget(&mut preamble, &mut tail, inbound, budget);

        // 10. The inbound message closes the list.
        let mut messages: Vec<Turn> = preamble.into_iter().map(|(_, t)| t).collect();
        messages.extend(tail);
        messages.push(Turn::user(inbound));

        Ok(ComposedPrompt {
            messages,
            max_tokens: self.opts.max_tokens,
            temperature: self.opts.temperature,
        })
    }
}

fn is_fast_path_greeting(inbound: &str) -> bool {
    let normalized = inbound.trim().to_lowercase();
    inbound.len() < FAST_PATH_MAX_LEN
        && FAST_PATH_GREETINGS.iter().any(|g| normalized.starts_with(g))
}

/// Read a guide/context file, transparently decrypting `enc::` payloads.
/// Unreadable files degrade to absent.
fn read_context_file(path: &Path, cipher: &ContextCipher) -> Option<String> {
    let raw = std::fs::read_to_string(path).ok()?;
    let text = match cipher.decrypt(raw.trim()) {
        Ok(t) => t,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "context file unreadable, skipping");
            return None;
        }
    };
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Rough token estimate: four characters per token.
fn approx_tokens(text: &str) -> usize {
    text.chars().count() / 4
}

/// Drop content until the composed prompt fits the budget. Order: oldest
/// conversation turns first, then the user-notes layer, then the RAG layer.
/// Core layers are never dropped.
fn trim_to_budget(
    preamble: &mut Vec<(Layer, Turn)>,
    tail: &mut Vec<Turn>,
    inbound: &str,
    budget_tokens: usize,
) {
    let total = |preamble: &Vec<(Layer, Turn)>, tail: &Vec<Turn>| {
        preamble
            .iter()
            .map(|(_, t)| approx_tokens(&t.content))
            .chain(tail.iter().map(|t| approx_tokens(&t.content)))
            .sum::<usize>()
            + approx_tokens(inbound)
    };

    while total(preamble, tail) > budget_tokens {
        if !tail.is_empty() {
            tail.remove(0);
        } else if let Some(pos) = preamble.iter().position(|(l, _)| *l == Layer::UserNotes) {
            preamble.remove(pos);
        } else if let Some(pos) = preamble.iter().position(|(l, _)| *l == Layer::Rag) {
            preamble.remove(pos);
        } else {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::{RetrieverError, StaticRetriever};
    use charla_store::types::ProfilePatch;
    use charla_store::ContextCipher;

    fn test_store() -> Arc<Store> {
        let cipher = ContextCipher::new(&[9u8; 32]).unwrap();
        Arc::new(Store::in_memory(cipher).unwrap())
    }

    fn opts(dir: &Path, fast_path: bool) -> LoaderOptions {
        LoaderOptions {
            base_system: "Eres una persona real.".into(),
            docs_dir: dir.join("docs"),
            contextos_dir: dir.join("contextos"),
            fast_path,
            max_tokens: 512,
            temperature: 0.7,
        }
    }

    fn seeded_store() -> Arc<Store> {
        let store = test_store();
        store
            .upsert_profile(
                "c",
                ProfilePatch {
                    initial_context: Some("cliente evalúa".into()),
                    objective: Some("agendar demo".into()),
                    instructions: Some("tono cercano".into()),
                    is_ready: Some(true),
                },
            )
            .unwrap();
        store.activate_new_strategy("c", "preguntar por presupuesto", "snap").unwrap();
        store
            .add_daily_context(Utc::now().date_naive(), "promo vigente", None)
            .unwrap();
        store.add_user_note("c", "prefiere tardes", None).unwrap();
        store.add_user_note("c", "prefiere tardes", None).unwrap();
        store.add_user_note("c", "tiene dos perros", None).unwrap();
        store
    }

    #[test]
    fn full_preamble_when_fast_path_off() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store();
        let retriever = Arc::new(StaticRetriever::new(vec!["pasaje uno".into()]));
        let loader = ContextLoader::new(store, opts(dir.path(), false), Some(retriever));

        let history = vec![Turn::user("hola"), Turn::assistant("buenas")];
        let prompt = loader
            .build("c", &history, "hola, cuéntame del producto", "claude-3-5-sonnet-latest")
            .unwrap();

        let systems: Vec<&Turn> = prompt
            .messages
            .iter()
            .filter(|t| t.role == Role::System)
            .collect();
        assert!(systems.len() >= 5, "expected full preamble, got {}", systems.len());

        // Layer order: base first, behaviour (with objective priming) second.
        assert_eq!(prompt.messages[0].content, "Eres una persona real.");
        assert!(prompt.messages[1].content.contains("OBJETIVO DE ESTA CONVERSACIÓN"));
        assert!(prompt.messages[1].content.contains("agendar demo"));

        // Strategy labelled with version, daily note, notes, RAG all present.
        let joined: String = systems.iter().map(|t| t.content.as_str()).collect::<Vec<_>>().join("\n");
        assert!(joined.contains("ESTRATEGIA ACTIVA (v1)"));
        assert!(joined.contains("promo vigente"));
        assert!(joined.contains("CONTEXTO RAG"));

        // Notes deduplicated.
        assert_eq!(joined.matches("prefiere tardes").count(), 1);

        // Tail then inbound close the list.
        let n = prompt.messages.len();
        assert_eq!(prompt.messages[n - 1], Turn::user("hola, cuéntame del producto"));
        assert_eq!(prompt.messages[n - 2], Turn::assistant("buenas"));
        assert_eq!(prompt.max_tokens, 512);
    }

    #[test]
    fn fast_path_collapses_when_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store();
        let loader = ContextLoader::new(store, opts(dir.path(), true), None);

        let prompt = loader.build("c", &[], "hola", "gpt-4o").unwrap();
        assert_eq!(prompt.messages.len(), 2);
        assert_eq!(prompt.messages[0].role, Role::System);
        assert_eq!(prompt.messages[1], Turn::user("hola"));
        assert_eq!(prompt.max_tokens, FAST_PATH_MAX_TOKENS);
    }

    #[test]
    fn greeting_still_gets_full_preamble_when_fast_path_off() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store();
        let loader = ContextLoader::new(store, opts(dir.path(), false), None);

        let prompt = loader.build("c", &[], "hola", "gpt-4o").unwrap();
        assert!(prompt.messages.len() > 2);
        assert_eq!(prompt.max_tokens, 512);
    }

    #[test]
    fn long_message_never_takes_fast_path() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store();
        let loader = ContextLoader::new(store, opts(dir.path(), true), None);

        let prompt = loader
            .build("c", &[], "hola, quiero saber todo sobre el plan empresarial", "gpt-4o")
            .unwrap();
        assert!(prompt.messages.len() > 2);
    }

    #[test]
    fn docs_and_chat_files_are_injected() {
        let dir = tempfile::tempdir().unwrap();
        let docs = dir.path().join("docs");
        std::fs::create_dir_all(&docs).unwrap();
        std::fs::write(docs.join("ejemplo_chat.txt"), "responde con humor").unwrap();

        let store = test_store();
        let chat_dir = dir.path().join("contextos").join("chat_c");
        std::fs::create_dir_all(&chat_dir).unwrap();
        // Per-chat file written encrypted; the loader must decrypt it.
        let token = store.cipher().encrypt("le gusta el cine");
        std::fs::write(chat_dir.join("perfil.txt"), token).unwrap();

        let loader = ContextLoader::new(store, opts(dir.path(), false), None);
        let prompt = loader.build("c", &[], "qué planes tienes", "gpt-4o").unwrap();

        let joined: String = prompt
            .messages
            .iter()
            .map(|t| t.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        assert!(joined.contains("responde con humor"));
        assert!(joined.contains("le gusta el cine"));
    }

    struct FailingRetriever;
    impl PassageRetriever for FailingRetriever {
        fn retrieve(&self, _q: &str, _k: usize) -> Result<Vec<String>, RetrieverError> {
            Err(RetrieverError::Failed("index offline".into()))
        }
    }

    #[test]
    fn rag_failure_is_silent() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store();
        let loader = ContextLoader::new(store, opts(dir.path(), false), Some(Arc::new(FailingRetriever)));

        let prompt = loader.build("c", &[], "cuéntame", "gpt-4o").unwrap();
        assert!(prompt
            .messages
            .iter()
            .all(|t| !t.content.contains("CONTEXTO RAG")));
    }

    #[test]
    fn budget_trim_drops_tail_then_notes_then_rag() {
        let mut preamble = vec![
            (Layer::Core, Turn::system("x".repeat(40))),
            (Layer::UserNotes, Turn::system("n".repeat(40))),
            (Layer::Rag, Turn::system("r".repeat(40))),
        ];
        let mut tail = vec![
            Turn::user("a".repeat(40)),
            Turn::assistant("b".repeat(40)),
        ];

        // Budget fits core + one more layer only (5 × 10 tokens − inbound ≈ 0).
        trim_to_budget(&mut preamble, &mut tail, "", 25);
        assert!(tail.is_empty(), "tail drops first");
        assert!(preamble.iter().all(|(l, _)| *l != Layer::UserNotes), "notes drop second");
        assert!(preamble.iter().any(|(l, _)| *l == Layer::Rag), "rag survives while budget allows");

        // Tighter budget takes RAG too, but never core.
        trim_to_budget(&mut preamble, &mut tail, "", 10);
        assert!(preamble.iter().all(|(l, _)| *l != Layer::Rag));
        assert!(preamble.iter().any(|(l, _)| *l == Layer::Core));
    }
}
