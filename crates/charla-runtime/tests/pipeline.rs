//! End-to-end pipeline scenarios over a scripted browser surface and a
//! scripted generator — no network, no Chromium.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use charla_agent::{
    FinishReason, GenerateReply, GenerateRequest, Generator, GeneratorError, Registry, TokenUsage,
    TurnRouter,
};
use charla_context::{emergency, ContextLoader, LoaderOptions};
use charla_core::config::ModelSeed;
use charla_core::types::Role;
use charla_driver::{ChatSurface, DriverError, InboxEntry, IncomingMessage};
use charla_reasoner::{ReasonerSettings, StrategyReasoner};
use charla_runtime::inbound::{InboundLoop, TickFlags};
use charla_runtime::outbound::{self, OutboundQueue, QueueStatus};
use charla_store::types::ProfilePatch;
use charla_store::{ContextCipher, Store};

// --- scripted surface -------------------------------------------------------

#[derive(Default)]
struct SurfaceState {
    inbox: Vec<InboxEntry>,
    incoming: HashMap<String, IncomingMessage>,
    opened: Vec<String>,
    sent: Vec<String>,
    found: Vec<String>,
    fail_find: bool,
}

#[derive(Default)]
struct FakeSurface {
    state: Mutex<SurfaceState>,
}

impl FakeSurface {
    fn with_unread(chat_id: &str, text: &str) -> Self {
        let surface = FakeSurface::default();
        {
            let mut s = surface.state.lock().unwrap();
            s.inbox = vec![InboxEntry {
                chat_id: chat_id.to_string(),
                unread: 1,
            }];
            s.incoming.insert(
                chat_id.to_string(),
                IncomingMessage {
                    from_us: false,
                    text: Some(text.to_string()),
                },
            );
        }
        surface
    }

    fn opened(&self) -> Vec<String> {
        self.state.lock().unwrap().opened.clone()
    }

    fn sent(&self) -> Vec<String> {
        self.state.lock().unwrap().sent.clone()
    }
}

impl ChatSurface for FakeSurface {
    fn wait_for_ready(&self, _timeout: Duration) -> charla_driver::Result<()> {
        Ok(())
    }

    fn scan_inbox(&self) -> charla_driver::Result<Vec<InboxEntry>> {
        Ok(self.state.lock().unwrap().inbox.clone())
    }

    fn open_chat(&self, chat_id: &str) -> charla_driver::Result<()> {
        let mut s = self.state.lock().unwrap();
        s.opened.push(chat_id.to_string());
        Ok(())
    }

    fn read_last_incoming(&self) -> charla_driver::Result<Option<IncomingMessage>> {
        let s = self.state.lock().unwrap();
        let current = s.opened.last().cloned().unwrap_or_default();
        Ok(s.incoming.get(&current).cloned())
    }

    fn type_and_send(&self, text: &str, _delay: Duration) -> charla_driver::Result<()> {
        self.state.lock().unwrap().sent.push(text.to_string());
        Ok(())
    }

    fn exit_chat(&self) -> charla_driver::Result<()> {
        Ok(())
    }

    fn find_and_open_chat(&self, chat_id: &str) -> charla_driver::Result<()> {
        let mut s = self.state.lock().unwrap();
        if s.fail_find {
            return Err(DriverError::SelectorMissed {
                operation: "find_and_open_chat",
            });
        }
        s.found.push(chat_id.to_string());
        Ok(())
    }
}

// --- scripted generator -----------------------------------------------------

enum Scripted {
    Reply(&'static str),
    RateLimited(u64),
}

struct ScriptedGenerator {
    script: Mutex<VecDeque<Scripted>>,
    requests: Mutex<Vec<GenerateRequest>>,
}

impl ScriptedGenerator {
    fn new(script: Vec<Scripted>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, req: &GenerateRequest) -> Result<GenerateReply, GeneratorError> {
        self.requests.lock().unwrap().push(req.clone());
        match self.script.lock().unwrap().pop_front() {
            Some(Scripted::Reply(text)) => Ok(GenerateReply {
                content: text.to_string(),
                usage: TokenUsage::default(),
                finish_reason: FinishReason::Stop,
            }),
            Some(Scripted::RateLimited(secs)) => Err(GeneratorError::RateLimited {
                retry_after: Some(Duration::from_secs(secs)),
            }),
            None => Ok(GenerateReply {
                content: "sin guión".to_string(),
                usage: TokenUsage::default(),
                finish_reason: FinishReason::Stop,
            }),
        }
    }
}

// --- harness ----------------------------------------------------------------

struct Harness {
    store: Arc<Store>,
    generator: Arc<ScriptedGenerator>,
    inbound: InboundLoop,
    _dir: tempfile::TempDir,
}

fn harness(script: Vec<Scripted>, strategy_refresh_every: u32) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let cipher = ContextCipher::new(&[5u8; 32]).unwrap();
    let store = Arc::new(Store::in_memory(cipher).unwrap());
    store
        .sync_routing(
            &[ModelSeed {
                name: "modelo-base".into(),
                provider: "scripted".into(),
                config: None,
                active: true,
            }],
            &[],
        )
        .unwrap();

    let generator = Arc::new(ScriptedGenerator::new(script));
    let registry = Arc::new(Registry::with_generators(vec![(
        "scripted".to_string(),
        Arc::clone(&generator) as Arc<dyn Generator>,
    )]));

    let loader = Arc::new(ContextLoader::new(
        Arc::clone(&store),
        LoaderOptions {
            base_system: "Eres una persona real.".into(),
            docs_dir: dir.path().join("docs"),
            contextos_dir: dir.path().join("contextos"),
            fast_path: false,
            max_tokens: 512,
            temperature: 0.7,
        },
        None,
    ));

    let reasoner = Arc::new(StrategyReasoner::new(
        Arc::clone(&store),
        Arc::clone(&registry),
        ReasonerSettings {
            model: None,
            max_tokens: 256,
            timeout: Duration::from_secs(5),
            history_turns: 40,
            contextos_dir: dir.path().join("contextos"),
        },
    ));

    let inbound = InboundLoop::new(
        Arc::clone(&store),
        registry,
        TurnRouter::new(Arc::clone(&store)),
        loader,
        reasoner,
        chrono::Duration::minutes(2),
        strategy_refresh_every,
        Duration::ZERO,
    );

    Harness {
        store,
        generator,
        inbound,
        _dir: dir,
    }
}

fn enable_chat(store: &Store, chat_id: &str) {
    store
        .add_or_update_contact(chat_id, Some("Laura"), Some(true))
        .unwrap();
    store
        .upsert_profile(
            chat_id,
            ProfilePatch {
                objective: Some("agendar demo".into()),
                is_ready: Some(true),
                ..ProfilePatch::default()
            },
        )
        .unwrap();
}

fn default_flags() -> TickFlags {
    TickFlags {
        respond_to_all: false,
        require_contact_profile: true,
    }
}

// --- scenarios --------------------------------------------------------------

#[tokio::test]
async fn happy_path_replies_and_stamps() {
    let mut h = harness(vec![Scripted::Reply("¡Claro! El producto hace maravillas.")], 10);
    enable_chat(&h.store, "+57 300");
    let surface = FakeSurface::with_unread("+57 300", "hola, cuéntame del producto");

    let replied = h.inbound.tick(&surface, default_flags()).await.unwrap();
    assert!(replied);
    assert_eq!(surface.sent(), vec!["¡Claro! El producto hace maravillas."]);

    let counter = h.store.get_counter("+57 300").unwrap();
    assert_eq!(counter.assistant_replies_count, 1);
    assert!(counter.last_reply_at.is_some());

    let history = h.store.load_last_context("+57 300").unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].role, Role::User);
    assert_eq!(history[1].role, Role::Assistant);

    // The composed preamble reached the generator with the objective block.
    let requests = h.generator.requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    let systems = requests[0]
        .messages
        .iter()
        .filter(|t| t.role == Role::System)
        .count();
    assert!(systems >= 2);
    assert!(requests[0]
        .messages
        .iter()
        .any(|t| t.content.contains("agendar demo")));
}

#[tokio::test]
async fn banned_reply_is_retried_with_corrective_system() {
    let mut h = harness(
        vec![
            Scripted::Reply("Como asistente virtual, estoy aquí para ayudarte."),
            Scripted::Reply("Claro, el producto te va a encantar. ¿Qué quieres saber?"),
        ],
        10,
    );
    enable_chat(&h.store, "c");
    let surface = FakeSurface::with_unread("c", "hola, cuéntame del producto");

    h.inbound.tick(&surface, default_flags()).await.unwrap();
    assert_eq!(
        surface.sent(),
        vec!["Claro, el producto te va a encantar. ¿Qué quieres saber?"]
    );

    let requests = h.generator.requests.lock().unwrap();
    assert_eq!(requests.len(), 2);
    assert!(requests[1]
        .messages
        .iter()
        .any(|t| t.content.contains("CORRECCIÓN URGENTE")));
    // The corrective system sits before the final user turn.
    assert_eq!(requests[1].messages.last().unwrap().role, Role::User);
}

#[tokio::test]
async fn double_rejection_sends_emergency_reply() {
    let inbound_text = "hola, cuéntame del producto";
    let mut h = harness(
        vec![
            Scripted::Reply("Soy un asistente virtual."),
            Scripted::Reply("Como modelo, no puedo."),
        ],
        10,
    );
    enable_chat(&h.store, "c");
    let surface = FakeSurface::with_unread("c", inbound_text);

    h.inbound.tick(&surface, default_flags()).await.unwrap();
    assert_eq!(surface.sent(), vec![emergency::emergency_reply(inbound_text)]);

    // The emergency turn still counts as a committed assistant reply.
    assert_eq!(h.store.get_counter("c").unwrap().assistant_replies_count, 1);
}

#[tokio::test]
async fn cooldown_skips_before_any_dom_work() {
    let mut h = harness(vec![Scripted::Reply("no debería salir")], 10);
    enable_chat(&h.store, "c");
    h.store.stamp_last_reply("c", chrono::Utc::now()).unwrap();
    let surface = FakeSurface::with_unread("c", "hola");

    let replied = h.inbound.tick(&surface, default_flags()).await.unwrap();
    assert!(!replied);
    assert!(surface.opened().is_empty(), "chat must not be opened during cooldown");
    assert!(surface.sent().is_empty());
}

#[tokio::test]
async fn own_message_is_never_answered() {
    let mut h = harness(vec![Scripted::Reply("no debería salir")], 10);
    enable_chat(&h.store, "c");
    let surface = FakeSurface::default();
    {
        let mut s = surface.state.lock().unwrap();
        s.inbox = vec![InboxEntry {
            chat_id: "c".into(),
            unread: 2,
        }];
        s.incoming.insert(
            "c".into(),
            IncomingMessage {
                from_us: true,
                text: Some("mensaje nuestro".into()),
            },
        );
    }

    let replied = h.inbound.tick(&surface, default_flags()).await.unwrap();
    assert!(!replied);
    assert_eq!(surface.opened(), vec!["c"]);
    assert!(surface.sent().is_empty());
    assert_eq!(h.store.get_counter("c").unwrap().assistant_replies_count, 0);
}

#[tokio::test]
async fn disabled_contact_is_skipped_unless_respond_to_all() {
    let mut h = harness(vec![Scripted::Reply("hola!")], 10);
    // No contact, no profile.
    let surface = FakeSurface::with_unread("desconocido", "hola, ¿quién eres?");

    let replied = h.inbound.tick(&surface, default_flags()).await.unwrap();
    assert!(!replied);
    assert!(surface.opened().is_empty());

    // respond_to_all bypasses enablement.
    let replied = h
        .inbound
        .tick(
            &surface,
            TickFlags {
                respond_to_all: true,
                require_contact_profile: true,
            },
        )
        .await
        .unwrap();
    assert!(replied);
    assert_eq!(surface.sent().len(), 1);
}

#[tokio::test]
async fn rate_limit_defers_the_chat() {
    let mut h = harness(
        vec![Scripted::RateLimited(60), Scripted::Reply("tarde")],
        10,
    );
    enable_chat(&h.store, "c");
    let surface = FakeSurface::with_unread("c", "hola, cuéntame");

    // First tick: generator rate-limits; nothing is sent or persisted.
    h.inbound.tick(&surface, default_flags()).await.unwrap();
    assert!(surface.sent().is_empty());
    assert_eq!(h.store.get_counter("c").unwrap().assistant_replies_count, 0);
    assert!(h.store.load_last_context("c").unwrap().is_empty());

    // Second tick within the retry window: the chat is not even opened again.
    let opened_before = surface.opened().len();
    let replied = h.inbound.tick(&surface, default_flags()).await.unwrap();
    assert!(!replied);
    assert_eq!(surface.opened().len(), opened_before);
}

#[tokio::test]
async fn counter_threshold_triggers_reasoner() {
    let mut h = harness(
        vec![
            Scripted::Reply("primera respuesta natural"),
            // The analyst call served by the same scripted generator.
            Scripted::Reply(
                r#"{"estrategia":"preguntar por presupuesto","contexto_prioritario":"cliente evalúa","perfil_update":"prefiere tardes"}"#,
            ),
        ],
        1,
    );
    enable_chat(&h.store, "c");
    let surface = FakeSurface::with_unread("c", "hola, cuéntame del producto");

    h.inbound.tick(&surface, default_flags()).await.unwrap();
    assert_eq!(surface.sent().len(), 1);

    // The refresh runs in a spawned task; give it a moment.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let counter = h.store.get_counter("c").unwrap();
    assert_eq!(counter.assistant_replies_count, 0, "counter reset after refresh trigger");
    assert_eq!(counter.strategy_version, 1);
    let active = h.store.get_active_strategy("c").unwrap().unwrap();
    assert_eq!(active.strategy_text, "preguntar por presupuesto");
    assert!(active.is_active);
}

// --- outbound through the same surface --------------------------------------

#[test]
fn outbound_success_marks_sent() {
    let dir = tempfile::tempdir().unwrap();
    let queue = OutboundQueue::new(dir.path().join("manual_queue.json"));
    queue.enqueue("+57 300", "Recordatorio").unwrap();
    let surface = FakeSurface::default();

    let result = outbound::drain_one(&queue, &surface, Duration::ZERO);
    assert_eq!(result, Some(true));
    assert_eq!(surface.state.lock().unwrap().found, vec!["+57 300"]);
    assert_eq!(surface.sent(), vec!["Recordatorio"]);

    let entry = queue.entries().into_iter().next().unwrap();
    assert_eq!(entry.status, QueueStatus::Sent);
    assert!(entry.sent_at.is_some());
}

#[test]
fn outbound_driver_failure_marks_failed() {
    let dir = tempfile::tempdir().unwrap();
    let queue = OutboundQueue::new(dir.path().join("manual_queue.json"));
    queue.enqueue("+57 300", "Recordatorio").unwrap();
    let surface = FakeSurface::default();
    surface.state.lock().unwrap().fail_find = true;

    let result = outbound::drain_one(&queue, &surface, Duration::ZERO);
    assert_eq!(result, Some(false));

    let entry = queue.entries().into_iter().next().unwrap();
    assert_eq!(entry.status, QueueStatus::Failed);
    assert!(entry.failed_at.is_some());
}

#[test]
fn empty_queue_is_a_quiet_tick() {
    let dir = tempfile::tempdir().unwrap();
    let queue = OutboundQueue::new(dir.path().join("manual_queue.json"));
    let surface = FakeSurface::default();
    assert_eq!(outbound::drain_one(&queue, &surface, Duration::ZERO), None);
    assert!(surface.sent().is_empty());
}
