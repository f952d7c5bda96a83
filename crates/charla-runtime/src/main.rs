use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use charla_agent::{Registry, TurnRouter};
use charla_context::{ContextLoader, LoaderOptions};
use charla_core::CharlaConfig;
use charla_driver::{ChatSurface, WaDriver};
use charla_reasoner::{ReasonerSettings, StrategyReasoner};
use charla_runtime::{InboundLoop, Orchestrator, OutboundQueue, RuntimeFlags};
use charla_store::{ContextCipher, Store};

/// WhatsApp Web conversation agent.
#[derive(Parser, Debug)]
#[command(name = "charla", version, about)]
struct Cli {
    /// Path to charla.toml (default: ~/.charla/charla.toml).
    #[arg(short, long)]
    config: Option<String>,

    /// Force headless browser mode regardless of config.
    #[arg(long)]
    headless: bool,

    /// Run a single inbound/outbound cycle and exit (diagnostics).
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("CHARLA_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config =
        CharlaConfig::load(cli.config.as_deref()).context("loading configuration")?;
    if cli.headless {
        config.browser.headless = true;
    }

    // Secrets resolve once; rotation requires a restart.
    let cipher = ContextCipher::from_env_or_file(&PathBuf::from(&config.paths.key_file))
        .context("resolving context encryption key")?;

    let store = Arc::new(Store::open(&config.database.path, cipher).context("opening store")?);
    store
        .sync_routing(&config.models, &config.rules)
        .context("syncing model routing config")?;

    let registry = Arc::new(Registry::from_config(&config.providers));
    for generator in registry.list_available() {
        info!(
            name = %generator.name,
            available = generator.available,
            "generator slot"
        );
    }

    let loader = Arc::new(ContextLoader::new(
        Arc::clone(&store),
        LoaderOptions {
            base_system: config.prompts.base_system.clone(),
            docs_dir: PathBuf::from(&config.paths.docs_dir),
            contextos_dir: PathBuf::from(&config.paths.contextos_dir),
            fast_path: config.automator.fast_path,
            max_tokens: config.prompts.max_tokens,
            temperature: config.prompts.temperature,
        },
        None,
    ));

    let reasoner = Arc::new(StrategyReasoner::new(
        Arc::clone(&store),
        Arc::clone(&registry),
        ReasonerSettings {
            model: config.reasoner.model.clone(),
            max_tokens: config.reasoner.max_tokens,
            timeout: Duration::from_secs(config.reasoner.timeout_secs),
            history_turns: config.reasoner.history_turns,
            contextos_dir: PathBuf::from(&config.paths.contextos_dir),
        },
    ));

    let queue = OutboundQueue::new(&config.paths.queue_file);
    match queue.recover_deferred() {
        Ok(0) => {}
        Ok(n) => info!(count = n, "recovered deferred outbound messages"),
        Err(e) => warn!(error = %e, "could not recover deferred outbound messages"),
    }

    let driver = WaDriver::launch(&config.browser).context("launching browser driver")?;
    driver
        .wait_for_ready(Duration::from_secs(config.browser.navigation_timeout_secs))
        .context("waiting for WhatsApp Web")?;

    let flags = Arc::new(RuntimeFlags::from_config(&config.automator));
    let mut inbound = InboundLoop::new(
        Arc::clone(&store),
        Arc::clone(&registry),
        TurnRouter::new(Arc::clone(&store)),
        loader,
        reasoner,
        config.cooldown(),
        config.automator.strategy_refresh_every,
        Duration::from_secs_f64(config.automator.typing_per_char.max(0.0)),
    );

    if cli.once {
        let replied = inbound
            .tick(&driver, flags.tick_flags())
            .await
            .context("inbound tick")?;
        info!(replied, "single cycle complete");
        driver.shutdown(config.automator.keep_browser_open_on_exit);
        return Ok(());
    }

    let orchestrator = Orchestrator::new(inbound, queue, Arc::clone(&flags), &config.automator);

    // Ctrl-C finishes the current tick, then the loop exits cleanly.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    orchestrator.run(&driver, shutdown_rx).await;

    driver.shutdown(config.automator.keep_browser_open_on_exit);
    info!("charla stopped");
    Ok(())
}
