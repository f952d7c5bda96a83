//! Top-level scheduler: interleaves inbound scans and outbound drains in a
//! single cooperative loop, honouring the global pause flag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, warn};

use charla_core::config::AutomatorConfig;
use charla_driver::ChatSurface;

use crate::inbound::{InboundLoop, TickError, TickFlags};
use crate::outbound::{self, OutboundQueue};

/// Global mutable flags. Only the orchestrator reads them — sub-components
/// get a per-tick copy, so no hidden control flow lives deeper in the stack.
pub struct RuntimeFlags {
    automation_active: AtomicBool,
    respond_to_all: AtomicBool,
    require_contact_profile: AtomicBool,
}

impl RuntimeFlags {
    pub fn from_config(cfg: &AutomatorConfig) -> Self {
        Self {
            automation_active: AtomicBool::new(cfg.automation_active),
            respond_to_all: AtomicBool::new(cfg.respond_to_all),
            require_contact_profile: AtomicBool::new(cfg.require_contact_profile),
        }
    }

    pub fn automation_active(&self) -> bool {
        self.automation_active.load(Ordering::Relaxed)
    }

    pub fn set_automation_active(&self, active: bool) {
        self.automation_active.store(active, Ordering::Relaxed);
    }

    pub fn tick_flags(&self) -> TickFlags {
        TickFlags {
            respond_to_all: self.respond_to_all.load(Ordering::Relaxed),
            require_contact_profile: self.require_contact_profile.load(Ordering::Relaxed),
        }
    }
}

pub struct Orchestrator {
    inbound: InboundLoop,
    queue: OutboundQueue,
    flags: Arc<RuntimeFlags>,
    check_interval: Duration,
    typing_delay: Duration,
    emergency_halt_threshold: u32,
    consecutive_driver_failures: u32,
}

impl Orchestrator {
    pub fn new(
        inbound: InboundLoop,
        queue: OutboundQueue,
        flags: Arc<RuntimeFlags>,
        cfg: &AutomatorConfig,
    ) -> Self {
        Self {
            inbound,
            queue,
            flags,
            check_interval: Duration::from_secs_f64(cfg.message_check_interval.max(0.1)),
            typing_delay: Duration::from_secs_f64(cfg.typing_per_char.max(0.0)),
            emergency_halt_threshold: cfg.emergency_halt_threshold,
            consecutive_driver_failures: 0,
        }
    }

    /// Main loop. Finishes the current tick and returns when `shutdown`
    /// flips to true.
    pub async fn run(mut self, surface: &dyn ChatSurface, mut shutdown: watch::Receiver<bool>) {
        info!("orchestrator started");
        loop {
            if *shutdown.borrow() {
                break;
            }

            if self.flags.automation_active() {
                self.tick(surface).await;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.check_interval) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.defer_outbound();
        info!("orchestrator stopped");
    }

    /// One cycle: inbound scan, then at most one outbound delivery.
    async fn tick(&mut self, surface: &dyn ChatSurface) {
        match self.inbound.tick(surface, self.flags.tick_flags()).await {
            Ok(_replied) => {
                self.consecutive_driver_failures = 0;
            }
            Err(TickError::Driver(e)) => {
                self.consecutive_driver_failures += 1;
                error!(
                    error = %e,
                    consecutive = self.consecutive_driver_failures,
                    "driver failure during inbound tick"
                );
                if self.consecutive_driver_failures >= self.emergency_halt_threshold {
                    warn!("emergency halt: too many consecutive driver failures, pausing automation");
                    self.flags.set_automation_active(false);
                }
                return;
            }
            Err(TickError::Store(e)) => {
                // Abort this tick cleanly; the next tick retries.
                error!(error = %e, "store failure during inbound tick");
                return;
            }
        }

        if outbound::drain_one(&self.queue, surface, self.typing_delay).is_some() {
            info!("outbound tick processed one entry");
        }
    }

    /// Shutdown path: park pending operator messages in the sidecar.
    fn defer_outbound(&self) {
        match self.queue.defer_pending_on_stop() {
            Ok(0) => {}
            Ok(n) => info!(count = n, "outbound entries deferred on stop"),
            Err(e) => error!(error = %e, "could not defer outbound queue"),
        }
    }
}
