pub mod inbound;
pub mod orchestrator;
pub mod outbound;

pub use inbound::InboundLoop;
pub use orchestrator::{Orchestrator, RuntimeFlags};
pub use outbound::{OutboundQueue, QueueEntry, QueueStatus};
