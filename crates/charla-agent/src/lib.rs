pub mod anthropic;
pub mod catalog;
pub mod generator;
pub mod gemini;
pub mod ollama;
pub mod openai;
pub mod registry;
pub mod router;

pub use generator::{
    FinishReason, GenerateReply, GenerateRequest, Generator, GeneratorError, TokenUsage,
};
pub use registry::{GeneratorInfo, Registry};
pub use router::TurnRouter;
