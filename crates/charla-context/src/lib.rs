pub mod emergency;
pub mod guard;
pub mod loader;
pub mod rag;

pub use loader::{ComposedPrompt, ContextLoader, LoaderOptions};
pub use rag::{PassageRetriever, RetrieverError, StaticRetriever};
