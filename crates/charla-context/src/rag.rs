use thiserror::Error;

/// How many passages the loader asks for by default.
pub const DEFAULT_TOP_K: usize = 3;

#[derive(Debug, Error)]
pub enum RetrieverError {
    #[error("retrieval failed: {0}")]
    Failed(String),
}

/// Seam to the vector index. The index itself lives outside this crate; the
/// loader only needs "top-k passages for this query" and silently drops the
/// RAG layer when retrieval fails or no retriever is wired.
pub trait PassageRetriever: Send + Sync {
    fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<String>, RetrieverError>;
}

/// Fixed-passage retriever for tests and offline runs.
pub struct StaticRetriever {
    passages: Vec<String>,
}

impl StaticRetriever {
    pub fn new(passages: Vec<String>) -> Self {
        Self { passages }
    }
}

impl PassageRetriever for StaticRetriever {
    fn retrieve(&self, _query: &str, top_k: usize) -> Result<Vec<String>, RetrieverError> {
        Ok(self.passages.iter().take(top_k).cloned().collect())
    }
}
