use async_trait::async_trait;
use fundrag_core::RetrievalError;

/// Turns a query string into a fixed-dimension vector.
///
/// Implementations must use the same model the index was built with;
/// `model_id` is what the retriever compares against the index.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, RetrievalError>;

    /// Model identifier, e.g. "all-MiniLM-L6-v2"
    fn model_id(&self) -> &str;

    fn dimension(&self) -> usize;

    /// Get provider name for identification
    fn provider_name(&self) -> &str;

    /// Check if provider is reachable
    async fn is_available(&self) -> bool {
        true
    }
}

/// Compare two model identifiers, ignoring case and any namespace prefix
/// such as "sentence-transformers/".
pub fn same_embedding_model(a: &str, b: &str) -> bool {
    fn base(model: &str) -> &str {
        model.trim().rsplit('/').next().unwrap_or(model)
    }
    base(a).eq_ignore_ascii_case(base(b))
}
