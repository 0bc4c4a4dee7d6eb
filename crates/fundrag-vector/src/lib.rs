pub mod factory;
pub mod hashing_embedding_provider;
pub mod index;
pub mod ollama_embedding_provider;
pub mod openai_embedding_provider;
pub mod providers;
pub mod retriever;

pub use factory::create_embedding_provider;
pub use hashing_embedding_provider::HashingEmbeddingProvider;
pub use index::{cosine_similarity, IndexRecord, IndexSnapshot, InMemoryVectorIndex};
pub use ollama_embedding_provider::{OllamaEmbeddingConfig, OllamaEmbeddingProvider};
pub use openai_embedding_provider::{OpenAIEmbeddingConfig, OpenAIEmbeddingProvider};
pub use providers::{same_embedding_model, EmbeddingProvider};
pub use retriever::{preprocess_query, Retriever};
