pub mod alignment;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod processing;
pub mod search;
pub mod types;

// Re-export primary types for convenience
pub use alignment::{AlignmentEngine, SemanticMatcher};
pub use config::{AlignConfig, DEFAULT_MATCH_THRESHOLD};
pub use embeddings::EmbeddingModel;
pub use error::AlignError;
pub use processing::Segmenter;
pub use search::{FlatIndex, Neighbor, VectorIndex};
pub use types::{AlignmentResult, DocumentRole, MatchRecord, TextUnit};
