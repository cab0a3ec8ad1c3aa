pub mod download;
pub mod minilm;

pub use minilm::{MiniLmConfig, MiniLmEmbeddings};

use anyhow::Result;

/// Maps text to fixed-dimension vectors.
///
/// Output vectors need not be unit length; the search side normalizes.
pub trait EmbeddingModel: Send + Sync {
    /// Embed a single unit of text
    fn embed_document(&self, text: &str) -> Result<Vec<f32>>;

    /// Batch embed, one vector per input in input order. Empty in, empty out.
    fn embed_documents(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed_document(t)).collect()
    }

    /// Embedding vector dimension
    fn dimension(&self) -> usize;
}
