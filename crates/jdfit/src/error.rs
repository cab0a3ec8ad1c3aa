use thiserror::Error;

use crate::types::DocumentRole;

pub type Result<T> = std::result::Result<T, AlignError>;

#[derive(Debug, Error)]
pub enum AlignError {
    #[error("both reference and candidate text must be provided")]
    MissingInput,

    #[error("{role} document contains no valid text units")]
    NoValidContent { role: DocumentRole },

    #[error("{role} side has {units} units but {embeddings} embeddings")]
    EmbeddingCountMismatch {
        role: DocumentRole,
        units: usize,
        embeddings: usize,
    },

    #[error("embedding dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("{role} embedding {position} has a NaN or infinite component")]
    NonFiniteEmbedding { role: DocumentRole, position: usize },

    #[error("indexed vector {position} has a NaN or infinite component")]
    NonFiniteVector { position: usize },

    #[error("query vector has a NaN or infinite component")]
    NonFiniteQuery,

    #[error(transparent)]
    Embedding(#[from] anyhow::Error),
}

impl AlignError {
    /// True for errors caused by the caller's input rather than a bug or a backend failure.
    pub fn is_input_error(&self) -> bool {
        matches!(self, Self::MissingInput | Self::NoValidContent { .. })
    }
}
