use std::fmt;
use thiserror::Error;

/// Collaborator stage that raised a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Extract,
    Embed,
    Generate,
    Tokenize,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Extract => "text extraction",
            Stage::Embed => "embedding",
            Stage::Generate => "generation",
            Stage::Tokenize => "tokenization",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum RagError {
    #[error("Nothing to index or search: {0}")]
    EmptyInput(String),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Cache entry corrupt: {0}")]
    CacheCorrupt(String),

    #[error("{stage} failed: {source}")]
    Collaborator {
        stage: Stage,
        #[source]
        source: anyhow::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RagError {
    pub fn collaborator(stage: Stage, source: impl Into<anyhow::Error>) -> Self {
        RagError::Collaborator {
            stage,
            source: source.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, RagError>;
