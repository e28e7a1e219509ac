use sluice_engine::StxError;
use thiserror::Error;

/// Errors raised by the [`crate::Transformer`] front-end.
#[derive(Error, Debug)]
pub enum TransformError {
    #[error(transparent)]
    Engine(#[from] StxError),

    #[error("cannot read '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid job description: {0}")]
    Job(#[from] serde_json::Error),

    #[error("unknown parameter value type for '{0}'")]
    Parameter(String),
}

impl TransformError {
    /// The engine error behind this one, if any.
    pub fn engine(&self) -> Option<&StxError> {
        match self {
            TransformError::Engine(e) => Some(e),
            _ => None,
        }
    }
}
