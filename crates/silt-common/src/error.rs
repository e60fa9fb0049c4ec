use thiserror::Error;

/// Top-level error type for the silt storage engine.
/// Each variant corresponds to a distinct failure class surfaced
/// by the storage layer.
#[derive(Error, Debug)]
pub enum SiltError {
    #[error("storage error: {0}")]
    Storage(String),

    #[error("buffer pool exhausted: all frames are pinned")]
    PoolExhausted,

    #[error("io error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("internal error: {0}")]
    Internal(String),
}

pub type SiltResult<T> = Result<T, SiltError>;
