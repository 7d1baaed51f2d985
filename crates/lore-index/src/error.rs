/// Errors raised by vector index backends.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// The backend could not be reached or rejected the client configuration.
    #[error("connection error: {0}")]
    Connection(String),

    /// Collection creation or inspection failed.
    #[error("collection error: {0}")]
    Collection(String),

    #[error("upsert error: {0}")]
    Upsert(String),

    #[error("search error: {0}")]
    Search(String),

    #[error("delete error: {0}")]
    Delete(String),

    #[error("scroll error: {0}")]
    Scroll(String),

    /// A chunk reached the index without an embedding.
    #[error("chunk {id} has no vector")]
    MissingVector { id: String },

    /// A vector length differs from the collection dimension.
    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, IndexError>;
