use thiserror::Error;

/// Result type for engram operations
pub type Result<T> = std::result::Result<T, Error>;

/// A single per-entry validation failure reported back to clients.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Main error type for engram operations
#[derive(Error, Debug)]
pub enum Error {
    /// I/O related errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Entity or store lookup failures
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Attempt to create a store that already exists
    #[error("Store already exists: {0}")]
    StoreExists(String),

    /// Ingest found an entry content-identical to an existing one
    #[error("Duplicate lore entry: {0}")]
    DuplicateLore(String),

    /// Embedding generation errors
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// The embedding provider is not configured or unreachable
    #[error("Embedding provider unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// Storage related errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// No snapshot file exists yet for the store
    #[error("Snapshot not available")]
    SnapshotNotAvailable,

    /// Another snapshot generation is already running for the store
    #[error("Snapshot generation already in progress")]
    SnapshotInProgress,

    /// Client schema is ahead of the server's
    #[error("Schema mismatch: client at {client_version}, server at {server_version}")]
    SchemaMismatch {
        client_version: i64,
        server_version: i64,
    },

    /// The requested delta window has been compacted away; the client
    /// must re-bootstrap from a snapshot
    #[error("Change log compacted past sequence {horizon}; requested after {requested}")]
    CompactedLog { requested: i64, horizon: i64 },

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Per-field validation failures for a whole request
    #[error("Validation failed: {} error(s)", .0.len())]
    Validation(Vec<FieldError>),

    /// Per-entry push validation failures (all-or-nothing rejection)
    #[error("Push validation failed: {} error(s)", .0.len())]
    PushValidation(Vec<crate::sync::PushEntryError>),

    /// Generic error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Any other error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Creates a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Creates a not-found error for the given entity kind
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Creates an embedding error
    pub fn embedding(msg: impl Into<String>) -> Self {
        Self::Embedding(msg.into())
    }

    /// Creates a storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Creates an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// True when the error maps to a 404 at the HTTP boundary
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Adds context to any error
    pub fn with_context<E>(context: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::WithContext {
            context: context.into(),
            source: Box::new(source),
        }
    }
}

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| Error::with_context(context, e))
    }
}
