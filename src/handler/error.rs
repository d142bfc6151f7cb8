use crate::collection::CollectionError;
use crate::sync::SyncError;

/// Request-level failure of a collection handler
#[derive(Debug)]
pub enum HandlerError {
    /// Target id of a write does not exist
    NotFound(String),
    /// A foreign key field does not reference an existing record
    ForeignKeyViolation {
        field: &'static str,
        value: String,
        message: &'static str,
    },
    /// Request body is not a JSON object
    InvalidBody(String),
    /// Durable blob changed while the request was running
    Conflict(String),
    /// Durable blob could not be decoded
    Deserialization(String),
    /// Durable store failure
    Store(String),
    /// In-memory collection rejected a mutation
    Collection(CollectionError),
}

impl HandlerError {
    /// HTTP status code this error maps to
    pub fn status_code(&self) -> u16 {
        match self {
            HandlerError::NotFound(_) | HandlerError::ForeignKeyViolation { .. } => 404,
            HandlerError::InvalidBody(_) => 400,
            HandlerError::Conflict(_) => 409,
            HandlerError::Deserialization(_)
            | HandlerError::Store(_)
            | HandlerError::Collection(_) => 500,
        }
    }
}

impl std::fmt::Display for HandlerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HandlerError::NotFound(msg) => write!(f, "{}", msg),
            HandlerError::ForeignKeyViolation { message, .. } => write!(f, "{}", message),
            HandlerError::InvalidBody(msg) => write!(f, "Invalid request body: {}", msg),
            HandlerError::Conflict(msg) => write!(f, "{}", msg),
            HandlerError::Deserialization(msg) => write!(f, "{}", msg),
            HandlerError::Store(msg) => write!(f, "{}", msg),
            HandlerError::Collection(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for HandlerError {}

impl From<SyncError> for HandlerError {
    fn from(e: SyncError) -> Self {
        match e {
            SyncError::Conflict { .. } => HandlerError::Conflict(e.to_string()),
            SyncError::Deserialization { .. } => HandlerError::Deserialization(e.to_string()),
            SyncError::Store(_) | SyncError::Serialization(_) => HandlerError::Store(e.to_string()),
        }
    }
}

impl From<CollectionError> for HandlerError {
    fn from(e: CollectionError) -> Self {
        HandlerError::Collection(e)
    }
}
