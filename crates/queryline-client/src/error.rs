//! Client error types.

use queryline_timeline::TimelineError;

/// Failure raised by a [`Transport`](crate::Transport).
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("transport error: {0}")]
    Other(String),
}

/// Failure of a batched operation.
///
/// `Clone` so a whole-chunk failure can reject every operation in the chunk
/// with the same value.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BatchError {
    /// The aggregate response carried a top-level error object.
    #[error("batch processing failed: {code}: {message}")]
    BatchProcessing { code: String, message: String },

    /// One fragment came back with a non-2xx status.
    #[error("batched request {id} failed with status {status}")]
    Item {
        id: String,
        status: u16,
        body: Option<serde_json::Value>,
    },

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The aggregate call itself returned a non-2xx status.
    #[error("batch endpoint returned status {status}")]
    Status { status: u16, body: Option<String> },

    #[error("malformed batch response: {0}")]
    MalformedResponse(String),

    /// The response carried no fragment for this id.
    #[error("no response for batched request {id}")]
    MissingResponse { id: String },

    /// A request body could not be parsed as JSON while encoding.
    #[error("request {id} has a body that is not valid JSON: {reason}")]
    InvalidBody { id: String, reason: String },

    /// The aggregate envelope could not be serialized.
    #[error("failed to serialize batch request: {0}")]
    Encode(String),

    /// The queue already started draining.
    #[error("batch is already flushing; no new requests can join it")]
    Draining,

    /// The queue was dropped before this operation was transmitted.
    #[error("batch was dropped before the request was sent")]
    Dropped,
}

impl From<BatchError> for TimelineError {
    fn from(err: BatchError) -> Self {
        TimelineError::observer(err)
    }
}

impl From<TransportError> for TimelineError {
    fn from(err: TransportError) -> Self {
        TimelineError::observer(err)
    }
}

/// Non-2xx response surfaced by the stock JSON parser.
#[derive(Debug, Clone, thiserror::Error)]
#[error("request failed with status {status}")]
pub struct HttpStatusError {
    pub status: u16,
    pub body: Option<String>,
}

impl From<HttpStatusError> for TimelineError {
    fn from(err: HttpStatusError) -> Self {
        TimelineError::observer(err)
    }
}

/// Failure of [`Query::execute`](crate::Query::execute).
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error(transparent)]
    Timeline(#[from] TimelineError),

    /// A moment failed and an error observer consumed the failure, so the
    /// pipeline had nothing to continue with.
    #[error("query halted at `{moment}` after a handled failure")]
    Halted { moment: &'static str },
}

impl QueryError {
    /// Find a typed cause, e.g. a [`BatchError`] or [`HttpStatusError`].
    pub fn find<E>(&self) -> Option<&E>
    where
        E: std::error::Error + 'static,
    {
        match self {
            Self::Timeline(err) => err.find::<E>(),
            Self::Halted { .. } => None,
        }
    }
}
