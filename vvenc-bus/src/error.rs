use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the encoder adapter.
///
/// An access unit with zero payload bytes is not an error: it is reported as
/// `Ok` with no packet while the encoder fills or drains its lookahead.
#[derive(Error, Debug)]
pub enum Error {
    /// Bad resolution, pixel format, bit depth or a rejected encoder open.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Sample or payload buffer could not be allocated.
    #[error("allocation error: {0}")]
    Allocation(String),

    /// The encoder library failed while encoding.
    #[error("encode error: {0}")]
    Encode(String),

    /// The adapter was used outside its `Ready` state or fed a frame that does
    /// not match its configuration.
    #[error("precondition violated: {0}")]
    Precondition(String),
}

/// Failure reported by an [`EncoderBackend`](crate::backend::EncoderBackend).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message} (code {code})")]
pub struct BackendError {
    pub code: i32,
    pub message: String,
}

impl BackendError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}
