use thiserror::Error;

/// Outcome taxonomy of a JSON-RPC call, mirroring what the link delivers
/// in-band, to a synchronous waiter, or to an asynchronous callback.
#[derive(Debug, Error)]
pub enum CallError {
    /// The channel is not open.
    #[error("Channel unavailable")]
    Unavailable,
    /// The channel is suspended; no new calls are accepted.
    #[error("Channel suspended")]
    AsyncFailed,
    /// No response arrived within the wait time.
    #[error("Call timed out")]
    Timeout,
    /// The channel closed while the call was outstanding.
    #[error("Pending call has been aborted")]
    Aborted,
    /// The inbound payload could not be parsed to a known shape.
    #[error("Invalid message signature")]
    InvalidSignature,
    /// The peer answered with a JSON-RPC error object, surfaced verbatim.
    #[error(transparent)]
    Remote(#[from] framewire_types::Error),
    /// Json serialization/deserialization error.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    /// Internal channel error.
    #[error("Internal channel error")]
    InternalChannel,
}

impl CallError {
    /// The remote error code, when the peer rejected the call.
    pub fn remote_code(&self) -> Option<i64> {
        match self {
            CallError::Remote(error) => Some(error.code.code()),
            _ => None,
        }
    }
}
