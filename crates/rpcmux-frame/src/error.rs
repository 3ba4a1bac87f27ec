/// Errors that can occur while parsing or encoding frames.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The outer envelope is not a JSON object of the expected shape.
    #[error("malformed frame: {0}")]
    Malformed(#[source] serde_json::Error),

    /// The frame has neither a method nor an id.
    #[error("ambiguous frame: neither method nor id present")]
    Ambiguous,

    /// A request frame also carries a result or an error.
    #[error("request frame carries a result or error")]
    RequestWithResult,

    /// The raw frame exceeds the configured size limit.
    #[error("frame too large ({size} bytes, max {max})")]
    TooLarge { size: usize, max: usize },

    /// The frame could not be serialized.
    #[error("failed to encode frame: {0}")]
    Encode(#[source] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, FrameError>;
