use crate::registry::ChannelId;

/// Malformed or unacceptable request arguments.
pub const BAD_REQUEST: i32 = 400;
/// No handler registered for the requested method.
pub const NOT_FOUND: i32 = 404;
/// Generic handler failure.
pub const INTERNAL: i32 = 500;
/// The channel carrying a call went away before a response arrived.
pub const CONNECTION_CLOSED: i32 = 503;

/// Errors returned by router operations.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    /// Frame encoding or decoding failed.
    #[error("frame error: {0}")]
    Frame(#[from] rpcmux_frame::FrameError),

    /// The transport refused an operation.
    #[error("channel error: {0}")]
    Channel(#[from] rpcmux_channel::ChannelError),

    /// An argument schema could not be loaded or compiled.
    #[error("schema error: {0}")]
    Schema(#[from] rpcmux_schema::SchemaError),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Method names must be non-empty.
    #[error("invalid method name {0:?}")]
    InvalidMethod(String),

    /// Neither a channel bound to the destination nor a default channel exists.
    #[error("no route to destination {0:?}")]
    NoRoute(String),

    /// The outgoing queue is at `max_queue_length`; the frame was not queued.
    #[error("queue full on channel {channel} ({len} frames)")]
    QueueFull { channel: ChannelId, len: usize },

    /// The channel id does not name a registered channel.
    #[error("unknown channel {0}")]
    UnknownChannel(ChannelId),

    /// The router is being torn down and accepts no new calls.
    #[error("router is shutting down")]
    ShuttingDown,

    /// Invalid router configuration.
    #[error("invalid config: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, RouterError>;

/// Error carried by an RPC response frame.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("rpc error {code}: {message}")]
pub struct RpcError {
    pub code: i32,
    pub message: String,
}

impl RpcError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub(crate) fn connection_closed() -> Self {
        Self::new(CONNECTION_CLOSED, "connection closed")
    }
}
