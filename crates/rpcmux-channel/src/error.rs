/// Errors reported by channel implementations.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// A send was attempted while the channel is not connected.
    #[error("channel is not open")]
    NotOpen,

    /// An I/O error occurred on the underlying transport.
    #[error("channel I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ChannelError>;
