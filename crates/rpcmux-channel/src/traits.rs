use bytes::Bytes;

use crate::error::Result;

/// A transport endpoint carrying whole RPC frames.
///
/// Framing is the channel's job: `send` receives one serialized frame and
/// must deliver it as a unit. Connection state changes and inbound frames are
/// not returned from these methods; the event loop reports them to the router
/// as [`ChannelEvent`]s.
pub trait Channel {
    /// Begin connecting. Completion is signalled with [`ChannelEvent::Opened`].
    fn open(&mut self) -> Result<()>;

    /// Close the connection.
    fn close(&mut self) -> Result<()>;

    /// Send one serialized frame.
    fn send(&mut self, frame: Bytes) -> Result<()>;

    /// Whether the underlying connection is currently established.
    fn is_open(&self) -> bool;

    /// Whether the channel can accept another frame right now.
    ///
    /// A busy channel keeps frames in the router's queue until it reports
    /// [`ChannelEvent::FrameSent`].
    fn can_send(&self) -> bool {
        true
    }

    /// Short transport name, e.g. `"uart"` or `"ws"`.
    fn channel_type(&self) -> &str;

    /// Persistent channels survive a close and may be reopened.
    /// Non-persistent ones are dropped from the router once closed.
    fn is_persistent(&self) -> bool {
        true
    }

    /// Free-form description for diagnostics (peer address, port name).
    fn info(&self) -> Option<String> {
        None
    }
}

/// Notifications delivered by the event loop for a registered channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelEvent<'a> {
    /// The connection is established.
    Opened,
    /// A complete frame arrived. The slice is only borrowed for the call.
    FrameReceived(&'a [u8]),
    /// A previous send finished; the channel may accept more frames.
    FrameSent,
    /// The connection went away.
    Closed,
}
