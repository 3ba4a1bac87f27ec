//! Channel abstraction for the rpcmux RPC router.
//!
//! A channel is one transport-level endpoint (serial link, socket, in-process
//! loopback) over which whole frames travel. The router never reads from a
//! channel itself: the event loop observes readiness and reports back through
//! [`ChannelEvent`].
//!
//! Concrete transports live outside this workspace. [`MemoryChannel`] is an
//! in-process implementation used by tests and the demo CLI.

pub mod error;
pub mod memory;
pub mod traits;

pub use error::{ChannelError, Result};
pub use memory::{MemoryChannel, MemoryHandle};
pub use traits::{Channel, ChannelEvent};
