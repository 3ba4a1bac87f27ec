//! Embedded RPC router.
//!
//! rpcmux carries JSON request/response frames over any number of
//! transport channels, matches responses to outstanding calls, and
//! dispatches inbound requests to method handlers behind trust and
//! argument checks. Everything runs on the caller's single-threaded
//! event loop.
//!
//! # Crate Structure
//!
//! - [`channel`]: transport abstraction and the in-memory channel
//! - [`frame`]: zero-copy frame codec
//! - [`schema`]: per-method argument schemas (behind `router` feature)
//! - [`router`]: channel registry, call correlator and dispatch engine
//!   (behind `router` feature)

/// Re-export channel types.
pub mod channel {
    pub use rpcmux_channel::*;
}

/// Re-export frame types.
pub mod frame {
    pub use rpcmux_frame::*;
}

/// Re-export schema types (requires `router` feature).
#[cfg(feature = "router")]
pub mod schema {
    pub use rpcmux_schema::*;
}

/// Re-export router types (requires `router` feature).
#[cfg(feature = "router")]
pub mod router {
    pub use rpcmux_router::*;
}
