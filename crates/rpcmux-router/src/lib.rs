//! Embedded RPC router.
//!
//! A [`Router`] multiplexes request/response frames over any number of
//! [`Channel`]s, correlates responses with outstanding calls, and dispatches
//! inbound requests to registered method handlers after trust and argument
//! checks.
//!
//! Everything runs on the caller's event loop. The loop owns the transports,
//! feeds their readiness back through [`Router::handle_channel_event`], and
//! calls [`Router::tick`] periodically for idle housekeeping. Handlers,
//! observers and call callbacks all receive `&mut Router` and may issue new
//! calls or responses re-entrantly.
//!
//! [`Channel`]: rpcmux_channel::Channel

pub mod auth;
pub mod config;
pub mod error;
pub mod handler;
pub mod observer;
pub mod pending;
pub mod registry;
pub mod request;
pub mod router;

pub use auth::{DigestAuth, DigestVerifier};
pub use config::RouterConfig;
pub use error::{
    Result, RouterError, RpcError, BAD_REQUEST, CONNECTION_CLOSED, INTERNAL, NOT_FOUND,
};
pub use handler::{ArgsShape, Gate, Handler, Prehandler, METHOD_DESCRIBE, METHOD_LIST};
pub use observer::{observer_fn, Observer, RouterEvent};
pub use pending::{CallRequest, CallResult};
pub use registry::{ChannelId, ChannelState, DST_DEFAULT};
pub use request::{Authn, FrameInfo, RequestInfo};
pub use router::Router;
