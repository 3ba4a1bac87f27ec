//! RPC frame codec for rpcmux.
//!
//! A frame is one routable message, encoded as a JSON object:
//! - `v`, `id`, `src`, `dst`, `tag` for routing and correlation
//! - `method` and `args` for requests
//! - `result` or `error` (`code` + `message`) for responses
//! - `auth` for an opaque authentication blob
//!
//! Parsing borrows from the input buffer: payloads are [`RawValue`] slices
//! and unescaped strings are [`Cow::Borrowed`](std::borrow::Cow). Keep the
//! buffer alive for as long as the frame is in use.
//!
//! [`RawValue`]: serde_json::value::RawValue

pub mod codec;
pub mod error;

pub use codec::{
    parse_frame, parse_frame_with_limit, Frame, FrameKind, DEFAULT_MAX_FRAME_SIZE, FRAME_VERSION,
};
pub use error::{FrameError, Result};
