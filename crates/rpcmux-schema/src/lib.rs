//! Argument-shape descriptors for rpcmux methods.
//!
//! Each method may carry a JSON Schema (2020-12) describing its `args`.
//! The router validates inbound requests against it before any handler runs
//! and publishes the schema through `RPC.Describe`.

pub mod error;
pub mod registry;
mod validator;

pub use error::{Result, SchemaError};
pub use registry::SchemaRegistry;
