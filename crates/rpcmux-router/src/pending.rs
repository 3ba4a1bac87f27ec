use std::collections::HashMap;
use std::time::Instant;

use serde::Serialize;
use serde_json::value::RawValue;

use crate::error::{Result, RpcError};
use crate::registry::ChannelId;
use crate::request::FrameInfo;
use crate::router::Router;

/// Outcome delivered to a call's callback: the response `result` (absent
/// when the peer sent none) or the error it carried.
pub type CallResult<'a> = std::result::Result<Option<&'a RawValue>, RpcError>;

pub(crate) type Callback = Box<dyn FnOnce(&mut Router, &FrameInfo, CallResult<'_>)>;

/// An outgoing call under construction.
#[derive(Debug, Clone)]
pub struct CallRequest {
    pub(crate) method: String,
    pub(crate) args: Option<Box<RawValue>>,
    pub(crate) dst: String,
}

impl CallRequest {
    /// A call with no arguments, routed to the default channel.
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            args: None,
            dst: String::new(),
        }
    }

    /// Serialize `args` as the call arguments.
    pub fn args<T: Serialize + ?Sized>(mut self, args: &T) -> Result<Self> {
        self.args = Some(serde_json::value::to_raw_value(args)?);
        Ok(self)
    }

    /// Use already-encoded JSON arguments.
    pub fn raw_args(mut self, args: Box<RawValue>) -> Self {
        self.args = Some(args);
        self
    }

    /// Address the call to a specific peer.
    pub fn dst(mut self, dst: impl Into<String>) -> Self {
        self.dst = dst.into();
        self
    }

    pub fn method(&self) -> &str {
        &self.method
    }
}

pub(crate) struct PendingCall {
    pub callback: Callback,
    pub channel: ChannelId,
    pub dst: String,
    pub created: Instant,
}

/// Outstanding calls keyed by id.
///
/// Every resolution path removes the entry before the callback runs, so a
/// callback fires at most once whatever the order of response, close and
/// teardown.
pub(crate) struct Correlator {
    pending: HashMap<i64, PendingCall>,
    next_id: i64,
}

impl Correlator {
    pub fn new() -> Self {
        Self {
            pending: HashMap::new(),
            next_id: 1,
        }
    }

    /// Allocate a fresh non-zero call id.
    pub fn next_id(&mut self) -> i64 {
        let id = self.next_id;
        self.next_id = if id == i64::MAX { 1 } else { id + 1 };
        id
    }

    pub fn insert(&mut self, id: i64, call: PendingCall) {
        self.pending.insert(id, call);
    }

    pub fn take(&mut self, id: i64) -> Option<PendingCall> {
        self.pending.remove(&id)
    }

    /// Remove every call routed through `channel`, oldest id first.
    pub fn take_routed_through(&mut self, channel: ChannelId) -> Vec<(i64, PendingCall)> {
        let mut ids: Vec<i64> = self
            .pending
            .iter()
            .filter(|(_, call)| call.channel == channel)
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids.into_iter()
            .filter_map(|id| self.pending.remove(&id).map(|call| (id, call)))
            .collect()
    }

    pub fn take_all(&mut self) -> Vec<(i64, PendingCall)> {
        let mut calls: Vec<_> = self.pending.drain().collect();
        calls.sort_unstable_by_key(|(id, _)| *id);
        calls
    }

    pub fn has_routed_through(&self, channel: ChannelId) -> bool {
        self.pending.values().any(|call| call.channel == channel)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }
}
