use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::time::Instant;

use bytes::Bytes;
use rpcmux_channel::Channel;
use tracing::debug;

use crate::error::{Result, RouterError};
use crate::request::FrameInfo;

/// Destination of the default (wildcard) channel.
pub const DST_DEFAULT: &str = "*";

/// Handle for a channel registered with a router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChannelId(u32);

impl ChannelId {
    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Connection state as tracked by the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Closed,
    Connecting,
    Open,
}

/// A serialized frame waiting for its channel.
pub(crate) struct QueuedFrame {
    /// Set for requests that have a pending call.
    pub call_id: Option<i64>,
    pub bytes: Bytes,
}

pub(crate) struct Binding {
    /// `"*"` for the default channel, empty while provisional.
    pub dst: String,
    pub channel: Box<dyn Channel>,
    pub is_trusted: bool,
    pub state: ChannelState,
    pub queue: VecDeque<QueuedFrame>,
    pub last_activity: Instant,
}

impl Binding {
    pub fn is_provisional(&self) -> bool {
        self.dst.is_empty()
    }

    pub fn is_default(&self) -> bool {
        self.dst == DST_DEFAULT
    }

    pub fn frame_info(&self) -> FrameInfo {
        FrameInfo {
            channel_type: self.channel.channel_type().to_string(),
            channel_is_trusted: self.is_trusted,
        }
    }

    fn ready(&self) -> bool {
        self.state == ChannelState::Open && self.channel.can_send()
    }
}

/// Outcome of [`ChannelRegistry::enqueue_or_send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    Sent,
    Queued,
}

/// Destination-keyed set of channel bindings with bounded outgoing queues.
pub(crate) struct ChannelRegistry {
    bindings: BTreeMap<ChannelId, Binding>,
    next_id: u32,
    max_queue_length: usize,
}

impl ChannelRegistry {
    pub fn new(max_queue_length: usize) -> Self {
        Self {
            bindings: BTreeMap::new(),
            next_id: 1,
            max_queue_length,
        }
    }

    pub fn add(
        &mut self,
        dst: &str,
        channel: Box<dyn Channel>,
        is_trusted: bool,
        now: Instant,
    ) -> ChannelId {
        if !dst.is_empty() {
            self.unbind(dst);
        }

        let id = ChannelId(self.next_id);
        self.next_id = self.next_id.wrapping_add(1).max(1);

        let state = if channel.is_open() {
            ChannelState::Open
        } else {
            ChannelState::Closed
        };
        debug!(
            channel = %id,
            dst,
            channel_type = channel.channel_type(),
            info = channel.info().as_deref().unwrap_or("-"),
            trusted = is_trusted,
            "channel added"
        );
        self.bindings.insert(
            id,
            Binding {
                dst: dst.to_string(),
                channel,
                is_trusted,
                state,
                queue: VecDeque::new(),
                last_activity: now,
            },
        );
        id
    }

    /// Bind a provisional channel to `dst`. Returns false when the channel
    /// already has a destination.
    pub fn learn(&mut self, id: ChannelId, dst: &str) -> bool {
        if dst.is_empty() || !self.get(id).is_some_and(Binding::is_provisional) {
            return false;
        }
        self.unbind(dst);
        if let Some(binding) = self.bindings.get_mut(&id) {
            binding.dst = dst.to_string();
            debug!(channel = %id, dst, "learned destination");
        }
        true
    }

    // Makes the channel currently bound to `dst`, if any, provisional.
    fn unbind(&mut self, dst: &str) {
        for (id, binding) in &mut self.bindings {
            if binding.dst == dst {
                debug!(channel = %id, dst, "destination moved to newer channel");
                binding.dst.clear();
            }
        }
    }

    /// Exact destination match, else the default channel.
    pub fn resolve(&self, dst: &str) -> Result<ChannelId> {
        let wanted = if dst.is_empty() { DST_DEFAULT } else { dst };
        self.find(wanted)
            .or_else(|| self.find(DST_DEFAULT))
            .ok_or_else(|| RouterError::NoRoute(dst.to_string()))
    }

    pub fn find(&self, dst: &str) -> Option<ChannelId> {
        self.bindings
            .iter()
            .find(|(_, binding)| binding.dst == dst)
            .map(|(id, _)| *id)
    }

    pub fn get(&self, id: ChannelId) -> Option<&Binding> {
        self.bindings.get(&id)
    }

    pub fn get_mut(&mut self, id: ChannelId) -> Option<&mut Binding> {
        self.bindings.get_mut(&id)
    }

    pub fn remove(&mut self, id: ChannelId) -> Option<Binding> {
        self.bindings.remove(&id)
    }

    pub fn ids(&self) -> Vec<ChannelId> {
        self.bindings.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ChannelId, &Binding)> {
        self.bindings.iter().map(|(id, binding)| (*id, binding))
    }

    /// Send right away when the channel is open, ready and has nothing queued
    /// ahead; otherwise append to its queue. A full queue is left untouched.
    pub fn enqueue_or_send(
        &mut self,
        id: ChannelId,
        frame: QueuedFrame,
        now: Instant,
    ) -> Result<Delivery> {
        let max = self.max_queue_length;
        let binding = self
            .bindings
            .get_mut(&id)
            .ok_or(RouterError::UnknownChannel(id))?;

        if binding.queue.is_empty() && binding.ready() {
            binding.channel.send(frame.bytes)?;
            binding.last_activity = now;
            return Ok(Delivery::Sent);
        }

        if binding.queue.len() >= max {
            return Err(RouterError::QueueFull {
                channel: id,
                len: binding.queue.len(),
            });
        }
        binding.queue.push_back(frame);
        Ok(Delivery::Queued)
    }

    /// Send queued frames in order while the channel accepts them.
    pub fn flush(&mut self, id: ChannelId, now: Instant) -> Result<usize> {
        let binding = self
            .bindings
            .get_mut(&id)
            .ok_or(RouterError::UnknownChannel(id))?;

        let mut sent = 0;
        while binding.ready() {
            let Some(frame) = binding.queue.pop_front() else {
                break;
            };
            binding.channel.send(frame.bytes)?;
            binding.last_activity = now;
            sent += 1;
        }
        Ok(sent)
    }

    /// Drop queued request frames belonging to the given calls.
    pub fn drop_queued_calls(&mut self, id: ChannelId, calls: &[i64]) -> usize {
        let Some(binding) = self.bindings.get_mut(&id) else {
            return 0;
        };
        let before = binding.queue.len();
        binding
            .queue
            .retain(|frame| !frame.call_id.is_some_and(|call| calls.contains(&call)));
        before - binding.queue.len()
    }
}
