#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

use rpcmux_channel::{ChannelEvent, MemoryChannel, MemoryHandle};
use rpcmux_router::{observer_fn, ChannelId, Observer, Router, RouterConfig, RouterEvent};
use serde_json::Value;

pub fn router(id: &str) -> Router {
    Router::new(RouterConfig::new(id)).expect("default config should be valid")
}

/// Register an already-connected memory channel.
pub fn connected(router: &mut Router, dst: &str) -> (ChannelId, MemoryHandle) {
    let (channel, handle) = MemoryChannel::new("mem");
    let id = router.add_channel(dst, Box::new(channel.connected()), false);
    (id, handle)
}

/// Register a memory channel that still has to be opened.
pub fn closed(router: &mut Router, dst: &str) -> (ChannelId, MemoryHandle) {
    let (channel, handle) = MemoryChannel::new("mem");
    let id = router.add_channel(dst, Box::new(channel), false);
    (id, handle)
}

pub fn deliver(router: &mut Router, channel: ChannelId, frame: &str) {
    router.handle_channel_event(channel, ChannelEvent::FrameReceived(frame.as_bytes()));
}

pub fn sent(handle: &MemoryHandle) -> Vec<Value> {
    handle
        .take_sent()
        .iter()
        .map(|bytes| serde_json::from_slice(bytes).expect("sent frame should be JSON"))
        .collect()
}

/// Observer that records every event.
pub fn recorder() -> (Rc<dyn Observer>, Rc<RefCell<Vec<RouterEvent>>>) {
    let events = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&events);
    let observer = observer_fn(move |_, event| sink.borrow_mut().push(event.clone()));
    (observer, events)
}

pub fn open_event(dst: &str) -> RouterEvent {
    RouterEvent::ChannelOpen {
        dst: dst.to_string(),
    }
}

pub fn closed_event(dst: &str) -> RouterEvent {
    RouterEvent::ChannelClosed {
        dst: dst.to_string(),
    }
}
