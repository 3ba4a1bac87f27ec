use std::cell::RefCell;
use std::rc::Rc;

use bytes::Bytes;
use tracing::trace;

use crate::error::{ChannelError, Result};
use crate::traits::Channel;

#[derive(Debug, Default)]
struct MemoryState {
    open: bool,
    busy: bool,
    fail_sends: bool,
    fail_opens: bool,
    sent: Vec<Bytes>,
    opens: usize,
    closes: usize,
}

/// In-process channel that records outgoing frames.
///
/// The paired [`MemoryHandle`] observes and steers the channel after it has
/// been handed to a router: it drains sent frames, marks the channel busy,
/// and injects open or send failures.
pub struct MemoryChannel {
    channel_type: String,
    persistent: bool,
    state: Rc<RefCell<MemoryState>>,
}

/// Shared view of a [`MemoryChannel`].
#[derive(Clone)]
pub struct MemoryHandle {
    state: Rc<RefCell<MemoryState>>,
}

impl MemoryChannel {
    /// Create a closed, persistent channel and its handle.
    pub fn new(channel_type: impl Into<String>) -> (Self, MemoryHandle) {
        let state = Rc::new(RefCell::new(MemoryState::default()));
        let channel = Self {
            channel_type: channel_type.into(),
            persistent: true,
            state: Rc::clone(&state),
        };
        (channel, MemoryHandle { state })
    }

    /// Mark the channel as non-persistent (dropped by the router on close).
    pub fn non_persistent(mut self) -> Self {
        self.persistent = false;
        self
    }

    /// Start in the connected state, as an accepted socket would.
    pub fn connected(self) -> Self {
        self.state.borrow_mut().open = true;
        self
    }
}

impl Channel for MemoryChannel {
    fn open(&mut self) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.opens += 1;
        if state.fail_opens {
            return Err(ChannelError::Io(std::io::Error::other(
                "injected open failure",
            )));
        }
        state.open = true;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.closes += 1;
        state.open = false;
        Ok(())
    }

    fn send(&mut self, frame: Bytes) -> Result<()> {
        let mut state = self.state.borrow_mut();
        if !state.open {
            return Err(ChannelError::NotOpen);
        }
        if state.fail_sends {
            return Err(ChannelError::Io(std::io::Error::other(
                "injected send failure",
            )));
        }
        trace!(channel_type = %self.channel_type, len = frame.len(), "memory send");
        state.sent.push(frame);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.state.borrow().open
    }

    fn can_send(&self) -> bool {
        !self.state.borrow().busy
    }

    fn channel_type(&self) -> &str {
        &self.channel_type
    }

    fn is_persistent(&self) -> bool {
        self.persistent
    }

    fn info(&self) -> Option<String> {
        Some(format!("memory:{}", self.channel_type))
    }
}

impl MemoryHandle {
    /// Drain every frame sent so far, oldest first.
    pub fn take_sent(&self) -> Vec<Bytes> {
        std::mem::take(&mut self.state.borrow_mut().sent)
    }

    /// Number of frames sent and not yet drained.
    pub fn sent_len(&self) -> usize {
        self.state.borrow().sent.len()
    }

    /// Simulate a transport that cannot take more data right now.
    pub fn set_busy(&self, busy: bool) {
        self.state.borrow_mut().busy = busy;
    }

    /// Make every subsequent send fail with an I/O error.
    pub fn set_fail_sends(&self, fail: bool) {
        self.state.borrow_mut().fail_sends = fail;
    }

    /// Make every subsequent open fail with an I/O error.
    pub fn set_fail_opens(&self, fail: bool) {
        self.state.borrow_mut().fail_opens = fail;
    }

    pub fn is_open(&self) -> bool {
        self.state.borrow().open
    }

    /// How many times `open` was invoked.
    pub fn open_count(&self) -> usize {
        self.state.borrow().opens
    }

    /// How many times `close` was invoked.
    pub fn close_count(&self) -> usize {
        self.state.borrow().closes
    }
}
