use std::borrow::Cow;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::time::Instant;

use bytes::Bytes;
use rpcmux_channel::{Channel, ChannelEvent};
use rpcmux_frame::{parse_frame, Frame, FrameKind};
use rpcmux_schema::SchemaRegistry;
use serde::{Deserialize, Serialize};
use serde_json::json;
use serde_json::value::RawValue;
use tracing::{debug, warn};

use crate::auth::{self, DigestVerifier};
use crate::config::RouterConfig;
use crate::error::{Result, RouterError, RpcError, BAD_REQUEST, INTERNAL, NOT_FOUND};
use crate::handler::{
    ArgsShape, Gate, Handler, MethodHandler, Prehandler, METHOD_DESCRIBE, METHOD_LIST,
};
use crate::observer::{Observer, ObserverList, RouterEvent};
use crate::pending::{CallRequest, CallResult, Correlator, PendingCall};
use crate::registry::{
    Binding, ChannelId, ChannelRegistry, ChannelState, Delivery, QueuedFrame, DST_DEFAULT,
};
use crate::request::{FrameInfo, RequestInfo};

/// The RPC router.
///
/// Dropping the router fails every pending call with
/// [`CONNECTION_CLOSED`](crate::CONNECTION_CLOSED) and then closes all
/// channels. Observers are not notified during teardown.
pub struct Router {
    config: RouterConfig,
    channels: ChannelRegistry,
    calls: Correlator,
    handlers: BTreeMap<String, MethodHandler>,
    schemas: SchemaRegistry,
    prehandler: Option<Rc<dyn Prehandler>>,
    observers: ObserverList,
    verifier: Option<Box<dyn DigestVerifier>>,
    shutting_down: bool,
}

impl Router {
    pub fn new(config: RouterConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            channels: ChannelRegistry::new(config.max_queue_length),
            config,
            calls: Correlator::new(),
            handlers: BTreeMap::new(),
            schemas: SchemaRegistry::new(),
            prehandler: None,
            observers: ObserverList::default(),
            verifier: None,
            shutting_down: false,
        })
    }

    /// Local peer id.
    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    // --- channels ---------------------------------------------------------

    /// Register a channel for `dst`.
    ///
    /// `dst` is a peer id, [`DST_DEFAULT`] for the default route, or empty
    /// to learn the destination from the first inbound frame. A concrete
    /// `dst` already bound elsewhere moves to this channel.
    pub fn add_channel(
        &mut self,
        dst: &str,
        channel: Box<dyn Channel>,
        is_trusted: bool,
    ) -> ChannelId {
        self.channels.add(dst, channel, is_trusted, Instant::now())
    }

    pub fn channel_state(&self, id: ChannelId) -> Option<ChannelState> {
        self.channels.get(id).map(|binding| binding.state)
    }

    /// Destination currently bound to the channel; empty while provisional.
    pub fn channel_dst(&self, id: ChannelId) -> Option<&str> {
        self.channels.get(id).map(|binding| binding.dst.as_str())
    }

    /// Number of frames waiting in the channel's outgoing queue.
    pub fn queue_len(&self, id: ChannelId) -> Option<usize> {
        self.channels.get(id).map(|binding| binding.queue.len())
    }

    /// Channel that frames for `dst` would take.
    pub fn resolve(&self, dst: &str) -> Result<ChannelId> {
        self.channels.resolve(dst)
    }

    /// Start connecting every closed channel.
    pub fn connect_all(&mut self) {
        for id in self.channels.ids() {
            self.open_channel(id);
        }
    }

    /// Close every channel that is not already closed.
    pub fn disconnect_all(&mut self) {
        for id in self.channels.ids() {
            if self.channel_state(id).is_some_and(|state| state != ChannelState::Closed) {
                self.close_channel(id);
            }
        }
    }

    /// Whether the default channel exists and is open.
    pub fn is_connected(&self) -> bool {
        self.default_binding()
            .is_some_and(|binding| binding.state == ChannelState::Open)
    }

    /// Whether a frame for the default route would go out immediately.
    pub fn can_send(&self) -> bool {
        self.default_binding().is_some_and(|binding| {
            binding.state == ChannelState::Open
                && binding.channel.can_send()
                && binding.queue.is_empty()
        })
    }

    /// Feed a transport notification for a registered channel.
    pub fn handle_channel_event(&mut self, id: ChannelId, event: ChannelEvent<'_>) {
        if self.channels.get(id).is_none() {
            warn!(channel = %id, ?event, "event for unknown channel");
            return;
        }
        match event {
            ChannelEvent::Opened => self.channel_opened(id),
            ChannelEvent::FrameReceived(raw) => self.handle_frame(id, raw),
            ChannelEvent::FrameSent => self.flush(id),
            ChannelEvent::Closed => self.channel_closed(id),
        }
    }

    /// Close outgoing channels that have been idle for the configured timeout.
    ///
    /// Only open, non-persistent channels bound to a concrete peer with an
    /// empty queue and no calls in flight qualify.
    pub fn tick(&mut self, now: Instant) {
        let Some(timeout) = self.config.idle_close_timeout() else {
            return;
        };
        let idle: Vec<ChannelId> = self
            .channels
            .iter()
            .filter(|(id, binding)| {
                binding.state == ChannelState::Open
                    && !binding.is_default()
                    && !binding.is_provisional()
                    && !binding.channel.is_persistent()
                    && binding.queue.is_empty()
                    && !self.calls.has_routed_through(*id)
                    && now.saturating_duration_since(binding.last_activity) >= timeout
            })
            .map(|(id, _)| id)
            .collect();

        for id in idle {
            debug!(channel = %id, "closing idle channel");
            self.close_channel(id);
        }
    }

    // --- calls ------------------------------------------------------------

    /// Send a request and register `callback` for its outcome.
    ///
    /// The callback runs exactly once: with the response, or with
    /// [`CONNECTION_CLOSED`](crate::CONNECTION_CLOSED) when the channel closes
    /// or the router is dropped first. A channel that fails to open while
    /// the frame is queued cancels the call before this returns. When this
    /// returns an error no call was registered and the callback is dropped
    /// without running.
    pub fn call<F>(&mut self, request: CallRequest, callback: F) -> Result<i64>
    where
        F: FnOnce(&mut Router, &FrameInfo, CallResult<'_>) + 'static,
    {
        self.check_outgoing(&request)?;
        let channel = self.channels.resolve(&request.dst)?;
        let id = self.calls.next_id();
        let bytes = self.encode_request(id, &request)?;
        debug!(id, method = %request.method, channel = %channel, "call issued");

        // Pending before the frame leaves: a close while queuing cancels it.
        self.calls.insert(
            id,
            PendingCall {
                callback: Box::new(callback),
                channel,
                dst: request.dst,
                created: Instant::now(),
            },
        );
        if let Err(e) = self.enqueue(channel, QueuedFrame { call_id: Some(id), bytes }) {
            // Refused calls are dropped without running their callback.
            self.calls.take(id);
            return Err(e);
        }
        Ok(id)
    }

    /// Send a request that expects no response.
    pub fn notify(&mut self, request: CallRequest) -> Result<()> {
        self.check_outgoing(&request)?;
        let channel = self.channels.resolve(&request.dst)?;
        let bytes = self.encode_request(0, &request)?;
        self.enqueue(channel, QueuedFrame { call_id: None, bytes })?;
        debug!(method = %request.method, channel = %channel, "notification sent");
        Ok(())
    }

    /// Number of calls awaiting a response.
    pub fn pending_calls(&self) -> usize {
        self.calls.len()
    }

    // --- handlers ---------------------------------------------------------

    /// Register `handler` for `method`, replacing any earlier registration.
    pub fn add_handler<F>(&mut self, method: &str, shape: ArgsShape, handler: F) -> Result<()>
    where
        F: Fn(&mut Router, RequestInfo, &FrameInfo, Option<&RawValue>) + 'static,
    {
        self.install(method, shape, MethodHandler::User(Rc::new(handler)))
    }

    pub fn add_handler_object(
        &mut self,
        method: &str,
        shape: ArgsShape,
        handler: Rc<dyn Handler>,
    ) -> Result<()> {
        self.install(method, shape, MethodHandler::User(handler))
    }

    pub fn remove_handler(&mut self, method: &str) -> bool {
        self.schemas.remove(method);
        self.handlers.remove(method).is_some()
    }

    /// Register `RPC.List` and `RPC.Describe`.
    pub fn add_list_handler(&mut self) -> Result<()> {
        self.install(METHOD_LIST, ArgsShape::Any, MethodHandler::List)?;
        self.install(
            METHOD_DESCRIBE,
            ArgsShape::Schema(json!({
                "type": "object",
                "properties": { "name": { "type": "string" } },
                "required": ["name"]
            })),
            MethodHandler::Describe,
        )
    }

    /// Registered method names, sorted.
    pub fn methods(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }

    /// Install a hook that runs before every handler.
    pub fn set_prehandler<F>(&mut self, prehandler: F)
    where
        F: Fn(&mut Router, RequestInfo, &FrameInfo, Option<&RawValue>) -> Gate + 'static,
    {
        self.prehandler = Some(Rc::new(prehandler));
    }

    pub fn clear_prehandler(&mut self) {
        self.prehandler = None;
    }

    // --- responses --------------------------------------------------------

    /// Answer `request` with `result`.
    ///
    /// If `result` cannot be serialized the request is answered with an
    /// internal error instead and the serialization error is returned.
    pub fn send_response<T: Serialize + ?Sized>(
        &mut self,
        request: RequestInfo,
        result: &T,
    ) -> Result<()> {
        match serde_json::value::to_raw_value(result) {
            Ok(raw) => self.send_reply(request, Some(&*raw), None),
            Err(e) => {
                warn!(id = request.id(), error = %e, "failed to encode result");
                let message = e.to_string();
                self.send_reply(request, None, Some((INTERNAL, &message)))?;
                Err(e.into())
            }
        }
    }

    /// Answer `request` with an already-encoded result, or none at all.
    pub fn send_response_raw(
        &mut self,
        request: RequestInfo,
        result: Option<&RawValue>,
    ) -> Result<()> {
        self.send_reply(request, result, None)
    }

    pub fn send_error(
        &mut self,
        request: RequestInfo,
        code: i32,
        message: Option<&str>,
    ) -> Result<()> {
        self.send_reply(request, None, Some((code, message.unwrap_or_default())))
    }

    /// Answer with an error whose message is `message` encoded as JSON text.
    pub fn send_error_json<T: Serialize + ?Sized>(
        &mut self,
        request: RequestInfo,
        code: i32,
        message: &T,
    ) -> Result<()> {
        match serde_json::to_string(message) {
            Ok(text) => self.send_reply(request, None, Some((code, &text))),
            Err(e) => {
                let text = e.to_string();
                self.send_reply(request, None, Some((INTERNAL, &text)))?;
                Err(e.into())
            }
        }
    }

    // --- observers and auth -----------------------------------------------

    /// Returns false when the observer is already registered.
    pub fn add_observer(&mut self, observer: Rc<dyn Observer>) -> bool {
        self.observers.add(observer)
    }

    /// Returns false when the observer was not registered.
    pub fn remove_observer(&mut self, observer: &Rc<dyn Observer>) -> bool {
        self.observers.remove(observer)
    }

    pub fn set_digest_verifier<V>(&mut self, verifier: V)
    where
        V: DigestVerifier + 'static,
    {
        self.verifier = Some(Box::new(verifier));
    }

    /// Authenticate `request` by channel trust or digest credentials.
    ///
    /// On success with credentials, `request.authn.username` is set.
    pub fn check_digest_auth(&self, request: &mut RequestInfo) -> bool {
        auth::check_digest_auth(request, self.verifier.as_deref(), self.config.psk.as_deref())
    }

    // --- internals --------------------------------------------------------

    fn default_binding(&self) -> Option<&Binding> {
        self.channels
            .find(DST_DEFAULT)
            .and_then(|id| self.channels.get(id))
    }

    fn local_src(&self) -> Option<Cow<'_, str>> {
        (!self.config.id.is_empty()).then(|| Cow::Borrowed(self.config.id.as_str()))
    }

    fn check_outgoing(&self, request: &CallRequest) -> Result<()> {
        if self.shutting_down {
            return Err(RouterError::ShuttingDown);
        }
        if request.method.is_empty() {
            return Err(RouterError::InvalidMethod(request.method.clone()));
        }
        Ok(())
    }

    fn encode_request(&self, id: i64, request: &CallRequest) -> Result<Bytes> {
        let mut frame = Frame::request(id, request.method.as_str());
        frame.src = self.local_src();
        frame.dst = (!request.dst.is_empty()).then(|| Cow::Borrowed(request.dst.as_str()));
        frame.args = request.args.as_deref();
        Ok(frame.to_bytes()?)
    }

    fn install(&mut self, method: &str, shape: ArgsShape, handler: MethodHandler) -> Result<()> {
        if method.is_empty() {
            return Err(RouterError::InvalidMethod(method.to_string()));
        }
        match shape {
            ArgsShape::Any => {
                self.schemas.remove(method);
            }
            ArgsShape::Schema(schema) => self.schemas.register_value(method, schema)?,
        }
        if self.handlers.insert(method.to_string(), handler).is_some() {
            debug!(method, "handler replaced");
        } else {
            debug!(method, "handler added");
        }
        Ok(())
    }

    fn enqueue(&mut self, id: ChannelId, frame: QueuedFrame) -> Result<()> {
        let call_id = frame.call_id;
        match self.channels.enqueue_or_send(id, frame, Instant::now()) {
            Ok(Delivery::Sent) => Ok(()),
            Ok(Delivery::Queued) => {
                debug!(channel = %id, queued = ?self.queue_len(id), "frame queued");
                if self.channel_state(id) == Some(ChannelState::Closed) {
                    self.open_channel(id);
                }
                Ok(())
            }
            Err(RouterError::Channel(e)) => {
                warn!(channel = %id, error = %e, "send failed, closing channel");
                let refused = call_id.and_then(|call_id| self.calls.take(call_id));
                self.close_channel(id);
                drop(refused);
                Err(RouterError::Channel(e))
            }
            Err(e) => Err(e),
        }
    }

    fn flush(&mut self, id: ChannelId) {
        match self.channels.flush(id, Instant::now()) {
            Ok(0) => {}
            Ok(sent) => debug!(channel = %id, sent, "flushed queued frames"),
            Err(e) => {
                warn!(channel = %id, error = %e, "send failed while flushing, closing channel");
                self.close_channel(id);
            }
        }
    }

    fn open_channel(&mut self, id: ChannelId) {
        let Some(binding) = self.channels.get_mut(id) else {
            return;
        };
        if binding.state != ChannelState::Closed {
            return;
        }
        binding.state = ChannelState::Connecting;
        debug!(channel = %id, dst = %binding.dst, "connecting");
        if let Err(e) = binding.channel.open() {
            warn!(channel = %id, error = %e, "failed to open channel");
            self.channel_closed(id);
        }
    }

    fn close_channel(&mut self, id: ChannelId) {
        if let Some(binding) = self.channels.get_mut(id) {
            if let Err(e) = binding.channel.close() {
                warn!(channel = %id, error = %e, "error closing channel");
            }
        }
        self.channel_closed(id);
    }

    fn channel_opened(&mut self, id: ChannelId) {
        let Some(binding) = self.channels.get_mut(id) else {
            return;
        };
        binding.state = ChannelState::Open;
        binding.last_activity = Instant::now();
        let dst = binding.dst.clone();
        debug!(channel = %id, dst = %dst, "channel open");

        self.flush(id);
        if !dst.is_empty() && self.channel_state(id) == Some(ChannelState::Open) {
            self.notify_observers(RouterEvent::ChannelOpen { dst });
        }
    }

    // Cancels calls routed through the channel before observers hear about
    // the close.
    fn channel_closed(&mut self, id: ChannelId) {
        let Some(binding) = self.channels.get_mut(id) else {
            return;
        };
        if binding.state == ChannelState::Closed {
            return;
        }
        binding.state = ChannelState::Closed;
        let dst = binding.dst.clone();
        let persistent = binding.channel.is_persistent();
        let info = binding.frame_info();

        let cancelled = self.calls.take_routed_through(id);
        let call_ids: Vec<i64> = cancelled.iter().map(|(call_id, _)| *call_id).collect();
        let dropped = self.channels.drop_queued_calls(id, &call_ids);
        debug!(
            channel = %id,
            dst = %dst,
            cancelled = call_ids.len(),
            dropped,
            "channel closed"
        );

        for (call_id, call) in cancelled {
            debug!(id = call_id, dst = %call.dst, "call cancelled by channel close");
            (call.callback)(self, &info, Err(RpcError::connection_closed()));
        }

        if !dst.is_empty() {
            self.notify_observers(RouterEvent::ChannelClosed { dst });
        }

        if !persistent && self.channel_state(id) == Some(ChannelState::Closed) {
            self.channels.remove(id);
            debug!(channel = %id, "non-persistent channel removed");
        }
    }

    fn notify_observers(&mut self, event: RouterEvent) {
        for observer in self.observers.snapshot() {
            observer.on_event(self, &event);
        }
    }

    fn handle_frame(&mut self, id: ChannelId, raw: &[u8]) {
        let frame = match parse_frame(raw) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(channel = %id, error = %e, "dropping invalid frame");
                return;
            }
        };

        let Some(binding) = self.channels.get_mut(id) else {
            return;
        };
        binding.last_activity = Instant::now();
        let info = binding.frame_info();

        if let Some(dst) = frame.dst.as_deref() {
            if !self.config.id.is_empty() && !dst.is_empty() && dst != self.config.id {
                warn!(channel = %id, dst, local = %self.config.id, "dropping frame for another peer");
                return;
            }
        }

        if let Some(src) = frame.src.as_deref() {
            if self.channels.learn(id, src) {
                self.notify_observers(RouterEvent::ChannelOpen {
                    dst: src.to_string(),
                });
            }
        }

        match frame.kind() {
            FrameKind::Request => self.dispatch(id, &frame, &info),
            FrameKind::Response => self.complete_call(&frame, &info),
        }
    }

    fn complete_call(&mut self, frame: &Frame<'_>, info: &FrameInfo) {
        let Some(call) = self.calls.take(frame.id) else {
            debug!(id = frame.id, "response for unknown call, discarding");
            return;
        };
        debug!(
            id = frame.id,
            dst = %call.dst,
            elapsed_ms = call.created.elapsed().as_millis() as u64,
            "call completed"
        );

        let outcome = if frame.error_code != 0 || frame.error_msg.is_some() {
            Err(RpcError::new(
                frame.error_code,
                frame.error_msg.as_deref().unwrap_or_default(),
            ))
        } else {
            Ok(frame.result)
        };
        (call.callback)(self, info, outcome);
    }

    fn dispatch(&mut self, channel: ChannelId, frame: &Frame<'_>, info: &FrameInfo) {
        let request = RequestInfo::from_frame(frame, channel, info);
        let id = request.id();
        debug!(id, method = request.method(), channel = %channel, "request received");

        let Some(handler) = self.handlers.get(request.method()).cloned() else {
            let message = format!("No handler for {}", request.method());
            log_reply(id, self.send_error(request, NOT_FOUND, Some(&message)));
            return;
        };

        if let Err(e) = self.schemas.validate(request.method(), frame.args) {
            let message = e.to_string();
            log_reply(id, self.send_error(request, BAD_REQUEST, Some(&message)));
            return;
        }

        let request = match self.prehandler.clone() {
            Some(prehandler) => match prehandler.check(self, request, info, frame.args) {
                Gate::Pass(request) => request,
                Gate::Stop => {
                    debug!(id, "request stopped by prehandler");
                    return;
                }
            },
            None => request,
        };

        match handler {
            MethodHandler::User(handler) => handler.call(self, request, info, frame.args),
            MethodHandler::List => {
                let names: Vec<String> = self.handlers.keys().cloned().collect();
                log_reply(id, self.send_response(request, &names));
            }
            MethodHandler::Describe => self.describe(request, frame.args),
        }
    }

    fn describe(&mut self, request: RequestInfo, args: Option<&RawValue>) {
        #[derive(Deserialize)]
        struct DescribeArgs {
            name: String,
        }

        let id = request.id();
        let name = match args.map(|raw| serde_json::from_str::<DescribeArgs>(raw.get())) {
            Some(Ok(args)) => args.name,
            _ => {
                log_reply(id, self.send_error(request, BAD_REQUEST, Some("name is required")));
                return;
            }
        };

        if !self.handlers.contains_key(&name) {
            let message = format!("No handler for {name}");
            log_reply(id, self.send_error(request, NOT_FOUND, Some(&message)));
            return;
        }

        let body = json!({
            "name": name,
            "args_schema": self.schemas.schema(&name),
        });
        log_reply(id, self.send_response(request, &body));
    }

    fn send_reply(
        &mut self,
        request: RequestInfo,
        result: Option<&RawValue>,
        error: Option<(i32, &str)>,
    ) -> Result<()> {
        if !request.expects_response() {
            debug!(method = request.method(), "notification handled, no response sent");
            return Ok(());
        }

        let mut frame = Frame::response(request.id);
        frame.src = self.local_src();
        frame.dst = request.src.as_deref().map(Cow::Borrowed);
        frame.tag = request.tag.as_deref().map(Cow::Borrowed);
        frame.result = result;
        if let Some((code, message)) = error {
            frame.error_code = code;
            frame.error_msg = (!message.is_empty()).then_some(Cow::Borrowed(message));
        }
        let bytes = frame.to_bytes()?;

        let channel = if self.channels.get(request.channel).is_some() {
            request.channel
        } else {
            self.channels.resolve(request.src().unwrap_or_default())?
        };
        debug!(id = request.id, channel = %channel, "sending response");
        self.enqueue(channel, QueuedFrame { call_id: None, bytes })
    }
}

impl Drop for Router {
    fn drop(&mut self) {
        self.shutting_down = true;

        for (id, call) in self.calls.take_all() {
            debug!(id, "call cancelled by router shutdown");
            let info = self
                .channels
                .get(call.channel)
                .map(Binding::frame_info)
                .unwrap_or_default();
            (call.callback)(self, &info, Err(RpcError::connection_closed()));
        }

        for id in self.channels.ids() {
            if let Some(mut binding) = self.channels.remove(id) {
                if binding.state != ChannelState::Closed {
                    if let Err(e) = binding.channel.close() {
                        warn!(channel = %id, error = %e, "error closing channel");
                    }
                }
            }
        }
    }
}

fn log_reply(id: i64, result: Result<()>) {
    if let Err(e) = result {
        warn!(id, error = %e, "failed to send response");
    }
}
