use std::any::Any;
use std::fmt;

use rpcmux_frame::Frame;
use serde_json::value::RawValue;
use tracing::debug;

use crate::registry::ChannelId;

/// Properties of the channel a frame arrived on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameInfo {
    pub channel_type: String,
    pub channel_is_trusted: bool,
}

/// Identity established for a request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Authn {
    pub username: Option<String>,
}

/// An inbound request awaiting its response.
///
/// Handed to the handler by value. Responding through
/// [`Router::send_response`](crate::Router::send_response) and friends
/// consumes it, so a request is answered at most once. Handlers that
/// answer later keep it in their own state; [`RequestInfo::abandon`]
/// releases it without a response.
pub struct RequestInfo {
    pub(crate) id: i64,
    pub(crate) src: Option<String>,
    pub(crate) dst: Option<String>,
    pub(crate) tag: Option<String>,
    pub(crate) method: String,
    pub(crate) auth: Option<Box<RawValue>>,
    pub(crate) channel: ChannelId,
    pub(crate) trusted: bool,
    pub(crate) channel_type: String,
    /// Authentication result, filled by
    /// [`Router::check_digest_auth`](crate::Router::check_digest_auth) or a prehandler.
    pub authn: Authn,
    /// Opaque per-request state for prehandlers and handlers.
    pub user_data: Option<Box<dyn Any>>,
}

impl RequestInfo {
    pub(crate) fn from_frame(
        frame: &Frame<'_>,
        channel: ChannelId,
        info: &FrameInfo,
    ) -> Self {
        Self {
            id: frame.id,
            src: frame.src.as_deref().map(str::to_string),
            dst: frame.dst.as_deref().map(str::to_string),
            tag: frame.tag.as_deref().map(str::to_string),
            method: frame.method.as_deref().unwrap_or_default().to_string(),
            auth: frame.auth.map(ToOwned::to_owned),
            channel,
            trusted: info.channel_is_trusted,
            channel_type: info.channel_type.clone(),
            authn: Authn::default(),
            user_data: None,
        }
    }

    /// Request id. Zero means the caller expects no response.
    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn src(&self) -> Option<&str> {
        self.src.as_deref()
    }

    pub fn dst(&self) -> Option<&str> {
        self.dst.as_deref()
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// Raw `auth` object from the request frame.
    pub fn auth(&self) -> Option<&RawValue> {
        self.auth.as_deref()
    }

    /// Channel the request arrived on.
    pub fn channel(&self) -> ChannelId {
        self.channel
    }

    pub fn is_trusted(&self) -> bool {
        self.trusted
    }

    pub fn channel_type(&self) -> &str {
        &self.channel_type
    }

    pub fn expects_response(&self) -> bool {
        self.id != 0
    }

    /// Release the request without responding.
    pub fn abandon(self) {
        debug!(id = self.id, method = %self.method, "request abandoned");
    }
}

impl fmt::Debug for RequestInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut dbg = f.debug_struct("RequestInfo");
        dbg.field("id", &self.id)
            .field("src", &self.src)
            .field("dst", &self.dst)
            .field("tag", &self.tag)
            .field("method", &self.method);
        if let Some(auth) = &self.auth {
            dbg.field("auth", &format_args!("<redacted:{} bytes>", auth.get().len()));
        } else {
            dbg.field("auth", &Option::<String>::None);
        }
        dbg.field("authn", &self.authn)
            .field("channel", &self.channel)
            .field("trusted", &self.trusted)
            .field("channel_type", &self.channel_type)
            .field("user_data", &self.user_data.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use rpcmux_frame::parse_frame;

    use super::*;
    use crate::registry::ChannelRegistry;

    fn channel_id() -> ChannelId {
        let (channel, _handle) = rpcmux_channel::MemoryChannel::new("mem");
        ChannelRegistry::new(1).add("", Box::new(channel), false, std::time::Instant::now())
    }

    #[test]
    fn copies_request_fields_from_frame() {
        let raw = br#"{"id":4,"src":"cloud","tag":"","method":"Sys.Get","auth":{"realm":"r"}}"#;
        let frame = parse_frame(raw).unwrap();
        let info = FrameInfo {
            channel_type: "ws".to_string(),
            channel_is_trusted: true,
        };
        let request = RequestInfo::from_frame(&frame, channel_id(), &info);

        assert_eq!(request.id(), 4);
        assert_eq!(request.src(), Some("cloud"));
        assert_eq!(request.dst(), None);
        assert_eq!(request.tag(), Some(""));
        assert_eq!(request.method(), "Sys.Get");
        assert_eq!(request.auth().unwrap().get(), r#"{"realm":"r"}"#);
        assert!(request.is_trusted());
        assert_eq!(request.channel_type(), "ws");
        assert!(request.expects_response());
    }

    #[test]
    fn debug_redacts_auth_blob() {
        let raw = br#"{"method":"M","auth":{"response":"deadbeef"}}"#;
        let frame = parse_frame(raw).unwrap();
        let request = RequestInfo::from_frame(&frame, channel_id(), &FrameInfo::default());

        let rendered = format!("{request:?}");
        assert!(!rendered.contains("deadbeef"));
        assert!(rendered.contains("<redacted:"));
        assert!(!request.expects_response());
    }
}
