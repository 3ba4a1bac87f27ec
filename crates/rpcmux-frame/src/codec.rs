use std::borrow::Cow;

use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::value::RawValue;

use crate::error::{FrameError, Result};

/// Frame format version written into every outgoing frame.
pub const FRAME_VERSION: i32 = 2;

/// Default upper bound for a single raw frame: 64 KiB.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024;

/// Whether a frame asks for work or answers an earlier request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Request,
    Response,
}

/// One routable RPC message.
///
/// String fields distinguish absent (`None`) from empty (`Some("")`).
/// `id == 0` means "no id": a request without an id expects no response.
#[derive(Debug, Clone)]
pub struct Frame<'a> {
    pub version: i32,
    pub id: i64,
    pub error_code: i32,
    pub src: Option<Cow<'a, str>>,
    pub dst: Option<Cow<'a, str>>,
    pub tag: Option<Cow<'a, str>>,
    pub method: Option<Cow<'a, str>>,
    pub args: Option<&'a RawValue>,
    pub result: Option<&'a RawValue>,
    pub error_msg: Option<Cow<'a, str>>,
    pub auth: Option<&'a RawValue>,
}

impl<'a> Frame<'a> {
    /// A request for `method`. Use `id == 0` for a notification.
    pub fn request(id: i64, method: impl Into<Cow<'a, str>>) -> Self {
        Self {
            method: Some(method.into()),
            ..Self::response(id)
        }
    }

    /// An empty response to request `id`.
    pub fn response(id: i64) -> Self {
        Self {
            version: FRAME_VERSION,
            id,
            error_code: 0,
            src: None,
            dst: None,
            tag: None,
            method: None,
            args: None,
            result: None,
            error_msg: None,
            auth: None,
        }
    }

    /// True when the frame names a method.
    pub fn is_request(&self) -> bool {
        self.method.as_deref().is_some_and(|method| !method.is_empty())
    }

    pub fn kind(&self) -> FrameKind {
        if self.is_request() {
            FrameKind::Request
        } else {
            FrameKind::Response
        }
    }

    /// Check the request-xor-response shape.
    pub fn validate(&self) -> Result<()> {
        if self.is_request() {
            if self.result.is_some() || self.error_code != 0 || self.error_msg.is_some() {
                return Err(FrameError::RequestWithResult);
            }
        } else if self.id == 0 {
            return Err(FrameError::Ambiguous);
        }
        Ok(())
    }

    /// Serialize into wire form.
    pub fn to_bytes(&self) -> Result<Bytes> {
        let error = (self.error_code != 0 || self.error_msg.is_some()).then(|| WireError {
            code: self.error_code,
            message: reborrow(&self.error_msg),
        });

        let wire = WireFrame {
            version: self.version,
            id: self.id,
            src: reborrow(&self.src),
            dst: reborrow(&self.dst),
            tag: reborrow(&self.tag),
            method: reborrow(&self.method),
            args: self.args,
            result: self.result,
            error,
            auth: self.auth,
        };

        serde_json::to_vec(&wire)
            .map(Bytes::from)
            .map_err(FrameError::Encode)
    }
}

impl PartialEq for Frame<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.version == other.version
            && self.id == other.id
            && self.error_code == other.error_code
            && self.src == other.src
            && self.dst == other.dst
            && self.tag == other.tag
            && self.method == other.method
            && raw_eq(self.args, other.args)
            && raw_eq(self.result, other.result)
            && self.error_msg == other.error_msg
            && raw_eq(self.auth, other.auth)
    }
}

/// Parse a raw frame with the default size limit.
pub fn parse_frame(raw: &[u8]) -> Result<Frame<'_>> {
    parse_frame_with_limit(raw, DEFAULT_MAX_FRAME_SIZE)
}

/// Parse a raw frame, rejecting input larger than `max_frame_size`.
///
/// Payloads and unescaped strings in the returned frame borrow from `raw`.
pub fn parse_frame_with_limit(raw: &[u8], max_frame_size: usize) -> Result<Frame<'_>> {
    if raw.len() > max_frame_size {
        return Err(FrameError::TooLarge {
            size: raw.len(),
            max: max_frame_size,
        });
    }

    let wire: WireFrame<'_> = serde_json::from_slice(raw).map_err(FrameError::Malformed)?;
    let frame = Frame::from(wire);
    frame.validate()?;
    Ok(frame)
}

#[derive(Serialize, Deserialize)]
#[serde(bound(deserialize = "'de: 'a"))]
struct WireFrame<'a> {
    #[serde(rename = "v", default = "default_version")]
    version: i32,
    #[serde(default, skip_serializing_if = "is_zero")]
    id: i64,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "borrowed_str"
    )]
    src: Option<Cow<'a, str>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "borrowed_str"
    )]
    dst: Option<Cow<'a, str>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "borrowed_str"
    )]
    tag: Option<Cow<'a, str>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "borrowed_str"
    )]
    method: Option<Cow<'a, str>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present_raw"
    )]
    args: Option<&'a RawValue>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present_raw"
    )]
    result: Option<&'a RawValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<WireError<'a>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present_raw"
    )]
    auth: Option<&'a RawValue>,
}

#[derive(Serialize, Deserialize)]
#[serde(bound(deserialize = "'de: 'a"))]
struct WireError<'a> {
    #[serde(default)]
    code: i32,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "borrowed_str"
    )]
    message: Option<Cow<'a, str>>,
}

impl<'a> From<WireFrame<'a>> for Frame<'a> {
    fn from(wire: WireFrame<'a>) -> Self {
        let (error_code, error_msg) = match wire.error {
            Some(error) => (error.code, error.message),
            None => (0, None),
        };

        Self {
            version: wire.version,
            id: wire.id,
            error_code,
            src: wire.src,
            dst: wire.dst,
            tag: wire.tag,
            method: wire.method,
            args: wire.args,
            result: wire.result,
            error_msg,
            auth: wire.auth,
        }
    }
}

// serde only borrows a bare `Cow<str>` field; wrapping keeps `Option<Cow>`
// zero-copy for strings without escapes.
fn borrowed_str<'de, 'a, D>(deserializer: D) -> std::result::Result<Option<Cow<'a, str>>, D::Error>
where
    D: Deserializer<'de>,
    'de: 'a,
{
    #[derive(Deserialize)]
    struct Borrowed<'b>(#[serde(borrow)] Cow<'b, str>);

    Ok(Option::<Borrowed<'a>>::deserialize(deserializer)?.map(|value| value.0))
}

// A present `null` payload stays `Some("null")`; only a missing key is `None`.
fn present_raw<'de, 'a, D>(deserializer: D) -> std::result::Result<Option<&'a RawValue>, D::Error>
where
    D: Deserializer<'de>,
    'de: 'a,
{
    <&'de RawValue>::deserialize(deserializer).map(Some)
}

fn reborrow<'b>(value: &'b Option<Cow<'_, str>>) -> Option<Cow<'b, str>> {
    value.as_deref().map(Cow::Borrowed)
}

fn raw_eq(left: Option<&RawValue>, right: Option<&RawValue>) -> bool {
    left.map(RawValue::get) == right.map(RawValue::get)
}

fn default_version() -> i32 {
    FRAME_VERSION
}

fn is_zero(value: &i64) -> bool {
    *value == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn within(buffer: &[u8], value: &str) -> bool {
        let start = buffer.as_ptr() as usize;
        let ptr = value.as_ptr() as usize;
        ptr >= start && ptr + value.len() <= start + buffer.len()
    }

    #[test]
    fn parse_request_borrows_from_input() {
        let raw = br#"{"v":2,"id":7,"src":"cloud","dst":"dev1","method":"Sys.GetInfo","args":{"verbose":true}}"#;
        let frame = parse_frame(raw).unwrap();

        assert_eq!(frame.kind(), FrameKind::Request);
        assert_eq!(frame.id, 7);
        assert!(matches!(frame.method, Some(Cow::Borrowed("Sys.GetInfo"))));
        assert!(matches!(frame.src, Some(Cow::Borrowed("cloud"))));

        let args = frame.args.expect("args should be present");
        assert_eq!(args.get(), r#"{"verbose":true}"#);
        assert!(within(raw, args.get()));
    }

    #[test]
    fn parse_response_with_error() {
        let raw = br#"{"id":42,"src":"dev1","error":{"code":404,"message":"No handler for X"}}"#;
        let frame = parse_frame(raw).unwrap();

        assert_eq!(frame.kind(), FrameKind::Response);
        assert_eq!(frame.version, FRAME_VERSION);
        assert_eq!(frame.error_code, 404);
        assert_eq!(frame.error_msg.as_deref(), Some("No handler for X"));
        assert!(frame.result.is_none());
    }

    #[test]
    fn escaped_strings_are_decoded() {
        let raw = br#"{"id":1,"method":"Say","tag":"line\nbreak"}"#;
        let frame = parse_frame(raw).unwrap();
        assert_eq!(frame.tag.as_deref(), Some("line\nbreak"));
        assert!(matches!(frame.tag, Some(Cow::Owned(_))));
    }

    #[test]
    fn notification_without_id_is_a_request() {
        let frame = parse_frame(br#"{"method":"Log.Event","args":[1,2]}"#).unwrap();
        assert_eq!(frame.id, 0);
        assert!(frame.is_request());
    }

    #[test]
    fn rejects_frame_without_method_or_id() {
        let err = parse_frame(br#"{"src":"a","result":1}"#).unwrap_err();
        assert!(matches!(err, FrameError::Ambiguous));

        // An empty method does not make a request.
        let err = parse_frame(br#"{"method":""}"#).unwrap_err();
        assert!(matches!(err, FrameError::Ambiguous));
    }

    #[test]
    fn rejects_malformed_envelope() {
        for raw in [&b"not json"[..], b"[1,2,3]", b"{\"id\":\"seven\"}", b""] {
            let err = parse_frame(raw).unwrap_err();
            assert!(matches!(err, FrameError::Malformed(_)), "input {raw:?}");
        }
    }

    #[test]
    fn rejects_request_with_result() {
        let err = parse_frame(br#"{"id":3,"method":"M","result":true}"#).unwrap_err();
        assert!(matches!(err, FrameError::RequestWithResult));

        let err = parse_frame(br#"{"id":3,"method":"M","error":{"code":1}}"#).unwrap_err();
        assert!(matches!(err, FrameError::RequestWithResult));
    }

    #[test]
    fn rejects_oversized_frame() {
        let raw = format!(r#"{{"id":1,"method":"M","args":"{}"}}"#, "x".repeat(128));
        let err = parse_frame_with_limit(raw.as_bytes(), 64).unwrap_err();
        assert!(matches!(err, FrameError::TooLarge { max: 64, .. }));
    }

    #[test]
    fn encode_omits_zero_id_and_absent_fields() {
        let frame = Frame::request(0, "Log.Event");
        let bytes = frame.to_bytes().unwrap();
        assert_eq!(bytes.as_ref(), br#"{"v":2,"method":"Log.Event"}"#);
    }

    #[test]
    fn roundtrip_keeps_empty_and_absent_apart() {
        let args = RawValue::from_string(r#"{"a":[1,"two"]}"#.to_string()).unwrap();
        let mut frame = Frame::request(9, "Test.Echo");
        frame.src = Some(Cow::Borrowed(""));
        frame.tag = Some(Cow::Borrowed("t-1"));
        frame.args = Some(&args);

        let bytes = frame.to_bytes().unwrap();
        let parsed = parse_frame(&bytes).unwrap();

        assert_eq!(parsed, frame);
        assert_eq!(parsed.src.as_deref(), Some(""));
        assert!(parsed.dst.is_none());

        let null = RawValue::from_string("null".to_string()).unwrap();
        let mut frame = Frame::request(3, "M");
        frame.args = Some(&null);

        let bytes = frame.to_bytes().unwrap();
        assert_eq!(&bytes[..], br#"{"v":2,"id":3,"method":"M","args":null}"#);
        let parsed = parse_frame(&bytes).unwrap();
        assert_eq!(parsed, frame);
        assert_eq!(parsed.args.map(RawValue::get), Some("null"));
        assert!(parsed.auth.is_none());
    }

    #[test]
    fn null_result_is_present() {
        let frame = parse_frame(br#"{"id":4,"result":null}"#).unwrap();
        assert_eq!(frame.result.map(RawValue::get), Some("null"));

        let frame = parse_frame(br#"{"id":4}"#).unwrap();
        assert!(frame.result.is_none());
    }

    #[test]
    fn roundtrip_error_response() {
        let result_auth = RawValue::from_string(r#"{"user":"admin"}"#.to_string()).unwrap();
        let mut frame = Frame::response(-5);
        frame.dst = Some(Cow::Borrowed("cloud"));
        frame.error_code = 500;
        frame.error_msg = Some(Cow::Borrowed("boom \"quoted\""));
        frame.auth = Some(&result_auth);

        let bytes = frame.to_bytes().unwrap();
        let parsed = parse_frame(&bytes).unwrap();
        assert_eq!(parsed, frame);
    }

    #[test]
    fn raw_payloads_compare_by_text() {
        let left = parse_frame(br#"{"id":1,"result":{"x":1}}"#).unwrap();
        let right = parse_frame(br#"{"id":1,"result":{"x":2}}"#).unwrap();
        assert_ne!(left, right);
    }
}
