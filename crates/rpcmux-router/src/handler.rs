use std::rc::Rc;

use serde_json::value::RawValue;
use serde_json::Value;

use crate::request::{FrameInfo, RequestInfo};
use crate::router::Router;

/// Built-in method listing every registered method name.
pub const METHOD_LIST: &str = "RPC.List";
/// Built-in method returning a method's argument schema.
pub const METHOD_DESCRIBE: &str = "RPC.Describe";

/// A method implementation.
///
/// The handler owns the request and answers it through the router, either
/// before returning or from a later event-loop turn.
pub trait Handler {
    fn call(
        &self,
        router: &mut Router,
        request: RequestInfo,
        frame: &FrameInfo,
        args: Option<&RawValue>,
    );
}

impl<F> Handler for F
where
    F: Fn(&mut Router, RequestInfo, &FrameInfo, Option<&RawValue>),
{
    fn call(
        &self,
        router: &mut Router,
        request: RequestInfo,
        frame: &FrameInfo,
        args: Option<&RawValue>,
    ) {
        self(router, request, frame, args)
    }
}

/// Prehandler verdict.
#[derive(Debug)]
pub enum Gate {
    /// Continue to the method handler with this request.
    Pass(RequestInfo),
    /// The prehandler consumed the request; nothing more is sent.
    Stop,
}

/// Hook run before every method handler, typically for authorization.
pub trait Prehandler {
    fn check(
        &self,
        router: &mut Router,
        request: RequestInfo,
        frame: &FrameInfo,
        args: Option<&RawValue>,
    ) -> Gate;
}

impl<F> Prehandler for F
where
    F: Fn(&mut Router, RequestInfo, &FrameInfo, Option<&RawValue>) -> Gate,
{
    fn check(
        &self,
        router: &mut Router,
        request: RequestInfo,
        frame: &FrameInfo,
        args: Option<&RawValue>,
    ) -> Gate {
        self(router, request, frame, args)
    }
}

/// Expected shape of a method's arguments.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum ArgsShape {
    /// No validation.
    #[default]
    Any,
    /// JSON Schema the arguments must satisfy.
    Schema(Value),
}

#[derive(Clone)]
pub(crate) enum MethodHandler {
    User(Rc<dyn Handler>),
    List,
    Describe,
}
