mod common;

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use common::{connected, deliver, router, sent};
use rpcmux_channel::{ChannelEvent, MemoryChannel};
use rpcmux_router::{
    ArgsShape, DigestAuth, Gate, RequestInfo, Router, RouterConfig, BAD_REQUEST, NOT_FOUND,
};
use serde_json::json;

fn echo(router: &mut Router) {
    router
        .add_handler("Test.Echo", ArgsShape::Any, |router, request, _, args| {
            router
                .send_response_raw(request, args)
                .expect("echo response should be sent");
        })
        .unwrap();
}

#[test]
fn echo_handler_answers_with_request_args() {
    let mut router = router("dev1");
    let (channel, handle) = connected(&mut router, "");
    echo(&mut router);

    deliver(
        &mut router,
        channel,
        r#"{"id":7,"src":"cloud","tag":"t-1","method":"Test.Echo","args":{"x":[1,"two"]}}"#,
    );

    assert_eq!(
        sent(&handle),
        vec![json!({
            "v": 2, "id": 7, "src": "dev1", "dst": "cloud", "tag": "t-1",
            "result": {"x": [1, "two"]}
        })]
    );
}

#[test]
fn unknown_method_is_answered_without_prehandler() {
    let mut router = router("dev1");
    let (channel, handle) = connected(&mut router, "*");
    let prehandled = Rc::new(Cell::new(false));
    let flag = Rc::clone(&prehandled);
    router.set_prehandler(move |_, request, _, _| {
        flag.set(true);
        Gate::Pass(request)
    });

    deliver(&mut router, channel, r#"{"id":5,"src":"cloud","method":"Nope"}"#);

    assert!(!prehandled.get());
    assert_eq!(
        sent(&handle),
        vec![json!({
            "v": 2, "id": 5, "src": "dev1", "dst": "cloud",
            "error": {"code": NOT_FOUND, "message": "No handler for Nope"}
        })]
    );
}

#[test]
fn arguments_are_checked_against_schema() {
    let mut router = router("dev1");
    let (channel, handle) = connected(&mut router, "*");
    let calls = Rc::new(Cell::new(0));
    let count = Rc::clone(&calls);
    router
        .add_handler(
            "Light.Set",
            ArgsShape::Schema(json!({
                "type": "object",
                "properties": {"on": {"type": "boolean"}},
                "required": ["on"]
            })),
            move |router, request, _, _| {
                count.set(count.get() + 1);
                router.send_response(request, &json!({})).unwrap();
            },
        )
        .unwrap();

    deliver(&mut router, channel, r#"{"id":1,"method":"Light.Set","args":{"on":"yes"}}"#);
    deliver(&mut router, channel, r#"{"id":2,"method":"Light.Set"}"#);
    deliver(&mut router, channel, r#"{"id":3,"method":"Light.Set","args":{"on":true}}"#);

    let frames = sent(&handle);
    assert_eq!(frames.len(), 3);
    assert_eq!(frames[0]["error"]["code"], json!(BAD_REQUEST));
    assert_eq!(frames[1]["error"]["code"], json!(BAD_REQUEST));
    assert_eq!(frames[2]["result"], json!({}));
    assert_eq!(calls.get(), 1);
}

#[test]
fn prehandler_stop_drops_request_silently() {
    let mut router = router("dev1");
    let (channel, handle) = connected(&mut router, "*");
    let handled = Rc::new(Cell::new(false));
    let flag = Rc::clone(&handled);
    router
        .add_handler("Sys.Reboot", ArgsShape::Any, move |router, request, _, _| {
            flag.set(true);
            router.send_response(request, &true).unwrap();
        })
        .unwrap();
    router.set_prehandler(|_, request, _, _| {
        request.abandon();
        Gate::Stop
    });

    deliver(&mut router, channel, r#"{"id":9,"method":"Sys.Reboot"}"#);

    assert!(!handled.get());
    assert_eq!(handle.sent_len(), 0);

    router.clear_prehandler();
    deliver(&mut router, channel, r#"{"id":10,"method":"Sys.Reboot"}"#);
    assert!(handled.get());
    assert_eq!(handle.sent_len(), 1);
}

#[test]
fn prehandler_can_answer_and_pass_state_to_handler() {
    let mut router = router("dev1");
    let (channel, handle) = connected(&mut router, "*");
    router
        .add_handler("Whoami", ArgsShape::Any, |router, request, _, _| {
            let level = request
                .user_data
                .as_ref()
                .and_then(|data| data.downcast_ref::<u32>())
                .copied();
            router.send_response(request, &level).unwrap();
        })
        .unwrap();
    router.set_prehandler(|router, mut request, _, _| {
        if request.src() == Some("intruder") {
            router
                .send_error(request, 403, Some("forbidden"))
                .expect("error response should be sent");
            return Gate::Stop;
        }
        request.user_data = Some(Box::new(3u32));
        Gate::Pass(request)
    });

    deliver(&mut router, channel, r#"{"id":1,"src":"intruder","method":"Whoami"}"#);
    deliver(&mut router, channel, r#"{"id":2,"src":"friend","method":"Whoami"}"#);

    let frames = sent(&handle);
    assert_eq!(frames[0]["error"], json!({"code": 403, "message": "forbidden"}));
    assert_eq!(frames[1]["result"], json!(3));
}

#[test]
fn handler_may_respond_later() {
    let mut router = router("dev1");
    let (channel, handle) = connected(&mut router, "*");
    let parked: Rc<RefCell<Option<RequestInfo>>> = Rc::new(RefCell::new(None));
    let slot = Rc::clone(&parked);
    router
        .add_handler("Slow.Op", ArgsShape::Any, move |_, request, _, _| {
            *slot.borrow_mut() = Some(request);
        })
        .unwrap();

    deliver(&mut router, channel, r#"{"id":4,"src":"cloud","tag":"x","method":"Slow.Op"}"#);
    assert_eq!(handle.sent_len(), 0);

    let request = parked.borrow_mut().take().expect("request should be parked");
    assert_eq!(request.method(), "Slow.Op");
    router.send_response(request, &json!({"done": true})).unwrap();

    assert_eq!(
        sent(&handle),
        vec![json!({
            "v": 2, "id": 4, "src": "dev1", "dst": "cloud", "tag": "x",
            "result": {"done": true}
        })]
    );
}

#[test]
fn response_falls_back_to_route_when_request_channel_is_gone() {
    let mut router = router("dev1");
    let (default, default_handle) = connected(&mut router, "*");
    let (transient, _) = MemoryChannel::new("ws");
    let transient = router.add_channel("", Box::new(transient.connected().non_persistent()), false);
    let parked: Rc<RefCell<Option<RequestInfo>>> = Rc::new(RefCell::new(None));
    let slot = Rc::clone(&parked);
    router
        .add_handler("Slow.Op", ArgsShape::Any, move |_, request, _, _| {
            *slot.borrow_mut() = Some(request);
        })
        .unwrap();

    deliver(&mut router, transient, r#"{"id":4,"src":"cloud","method":"Slow.Op"}"#);
    router.handle_channel_event(transient, ChannelEvent::Closed);
    assert_eq!(router.channel_state(transient), None);

    let request = parked.borrow_mut().take().unwrap();
    router.send_response(request, &1).unwrap();

    assert_eq!(router.resolve("cloud").unwrap(), default);
    assert_eq!(sent(&default_handle)[0]["dst"], json!("cloud"));
}

#[test]
fn notification_requests_get_no_response() {
    let mut router = router("dev1");
    let (channel, handle) = connected(&mut router, "*");
    let seen = Rc::new(Cell::new(false));
    let flag = Rc::clone(&seen);
    router
        .add_handler("Log.Event", ArgsShape::Any, move |router, request, _, _| {
            flag.set(!request.expects_response());
            router.send_response(request, &"ignored").unwrap();
        })
        .unwrap();

    deliver(&mut router, channel, r#"{"method":"Log.Event","args":[1]}"#);
    deliver(&mut router, channel, r#"{"method":"Missing"}"#);

    assert!(seen.get());
    assert_eq!(handle.sent_len(), 0);
}

#[test]
fn later_registration_replaces_handler() {
    let mut router = router("dev1");
    let (channel, handle) = connected(&mut router, "*");
    router
        .add_handler("M", ArgsShape::Any, |router, request, _, _| {
            router.send_response(request, &"first").unwrap();
        })
        .unwrap();
    router
        .add_handler("M", ArgsShape::Any, |router, request, _, _| {
            router.send_response(request, &"second").unwrap();
        })
        .unwrap();

    deliver(&mut router, channel, r#"{"id":1,"method":"M"}"#);
    assert_eq!(sent(&handle)[0]["result"], json!("second"));

    assert!(router.remove_handler("M"));
    deliver(&mut router, channel, r#"{"id":2,"method":"M"}"#);
    assert_eq!(sent(&handle)[0]["error"]["code"], json!(NOT_FOUND));
}

#[test]
fn error_helpers_shape_the_error_object() {
    let mut router = router("dev1");
    let (channel, handle) = connected(&mut router, "*");
    router
        .add_handler("Bare", ArgsShape::Any, |router, request, _, _| {
            router.send_error(request, 500, None).unwrap();
        })
        .unwrap();
    router
        .add_handler("Json", ArgsShape::Any, |router, request, _, _| {
            router
                .send_error_json(request, 400, &json!({"field": "on"}))
                .unwrap();
        })
        .unwrap();

    deliver(&mut router, channel, r#"{"id":1,"method":"Bare"}"#);
    deliver(&mut router, channel, r#"{"id":2,"method":"Json"}"#);

    let frames = sent(&handle);
    assert_eq!(frames[0]["error"], json!({"code": 500}));
    assert_eq!(
        frames[1]["error"],
        json!({"code": 400, "message": r#"{"field":"on"}"#})
    );
}

#[test]
fn list_and_describe_report_registered_methods() {
    let mut router = router("dev1");
    let (channel, handle) = connected(&mut router, "*");
    router.add_list_handler().unwrap();
    echo(&mut router);
    router
        .add_handler(
            "Light.Set",
            ArgsShape::Schema(json!({"type": "object"})),
            |router, request, _, _| router.send_response(request, &true).unwrap(),
        )
        .unwrap();

    deliver(&mut router, channel, r#"{"id":1,"method":"RPC.List"}"#);
    deliver(
        &mut router,
        channel,
        r#"{"id":2,"method":"RPC.Describe","args":{"name":"Light.Set"}}"#,
    );
    deliver(
        &mut router,
        channel,
        r#"{"id":3,"method":"RPC.Describe","args":{"name":"Test.Echo"}}"#,
    );
    deliver(
        &mut router,
        channel,
        r#"{"id":4,"method":"RPC.Describe","args":{"name":"Nope"}}"#,
    );
    deliver(&mut router, channel, r#"{"id":5,"method":"RPC.Describe"}"#);

    let frames = sent(&handle);
    assert_eq!(
        frames[0]["result"],
        json!(["Light.Set", "RPC.Describe", "RPC.List", "Test.Echo"])
    );
    assert_eq!(
        frames[1]["result"],
        json!({"name": "Light.Set", "args_schema": {"type": "object"}})
    );
    assert_eq!(
        frames[2]["result"],
        json!({"name": "Test.Echo", "args_schema": null})
    );
    assert_eq!(frames[3]["error"]["code"], json!(NOT_FOUND));
    assert_eq!(frames[4]["error"]["code"], json!(BAD_REQUEST));
    assert_eq!(router.methods().len(), 4);
}

fn auth_router() -> Router {
    let config = RouterConfig {
        psk: Some("secret".to_string()),
        ..RouterConfig::new("dev1")
    };
    let mut router = Router::new(config).unwrap();
    router.set_digest_verifier(|auth: &DigestAuth, _method: &str, psk: &str| {
        auth.response == format!("{}:{}:{psk}", auth.username, auth.nonce)
    });
    router.set_prehandler(|router, mut request, _, _| {
        if router.check_digest_auth(&mut request) {
            Gate::Pass(request)
        } else {
            router
                .send_error(request, 401, Some("Unauthorized"))
                .expect("error response should be sent");
            Gate::Stop
        }
    });
    router
        .add_handler("Sys.Reboot", ArgsShape::Any, |router, request, _, _| {
            let user = request.authn.username.clone();
            router.send_response(request, &user).unwrap();
        })
        .unwrap();
    router
}

#[test]
fn digest_auth_gates_untrusted_channels() {
    let mut router = auth_router();
    let (untrusted, handle) = connected(&mut router, "*");

    deliver(&mut router, untrusted, r#"{"id":1,"method":"Sys.Reboot"}"#);
    deliver(
        &mut router,
        untrusted,
        r#"{"id":2,"method":"Sys.Reboot","auth":{"realm":"dev1","username":"admin","nonce":17,"cnonce":"c","response":"admin:17:wrong"}}"#,
    );
    deliver(
        &mut router,
        untrusted,
        r#"{"id":3,"method":"Sys.Reboot","auth":{"realm":"dev1","username":"admin","nonce":17,"cnonce":"c","response":"admin:17:secret"}}"#,
    );

    let frames = sent(&handle);
    assert_eq!(frames[0]["error"]["code"], json!(401));
    assert_eq!(frames[1]["error"]["code"], json!(401));
    assert_eq!(frames[2]["result"], json!("admin"));
}

#[test]
fn trusted_channel_skips_digest_auth() {
    let mut router = auth_router();
    let (channel, handle) = MemoryChannel::new("uart");
    let trusted = router.add_channel("*", Box::new(channel.connected()), true);

    deliver(&mut router, trusted, r#"{"id":1,"method":"Sys.Reboot"}"#);

    assert_eq!(sent(&handle)[0]["result"], json!(null));
}
