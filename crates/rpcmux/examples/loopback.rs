//! Two routers wired back to back over in-memory channels.
//!
//! Run with:
//!   cargo run --example loopback

use std::cell::RefCell;
use std::rc::Rc;

use rpcmux::channel::{ChannelEvent, MemoryChannel};
use rpcmux::router::{
    observer_fn, ArgsShape, CallRequest, Gate, Router, RouterConfig, DST_DEFAULT,
};
use serde_json::json;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut device = Router::new(RouterConfig::new("dev1"))?;
    let mut cloud = Router::new(RouterConfig::new("cloud"))?;

    let (device_side, device_handle) = MemoryChannel::new("mem");
    let (cloud_side, cloud_handle) = MemoryChannel::new("mem");
    let device_channel = device.add_channel("", Box::new(device_side.connected()), false);
    let cloud_channel = cloud.add_channel(DST_DEFAULT, Box::new(cloud_side.connected()), false);

    device.add_observer(observer_fn(|_, event| eprintln!("device event: {event:?}")));
    device.add_list_handler()?;
    device.add_handler(
        "Sys.SetName",
        ArgsShape::Schema(json!({
            "type": "object",
            "properties": { "name": { "type": "string" } },
            "required": ["name"]
        })),
        |router, request, _, args| {
            let name = args.map(|raw| raw.get().to_string()).unwrap_or_default();
            eprintln!("device renamed to {name}");
            if let Err(e) = router.send_response(request, &json!({"restart_required": false})) {
                eprintln!("response failed: {e}");
            }
        },
    )?;
    device.set_prehandler(|_, request, info, _| {
        eprintln!("request {} over {}", request.method(), info.channel_type);
        Gate::Pass(request)
    });

    let replies = Rc::new(RefCell::new(Vec::new()));
    for (method, args) in [
        ("RPC.List", None),
        ("Sys.SetName", Some(json!({"name": "kitchen"}))),
        ("Sys.SetName", Some(json!({"label": "wrong"}))),
    ] {
        let mut request = CallRequest::new(method).dst("dev1");
        if let Some(args) = &args {
            request = request.args(args)?;
        }
        let sink = Rc::clone(&replies);
        cloud.call(request, move |_, _, result| {
            let line = match result {
                Ok(result) => format!("{method}: {}", result.map_or("null", |raw| raw.get())),
                Err(e) => format!("{method}: {e}"),
            };
            sink.borrow_mut().push(line);
        })?;
    }

    loop {
        let outgoing = cloud_handle.take_sent();
        let incoming = device_handle.take_sent();
        if outgoing.is_empty() && incoming.is_empty() {
            break;
        }
        for frame in &outgoing {
            device.handle_channel_event(device_channel, ChannelEvent::FrameReceived(&frame[..]));
        }
        for frame in &incoming {
            cloud.handle_channel_event(cloud_channel, ChannelEvent::FrameReceived(&frame[..]));
        }
    }

    for line in replies.borrow().iter() {
        println!("{line}");
    }
    Ok(())
}
