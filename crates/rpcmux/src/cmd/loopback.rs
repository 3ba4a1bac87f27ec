use std::cell::RefCell;
use std::rc::Rc;

use bytes::Bytes;
use rpcmux_channel::{ChannelEvent, MemoryChannel, MemoryHandle};
use rpcmux_router::{
    ArgsShape, CallRequest, ChannelId, Router, RouterConfig, RpcError, DST_DEFAULT,
};
use serde_json::value::RawValue;
use tracing::{debug, warn};

use crate::cmd::LoopbackArgs;
use crate::exit::{router_error, CliError, CliResult, DATA_INVALID, FAILURE, SUCCESS};
use crate::output::{print_call, CallErrorOutput, CallOutput, OutputFormat};

const SERVER_ID: &str = "loopback-server";
const CLIENT_ID: &str = "loopback-client";

// Upper bound on delivery rounds; a healthy exchange settles in two.
const MAX_ROUNDS: usize = 64;

type Outcome = Result<Option<Box<RawValue>>, RpcError>;

struct Side {
    router: Router,
    channel: ChannelId,
    handle: MemoryHandle,
}

pub fn run(args: LoopbackArgs, format: OutputFormat) -> CliResult<i32> {
    let call_args = args
        .args
        .map(RawValue::from_string)
        .transpose()
        .map_err(|e| CliError::new(DATA_INVALID, format!("invalid --args: {e}")))?;

    let mut server = serving_side()?;
    let mut client = client_side()?;

    let outcome: Rc<RefCell<Option<Outcome>>> = Rc::new(RefCell::new(None));
    let sink = Rc::clone(&outcome);
    let mut request = CallRequest::new(args.method.as_str()).dst(SERVER_ID);
    if let Some(raw) = call_args {
        request = request.raw_args(raw);
    }
    let id = client
        .router
        .call(request, move |_, _, result| {
            *sink.borrow_mut() = Some(result.map(|raw| raw.map(ToOwned::to_owned)));
        })
        .map_err(|e| router_error("call failed", e))?;

    pump(&mut client, &mut server);

    let Some(outcome) = outcome.borrow_mut().take() else {
        return Err(CliError::new(FAILURE, format!("no response to {}", args.method)));
    };
    let (result, error) = match &outcome {
        Ok(result) => (result.as_deref(), None),
        Err(e) => (
            None,
            Some(CallErrorOutput {
                code: e.code,
                message: &e.message,
            }),
        ),
    };
    print_call(
        &CallOutput {
            method: &args.method,
            id,
            ok: outcome.is_ok(),
            result,
            error,
        },
        format,
    );
    Ok(if outcome.is_ok() { SUCCESS } else { FAILURE })
}

fn serving_side() -> CliResult<Side> {
    let mut router = Router::new(RouterConfig::new(SERVER_ID))
        .map_err(|e| router_error("server setup failed", e))?;
    let (channel, handle) = MemoryChannel::new("loopback");
    // Provisional: the destination is learned from the client's first frame.
    let channel = router.add_channel("", Box::new(channel.connected()), true);

    router
        .add_list_handler()
        .map_err(|e| router_error("server setup failed", e))?;
    router
        .add_handler("Echo", ArgsShape::Any, |router, request, _, args| {
            if let Err(e) = router.send_response_raw(request, args) {
                warn!(error = %e, "echo response failed");
            }
        })
        .map_err(|e| router_error("server setup failed", e))?;

    Ok(Side {
        router,
        channel,
        handle,
    })
}

fn client_side() -> CliResult<Side> {
    let mut router = Router::new(RouterConfig::new(CLIENT_ID))
        .map_err(|e| router_error("client setup failed", e))?;
    let (channel, handle) = MemoryChannel::new("loopback");
    let channel = router.add_channel(DST_DEFAULT, Box::new(channel.connected()), false);
    Ok(Side {
        router,
        channel,
        handle,
    })
}

/// Move frames between the two sides until neither has anything to send.
fn pump(client: &mut Side, server: &mut Side) {
    for round in 0..MAX_ROUNDS {
        let mut moved = deliver(client.handle.take_sent(), server);
        moved += deliver(server.handle.take_sent(), client);
        if moved == 0 {
            debug!(rounds = round, "loopback settled");
            return;
        }
    }
    warn!(rounds = MAX_ROUNDS, "loopback did not settle");
}

fn deliver(frames: Vec<Bytes>, to: &mut Side) -> usize {
    let count = frames.len();
    for frame in frames {
        to.router
            .handle_channel_event(to.channel, ChannelEvent::FrameReceived(&frame[..]));
    }
    count
}
