use std::io::Read;

use rpcmux_frame::parse_frame_with_limit;
use tracing::debug;

use crate::cmd::DecodeArgs;
use crate::exit::{frame_error, io_error, CliResult, SUCCESS};
use crate::output::{print_frame, OutputFormat};

pub fn run(args: DecodeArgs, format: OutputFormat) -> CliResult<i32> {
    let raw = match (args.data, args.file) {
        (Some(data), _) => data.into_bytes(),
        (None, Some(path)) => std::fs::read(&path)
            .map_err(|e| io_error(&format!("failed to read {}", path.display()), e))?,
        (None, None) => {
            let mut buf = Vec::new();
            std::io::stdin()
                .read_to_end(&mut buf)
                .map_err(|e| io_error("failed to read stdin", e))?;
            buf
        }
    };
    debug!(size = raw.len(), max_size = args.max_size, "decoding frame");

    let frame = parse_frame_with_limit(&raw, args.max_size)
        .map_err(|e| frame_error("invalid frame", e))?;
    print_frame(&frame, format);
    Ok(SUCCESS)
}
