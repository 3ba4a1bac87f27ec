use clap::{Args, Subcommand};
use std::path::PathBuf;

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod decode;
pub mod loopback;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Parse one frame and print its fields.
    Decode(DecodeArgs),
    /// Issue a call between two in-process routers.
    Loopback(LoopbackArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Decode(args) => decode::run(args, format),
        Command::Loopback(args) => loopback::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct DecodeArgs {
    /// Frame text. Reads stdin when neither --data nor --file is given.
    #[arg(long, conflicts_with = "file")]
    pub data: Option<String>,
    /// Read the frame from a file.
    #[arg(long, conflicts_with = "data")]
    pub file: Option<PathBuf>,
    /// Reject frames larger than this many bytes.
    #[arg(long, default_value_t = rpcmux_frame::DEFAULT_MAX_FRAME_SIZE)]
    pub max_size: usize,
}

#[derive(Args, Debug)]
pub struct LoopbackArgs {
    /// Method to call on the serving router.
    #[arg(long, default_value = rpcmux_router::METHOD_LIST)]
    pub method: String,
    /// JSON arguments for the call.
    #[arg(long)]
    pub args: Option<String>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}
