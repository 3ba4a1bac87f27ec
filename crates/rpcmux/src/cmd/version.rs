use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("rpcmux {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: rpcmux");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!("frame_version: {}", rpcmux_frame::FRAME_VERSION);
    println!("target: {}", option_env!("RPCMUX_BUILD_TARGET").unwrap_or("unknown"));
    println!("target_os: {}", std::env::consts::OS);
    println!("target_arch: {}", std::env::consts::ARCH);
    println!(
        "features: router={}, cli=true",
        cfg!(feature = "router")
    );
    Ok(SUCCESS)
}
