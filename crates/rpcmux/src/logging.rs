use clap::ValueEnum;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

/// Targets that follow `--log-level`. Everything else stays at warn or
/// quieter.
const ROUTER_TARGETS: [&str; 5] = [
    "rpcmux",
    "rpcmux_router",
    "rpcmux_channel",
    "rpcmux_frame",
    "rpcmux_schema",
];

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }
}

/// Per-target filter: router crates at `level`, dependencies capped at warn.
pub fn log_filter(level: LogLevel) -> Targets {
    let level = LevelFilter::from(level);
    ROUTER_TARGETS.iter().fold(
        Targets::new().with_default(level.min(LevelFilter::WARN)),
        |targets, target| targets.with_target(*target, level),
    )
}

/// Install the stderr subscriber. Router events carry `channel`, `dst`,
/// `id` and `method` fields, which the JSON format keeps structured.
pub fn init_logging(format: LogFormat, level: LogLevel) {
    let registry = tracing_subscriber::registry().with(log_filter(level));

    let _ = match format {
        LogFormat::Text => registry
            .with(fmt::layer().with_writer(std::io::stderr).with_ansi(false))
            .try_init(),
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_ansi(false),
            )
            .try_init(),
    };
}
