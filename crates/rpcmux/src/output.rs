use std::io::IsTerminal;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use rpcmux_frame::{Frame, FrameKind};
use serde::Serialize;
use serde_json::value::RawValue;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct ErrorOutput<'a> {
    code: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'a str>,
}

#[derive(Serialize)]
struct FrameOutput<'a> {
    kind: &'static str,
    version: i32,
    id: i64,
    src: Option<&'a str>,
    dst: Option<&'a str>,
    tag: Option<&'a str>,
    method: Option<&'a str>,
    args: Option<&'a RawValue>,
    result: Option<&'a RawValue>,
    error: Option<ErrorOutput<'a>>,
    has_auth: bool,
}

impl<'a> FrameOutput<'a> {
    fn new(frame: &'a Frame<'a>) -> Self {
        let error = (frame.error_code != 0 || frame.error_msg.is_some()).then(|| ErrorOutput {
            code: frame.error_code,
            message: frame.error_msg.as_deref(),
        });
        Self {
            kind: kind_name(frame.kind()),
            version: frame.version,
            id: frame.id,
            src: frame.src.as_deref(),
            dst: frame.dst.as_deref(),
            tag: frame.tag.as_deref(),
            method: frame.method.as_deref(),
            args: frame.args,
            result: frame.result,
            error,
            has_auth: frame.auth.is_some(),
        }
    }
}

pub fn print_frame(frame: &Frame<'_>, format: OutputFormat) {
    let out = FrameOutput::new(frame);
    match format {
        OutputFormat::Json => println!("{}", to_json(&out)),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["FIELD", "VALUE"]);
            table.add_row(vec!["kind".to_string(), out.kind.to_string()]);
            table.add_row(vec!["version".to_string(), out.version.to_string()]);
            table.add_row(vec!["id".to_string(), out.id.to_string()]);
            for (name, value) in [
                ("src", out.src),
                ("dst", out.dst),
                ("tag", out.tag),
                ("method", out.method),
                ("args", out.args.map(RawValue::get)),
                ("result", out.result.map(RawValue::get)),
            ] {
                if let Some(value) = value {
                    table.add_row(vec![name.to_string(), value.to_string()]);
                }
            }
            if let Some(error) = &out.error {
                table.add_row(vec!["error".to_string(), error_text(error)]);
            }
            if out.has_auth {
                table.add_row(vec!["auth".to_string(), "<present>".to_string()]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            let mut line = format!("{} id={}", out.kind, out.id);
            for (name, value) in [
                ("method", out.method),
                ("src", out.src),
                ("dst", out.dst),
                ("tag", out.tag),
                ("args", out.args.map(RawValue::get)),
                ("result", out.result.map(RawValue::get)),
            ] {
                if let Some(value) = value {
                    line.push_str(&format!(" {name}={value}"));
                }
            }
            if let Some(error) = &out.error {
                line.push_str(&format!(" error=\"{}\"", error_text(error)));
            }
            println!("{line}");
        }
    }
}

/// Outcome of one call issued by the CLI.
#[derive(Serialize)]
pub struct CallOutput<'a> {
    pub method: &'a str,
    pub id: i64,
    pub ok: bool,
    pub result: Option<&'a RawValue>,
    pub error: Option<CallErrorOutput<'a>>,
}

#[derive(Serialize)]
pub struct CallErrorOutput<'a> {
    pub code: i32,
    pub message: &'a str,
}

pub fn print_call(out: &CallOutput<'_>, format: OutputFormat) {
    let result = out.result.map(RawValue::get).unwrap_or("null");
    match format {
        OutputFormat::Json => println!("{}", to_json(out)),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["METHOD", "ID", "STATUS", "RESULT"]);
            let (status, body) = match &out.error {
                Some(error) => (format!("error {}", error.code), error.message.to_string()),
                None => ("ok".to_string(), result.to_string()),
            };
            table.add_row(vec![out.method.to_string(), out.id.to_string(), status, body]);
            println!("{table}");
        }
        OutputFormat::Pretty => match &out.error {
            Some(error) => println!(
                "method={} id={} error={} message=\"{}\"",
                out.method, out.id, error.code, error.message
            ),
            None => println!("method={} id={} result={result}", out.method, out.id),
        },
    }
}

fn kind_name(kind: FrameKind) -> &'static str {
    match kind {
        FrameKind::Request => "request",
        FrameKind::Response => "response",
    }
}

fn error_text(error: &ErrorOutput<'_>) -> String {
    match error.message {
        Some(message) => format!("{}: {message}", error.code),
        None => error.code.to_string(),
    }
}

fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
}
