use std::io::IsTerminal;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use devlink_frame::DecodeStats;
use serde::Serialize;

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

/// One decoded message, rendered for display.
pub struct MessageView {
    pub summary: String,
    pub json: serde_json::Value,
}

#[derive(Serialize)]
struct MessageOutput<'a> {
    protocol: &'a str,
    message: &'a serde_json::Value,
    summary: &'a str,
    timestamp: String,
}

#[derive(Serialize)]
struct DecodeOutput<'a> {
    protocol: &'a str,
    messages: Vec<&'a serde_json::Value>,
    stats: &'a DecodeStats,
}

/// Print one message as it arrives from a live link.
pub fn print_message(protocol: &str, view: &MessageView, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = MessageOutput {
                protocol,
                message: &view.json,
                summary: &view.summary,
                timestamp: now_unix_seconds(),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["PROTOCOL", "MESSAGE"])
                .add_row(vec![protocol.to_string(), view.summary.clone()]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!("{protocol} {}", view.summary);
        }
    }
}

/// Print the result of decoding a capture.
pub fn print_decode_report(
    protocol: &str,
    views: &[MessageView],
    stats: &DecodeStats,
    format: OutputFormat,
) {
    match format {
        OutputFormat::Json => {
            let out = DecodeOutput {
                protocol,
                messages: views.iter().map(|view| &view.json).collect(),
                stats,
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut messages = Table::new();
            messages
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["#", "MESSAGE"]);
            for (index, view) in views.iter().enumerate() {
                messages.add_row(vec![index.to_string(), view.summary.clone()]);
            }
            println!("{messages}");

            let mut counters = Table::new();
            counters
                .load_preset(UTF8_FULL)
                .set_header(vec!["COUNTER", "VALUE"]);
            for (name, value) in stat_rows(stats) {
                counters.add_row(vec![name.to_string(), value.to_string()]);
            }
            println!("{counters}");
        }
        OutputFormat::Pretty => {
            for view in views {
                println!("{protocol} {}", view.summary);
            }
            let line: Vec<String> = stat_rows(stats)
                .iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect();
            println!("{}", line.join(" "));
        }
    }
}

fn stat_rows(stats: &DecodeStats) -> [(&'static str, u64); 7] {
    [
        ("frames", stats.frames),
        ("messages", stats.messages),
        ("discarded_bytes", stats.discarded_bytes),
        ("framing_errors", stats.framing_errors),
        ("validation_errors", stats.validation_errors),
        ("decode_errors", stats.decode_errors),
        ("abandoned", stats.abandoned),
    ]
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
