use std::fmt::Write as _;
use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use iccom_channel::ChannelId;
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Pretty
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct DatagramOutput {
    channel: u8,
    size: usize,
    payload: String,
    timestamp: String,
}

pub fn print_datagram(channel: ChannelId, data: &[u8], format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = DatagramOutput {
                channel: channel.get(),
                size: data.len(),
                payload: escape_payload(data),
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
                .set_header(vec!["CHANNEL", "SIZE", "PAYLOAD"])
                .add_row(vec![
                    channel.to_string(),
                    data.len().to_string(),
                    escape_payload(data),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "channel {channel}: received {} bytes: {}",
                data.len(),
                escape_payload(data)
            );
        }
        OutputFormat::Raw => {
            print_raw(data);
        }
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

/// Printable ASCII as is, every other byte as `\xNN`.
pub fn escape_payload(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len());
    for &byte in data {
        if (0x20..0x80).contains(&byte) {
            out.push(char::from(byte));
        } else {
            let _ = write!(out, "\\x{byte:02x}");
        }
    }
    out
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
