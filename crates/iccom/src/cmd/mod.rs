use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand};
use iccom_channel::Iccom;
use iccom_transport::SimBus;

use crate::exit::{CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod doctor;
pub mod listen;
pub mod send;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Open a channel, send one datagram, and close it.
    Send(SendArgs),
    /// Print datagrams received on a channel.
    Listen(ListenArgs),
    /// Show version information.
    Version(VersionArgs),
    /// Check which channel device nodes are usable.
    Doctor(DoctorArgs),
}

/// Where channels are opened.
#[derive(Debug, Clone)]
pub struct Target {
    pub device_prefix: PathBuf,
    pub simulate: bool,
}

impl Target {
    pub fn context(&self) -> CliResult<Iccom> {
        if self.simulate {
            return Ok(Iccom::new(SimBus::loopback()));
        }

        #[cfg(unix)]
        {
            Ok(Iccom::new(iccom_transport::CharDeviceOpener::with_prefix(
                &self.device_prefix,
            )))
        }

        #[cfg(not(unix))]
        {
            Err(CliError::new(
                USAGE,
                "channel devices are only available on Unix; use --simulate",
            ))
        }
    }
}

pub fn run(command: Command, target: &Target, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Send(args) => send::run(args, target, format),
        Command::Listen(args) => listen::run(args, target, format),
        Command::Version(args) => version::run(args),
        Command::Doctor(args) => doctor::run(args, target, format),
    }
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Channel to send on (0-7).
    #[arg(long, short = 'c', default_value = "0")]
    pub channel: u32,
    /// String payload.
    #[arg(long, conflicts_with = "file")]
    pub data: Option<String>,
    /// Read payload from file.
    #[arg(long, conflicts_with = "data")]
    pub file: Option<PathBuf>,
    /// Wait for one received datagram and print it.
    #[arg(long)]
    pub wait: bool,
    /// Maximum time to wait when --wait is set (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub wait_timeout: String,
}

#[derive(Args, Debug)]
pub struct ListenArgs {
    /// Channel to listen on (0-7).
    #[arg(long, short = 'c', default_value = "0")]
    pub channel: u32,
    /// Exit after receiving N datagrams.
    #[arg(long)]
    pub count: Option<usize>,
    /// Stop listening after this long (e.g. 10s, 500ms).
    #[arg(long)]
    pub timeout: Option<String>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

#[derive(Args, Debug, Default)]
pub struct DoctorArgs {}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}
