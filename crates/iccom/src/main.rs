mod cmd;
mod exit;
mod logging;
mod output;

use std::path::PathBuf;

use clap::Parser;

use crate::cmd::{Command, Target};
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "iccom", version, about = "Inter-core channel CLI")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr). `ICCOM_LOG` overrides it with a filter.
    #[arg(long, value_name = "LEVEL", default_value = "info", global = true)]
    log_level: LogLevel,

    /// Device node prefix; channel N opens `<PREFIX>N`.
    #[arg(
        long,
        value_name = "PREFIX",
        env = "ICCOM_DEVICE_PREFIX",
        default_value = "/dev/iccom",
        global = true
    )]
    device_prefix: PathBuf,

    /// Use an in-memory loopback bus instead of device nodes.
    #[arg(long, global = true)]
    simulate: bool,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let target = Target {
        device_prefix: cli.device_prefix,
        simulate: cli.simulate,
    };
    let result = cmd::run(cli.command, &target, format);

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}
