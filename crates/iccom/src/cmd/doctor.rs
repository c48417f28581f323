use std::sync::mpsc;
use std::time::Duration;

use iccom_channel::{ChannelId, Iccom, MAX_FRAME_SIZE};
use iccom_transport::SimBus;
use serde::Serialize;

use crate::cmd::{DoctorArgs, Target};
use crate::exit::{CliResult, HEALTH_CHECK_FAILED, SUCCESS};
use crate::output::OutputFormat;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
enum CheckStatus {
    Pass,
    Fail,
    Warn,
    Info,
}

#[derive(Debug, Serialize)]
struct CheckResult {
    name: String,
    status: CheckStatus,
    detail: String,
}

impl CheckResult {
    fn new(name: impl Into<String>, status: CheckStatus, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct DoctorOutput {
    checks: Vec<CheckResult>,
    overall: &'static str,
}

pub fn run(_args: DoctorArgs, target: &Target, format: OutputFormat) -> CliResult<i32> {
    let mut checks = vec![platform_transport_check(target)];
    if target.simulate {
        checks.push(simulated_round_trip_check());
    } else {
        checks.extend(device_node_checks(target));
    }
    checks.push(compiled_features_check());

    let has_fail = checks.iter().any(|c| c.status == CheckStatus::Fail);
    let overall = if has_fail { "fail" } else { "pass" };
    let output = DoctorOutput { checks, overall };

    print_doctor(&output, format);

    if has_fail {
        Ok(HEALTH_CHECK_FAILED)
    } else {
        Ok(SUCCESS)
    }
}

fn print_doctor(output: &DoctorOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(output).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table | OutputFormat::Pretty => {
            println!("iccom doctor\n");
            for c in &output.checks {
                println!(
                    "  [{:>4}] {:<22} {}",
                    status_text(c.status),
                    c.name,
                    c.detail
                );
            }
            if output.overall == "pass" {
                println!("\n  Result: all checks passed");
            } else {
                println!("\n  Result: one or more checks failed");
            }
        }
        OutputFormat::Raw => {
            println!("{}", output.overall);
        }
    }
}

fn status_text(status: CheckStatus) -> &'static str {
    match status {
        CheckStatus::Pass => "PASS",
        CheckStatus::Fail => "FAIL",
        CheckStatus::Warn => "WARN",
        CheckStatus::Info => "INFO",
    }
}

fn platform_transport_check(target: &Target) -> CheckResult {
    if target.simulate {
        return CheckResult::new(
            "platform_transport",
            CheckStatus::Info,
            "in-memory loopback bus (--simulate)",
        );
    }

    if cfg!(unix) {
        CheckResult::new(
            "platform_transport",
            CheckStatus::Pass,
            format!("character devices at {}N", target.device_prefix.display()),
        )
    } else {
        CheckResult::new(
            "platform_transport",
            CheckStatus::Fail,
            "channel devices are only available on Unix",
        )
    }
}

#[cfg(unix)]
fn device_node_checks(target: &Target) -> Vec<CheckResult> {
    use iccom_transport::{CharDeviceOpener, DeviceOpener};

    let opener = CharDeviceOpener::with_prefix(&target.device_prefix);
    let mut present = 0usize;
    let mut checks: Vec<CheckResult> = ChannelId::all()
        .map(|channel| {
            let path = opener.device_path(channel);
            let name = format!("channel_{channel}");
            match device_node_status(&path) {
                NodeStatus::Missing => CheckResult::new(
                    name,
                    CheckStatus::Warn,
                    format!("{} missing (channel unsupported)", path.display()),
                ),
                NodeStatus::NotCharDevice => {
                    present += 1;
                    CheckResult::new(
                        name,
                        CheckStatus::Warn,
                        format!("{} is not a character device", path.display()),
                    )
                }
                NodeStatus::Inaccessible(err) => {
                    present += 1;
                    CheckResult::new(
                        name,
                        CheckStatus::Fail,
                        format!("{} not readable and writable: {err}", path.display()),
                    )
                }
                NodeStatus::Ready => {
                    present += 1;
                    CheckResult::new(
                        name,
                        CheckStatus::Pass,
                        format!("{} ready", path.display()),
                    )
                }
            }
        })
        .collect();

    if present == 0 {
        checks.push(CheckResult::new(
            "device_nodes",
            CheckStatus::Fail,
            format!(
                "no channel device nodes at {}N",
                target.device_prefix.display()
            ),
        ));
    }
    checks
}

#[cfg(not(unix))]
fn device_node_checks(_target: &Target) -> Vec<CheckResult> {
    Vec::new()
}

#[cfg(unix)]
enum NodeStatus {
    Missing,
    NotCharDevice,
    Inaccessible(std::io::Error),
    Ready,
}

#[cfg(unix)]
fn device_node_status(path: &std::path::Path) -> NodeStatus {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;
    use std::os::unix::fs::FileTypeExt;

    let metadata = match std::fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return NodeStatus::Missing,
        Err(err) => return NodeStatus::Inaccessible(err),
    };
    if !metadata.file_type().is_char_device() {
        return NodeStatus::NotCharDevice;
    }

    let Ok(c_path) = CString::new(path.as_os_str().as_bytes()) else {
        return NodeStatus::Inaccessible(std::io::Error::from(std::io::ErrorKind::InvalidInput));
    };
    // SAFETY: `c_path` is a valid NUL-terminated string for the duration of the call.
    let rc = unsafe { libc::access(c_path.as_ptr(), libc::R_OK | libc::W_OK) };
    if rc == 0 {
        NodeStatus::Ready
    } else {
        NodeStatus::Inaccessible(std::io::Error::last_os_error())
    }
}

fn simulated_round_trip_check() -> CheckResult {
    let iccom = Iccom::new(SimBus::loopback());
    let mut echoed = 0usize;

    for channel in ChannelId::all() {
        let (tx, rx) = mpsc::channel();
        let handle = match iccom.init(
            u32::from(channel),
            vec![0u8; MAX_FRAME_SIZE],
            move |_: ChannelId, data: &[u8]| {
                let _ = tx.send(data.to_vec());
            },
        ) {
            Ok(handle) => handle,
            Err(err) => {
                return CheckResult::new(
                    "simulated_round_trip",
                    CheckStatus::Fail,
                    format!("channel {channel} init failed: {err}"),
                )
            }
        };

        let sent = iccom.send(handle, b"doctor");
        let echo = rx.recv_timeout(Duration::from_secs(1));
        if let Err(err) = iccom.finalize(handle) {
            return CheckResult::new(
                "simulated_round_trip",
                CheckStatus::Fail,
                format!("channel {channel} final failed: {err}"),
            );
        }
        match (sent, echo) {
            (Ok(()), Ok(data)) if data == b"doctor" => echoed += 1,
            (Err(err), _) => {
                return CheckResult::new(
                    "simulated_round_trip",
                    CheckStatus::Fail,
                    format!("channel {channel} send failed: {err}"),
                )
            }
            _ => {
                return CheckResult::new(
                    "simulated_round_trip",
                    CheckStatus::Fail,
                    format!("channel {channel} echo missing"),
                )
            }
        }
    }

    CheckResult::new(
        "simulated_round_trip",
        CheckStatus::Pass,
        format!("{echoed} channels echoed"),
    )
}

fn compiled_features_check() -> CheckResult {
    let mut features = Vec::new();
    if cfg!(feature = "cli") {
        features.push("cli");
    }
    if cfg!(unix) {
        features.push("chardev");
    }

    CheckResult::new("compiled_features", CheckStatus::Info, features.join(", "))
}
