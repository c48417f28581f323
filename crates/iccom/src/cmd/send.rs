use std::fs;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::Duration;

use iccom_channel::{ChannelHandle, ChannelId, Iccom, MAX_FRAME_SIZE};

use crate::cmd::{parse_duration, SendArgs, Target};
use crate::exit::{iccom_error, io_error, CliError, CliResult, FAILURE, SUCCESS, TIMEOUT};
use crate::output::{print_datagram, OutputFormat};

/// Payload sent when neither --data nor --file is given.
const SAMPLE_PAYLOAD: &[u8] = b"Linux-ICCOM-TEST-SAMPLE-data";

type Datagram = (ChannelId, Vec<u8>);

pub fn run(args: SendArgs, target: &Target, format: OutputFormat) -> CliResult<i32> {
    let wait_timeout = parse_duration(&args.wait_timeout)?;
    let payload = resolve_payload(&args)?;
    let iccom = target.context()?;

    let (tx, rx) = mpsc::channel();
    let handle = iccom
        .init(
            args.channel,
            vec![0u8; MAX_FRAME_SIZE],
            move |channel: ChannelId, data: &[u8]| {
                let _ = tx.send((channel, data.to_vec()));
            },
        )
        .map_err(|err| iccom_error("init failed", err))?;

    let outcome = exchange(
        &iccom,
        handle,
        &payload,
        args.wait.then_some(wait_timeout),
        &rx,
    );
    iccom
        .finalize(handle)
        .map_err(|err| iccom_error("final failed", err))?;

    if let Some((channel, data)) = outcome? {
        print_datagram(channel, &data, format);
    }
    Ok(SUCCESS)
}

fn exchange(
    iccom: &Iccom,
    handle: ChannelHandle,
    payload: &[u8],
    wait: Option<Duration>,
    rx: &Receiver<Datagram>,
) -> CliResult<Option<Datagram>> {
    iccom
        .send(handle, payload)
        .map_err(|err| iccom_error("send failed", err))?;

    let Some(timeout) = wait else {
        return Ok(None);
    };
    wait_for_datagram(rx, timeout).map(Some)
}

fn wait_for_datagram(rx: &Receiver<Datagram>, timeout: Duration) -> CliResult<Datagram> {
    rx.recv_timeout(timeout).map_err(|err| match err {
        RecvTimeoutError::Timeout => CliError::new(
            TIMEOUT,
            format!("no datagram received within {}ms", timeout.as_millis()),
        ),
        RecvTimeoutError::Disconnected => CliError::new(FAILURE, "receive thread stopped"),
    })
}

fn resolve_payload(args: &SendArgs) -> CliResult<Vec<u8>> {
    if let Some(data) = &args.data {
        return Ok(data.as_bytes().to_vec());
    }
    if let Some(path) = &args.file {
        return fs::read(path)
            .map_err(|err| io_error(&format!("failed reading {}", path.display()), &err));
    }
    Ok(SAMPLE_PAYLOAD.to_vec())
}

#[cfg(test)]
mod tests {
    use iccom_transport::SimBus;

    use super::*;

    fn args() -> SendArgs {
        SendArgs {
            channel: 0,
            data: None,
            file: None,
            wait: false,
            wait_timeout: "5s".to_string(),
        }
    }

    #[test]
    fn payload_defaults_to_sample_data() {
        assert_eq!(resolve_payload(&args()).unwrap(), SAMPLE_PAYLOAD);
        let data = SendArgs {
            data: Some("ABC".to_string()),
            ..args()
        };
        assert_eq!(resolve_payload(&data).unwrap(), b"ABC");
    }

    #[test]
    fn missing_payload_file_is_an_error() {
        let file = SendArgs {
            file: Some(std::env::temp_dir().join(format!(
                "iccom-missing-{}/payload.bin",
                std::process::id()
            ))),
            ..args()
        };
        assert!(resolve_payload(&file).is_err());
    }

    #[test]
    fn exchange_returns_the_echo() {
        let iccom = Iccom::new(SimBus::loopback());
        let (tx, rx) = mpsc::channel();
        let handle = iccom
            .init(
                5,
                vec![0u8; MAX_FRAME_SIZE],
                move |channel: ChannelId, data: &[u8]| {
                    let _ = tx.send((channel, data.to_vec()));
                },
            )
            .expect("init should succeed");

        let (channel, data) = exchange(&iccom, handle, b"ping", Some(Duration::from_secs(5)), &rx)
            .expect("exchange should succeed")
            .expect("echo should be returned");
        assert_eq!(channel.get(), 5);
        assert_eq!(data, b"ping");

        iccom.finalize(handle).expect("final should succeed");
    }

    #[test]
    fn wait_times_out_without_datagram() {
        let (_tx, rx) = mpsc::channel::<Datagram>();
        let err = wait_for_datagram(&rx, Duration::from_millis(20)).unwrap_err();
        assert_eq!(err.code, TIMEOUT);
    }
}
