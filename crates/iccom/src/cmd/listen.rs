use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use iccom_channel::{ChannelId, MAX_FRAME_SIZE};

use crate::cmd::{parse_duration, ListenArgs, Target};
use crate::exit::{iccom_error, CliError, CliResult, SUCCESS, TIMEOUT};
use crate::output::{print_datagram, OutputFormat};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

pub fn run(args: ListenArgs, target: &Target, format: OutputFormat) -> CliResult<i32> {
    let deadline = args
        .timeout
        .as_deref()
        .map(parse_duration)
        .transpose()?
        .map(|timeout| Instant::now() + timeout);

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

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

    let mut printed = 0usize;
    let mut code = SUCCESS;
    while running.load(Ordering::SeqCst) {
        if args.count.is_some_and(|count| printed >= count) {
            break;
        }
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            if args.count.is_some() {
                code = TIMEOUT;
            }
            break;
        }

        match rx.recv_timeout(POLL_INTERVAL) {
            Ok((channel, data)) => {
                print_datagram(channel, &data, format);
                printed = printed.saturating_add(1);
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    iccom
        .finalize(handle)
        .map_err(|err| iccom_error("final failed", err))?;
    Ok(code)
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| {
        CliError::new(
            crate::exit::INTERNAL,
            format!("signal handler setup failed: {err}"),
        )
    })
}
