//! Per-channel receive thread.
//!
//! The thread reads one datagram at a time into the caller's buffer and hands
//! it to the callback before reading again. The buffer is reused in place, so
//! the callback only ever sees a borrow that ends when it returns. Read
//! failures are logged and retried; only a cancelled read ends the thread.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use iccom_transport::{errno, ChannelDevice, ChannelId};
use tracing::{debug, error, trace, warn};

use crate::config::{ChannelConfig, MAX_FRAME_SIZE};

/// Receives every datagram of one channel, on that channel's receive thread.
pub type RecvCallback = Box<dyn FnMut(ChannelId, &[u8]) + Send>;

/// Caller-provided storage for incoming datagrams.
pub type RecvBuffer = Box<dyn AsMut<[u8]> + Send>;

/// A running receive thread.
pub(crate) struct ReceiveTask {
    channel: ChannelId,
    thread: JoinHandle<()>,
}

impl ReceiveTask {
    pub(crate) fn spawn(
        channel: ChannelId,
        device: Arc<dyn ChannelDevice>,
        buffer: RecvBuffer,
        callback: RecvCallback,
        config: &ChannelConfig,
    ) -> std::io::Result<Self> {
        let mut builder =
            std::thread::Builder::new().name(format!("{}-{channel}", config.receive_thread_name));
        if let Some(stack_size) = config.receive_thread_stack_size {
            builder = builder.stack_size(stack_size);
        }

        let backoff = config.read_error_backoff;
        let thread =
            builder.spawn(move || receive_loop(channel, device, buffer, callback, backoff))?;
        debug!(%channel, "receive thread started");
        Ok(Self { channel, thread })
    }

    /// Wait for the thread to leave its loop. Receive must be cancelled first.
    pub(crate) fn join(self) {
        if self.thread.join().is_err() {
            error!(channel = %self.channel, "receive thread panicked");
        } else {
            debug!(channel = %self.channel, "receive thread stopped");
        }
    }
}

fn receive_loop(
    channel: ChannelId,
    device: Arc<dyn ChannelDevice>,
    mut buffer: RecvBuffer,
    mut callback: RecvCallback,
    backoff: Duration,
) {
    let buf: &mut [u8] = (*buffer).as_mut();
    let len = buf.len().min(MAX_FRAME_SIZE);
    let buf = &mut buf[..len];

    loop {
        match device.read(buf) {
            Ok(size) => {
                trace!(%channel, size, "datagram received");
                dispatch(channel, &buf[..size], &mut callback);
            }
            Err(err) if errno::is_cancelled(&err) => {
                debug!(%channel, "receive cancelled");
                break;
            }
            Err(err) => {
                warn!(
                    %channel,
                    errno = ?err.raw_os_error(),
                    error = %err,
                    "receive failed; retrying"
                );
                if !backoff.is_zero() {
                    std::thread::sleep(backoff);
                }
            }
        }
    }
}

fn dispatch(channel: ChannelId, data: &[u8], callback: &mut RecvCallback) {
    let result = std::panic::catch_unwind(AssertUnwindSafe(|| callback(channel, data)));
    if result.is_err() {
        error!(%channel, size = data.len(), "receive callback panicked; datagram dropped");
    }
}
