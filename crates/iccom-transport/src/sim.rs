//! In-memory device bus.
//!
//! [`SimBus`] behaves like the channel driver without touching the
//! filesystem: each channel can be open at most once (`EBUSY` otherwise),
//! reads block until a datagram is injected or receive is cancelled, and
//! writes complete according to a configurable [`WriteMode`]. A
//! [`SimChannel`] controller injects traffic and failures and observes what
//! the library did to the device.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::trace;

use crate::channel::{ChannelId, CHANNEL_MAX};
use crate::errno::{EBUSY, ECANCELED};
use crate::error::{Result, TransportError};
use crate::traits::{ChannelDevice, DeviceOpener};

/// How a simulated device completes writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Accept the whole datagram.
    Complete,
    /// Accept at most this many bytes and report success.
    Short(usize),
    /// Fail every write with this errno.
    Fail(i32),
    /// Block every write until [`SimChannel::release_writes`] is called.
    Gated,
}

enum Inbound {
    Data(Bytes),
    Error(i32),
}

struct SimState {
    open: bool,
    open_error: Option<i32>,
    cancel_error: Option<i32>,
    cancelled: bool,
    loopback: bool,
    write_mode: WriteMode,
    gate_open: bool,
    inbound: VecDeque<Inbound>,
    written: Vec<Bytes>,
    writes_started: usize,
    opens: usize,
    closes: usize,
    cancels: usize,
}

struct ChannelShared {
    state: Mutex<SimState>,
    changed: Condvar,
}

impl ChannelShared {
    fn new(loopback: bool) -> Self {
        Self {
            state: Mutex::new(SimState {
                open: false,
                open_error: None,
                cancel_error: None,
                cancelled: false,
                loopback,
                write_mode: WriteMode::Complete,
                gate_open: false,
                inbound: VecDeque::new(),
                written: Vec::new(),
                writes_started: 0,
                opens: 0,
                closes: 0,
                cancels: 0,
            }),
            changed: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, SimState>) -> MutexGuard<'a, SimState> {
        self.changed
            .wait(guard)
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// A simulated bus of [`CHANNEL_MAX`] channel devices.
#[derive(Clone)]
pub struct SimBus {
    channels: Arc<[Arc<ChannelShared>; CHANNEL_MAX]>,
}

impl SimBus {
    /// A bus whose devices keep written datagrams to themselves.
    pub fn new() -> Self {
        Self::build(false)
    }

    /// A bus whose devices echo every completed write back as inbound data.
    pub fn loopback() -> Self {
        Self::build(true)
    }

    fn build(loopback: bool) -> Self {
        Self {
            channels: Arc::new(std::array::from_fn(|_| {
                Arc::new(ChannelShared::new(loopback))
            })),
        }
    }

    /// Controller for one channel's device.
    pub fn channel(&self, channel: ChannelId) -> SimChannel {
        SimChannel {
            id: channel,
            shared: Arc::clone(&self.channels[channel.index()]),
        }
    }
}

impl Default for SimBus {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceOpener for SimBus {
    fn device_path(&self, channel: ChannelId) -> PathBuf {
        PathBuf::from(format!("sim://iccom{channel}"))
    }

    fn open(&self, channel: ChannelId) -> Result<Arc<dyn ChannelDevice>> {
        let shared = &self.channels[channel.index()];
        let mut state = shared.lock();

        let errno = match (state.open_error, state.open) {
            (Some(errno), _) => Some(errno),
            (None, true) => Some(EBUSY),
            (None, false) => None,
        };
        if let Some(errno) = errno {
            return Err(TransportError::Open {
                path: self.device_path(channel),
                source: std::io::Error::from_raw_os_error(errno),
            });
        }

        state.open = true;
        state.cancelled = false;
        state.opens += 1;
        trace!(%channel, "simulated device opened");
        Ok(Arc::new(SimDevice {
            id: channel,
            shared: Arc::clone(shared),
        }))
    }
}

struct SimDevice {
    id: ChannelId,
    shared: Arc<ChannelShared>,
}

impl ChannelDevice for SimDevice {
    fn read(&self, buf: &mut [u8]) -> std::io::Result<usize> {
        let mut state = self.shared.lock();
        loop {
            if state.cancelled {
                return Err(std::io::Error::from_raw_os_error(ECANCELED));
            }
            let next = state.inbound.pop_front();
            match next {
                Some(Inbound::Data(data)) => {
                    let n = data.len().min(buf.len());
                    buf[..n].copy_from_slice(&data[..n]);
                    return Ok(n);
                }
                Some(Inbound::Error(errno)) => {
                    return Err(std::io::Error::from_raw_os_error(errno));
                }
                None => state = self.shared.wait(state),
            }
        }
    }

    fn write(&self, buf: &[u8]) -> std::io::Result<usize> {
        let mut state = self.shared.lock();
        state.writes_started += 1;
        self.shared.changed.notify_all();

        let mode = state.write_mode;
        let accepted = match mode {
            WriteMode::Complete => buf.len(),
            WriteMode::Short(limit) => buf.len().min(limit),
            WriteMode::Fail(errno) => return Err(std::io::Error::from_raw_os_error(errno)),
            WriteMode::Gated => {
                while !state.gate_open {
                    state = self.shared.wait(state);
                }
                buf.len()
            }
        };

        let data = Bytes::copy_from_slice(&buf[..accepted]);
        if state.loopback {
            state.inbound.push_back(Inbound::Data(data.clone()));
        }
        state.written.push(data);
        self.shared.changed.notify_all();
        Ok(accepted)
    }

    fn cancel_receive(&self) -> std::io::Result<()> {
        let mut state = self.shared.lock();
        if let Some(errno) = state.cancel_error {
            return Err(std::io::Error::from_raw_os_error(errno));
        }
        state.cancelled = true;
        state.cancels += 1;
        self.shared.changed.notify_all();
        Ok(())
    }
}

impl Drop for SimDevice {
    fn drop(&mut self) {
        let mut state = self.shared.lock();
        state.open = false;
        state.closes += 1;
        self.shared.changed.notify_all();
        trace!(channel = %self.id, "simulated device closed");
    }
}

/// Test-side controller for one simulated channel device.
#[derive(Clone)]
pub struct SimChannel {
    id: ChannelId,
    shared: Arc<ChannelShared>,
}

impl SimChannel {
    /// The channel this controller drives.
    pub fn id(&self) -> ChannelId {
        self.id
    }

    /// Queue a datagram for the next read.
    pub fn push_inbound(&self, data: impl AsRef<[u8]>) {
        let mut state = self.shared.lock();
        state
            .inbound
            .push_back(Inbound::Data(Bytes::copy_from_slice(data.as_ref())));
        self.shared.changed.notify_all();
    }

    /// Queue a read failure with `errno`.
    pub fn push_read_error(&self, errno: i32) {
        let mut state = self.shared.lock();
        state.inbound.push_back(Inbound::Error(errno));
        self.shared.changed.notify_all();
    }

    /// Make every open fail with `errno` (or succeed again with `None`).
    pub fn set_open_error(&self, errno: Option<i32>) {
        self.shared.lock().open_error = errno;
    }

    /// Make the cancel-receive command fail with `errno`.
    pub fn set_cancel_error(&self, errno: Option<i32>) {
        self.shared.lock().cancel_error = errno;
    }

    /// Change how subsequent writes complete.
    pub fn set_write_mode(&self, mode: WriteMode) {
        let mut state = self.shared.lock();
        state.write_mode = mode;
        state.gate_open = false;
        self.shared.changed.notify_all();
    }

    /// Let writes blocked by [`WriteMode::Gated`] complete.
    pub fn release_writes(&self) {
        let mut state = self.shared.lock();
        state.gate_open = true;
        self.shared.changed.notify_all();
    }

    /// Wait until at least `count` writes have started, or `timeout` passes.
    pub fn wait_for_writes(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.lock();
        while state.writes_started < count {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            state = self
                .shared
                .changed
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }

    /// Datagrams the device accepted, in order.
    pub fn written(&self) -> Vec<Bytes> {
        self.shared.lock().written.clone()
    }

    /// Whether a descriptor for this channel is currently open.
    pub fn is_open(&self) -> bool {
        self.shared.lock().open
    }

    /// Number of successful opens.
    pub fn open_count(&self) -> usize {
        self.shared.lock().opens
    }

    /// Number of closes.
    pub fn close_count(&self) -> usize {
        self.shared.lock().closes
    }

    /// Number of accepted cancel-receive commands.
    pub fn cancel_count(&self) -> usize {
        self.shared.lock().cancels
    }
}
