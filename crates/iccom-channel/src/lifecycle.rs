use std::sync::Arc;

use iccom_transport::{ChannelId, DeviceOpener, CHANNEL_MAX};
use tracing::{debug, info, trace, warn, Level};

use crate::config::{ChannelConfig, MAX_FRAME_SIZE};
use crate::error::{IccomError, Result};
use crate::handle::ChannelHandle;
use crate::receiver::ReceiveTask;
use crate::registry::ChannelRegistry;
use crate::state::{ChannelState, InFlight};

/// Opens, drives and closes channels over one device transport.
///
/// Every channel opened through an `Iccom` lives in its registry; handles
/// from one context mean nothing to another. Dropping the context closes
/// whatever is still open.
pub struct Iccom {
    opener: Box<dyn DeviceOpener>,
    registry: ChannelRegistry,
    config: ChannelConfig,
}

impl Iccom {
    /// Create a context over `opener` with default configuration.
    pub fn new(opener: impl DeviceOpener + 'static) -> Self {
        Self::with_config(opener, ChannelConfig::default())
    }

    /// Create a context with explicit configuration.
    pub fn with_config(opener: impl DeviceOpener + 'static, config: ChannelConfig) -> Self {
        Self {
            opener: Box::new(opener),
            registry: ChannelRegistry::new(),
            config,
        }
    }

    /// Open `channel` and start delivering its datagrams to `callback`.
    ///
    /// `recv_buf` must hold at least [`MAX_FRAME_SIZE`] bytes. It is filled
    /// in place by the receive thread and lent to `callback` for the duration
    /// of each call; the next read only starts after the callback returns.
    /// The callback may run before `init` itself returns.
    ///
    /// Closing a channel waits for its receive thread while holding the
    /// channel, so a callback must not send on its own channel while that
    /// channel is being finalized.
    ///
    /// Either a fully running channel is returned or nothing was left
    /// behind: no open device, no thread, no registry entry. The slot is
    /// claimed before the device is opened, so an Init on a channel that is
    /// open or still opening fails with [`IccomError::AlreadyOpen`] without
    /// touching the device.
    pub fn init<B, F>(&self, channel: u32, mut recv_buf: B, callback: F) -> Result<ChannelHandle>
    where
        B: AsMut<[u8]> + Send + 'static,
        F: FnMut(ChannelId, &[u8]) + Send + 'static,
    {
        let channel = ChannelId::try_from(channel).map_err(|_| IccomError::InvalidChannel {
            channel,
            max: CHANNEL_MAX,
        })?;

        let len = recv_buf.as_mut().len();
        if len < MAX_FRAME_SIZE {
            return Err(IccomError::RecvBufferTooSmall {
                len,
                required: MAX_FRAME_SIZE,
            });
        }

        let reservation = self.registry.reserve(channel).map_err(|err| {
            warn!(%channel, error = %err, "channel already claimed");
            err
        })?;

        let device = self.opener.open(channel).map_err(|err| {
            let err = IccomError::from_open(channel, err);
            warn!(%channel, kind = %err.kind(), error = %err, "channel open failed");
            err
        })?;

        // On failure the closure and its device clone are dropped unrun.
        let receiver = ReceiveTask::spawn(
            channel,
            Arc::clone(&device),
            Box::new(recv_buf),
            Box::new(callback),
            &self.config,
        )
        .map_err(|source| {
            warn!(%channel, error = %source, "receive thread start failed");
            IccomError::Io {
                op: "spawn receive thread",
                channel,
                source,
            }
        })?;

        let state = Arc::new(ChannelState::new(channel, device, receiver));
        let handle = reservation.publish(state);
        info!(%channel, generation = handle.generation(), "channel open");
        self.trace_table();
        Ok(handle)
    }

    /// Write one datagram of at most [`MAX_FRAME_SIZE`] bytes.
    ///
    /// Blocks for the duration of one device write. A write that the device
    /// reports as successful but short is returned as
    /// [`IccomError::SizeMismatch`] and not retried.
    pub fn send(&self, handle: ChannelHandle, data: &[u8]) -> Result<()> {
        if data.len() > MAX_FRAME_SIZE {
            return Err(IccomError::FrameTooLarge {
                size: data.len(),
                max: MAX_FRAME_SIZE,
            });
        }

        let state = self.registry.resolve(handle)?;
        let channel = state.channel();

        let mut inner = state.lock();
        if !self.registry.contains(handle) {
            debug!(%channel, "send raced with close");
            return Err(IccomError::StaleHandle);
        }
        let Some(device) = inner.device.clone() else {
            return Err(IccomError::StaleHandle);
        };
        let in_flight = InFlight::enter(&state, &mut inner);
        drop(inner);

        let written = device.write(data);
        // The device reference must be gone before close can observe a zero count.
        drop(device);
        drop(in_flight);

        match written {
            Ok(written) if written == data.len() => {
                debug!(%channel, size = written, "datagram sent");
                Ok(())
            }
            Ok(written) => {
                warn!(%channel, requested = data.len(), written, "short write");
                Err(IccomError::SizeMismatch {
                    channel,
                    requested: data.len(),
                    written,
                })
            }
            Err(source) => {
                let err = IccomError::from_write(channel, source);
                warn!(%channel, kind = %err.kind(), error = %err, "send failed");
                Err(err)
            }
        }
    }

    /// Close the channel designated by `handle`.
    ///
    /// Refused with [`IccomError::SendInFlight`] while any send on the
    /// channel is still writing; the channel then stays fully open. After a
    /// successful return the receive thread has stopped, so the callback is
    /// never invoked again, and the handle is dead.
    pub fn finalize(&self, handle: ChannelHandle) -> Result<()> {
        let state = self.registry.resolve(handle)?;
        let channel = state.channel();

        let mut inner = state.lock();
        if !self.registry.contains(handle) {
            debug!(%channel, "close raced with another close");
            return Err(IccomError::StaleHandle);
        }
        if inner.sends_in_flight != 0 {
            warn!(%channel, in_flight = inner.sends_in_flight, "close refused while sending");
            return Err(IccomError::SendInFlight {
                channel,
                in_flight: inner.sends_in_flight,
            });
        }
        let Some(device) = inner.device.clone() else {
            return Err(IccomError::StaleHandle);
        };

        device.cancel_receive().map_err(|source| {
            warn!(%channel, error = %source, "cancel receive failed; channel left open");
            IccomError::Io {
                op: "cancel receive",
                channel,
                source,
            }
        })?;

        if let Some(receiver) = inner.receiver.take() {
            receiver.join();
        }

        inner.device = None;
        drop(device);
        debug!(%channel, "channel device closed");

        self.registry.deregister(handle);
        drop(inner);
        info!(%channel, generation = handle.generation(), "channel closed");
        self.trace_table();
        Ok(())
    }

    fn trace_table(&self) {
        if tracing::enabled!(Level::TRACE) {
            trace!(slots = ?self.registry.snapshot(), "channel table");
        }
    }

    /// Whether `handle` still designates an open channel.
    pub fn is_live(&self, handle: ChannelHandle) -> bool {
        self.registry.contains(handle)
    }

    /// The channel table of this context.
    pub fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// Path of the device node backing `channel`.
    pub fn device_path(&self, channel: ChannelId) -> std::path::PathBuf {
        self.opener.device_path(channel)
    }
}

impl Drop for Iccom {
    fn drop(&mut self) {
        for handle in self.registry.handles() {
            if let Err(err) = self.finalize(handle) {
                warn!(%handle, error = %err, "channel left open at shutdown");
            }
        }
    }
}

impl std::fmt::Debug for Iccom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Iccom")
            .field("open_channels", &self.registry.handles())
            .field("config", &self.config)
            .finish()
    }
}
