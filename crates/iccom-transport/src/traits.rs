use std::path::PathBuf;
use std::sync::Arc;

use crate::channel::ChannelId;
use crate::error::Result;

/// An open channel device.
///
/// Reads and writes are independent blocking operations and may run
/// concurrently from different threads, so every method takes `&self`.
/// Dropping the last reference closes the device.
pub trait ChannelDevice: Send + Sync {
    /// Block until one datagram arrives and copy it into `buf`.
    ///
    /// Returns `ECANCELED` once [`ChannelDevice::cancel_receive`] was issued.
    fn read(&self, buf: &mut [u8]) -> std::io::Result<usize>;

    /// Write one datagram. A count below `buf.len()` is a short write.
    fn write(&self, buf: &[u8]) -> std::io::Result<usize>;

    /// Abort an outstanding (or the next) blocking read.
    fn cancel_receive(&self) -> std::io::Result<()>;
}

/// Opens channel devices by channel number.
pub trait DeviceOpener: Send + Sync {
    /// The device path for `channel`, for diagnostics.
    fn device_path(&self, channel: ChannelId) -> PathBuf;

    /// Open the device for `channel` for reading and writing.
    fn open(&self, channel: ChannelId) -> Result<Arc<dyn ChannelDevice>>;
}
