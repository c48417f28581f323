use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::channel::ChannelId;
use crate::error::{Result, TransportError};
use crate::traits::{ChannelDevice, DeviceOpener};

/// Fixed portion of the device node path; the channel number is appended.
pub const DEFAULT_DEVICE_PREFIX: &str = "/dev/iccom";

/// ioctl request that makes a blocked read return `ECANCELED`.
pub const IOC_CANCEL_RECEIVE: u32 = 1;

/// Opens the `/dev/iccomN` character devices.
#[derive(Debug, Clone)]
pub struct CharDeviceOpener {
    prefix: PathBuf,
}

impl CharDeviceOpener {
    /// Opener for the default device nodes (`/dev/iccom0` .. `/dev/iccom7`).
    pub fn new() -> Self {
        Self::with_prefix(DEFAULT_DEVICE_PREFIX)
    }

    /// Opener for device nodes named `<prefix><channel>`.
    pub fn with_prefix(prefix: impl AsRef<Path>) -> Self {
        Self {
            prefix: prefix.as_ref().to_path_buf(),
        }
    }

    /// The path prefix channel numbers are appended to.
    pub fn prefix(&self) -> &Path {
        &self.prefix
    }
}

impl Default for CharDeviceOpener {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceOpener for CharDeviceOpener {
    fn device_path(&self, channel: ChannelId) -> PathBuf {
        let mut path = self.prefix.clone().into_os_string();
        path.push(channel.to_string());
        PathBuf::from(path)
    }

    fn open(&self, channel: ChannelId) -> Result<Arc<dyn ChannelDevice>> {
        let path = self.device_path(channel);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|source| TransportError::Open {
                path: path.clone(),
                source,
            })?;
        debug!(?path, fd = file.as_raw_fd(), "opened channel device");
        Ok(Arc::new(CharDevice { file, path }))
    }
}

/// One open channel device node.
pub struct CharDevice {
    file: File,
    path: PathBuf,
}

impl CharDevice {
    /// The device node this descriptor was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ChannelDevice for CharDevice {
    fn read(&self, buf: &mut [u8]) -> std::io::Result<usize> {
        (&self.file).read(buf)
    }

    fn write(&self, buf: &[u8]) -> std::io::Result<usize> {
        (&self.file).write(buf)
    }

    fn cancel_receive(&self) -> std::io::Result<()> {
        let fd = self.file.as_raw_fd();
        // SAFETY: `fd` is an open descriptor owned by `self.file` for the duration of the
        // call, and the cancel request takes no argument (a null pointer is passed).
        let rc = unsafe {
            libc::ioctl(
                fd,
                IOC_CANCEL_RECEIVE as _,
                std::ptr::null_mut::<libc::c_void>(),
            )
        };
        if rc != 0 {
            return Err(std::io::Error::last_os_error());
        }
        Ok(())
    }
}

impl Drop for CharDevice {
    fn drop(&mut self) {
        debug!(path = ?self.path, "closing channel device");
    }
}

impl std::fmt::Debug for CharDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CharDevice")
            .field("path", &self.path)
            .field("fd", &self.file.as_raw_fd())
            .finish()
    }
}
