//! Channel-numbered device transport.
//!
//! This is the lowest layer of iccom. A transport opens one device per
//! channel number and offers blocking read/write, a cancel-receive control
//! command, and close (on drop):
//! - [`CharDeviceOpener`] talks to the `/dev/iccomN` character devices (Unix)
//! - [`SimBus`] is an in-memory device bus for tests and demos
//!
//! Everything above this crate only sees the [`DeviceOpener`] and
//! [`ChannelDevice`] traits.

pub mod channel;
pub mod errno;
pub mod error;
pub mod sim;
pub mod traits;

#[cfg(unix)]
pub mod chardev;

pub use channel::{ChannelId, CHANNEL_MAX};
pub use error::{Result, TransportError};
pub use sim::{SimBus, SimChannel, WriteMode};
pub use traits::{ChannelDevice, DeviceOpener};

#[cfg(unix)]
pub use chardev::{CharDevice, CharDeviceOpener, DEFAULT_DEVICE_PREFIX, IOC_CANCEL_RECEIVE};
