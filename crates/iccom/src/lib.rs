//! Multiplexed inter-core channels over a single device interface.
//!
//! iccom opens up to eight independent channels, each carrying datagrams of
//! at most [`MAX_FRAME_SIZE`] bytes in both directions. Incoming datagrams are
//! delivered to a per-channel callback on a dedicated receive thread.
//!
//! ```no_run
//! use iccom::transport::CharDeviceOpener;
//! use iccom::{ChannelId, Iccom};
//!
//! # fn main() -> iccom::Result<()> {
//! let iccom = Iccom::new(CharDeviceOpener::new());
//! let handle = iccom.init(2, vec![0u8; iccom::MAX_FRAME_SIZE], |channel: ChannelId, data: &[u8]| {
//!     println!("{channel}: {} bytes", data.len());
//! })?;
//! iccom.send(handle, b"ABC")?;
//! iccom.finalize(handle)?;
//! # Ok(())
//! # }
//! ```
//!
//! # Crate Structure
//!
//! - [`transport`]: device transports (character devices, in-memory bus)
//! - [`channel`]: channel lifecycle, handles, and the error taxonomy

/// Re-export transport types.
pub mod transport {
    pub use iccom_transport::*;
}

/// Re-export channel types.
pub mod channel {
    pub use iccom_channel::*;
}

pub use iccom_channel::{
    ChannelConfig, ChannelHandle, ChannelId, ErrorKind, Iccom, IccomError, Result, CHANNEL_MAX,
    MAX_FRAME_SIZE,
};
