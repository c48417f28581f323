//! Channel lifecycle for the iccom inter-core link.
//!
//! An [`Iccom`] context opens up to [`CHANNEL_MAX`] channels over a device
//! transport. Each open channel gets a receive thread that hands incoming
//! datagrams to a caller callback, and a [`ChannelHandle`] the caller uses to
//! send and, eventually, to close it.

pub mod config;
pub mod error;
pub mod handle;
pub mod lifecycle;
pub mod receiver;
pub mod registry;
mod state;

pub use config::{ChannelConfig, MAX_FRAME_SIZE};
pub use error::{ErrorKind, IccomError, Result};
pub use handle::ChannelHandle;
pub use iccom_transport::{ChannelId, CHANNEL_MAX};
pub use lifecycle::Iccom;
pub use receiver::{RecvBuffer, RecvCallback};
pub use registry::{ChannelRegistry, SlotSnapshot};
