//! Channel numbers.
//!
//! The device exposes a fixed set of eight channels, `0..CHANNEL_MAX`. Each
//! channel number selects one device node and one registry slot.

use std::fmt;

use crate::error::TransportError;

/// Number of device channels.
pub const CHANNEL_MAX: usize = 8;

/// A validated channel number in `0..CHANNEL_MAX`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(u8);

impl ChannelId {
    /// Returns `None` when `id` is not below [`CHANNEL_MAX`].
    pub const fn new(id: u8) -> Option<Self> {
        if (id as usize) < CHANNEL_MAX {
            Some(Self(id))
        } else {
            None
        }
    }

    /// The raw channel number.
    pub const fn get(self) -> u8 {
        self.0
    }

    /// The channel number as a table index.
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// All channels, in ascending order.
    pub fn all() -> impl Iterator<Item = ChannelId> {
        (0..CHANNEL_MAX as u8).map(ChannelId)
    }
}

impl TryFrom<u32> for ChannelId {
    type Error = TransportError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        u8::try_from(value)
            .ok()
            .and_then(ChannelId::new)
            .ok_or(TransportError::InvalidChannel {
                channel: value,
                max: CHANNEL_MAX,
            })
    }
}

impl From<ChannelId> for u32 {
    fn from(id: ChannelId) -> Self {
        u32::from(id.0)
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
