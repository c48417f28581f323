use std::fmt;

use iccom_transport::{ChannelId, CHANNEL_MAX};

const SLOT_BITS: u32 = 3;
const SLOT_MASK: u64 = (1 << SLOT_BITS) - 1;

const _: () = assert!(CHANNEL_MAX <= 1 << SLOT_BITS);

/// Caller-held reference to one open channel.
///
/// A handle names a registry slot and the generation stamped on the channel
/// when it was published. Once the channel is closed the generation never
/// comes back, so an old handle cannot reach a channel opened later on the
/// same slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelHandle {
    channel: ChannelId,
    generation: u64,
}

impl ChannelHandle {
    pub(crate) fn new(channel: ChannelId, generation: u64) -> Self {
        Self {
            channel,
            generation,
        }
    }

    /// The channel this handle was opened on.
    pub fn channel(&self) -> ChannelId {
        self.channel
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Pack into one non-zero integer, for opaque foreign handles.
    pub fn to_raw(self) -> u64 {
        (self.generation << SLOT_BITS) | u64::from(self.channel.get())
    }

    /// Unpack a value produced by [`ChannelHandle::to_raw`].
    ///
    /// Only the encoding is checked; whether the channel is still open is
    /// decided by the registry.
    pub fn from_raw(raw: u64) -> Option<Self> {
        let generation = raw >> SLOT_BITS;
        if generation == 0 {
            return None;
        }
        let channel = u8::try_from(raw & SLOT_MASK).ok().and_then(ChannelId::new)?;
        Some(Self::new(channel, generation))
    }
}

impl fmt::Display for ChannelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch{}#{}", self.channel, self.generation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_form_keeps_channel_and_generation() {
        let handle = ChannelHandle::new(ChannelId::new(6).unwrap(), 41);
        let raw = handle.to_raw();
        assert_ne!(raw, 0);
        assert_eq!(ChannelHandle::from_raw(raw), Some(handle));
    }

    #[test]
    fn zero_and_generationless_values_are_rejected() {
        assert_eq!(ChannelHandle::from_raw(0), None);
        assert_eq!(ChannelHandle::from_raw(5), None);
    }
}
