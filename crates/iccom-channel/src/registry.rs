use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use iccom_transport::{ChannelId, CHANNEL_MAX};
use tracing::{trace, warn};

use crate::error::{IccomError, Result};
use crate::handle::ChannelHandle;
use crate::state::ChannelState;

struct Entry {
    generation: u64,
    state: Arc<ChannelState>,
}

enum Slot {
    /// Claimed by an Init that has not finished opening the channel.
    Reserved,
    Published(Entry),
}

impl Slot {
    fn entry(&self) -> Option<&Entry> {
        match self {
            Slot::Reserved => None,
            Slot::Published(entry) => Some(entry),
        }
    }
}

struct Slots {
    entries: [Option<Slot>; CHANNEL_MAX],
    next_generation: u64,
}

impl Slots {
    fn entry(&self, channel: ChannelId) -> Option<&Entry> {
        self.entries[channel.index()].as_ref().and_then(Slot::entry)
    }
}

/// One row of [`ChannelRegistry::snapshot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotSnapshot {
    pub channel: ChannelId,
    pub generation: u64,
    pub sends_in_flight: u32,
}

/// Table of open channels, one slot per channel number.
///
/// The table lock is only held to look at or change slot contents. Callers
/// that also need a channel lock take it after the table lock is released,
/// or take the table lock while already holding the channel lock; never the
/// other way round.
pub struct ChannelRegistry {
    slots: Mutex<Slots>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(Slots {
                entries: std::array::from_fn(|_| None),
                next_generation: 1,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim the slot of `channel` for an Init in progress.
    ///
    /// The slot stays claimed until the returned reservation is published or
    /// dropped; meanwhile every other claim on it fails.
    pub(crate) fn reserve(&self, channel: ChannelId) -> Result<Reservation<'_>> {
        let mut slots = self.lock();
        let slot = &mut slots.entries[channel.index()];
        if slot.is_some() {
            return Err(IccomError::AlreadyOpen { channel });
        }
        *slot = Some(Slot::Reserved);
        trace!(%channel, "slot reserved");
        Ok(Reservation {
            registry: self,
            channel,
            published: false,
        })
    }

    /// Turn a handle into the channel state it designates.
    pub(crate) fn resolve(&self, handle: ChannelHandle) -> Result<Arc<ChannelState>> {
        let slots = self.lock();
        let entry = slots
            .entry(handle.channel())
            .filter(|entry| entry.generation == handle.generation())
            .ok_or(IccomError::StaleHandle)?;

        if entry.state.channel() != handle.channel() {
            warn!(
                slot = %handle.channel(),
                recorded = %entry.state.channel(),
                "channel state recorded under the wrong slot"
            );
            return Err(IccomError::StaleHandle);
        }
        Ok(Arc::clone(&entry.state))
    }

    /// Whether `handle` still designates a published channel.
    pub fn contains(&self, handle: ChannelHandle) -> bool {
        self.lock()
            .entry(handle.channel())
            .is_some_and(|entry| entry.generation == handle.generation())
    }

    /// Remove the channel designated by `handle` from its slot.
    pub(crate) fn deregister(&self, handle: ChannelHandle) -> Option<Arc<ChannelState>> {
        let mut slots = self.lock();
        if !slots
            .entry(handle.channel())
            .is_some_and(|entry| entry.generation == handle.generation())
        {
            return None;
        }
        trace!(channel = %handle.channel(), generation = handle.generation(), "channel withdrawn");
        match slots.entries[handle.channel().index()].take() {
            Some(Slot::Published(entry)) => Some(entry.state),
            _ => None,
        }
    }

    /// Whether any channel is published on `channel`.
    pub fn is_open(&self, channel: ChannelId) -> bool {
        self.lock().entry(channel).is_some()
    }

    /// Whether `channel` is published or claimed by an Init in progress.
    pub fn is_claimed(&self, channel: ChannelId) -> bool {
        self.lock().entries[channel.index()].is_some()
    }

    /// Handles of every published channel.
    pub fn handles(&self) -> Vec<ChannelHandle> {
        let slots = self.lock();
        ChannelId::all()
            .filter_map(|channel| {
                slots
                    .entry(channel)
                    .map(|entry| ChannelHandle::new(channel, entry.generation))
            })
            .collect()
    }

    /// Point-in-time view of the table.
    pub fn snapshot(&self) -> Vec<SlotSnapshot> {
        // Channel locks may not be taken under the table lock.
        let published: Vec<(u64, Arc<ChannelState>)> = {
            let slots = self.lock();
            slots
                .entries
                .iter()
                .flatten()
                .filter_map(Slot::entry)
                .map(|entry| (entry.generation, Arc::clone(&entry.state)))
                .collect()
        };
        published
            .into_iter()
            .map(|(generation, state)| SlotSnapshot {
                channel: state.channel(),
                generation,
                sends_in_flight: state.sends_in_flight(),
            })
            .collect()
    }
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// A claimed slot, released again unless it is published.
pub(crate) struct Reservation<'a> {
    registry: &'a ChannelRegistry,
    channel: ChannelId,
    published: bool,
}

impl Reservation<'_> {
    /// Install `state` in the claimed slot and stamp a fresh generation.
    pub(crate) fn publish(mut self, state: Arc<ChannelState>) -> ChannelHandle {
        let channel = self.channel;
        let mut slots = self.registry.lock();
        let generation = slots.next_generation;
        slots.next_generation += 1;
        slots.entries[channel.index()] = Some(Slot::Published(Entry { generation, state }));
        self.published = true;
        trace!(%channel, generation, "channel published");
        ChannelHandle::new(channel, generation)
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if self.published {
            return;
        }
        let mut slots = self.registry.lock();
        let slot = &mut slots.entries[self.channel.index()];
        if matches!(slot, Some(Slot::Reserved)) {
            *slot = None;
            trace!(channel = %self.channel, "slot released");
        }
    }
}

#[cfg(test)]
mod tests {
    use iccom_transport::{DeviceOpener, SimBus};

    use super::*;
    use crate::config::ChannelConfig;
    use crate::receiver::ReceiveTask;

    fn open_state(bus: &SimBus, id: u8) -> Arc<ChannelState> {
        let channel = ChannelId::new(id).unwrap();
        let device = bus.open(channel).unwrap();
        let receiver = ReceiveTask::spawn(
            channel,
            Arc::clone(&device),
            Box::new(vec![0u8; crate::MAX_FRAME_SIZE]),
            Box::new(|_: ChannelId, _: &[u8]| {}),
            &ChannelConfig::default(),
        )
        .unwrap();
        Arc::new(ChannelState::new(channel, device, receiver))
    }

    fn publish(registry: &ChannelRegistry, state: &Arc<ChannelState>) -> ChannelHandle {
        registry
            .reserve(state.channel())
            .unwrap()
            .publish(Arc::clone(state))
    }

    fn close(state: &ChannelState) {
        let mut inner = state.lock();
        if let Some(device) = inner.device.take() {
            device.cancel_receive().unwrap();
        }
        if let Some(receiver) = inner.receiver.take() {
            receiver.join();
        }
    }

    #[test]
    fn register_resolve_deregister() {
        let bus = SimBus::new();
        let registry = ChannelRegistry::new();
        let state = open_state(&bus, 2);

        let handle = publish(&registry, &state);
        assert_eq!(handle.channel().get(), 2);
        assert!(registry.contains(handle));
        assert!(Arc::ptr_eq(&registry.resolve(handle).unwrap(), &state));

        let removed = registry.deregister(handle).expect("slot should be occupied");
        assert!(Arc::ptr_eq(&removed, &state));
        assert!(matches!(
            registry.resolve(handle),
            Err(IccomError::StaleHandle)
        ));
        assert!(!registry.is_claimed(handle.channel()));

        close(&state);
    }

    #[test]
    fn occupied_slot_rejects_second_claim() {
        let bus = SimBus::new();
        let registry = ChannelRegistry::new();
        let first = open_state(&bus, 1);
        let handle = publish(&registry, &first);

        let err = registry.reserve(first.channel()).err().expect("slot is taken");
        assert!(matches!(err, IccomError::AlreadyOpen { .. }));
        assert!(registry.contains(handle));

        registry.deregister(handle);
        close(&first);
    }

    #[test]
    fn reservation_is_invisible_and_released_on_drop() {
        let registry = ChannelRegistry::new();
        let channel = ChannelId::new(5).unwrap();

        let reservation = registry.reserve(channel).expect("slot should be free");
        assert!(registry.is_claimed(channel));
        assert!(!registry.is_open(channel));
        assert!(registry.handles().is_empty());
        assert!(registry.snapshot().is_empty());
        assert!(matches!(
            registry.reserve(channel).err(),
            Some(IccomError::AlreadyOpen { .. })
        ));
        assert!(registry.deregister(ChannelHandle::new(channel, 1)).is_none());
        assert!(registry.is_claimed(channel), "deregister must not clear a reservation");

        drop(reservation);
        assert!(!registry.is_claimed(channel));
        drop(registry.reserve(channel).expect("released slot can be claimed again"));
    }

    #[test]
    fn stale_generation_never_resolves() {
        let bus = SimBus::new();
        let registry = ChannelRegistry::new();

        let first = open_state(&bus, 0);
        let old = publish(&registry, &first);
        registry.deregister(old);
        close(&first);

        let second = open_state(&bus, 0);
        let new = publish(&registry, &second);
        assert_ne!(old, new);
        assert!(registry.resolve(old).is_err());
        assert!(registry.deregister(old).is_none(), "stale handle must not clear the slot");
        assert!(registry.contains(new));

        registry.deregister(new);
        close(&second);
    }

    #[test]
    fn snapshot_lists_published_channels() {
        let bus = SimBus::new();
        let registry = ChannelRegistry::new();
        let a = open_state(&bus, 3);
        let b = open_state(&bus, 7);
        let ha = publish(&registry, &a);
        let hb = publish(&registry, &b);
        let pending = registry.reserve(ChannelId::new(4).unwrap()).unwrap();

        let snapshot = registry.snapshot();
        let channels: Vec<u8> = snapshot.iter().map(|row| row.channel.get()).collect();
        assert_eq!(channels, vec![3, 7]);
        assert!(snapshot.iter().all(|row| row.sends_in_flight == 0));
        assert_eq!(registry.handles(), vec![ha, hb]);

        drop(pending);
        registry.deregister(ha);
        registry.deregister(hb);
        close(&a);
        close(&b);
    }
}
