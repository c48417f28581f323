use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use iccom_transport::{ChannelDevice, ChannelId};

use crate::receiver::ReceiveTask;

/// Mutable per-channel fields, guarded by the channel lock.
pub(crate) struct ChannelInner {
    pub(crate) sends_in_flight: u32,
    /// `None` once the channel has been torn down.
    pub(crate) device: Option<Arc<dyn ChannelDevice>>,
    pub(crate) receiver: Option<ReceiveTask>,
}

/// State of one open channel.
///
/// Owned by the registry while published; senders and closers work on a
/// clone of the `Arc` obtained through the registry, so the state outlives
/// any concurrent close that removes it from its slot.
pub(crate) struct ChannelState {
    channel: ChannelId,
    inner: Mutex<ChannelInner>,
}

impl ChannelState {
    pub(crate) fn new(
        channel: ChannelId,
        device: Arc<dyn ChannelDevice>,
        receiver: ReceiveTask,
    ) -> Self {
        Self {
            channel,
            inner: Mutex::new(ChannelInner {
                sends_in_flight: 0,
                device: Some(device),
                receiver: Some(receiver),
            }),
        }
    }

    pub(crate) fn channel(&self) -> ChannelId {
        self.channel
    }

    /// Acquire the channel lock.
    pub(crate) fn lock(&self) -> MutexGuard<'_, ChannelInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn sends_in_flight(&self) -> u32 {
        self.lock().sends_in_flight
    }
}

/// One counted send; the count drops again when the guard does.
pub(crate) struct InFlight<'a> {
    state: &'a ChannelState,
}

impl<'a> InFlight<'a> {
    /// Count a send on a state whose lock the caller already holds.
    pub(crate) fn enter(state: &'a ChannelState, inner: &mut ChannelInner) -> Self {
        inner.sends_in_flight += 1;
        Self { state }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut inner = self.state.lock();
        inner.sends_in_flight = inner.sends_in_flight.saturating_sub(1);
    }
}
