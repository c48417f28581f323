use std::sync::mpsc;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use iccom_channel::{ChannelId, ErrorKind, Iccom, IccomError, CHANNEL_MAX, MAX_FRAME_SIZE};
use iccom_transport::{SimBus, WriteMode};

const WAIT: Duration = Duration::from_secs(5);

fn ch(id: u8) -> ChannelId {
    ChannelId::new(id).expect("channel id should be in range")
}

fn buffer() -> Vec<u8> {
    vec![0u8; MAX_FRAME_SIZE]
}

fn ignore(_: ChannelId, _: &[u8]) {}

#[test]
fn every_channel_opens_and_closes() {
    let bus = SimBus::new();
    let iccom = Iccom::new(bus.clone());

    let handles: Vec<_> = (0..CHANNEL_MAX as u32)
        .map(|id| iccom.init(id, buffer(), ignore).expect("init should succeed"))
        .collect();
    assert_eq!(iccom.registry().handles(), handles);

    for handle in handles {
        iccom.finalize(handle).expect("final should succeed");
        assert!(!iccom.registry().is_open(handle.channel()));
    }
    for channel in ChannelId::all() {
        let control = bus.channel(channel);
        assert_eq!(control.open_count(), 1);
        assert_eq!(control.close_count(), 1);
    }
}

#[test]
fn concurrent_init_on_one_channel_yields_one_busy() {
    let bus = SimBus::new();
    let iccom = Arc::new(Iccom::new(bus.clone()));
    let barrier = Arc::new(Barrier::new(2));

    let attempts: Vec<_> = (0..2)
        .map(|_| {
            let iccom = Arc::clone(&iccom);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                iccom.init(4, buffer(), ignore)
            })
        })
        .collect();
    let results: Vec<_> = attempts
        .into_iter()
        .map(|t| t.join().expect("init thread should not panic"))
        .collect();

    let opened: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(opened.len(), 1, "exactly one init wins: {results:?}");
    let loser = results
        .iter()
        .find_map(|r| r.as_ref().err())
        .expect("one init should fail");
    assert_eq!(loser.kind(), ErrorKind::Busy);

    let handle = *opened[0];
    assert_eq!(iccom.registry().handles(), vec![handle]);
    iccom.finalize(handle).expect("final should succeed");

    let control = bus.channel(ch(4));
    assert!(!control.is_open());
    assert_eq!(control.open_count(), control.close_count());
}

#[test]
fn send_after_final_is_a_parameter_error() {
    let bus = SimBus::new();
    let control = bus.channel(ch(2));
    let iccom = Iccom::new(bus.clone());

    let handle = iccom.init(2, buffer(), ignore).expect("init should succeed");
    iccom.send(handle, b"ABC").expect("send should succeed");
    iccom.finalize(handle).expect("final should succeed");

    let err = iccom.send(handle, b"ABC").unwrap_err();
    assert!(matches!(err, IccomError::StaleHandle));
    assert_eq!(err.kind(), ErrorKind::Param);
    assert_eq!(err.code(), -2);
    assert_eq!(iccom.finalize(handle).unwrap_err().kind(), ErrorKind::Param);
    assert_eq!(control.written().len(), 1);
}

#[test]
fn stale_handle_never_reaches_reopened_channel() {
    let bus = SimBus::new();
    let control = bus.channel(ch(0));
    let iccom = Iccom::new(bus.clone());

    let old = iccom.init(0, buffer(), ignore).expect("init should succeed");
    iccom.finalize(old).expect("final should succeed");
    let new = iccom.init(0, buffer(), ignore).expect("reopen should succeed");

    assert_ne!(old, new);
    assert_eq!(iccom.send(old, b"x").unwrap_err().kind(), ErrorKind::Param);
    assert!(control.written().is_empty());
    assert!(iccom.is_live(new));
    iccom.finalize(new).expect("final should succeed");
}

#[test]
fn final_during_send_is_refused_and_leaves_channel_running() {
    let bus = SimBus::new();
    let control = bus.channel(ch(3));
    control.set_write_mode(WriteMode::Gated);
    let iccom = Arc::new(Iccom::new(bus.clone()));
    let (tx, rx) = mpsc::channel();

    let handle = iccom
        .init(3, buffer(), move |_: ChannelId, data: &[u8]| {
            let _ = tx.send(data.to_vec());
        })
        .expect("init should succeed");

    let sender = {
        let iccom = Arc::clone(&iccom);
        thread::spawn(move || iccom.send(handle, b"slow"))
    };
    assert!(control.wait_for_writes(1, WAIT), "send should reach the device");

    let err = iccom.finalize(handle).unwrap_err();
    assert!(matches!(err, IccomError::SendInFlight { in_flight: 1, .. }));
    assert_eq!(err.kind(), ErrorKind::Param);
    assert!(control.is_open());
    assert_eq!(control.cancel_count(), 0);

    // Receive still runs while the refused close is behind us.
    control.push_inbound(b"still here");
    assert_eq!(rx.recv_timeout(WAIT).expect("callback should run"), b"still here");

    control.release_writes();
    sender
        .join()
        .expect("sender should not panic")
        .expect("gated send should complete");

    iccom.finalize(handle).expect("final should succeed once idle");
    assert!(!control.is_open());
    assert_eq!(control.cancel_count(), 1);
}

#[test]
fn abc_flow_over_loopback() {
    let bus = SimBus::loopback();
    let control = bus.channel(ch(2));
    let iccom = Iccom::new(bus.clone());
    let (tx, rx) = mpsc::channel();

    let handle = iccom
        .init(2, buffer(), move |channel: ChannelId, data: &[u8]| {
            let _ = tx.send((channel, data.len(), data.to_vec()));
        })
        .expect("init should succeed");

    iccom.send(handle, b"ABC").expect("send should succeed");
    let (channel, size, data) = rx.recv_timeout(WAIT).expect("echo should arrive");
    assert_eq!(channel, ch(2));
    assert_eq!(size, 3);
    assert_eq!(data, b"ABC");
    assert_eq!(control.written()[0].as_ref(), b"ABC");

    iccom.finalize(handle).expect("final should succeed");
    assert!(!iccom.is_live(handle));
    assert!(iccom.registry().snapshot().is_empty());
}

#[test]
fn concurrent_sends_all_land_then_close() {
    let bus = SimBus::new();
    let control = bus.channel(ch(5));
    let iccom = Arc::new(Iccom::new(bus.clone()));
    let handle = iccom.init(5, buffer(), ignore).expect("init should succeed");

    let senders: Vec<_> = (0..8u8)
        .map(|n| {
            let iccom = Arc::clone(&iccom);
            thread::spawn(move || {
                for _ in 0..16 {
                    iccom.send(handle, &[n; 32]).expect("send should succeed");
                }
            })
        })
        .collect();
    for sender in senders {
        sender.join().expect("sender should not panic");
    }

    assert_eq!(control.written().len(), 8 * 16);
    let snapshot = iccom.registry().snapshot();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].sends_in_flight, 0);
    iccom.finalize(handle).expect("final should succeed");
}

#[test]
fn open_failures_leave_nothing_behind() {
    let bus = SimBus::new();
    let control = bus.channel(ch(6));
    let iccom = Iccom::new(bus.clone());

    let cases = [
        (iccom_transport::errno::EBUSY, ErrorKind::Busy, -5),
        (iccom_transport::errno::EDEADLK, ErrorKind::InitTimeout, -6),
        (iccom_transport::errno::ENOENT, ErrorKind::Unsupported, -8),
    ];
    for (errno, kind, code) in cases {
        control.set_open_error(Some(errno));
        let err = iccom.init(6, buffer(), ignore).unwrap_err();
        assert_eq!(err.kind(), kind);
        assert_eq!(err.code(), code);
        assert!(!iccom.registry().is_open(ch(6)));
    }

    control.set_open_error(None);
    let handle = iccom.init(6, buffer(), ignore).expect("init should succeed");
    iccom.finalize(handle).expect("final should succeed");
}
