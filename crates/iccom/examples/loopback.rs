//! Loopback example: opens every channel on the in-memory bus, sends one
//! datagram on each, and prints the echoes.
//!
//! Run with:
//!   cargo run --example loopback

use std::sync::mpsc;
use std::time::Duration;

use iccom::transport::SimBus;
use iccom::{ChannelId, Iccom, CHANNEL_MAX, MAX_FRAME_SIZE};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let iccom = Iccom::new(SimBus::loopback());
    let (tx, rx) = mpsc::channel();

    let mut handles = Vec::with_capacity(CHANNEL_MAX);
    for channel in 0..CHANNEL_MAX as u32 {
        let tx = tx.clone();
        let handle = iccom.init(
            channel,
            vec![0u8; MAX_FRAME_SIZE],
            move |channel: ChannelId, data: &[u8]| {
                let _ = tx.send((channel, String::from_utf8_lossy(data).into_owned()));
            },
        )?;
        handles.push(handle);
    }

    for handle in &handles {
        let message = format!("hello from {handle}");
        iccom.send(*handle, message.as_bytes())?;
    }

    for _ in 0..handles.len() {
        let (channel, text) = rx.recv_timeout(Duration::from_secs(1))?;
        eprintln!("[channel {channel}] {text}");
    }

    for handle in handles {
        iccom.finalize(handle)?;
    }
    Ok(())
}
