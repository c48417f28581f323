//! iccom-ffi: C-ABI exports compatible with the `Iccom_lib_*` interface.
//!
//! All exports share one process-wide [`Iccom`] context over the character
//! devices at `/dev/iccomN`, created on first use. `ICCOM_DEVICE_PREFIX`
//! overrides the device prefix when set at that moment.

#![cfg(unix)]

mod channel;
mod error;
mod types;

use std::panic::AssertUnwindSafe;
use std::sync::OnceLock;

use iccom_channel::Iccom;
use iccom_transport::CharDeviceOpener;

pub use channel::{Iccom_lib_Final, Iccom_lib_Init, Iccom_lib_Send};
pub use types::{
    Iccom_channel_t, Iccom_init_param, Iccom_recv_callback_t, Iccom_send_param,
    ICCOM_BUF_MAX_SIZE, ICCOM_CHANNEL_MAX, ICCOM_ERR_BUF_FULL, ICCOM_ERR_BUSY, ICCOM_ERR_PARAM,
    ICCOM_ERR_SIZE, ICCOM_ERR_TO_ACK, ICCOM_ERR_TO_INIT, ICCOM_ERR_TO_SEND, ICCOM_ERR_UNSUPPORT,
    ICCOM_NG, ICCOM_OK,
};

/// Environment variable overriding the device prefix of the shared context.
pub const DEVICE_PREFIX_ENV: &str = "ICCOM_DEVICE_PREFIX";

static CONTEXT: OnceLock<Iccom> = OnceLock::new();

fn context() -> &'static Iccom {
    CONTEXT.get_or_init(|| {
        let opener = match std::env::var_os(DEVICE_PREFIX_ENV) {
            Some(prefix) => CharDeviceOpener::with_prefix(prefix),
            None => CharDeviceOpener::new(),
        };
        tracing::debug!(prefix = %opener.prefix().display(), "iccom context created");
        Iccom::new(opener)
    })
}

fn ffi_boundary<T>(on_panic: T, f: impl FnOnce() -> T) -> T {
    match std::panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => value,
        Err(_) => {
            error::set_panic_error();
            on_panic
        }
    }
}

/// Message for the last failed call on this thread, or an empty string.
#[no_mangle]
pub extern "C" fn iccom_last_error() -> *const std::os::raw::c_char {
    ffi_boundary(std::ptr::null(), error::last_error_ptr)
}
