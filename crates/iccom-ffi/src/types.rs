#![allow(non_camel_case_types)]

use std::ffi::c_void;
use std::os::raw::c_int;

use iccom_channel::{ErrorKind, CHANNEL_MAX, MAX_FRAME_SIZE};

pub const ICCOM_OK: i32 = 0;
pub const ICCOM_NG: i32 = ErrorKind::Generic.code();
pub const ICCOM_ERR_PARAM: i32 = ErrorKind::Param.code();
pub const ICCOM_ERR_BUF_FULL: i32 = ErrorKind::BufferFull.code();
pub const ICCOM_ERR_TO_ACK: i32 = ErrorKind::AckTimeout.code();
pub const ICCOM_ERR_BUSY: i32 = ErrorKind::Busy.code();
pub const ICCOM_ERR_TO_INIT: i32 = ErrorKind::InitTimeout.code();
pub const ICCOM_ERR_TO_SEND: i32 = ErrorKind::SendTimeout.code();
pub const ICCOM_ERR_UNSUPPORT: i32 = ErrorKind::Unsupported.code();
pub const ICCOM_ERR_SIZE: i32 = ErrorKind::SizeMismatch.code();

pub const ICCOM_BUF_MAX_SIZE: u32 = MAX_FRAME_SIZE as u32;
pub const ICCOM_CHANNEL_MAX: c_int = CHANNEL_MAX as c_int;

/// Receives `(channel_no, recv_size, recv_buf)` on the channel's receive
/// thread. `recv_buf` is the buffer passed to `Iccom_lib_Init`.
pub type Iccom_recv_callback_t =
    Option<unsafe extern "C" fn(channel_no: c_int, recv_size: u32, recv_buf: *mut u8)>;

/// Opaque channel handle. Encodes a channel and a generation; it never
/// points at library memory.
pub type Iccom_channel_t = *mut c_void;

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct Iccom_init_param {
    pub channel_no: c_int,
    /// At least `ICCOM_BUF_MAX_SIZE` writable bytes, untouched by the caller
    /// until `Iccom_lib_Final` succeeds.
    pub recv_buf: *mut u8,
    pub recv_cb: Iccom_recv_callback_t,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct Iccom_send_param {
    pub channel_handle: Iccom_channel_t,
    pub send_size: u32,
    pub send_buf: *mut u8,
}
