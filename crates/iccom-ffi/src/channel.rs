use std::os::raw::c_int;

use iccom_channel::{ChannelHandle, ChannelId, Iccom, MAX_FRAME_SIZE};
use tracing::warn;

use crate::error;
use crate::types::{
    Iccom_channel_t, Iccom_init_param, Iccom_send_param, ICCOM_BUF_MAX_SIZE, ICCOM_NG, ICCOM_OK,
};

/// Receive buffer owned by the C caller.
struct ForeignBuffer(*mut u8);

// SAFETY: the caller hands the buffer to the library until Iccom_lib_Final
// succeeds; only the channel's receive thread touches it in that window.
unsafe impl Send for ForeignBuffer {}

impl AsMut<[u8]> for ForeignBuffer {
    fn as_mut(&mut self) -> &mut [u8] {
        // SAFETY: non-null and at least ICCOM_BUF_MAX_SIZE bytes, per the
        // Iccom_lib_Init contract.
        unsafe { std::slice::from_raw_parts_mut(self.0, MAX_FRAME_SIZE) }
    }
}

fn handle_to_ptr(handle: ChannelHandle) -> Option<Iccom_channel_t> {
    usize::try_from(handle.to_raw())
        .ok()
        .map(|raw| raw as Iccom_channel_t)
}

fn handle_from_ptr(ptr: Iccom_channel_t) -> Option<ChannelHandle> {
    ChannelHandle::from_raw(ptr as usize as u64)
}

/// # Safety
/// `param` must be null or point to a readable `Iccom_init_param` whose
/// `recv_buf` is null or valid for `ICCOM_BUF_MAX_SIZE` bytes until the
/// channel is finalized. `handle_out` must be null or writable.
pub(crate) unsafe fn init_with(
    iccom: &Iccom,
    param: *const Iccom_init_param,
    handle_out: *mut Iccom_channel_t,
) -> i32 {
    if param.is_null() {
        return error::set_param_error("init parameter cannot be null");
    }
    if handle_out.is_null() {
        return error::set_param_error("channel handle output cannot be null");
    }

    // SAFETY: non-null, readable per the caller contract.
    let param = unsafe { *param };
    if param.recv_buf.is_null() {
        return error::set_param_error("recv_buf cannot be null");
    }
    let Some(recv_cb) = param.recv_cb else {
        return error::set_param_error("recv_cb cannot be null");
    };
    let Ok(channel_no) = u32::try_from(param.channel_no) else {
        return error::set_param_error(format!("channel {} out of range", param.channel_no));
    };

    let callback = move |channel: ChannelId, data: &[u8]| {
        // SAFETY: `data` starts at the caller's recv_buf and holds at most
        // ICCOM_BUF_MAX_SIZE bytes.
        unsafe {
            recv_cb(
                c_int::from(channel.get()),
                data.len() as u32,
                data.as_ptr().cast_mut(),
            );
        }
    };

    let handle = match iccom.init(channel_no, ForeignBuffer(param.recv_buf), callback) {
        Ok(handle) => handle,
        Err(err) => return error::map_iccom_error(&err),
    };

    let Some(ptr) = handle_to_ptr(handle) else {
        warn!(%handle, "handle does not fit a pointer; closing channel");
        if let Err(err) = iccom.finalize(handle) {
            warn!(%handle, error = %err, "cannot close unrepresentable handle");
        }
        error::set_error_message("channel handle does not fit a pointer");
        return ICCOM_NG;
    };

    // SAFETY: non-null and writable per the caller contract.
    unsafe { *handle_out = ptr };
    ICCOM_OK
}

/// # Safety
/// `param` must be null or point to a readable `Iccom_send_param` whose
/// `send_buf` is null or readable for `send_size` bytes.
pub(crate) unsafe fn send_with(iccom: &Iccom, param: *const Iccom_send_param) -> i32 {
    if param.is_null() {
        return error::set_param_error("send parameter cannot be null");
    }

    // SAFETY: non-null, readable per the caller contract.
    let param = unsafe { *param };
    if param.send_buf.is_null() {
        return error::set_param_error("send_buf cannot be null");
    }
    if param.send_size > ICCOM_BUF_MAX_SIZE {
        return error::set_param_error(format!(
            "send_size {} exceeds {ICCOM_BUF_MAX_SIZE}",
            param.send_size
        ));
    }
    let Some(handle) = handle_from_ptr(param.channel_handle) else {
        return error::set_param_error("channel handle is not open");
    };

    // SAFETY: non-null and readable for send_size bytes per the caller
    // contract; send_size is bounded above.
    let data = unsafe { std::slice::from_raw_parts(param.send_buf, param.send_size as usize) };

    match iccom.send(handle, data) {
        Ok(()) => ICCOM_OK,
        Err(err) => error::map_iccom_error(&err),
    }
}

pub(crate) fn final_with(iccom: &Iccom, channel_handle: Iccom_channel_t) -> i32 {
    let Some(handle) = handle_from_ptr(channel_handle) else {
        return error::set_param_error("channel handle is not open");
    };

    match iccom.finalize(handle) {
        Ok(()) => ICCOM_OK,
        Err(err) => error::map_iccom_error(&err),
    }
}

/// Open a channel and start its receive thread.
///
/// # Safety
/// `p_iccom_init` must be null or point to a valid `Iccom_init_param`. Its
/// `recv_buf` must stay valid for `ICCOM_BUF_MAX_SIZE` bytes, and must not be
/// accessed by the caller outside the callback, until `Iccom_lib_Final`
/// succeeds for the returned handle. `p_channel_handle` must be null or
/// writable.
#[no_mangle]
#[allow(non_snake_case)]
pub unsafe extern "C" fn Iccom_lib_Init(
    p_iccom_init: *const Iccom_init_param,
    p_channel_handle: *mut Iccom_channel_t,
) -> i32 {
    crate::ffi_boundary(ICCOM_NG, || {
        error::clear_error_state();
        // SAFETY: forwarded caller contract.
        unsafe { init_with(crate::context(), p_iccom_init, p_channel_handle) }
    })
}

/// Send one datagram of at most `ICCOM_BUF_MAX_SIZE` bytes.
///
/// # Safety
/// `p_iccom_send` must be null or point to a valid `Iccom_send_param` whose
/// `send_buf` is readable for `send_size` bytes.
#[no_mangle]
#[allow(non_snake_case)]
pub unsafe extern "C" fn Iccom_lib_Send(p_iccom_send: *const Iccom_send_param) -> i32 {
    crate::ffi_boundary(ICCOM_NG, || {
        error::clear_error_state();
        // SAFETY: forwarded caller contract.
        unsafe { send_with(crate::context(), p_iccom_send) }
    })
}

/// Close a channel. No callback runs for it after this returns `ICCOM_OK`.
#[no_mangle]
#[allow(non_snake_case)]
pub extern "C" fn Iccom_lib_Final(channel_handle: Iccom_channel_t) -> i32 {
    crate::ffi_boundary(ICCOM_NG, || {
        error::clear_error_state();
        final_with(crate::context(), channel_handle)
    })
}

#[cfg(test)]
mod tests {
    use std::sync::{Mutex, PoisonError};
    use std::time::{Duration, Instant};

    use iccom_transport::{SimBus, WriteMode};

    use super::*;
    use crate::types::{ICCOM_ERR_PARAM, ICCOM_ERR_SIZE};

    struct Received {
        channel_no: c_int,
        recv_size: u32,
        recv_buf: usize,
        data: Vec<u8>,
    }

    static RECEIVED: Mutex<Vec<Received>> = Mutex::new(Vec::new());

    unsafe extern "C" fn record(channel_no: c_int, recv_size: u32, recv_buf: *mut u8) {
        // SAFETY: the library passes the live receive buffer and its fill size.
        let data = unsafe { std::slice::from_raw_parts(recv_buf, recv_size as usize) }.to_vec();
        RECEIVED
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Received {
                channel_no,
                recv_size,
                recv_buf: recv_buf as usize,
                data,
            });
    }

    fn wait_for_received(channel_no: c_int) -> Option<Received> {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            let mut received = RECEIVED.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(pos) = received.iter().position(|r| r.channel_no == channel_no) {
                return Some(received.remove(pos));
            }
            drop(received);
            std::thread::sleep(Duration::from_millis(5));
        }
        None
    }

    fn init_param(channel_no: c_int, recv_buf: &mut [u8]) -> Iccom_init_param {
        Iccom_init_param {
            channel_no,
            recv_buf: recv_buf.as_mut_ptr(),
            recv_cb: Some(record),
        }
    }

    #[test]
    fn init_send_receive_final_through_the_c_surface() {
        let bus = SimBus::loopback();
        let iccom = Iccom::new(bus.clone());
        let mut recv_buf = vec![0u8; MAX_FRAME_SIZE];
        let param = init_param(2, &mut recv_buf);
        let mut handle: Iccom_channel_t = std::ptr::null_mut();

        assert_eq!(unsafe { init_with(&iccom, &param, &mut handle) }, ICCOM_OK);
        assert!(!handle.is_null());

        let mut payload = *b"ABC";
        let send = Iccom_send_param {
            channel_handle: handle,
            send_size: 3,
            send_buf: payload.as_mut_ptr(),
        };
        assert_eq!(unsafe { send_with(&iccom, &send) }, ICCOM_OK);

        let received = wait_for_received(2).expect("echo should reach the callback");
        assert_eq!(received.recv_size, 3);
        assert_eq!(received.data, b"ABC");
        assert_eq!(received.recv_buf, param.recv_buf as usize, "buffer used in place");

        assert_eq!(final_with(&iccom, handle), ICCOM_OK);
        assert_eq!(final_with(&iccom, handle), ICCOM_ERR_PARAM);
        assert_eq!(unsafe { send_with(&iccom, &send) }, ICCOM_ERR_PARAM);
    }

    #[test]
    fn null_and_out_of_range_parameters_are_rejected() {
        let bus = SimBus::new();
        let iccom = Iccom::new(bus.clone());
        let mut recv_buf = vec![0u8; MAX_FRAME_SIZE];
        let mut handle: Iccom_channel_t = std::ptr::null_mut();

        let good = init_param(1, &mut recv_buf);
        let cases = [
            Iccom_init_param {
                recv_buf: std::ptr::null_mut(),
                ..good
            },
            Iccom_init_param {
                recv_cb: None,
                ..good
            },
            Iccom_init_param {
                channel_no: -1,
                ..good
            },
            Iccom_init_param {
                channel_no: 8,
                ..good
            },
        ];
        for param in cases {
            assert_eq!(
                unsafe { init_with(&iccom, &param, &mut handle) },
                ICCOM_ERR_PARAM
            );
        }
        assert_eq!(
            unsafe { init_with(&iccom, std::ptr::null(), &mut handle) },
            ICCOM_ERR_PARAM
        );
        assert_eq!(
            unsafe { init_with(&iccom, &good, std::ptr::null_mut()) },
            ICCOM_ERR_PARAM
        );
        assert!(ChannelId::all().all(|ch| bus.channel(ch).open_count() == 0));

        assert_eq!(
            unsafe { send_with(&iccom, std::ptr::null()) },
            ICCOM_ERR_PARAM
        );
        assert_eq!(final_with(&iccom, std::ptr::null_mut()), ICCOM_ERR_PARAM);
    }

    #[test]
    fn send_checks_size_and_buffer_before_the_handle() {
        let bus = SimBus::new();
        let control = bus.channel(ChannelId::new(4).unwrap());
        let iccom = Iccom::new(bus.clone());
        let mut recv_buf = vec![0u8; MAX_FRAME_SIZE];
        let mut handle: Iccom_channel_t = std::ptr::null_mut();
        let param = init_param(4, &mut recv_buf);
        assert_eq!(unsafe { init_with(&iccom, &param, &mut handle) }, ICCOM_OK);

        let mut payload = vec![0u8; MAX_FRAME_SIZE + 1];
        let oversize = Iccom_send_param {
            channel_handle: handle,
            send_size: ICCOM_BUF_MAX_SIZE + 1,
            send_buf: payload.as_mut_ptr(),
        };
        assert_eq!(unsafe { send_with(&iccom, &oversize) }, ICCOM_ERR_PARAM);
        let null_buf = Iccom_send_param {
            send_buf: std::ptr::null_mut(),
            send_size: 1,
            ..oversize
        };
        assert_eq!(unsafe { send_with(&iccom, &null_buf) }, ICCOM_ERR_PARAM);
        assert!(control.written().is_empty());

        control.set_write_mode(WriteMode::Short(2));
        let short = Iccom_send_param {
            send_size: 3,
            ..oversize
        };
        assert_eq!(unsafe { send_with(&iccom, &short) }, ICCOM_ERR_SIZE);

        assert_eq!(final_with(&iccom, handle), ICCOM_OK);
    }

    #[test]
    fn forged_handles_are_rejected() {
        let bus = SimBus::new();
        let iccom = Iccom::new(bus.clone());
        let mut recv_buf = vec![0u8; MAX_FRAME_SIZE];
        let mut handle: Iccom_channel_t = std::ptr::null_mut();
        let param = init_param(6, &mut recv_buf);
        assert_eq!(unsafe { init_with(&iccom, &param, &mut handle) }, ICCOM_OK);

        let forged = ((handle as usize) + (1 << 3)) as Iccom_channel_t;
        assert_eq!(final_with(&iccom, forged), ICCOM_ERR_PARAM);
        assert_eq!(final_with(&iccom, 7usize as Iccom_channel_t), ICCOM_ERR_PARAM);
        assert_eq!(final_with(&iccom, handle), ICCOM_OK);
    }
}
