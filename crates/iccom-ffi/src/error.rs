use std::cell::RefCell;
use std::ffi::CString;
use std::os::raw::c_char;

use iccom_channel::IccomError;

use crate::types::ICCOM_ERR_PARAM;

thread_local! {
    static LAST_ERROR: RefCell<CString> = RefCell::new(CString::default());
}

pub(crate) fn clear_error_state() {
    LAST_ERROR.with(|state| {
        *state.borrow_mut() = CString::default();
    });
}

pub(crate) fn set_error_message(message: impl Into<String>) {
    let message = message.into();
    let sanitized = message.replace('\0', "?");
    LAST_ERROR.with(|state| {
        *state.borrow_mut() = CString::new(sanitized).unwrap_or_default();
    });
}

pub(crate) fn set_param_error(message: impl Into<String>) -> i32 {
    set_error_message(message);
    ICCOM_ERR_PARAM
}

pub(crate) fn set_panic_error() {
    set_error_message("panic across FFI boundary");
}

pub(crate) fn map_iccom_error(err: &IccomError) -> i32 {
    set_error_message(err.to_string());
    err.code()
}

pub(crate) fn last_error_ptr() -> *const c_char {
    LAST_ERROR.with(|state| state.borrow().as_ptr())
}
