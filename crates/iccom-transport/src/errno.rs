//! OS error numbers reported by the channel devices.
//!
//! The driver signals every failure class through `errno`; callers classify
//! an [`std::io::Error`] with [`errno_of`] and compare against these.

pub use libc::{EBUSY, ECANCELED, EDEADLK, ENODEV, ENOENT, ENOSPC, ENXIO, ETIMEDOUT};

/// The OS error number carried by `err`, if any.
pub fn errno_of(err: &std::io::Error) -> Option<i32> {
    err.raw_os_error()
}

/// True when a blocked read returned because receive was cancelled.
pub fn is_cancelled(err: &std::io::Error) -> bool {
    errno_of(err) == Some(ECANCELED)
}
