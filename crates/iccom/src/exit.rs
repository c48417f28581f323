use std::fmt;
use std::io;

use iccom_channel::{ErrorKind, IccomError};

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const HEALTH_CHECK_FAILED: i32 = 30;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: &io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::NotFound => TRANSPORT_ERROR,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn iccom_error(context: &str, err: IccomError) -> CliError {
    let code = match &err {
        IccomError::Io { source, .. } => return io_error(context, source),
        IccomError::FrameTooLarge { .. } => DATA_INVALID,
        IccomError::StaleHandle | IccomError::SendInFlight { .. } => INTERNAL,
        other => match other.kind() {
            ErrorKind::Param => USAGE,
            ErrorKind::Busy | ErrorKind::BufferFull => FAILURE,
            ErrorKind::InitTimeout | ErrorKind::AckTimeout | ErrorKind::SendTimeout => TIMEOUT,
            ErrorKind::Unsupported | ErrorKind::SizeMismatch | ErrorKind::Generic => {
                TRANSPORT_ERROR
            }
        },
    };
    CliError::new(code, format!("{context}: {err}"))
}
