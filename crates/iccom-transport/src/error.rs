use std::path::PathBuf;

/// Errors that can occur in device transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to open the device node for a channel.
    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The channel number does not name one of the device channels.
    #[error("channel {channel} out of range (max {max})")]
    InvalidChannel { channel: u32, max: usize },

    /// An I/O error occurred on an open device.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// The OS error number behind this failure, if there is one.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            TransportError::Open { source, .. } | TransportError::Io(source) => {
                source.raw_os_error()
            }
            TransportError::InvalidChannel { .. } => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
