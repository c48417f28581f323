use std::fmt;
use std::io;

use iccom_transport::{errno, ChannelId, TransportError};

/// Stable classification of every channel API failure.
///
/// [`IccomError`] carries the details; this is what callers branch on and
/// what the C ABI turns into a return code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad input, unknown or stale handle, or close refused while sending.
    Param,
    /// The channel is already in use.
    Busy,
    /// The remote side did not finish channel initialization in time.
    InitTimeout,
    /// The channel does not exist on this system.
    Unsupported,
    /// The transport has no room for the datagram.
    BufferFull,
    /// The remote side did not acknowledge the datagram in time.
    AckTimeout,
    /// The datagram could not be sent in time.
    SendTimeout,
    /// The transport accepted fewer bytes than requested.
    SizeMismatch,
    /// Any other transport or internal failure.
    Generic,
}

impl ErrorKind {
    /// Return code of the classic `Iccom_lib_*` API for this kind.
    pub const fn code(self) -> i32 {
        match self {
            ErrorKind::Generic => -1,
            ErrorKind::Param => -2,
            ErrorKind::BufferFull => -3,
            ErrorKind::AckTimeout => -4,
            ErrorKind::Busy => -5,
            ErrorKind::InitTimeout => -6,
            ErrorKind::SendTimeout => -7,
            ErrorKind::Unsupported => -8,
            ErrorKind::SizeMismatch => -9,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Param => "param",
            ErrorKind::Busy => "busy",
            ErrorKind::InitTimeout => "init-timeout",
            ErrorKind::Unsupported => "unsupported",
            ErrorKind::BufferFull => "buffer-full",
            ErrorKind::AckTimeout => "ack-timeout",
            ErrorKind::SendTimeout => "send-timeout",
            ErrorKind::SizeMismatch => "size-mismatch",
            ErrorKind::Generic => "generic",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors returned by channel operations.
#[derive(Debug, thiserror::Error)]
pub enum IccomError {
    /// The channel number is outside `0..CHANNEL_MAX`.
    #[error("channel {channel} out of range (max {max})")]
    InvalidChannel { channel: u32, max: usize },

    /// A required parameter is missing or malformed.
    #[error("invalid parameter: {0}")]
    InvalidParam(&'static str),

    /// The receive buffer cannot hold a maximum-size frame.
    #[error("receive buffer holds {len} bytes, need {required}")]
    RecvBufferTooSmall { len: usize, required: usize },

    /// The datagram is larger than one frame.
    #[error("send size {size} exceeds maximum frame size {max}")]
    FrameTooLarge { size: usize, max: usize },

    /// The handle does not designate an open channel.
    #[error("channel handle is not open")]
    StaleHandle,

    /// Close was refused because sends are still writing.
    #[error("channel {channel} busy sending ({in_flight} in flight)")]
    SendInFlight { channel: ChannelId, in_flight: u32 },

    /// The device reported the channel as in use.
    #[error("channel {channel} busy: {source}")]
    Busy { channel: ChannelId, source: io::Error },

    /// The channel is already published by another open.
    #[error("channel {channel} already open")]
    AlreadyOpen { channel: ChannelId },

    /// Channel initialization timed out on the remote side.
    #[error("channel {channel} initialization timed out: {source}")]
    InitTimeout { channel: ChannelId, source: io::Error },

    /// The device node for the channel is missing or unusable.
    #[error("channel {channel} unsupported: {source}")]
    Unsupported { channel: ChannelId, source: io::Error },

    /// The transport send buffer is full.
    #[error("channel {channel} buffer full: {source}")]
    BufferFull { channel: ChannelId, source: io::Error },

    /// No acknowledgement arrived for the datagram.
    #[error("channel {channel} acknowledgement timed out: {source}")]
    AckTimeout { channel: ChannelId, source: io::Error },

    /// The datagram could not be handed to the remote side in time.
    #[error("channel {channel} send timed out: {source}")]
    SendTimeout { channel: ChannelId, source: io::Error },

    /// The transport reported success for fewer bytes than requested.
    #[error("channel {channel} short write ({written} of {requested} bytes)")]
    SizeMismatch {
        channel: ChannelId,
        requested: usize,
        written: usize,
    },

    /// A transport call failed for a reason without a dedicated kind.
    #[error("{op} failed on channel {channel}: {source}")]
    Io {
        op: &'static str,
        channel: ChannelId,
        source: io::Error,
    },

    /// The transport failed before reaching the device.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

impl IccomError {
    /// The stable class of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            IccomError::InvalidChannel { .. }
            | IccomError::InvalidParam(_)
            | IccomError::RecvBufferTooSmall { .. }
            | IccomError::FrameTooLarge { .. }
            | IccomError::StaleHandle
            | IccomError::SendInFlight { .. } => ErrorKind::Param,
            IccomError::Busy { .. } | IccomError::AlreadyOpen { .. } => ErrorKind::Busy,
            IccomError::InitTimeout { .. } => ErrorKind::InitTimeout,
            IccomError::Unsupported { .. } => ErrorKind::Unsupported,
            IccomError::BufferFull { .. } => ErrorKind::BufferFull,
            IccomError::AckTimeout { .. } => ErrorKind::AckTimeout,
            IccomError::SendTimeout { .. } => ErrorKind::SendTimeout,
            IccomError::SizeMismatch { .. } => ErrorKind::SizeMismatch,
            IccomError::Io { .. } | IccomError::Transport(_) => ErrorKind::Generic,
        }
    }

    /// Return code of the classic `Iccom_lib_*` API for this error.
    pub fn code(&self) -> i32 {
        self.kind().code()
    }

    /// Classify a failed device open.
    pub(crate) fn from_open(channel: ChannelId, err: TransportError) -> Self {
        let source = match err {
            TransportError::Open { source, .. } | TransportError::Io(source) => source,
            other => return IccomError::Transport(other),
        };
        match errno::errno_of(&source) {
            Some(errno::EBUSY) => IccomError::Busy { channel, source },
            Some(errno::EDEADLK) => IccomError::InitTimeout { channel, source },
            Some(errno::ENOENT | errno::ENODEV | errno::ENXIO) => {
                IccomError::Unsupported { channel, source }
            }
            _ => IccomError::Io {
                op: "open",
                channel,
                source,
            },
        }
    }

    /// Classify a failed datagram write.
    pub(crate) fn from_write(channel: ChannelId, source: io::Error) -> Self {
        match errno::errno_of(&source) {
            Some(errno::ENOSPC) => IccomError::BufferFull { channel, source },
            Some(errno::ETIMEDOUT) => IccomError::AckTimeout { channel, source },
            Some(errno::EDEADLK) => IccomError::SendTimeout { channel, source },
            _ => IccomError::Io {
                op: "write",
                channel,
                source,
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, IccomError>;
