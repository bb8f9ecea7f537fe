//! Error types for the mirroring pipeline

use std::io;

use thiserror::Error;
use x11rb::errors::{ConnectError, ConnectionError, ReplyError, ReplyOrIdError};
use x11rb::x11_utils::X11Error;

/// A protocol error reported by the source display server.
///
/// These are expected now and then, e.g. a snapshot requested right after the
/// screen changed size but before we processed the notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolError {
    pub kind: String,
    pub major_opcode: u8,
    pub minor_opcode: u16,
    pub sequence: u16,
    pub request: Option<&'static str>,
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: request code {}.{} ({}), sequence {}",
            self.kind,
            self.major_opcode,
            self.minor_opcode,
            self.request.unwrap_or("unknown"),
            self.sequence
        )
    }
}

impl From<&X11Error> for ProtocolError {
    fn from(err: &X11Error) -> Self {
        Self {
            kind: format!("{:?}", err.error_kind),
            major_opcode: err.major_opcode,
            minor_opcode: err.minor_opcode,
            sequence: err.sequence,
            request: err.request_name,
        }
    }
}

/// Errors from the source display service
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to connect to X server: {0}")]
    Connect(#[from] ConnectError),

    #[error("X11 connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("X11 protocol error: {0}")]
    Protocol(ProtocolError),

    #[error("X11 resource ids exhausted")]
    IdsExhausted,

    #[error("{0} extension unavailable")]
    MissingExtension(&'static str),

    #[error("screen {0} does not exist")]
    NoScreen(usize),

    #[error("unsupported root pixel format: {0} bits per pixel")]
    UnsupportedFormat(u8),

    #[error("no CRTC to apply the mode to")]
    NoOutput,

    #[error("CRTC configuration rejected: {0}")]
    ConfigRejected(String),

    #[error("invalid display name: {0}")]
    InvalidDisplay(String),
}

impl SourceError {
    /// Protocol errors are races with other clients; everything else is not
    pub fn is_transient(&self) -> bool {
        matches!(self, SourceError::Protocol(_))
    }
}

impl From<ReplyError> for SourceError {
    fn from(err: ReplyError) -> Self {
        match err {
            ReplyError::ConnectionError(e) => SourceError::Connection(e),
            ReplyError::X11Error(e) => SourceError::Protocol(ProtocolError::from(&e)),
        }
    }
}

impl From<ReplyOrIdError> for SourceError {
    fn from(err: ReplyOrIdError) -> Self {
        match err {
            ReplyOrIdError::IdsExhausted => SourceError::IdsExhausted,
            ReplyOrIdError::ConnectionError(e) => SourceError::Connection(e),
            ReplyOrIdError::X11Error(e) => SourceError::Protocol(ProtocolError::from(&e)),
        }
    }
}

/// Errors from the sink display service
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid sink header: {0}")]
    BadHeader(String),

    #[error("invalid sink buffer size {width}x{height}")]
    InvalidSize { width: u32, height: u32 },

    #[error("sink native size unknown")]
    NativeSizeUnknown,
}

/// Errors from the shared-memory capture buffer
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("shared memory {op} failed: {source}")]
    Shm {
        op: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("failed to register segment with the source: {0}")]
    Register(#[source] SourceError),

    #[error("snapshot fetch failed: {0}")]
    Fetch(#[source] SourceError),

    #[error("capture buffer has no shared memory segment")]
    Unusable,
}

/// Errors from copying a snapshot into a sink buffer
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CopyError {
    #[error("stride {stride} is smaller than a {row_bytes} byte row")]
    StrideTooSmall { stride: usize, row_bytes: usize },

    #[error("source holds {len} bytes, {needed} needed")]
    SourceTooShort { len: usize, needed: usize },

    #[error("destination holds {len} bytes, {needed} needed")]
    DestinationTooShort { len: usize, needed: usize },
}

/// Non-fatal outcomes of a resolution synchronization attempt
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("sink geometry unavailable: {0}")]
    Unavailable(String),

    #[error("no mode matches {width}x{height}")]
    NoMatchingMode { width: u32, height: u32 },

    #[error("failed to apply mode: {0}")]
    ApplyFailed(#[source] SourceError),

    #[error("no matching screen change after {attempts} notifications")]
    ConfirmationTimeout { attempts: u32 },

    #[error(transparent)]
    Source(#[from] SourceError),
}

/// Fatal errors that stop the mirror
#[derive(Debug, Error)]
pub enum MirrorError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error("failed to resize capture buffer: {0}")]
    CaptureResize(#[source] CaptureError),

    #[error("failed to resize sink buffer: {0}")]
    SinkResize(#[source] SinkError),
}
