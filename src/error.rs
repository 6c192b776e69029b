use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AdbError>;

/// Errors surfaced by the client, the framed transport and the
/// streaming services.
#[derive(Error, Debug)]
pub enum AdbError {
    /// A mandatory argument was missing or empty (device serial,
    /// endpoint, stream). Raised before any socket is opened.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The endpoint family or socket capability is not supported.
    #[error("not supported: {0}")]
    NotSupported(String),

    /// Malformed framing, short read or unexpected status bytes.
    #[error("protocol fault: {0}")]
    ProtocolFault(String),

    /// The server answered `FAIL`, or a service produced a failure
    /// terminal (`Failed:` pair response, non-`Success` install,
    /// non-`restarting` root).
    #[error("adb failure: {0}")]
    AdbFailure(String),

    /// A streaming shell read raised an I/O error without
    /// cancellation being requested.
    #[error("shell command unresponsive")]
    ShellCommandUnresponsive(#[source] io::Error),

    /// No attached device matched the selection.
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    /// More than one attached device matched the selection.
    #[error("multiple devices match")]
    MultipleDevicesMatch,

    /// Recognised `permission denied` / `access denied` shell output.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Recognised `not found` / `No such file or directory` shell output.
    #[error("file not found: {0}")]
    FileNotFound(String),

    /// Recognised `Unknown option` shell output.
    #[error("unknown option: {0}")]
    UnknownOption(String),

    /// Recognised `Aborting.` shell output.
    #[error("command aborting: {0}")]
    CommandAborting(String),

    /// The peer closed a streaming socket (shell session, log or
    /// framebuffer reader). Normal at a record boundary; an error
    /// mid-record. Request/response exchanges never report this: a
    /// connection closed instead of a reply is a `ProtocolFault`.
    #[error("end of stream")]
    EndOfStream,

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl AdbError {
    /// True for errors that terminate a streaming pump without being
    /// reported to the caller.
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, AdbError::EndOfStream)
    }
}
