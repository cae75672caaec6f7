use dbk_shared::Opcode;
use thiserror::Error;

use crate::os::OsError;

/// Every way a privilege, channel or command operation can fail.
///
/// OS error codes are kept as context inside the variant they were
/// classified into; they are never surfaced on their own.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The process token could not be opened or the privilege is not held.
    #[error("permission denied while enabling {privilege}: {os}")]
    PermissionDenied { privilege: String, os: OsError },

    #[error("privilege {privilege} could not be looked up: {os}")]
    LookupFailed { privilege: String, os: OsError },

    #[error("adjusting the token for {privilege} failed: {os}")]
    AdjustFailed { privilege: String, os: OsError },

    /// The adjustment call succeeded but the privilege was not assigned.
    #[error("privilege {privilege} was not assigned to the token")]
    PartialGrant { privilege: String },

    #[error("device {path} not found: {os}")]
    NotFound { path: String, os: OsError },

    #[error("access denied: {os}")]
    AccessDenied { os: OsError },

    /// The driver explicitly refused the request.
    #[error("{opcode} rejected by driver: {os}")]
    Rejected { opcode: Opcode, os: OsError },

    /// The driver had more data than the declared output buffer holds.
    #[error("{opcode} response truncated: {os}")]
    Truncated { opcode: Opcode, os: OsError },

    #[error("{opcode} returned {actual} bytes, contract requires {expected}")]
    MalformedResponse {
        opcode: Opcode,
        expected: usize,
        actual: usize,
    },

    /// Generic low-level I/O failure; the channel is faulted afterwards.
    #[error("device fault: {os}")]
    DeviceFault { os: OsError },

    #[error("creating event {name} failed: {os}")]
    EventCreation { name: String, os: OsError },

    #[error("driver already initialized on this channel")]
    AlreadyInitialized,

    #[error("{opcode} issued before the driver was initialized")]
    NotInitialized { opcode: Opcode },

    #[error("channel is faulted and must be reopened")]
    ChannelFaulted,

    #[error("channel is closed")]
    ChannelClosed,

    /// A request was built with sizes the opcode contract does not allow.
    #[error("{opcode}: {input} input / {output} output bytes violate the contract")]
    ContractViolation {
        opcode: Opcode,
        input: usize,
        output: usize,
    },

    #[error("invalid address 0x{address:X}: {os}")]
    InvalidAddress { address: u64, os: OsError },

    #[error("transfer of {requested} bytes exceeds the {limit} byte bound")]
    SizeExceeded { requested: usize, limit: usize },

    #[error("no such process {pid}: {os}")]
    NoSuchProcess { pid: u32, os: OsError },

    /// A process handle obtained through a different session.
    #[error("process handle belongs to another session")]
    ForeignHandle,

    #[error("closing handle 0x{raw:X} failed: {os}")]
    HandleRelease { raw: u64, os: OsError },
}

impl Error {
    /// Whether this failure leaves the channel unusable until reopened.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::DeviceFault { .. } | Error::MalformedResponse { .. }
        )
    }

    /// The OS code carried as context, if any.
    pub fn os_error(&self) -> Option<OsError> {
        match self {
            Error::PermissionDenied { os, .. }
            | Error::LookupFailed { os, .. }
            | Error::AdjustFailed { os, .. }
            | Error::NotFound { os, .. }
            | Error::AccessDenied { os }
            | Error::EventCreation { os, .. }
            | Error::Rejected { os, .. }
            | Error::Truncated { os, .. }
            | Error::DeviceFault { os }
            | Error::InvalidAddress { os, .. }
            | Error::NoSuchProcess { os, .. }
            | Error::HandleRelease { os, .. } => Some(*os),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
