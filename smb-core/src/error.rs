use std::error::Error;
use std::fmt::{Display, Formatter};
use std::io;

use serde::{Deserialize, Serialize};

use crate::nt_status::NTStatus;

#[derive(Debug)]
pub enum SMBError {
    ParseError(SMBParseError),
    PreconditionFailed(SMBPreconditionFailedError),
    IOError(SMBIOError),
    ResponseError(SMBResponseError),
    ServerError(SMBServerError),
    ProtocolMismatch(SMBProtocolMismatchError),
    BufferOverflow(SMBBufferOverflowError),
    OutOfMemory(SMBOutOfMemoryError),
    HandleExhausted(SMBHandleExhaustedError),
    ShareViolation(SMBShareConflict),
    NotFound(SMBNotFoundError),
}

impl SMBError {
    pub fn parse_error<T: Into<SMBParseError>>(error: T) -> Self {
        Self::ParseError(error.into())
    }

    pub fn precondition_failed<T: Into<SMBPreconditionFailedError>>(error: T) -> Self {
        Self::PreconditionFailed(error.into())
    }

    pub fn io_error<T: Into<SMBIOError>>(error: T) -> Self {
        Self::IOError(error.into())
    }

    pub fn response_error<T: Into<SMBResponseError>>(error: T) -> Self {
        Self::ResponseError(error.into())
    }

    pub fn server_error<T: Into<SMBServerError>>(error: T) -> Self {
        Self::ServerError(error.into())
    }

    pub fn protocol_mismatch<T: Into<SMBProtocolMismatchError>>(error: T) -> Self {
        Self::ProtocolMismatch(error.into())
    }

    pub fn buffer_overflow<T: Into<usize>, U: Into<usize>>(length: T, max: U) -> Self {
        Self::BufferOverflow((length, max).into())
    }

    pub fn out_of_memory<T: Into<usize>>(requested: T) -> Self {
        Self::OutOfMemory(SMBOutOfMemoryError { requested: requested.into() })
    }

    pub fn handle_exhausted<T: Into<usize>>(capacity: T) -> Self {
        Self::HandleExhausted(SMBHandleExhaustedError { capacity: capacity.into() })
    }

    pub fn share_violation(conflict: SMBShareConflict) -> Self {
        Self::ShareViolation(conflict)
    }

    pub fn not_found<T: Into<u64>>(kind: &'static str, id: T) -> Self {
        Self::NotFound(SMBNotFoundError { kind, id: id.into() })
    }

    /// Status a command handler reports to the client for this error.
    pub fn nt_status(&self) -> NTStatus {
        match self {
            Self::ParseError(_) => NTStatus::InvalidParameter,
            Self::PreconditionFailed(_) => NTStatus::RequestNotAccepted,
            Self::IOError(_) => NTStatus::UnknownError,
            Self::ResponseError(x) => x.status,
            Self::ServerError(_) => NTStatus::UnknownError,
            Self::ProtocolMismatch(_) => NTStatus::StatusNotSupported,
            Self::BufferOverflow(_) => NTStatus::InvalidParameter,
            Self::OutOfMemory(_) => NTStatus::InsufficientResources,
            Self::HandleExhausted(_) => NTStatus::TooManyOpenedFiles,
            Self::ShareViolation(SMBShareConflict::DeletePending) => NTStatus::DeletePending,
            Self::ShareViolation(_) => NTStatus::SharingViolation,
            Self::NotFound(_) => NTStatus::FileClosed,
        }
    }

    /// Whether the framing itself can no longer be trusted, so the whole
    /// connection has to go rather than just the request.
    pub fn aborts_connection(&self) -> bool {
        matches!(self, Self::ParseError(_) | Self::ProtocolMismatch(_) | Self::BufferOverflow(_))
    }
}

#[derive(Debug)]
pub struct SMBParseError {
    error: Box<dyn Error + Send + Sync>,
}

impl<T: Into<Box<dyn Error + Send + Sync>>> From<T> for SMBParseError {
    fn from(value: T) -> Self {
        Self {
            error: value.into()
        }
    }
}

impl Display for SMBParseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Parse failed with error: {}", self.error)
    }
}

#[derive(Debug)]
pub struct SMBPreconditionFailedError {
    message: String,
}

impl<T: Into<String>> From<T> for SMBPreconditionFailedError {
    fn from(value: T) -> Self {
        Self {
            message: value.into()
        }
    }
}

impl Display for SMBPreconditionFailedError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Operation failed with unmet precondition: {}", self.message)
    }
}

#[derive(Debug)]
pub struct SMBIOError {
    error: io::Error,
}

impl<T: Into<io::Error>> From<T> for SMBIOError {
    fn from(value: T) -> Self {
        Self {
            error: value.into()
        }
    }
}

impl Display for SMBIOError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "SMB I/O operation failed with error: {}", self.error)
    }
}

#[derive(Debug)]
pub struct SMBResponseError {
    status: NTStatus,
}

impl From<NTStatus> for SMBResponseError {
    fn from(status: NTStatus) -> Self {
        Self { status }
    }
}

impl Display for SMBResponseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "SMB request failed with status: {:?}", self.status)
    }
}

#[derive(Debug)]
pub struct SMBServerError {
    error: Box<dyn Error + Send + Sync>,
}

impl<T: Into<Box<dyn Error + Send + Sync>>> From<T> for SMBServerError {
    fn from(value: T) -> Self {
        Self {
            error: value.into()
        }
    }
}

impl Display for SMBServerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Server operation failed with error: {}", self.error)
    }
}

#[derive(Debug)]
pub struct SMBProtocolMismatchError {
    message: String,
}

impl<T: Into<String>> From<T> for SMBProtocolMismatchError {
    fn from(value: T) -> Self {
        Self {
            message: value.into()
        }
    }
}

impl Display for SMBProtocolMismatchError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "No dialect could be negotiated: {}", self.message)
    }
}

#[derive(Debug)]
pub struct SMBBufferOverflowError {
    length: usize,
    max: usize,
}

impl SMBBufferOverflowError {
    pub fn length(&self) -> usize {
        self.length
    }

    pub fn max(&self) -> usize {
        self.max
    }
}

impl<T: Into<usize>, U: Into<usize>> From<(T, U)> for SMBBufferOverflowError {
    fn from(value: (T, U)) -> Self {
        Self {
            length: value.0.into(),
            max: value.1.into(),
        }
    }
}

impl Display for SMBBufferOverflowError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "SMB request too long ({} bytes, at most {} accepted)", self.length, self.max)
    }
}

#[derive(Debug)]
pub struct SMBOutOfMemoryError {
    requested: usize,
}

impl Display for SMBOutOfMemoryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Failed to allocate {} bytes", self.requested)
    }
}

#[derive(Debug)]
pub struct SMBHandleExhaustedError {
    capacity: usize,
}

impl Display for SMBHandleExhaustedError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "All {} handle ids are in use", self.capacity)
    }
}

#[derive(Debug)]
pub struct SMBNotFoundError {
    kind: &'static str,
    id: u64,
}

impl SMBNotFoundError {
    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Display for SMBNotFoundError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "No {} with id {}", self.kind, self.id)
    }
}

/// The share-mode rule that refused a new open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SMBShareConflict {
    /// Supersede requested on a stream that is already open.
    SupersedeStream,
    /// The existing open is marked for deletion.
    DeletePending,
    /// Existing open does not share delete, new open wants delete access.
    ShareDelete,
    /// Existing open does not share read, new open wants read access.
    ShareRead,
    /// Existing open does not share write, new open wants write access.
    ShareWrite,
    /// Existing open reads, new open does not share read.
    AccessRead,
    /// Existing open writes, new open does not share write.
    AccessWrite,
    /// Existing open may delete, new open does not share delete.
    AccessDelete,
}

impl Display for SMBShareConflict {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let message = match self {
            Self::SupersedeStream => "supersede is not allowed on an open stream",
            Self::DeletePending => "file is pending deletion",
            Self::ShareDelete => "previous open does not share delete",
            Self::ShareRead => "previous open does not share read",
            Self::ShareWrite => "previous open does not share write",
            Self::AccessRead => "previous open reads without the new open sharing read",
            Self::AccessWrite => "previous open writes without the new open sharing write",
            Self::AccessDelete => "previous open may delete without the new open sharing delete",
        };
        write!(f, "Sharing violation: {}", message)
    }
}

impl Display for SMBError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ParseError(x) => write!(f, "{}", x),
            Self::PreconditionFailed(x) => write!(f, "{}", x),
            Self::IOError(x) => write!(f, "{}", x),
            Self::ResponseError(x) => write!(f, "{}", x),
            Self::ServerError(x) => write!(f, "{}", x),
            Self::ProtocolMismatch(x) => write!(f, "{}", x),
            Self::BufferOverflow(x) => write!(f, "{}", x),
            Self::OutOfMemory(x) => write!(f, "{}", x),
            Self::HandleExhausted(x) => write!(f, "{}", x),
            Self::ShareViolation(x) => write!(f, "{}", x),
            Self::NotFound(x) => write!(f, "{}", x),
        }
    }
}

impl std::error::Error for SMBError {}
