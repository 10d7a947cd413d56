use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};

/// NT status codes returned to clients by the connection core
/// ([MS-ERREF] 2.3.1).
#[repr(u32)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TryFromPrimitive, IntoPrimitive, Copy)]
pub enum NTStatus {
    StatusSuccess = 0x0,
    StatusPending = 0x00000103,
    InvalidHandle = 0xC0000008,
    InvalidParameter = 0xC000000D,
    MoreProcessingRequired = 0xC0000016,
    AccessDenied = 0xC0000022,
    ObjectNameNotFound = 0xC0000034,
    SharingViolation = 0xC0000043,
    DeletePending = 0xC0000056,
    InsufficientResources = 0xC000009A,
    StatusNotSupported = 0xC00000BB,
    InvalidNetworkResponse = 0xC00000C3,
    RequestNotAccepted = 0xC00000D0,
    TooManyOpenedFiles = 0xC000011F,
    Cancelled = 0xC0000120,
    FileClosed = 0xC0000128,
    UserSessionDeleted = 0xC0000203,
    NotifyCleanup = 0x0000010B,
    UnknownError = 0xFFFFFFFF,
}

impl NTStatus {
    pub fn is_error(&self) -> bool {
        (*self as u32) >> 30 == 0x3
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_values_round_trip_through_u32() {
        let raw: u32 = NTStatus::SharingViolation.into();
        assert_eq!(raw, 0xC0000043);
        assert_eq!(NTStatus::try_from(0xC0000056u32).unwrap(), NTStatus::DeletePending);
        assert!(NTStatus::try_from(0xC0000001u32).is_err());
    }

    #[test]
    fn severity_classification() {
        assert!(NTStatus::SharingViolation.is_error());
        assert!(!NTStatus::StatusSuccess.is_error());
        assert!(!NTStatus::StatusPending.is_error());
        assert!(!NTStatus::NotifyCleanup.is_error());
    }
}
