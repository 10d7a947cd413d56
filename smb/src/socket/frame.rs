use bytes::Buf;
use serde::{Deserialize, Serialize};

use smb_core::error::SMBError;
use smb_core::SMBResult;

use crate::protocol::negotiate::{LEGACY_PROTOCOL_ID, SMB2_PROTOCOL_ID};

pub const RFC1002_SESSION_MESSAGE: u8 = 0x00;
pub const RFC1002_SESSION_KEEP_ALIVE: u8 = 0x85;
pub const RFC1002_HEADER_SIZE: usize = 4;

const SMB2_FLAGS_OFFSET: usize = 16;
const SMB2_FLAGS_SERVER_TO_REDIR: u32 = 0x0000_0001;
const LEGACY_FLAGS_OFFSET: usize = 9;
const LEGACY_FLAGS_RESPONSE: u8 = 0x80;

/// RFC1002 frame type, the first byte of the transport header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SMBFrameType {
    SessionMessage,
    KeepAlive,
    Unknown(u8),
}

impl From<u8> for SMBFrameType {
    fn from(value: u8) -> Self {
        match value {
            RFC1002_SESSION_MESSAGE => Self::SessionMessage,
            RFC1002_SESSION_KEEP_ALIVE => Self::KeepAlive,
            other => Self::Unknown(other),
        }
    }
}

impl From<SMBFrameType> for u8 {
    fn from(value: SMBFrameType) -> Self {
        match value {
            SMBFrameType::SessionMessage => RFC1002_SESSION_MESSAGE,
            SMBFrameType::KeepAlive => RFC1002_SESSION_KEEP_ALIVE,
            SMBFrameType::Unknown(other) => other,
        }
    }
}

/// Only session messages carry SMB PDUs.
pub fn is_smb_request(frame_type: u8) -> bool {
    SMBFrameType::from(frame_type) == SMBFrameType::SessionMessage
}

/// PDU length announced by a transport header.
pub fn rfc1002_length(header: &[u8]) -> SMBResult<usize> {
    let Some(mut header) = header.get(..RFC1002_HEADER_SIZE) else {
        return Err(SMBError::parse_error("Transport header shorter than 4 bytes"));
    };
    Ok((header.get_u32() & 0x00FF_FFFF) as usize)
}

/// Whether a PDU (transport header excluded) is a request this server
/// should process.
pub fn check_smb_message(pdu: &[u8]) -> bool {
    if pdu.starts_with(&SMB2_PROTOCOL_ID) {
        return match pdu.get(SMB2_FLAGS_OFFSET..SMB2_FLAGS_OFFSET + 4) {
            Some(mut flags) => flags.get_u32_le() & SMB2_FLAGS_SERVER_TO_REDIR == 0,
            None => false,
        };
    }
    if pdu.starts_with(&LEGACY_PROTOCOL_ID) {
        return pdu.get(LEGACY_FLAGS_OFFSET)
            .is_some_and(|flags| flags & LEGACY_FLAGS_RESPONSE == 0);
    }
    false
}
