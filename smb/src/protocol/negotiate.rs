use nom::bytes::complete::{tag, take};
use nom::error::{Error, ErrorKind};
use nom::multi::count;
use nom::number::complete::{le_u16, le_u8};
use nom::IResult;
use serde::{Deserialize, Serialize};

use smb_core::error::SMBError;
use smb_core::logging::{debug, trace};
use smb_core::SMBResult;

use crate::protocol::command_code::{LegacySMBCommandCode, SMBCommandCode};
use crate::protocol::dialect::{SMB_PROTOCOLS, SMBDialect, SMBProtocol};

pub const LEGACY_PROTOCOL_ID: [u8; 4] = [0xFF, b'S', b'M', b'B'];
pub const SMB2_PROTOCOL_ID: [u8; 4] = [0xFE, b'S', b'M', b'B'];
pub const LEGACY_HEADER_SIZE: usize = 32;
pub const SMB2_HEADER_SIZE: usize = 64;
const SMB2_NEGOTIATE_STRUCTURE_SIZE: u16 = 36;

/// The dialects a client offered in its first NEGOTIATE request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SMBNegotiateOffer {
    /// Legacy SMB negotiate: the raw dialect buffer, NUL-separated strings
    /// each led by a 0x02 buffer format byte. Its length is the byte count.
    Legacy(Vec<u8>),
    /// SMB2 negotiate: the dialect revision list.
    Modern(Vec<u16>),
}

/// Outcome of a successful negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SMBNegotiated {
    pub protocol: SMBProtocol,
    /// Value for the response: the client's dialect index when a legacy
    /// offer settles on NT1, the dialect revision otherwise.
    pub dialect_id: u16,
}

impl SMBNegotiated {
    pub fn dialect(&self) -> Option<SMBDialect> {
        self.protocol.dialect()
    }
}

impl SMBNegotiateOffer {
    /// Parses a NEGOTIATE PDU (without the 4 byte transport header) in
    /// either header format.
    pub fn parse(pdu: &[u8]) -> SMBResult<Self> {
        let result = if pdu.starts_with(&LEGACY_PROTOCOL_ID) {
            parse_legacy_negotiate(pdu)
        } else if pdu.starts_with(&SMB2_PROTOCOL_ID) {
            parse_smb2_negotiate(pdu)
        } else {
            return Err(SMBError::parse_error("Unknown protocol id in negotiate request"));
        };
        let (_, offer) = result.map_err(|e| match e {
            nom::Err::Incomplete(_) => SMBError::parse_error("Truncated negotiate request"),
            nom::Err::Error(e) | nom::Err::Failure(e) =>
                SMBError::parse_error(format!("Malformed negotiate request ({:?})", e.code)),
        })?;
        Ok(offer)
    }

    pub fn is_legacy(&self) -> bool {
        matches!(self, Self::Legacy(_))
    }
}

fn parse_legacy_negotiate(input: &[u8]) -> IResult<&[u8], SMBNegotiateOffer> {
    let (remaining, _) = tag(&LEGACY_PROTOCOL_ID[..])(input)?;
    let (remaining, command) = le_u8(remaining)?;
    if command != LegacySMBCommandCode::Negotiate as u8 {
        return Err(nom::Err::Error(Error::new(input, ErrorKind::Tag)));
    }
    let (remaining, _) = take(LEGACY_HEADER_SIZE - LEGACY_PROTOCOL_ID.len() - 1)(remaining)?;
    let (remaining, word_count) = le_u8(remaining)?;
    let (remaining, _) = take(word_count as usize * 2)(remaining)?;
    let (remaining, byte_count) = le_u16(remaining)?;
    let (remaining, dialects) = take(byte_count as usize)(remaining)?;
    Ok((remaining, SMBNegotiateOffer::Legacy(dialects.to_vec())))
}

fn parse_smb2_negotiate(input: &[u8]) -> IResult<&[u8], SMBNegotiateOffer> {
    let (remaining, _) = tag(&SMB2_PROTOCOL_ID[..])(input)?;
    let (remaining, _) = take(8usize)(remaining)?;
    let (remaining, command) = le_u16(remaining)?;
    if command != SMBCommandCode::Negotiate as u16 {
        return Err(nom::Err::Error(Error::new(input, ErrorKind::Tag)));
    }
    let (body, _) = take(SMB2_HEADER_SIZE - 14)(remaining)?;
    let (remaining, structure_size) = le_u16(body)?;
    if structure_size != SMB2_NEGOTIATE_STRUCTURE_SIZE {
        return Err(nom::Err::Error(Error::new(body, ErrorKind::Verify)));
    }
    let (remaining, dialect_count) = le_u16(remaining)?;
    // security mode, reserved, capabilities, client guid, context offset/count
    let (remaining, _) = take(32usize)(remaining)?;
    let (remaining, dialects) = count(le_u16, dialect_count as usize)(remaining)?;
    Ok((remaining, SMBNegotiateOffer::Modern(dialects)))
}

/// Picks the highest protocol in `min..=max` that the client also offered.
///
/// The result is a pure function of the offer and the bounds.
pub fn negotiate(offer: &SMBNegotiateOffer, min: SMBProtocol, max: SMBProtocol) -> SMBResult<SMBNegotiated> {
    find_matching_protocol(offer, max.ordinal(), min.ordinal())
}

pub(crate) fn find_matching_protocol(offer: &SMBNegotiateOffer, start: usize, min: usize) -> SMBResult<SMBNegotiated> {
    if start >= SMB_PROTOCOLS.len() {
        return Err(SMBError::protocol_mismatch(format!("Protocol start index {} out of range", start)));
    }
    let negotiated = match offer {
        SMBNegotiateOffer::Legacy(dialects) => find_legacy_protocol(dialects, start, min),
        SMBNegotiateOffer::Modern(dialects) => find_modern_protocol(dialects, start, min),
    };
    match negotiated {
        Some(negotiated) => {
            debug!(protocol = %negotiated.protocol, dialect_id = negotiated.dialect_id, "negotiated protocol");
            Ok(negotiated)
        }
        None => Err(SMBError::protocol_mismatch("No common dialect with client")),
    }
}

fn find_legacy_protocol(dialects: &[u8], start: usize, min: usize) -> Option<SMBNegotiated> {
    if min > start {
        return None;
    }
    for entry in SMB_PROTOCOLS[min..=start].iter().rev() {
        let mut remaining = dialects;
        let mut index = 0usize;
        while !remaining.is_empty() {
            let length = remaining.iter().position(|b| *b == 0).unwrap_or(remaining.len());
            let name = &remaining[..length];
            trace!(client_dialect = %String::from_utf8_lossy(name), "comparing legacy dialect");
            if name == entry.legacy_name {
                // the answer carries the client index in 16 bits
                let dialect_id = if entry.protocol.is_legacy() {
                    u16::try_from(index).ok()
                } else {
                    Some(entry.dialect_id)
                };
                if let Some(dialect_id) = dialect_id {
                    return Some(SMBNegotiated { protocol: entry.protocol, dialect_id });
                }
                break;
            }
            remaining = &remaining[(length + 1).min(remaining.len())..];
            index += 1;
        }
    }
    None
}

fn find_modern_protocol(dialects: &[u16], start: usize, min: usize) -> Option<SMBNegotiated> {
    let floor = min.max(SMBProtocol::SMB2_02.ordinal());
    if floor > start {
        return None;
    }
    SMB_PROTOCOLS[floor..=start].iter().rev()
        .find(|entry| dialects.iter().rev().any(|dialect| *dialect == entry.dialect_id))
        .map(|entry| SMBNegotiated { protocol: entry.protocol, dialect_id: entry.dialect_id })
}
