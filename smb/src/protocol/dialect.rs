use std::fmt::{Display, Formatter};
use std::str::FromStr;

use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};

use smb_core::error::SMBError;

/// Dialect revision as carried in SMB2 NEGOTIATE requests and responses.
#[repr(u16)]
#[derive(Debug, Eq, PartialEq, Hash, TryFromPrimitive, IntoPrimitive, Serialize, Deserialize, Copy, Clone, Ord, PartialOrd, Default)]
#[allow(non_camel_case_types)]
pub enum SMBDialect {
    V2_0_2 = 0x202,
    V2_1_0 = 0x210,
    #[default]
    V2_X_X = 0x2FF,
    V3_0_0 = 0x300,
    V3_0_2 = 0x302,
    V3_1_1 = 0x311,
}

impl SMBDialect {
    pub fn is_smb3(&self) -> bool {
        *self as u16 >= 0x300
    }
}

/// Sentinel dialect id for "no common dialect".
pub const SMB_BAD_DIALECT_ID: u16 = 0xFFFF;

/// Protocol ordinal. Ordinals are dense and totally ordered from the oldest
/// (NT LM 0.12) to the newest (SMB 3.1.1); configured bounds and negotiation
/// results are expressed in them.
#[repr(u8)]
#[derive(Debug, Eq, PartialEq, Hash, TryFromPrimitive, IntoPrimitive, Serialize, Deserialize, Copy, Clone, Ord, PartialOrd)]
#[allow(non_camel_case_types)]
pub enum SMBProtocol {
    NT1 = 0,
    SMB2_02,
    SMB2_10,
    SMB2_22,
    SMB3_00,
    SMB3_02,
    SMB3_11,
}

/// One row of the static protocol table.
#[derive(Debug, PartialEq, Eq)]
pub struct SMBProtocolEntry {
    pub protocol: SMBProtocol,
    /// Name offered in legacy negotiate requests, including the leading 0x02 buffer format byte.
    pub legacy_name: &'static [u8],
    pub name: &'static str,
    /// Wire id: the dialect revision, or 0 for NT1.
    pub dialect_id: u16,
}

pub static SMB_PROTOCOLS: [SMBProtocolEntry; 7] = [
    SMBProtocolEntry { protocol: SMBProtocol::NT1, legacy_name: b"\x02NT LM 0.12", name: "NT1", dialect_id: 0 },
    SMBProtocolEntry { protocol: SMBProtocol::SMB2_02, legacy_name: b"\x02SMB 2.002", name: "SMB2_02", dialect_id: 0x0202 },
    SMBProtocolEntry { protocol: SMBProtocol::SMB2_10, legacy_name: b"\x02SMB 2.1", name: "SMB2_10", dialect_id: 0x0210 },
    SMBProtocolEntry { protocol: SMBProtocol::SMB2_22, legacy_name: b"\x02SMB 2.???", name: "SMB2_22", dialect_id: 0x02FF },
    SMBProtocolEntry { protocol: SMBProtocol::SMB3_00, legacy_name: b"\x02SMB 3.0", name: "SMB3_00", dialect_id: 0x0300 },
    SMBProtocolEntry { protocol: SMBProtocol::SMB3_02, legacy_name: b"\x02SMB 3.02", name: "SMB3_02", dialect_id: 0x0302 },
    SMBProtocolEntry { protocol: SMBProtocol::SMB3_11, legacy_name: b"\x02SMB 3.1.1", name: "SMB3_11", dialect_id: 0x0311 },
];

impl SMBProtocol {
    pub const MIN: SMBProtocol = SMBProtocol::NT1;
    pub const MAX: SMBProtocol = SMBProtocol::SMB3_11;

    pub fn ordinal(&self) -> usize {
        *self as usize
    }

    pub fn entry(&self) -> &'static SMBProtocolEntry {
        &SMB_PROTOCOLS[self.ordinal()]
    }

    pub fn name(&self) -> &'static str {
        self.entry().name
    }

    pub fn dialect_id(&self) -> u16 {
        self.entry().dialect_id
    }

    /// The SMB2 dialect for this protocol, `None` for NT1.
    pub fn dialect(&self) -> Option<SMBDialect> {
        SMBDialect::try_from(self.dialect_id()).ok()
    }

    pub fn is_legacy(&self) -> bool {
        *self == SMBProtocol::NT1
    }

    pub fn from_ordinal(ordinal: usize) -> Option<Self> {
        u8::try_from(ordinal).ok().and_then(|ordinal| Self::try_from(ordinal).ok())
    }
}

impl Display for SMBProtocol {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SMBProtocol {
    type Err = SMBError;

    /// Case-insensitive prefix lookup: the first table entry whose name
    /// starts with `s` wins, so "smb3" selects SMB3_00.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(SMBError::parse_error("Empty protocol name"));
        }
        let wanted = s.to_ascii_uppercase();
        SMB_PROTOCOLS.iter()
            .find(|entry| entry.name.starts_with(&wanted))
            .map(|entry| entry.protocol)
            .ok_or_else(|| SMBError::parse_error(format!("Unknown protocol name {}", s)))
    }
}
