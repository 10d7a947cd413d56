use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};

/// SMB2 command codes.
#[repr(u16)]
#[derive(Debug, Eq, PartialEq, Hash, TryFromPrimitive, IntoPrimitive, Serialize, Deserialize, Clone, Copy)]
pub enum SMBCommandCode {
    Negotiate = 0x0,
    SessionSetup,
    LogOff,
    TreeConnect,
    TreeDisconnect,
    Create,
    Close,
    Flush,
    Read,
    Write,
    Lock,
    IOCTL,
    Cancel,
    Echo,
    QueryDirectory,
    ChangeNotify,
    QueryInfo,
    SetInfo,
    OplockBreak,
}

/// Legacy SMB commands a connection still sees before, or instead of,
/// upgrading to SMB2.
#[repr(u8)]
#[derive(Debug, Eq, PartialEq, Hash, TryFromPrimitive, IntoPrimitive, Serialize, Deserialize, Clone, Copy)]
pub enum LegacySMBCommandCode {
    Close = 0x04,
    LockingANDX = 0x24,
    Echo = 0x2B,
    ReadANDX = 0x2E,
    WriteANDX = 0x2F,
    Transaction2 = 0x32,
    TreeDisconnect = 0x71,
    Negotiate = 0x72,
    SessionSetupANDX = 0x73,
    LogoffANDX = 0x74,
    TreeConnectANDX = 0x75,
    NTTransact = 0xA0,
    NTCreateANDX = 0xA2,
    NTCancel = 0xA4,
}

/// Raw command of a received request, tagged with the header format it came in.
#[derive(Debug, Eq, PartialEq, Hash, Serialize, Deserialize, Clone, Copy)]
pub enum SMBRequestCommand {
    Legacy(u8),
    Modern(u16),
}

impl SMBRequestCommand {
    pub fn is(&self, command: SMBCommandCode) -> bool {
        matches!(self, Self::Modern(code) if *code == command as u16)
    }

    pub fn is_legacy(&self, command: LegacySMBCommandCode) -> bool {
        matches!(self, Self::Legacy(code) if *code == command as u8)
    }
}

impl From<SMBCommandCode> for SMBRequestCommand {
    fn from(value: SMBCommandCode) -> Self {
        Self::Modern(value.into())
    }
}

impl From<LegacySMBCommandCode> for SMBRequestCommand {
    fn from(value: LegacySMBCommandCode) -> Self {
        Self::Legacy(value.into())
    }
}
