use bitflags::bitflags;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};

bitflags! {
    #[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, Default, Serialize, Deserialize)]
    pub struct SMBCreateOptions: u32 {
        const DIRECTORY_FILE            = 0x000001;
        const WRITE_THROUGH             = 0x000002;
        const SEQUENTIAL_ONLY           = 0x000004;
        const NO_INTERMEDIATE_BUFFERING = 0x000008;
        const SYNCHRONOUS_IO_ALERT      = 0x000010;
        const SYNCHRONOUS_IO_NONALERT   = 0x000020;
        const NON_DIRECTORY_FILE        = 0x000040;
        const COMPLETE_IF_OPLOCKED      = 0x000100;
        const NO_EA_KNOWLEDGE           = 0x000200;
        const RANDOM_ACCESS             = 0x000800;
        const DELETE_ON_CLOSE           = 0x001000;
        const OPEN_BY_FILE_ID           = 0x002000;
        const OPEN_FOR_BACKUP_INTENT    = 0x004000;
        const NO_COMPRESSION            = 0x008000;
        const OPEN_REPARSE_POINT        = 0x200000;
        const OPEN_NO_RECALL            = 0x400000;
    }
}

/// What to do when the target does or does not already exist.
#[repr(u32)]
#[derive(Debug, Eq, PartialEq, Hash, TryFromPrimitive, IntoPrimitive, Serialize, Deserialize, Clone, Copy, Default)]
pub enum SMBCreateDisposition {
    Supersede = 0x0,
    #[default]
    Open,
    Create,
    OpenIf,
    Overwrite,
    OverwriteIf,
}

bitflags! {
    #[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, Default, Serialize, Deserialize)]
    pub struct SMBFileAttributes: u32 {
        const READONLY = 0x00000001;
        const HIDDEN = 0x00000002;
        const SYSTEM = 0x00000004;
        const DIRECTORY = 0x00000010;
        const ARCHIVE = 0x00000020;
        const NORMAL = 0x00000080;
        const TEMPORARY = 0x00000100;
        const SPARSE_FILE = 0x00000200;
        const REPARSE_POINT = 0x00000400;
        const COMPRESSED = 0x00000800;
        const OFFLINE = 0x00001000;
        const NOT_CONTENT_INDEXED = 0x00002000;
        const ENCRYPTED = 0x00004000;
    }
}
