use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Access rights requested by an open.
    #[derive(Serialize, Deserialize, PartialEq, Eq, Hash, Debug, Clone, Copy, Default)]
    pub struct SMBAccessMask: u32 {
        const FILE_READ_DATA         = 0x00000001;
        const FILE_WRITE_DATA        = 0x00000002;
        const FILE_APPEND_DATA       = 0x00000004;
        const FILE_READ_EA           = 0x00000008;
        const FILE_WRITE_EA          = 0x00000010;
        const FILE_EXECUTE           = 0x00000020;
        const FILE_DELETE_CHILD      = 0x00000040;
        const FILE_READ_ATTRIBUTES   = 0x00000080;
        const FILE_WRITE_ATTRIBUTES  = 0x00000100;
        const DELETE                 = 0x00010000;
        const READ_CONTROL           = 0x00020000;
        const WRITE_DAC              = 0x00040000;
        const WRITE_OWNER            = 0x00080000;
        const SYNCHRONIZE            = 0x00100000;
        const ACCESS_SYSTEM_SECURITY = 0x01000000;
        const MAXIMUM_ALLOWED        = 0x02000000;
        const GENERIC_ALL            = 0x10000000;
        const GENERIC_EXECUTE        = 0x20000000;
        const GENERIC_WRITE          = 0x40000000;
        const GENERIC_READ           = 0x80000000;
    }
}

bitflags! {
    /// Sharing an open grants to opens that come after it.
    #[derive(Serialize, Deserialize, PartialEq, Eq, Hash, Debug, Clone, Copy, Default)]
    pub struct SMBShareAccess: u32 {
        const READ = 0x1;
        const WRITE = 0x2;
        const DELETE = 0x4;
    }
}

impl SMBAccessMask {
    const READ_CLASS: Self = Self::FILE_READ_DATA
        .union(Self::GENERIC_READ)
        .union(Self::GENERIC_ALL)
        .union(Self::MAXIMUM_ALLOWED);
    const WRITE_CLASS: Self = Self::FILE_WRITE_DATA
        .union(Self::GENERIC_WRITE)
        .union(Self::GENERIC_ALL)
        .union(Self::MAXIMUM_ALLOWED);
    const DELETE_CLASS: Self = Self::DELETE
        .union(Self::GENERIC_ALL)
        .union(Self::MAXIMUM_ALLOWED);

    /// Whether the mask asks for anything a share-read denial blocks.
    pub fn requests_read(&self) -> bool {
        self.intersects(Self::READ_CLASS)
    }

    pub fn requests_write(&self) -> bool {
        self.intersects(Self::WRITE_CLASS)
    }

    pub fn requests_delete(&self) -> bool {
        self.intersects(Self::DELETE_CLASS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generic_and_maximum_rights_fall_in_every_class() {
        for mask in [SMBAccessMask::GENERIC_ALL, SMBAccessMask::MAXIMUM_ALLOWED] {
            assert!(mask.requests_read());
            assert!(mask.requests_write());
            assert!(mask.requests_delete());
        }
    }

    #[test]
    fn specific_rights_fall_in_one_class() {
        assert!(SMBAccessMask::GENERIC_READ.requests_read());
        assert!(!SMBAccessMask::GENERIC_READ.requests_write());
        assert!(SMBAccessMask::FILE_WRITE_DATA.requests_write());
        assert!(!SMBAccessMask::FILE_WRITE_DATA.requests_delete());
        assert!(SMBAccessMask::DELETE.requests_delete());
        assert!(!SMBAccessMask::FILE_READ_ATTRIBUTES.requests_read());
        assert!(!SMBAccessMask::empty().requests_read());
    }

    #[test]
    fn unknown_bits_are_kept() {
        let mask = SMBAccessMask::from_bits_retain(0x0800_0001);
        assert!(mask.requests_read());
        assert_eq!(mask.bits(), 0x0800_0001);
    }
}
