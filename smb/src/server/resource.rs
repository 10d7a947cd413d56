use std::fmt::Debug;

use serde::{Deserialize, Serialize};

use smb_core::error::SMBError;
use smb_core::SMBResult;

use crate::protocol::filetime::FileTime;

/// Identity of a filesystem object: device and inode.
///
/// Two opens refer to the same object exactly when their ids are equal,
/// whatever paths they were opened through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SMBObjectId {
    pub device: u64,
    pub inode: u64,
}

impl SMBObjectId {
    pub fn new(device: u64, inode: u64) -> Self {
        Self { device, inode }
    }
}

/// Status snapshot of an open object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SMBFileStat {
    pub object_id: SMBObjectId,
    pub size: u64,
    pub is_directory: bool,
    pub mode: u32,
    pub modified: FileTime,
}

/// An open descriptor supplied by the filesystem layer.
pub trait SMBResourceHandle: Debug + Send + Sync {
    fn stat(&self) -> SMBResult<SMBFileStat>;

    fn object_id(&self) -> SMBResult<SMBObjectId> {
        Ok(self.stat()?.object_id)
    }

    /// Releases the descriptor.
    fn close(self: Box<Self>) -> SMBResult<()>;
}

#[cfg(unix)]
impl SMBResourceHandle for std::fs::File {
    fn stat(&self) -> SMBResult<SMBFileStat> {
        use std::os::unix::fs::MetadataExt;

        let metadata = self.metadata().map_err(SMBError::io_error)?;
        Ok(SMBFileStat {
            object_id: SMBObjectId::new(metadata.dev(), metadata.ino()),
            size: metadata.len(),
            is_directory: metadata.is_dir(),
            mode: metadata.mode(),
            modified: metadata.modified().map(FileTime::from).unwrap_or_default(),
        })
    }

    fn close(self: Box<Self>) -> SMBResult<()> {
        drop(self);
        Ok(())
    }
}
