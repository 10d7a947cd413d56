#![allow(dead_code)]

use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use smb_connection::protocol::access::{SMBAccessMask, SMBShareAccess};
use smb_connection::protocol::filetime::FileTime;
use smb_connection::server::{SMBFileStat, SMBObjectId, SMBOpenRequestBuilder, SMBResourceHandle, SMBServerConfig, SMBServerConfigBuilder};
use smb_core::error::SMBError;
use smb_core::SMBResult;

/// Descriptor stand-in that counts how often it was closed. Its `stat`
/// can be made to fail after the open went through.
#[derive(Debug, Clone)]
pub struct TestHandle {
    pub object_id: SMBObjectId,
    pub closed: Arc<AtomicUsize>,
    pub stat_fails: Arc<AtomicBool>,
}

impl TestHandle {
    pub fn new(inode: u64) -> Self {
        Self {
            object_id: SMBObjectId::new(1, inode),
            closed: Arc::new(AtomicUsize::new(0)),
            stat_fails: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn fail_stat(&self) {
        self.stat_fails.store(true, Ordering::SeqCst);
    }

    pub fn close_count(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

impl SMBResourceHandle for TestHandle {
    fn stat(&self) -> SMBResult<SMBFileStat> {
        if self.stat_fails.load(Ordering::SeqCst) {
            return Err(SMBError::io_error(io::Error::other("stale file handle")));
        }
        Ok(SMBFileStat {
            object_id: self.object_id,
            size: 4096,
            is_directory: false,
            mode: 0o644,
            modified: FileTime::from_raw(132_000_000_000_000_000),
        })
    }

    fn close(self: Box<Self>) -> SMBResult<()> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn test_config() -> SMBServerConfig {
    SMBServerConfigBuilder::default()
        .small_buffer_size(64)
        .max_buffer_size(256)
        .max_io_size(1024)
        .header_size(8)
        .max_oversized_buffers(1)
        .build()
        .unwrap()
}

pub fn request(handle: &TestHandle, access: SMBAccessMask, share: SMBShareAccess) -> SMBOpenRequestBuilder {
    SMBOpenRequestBuilder::default()
        .tree_id(1)
        .handle(Box::new(handle.clone()))
        .desired_access(access)
        .share_access(share)
}
