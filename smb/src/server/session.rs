use std::sync::Arc;

use smb_core::SMBResult;

use crate::protocol::filetime::FileTime;
use crate::server::config::SMBServerConfig;
use crate::server::fid_table::SMBFidTable;
use crate::server::open::SMBOpen;

/// An authenticated session and the opens it owns.
#[derive(Debug)]
pub struct SMBSession {
    session_id: u64,
    connection_id: u64,
    creation_time: FileTime,
    fid_table: SMBFidTable,
}

impl SMBSession {
    pub fn new(session_id: u64, connection_id: u64, config: &SMBServerConfig) -> Self {
        Self {
            session_id,
            connection_id,
            creation_time: FileTime::now(),
            fid_table: SMBFidTable::new(config.initial_fid_capacity, config.max_fids),
        }
    }

    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    pub fn connection_id(&self) -> u64 {
        self.connection_id
    }

    pub fn creation_time(&self) -> FileTime {
        self.creation_time
    }

    pub fn fid_table(&self) -> &SMBFidTable {
        &self.fid_table
    }

    pub fn lookup_open(&self, volatile_id: u64) -> SMBResult<Arc<SMBOpen>> {
        self.fid_table.lookup(volatile_id)
    }
}
