use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use smb_core::error::SMBError;
use smb_core::logging::{debug, warn};
use smb_core::SMBResult;

use crate::protocol::access::{SMBAccessMask, SMBShareAccess};
use crate::protocol::create::{SMBCreateDisposition, SMBCreateOptions, SMBFileAttributes};
use crate::protocol::filetime::FileTime;
use crate::server::resource::{SMBFileStat, SMBObjectId, SMBResourceHandle};
use crate::util::lock::SafeLock;

/// A byte-range lock held through an open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SMBByteRangeLock {
    pub start: u64,
    pub length: u64,
    pub exclusive: bool,
}

impl SMBByteRangeLock {
    pub fn overlaps(&self, other: &SMBByteRangeLock) -> bool {
        let end = self.start.saturating_add(self.length);
        let other_end = other.start.saturating_add(other.length);
        self.start < other_end && other.start < end
    }
}

/// A pending CHANGE_NOTIFY registered on a directory open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SMBNotifyRegistration {
    pub async_id: u64,
    pub completion_filter: u32,
    pub watch_tree: bool,
}

/// Where a directory enumeration resumes.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SMBDirectoryCursor {
    pub offset: u64,
    pub entries: Vec<String>,
}

#[derive(Debug, Default)]
struct SMBOpenState {
    locks: Vec<SMBByteRangeLock>,
    notifications: Vec<SMBNotifyRegistration>,
    directory_cursor: Option<SMBDirectoryCursor>,
}

/// Parameters of a CREATE that reached the connection core.
#[derive(Debug, Builder)]
#[builder(pattern = "owned")]
pub struct SMBOpenRequest {
    tree_id: u32,
    handle: Box<dyn SMBResourceHandle>,
    #[builder(setter(strip_option), default)]
    link_handle: Option<Box<dyn SMBResourceHandle>>,
    #[builder(default)]
    desired_access: SMBAccessMask,
    #[builder(default)]
    share_access: SMBShareAccess,
    #[builder(default)]
    create_options: SMBCreateOptions,
    #[builder(default)]
    create_disposition: SMBCreateDisposition,
    #[builder(default)]
    file_attributes: SMBFileAttributes,
    /// Alternate data stream name; `None` opens the main stream.
    #[builder(setter(into, strip_option), default)]
    stream_name: Option<String>,
    /// Open that only reads or writes attributes.
    #[builder(default)]
    attrib_only: bool,
    #[builder(setter(strip_option), default)]
    lease_key: Option<Uuid>,
    /// Register the open as durable once it is in the table.
    #[builder(default)]
    durable: bool,
}

impl SMBOpenRequest {
    pub fn is_durable(&self) -> bool {
        self.durable
    }
}

/// One open handle.
///
/// Owned by exactly one session's fid table while connected, and referenced
/// by the share-mode index for as long as it is open.
#[derive(Debug)]
pub struct SMBOpen {
    volatile_id: AtomicU64,
    persistent_id: AtomicU64,
    session_id: AtomicU64,
    tree_id: u32,
    object_id: SMBObjectId,
    handle: Mutex<Option<Box<dyn SMBResourceHandle>>>,
    link_handle: Mutex<Option<Box<dyn SMBResourceHandle>>>,
    desired_access: SMBAccessMask,
    share_access: SMBShareAccess,
    create_options: SMBCreateOptions,
    create_disposition: SMBCreateDisposition,
    file_attributes: SMBFileAttributes,
    create_time: FileTime,
    stream_name: Option<String>,
    attrib_only: bool,
    lease_key: Option<Uuid>,
    delete_on_close: AtomicBool,
    delete_pending: AtomicBool,
    durable: AtomicBool,
    state: Mutex<SMBOpenState>,
}

impl SMBOpen {
    /// Builds an open for `request` under an already reserved volatile id.
    pub fn from_request(volatile_id: u64, session_id: u64, request: SMBOpenRequest) -> SMBResult<Self> {
        let object_id = request.handle.object_id()?;
        Ok(Self {
            volatile_id: AtomicU64::new(volatile_id),
            persistent_id: AtomicU64::new(0),
            session_id: AtomicU64::new(session_id),
            tree_id: request.tree_id,
            object_id,
            handle: Mutex::new(Some(request.handle)),
            link_handle: Mutex::new(request.link_handle),
            desired_access: request.desired_access,
            share_access: request.share_access,
            create_options: request.create_options,
            create_disposition: request.create_disposition,
            file_attributes: request.file_attributes,
            create_time: FileTime::now(),
            stream_name: request.stream_name.filter(|name| !name.is_empty()),
            attrib_only: request.attrib_only,
            lease_key: request.lease_key,
            delete_on_close: AtomicBool::new(request.create_options.contains(SMBCreateOptions::DELETE_ON_CLOSE)),
            delete_pending: AtomicBool::new(false),
            durable: AtomicBool::new(false),
            state: Mutex::new(SMBOpenState::default()),
        })
    }

    pub fn volatile_id(&self) -> u64 {
        self.volatile_id.load(Ordering::Acquire)
    }

    /// Persistent id, set once the open is registered as durable.
    pub fn persistent_id(&self) -> Option<u64> {
        match self.persistent_id.load(Ordering::Acquire) {
            0 => None,
            id => Some(id),
        }
    }

    pub fn session_id(&self) -> u64 {
        self.session_id.load(Ordering::Acquire)
    }

    pub fn tree_id(&self) -> u32 {
        self.tree_id
    }

    pub fn object_id(&self) -> SMBObjectId {
        self.object_id
    }

    pub fn desired_access(&self) -> SMBAccessMask {
        self.desired_access
    }

    pub fn share_access(&self) -> SMBShareAccess {
        self.share_access
    }

    pub fn create_options(&self) -> SMBCreateOptions {
        self.create_options
    }

    pub fn create_disposition(&self) -> SMBCreateDisposition {
        self.create_disposition
    }

    pub fn file_attributes(&self) -> SMBFileAttributes {
        self.file_attributes
    }

    pub fn create_time(&self) -> FileTime {
        self.create_time
    }

    pub fn stream_name(&self) -> Option<&str> {
        self.stream_name.as_deref()
    }

    pub fn is_stream(&self) -> bool {
        self.stream_name.is_some()
    }

    pub fn is_attrib_only(&self) -> bool {
        self.attrib_only
    }

    pub fn is_directory(&self) -> bool {
        self.create_options.contains(SMBCreateOptions::DIRECTORY_FILE)
    }

    pub fn lease_key(&self) -> Option<Uuid> {
        self.lease_key
    }

    pub fn delete_on_close(&self) -> bool {
        self.delete_on_close.load(Ordering::Acquire)
    }

    pub fn set_delete_on_close(&self, delete_on_close: bool) {
        self.delete_on_close.store(delete_on_close, Ordering::Release);
    }

    pub fn is_delete_pending(&self) -> bool {
        self.delete_pending.load(Ordering::Acquire)
    }

    pub fn set_delete_pending(&self, delete_pending: bool) {
        self.delete_pending.store(delete_pending, Ordering::Release);
    }

    pub fn is_durable(&self) -> bool {
        self.durable.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> SMBResult<bool> {
        Ok(self.handle.lock_safe()?.is_none())
    }

    /// Status of the underlying object.
    pub fn stat(&self) -> SMBResult<SMBFileStat> {
        match self.handle.lock_safe()?.as_ref() {
            Some(handle) => handle.stat(),
            None => Err(SMBError::not_found("open", self.volatile_id())),
        }
    }

    pub(crate) fn mark_durable(&self, persistent_id: u64) {
        self.persistent_id.store(persistent_id, Ordering::Release);
        self.durable.store(true, Ordering::Release);
    }

    pub(crate) fn clear_durable(&self) {
        self.durable.store(false, Ordering::Release);
        self.persistent_id.store(0, Ordering::Release);
    }

    /// Moves the open to a new owner after a durable reconnect.
    pub(crate) fn reassign(&self, volatile_id: u64, session_id: u64) {
        self.volatile_id.store(volatile_id, Ordering::Release);
        self.session_id.store(session_id, Ordering::Release);
    }

    /// Records a byte-range lock. An exclusive range may not overlap any
    /// range this open already holds, and no range may overlap an exclusive one.
    pub fn add_lock(&self, lock: SMBByteRangeLock) -> SMBResult<()> {
        let mut state = self.state.lock_safe()?;
        let conflict = state.locks.iter()
            .any(|held| held.overlaps(&lock) && (held.exclusive || lock.exclusive));
        if conflict {
            return Err(SMBError::precondition_failed(format!("Range {}+{} is already locked", lock.start, lock.length)));
        }
        state.locks.push(lock);
        Ok(())
    }

    /// Drops the lock on exactly `start..start + length`, reporting whether one was held.
    pub fn remove_lock(&self, start: u64, length: u64) -> SMBResult<bool> {
        let mut state = self.state.lock_safe()?;
        let Some(position) = state.locks.iter().position(|held| held.start == start && held.length == length) else {
            return Ok(false);
        };
        state.locks.remove(position);
        Ok(true)
    }

    pub fn locks(&self) -> SMBResult<Vec<SMBByteRangeLock>> {
        Ok(self.state.lock_safe()?.locks.clone())
    }

    pub fn add_notification(&self, registration: SMBNotifyRegistration) -> SMBResult<()> {
        self.state.lock_safe()?.notifications.push(registration);
        Ok(())
    }

    pub fn remove_notification(&self, async_id: u64) -> SMBResult<Option<SMBNotifyRegistration>> {
        let mut state = self.state.lock_safe()?;
        let position = state.notifications.iter().position(|registration| registration.async_id == async_id);
        Ok(position.map(|position| state.notifications.remove(position)))
    }

    pub fn notifications(&self) -> SMBResult<Vec<SMBNotifyRegistration>> {
        Ok(self.state.lock_safe()?.notifications.clone())
    }

    pub fn directory_cursor(&self) -> SMBResult<Option<SMBDirectoryCursor>> {
        Ok(self.state.lock_safe()?.directory_cursor.clone())
    }

    pub fn set_directory_cursor(&self, cursor: Option<SMBDirectoryCursor>) -> SMBResult<()> {
        self.state.lock_safe()?.directory_cursor = cursor;
        Ok(())
    }

    /// Releases the descriptors, locks and enumeration state. Returns the
    /// change-notify registrations that were still pending so the caller can
    /// complete them. Closing twice is a no-op.
    pub fn close(&self) -> SMBResult<Vec<SMBNotifyRegistration>> {
        let handle = self.handle.lock_safe()?.take();
        let link_handle = self.link_handle.lock_safe()?.take();
        let pending = {
            let mut state = self.state.lock_safe()?;
            state.locks.clear();
            state.directory_cursor = None;
            std::mem::take(&mut state.notifications)
        };
        if let Some(link_handle) = link_handle {
            if let Err(e) = link_handle.close() {
                warn!(fid = self.volatile_id(), error = %e, "failed to close link descriptor");
            }
        }
        if let Some(handle) = handle {
            handle.close()?;
            debug!(fid = self.volatile_id(), pending = pending.len(), "closed open");
        }
        Ok(pending)
    }
}
