use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use serde::{Deserialize, Serialize};

use smb_core::error::SMBError;
use smb_core::logging::{debug, info, warn};
use smb_core::SMBResult;

use crate::server::open::SMBOpen;
use crate::server::resource::SMBFileStat;
use crate::server::session::SMBSession;
use crate::util::id_bitmap::SMBIdBitmap;
use crate::util::lock::SafeLock;

/// Registry entry keeping a durable open alive across disconnects.
#[derive(Debug)]
pub struct SMBDurableState {
    session: Weak<SMBSession>,
    session_id: u64,
    connection_id: Option<u64>,
    volatile_id: u64,
    stat: SMBFileStat,
    refcount: u32,
    open: Arc<SMBOpen>,
}

impl SMBDurableState {
    /// The owning session, if it still exists.
    pub fn session(&self) -> Option<Arc<SMBSession>> {
        self.session.upgrade()
    }

    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    pub fn volatile_id(&self) -> u64 {
        self.volatile_id
    }

    pub fn is_connected(&self) -> bool {
        self.connection_id.is_some()
    }

    pub fn stat(&self) -> &SMBFileStat {
        &self.stat
    }

    pub fn refcount(&self) -> u32 {
        self.refcount
    }

    pub fn open(&self) -> &Arc<SMBOpen> {
        &self.open
    }

    fn snapshot(&self, persistent_id: u64) -> SMBDurableHandle {
        SMBDurableHandle {
            persistent_id,
            session_id: self.session_id,
            connection_id: self.connection_id,
            volatile_id: self.volatile_id,
            stat: self.stat.clone(),
            refcount: self.refcount,
        }
    }
}

/// Copy of a registry entry handed to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SMBDurableHandle {
    pub persistent_id: u64,
    pub session_id: u64,
    /// `None` while the handle waits for a reconnect.
    pub connection_id: Option<u64>,
    pub volatile_id: u64,
    pub stat: SMBFileStat,
    pub refcount: u32,
}

#[derive(Debug)]
struct SMBDurableTable {
    ids: SMBIdBitmap,
    states: HashMap<u64, SMBDurableState>,
}

/// Server-wide durable handle registry.
///
/// Every operation runs under one lock. Operations that touch a session's
/// fid table take that table's lock while holding the registry lock, never
/// the other way round.
#[derive(Debug)]
pub struct SMBDurableRegistry {
    inner: Mutex<SMBDurableTable>,
}

impl SMBDurableRegistry {
    pub fn new(max_handles: usize) -> Self {
        Self {
            inner: Mutex::new(SMBDurableTable {
                ids: SMBIdBitmap::new(1, 64, max_handles),
                states: HashMap::new(),
            }),
        }
    }

    /// Makes the open at `volatile_id` durable and returns its persistent id.
    /// Registering an already durable open takes another reference.
    pub fn register(&self, session: &Arc<SMBSession>, volatile_id: u64) -> SMBResult<u64> {
        let mut table = self.inner.lock_safe()?;
        let open = session.lookup_open(volatile_id)?;
        if let Some(persistent_id) = open.persistent_id() {
            if let Some(state) = table.states.get_mut(&persistent_id) {
                state.refcount += 1;
                debug!(persistent_id, refcount = state.refcount, "durable handle referenced again");
                return Ok(persistent_id);
            }
        }
        let stat = open.stat()?;
        let persistent_id = table.ids.allocate()? as u64;
        open.mark_durable(persistent_id);
        table.states.insert(persistent_id, SMBDurableState {
            session: Arc::downgrade(session),
            session_id: session.session_id(),
            connection_id: Some(session.connection_id()),
            volatile_id,
            stat,
            refcount: 1,
            open,
        });
        info!(persistent_id, fid = volatile_id, session = session.session_id(), "registered durable handle");
        Ok(persistent_id)
    }

    pub fn lookup(&self, persistent_id: u64) -> SMBResult<SMBDurableHandle> {
        let table = self.inner.lock_safe()?;
        table.states.get(&persistent_id)
            .map(|state| state.snapshot(persistent_id))
            .ok_or_else(|| SMBError::not_found("durable handle", persistent_id))
    }

    pub fn contains(&self, persistent_id: u64) -> SMBResult<bool> {
        Ok(self.inner.lock_safe()?.states.contains_key(&persistent_id))
    }

    /// Binds a disconnected durable handle to `session` under a fresh
    /// volatile id. Any slot the previous session still has for it is
    /// cleared in the same critical section.
    ///
    /// Handles that are unknown, expired, or still owned by a live
    /// connection are `NotFound`.
    pub fn reassociate(&self, persistent_id: u64, session: &Arc<SMBSession>) -> SMBResult<u64> {
        let mut table = self.inner.lock_safe()?;
        let Some(state) = table.states.get_mut(&persistent_id).filter(|state| !state.is_connected()) else {
            debug!(persistent_id, "no disconnected durable handle to reassociate");
            return Err(SMBError::not_found("durable handle", persistent_id));
        };
        let volatile_id = session.fid_table().reserve()?;
        if let Err(e) = Self::move_open(state, session, volatile_id) {
            warn!(persistent_id, error = %e, "reassociation failed");
            session.fid_table().cancel_reservation(volatile_id)?;
            return Err(e);
        }
        state.open.reassign(volatile_id, session.session_id());
        state.session = Arc::downgrade(session);
        state.session_id = session.session_id();
        state.connection_id = Some(session.connection_id());
        state.volatile_id = volatile_id;
        info!(persistent_id, fid = volatile_id, session = session.session_id(), "reassociated durable handle");
        Ok(volatile_id)
    }

    fn move_open(state: &SMBDurableState, session: &SMBSession, volatile_id: u64) -> SMBResult<()> {
        if let Some(previous) = state.session.upgrade() {
            previous.fid_table().release_if_bound(state.volatile_id, &state.open)?;
        }
        session.fid_table().insert(volatile_id, state.open.clone())
    }

    /// Drops one reference. The entry is removed and returned once the
    /// last reference is gone; the caller then owns closing the open.
    pub fn close(&self, persistent_id: u64) -> SMBResult<Option<SMBDurableState>> {
        let mut table = self.inner.lock_safe()?;
        let Some(state) = table.states.get_mut(&persistent_id) else {
            return Err(SMBError::not_found("durable handle", persistent_id));
        };
        state.refcount = state.refcount.saturating_sub(1);
        if state.refcount > 0 {
            debug!(persistent_id, refcount = state.refcount, "durable handle reference dropped");
            return Ok(None);
        }
        Ok(Self::remove_locked(&mut table, persistent_id))
    }

    /// Removes an entry regardless of its reference count.
    pub fn remove(&self, persistent_id: u64) -> SMBResult<Option<SMBDurableState>> {
        let mut table = self.inner.lock_safe()?;
        Ok(Self::remove_locked(&mut table, persistent_id))
    }

    /// Detaches every durable handle owned by `connection_id`. The opens and
    /// their descriptors stay alive for a later reassociation; the returned
    /// persistent ids are those retained.
    pub fn disconnect(&self, connection_id: u64) -> SMBResult<Vec<u64>> {
        let mut table = self.inner.lock_safe()?;
        let mut retained = Vec::new();
        for (persistent_id, state) in table.states.iter_mut() {
            if state.connection_id != Some(connection_id) {
                continue;
            }
            match state.open.stat() {
                Ok(stat) => state.stat = stat,
                Err(e) => warn!(persistent_id, error = %e, "keeping stale durable snapshot"),
            }
            state.connection_id = None;
            retained.push(*persistent_id);
        }
        retained.sort_unstable();
        debug!(connection = connection_id, retained = retained.len(), "durable handles disconnected");
        Ok(retained)
    }

    /// Removes a disconnected handle whose reconnect window has passed.
    pub fn expire(&self, persistent_id: u64) -> SMBResult<SMBDurableState> {
        let mut table = self.inner.lock_safe()?;
        match table.states.get(&persistent_id) {
            None => return Err(SMBError::not_found("durable handle", persistent_id)),
            Some(state) if state.is_connected() => {
                return Err(SMBError::precondition_failed(format!("Durable handle {} is still connected", persistent_id)));
            }
            Some(_) => {}
        }
        info!(persistent_id, "durable handle expired");
        Self::remove_locked(&mut table, persistent_id)
            .ok_or_else(|| SMBError::not_found("durable handle", persistent_id))
    }

    /// Refreshes the status snapshot of every handle owned by `session_id`,
    /// returning how many were refreshed. Handles whose stat fails keep
    /// their previous snapshot.
    pub fn update_stat_snapshots(&self, session_id: u64) -> SMBResult<usize> {
        let mut table = self.inner.lock_safe()?;
        let mut updated = 0;
        for (persistent_id, state) in table.states.iter_mut().filter(|(_, state)| state.session_id == session_id) {
            match state.open.stat() {
                Ok(stat) => {
                    state.stat = stat;
                    updated += 1;
                }
                Err(e) => warn!(persistent_id, error = %e, "keeping stale durable snapshot"),
            }
        }
        Ok(updated)
    }

    pub fn len(&self) -> SMBResult<usize> {
        Ok(self.inner.lock_safe()?.states.len())
    }

    pub fn is_empty(&self) -> SMBResult<bool> {
        Ok(self.len()? == 0)
    }

    pub(crate) fn drain(&self) -> SMBResult<Vec<SMBDurableState>> {
        let mut table = self.inner.lock_safe()?;
        let persistent_ids: Vec<u64> = table.states.keys().copied().collect();
        Ok(persistent_ids.into_iter()
            .filter_map(|persistent_id| Self::remove_locked(&mut table, persistent_id))
            .collect())
    }

    fn remove_locked(table: &mut SMBDurableTable, persistent_id: u64) -> Option<SMBDurableState> {
        let state = table.states.remove(&persistent_id)?;
        table.ids.release(persistent_id as usize);
        state.open.clear_durable();
        debug!(persistent_id, "durable handle removed");
        Some(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::filetime::FileTime;
    use crate::server::config::SMBServerConfig;
    use crate::server::open::SMBOpenRequestBuilder;
    use crate::server::resource::{SMBObjectId, SMBResourceHandle};

    #[derive(Debug)]
    struct StubHandle;

    impl SMBResourceHandle for StubHandle {
        fn stat(&self) -> SMBResult<SMBFileStat> {
            Ok(SMBFileStat {
                object_id: SMBObjectId::new(3, 9),
                size: 12,
                is_directory: false,
                mode: 0,
                modified: FileTime::default(),
            })
        }

        fn close(self: Box<Self>) -> SMBResult<()> {
            Ok(())
        }
    }

    fn session(session_id: u64, connection_id: u64) -> Arc<SMBSession> {
        Arc::new(SMBSession::new(session_id, connection_id, &SMBServerConfig::default()))
    }

    fn open_in(session: &Arc<SMBSession>) -> u64 {
        let id = session.fid_table().reserve().unwrap();
        let request = SMBOpenRequestBuilder::default()
            .tree_id(1)
            .handle(Box::new(StubHandle))
            .build()
            .unwrap();
        let open = SMBOpen::from_request(id, session.session_id(), request).unwrap();
        session.fid_table().insert(id, Arc::new(open)).unwrap();
        id
    }

    #[test]
    fn register_links_the_open() {
        let registry = SMBDurableRegistry::new(100);
        let session = session(1, 1);
        let fid = open_in(&session);
        let persistent_id = registry.register(&session, fid).unwrap();
        let open = session.lookup_open(fid).unwrap();
        assert!(open.is_durable());
        assert_eq!(open.persistent_id(), Some(persistent_id));
        let handle = registry.lookup(persistent_id).unwrap();
        assert_eq!(handle.volatile_id, fid);
        assert_eq!(handle.connection_id, Some(1));
        assert_eq!(handle.stat.size, 12);
    }

    #[test]
    fn repeated_registration_counts_references() {
        let registry = SMBDurableRegistry::new(100);
        let session = session(1, 1);
        let fid = open_in(&session);
        let first = registry.register(&session, fid).unwrap();
        assert_eq!(registry.register(&session, fid).unwrap(), first);
        assert_eq!(registry.lookup(first).unwrap().refcount, 2);
        assert!(registry.close(first).unwrap().is_none());
        let state = registry.close(first).unwrap().unwrap();
        assert_eq!(state.refcount(), 0);
        assert!(!state.open().is_durable());
        assert!(registry.lookup(first).is_err());
    }

    #[test]
    fn reassociation_needs_a_disconnect() {
        let registry = SMBDurableRegistry::new(100);
        let old = session(1, 1);
        let fid = open_in(&old);
        let persistent_id = registry.register(&old, fid).unwrap();
        let new = session(2, 2);
        assert!(matches!(registry.reassociate(persistent_id, &new), Err(SMBError::NotFound(_))));

        assert_eq!(registry.disconnect(1).unwrap(), vec![persistent_id]);
        let new_fid = registry.reassociate(persistent_id, &new).unwrap();
        assert!(old.lookup_open(fid).is_err());
        let open = new.lookup_open(new_fid).unwrap();
        assert_eq!(open.persistent_id(), Some(persistent_id));
        assert_eq!(open.session_id(), 2);
        assert_eq!(registry.lookup(persistent_id).unwrap().connection_id, Some(2));
        assert!(registry.reassociate(persistent_id, &session(3, 3)).is_err());
    }

    #[test]
    fn failed_reassociation_returns_the_reserved_fid() {
        let registry = SMBDurableRegistry::new(100);
        let old = session(1, 1);
        let fid = open_in(&old);
        let persistent_id = registry.register(&old, fid).unwrap();
        registry.disconnect(1).unwrap();
        old.fid_table().poison();

        let new = session(2, 2);
        assert!(matches!(registry.reassociate(persistent_id, &new), Err(SMBError::ServerError(_))));
        assert!(new.fid_table().is_empty().unwrap());
        assert_eq!(registry.lookup(persistent_id).unwrap().connection_id, None);

        drop(old);
        assert_eq!(registry.reassociate(persistent_id, &new).unwrap(), 1);
    }

    #[test]
    fn expire_only_touches_disconnected_handles() {
        let registry = SMBDurableRegistry::new(100);
        let session = session(1, 1);
        let fid = open_in(&session);
        let persistent_id = registry.register(&session, fid).unwrap();
        assert!(matches!(registry.expire(persistent_id), Err(SMBError::PreconditionFailed(_))));
        registry.disconnect(1).unwrap();
        let state = registry.expire(persistent_id).unwrap();
        assert_eq!(state.volatile_id(), fid);
        assert!(registry.is_empty().unwrap());
        assert!(matches!(registry.expire(persistent_id), Err(SMBError::NotFound(_))));
    }

    #[test]
    fn snapshots_refresh_per_session() {
        let registry = SMBDurableRegistry::new(100);
        let first = session(1, 1);
        let second = session(2, 1);
        let a = open_in(&first);
        let b = open_in(&second);
        registry.register(&first, a).unwrap();
        registry.register(&second, b).unwrap();
        assert_eq!(registry.update_stat_snapshots(1).unwrap(), 1);
        assert_eq!(registry.update_stat_snapshots(9).unwrap(), 0);
    }

    #[test]
    fn disconnect_ignores_other_connections() {
        let registry = SMBDurableRegistry::new(100);
        let session = session(1, 5);
        let fid = open_in(&session);
        registry.register(&session, fid).unwrap();
        assert!(registry.disconnect(6).unwrap().is_empty());
    }
}
