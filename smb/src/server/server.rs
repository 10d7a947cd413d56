use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use smb_core::error::SMBError;
use smb_core::logging::{debug, info, warn};
use smb_core::SMBResult;

use crate::server::buffer::SMBBufferPools;
use crate::server::config::SMBServerConfig;
use crate::server::connection::SMBConnection;
use crate::server::durable::{SMBDurableRegistry, SMBDurableState};
use crate::server::open::{SMBNotifyRegistration, SMBOpen, SMBOpenRequest};
use crate::server::session::SMBSession;
use crate::server::share_mode::SMBOpenIndex;
use crate::util::lock::SafeRwLock;

/// Server-wide state shared by every connection: buffer pools, the open
/// index used for share-mode arbitration, the durable handle registry and
/// the session table.
///
/// Created at startup and torn down with [`SMBServer::shutdown`]; nothing
/// here is global.
#[derive(Debug)]
pub struct SMBServer {
    config: SMBServerConfig,
    pools: Arc<SMBBufferPools>,
    open_index: SMBOpenIndex,
    durable: Option<SMBDurableRegistry>,
    sessions: RwLock<HashMap<u64, Arc<SMBSession>>>,
    next_connection_id: AtomicU64,
    next_session_id: AtomicU64,
}

impl SMBServer {
    pub fn new(config: SMBServerConfig) -> Self {
        let durable = config.durable_handles.then(|| SMBDurableRegistry::new(config.max_durable_handles));
        Self {
            pools: Arc::new(SMBBufferPools::from_config(&config)),
            open_index: SMBOpenIndex::new(),
            durable,
            sessions: RwLock::new(HashMap::new()),
            next_connection_id: AtomicU64::new(1),
            next_session_id: AtomicU64::new(1),
            config,
        }
    }

    pub fn config(&self) -> &SMBServerConfig {
        &self.config
    }

    pub fn pools(&self) -> &Arc<SMBBufferPools> {
        &self.pools
    }

    pub fn open_index(&self) -> &SMBOpenIndex {
        &self.open_index
    }

    /// The durable registry, `None` when durable handles are disabled.
    pub fn durable_registry(&self) -> Option<&SMBDurableRegistry> {
        self.durable.as_ref()
    }

    /// Sets up the per-connection state for a new transport connection.
    pub fn accept(&self, client_name: impl Into<String>) -> SMBResult<SMBConnection> {
        let connection_id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        let connection = SMBConnection::new(connection_id, client_name, self.pools.clone(), &self.config)?;
        info!(connection = connection_id, client = connection.client_name(), "accepted connection");
        Ok(connection)
    }

    pub fn create_session(&self, connection: &SMBConnection) -> SMBResult<Arc<SMBSession>> {
        let session_id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        let session = Arc::new(SMBSession::new(session_id, connection.connection_id(), &self.config));
        self.sessions.write_safe()?.insert(session_id, session.clone());
        debug!(session = session_id, connection = connection.connection_id(), "created session");
        Ok(session)
    }

    pub fn lookup_session(&self, session_id: u64) -> SMBResult<Arc<SMBSession>> {
        self.sessions.read_safe()?
            .get(&session_id)
            .cloned()
            .ok_or_else(|| SMBError::not_found("session", session_id))
    }

    /// Looks up a session and checks it belongs to `connection`.
    pub fn lookup_session_on_connection(&self, connection: &SMBConnection, session_id: u64) -> SMBResult<Arc<SMBSession>> {
        let session = self.lookup_session(session_id)?;
        if session.connection_id() != connection.connection_id() {
            return Err(SMBError::not_found("session", session_id));
        }
        Ok(session)
    }

    /// Opens a handle for `session`: reserves a volatile id, passes share-mode
    /// arbitration, publishes the open, and registers it as durable when asked.
    ///
    /// On failure nothing stays behind: the id returns to the table and the
    /// descriptor is closed. A durable request the registry refuses fails the
    /// whole open with the registry's error; with durable handles disabled
    /// the open simply stays non-durable.
    pub fn open(&self, session: &Arc<SMBSession>, request: SMBOpenRequest) -> SMBResult<u64> {
        let durable = request.is_durable();
        let fid_table = session.fid_table();
        let volatile_id = fid_table.reserve()?;
        let open = match SMBOpen::from_request(volatile_id, session.session_id(), request) {
            Ok(open) => Arc::new(open),
            Err(e) => {
                fid_table.cancel_reservation(volatile_id)?;
                return Err(e);
            }
        };
        if let Err(e) = self.open_index.check_and_insert(open.clone()) {
            fid_table.cancel_reservation(volatile_id)?;
            open.close()?;
            return Err(e);
        }
        if let Err(e) = fid_table.insert(volatile_id, open.clone()) {
            self.open_index.remove(&open)?;
            open.close()?;
            return Err(e);
        }
        debug!(
            fid = volatile_id,
            session = session.session_id(),
            tree = open.tree_id(),
            access = open.desired_access().bits(),
            share = open.share_access().bits(),
            "opened handle"
        );
        if durable && self.durable.is_some() {
            if let Err(e) = self.register_durable(session, volatile_id) {
                warn!(fid = volatile_id, error = %e, "durable registration refused");
                let undone = fid_table.release(volatile_id).and_then(|open| self.finish_open(&open));
                if let Err(cleanup) = undone {
                    warn!(fid = volatile_id, error = %cleanup, "failed to undo open");
                }
                return Err(e);
            }
        }
        Ok(volatile_id)
    }

    /// Closes one handle, returning the change notifications it still had pending.
    pub fn close(&self, session: &SMBSession, volatile_id: u64) -> SMBResult<Vec<SMBNotifyRegistration>> {
        let open = session.fid_table().release(volatile_id)?;
        self.finish_open(&open)
    }

    /// Closes every handle opened through one tree connection.
    pub fn close_tree(&self, session: &SMBSession, tree_id: u32) -> SMBResult<Vec<SMBNotifyRegistration>> {
        let opens = session.fid_table().release_tree(tree_id)?;
        debug!(session = session.session_id(), tree = tree_id, count = opens.len(), "closing tree");
        self.finish_opens(opens)
    }

    /// Closes every handle of a session, durable ones included.
    pub fn close_all(&self, session: &SMBSession) -> SMBResult<Vec<SMBNotifyRegistration>> {
        let opens = session.fid_table().drain()?;
        debug!(session = session.session_id(), count = opens.len(), "closing all handles");
        self.finish_opens(opens)
    }

    /// Ends a session explicitly.
    pub fn logoff(&self, session_id: u64) -> SMBResult<Vec<SMBNotifyRegistration>> {
        let session = self.sessions.write_safe()?
            .remove(&session_id)
            .ok_or_else(|| SMBError::not_found("session", session_id))?;
        info!(session = session_id, "session logged off");
        self.close_all(&session)
    }

    pub fn register_durable(&self, session: &Arc<SMBSession>, volatile_id: u64) -> SMBResult<u64> {
        self.registry()?.register(session, volatile_id)
    }

    /// Hands a disconnected durable handle to `session`, returning its new volatile id.
    pub fn reassociate(&self, persistent_id: u64, session: &Arc<SMBSession>) -> SMBResult<u64> {
        match &self.durable {
            Some(registry) => registry.reassociate(persistent_id, session),
            None => Err(SMBError::not_found("durable handle", persistent_id)),
        }
    }

    /// Drops one durable reference, closing the open with the last one.
    pub fn close_durable(&self, persistent_id: u64) -> SMBResult<()> {
        if let Some(state) = self.registry()?.close(persistent_id)? {
            self.finish_durable(state)?;
        }
        Ok(())
    }

    /// Tears down a lost connection. Its sessions go away and their handles
    /// are closed, except durable ones, which wait in the registry for a
    /// reconnect. Returns the persistent ids retained.
    ///
    /// Every step runs even when an earlier one fails; the first error is
    /// reported once the teardown is complete.
    pub fn disconnect(&self, connection_id: u64) -> SMBResult<Vec<u64>> {
        let sessions: Vec<Arc<SMBSession>> = {
            let mut sessions = self.sessions.write_safe()?;
            let ids: Vec<u64> = sessions.values()
                .filter(|session| session.connection_id() == connection_id)
                .map(|session| session.session_id())
                .collect();
            ids.iter().filter_map(|id| sessions.remove(id)).collect()
        };
        let mut first_error = None;
        let retained = match self.durable.as_ref().map(|registry| registry.disconnect(connection_id)) {
            Some(Ok(retained)) => retained,
            Some(Err(e)) => {
                warn!(connection = connection_id, error = %e, "durable handles not retained");
                first_error.get_or_insert(e);
                Vec::new()
            }
            None => Vec::new(),
        };
        let mut closing = Vec::new();
        for session in &sessions {
            match session.fid_table().drain() {
                Ok(opens) => closing.extend(opens.into_iter().filter(|open| {
                    !open.persistent_id().is_some_and(|persistent_id| retained.contains(&persistent_id))
                })),
                Err(e) => {
                    warn!(session = session.session_id(), error = %e, "failed to drain fid table");
                    first_error.get_or_insert(e);
                }
            }
        }
        info!(connection = connection_id, sessions = sessions.len(), closing = closing.len(), retained = retained.len(), "connection lost");
        if let Err(e) = self.finish_opens(closing) {
            first_error.get_or_insert(e);
        }
        first_error.map_or(Ok(retained), Err)
    }

    /// Called by the reconnect timer once a disconnected durable handle may
    /// no longer be reclaimed.
    pub fn reclaim_expire(&self, persistent_id: u64) -> SMBResult<()> {
        let state = self.registry()?.expire(persistent_id)?;
        self.finish_durable(state)?;
        Ok(())
    }

    /// Closes every session, open and durable handle.
    pub fn shutdown(&self) -> SMBResult<()> {
        let sessions: Vec<Arc<SMBSession>> = self.sessions.write_safe()?.drain().map(|(_, session)| session).collect();
        let mut first_error = None;
        for session in &sessions {
            if let Err(e) = self.close_all(session) {
                first_error.get_or_insert(e);
            }
        }
        if let Some(registry) = &self.durable {
            for state in registry.drain()? {
                if let Err(e) = self.finish_durable(state) {
                    first_error.get_or_insert(e);
                }
            }
        }
        for open in self.open_index.drain()? {
            if let Err(e) = open.close() {
                first_error.get_or_insert(e);
            }
        }
        info!(sessions = sessions.len(), "server shut down");
        first_error.map_or(Ok(()), Err)
    }

    fn registry(&self) -> SMBResult<&SMBDurableRegistry> {
        self.durable.as_ref()
            .ok_or_else(|| SMBError::precondition_failed("Durable handles are disabled"))
    }

    /// Unpublishes and closes one open. The descriptor is closed even when
    /// the index or the registry fails; their error is reported afterwards.
    fn finish_open(&self, open: &Arc<SMBOpen>) -> SMBResult<Vec<SMBNotifyRegistration>> {
        let unindexed = self.open_index.remove(open);
        let unregistered = match (open.persistent_id(), &self.durable) {
            (Some(persistent_id), Some(registry)) => registry.remove(persistent_id).map(|_| ()),
            _ => Ok(()),
        };
        let pending = open.close()?;
        unindexed?;
        unregistered?;
        Ok(pending)
    }

    fn finish_opens(&self, opens: Vec<Arc<SMBOpen>>) -> SMBResult<Vec<SMBNotifyRegistration>> {
        let mut pending = Vec::new();
        let mut first_error = None;
        for open in opens {
            match self.finish_open(&open) {
                Ok(notifications) => pending.extend(notifications),
                Err(e) => {
                    warn!(fid = open.volatile_id(), error = %e, "failed to close handle");
                    first_error.get_or_insert(e);
                }
            }
        }
        first_error.map_or(Ok(pending), Err)
    }

    fn finish_durable(&self, state: SMBDurableState) -> SMBResult<Vec<SMBNotifyRegistration>> {
        let open = state.open();
        if let Some(session) = state.session() {
            session.fid_table().release_if_bound(state.volatile_id(), open)?;
        }
        self.open_index.remove(open)?;
        open.close()
    }
}
