use std::collections::VecDeque;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use smb_core::error::SMBError;
use smb_core::logging::{debug, trace};
use smb_core::SMBResult;

use crate::protocol::command_code::{LegacySMBCommandCode, SMBCommandCode, SMBRequestCommand};
use crate::util::id_bitmap::SMBIdBitmap;
use crate::util::lock::SafeLock;

/// How a request is handled once received.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SMBRequestClass {
    Sync,
    /// Long-lived: answered later under an async id.
    Async,
    /// Cancel requests act on other work and are never queued.
    Cancel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SMBQueueKind {
    Sync,
    Async,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SMBAsyncStatus {
    Waiting,
    /// The open the work waits on was closed; it must be answered with
    /// STATUS_NOTIFY_CLEANUP.
    Closing,
}

/// A queued request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SMBWork {
    pub message_id: u64,
    pub command: SMBRequestCommand,
    pub async_id: Option<u64>,
    pub status: SMBAsyncStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SMBQueueOutcome {
    Queued { kind: SMBQueueKind, async_id: Option<u64> },
    NotQueued,
}

impl SMBRequestCommand {
    pub fn classify(&self) -> SMBRequestClass {
        match self {
            Self::Modern(_) if self.is(SMBCommandCode::Cancel) => SMBRequestClass::Cancel,
            Self::Modern(_) if self.is(SMBCommandCode::ChangeNotify) || self.is(SMBCommandCode::Lock) => SMBRequestClass::Async,
            Self::Modern(_) => SMBRequestClass::Sync,
            Self::Legacy(_) if self.is_legacy(LegacySMBCommandCode::NTCancel) => SMBRequestClass::Cancel,
            Self::Legacy(_) => SMBRequestClass::Sync,
        }
    }
}

#[derive(Debug)]
struct SMBRequestQueues {
    async_ids: SMBIdBitmap,
    sync_requests: VecDeque<SMBWork>,
    async_requests: VecDeque<SMBWork>,
}

impl SMBRequestQueues {
    fn queue_mut(&mut self, kind: SMBQueueKind) -> &mut VecDeque<SMBWork> {
        match kind {
            SMBQueueKind::Sync => &mut self.sync_requests,
            SMBQueueKind::Async => &mut self.async_requests,
        }
    }
}

/// Per-connection sync/async request queues and the async id pool.
#[derive(Debug)]
pub struct SMBRequestTracker {
    inner: Mutex<SMBRequestQueues>,
}

impl SMBRequestTracker {
    pub fn new(max_async_ids: usize) -> Self {
        Self {
            inner: Mutex::new(SMBRequestQueues {
                async_ids: SMBIdBitmap::new(1, 64, max_async_ids),
                sync_requests: VecDeque::new(),
                async_requests: VecDeque::new(),
            }),
        }
    }

    /// Allocates an async id.
    pub fn begin_async(&self) -> SMBResult<u64> {
        let mut queues = self.inner.lock_safe()?;
        Ok(queues.async_ids.allocate()? as u64)
    }

    /// Returns an async id to the pool.
    pub fn end_async(&self, async_id: u64) -> SMBResult<()> {
        let mut queues = self.inner.lock_safe()?;
        if !queues.async_ids.release(async_id as usize) {
            return Err(SMBError::not_found("async id", async_id));
        }
        Ok(())
    }

    /// Admits a request to the queue its command belongs to.
    pub fn queue(&self, message_id: u64, command: SMBRequestCommand) -> SMBResult<SMBQueueOutcome> {
        let mut queues = self.inner.lock_safe()?;
        let (kind, async_id) = match command.classify() {
            SMBRequestClass::Cancel => {
                trace!(message_id, "cancel request not queued");
                return Ok(SMBQueueOutcome::NotQueued);
            }
            SMBRequestClass::Sync => (SMBQueueKind::Sync, None),
            SMBRequestClass::Async => (SMBQueueKind::Async, Some(queues.async_ids.allocate()? as u64)),
        };
        queues.queue_mut(kind).push_back(SMBWork {
            message_id,
            command,
            async_id,
            status: SMBAsyncStatus::Waiting,
        });
        debug!(message_id, ?kind, ?async_id, "queued request");
        Ok(SMBQueueOutcome::Queued { kind, async_id })
    }

    /// Takes the oldest work from one queue. Async work keeps its async id
    /// until [`SMBRequestTracker::finish`].
    pub fn dequeue_next(&self, kind: SMBQueueKind) -> SMBResult<Option<SMBWork>> {
        Ok(self.inner.lock_safe()?.queue_mut(kind).pop_front())
    }

    /// Completes work, returning its async id to the pool.
    pub fn finish(&self, work: &SMBWork) -> SMBResult<()> {
        match work.async_id {
            Some(async_id) => self.end_async(async_id),
            None => Ok(()),
        }
    }

    /// Removes queued work by message id, releasing its async id.
    pub fn remove(&self, message_id: u64) -> SMBResult<Option<SMBWork>> {
        let mut queues = self.inner.lock_safe()?;
        for kind in [SMBQueueKind::Sync, SMBQueueKind::Async] {
            let queue = queues.queue_mut(kind);
            if let Some(position) = queue.iter().position(|work| work.message_id == message_id) {
                let work = queue.remove(position);
                if let Some(async_id) = work.as_ref().and_then(|work| work.async_id) {
                    queues.async_ids.release(async_id as usize);
                }
                return Ok(work);
            }
        }
        Ok(None)
    }

    /// Message id of the queued work holding `async_id`.
    pub fn find_async(&self, async_id: u64) -> SMBResult<Option<u64>> {
        let queues = self.inner.lock_safe()?;
        Ok(queues.async_requests.iter()
            .find(|work| work.async_id == Some(async_id))
            .map(|work| work.message_id))
    }

    /// Queue currently holding `message_id`.
    pub fn find_message(&self, message_id: u64) -> SMBResult<Option<SMBQueueKind>> {
        let queues = self.inner.lock_safe()?;
        if queues.sync_requests.iter().any(|work| work.message_id == message_id) {
            return Ok(Some(SMBQueueKind::Sync));
        }
        if queues.async_requests.iter().any(|work| work.message_id == message_id) {
            return Ok(Some(SMBQueueKind::Async));
        }
        Ok(None)
    }

    /// Marks queued async work as closing, reporting whether it was found.
    pub fn close_async(&self, async_id: u64) -> SMBResult<bool> {
        let mut queues = self.inner.lock_safe()?;
        match queues.async_requests.iter_mut().find(|work| work.async_id == Some(async_id)) {
            Some(work) => {
                work.status = SMBAsyncStatus::Closing;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn len(&self, kind: SMBQueueKind) -> SMBResult<usize> {
        Ok(self.inner.lock_safe()?.queue_mut(kind).len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_by_command() {
        assert_eq!(SMBRequestCommand::from(SMBCommandCode::Cancel).classify(), SMBRequestClass::Cancel);
        assert_eq!(SMBRequestCommand::from(SMBCommandCode::ChangeNotify).classify(), SMBRequestClass::Async);
        assert_eq!(SMBRequestCommand::from(SMBCommandCode::Lock).classify(), SMBRequestClass::Async);
        assert_eq!(SMBRequestCommand::from(SMBCommandCode::Read).classify(), SMBRequestClass::Sync);
        assert_eq!(SMBRequestCommand::Modern(0x99).classify(), SMBRequestClass::Sync);
        assert_eq!(SMBRequestCommand::from(LegacySMBCommandCode::NTCancel).classify(), SMBRequestClass::Cancel);
        assert_eq!(SMBRequestCommand::from(LegacySMBCommandCode::LockingANDX).classify(), SMBRequestClass::Sync);
    }

    #[test]
    fn cancels_are_never_queued() {
        let tracker = SMBRequestTracker::new(100);
        assert_eq!(tracker.queue(1, SMBCommandCode::Cancel.into()).unwrap(), SMBQueueOutcome::NotQueued);
        assert_eq!(tracker.queue(2, LegacySMBCommandCode::NTCancel.into()).unwrap(), SMBQueueOutcome::NotQueued);
        assert_eq!(tracker.len(SMBQueueKind::Sync).unwrap(), 0);
        assert_eq!(tracker.len(SMBQueueKind::Async).unwrap(), 0);
    }

    #[test]
    fn async_work_gets_recycled_ids() {
        let tracker = SMBRequestTracker::new(100);
        let outcome = tracker.queue(10, SMBCommandCode::ChangeNotify.into()).unwrap();
        assert_eq!(outcome, SMBQueueOutcome::Queued { kind: SMBQueueKind::Async, async_id: Some(1) });
        tracker.queue(11, SMBCommandCode::Lock.into()).unwrap();
        assert_eq!(tracker.find_async(2).unwrap(), Some(11));

        let work = tracker.dequeue_next(SMBQueueKind::Async).unwrap().unwrap();
        assert_eq!(work.message_id, 10);
        assert_eq!(work.status, SMBAsyncStatus::Waiting);
        tracker.finish(&work).unwrap();
        let outcome = tracker.queue(12, SMBCommandCode::ChangeNotify.into()).unwrap();
        assert_eq!(outcome, SMBQueueOutcome::Queued { kind: SMBQueueKind::Async, async_id: Some(1) });
    }

    #[test]
    fn sync_queue_is_fifo() {
        let tracker = SMBRequestTracker::new(100);
        tracker.queue(1, SMBCommandCode::Read.into()).unwrap();
        tracker.queue(2, SMBRequestCommand::Legacy(0x2E)).unwrap();
        assert_eq!(tracker.find_message(2).unwrap(), Some(SMBQueueKind::Sync));
        assert_eq!(tracker.dequeue_next(SMBQueueKind::Sync).unwrap().unwrap().message_id, 1);
        assert_eq!(tracker.dequeue_next(SMBQueueKind::Sync).unwrap().unwrap().message_id, 2);
        assert!(tracker.dequeue_next(SMBQueueKind::Sync).unwrap().is_none());
    }

    #[test]
    fn remove_releases_the_async_id() {
        let tracker = SMBRequestTracker::new(100);
        tracker.queue(5, SMBCommandCode::Lock.into()).unwrap();
        assert!(tracker.close_async(1).unwrap());
        let work = tracker.remove(5).unwrap().unwrap();
        assert_eq!(work.status, SMBAsyncStatus::Closing);
        assert_eq!(tracker.find_message(5).unwrap(), None);
        assert_eq!(tracker.begin_async().unwrap(), 1);
        tracker.end_async(1).unwrap();
        assert!(tracker.end_async(1).is_err());
    }
}
