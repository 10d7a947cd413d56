use std::sync::{Arc, Mutex};

use smb_core::error::SMBError;
use smb_core::logging::{debug, warn};
use smb_core::SMBResult;

use crate::server::open::SMBOpen;
use crate::util::id_bitmap::SMBIdBitmap;
use crate::util::lock::SafeLock;

/// Per-session table mapping volatile ids to opens.
///
/// Ids are handed out lowest-free first starting at 1. An id is either free,
/// reserved (allocated, nothing visible yet) or bound to exactly one open.
#[derive(Debug)]
pub struct SMBFidTable {
    inner: Mutex<SMBFidTableInner>,
}

#[derive(Debug)]
struct SMBFidTableInner {
    ids: SMBIdBitmap,
    slots: Vec<Option<Arc<SMBOpen>>>,
}

impl SMBFidTable {
    pub fn new(initial_capacity: usize, max_fids: usize) -> Self {
        let ids = SMBIdBitmap::new(1, initial_capacity.saturating_add(1), max_fids);
        let slots = std::iter::repeat_with(|| None).take(ids.capacity()).collect();
        Self { inner: Mutex::new(SMBFidTableInner { ids, slots }) }
    }

    /// Reserves the lowest free volatile id.
    pub fn reserve(&self) -> SMBResult<u64> {
        let mut inner = self.inner.lock_safe()?;
        let id = match inner.ids.allocate() {
            Ok(id) => id,
            Err(e) => {
                warn!(error = %e, in_use = inner.ids.in_use(), "volatile id allocation failed");
                return Err(e);
            }
        };
        let capacity = inner.ids.capacity();
        if inner.slots.len() < capacity {
            let additional = capacity - inner.slots.len();
            if inner.slots.try_reserve_exact(additional).is_err() {
                inner.ids.release(id);
                return Err(SMBError::out_of_memory(additional * size_of::<Option<Arc<SMBOpen>>>()));
            }
            inner.slots.resize_with(capacity, || None);
            debug!(capacity, "grew fid table");
        }
        Ok(id as u64)
    }

    /// Returns a reserved id that never received an open.
    pub fn cancel_reservation(&self, id: u64) -> SMBResult<()> {
        let mut inner = self.inner.lock_safe()?;
        let index = id as usize;
        if !inner.ids.is_set(index) || inner.slots[index].is_some() {
            return Err(SMBError::precondition_failed(format!("Fid {} is not a pending reservation", id)));
        }
        inner.ids.release(index);
        Ok(())
    }

    /// Binds an open to a reserved id.
    pub fn insert(&self, id: u64, open: Arc<SMBOpen>) -> SMBResult<()> {
        let mut inner = self.inner.lock_safe()?;
        let index = id as usize;
        if !inner.ids.is_set(index) {
            return Err(SMBError::precondition_failed(format!("Fid {} was not reserved", id)));
        }
        match &mut inner.slots[index] {
            Some(_) => Err(SMBError::precondition_failed(format!("Fid {} is already bound", id))),
            slot => {
                *slot = Some(open);
                Ok(())
            }
        }
    }

    pub fn lookup(&self, id: u64) -> SMBResult<Arc<SMBOpen>> {
        let inner = self.inner.lock_safe()?;
        inner.slots.get(id as usize)
            .and_then(Option::clone)
            .ok_or_else(|| SMBError::not_found("fid", id))
    }

    /// Unbinds and frees `id`, returning its open.
    pub fn release(&self, id: u64) -> SMBResult<Arc<SMBOpen>> {
        let mut inner = self.inner.lock_safe()?;
        let index = id as usize;
        let open = inner.slots.get_mut(index)
            .and_then(Option::take)
            .ok_or_else(|| SMBError::not_found("fid", id))?;
        inner.ids.release(index);
        Ok(open)
    }

    /// Like [`SMBFidTable::release`], but only if `id` still refers to `open`.
    pub(crate) fn release_if_bound(&self, id: u64, open: &Arc<SMBOpen>) -> SMBResult<bool> {
        let mut inner = self.inner.lock_safe()?;
        let index = id as usize;
        let bound = matches!(inner.slots.get(index), Some(Some(current)) if Arc::ptr_eq(current, open));
        if bound {
            inner.slots[index] = None;
            inner.ids.release(index);
        }
        Ok(bound)
    }

    /// Unbinds every open of one tree connection.
    pub fn release_tree(&self, tree_id: u32) -> SMBResult<Vec<Arc<SMBOpen>>> {
        let mut inner = self.inner.lock_safe()?;
        let ids: Vec<usize> = inner.ids.iter()
            .filter(|id| inner.slots[*id].as_ref().is_some_and(|open| open.tree_id() == tree_id))
            .collect();
        let mut released = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(open) = inner.slots[id].take() {
                released.push(open);
            }
            inner.ids.release(id);
        }
        Ok(released)
    }

    /// Unbinds every open and drops outstanding reservations.
    pub fn drain(&self) -> SMBResult<Vec<Arc<SMBOpen>>> {
        let mut inner = self.inner.lock_safe()?;
        let ids: Vec<usize> = inner.ids.iter().collect();
        let mut released = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(open) = inner.slots[id].take() {
                released.push(open);
            }
            inner.ids.release(id);
        }
        Ok(released)
    }

    /// Every bound open, lowest id first.
    pub fn opens(&self) -> SMBResult<Vec<Arc<SMBOpen>>> {
        let inner = self.inner.lock_safe()?;
        Ok(inner.ids.iter().filter_map(|id| inner.slots[id].clone()).collect())
    }

    /// Ids in use, reservations included.
    pub fn len(&self) -> SMBResult<usize> {
        Ok(self.inner.lock_safe()?.ids.in_use())
    }

    pub fn is_empty(&self) -> SMBResult<bool> {
        Ok(self.len()? == 0)
    }

    pub fn capacity(&self) -> SMBResult<usize> {
        Ok(self.inner.lock_safe()?.ids.capacity())
    }

    #[cfg(test)]
    pub(crate) fn poison(&self) {
        let _ = std::thread::scope(|scope| scope.spawn(|| {
            let _inner = self.inner.lock();
            panic!("fid table poisoned");
        }).join());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::filetime::FileTime;
    use crate::server::open::SMBOpenRequestBuilder;
    use crate::server::resource::{SMBFileStat, SMBObjectId, SMBResourceHandle};

    #[derive(Debug)]
    struct StubHandle;

    impl SMBResourceHandle for StubHandle {
        fn stat(&self) -> SMBResult<SMBFileStat> {
            Ok(SMBFileStat {
                object_id: SMBObjectId::new(1, 1),
                size: 0,
                is_directory: false,
                mode: 0,
                modified: FileTime::default(),
            })
        }

        fn close(self: Box<Self>) -> SMBResult<()> {
            Ok(())
        }
    }

    fn open_on(table: &SMBFidTable, tree_id: u32) -> u64 {
        let id = table.reserve().unwrap();
        let request = SMBOpenRequestBuilder::default()
            .tree_id(tree_id)
            .handle(Box::new(StubHandle))
            .build()
            .unwrap();
        table.insert(id, Arc::new(SMBOpen::from_request(id, 1, request).unwrap())).unwrap();
        id
    }

    #[test]
    fn allocates_lowest_free_from_one() {
        let table = SMBFidTable::new(4, 100);
        assert_eq!(open_on(&table, 1), 1);
        assert_eq!(open_on(&table, 1), 2);
        assert_eq!(open_on(&table, 1), 3);
        table.release(2).unwrap();
        assert_eq!(open_on(&table, 1), 2);
    }

    #[test]
    fn grows_without_moving_ids() {
        let table = SMBFidTable::new(2, 100);
        for expected in 1..=20 {
            assert_eq!(open_on(&table, 1), expected);
        }
        assert!(table.capacity().unwrap() >= 21);
        assert_eq!(table.lookup(1).unwrap().volatile_id(), 1);
        assert_eq!(table.lookup(20).unwrap().volatile_id(), 20);
    }

    #[test]
    fn reservations_are_invisible_until_bound() {
        let table = SMBFidTable::new(4, 100);
        let id = table.reserve().unwrap();
        assert!(matches!(table.lookup(id), Err(SMBError::NotFound(_))));
        assert!(table.release(id).is_err());
        table.cancel_reservation(id).unwrap();
        assert!(table.cancel_reservation(id).is_err());
        assert_eq!(table.reserve().unwrap(), id);
    }

    #[test]
    fn insert_requires_a_reservation() {
        let table = SMBFidTable::new(4, 100);
        let request = SMBOpenRequestBuilder::default()
            .tree_id(1)
            .handle(Box::new(StubHandle))
            .build()
            .unwrap();
        let open = Arc::new(SMBOpen::from_request(3, 1, request).unwrap());
        assert!(table.insert(3, open.clone()).is_err());
        let id = table.reserve().unwrap();
        table.insert(id, open.clone()).unwrap();
        assert!(table.insert(id, open).is_err());
    }

    #[test]
    fn exhausts_at_the_configured_maximum() {
        let table = SMBFidTable::new(4, 8);
        for _ in 0..8 {
            table.reserve().unwrap();
        }
        assert!(matches!(table.reserve(), Err(SMBError::HandleExhausted(_))));
    }

    #[test]
    fn release_tree_only_touches_that_tree() {
        let table = SMBFidTable::new(4, 100);
        open_on(&table, 1);
        open_on(&table, 2);
        open_on(&table, 1);
        let released = table.release_tree(1).unwrap();
        assert_eq!(released.iter().map(|open| open.volatile_id()).collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(table.len().unwrap(), 1);
        assert!(table.lookup(2).is_ok());
    }

    #[test]
    fn drain_empties_the_table() {
        let table = SMBFidTable::new(4, 100);
        open_on(&table, 1);
        table.reserve().unwrap();
        assert_eq!(table.drain().unwrap().len(), 1);
        assert!(table.is_empty().unwrap());
        assert_eq!(open_on(&table, 1), 1);
    }
}
