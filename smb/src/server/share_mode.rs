use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use smb_core::error::{SMBError, SMBShareConflict};
use smb_core::logging::{debug, warn};
use smb_core::SMBResult;

use crate::protocol::access::SMBShareAccess;
use crate::protocol::create::SMBCreateDisposition;
use crate::server::open::SMBOpen;
use crate::server::resource::SMBObjectId;
use crate::util::lock::SafeRwLock;

/// Server-wide index of live opens keyed by object identity.
#[derive(Debug, Default)]
pub struct SMBOpenIndex {
    opens: RwLock<HashMap<SMBObjectId, Vec<Arc<SMBOpen>>>>,
}

impl SMBOpenIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks `candidate` against every open already indexed on its object.
    pub fn check(&self, candidate: &SMBOpen) -> SMBResult<()> {
        let opens = self.opens.read_safe()?;
        match opens.get(&candidate.object_id()) {
            Some(existing) => check_share_mode(candidate, existing),
            None => Ok(()),
        }
    }

    /// Checks `candidate` and indexes it under one write lock, so of two
    /// racing conflicting opens only the first to get here succeeds.
    pub fn check_and_insert(&self, candidate: Arc<SMBOpen>) -> SMBResult<()> {
        let mut opens = self.opens.write_safe()?;
        let existing = opens.entry(candidate.object_id()).or_default();
        check_share_mode(&candidate, existing.iter())?;
        existing.push(candidate);
        Ok(())
    }

    /// Removes `open` from the index, reporting whether it was present.
    pub fn remove(&self, open: &Arc<SMBOpen>) -> SMBResult<bool> {
        let mut opens = self.opens.write_safe()?;
        let object_id = open.object_id();
        let Some(existing) = opens.get_mut(&object_id) else {
            return Ok(false);
        };
        let before = existing.len();
        existing.retain(|other| !Arc::ptr_eq(other, open));
        let removed = existing.len() != before;
        if existing.is_empty() {
            opens.remove(&object_id);
        }
        Ok(removed)
    }

    /// First live open of an object, if any.
    pub fn find_open_by_object(&self, object_id: SMBObjectId) -> SMBResult<Option<Arc<SMBOpen>>> {
        let opens = self.opens.read_safe()?;
        Ok(opens.get(&object_id).and_then(|existing| existing.first().cloned()))
    }

    pub fn opens_of(&self, object_id: SMBObjectId) -> SMBResult<Vec<Arc<SMBOpen>>> {
        let opens = self.opens.read_safe()?;
        Ok(opens.get(&object_id).cloned().unwrap_or_default())
    }

    pub fn len(&self) -> SMBResult<usize> {
        Ok(self.opens.read_safe()?.values().map(Vec::len).sum())
    }

    pub fn is_empty(&self) -> SMBResult<bool> {
        Ok(self.opens.read_safe()?.is_empty())
    }

    pub(crate) fn drain(&self) -> SMBResult<Vec<Arc<SMBOpen>>> {
        let mut opens = self.opens.write_safe()?;
        Ok(opens.drain().flat_map(|(_, existing)| existing).collect())
    }
}

/// Runs the share-mode rules of `candidate` against each existing open,
/// stopping at the first conflict.
///
/// A stream open that sees a delete-on-close candidate takes over the
/// delete intent: it becomes delete pending and the candidate's
/// delete-on-close is cleared. That hand-off happens even when a later open
/// in the list ends up rejecting the candidate.
pub fn check_share_mode<'a, I>(candidate: &SMBOpen, existing: I) -> SMBResult<()>
where
    I: IntoIterator<Item=&'a Arc<SMBOpen>>,
{
    for prev in existing {
        if std::ptr::eq(Arc::as_ptr(prev), candidate) {
            continue;
        }
        if let Err(conflict) = check_pair(prev, candidate) {
            warn!(
                fid = prev.volatile_id(),
                prev_access = prev.desired_access().bits(),
                prev_share = prev.share_access().bits(),
                access = candidate.desired_access().bits(),
                share = candidate.share_access().bits(),
                reason = %conflict,
                "share mode conflict"
            );
            return Err(SMBError::share_violation(conflict));
        }
    }
    Ok(())
}

fn check_pair(prev: &SMBOpen, candidate: &SMBOpen) -> Result<(), SMBShareConflict> {
    if let (Some(prev_stream), Some(stream)) = (prev.stream_name(), candidate.stream_name()) {
        if prev_stream != stream {
            return Ok(());
        }
        if candidate.create_disposition() == SMBCreateDisposition::Supersede {
            return Err(SMBShareConflict::SupersedeStream);
        }
    }

    if prev.is_delete_pending() {
        return Err(SMBShareConflict::DeletePending);
    }

    if prev.is_attrib_only() != candidate.is_attrib_only() {
        return Ok(());
    }

    let (prev_access, prev_share) = (prev.desired_access(), prev.share_access());
    let (access, share) = (candidate.desired_access(), candidate.share_access());

    if !prev_share.contains(SMBShareAccess::DELETE) && access.requests_delete() {
        return Err(SMBShareConflict::ShareDelete);
    }

    if prev.is_stream() && candidate.delete_on_close() {
        debug!(fid = prev.volatile_id(), "stream open takes over delete on close");
        prev.set_delete_pending(true);
        prev.set_delete_on_close(true);
        candidate.set_delete_on_close(false);
    }

    if prev.is_stream() != candidate.is_stream() {
        return Ok(());
    }

    if !prev_share.contains(SMBShareAccess::READ) && access.requests_read() {
        return Err(SMBShareConflict::ShareRead);
    }
    if !prev_share.contains(SMBShareAccess::WRITE) && access.requests_write() {
        return Err(SMBShareConflict::ShareWrite);
    }
    if prev_access.requests_read() && !share.contains(SMBShareAccess::READ) {
        return Err(SMBShareConflict::AccessRead);
    }
    if prev_access.requests_write() && !share.contains(SMBShareAccess::WRITE) {
        return Err(SMBShareConflict::AccessWrite);
    }
    if prev_access.requests_delete() && !share.contains(SMBShareAccess::DELETE) {
        return Err(SMBShareConflict::AccessDelete);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::access::SMBAccessMask;
    use crate::protocol::create::SMBCreateOptions;
    use crate::protocol::filetime::FileTime;
    use crate::server::open::SMBOpenRequestBuilder;
    use crate::server::resource::{SMBFileStat, SMBResourceHandle};

    #[derive(Debug)]
    struct StubHandle;

    impl SMBResourceHandle for StubHandle {
        fn stat(&self) -> SMBResult<SMBFileStat> {
            Ok(SMBFileStat {
                object_id: SMBObjectId::new(8, 42),
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

    fn open(access: SMBAccessMask, share: SMBShareAccess) -> SMBOpenRequestBuilder {
        SMBOpenRequestBuilder::default()
            .tree_id(1)
            .handle(Box::new(StubHandle))
            .desired_access(access)
            .share_access(share)
    }

    fn build(builder: SMBOpenRequestBuilder) -> Arc<SMBOpen> {
        Arc::new(SMBOpen::from_request(1, 1, builder.build().unwrap()).unwrap())
    }

    fn conflict(result: SMBResult<()>) -> Option<SMBShareConflict> {
        match result {
            Err(SMBError::ShareViolation(conflict)) => Some(conflict),
            _ => None,
        }
    }

    #[test]
    fn read_share_blocks_a_writer() {
        let index = SMBOpenIndex::new();
        index.check_and_insert(build(open(SMBAccessMask::FILE_READ_DATA, SMBShareAccess::READ))).unwrap();
        let writer = build(open(SMBAccessMask::FILE_WRITE_DATA, SMBShareAccess::all()));
        assert_eq!(conflict(index.check(&writer)), Some(SMBShareConflict::ShareWrite));
    }

    #[test]
    fn write_share_admits_a_writer() {
        let index = SMBOpenIndex::new();
        index.check_and_insert(build(open(SMBAccessMask::FILE_READ_DATA, SMBShareAccess::READ | SMBShareAccess::WRITE))).unwrap();
        let writer = build(open(SMBAccessMask::FILE_WRITE_DATA, SMBShareAccess::READ | SMBShareAccess::WRITE));
        assert!(index.check_and_insert(writer).is_ok());
        assert_eq!(index.len().unwrap(), 2);
    }

    #[test]
    fn reverse_rules_protect_the_existing_holder() {
        let index = SMBOpenIndex::new();
        index.check_and_insert(build(open(SMBAccessMask::GENERIC_READ, SMBShareAccess::all()))).unwrap();
        let exclusive = build(open(SMBAccessMask::FILE_READ_ATTRIBUTES, SMBShareAccess::empty()));
        assert_eq!(conflict(index.check(&exclusive)), Some(SMBShareConflict::AccessRead));
    }

    #[test]
    fn delete_requires_share_delete() {
        let index = SMBOpenIndex::new();
        index.check_and_insert(build(open(SMBAccessMask::FILE_READ_ATTRIBUTES, SMBShareAccess::READ))).unwrap();
        let deleter = build(open(SMBAccessMask::DELETE, SMBShareAccess::all()));
        assert_eq!(conflict(index.check(&deleter)), Some(SMBShareConflict::ShareDelete));
        let maximal = build(open(SMBAccessMask::MAXIMUM_ALLOWED, SMBShareAccess::all()));
        assert_eq!(conflict(index.check(&maximal)), Some(SMBShareConflict::ShareDelete));
    }

    #[test]
    fn attribute_only_opens_skip_share_bits() {
        let index = SMBOpenIndex::new();
        index.check_and_insert(build(open(SMBAccessMask::GENERIC_ALL, SMBShareAccess::empty()))).unwrap();
        let stat_only = build(open(SMBAccessMask::FILE_READ_DATA, SMBShareAccess::empty()).attrib_only(true));
        assert!(index.check(&stat_only).is_ok());
    }

    #[test]
    fn delete_pending_rejects_everything() {
        let index = SMBOpenIndex::new();
        let first = build(open(SMBAccessMask::DELETE, SMBShareAccess::all()));
        index.check_and_insert(first.clone()).unwrap();
        first.set_delete_pending(true);
        let reader = build(open(SMBAccessMask::FILE_READ_ATTRIBUTES, SMBShareAccess::all()).attrib_only(true));
        assert_eq!(conflict(index.check(&reader)), Some(SMBShareConflict::DeletePending));
    }

    #[test]
    fn distinct_streams_are_independent() {
        let index = SMBOpenIndex::new();
        index.check_and_insert(build(open(SMBAccessMask::GENERIC_ALL, SMBShareAccess::empty()).stream_name("one"))).unwrap();
        let other = build(open(SMBAccessMask::GENERIC_ALL, SMBShareAccess::empty()).stream_name("two"));
        assert!(index.check_and_insert(other).is_ok());
        let same = build(open(SMBAccessMask::GENERIC_READ, SMBShareAccess::empty()).stream_name("one"));
        assert_eq!(conflict(index.check(&same)), Some(SMBShareConflict::ShareRead));
    }

    #[test]
    fn superseding_an_open_stream_conflicts() {
        let index = SMBOpenIndex::new();
        index.check_and_insert(build(open(SMBAccessMask::FILE_READ_DATA, SMBShareAccess::all()).stream_name("data"))).unwrap();
        let supersede = build(open(SMBAccessMask::FILE_WRITE_DATA, SMBShareAccess::all())
            .stream_name("data")
            .create_disposition(SMBCreateDisposition::Supersede));
        assert_eq!(conflict(index.check(&supersede)), Some(SMBShareConflict::SupersedeStream));
    }

    #[test]
    fn stream_absorbs_delete_on_close() {
        let index = SMBOpenIndex::new();
        let stream = build(open(SMBAccessMask::FILE_READ_DATA, SMBShareAccess::all()).stream_name("data"));
        index.check_and_insert(stream.clone()).unwrap();
        let base = build(open(SMBAccessMask::DELETE, SMBShareAccess::all())
            .create_options(SMBCreateOptions::DELETE_ON_CLOSE));
        assert!(base.delete_on_close());
        index.check_and_insert(base.clone()).unwrap();
        assert!(stream.is_delete_pending());
        assert!(stream.delete_on_close());
        assert!(!base.delete_on_close());
    }

    #[test]
    fn stream_and_base_skip_read_write_rules_in_both_orders() {
        let index = SMBOpenIndex::new();
        index.check_and_insert(build(open(SMBAccessMask::FILE_READ_DATA, SMBShareAccess::empty()))).unwrap();
        let stream = build(open(SMBAccessMask::FILE_WRITE_DATA, SMBShareAccess::empty()).stream_name("data"));
        assert!(index.check(&stream).is_ok());

        let index = SMBOpenIndex::new();
        index.check_and_insert(stream).unwrap();
        let base = build(open(SMBAccessMask::FILE_READ_DATA, SMBShareAccess::empty()));
        assert!(index.check(&base).is_ok());
    }

    #[test]
    fn remove_and_find_by_object() {
        let index = SMBOpenIndex::new();
        let first = build(open(SMBAccessMask::FILE_READ_DATA, SMBShareAccess::all()));
        index.check_and_insert(first.clone()).unwrap();
        let found = index.find_open_by_object(SMBObjectId::new(8, 42)).unwrap().unwrap();
        assert!(Arc::ptr_eq(&found, &first));
        assert!(index.remove(&first).unwrap());
        assert!(!index.remove(&first).unwrap());
        assert!(index.is_empty().unwrap());
        assert!(index.find_open_by_object(SMBObjectId::new(8, 42)).unwrap().is_none());
    }
}
