use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use smb_core::error::SMBError;
use smb_core::SMBResult;

/// Mutex access that reports poisoning as a server error instead of
/// panicking the worker.
pub trait SafeLock<T> {
    fn lock_safe(&self) -> SMBResult<MutexGuard<'_, T>>;
}

pub trait SafeRwLock<T> {
    fn read_safe(&self) -> SMBResult<RwLockReadGuard<'_, T>>;
    fn write_safe(&self) -> SMBResult<RwLockWriteGuard<'_, T>>;
}

impl<T> SafeLock<T> for Mutex<T> {
    fn lock_safe(&self) -> SMBResult<MutexGuard<'_, T>> {
        self.lock()
            .map_err(|_| SMBError::server_error("Lock poisoned by a panicked worker"))
    }
}

impl<T> SafeRwLock<T> for RwLock<T> {
    fn read_safe(&self) -> SMBResult<RwLockReadGuard<'_, T>> {
        self.read()
            .map_err(|_| SMBError::server_error("Lock poisoned by a panicked worker"))
    }

    fn write_safe(&self) -> SMBResult<RwLockWriteGuard<'_, T>> {
        self.write()
            .map_err(|_| SMBError::server_error("Lock poisoned by a panicked worker"))
    }
}
