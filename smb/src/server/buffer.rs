use std::sync::{Arc, Mutex};

use smb_core::error::SMBError;
use smb_core::logging::{debug, warn};
use smb_core::SMBResult;

use crate::server::config::SMBServerConfig;
use crate::util::lock::SafeLock;

/// Fixed-size buffer pool with fallible allocation.
///
/// Released buffers are cached up to `max_cached`. When `max_outstanding` is
/// set, allocation fails with `OutOfMemory` once that many buffers are out.
#[derive(Debug)]
pub struct SMBBufferPool {
    buffer_size: usize,
    max_cached: usize,
    max_outstanding: Option<usize>,
    state: Mutex<SMBBufferPoolState>,
}

#[derive(Debug, Default)]
struct SMBBufferPoolState {
    free: Vec<Vec<u8>>,
    outstanding: usize,
}

impl SMBBufferPool {
    pub fn new(buffer_size: usize, max_cached: usize) -> Self {
        Self {
            buffer_size,
            max_cached,
            max_outstanding: None,
            state: Mutex::new(SMBBufferPoolState::default()),
        }
    }

    pub fn with_limit(buffer_size: usize, max_cached: usize, max_outstanding: usize) -> Self {
        Self {
            max_outstanding: Some(max_outstanding),
            ..Self::new(buffer_size, max_cached)
        }
    }

    pub fn alloc(&self) -> SMBResult<Vec<u8>> {
        let mut state = self.state.lock_safe()?;
        if self.max_outstanding.is_some_and(|limit| state.outstanding >= limit) {
            warn!(size = self.buffer_size, outstanding = state.outstanding, "buffer pool exhausted");
            return Err(SMBError::out_of_memory(self.buffer_size));
        }
        let buffer = match state.free.pop() {
            Some(buffer) => buffer,
            None => {
                let mut buffer = Vec::new();
                buffer.try_reserve_exact(self.buffer_size)
                    .map_err(|_| SMBError::out_of_memory(self.buffer_size))?;
                buffer.resize(self.buffer_size, 0);
                buffer
            }
        };
        state.outstanding += 1;
        Ok(buffer)
    }

    pub fn free(&self, buffer: Vec<u8>) {
        let Ok(mut state) = self.state.lock_safe() else {
            return;
        };
        state.outstanding = state.outstanding.saturating_sub(1);
        if buffer.len() == self.buffer_size && state.free.len() < self.max_cached {
            state.free.push(buffer);
        }
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn outstanding(&self) -> SMBResult<usize> {
        Ok(self.state.lock_safe()?.outstanding)
    }
}

/// The server's buffer pools, shared by every connection.
#[derive(Debug)]
pub struct SMBBufferPools {
    pub small_request: SMBBufferPool,
    pub large_request: SMBBufferPool,
    pub oversized_request: SMBBufferPool,
    pub small_response: SMBBufferPool,
    pub large_response: SMBBufferPool,
}

impl SMBBufferPools {
    pub fn from_config(config: &SMBServerConfig) -> Self {
        Self {
            small_request: SMBBufferPool::new(config.small_request_size(), config.max_pooled_buffers),
            large_request: SMBBufferPool::new(config.large_request_size(), config.max_pooled_buffers),
            oversized_request: SMBBufferPool::with_limit(config.oversized_request_size(), 0, config.max_oversized_buffers),
            small_response: SMBBufferPool::new(config.small_request_size(), config.max_pooled_buffers),
            large_response: SMBBufferPool::new(config.large_request_size(), config.max_pooled_buffers),
        }
    }
}

/// Which request buffer a PDU was received into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SMBRequestSizing {
    Small,
    Large,
    Oversized,
}

/// Per-connection request buffers.
///
/// Every receive cycle starts in the small buffer. Once the transport header
/// announces the PDU length, [`SMBRequestBuffers::size_request`] moves the
/// bytes read so far into the large or an oversized buffer when needed.
#[derive(Debug)]
pub struct SMBRequestBuffers {
    pools: Arc<SMBBufferPools>,
    header_size: usize,
    small_limit: usize,
    large_limit: usize,
    oversized_limit: usize,
    small: Option<Vec<u8>>,
    large: Option<Vec<u8>>,
    oversized: Option<Vec<u8>>,
    large_buf: bool,
    total_read: usize,
}

impl SMBRequestBuffers {
    pub fn new(pools: Arc<SMBBufferPools>, config: &SMBServerConfig) -> SMBResult<Self> {
        let small = pools.small_request.alloc()?;
        let large = match pools.large_request.alloc() {
            Ok(large) => large,
            Err(e) => {
                pools.small_request.free(small);
                return Err(e);
            }
        };
        Ok(Self {
            pools,
            header_size: config.header_size,
            small_limit: config.small_buffer_size + config.header_size - 4,
            large_limit: config.max_buffer_size + config.header_size - 4,
            oversized_limit: config.max_io_size + config.header_size - 4,
            small: Some(small),
            large: Some(large),
            oversized: None,
            large_buf: false,
            total_read: 0,
        })
    }

    /// The buffer the current PDU lives in.
    pub fn active(&self) -> &[u8] {
        self.active_buffer().map(Vec::as_slice).unwrap_or_default()
    }

    pub fn active_mut(&mut self) -> &mut [u8] {
        let buffer = if self.oversized.is_some() {
            self.oversized.as_mut()
        } else if self.large_buf {
            self.large.as_mut()
        } else {
            self.small.as_mut()
        };
        buffer.map(Vec::as_mut_slice).unwrap_or_default()
    }

    /// Bytes of the current PDU received so far, transport header included.
    pub fn received(&self) -> &[u8] {
        &self.active()[..self.total_read]
    }

    pub fn total_read(&self) -> usize {
        self.total_read
    }

    pub fn set_total_read(&mut self, total_read: usize) -> SMBResult<()> {
        if total_read > self.active().len() {
            return Err(SMBError::buffer_overflow(total_read, self.active().len()));
        }
        self.total_read = total_read;
        Ok(())
    }

    /// Appends received bytes to the active buffer.
    pub fn append(&mut self, data: &[u8]) -> SMBResult<()> {
        let start = self.total_read;
        let end = start + data.len();
        let capacity = self.active().len();
        if end > capacity {
            return Err(SMBError::buffer_overflow(end, capacity));
        }
        self.active_mut()[start..end].copy_from_slice(data);
        self.total_read = end;
        Ok(())
    }

    pub fn sizing(&self) -> SMBRequestSizing {
        if self.oversized.is_some() {
            SMBRequestSizing::Oversized
        } else if self.large_buf {
            SMBRequestSizing::Large
        } else {
            SMBRequestSizing::Small
        }
    }

    pub fn is_large(&self) -> bool {
        self.large_buf
    }

    pub fn header_size(&self) -> usize {
        self.header_size
    }

    /// Picks the buffer for a PDU of `pdu_length` bytes (transport header
    /// excluded), copying whatever was already read into it.
    ///
    /// PDUs beyond the oversized limit fail with `BufferOverflow` and the
    /// connection must be dropped. A failed allocation leaves the small
    /// buffer active and untouched.
    pub fn size_request(&mut self, pdu_length: usize) -> SMBResult<SMBRequestSizing> {
        if self.sizing() != SMBRequestSizing::Small || pdu_length <= self.small_limit {
            return Ok(self.sizing());
        }
        if pdu_length <= self.large_limit {
            let Some(large) = self.large.as_mut() else {
                return Err(SMBError::server_error("Large request buffer missing"));
            };
            let Some(small) = self.small.as_ref() else {
                return Err(SMBError::server_error("Small request buffer missing"));
            };
            large[..self.total_read].copy_from_slice(&small[..self.total_read]);
            self.large_buf = true;
            debug!(pdu_length, "switched to large request buffer");
            return Ok(SMBRequestSizing::Large);
        }
        if pdu_length <= self.oversized_limit {
            let mut oversized = self.pools.oversized_request.alloc()?;
            if let Some(small) = self.small.take() {
                oversized[..self.total_read].copy_from_slice(&small[..self.total_read]);
                self.pools.small_request.free(small);
            }
            if let Some(large) = self.large.take() {
                self.pools.large_request.free(large);
            }
            self.oversized = Some(oversized);
            debug!(pdu_length, "switched to oversized request buffer");
            return Ok(SMBRequestSizing::Oversized);
        }
        warn!(pdu_length, max = self.oversized_limit, "request exceeds every buffer");
        Err(SMBError::buffer_overflow(pdu_length, self.oversized_limit))
    }

    /// Ends a receive cycle: releases an oversized buffer, restores the
    /// small and large buffers and rewinds to the small buffer.
    pub fn finish_request(&mut self) -> SMBResult<()> {
        if let Some(oversized) = self.oversized.take() {
            self.pools.oversized_request.free(oversized);
        }
        if self.small.is_none() {
            self.small = Some(self.pools.small_request.alloc()?);
        }
        if self.large.is_none() {
            self.large = Some(self.pools.large_request.alloc()?);
        }
        self.large_buf = false;
        self.total_read = 0;
        Ok(())
    }

    fn active_buffer(&self) -> Option<&Vec<u8>> {
        if self.oversized.is_some() {
            self.oversized.as_ref()
        } else if self.large_buf {
            self.large.as_ref()
        } else {
            self.small.as_ref()
        }
    }
}

impl Drop for SMBRequestBuffers {
    fn drop(&mut self) {
        if let Some(small) = self.small.take() {
            self.pools.small_request.free(small);
        }
        if let Some(large) = self.large.take() {
            self.pools.large_request.free(large);
        }
        if let Some(oversized) = self.oversized.take() {
            self.pools.oversized_request.free(oversized);
        }
    }
}

/// Response buffer that starts small and can be grown once.
#[derive(Debug)]
pub struct SMBResponseBuffer {
    pools: Arc<SMBBufferPools>,
    buffer: Option<Vec<u8>>,
    large: bool,
}

impl SMBResponseBuffer {
    pub fn new(pools: Arc<SMBBufferPools>) -> SMBResult<Self> {
        let buffer = pools.small_response.alloc()?;
        Ok(Self { pools, buffer: Some(buffer), large: false })
    }

    pub fn as_slice(&self) -> &[u8] {
        self.buffer.as_deref().unwrap_or_default()
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        self.buffer.as_deref_mut().unwrap_or_default()
    }

    pub fn is_large(&self) -> bool {
        self.large
    }

    /// Swaps the small buffer for a large one, keeping its content. Does
    /// nothing if the buffer is already large. On failure the small buffer
    /// stays in place.
    pub fn grow(&mut self) -> SMBResult<()> {
        if self.large {
            return Ok(());
        }
        let mut large = self.pools.large_response.alloc()?;
        if let Some(small) = self.buffer.take() {
            let copied = small.len().min(large.len());
            large[..copied].copy_from_slice(&small[..copied]);
            self.pools.small_response.free(small);
        }
        self.buffer = Some(large);
        self.large = true;
        debug!("grew response buffer");
        Ok(())
    }
}

impl Drop for SMBResponseBuffer {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            if self.large {
                self.pools.large_response.free(buffer);
            } else {
                self.pools.small_response.free(buffer);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::config::SMBServerConfigBuilder;

    fn config() -> SMBServerConfig {
        SMBServerConfigBuilder::default()
            .small_buffer_size(64)
            .max_buffer_size(256)
            .max_io_size(1024)
            .header_size(8)
            .max_oversized_buffers(1)
            .build()
            .unwrap()
    }

    fn buffers() -> SMBRequestBuffers {
        let config = config();
        SMBRequestBuffers::new(Arc::new(SMBBufferPools::from_config(&config)), &config).unwrap()
    }

    #[test]
    fn small_pdus_stay_in_the_small_buffer() {
        let mut buffers = buffers();
        buffers.append(&[0, 0, 0, 68]).unwrap();
        assert_eq!(buffers.size_request(68).unwrap(), SMBRequestSizing::Small);
        assert_eq!(buffers.active().len(), 72);
    }

    #[test]
    fn switching_copies_bytes_already_read() {
        let mut buffers = buffers();
        buffers.append(&[0, 0, 1, 0, 0xFE, b'S']).unwrap();
        assert_eq!(buffers.size_request(256).unwrap(), SMBRequestSizing::Large);
        assert!(buffers.is_large());
        assert_eq!(buffers.received(), &[0, 0, 1, 0, 0xFE, b'S']);
        assert_eq!(buffers.active().len(), 264);
    }

    #[test]
    fn oversized_switch_returns_small_and_large_buffers() {
        let config = config();
        let pools = Arc::new(SMBBufferPools::from_config(&config));
        let mut buffers = SMBRequestBuffers::new(pools.clone(), &config).unwrap();
        buffers.append(&[1, 2, 3, 4]).unwrap();
        assert_eq!(buffers.size_request(261).unwrap(), SMBRequestSizing::Oversized);
        assert_eq!(buffers.received(), &[1, 2, 3, 4]);
        assert_eq!(pools.small_request.outstanding().unwrap(), 0);
        assert_eq!(pools.large_request.outstanding().unwrap(), 0);
        assert_eq!(pools.oversized_request.outstanding().unwrap(), 1);

        buffers.finish_request().unwrap();
        assert_eq!(buffers.sizing(), SMBRequestSizing::Small);
        assert_eq!(pools.oversized_request.outstanding().unwrap(), 0);
        assert_eq!(pools.small_request.outstanding().unwrap(), 1);
    }

    #[test]
    fn exhausted_oversized_pool_leaves_small_buffer_intact() {
        let config = config();
        let pools = Arc::new(SMBBufferPools::from_config(&config));
        let held = pools.oversized_request.alloc().unwrap();
        let mut buffers = SMBRequestBuffers::new(pools.clone(), &config).unwrap();
        buffers.append(&[9, 9, 9, 9]).unwrap();
        assert!(matches!(buffers.size_request(500), Err(SMBError::OutOfMemory(_))));
        assert_eq!(buffers.sizing(), SMBRequestSizing::Small);
        assert_eq!(buffers.received(), &[9, 9, 9, 9]);
        pools.oversized_request.free(held);
    }

    #[test]
    fn pdus_past_the_io_limit_overflow() {
        let mut buffers = buffers();
        assert!(buffers.size_request(1028).is_ok());
        let mut buffers = self::buffers();
        let result = buffers.size_request(1029);
        assert!(matches!(result, Err(SMBError::BufferOverflow(_))));
        assert!(result.unwrap_err().aborts_connection());
    }

    #[test]
    fn append_past_the_active_buffer_fails() {
        let mut buffers = buffers();
        assert!(buffers.append(&[0u8; 73]).is_err());
        assert_eq!(buffers.total_read(), 0);
    }

    #[test]
    fn growing_a_response_keeps_its_content() {
        let config = config();
        let pools = Arc::new(SMBBufferPools::from_config(&config));
        let mut response = SMBResponseBuffer::new(pools.clone()).unwrap();
        response.as_mut_slice()[..3].copy_from_slice(&[7, 8, 9]);
        response.grow().unwrap();
        assert!(response.is_large());
        assert_eq!(&response.as_slice()[..3], &[7, 8, 9]);
        assert_eq!(response.as_slice().len(), 264);
        response.grow().unwrap();
        assert_eq!(pools.large_response.outstanding().unwrap(), 1);
        drop(response);
        assert_eq!(pools.large_response.outstanding().unwrap(), 0);
        assert_eq!(pools.small_response.outstanding().unwrap(), 0);
    }

    #[test]
    fn pool_reuses_released_buffers() {
        let pool = SMBBufferPool::with_limit(16, 1, 2);
        let first = pool.alloc().unwrap();
        let second = pool.alloc().unwrap();
        assert!(pool.alloc().is_err());
        pool.free(first);
        pool.free(second);
        assert_eq!(pool.outstanding().unwrap(), 0);
        assert_eq!(pool.alloc().unwrap().len(), 16);
    }
}
