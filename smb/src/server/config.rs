use derive_builder::Builder;
use serde::{Deserialize, Serialize};

use crate::protocol::dialect::SMBProtocol;

pub const DEFAULT_SMALL_BUFFER_SIZE: usize = 448;
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 65536;
pub const DEFAULT_HEADER_SIZE: usize = 0x78;
pub const DEFAULT_MAX_IO_SIZE: usize = 1024 * 1024;
/// Largest fid an open may carry; fids are 16 bits on the wire for legacy clients.
pub const MAX_FID: usize = 65535;

/// Tunables for the connection core.
///
/// Build it through [`SMBServerConfigBuilder`]; every field has a default, so
/// `SMBServerConfigBuilder::default().build()` yields a usable configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Builder)]
#[builder(pattern = "owned", default, build_fn(validate = "Self::validate"))]
pub struct SMBServerConfig {
    /// Lowest protocol the server accepts.
    pub min_protocol: SMBProtocol,
    /// Highest protocol the server offers.
    pub max_protocol: SMBProtocol,
    pub small_buffer_size: usize,
    pub max_buffer_size: usize,
    /// Allowance for protocol headers added to every buffer size.
    pub header_size: usize,
    pub max_io_size: usize,
    /// Oversized request buffers that may exist at once across the server.
    pub max_oversized_buffers: usize,
    /// Released buffers kept per pool for reuse.
    pub max_pooled_buffers: usize,
    pub durable_handles: bool,
    pub initial_fid_capacity: usize,
    pub max_fids: usize,
    pub max_durable_handles: usize,
    pub max_async_ids: usize,
}

impl Default for SMBServerConfig {
    fn default() -> Self {
        Self {
            min_protocol: SMBProtocol::MIN,
            max_protocol: SMBProtocol::MAX,
            small_buffer_size: DEFAULT_SMALL_BUFFER_SIZE,
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
            header_size: DEFAULT_HEADER_SIZE,
            max_io_size: DEFAULT_MAX_IO_SIZE,
            max_oversized_buffers: 16,
            max_pooled_buffers: 32,
            durable_handles: true,
            initial_fid_capacity: 64,
            max_fids: MAX_FID,
            max_durable_handles: u32::MAX as usize,
            max_async_ids: u32::MAX as usize,
        }
    }
}

impl SMBServerConfig {
    /// Size of a small request buffer.
    pub fn small_request_size(&self) -> usize {
        self.small_buffer_size + self.header_size
    }

    /// Size of a large request or response buffer.
    pub fn large_request_size(&self) -> usize {
        self.max_buffer_size + self.header_size
    }

    pub fn oversized_request_size(&self) -> usize {
        self.max_io_size + self.header_size
    }
}

impl SMBServerConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        let defaults = SMBServerConfig::default();
        let min_protocol = self.min_protocol.unwrap_or(defaults.min_protocol);
        let max_protocol = self.max_protocol.unwrap_or(defaults.max_protocol);
        if min_protocol > max_protocol {
            return Err(format!("min_protocol {} is above max_protocol {}", min_protocol, max_protocol));
        }
        let small = self.small_buffer_size.unwrap_or(defaults.small_buffer_size);
        let max_buffer = self.max_buffer_size.unwrap_or(defaults.max_buffer_size);
        let max_io = self.max_io_size.unwrap_or(defaults.max_io_size);
        if max_buffer < small {
            return Err(format!("max_buffer_size {} is below small_buffer_size {}", max_buffer, small));
        }
        if max_io < max_buffer {
            return Err(format!("max_io_size {} is below max_buffer_size {}", max_io, max_buffer));
        }
        if self.header_size.unwrap_or(defaults.header_size) < 4 {
            return Err("header_size must cover the 4 byte transport header".into());
        }
        let max_fids = self.max_fids.unwrap_or(defaults.max_fids);
        if max_fids == 0 || max_fids > MAX_FID {
            return Err(format!("max_fids must be within 1..={}", MAX_FID));
        }
        if self.initial_fid_capacity.unwrap_or(defaults.initial_fid_capacity) == 0 {
            return Err("initial_fid_capacity must be at least 1".into());
        }
        Ok(())
    }
}
