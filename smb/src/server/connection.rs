use std::sync::Arc;

use smb_core::error::SMBError;
use smb_core::logging::{debug, warn};
use smb_core::SMBResult;

use crate::protocol::dialect::{SMBDialect, SMBProtocol};
use crate::protocol::filetime::FileTime;
use crate::protocol::negotiate::{negotiate, SMBNegotiateOffer, SMBNegotiated};
use crate::server::buffer::{SMBBufferPools, SMBRequestBuffers, SMBResponseBuffer};
use crate::server::config::SMBServerConfig;
use crate::server::request::SMBRequestTracker;

/// One client transport connection.
#[derive(Debug)]
pub struct SMBConnection {
    connection_id: u64,
    client_name: String,
    creation_time: FileTime,
    min_protocol: SMBProtocol,
    max_protocol: SMBProtocol,
    negotiated: Option<SMBNegotiated>,
    pools: Arc<SMBBufferPools>,
    request_buffers: SMBRequestBuffers,
    requests: SMBRequestTracker,
}

impl SMBConnection {
    pub fn new(connection_id: u64, client_name: impl Into<String>, pools: Arc<SMBBufferPools>, config: &SMBServerConfig) -> SMBResult<Self> {
        let request_buffers = SMBRequestBuffers::new(pools.clone(), config)?;
        Ok(Self {
            connection_id,
            client_name: client_name.into(),
            creation_time: FileTime::now(),
            min_protocol: config.min_protocol,
            max_protocol: config.max_protocol,
            negotiated: None,
            pools,
            request_buffers,
            requests: SMBRequestTracker::new(config.max_async_ids),
        })
    }

    pub fn connection_id(&self) -> u64 {
        self.connection_id
    }

    pub fn client_name(&self) -> &str {
        &self.client_name
    }

    pub fn creation_time(&self) -> FileTime {
        self.creation_time
    }

    /// Negotiates from a raw NEGOTIATE PDU (transport header excluded).
    pub fn negotiate(&mut self, pdu: &[u8]) -> SMBResult<SMBNegotiated> {
        let offer = SMBNegotiateOffer::parse(pdu)?;
        self.negotiate_offer(&offer)
    }

    /// Settles the protocol for this connection. A connection negotiates
    /// once; later attempts fail without changing the outcome.
    pub fn negotiate_offer(&mut self, offer: &SMBNegotiateOffer) -> SMBResult<SMBNegotiated> {
        if let Some(negotiated) = self.negotiated {
            warn!(connection = self.connection_id, protocol = %negotiated.protocol, "repeated negotiate");
            return Err(SMBError::precondition_failed("Connection already negotiated"));
        }
        let negotiated = negotiate(offer, self.min_protocol, self.max_protocol).inspect_err(|_| {
            debug!(connection = self.connection_id, legacy = offer.is_legacy(), "negotiation failed");
        })?;
        self.negotiated = Some(negotiated);
        Ok(negotiated)
    }

    pub fn negotiated(&self) -> Option<SMBNegotiated> {
        self.negotiated
    }

    pub fn protocol(&self) -> Option<SMBProtocol> {
        self.negotiated.map(|negotiated| negotiated.protocol)
    }

    pub fn dialect(&self) -> Option<SMBDialect> {
        self.negotiated.and_then(|negotiated| negotiated.dialect())
    }

    pub fn request_buffers(&self) -> &SMBRequestBuffers {
        &self.request_buffers
    }

    pub fn request_buffers_mut(&mut self) -> &mut SMBRequestBuffers {
        &mut self.request_buffers
    }

    pub fn new_response_buffer(&self) -> SMBResult<SMBResponseBuffer> {
        SMBResponseBuffer::new(self.pools.clone())
    }

    pub fn requests(&self) -> &SMBRequestTracker {
        &self.requests
    }
}
