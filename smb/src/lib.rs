//! # SMB Connection Core
//!
//! The connection-level core of a **Server Message Block (SMB)** file server,
//! covering the SMB1 (NT LM 0.12) and SMB2/3 dialect families.
//!
//! This crate provides:
//! - **Protocol layer** ([`protocol`]): the dialect table, negotiate offer
//!   parsing and dialect selection, command codes, access and share masks,
//!   create options and file times.
//! - **Server layer** ([`server`]): per-connection request buffers, the
//!   per-session file id table, the server-wide open index enforcing share
//!   modes, the durable handle registry and the sync/async request tracker.
//! - **Socket layer** ([`socket`]): RFC1002 session framing and an async frame
//!   reader feeding the request buffers.
//! - **Utilities** ([`util`]): the id bitmap behind every id pool, lock
//!   helpers and hex dumps for tracing.
//!
//! ## Quick Start
//!
//! ```
//! use smb_connection::protocol::dialect::SMBProtocol;
//! use smb_connection::server::{SMBServer, SMBServerConfigBuilder};
//!
//! fn main() -> smb_core::SMBResult<()> {
//!     let config = SMBServerConfigBuilder::default()
//!         .min_protocol(SMBProtocol::SMB2_02)
//!         .build()
//!         .map_err(|e| smb_core::error::SMBError::precondition_failed(e.to_string()))?;
//!     let server = SMBServer::new(config);
//!     let connection = server.accept("client")?;
//!     let session = server.create_session(&connection)?;
//!     assert!(session.fid_table().is_empty()?);
//!     Ok(())
//! }
//! ```

/// Dialects, negotiation and the wire-level types the server core reads.
pub mod protocol;
/// Connections, sessions, opens, share modes, durable handles and request queues.
pub mod server;
/// RFC1002 framing and transport reading.
pub mod socket;
/// Id pools, lock helpers and hex dumps.
pub mod util;
