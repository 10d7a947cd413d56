//! Connection-level server state.
//!
//! The [`SMBServer`] service object owns everything shared across
//! connections; [`SMBConnection`] and [`SMBSession`] hold what is private to
//! one transport connection or one session.

pub mod buffer;
pub mod config;
pub mod connection;
pub mod durable;
pub mod fid_table;
pub mod open;
pub mod request;
pub mod resource;
pub mod server;
pub mod session;
pub mod share_mode;
pub mod xattr;

pub use buffer::{SMBBufferPools, SMBRequestBuffers, SMBRequestSizing, SMBResponseBuffer};
pub use config::{SMBServerConfig, SMBServerConfigBuilder};
pub use connection::SMBConnection;
pub use durable::{SMBDurableHandle, SMBDurableRegistry};
pub use fid_table::SMBFidTable;
pub use open::{SMBOpen, SMBOpenRequest, SMBOpenRequestBuilder};
pub use request::{SMBQueueKind, SMBRequestTracker};
pub use resource::{SMBFileStat, SMBObjectId, SMBResourceHandle};
pub use server::SMBServer;
pub use session::SMBSession;
pub use share_mode::SMBOpenIndex;
