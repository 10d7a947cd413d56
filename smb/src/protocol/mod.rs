//! Protocol-level definitions the connection core depends on.
//!
//! - `dialect`: SMB2 dialect revisions and the ordered protocol table used by negotiation.
//! - `negotiate`: NEGOTIATE request parsing (legacy and SMB2 headers) and dialect selection.
//! - `command_code`: SMB2 and legacy command codes.
//! - `access`, `create`: access masks, share access, create options and dispositions
//!   consulted by share-mode arbitration.
//! - `filetime`: Windows FILETIME timestamps.

pub mod access;
pub mod command_code;
pub mod create;
pub mod dialect;
pub mod filetime;
pub mod negotiate;
