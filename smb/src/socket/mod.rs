/// RFC1002 session framing: frame types, lengths and request validation.
pub mod frame;
/// Async frame reader feeding a connection's request buffers.
#[cfg(feature = "async")]
pub mod reader;
