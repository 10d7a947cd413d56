/// First-fit id allocation shared by the fid, persistent-id and async-id namespaces.
pub mod id_bitmap;
/// Poison-aware lock helpers.
pub(crate) mod lock;
/// Debug hex dumps of raw PDUs.
pub mod hex_dump;
