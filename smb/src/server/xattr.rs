use smb_core::logging::{debug, trace};
use smb_core::SMBResult;

/// Extended-attribute access on an open object, supplied by the
/// filesystem layer.
pub trait SMBExtendedAttributes {
    fn list_xattrs(&self) -> SMBResult<Vec<String>>;
    fn get_xattr(&self, name: &str) -> SMBResult<Vec<u8>>;
    fn set_xattr(&self, name: &str, value: &[u8]) -> SMBResult<()>;
}

/// Stores a continuation marker under `key`.
pub fn store_continuation<X: SMBExtendedAttributes + ?Sized>(attributes: &X, key: &str, value: &[u8]) -> SMBResult<()> {
    trace!(key, length = value.len(), "storing continuation marker");
    attributes.set_xattr(key, value)
}

/// Finds the first attribute whose name begins with `prefix`, ignoring
/// ASCII case, and returns its value.
pub fn find_continuation<X: SMBExtendedAttributes + ?Sized>(attributes: &X, prefix: &str) -> SMBResult<Option<Vec<u8>>> {
    let names = attributes.list_xattrs()?;
    let Some(name) = names.iter().find(|name| has_prefix_ignore_case(name, prefix)) else {
        return Ok(None);
    };
    debug!(name = name.as_str(), prefix, "found continuation marker");
    attributes.get_xattr(name).map(Some)
}

fn has_prefix_ignore_case(name: &str, prefix: &str) -> bool {
    let (name, prefix) = (name.as_bytes(), prefix.as_bytes());
    name.len() >= prefix.len() && name[..prefix.len()].eq_ignore_ascii_case(prefix)
}
