use std::path::PathBuf;

use cvfs_core::{CoreError, CoreResult};

use crate::MAX_PATH_LEN;

/// Compose `<base_path><name>`, refusing results longer than
/// [`MAX_PATH_LEN`] bytes.
///
/// The base path is a plain prefix; no separator is inserted.
pub fn descriptor_path(base_path: &str, name: &str) -> CoreResult<PathBuf> {
    let len = base_path.len() + name.len();
    if len > MAX_PATH_LEN {
        return Err(CoreError::InvalidParameter(format!(
            "descriptor path is {len} bytes (limit {MAX_PATH_LEN})"
        )));
    }
    let mut composed = String::with_capacity(len);
    composed.push_str(base_path);
    composed.push_str(name);
    Ok(PathBuf::from(composed))
}
