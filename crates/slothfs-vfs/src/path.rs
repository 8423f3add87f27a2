//! Logical path normalization.

use std::path::{Component, Path, PathBuf};

use crate::error::{FsError, Result};

/// Map a logical path to a path relative to every device's storage directory.
///
/// A leading devices-path prefix is stripped, then the path is taken relative
/// to the namespace root: `/a/b`, `a/b` and `<devices>/a/b` all map to `a/b`.
/// The empty path is the namespace root. `..` that would climb above the root
/// is rejected.
pub fn relative_path(devices_path: &Path, logical: &Path) -> Result<PathBuf> {
    let stripped = logical.strip_prefix(devices_path).unwrap_or(logical);
    let mut out = PathBuf::new();
    for component in stripped.components() {
        match component {
            Component::RootDir | Component::CurDir => {}
            Component::Normal(part) => out.push(part),
            Component::ParentDir => {
                if !out.pop() {
                    return Err(FsError::Unresolvable {
                        path: logical.to_path_buf(),
                    });
                }
            }
            Component::Prefix(_) => {
                return Err(FsError::Unresolvable {
                    path: logical.to_path_buf(),
                })
            }
        }
    }
    Ok(out)
}
