//! Errors of the merged filesystem and their errno mapping.

use std::io;
use std::path::{Path, PathBuf};

use slothfs_storage::StorageError;
use thiserror::Error;

/// Errors returned by merged filesystem operations.
#[derive(Debug, Error)]
pub enum FsError {
    /// Underlying I/O failure that has no closer match.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// No ready copy exists on any device.
    #[error("Failed to resolve path {path:?}: file/directory not exist")]
    NotFound {
        /// Logical path as given by the caller.
        path: PathBuf,
    },

    /// A write or mkdir target exists on some device.
    #[error("File already exist: {path:?}")]
    AlreadyExists {
        /// Logical path as given by the caller.
        path: PathBuf,
    },

    /// An ancestor of the path is a file.
    #[error("Failed to resolve path {path:?}: path contains a file in the middle")]
    NotADirectory {
        /// Logical path as given by the caller.
        path: PathBuf,
    },

    /// A rename destination is an existing directory, or a removed
    /// directory still has entries.
    #[error("Rename destination already exist: {path:?}")]
    NotEmpty {
        /// Logical path as given by the caller.
        path: PathBuf,
    },

    /// The path climbs above the namespace root.
    #[error("Path is outside the merged namespace: {path:?}")]
    Unresolvable {
        /// Logical path as given by the caller.
        path: PathBuf,
    },

    /// The registry currently lists no devices.
    #[error("No devices available")]
    NoDevicesAvailable,
}

/// Result alias for merged filesystem operations.
pub type Result<T> = std::result::Result<T, FsError>;

impl FsError {
    pub(crate) fn not_found(path: &Path) -> Self {
        FsError::NotFound {
            path: path.to_path_buf(),
        }
    }

    /// Classify an I/O error raised for `path`.
    pub fn from_io(err: io::Error, path: &Path) -> Self {
        let path = path.to_path_buf();
        match err.kind() {
            io::ErrorKind::NotFound => FsError::NotFound { path },
            io::ErrorKind::AlreadyExists => FsError::AlreadyExists { path },
            _ => match err.raw_os_error() {
                Some(libc::ENOTDIR) => FsError::NotADirectory { path },
                Some(libc::ENOTEMPTY) => FsError::NotEmpty { path },
                _ => FsError::Io(err),
            },
        }
    }

    /// True for [`FsError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, FsError::NotFound { .. })
    }

    /// Whether retrying later can succeed without caller changes.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FsError::NoDevicesAvailable)
    }

    /// POSIX errno for protocol adapters.
    pub fn to_errno(&self) -> i32 {
        use libc::*;
        match self {
            FsError::Io(e) => e.raw_os_error().unwrap_or(EIO),
            FsError::NotFound { .. } => ENOENT,
            FsError::AlreadyExists { .. } => EEXIST,
            FsError::NotADirectory { .. } => ENOTDIR,
            FsError::NotEmpty { .. } => ENOTEMPTY,
            FsError::Unresolvable { .. } => EINVAL,
            FsError::NoDevicesAvailable => EAGAIN,
        }
    }
}

impl From<StorageError> for FsError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NoDevicesAvailable => FsError::NoDevicesAvailable,
            StorageError::IoError(e) => FsError::Io(e),
            other => FsError::Io(io::Error::other(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_errno() {
        let err = FsError::not_found(Path::new("a"));
        assert_eq!(err.to_errno(), libc::ENOENT);
        assert!(err.is_not_found());
    }

    #[test]
    fn test_already_exists_errno() {
        let err = FsError::AlreadyExists {
            path: PathBuf::from("a"),
        };
        assert_eq!(err.to_errno(), libc::EEXIST);
    }

    #[test]
    fn test_not_a_directory_errno() {
        let err = FsError::NotADirectory {
            path: PathBuf::from("a/b"),
        };
        assert_eq!(err.to_errno(), libc::ENOTDIR);
    }

    #[test]
    fn test_not_empty_errno() {
        let err = FsError::NotEmpty {
            path: PathBuf::from("dir"),
        };
        assert_eq!(err.to_errno(), libc::ENOTEMPTY);
    }

    #[test]
    fn test_no_devices_is_retryable() {
        let err = FsError::from(StorageError::NoDevicesAvailable);
        assert!(matches!(err, FsError::NoDevicesAvailable));
        assert!(err.is_retryable());
        assert_eq!(err.to_errno(), libc::EAGAIN);
    }

    #[test]
    fn test_from_io_classifies_kinds() {
        let p = Path::new("x");
        assert!(FsError::from_io(io::Error::from(io::ErrorKind::NotFound), p).is_not_found());
        assert!(matches!(
            FsError::from_io(io::Error::from(io::ErrorKind::AlreadyExists), p),
            FsError::AlreadyExists { .. }
        ));
        assert!(matches!(
            FsError::from_io(io::Error::from_raw_os_error(libc::ENOTDIR), p),
            FsError::NotADirectory { .. }
        ));
        assert!(matches!(
            FsError::from_io(io::Error::from_raw_os_error(libc::EACCES), p),
            FsError::Io(_)
        ));
    }

    #[test]
    fn test_io_errno_passthrough() {
        let err = FsError::Io(io::Error::from_raw_os_error(libc::EACCES));
        assert_eq!(err.to_errno(), libc::EACCES);
    }

    #[test]
    fn test_display_messages_non_empty() {
        let errors = [
            FsError::not_found(Path::new("a")),
            FsError::AlreadyExists {
                path: PathBuf::from("a"),
            },
            FsError::NotADirectory {
                path: PathBuf::from("a"),
            },
            FsError::NotEmpty {
                path: PathBuf::from("a"),
            },
            FsError::Unresolvable {
                path: PathBuf::from("../a"),
            },
            FsError::NoDevicesAvailable,
        ];
        for err in errors {
            assert!(!err.to_string().is_empty());
        }
    }
}
