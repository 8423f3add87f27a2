//! Whole-file copies between devices.

use std::io;
use std::path::Path;

use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Stream `source` into `target`, creating the target's directory tree.
///
/// A partially written target is removed on failure. Returns the byte count.
pub async fn copy_file(source: &Path, target: &Path) -> io::Result<u64> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).await?;
    }
    let result = stream_copy(source, target).await;
    if result.is_err() {
        if let Err(e) = fs::remove_file(target).await {
            debug!(target = %target.display(), error = %e, "no partial copy to clean up");
        }
    }
    result
}

async fn stream_copy(source: &Path, target: &Path) -> io::Result<u64> {
    let mut reader = File::open(source).await?;
    let mut writer = File::create(target).await?;
    let bytes = tokio::io::copy(&mut reader, &mut writer).await?;
    writer.flush().await?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_copy_creates_parents() {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("src.bin");
        std::fs::write(&source, b"payload").unwrap();
        let target = tmp.path().join("x").join("y").join("dst.bin");

        let bytes = copy_file(&source, &target).await.unwrap();
        assert_eq!(bytes, 7);
        assert_eq!(std::fs::read(&target).unwrap(), b"payload");
    }

    #[tokio::test]
    async fn test_missing_source_leaves_no_target() {
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("dst.bin");

        let err = copy_file(&tmp.path().join("nope"), &target).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
        assert!(!target.exists());
    }

    #[tokio::test]
    async fn test_overwrites_stale_copy() {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("new");
        let target = tmp.path().join("old");
        std::fs::write(&source, b"fresh").unwrap();
        std::fs::write(&target, b"stale data that is longer").unwrap();

        copy_file(&source, &target).await.unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), b"fresh");
    }
}
