//! Copying the geesefs binary onto the host-visible plugin directory.
//!
//! Units run the binary from the host's point of view, so it has to live on
//! a path the host can see. The copy is refreshed only when the content
//! differs: size first, then a SHA-256 of both files. The stale file is
//! unlinked before writing so a running mount keeps its old inode instead of
//! the write failing with "text file busy".

use std::fs::{self, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

#[derive(Debug, thiserror::Error)]
pub enum StagingError {
    #[error("failed to stat {path}: {source}")]
    Stat {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("error removing {path} to update it: {source}")]
    Remove {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("error copying {from} to {to}: {source}")]
    Copy {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("staging task failed: {0}")]
    Join(String),
}

/// Size and content hash of a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    pub len: u64,
    pub sha256: String,
}

impl Fingerprint {
    pub fn of(path: &Path) -> io::Result<Self> {
        let mut file = fs::File::open(path)?;
        let len = file.metadata()?.len();
        let mut hasher = Sha256::new();
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(Self {
            len,
            sha256: hex::encode(hasher.finalize()),
        })
    }
}

/// Make `to` a copy of `from`. Returns whether anything was written.
pub async fn stage_binary(from: &Path, to: &Path) -> Result<bool, StagingError> {
    let from = from.to_path_buf();
    let to = to.to_path_buf();
    tokio::task::spawn_blocking(move || stage_binary_blocking(&from, &to))
        .await
        .map_err(|e| StagingError::Join(e.to_string()))?
}

fn stage_binary_blocking(from: &Path, to: &Path) -> Result<bool, StagingError> {
    let stat = |path: &Path, source| StagingError::Stat {
        path: path.to_path_buf(),
        source,
    };
    let copy_err = |source| StagingError::Copy {
        from: from.to_path_buf(),
        to: to.to_path_buf(),
        source,
    };

    let source_meta = fs::metadata(from).map_err(|e| stat(from, e))?;
    let existing = match fs::metadata(to) {
        Ok(meta) => Some(meta),
        Err(e) if e.kind() == io::ErrorKind::NotFound => None,
        Err(e) => return Err(stat(to, e)),
    };

    if let Some(meta) = &existing {
        if meta.len() == source_meta.len() {
            let theirs = Fingerprint::of(from).map_err(|e| stat(from, e))?;
            let ours = Fingerprint::of(to).map_err(|e| stat(to, e))?;
            if theirs == ours {
                return Ok(false);
            }
        }
        fs::remove_file(to).map_err(|source| StagingError::Remove {
            path: to.to_path_buf(),
            source,
        })?;
    }

    let bytes = fs::read(from).map_err(copy_err)?;
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o755)
        .open(to)
        .map_err(copy_err)?;
    file.write_all(&bytes).map_err(copy_err)?;
    file.sync_all().map_err(copy_err)?;
    let modified = source_meta.modified().map_err(copy_err)?;
    file.set_modified(modified).map_err(copy_err)?;

    tracing::info!(from = %from.display(), to = %to.display(), "staged binary");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::{MetadataExt, PermissionsExt};

    #[tokio::test]
    async fn test_copies_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let from = dir.path().join("geesefs");
        let to = dir.path().join("staged");
        fs::write(&from, b"binary v1").unwrap();

        assert!(stage_binary(&from, &to).await.unwrap());

        assert_eq!(fs::read(&to).unwrap(), b"binary v1");
        let meta = fs::metadata(&to).unwrap();
        assert_eq!(meta.permissions().mode() & 0o777, 0o755);
        assert_eq!(
            meta.modified().unwrap(),
            fs::metadata(&from).unwrap().modified().unwrap()
        );
    }

    #[tokio::test]
    async fn test_identical_content_is_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        let from = dir.path().join("geesefs");
        let to = dir.path().join("staged");
        fs::write(&from, b"binary v1").unwrap();
        stage_binary(&from, &to).await.unwrap();
        let inode = fs::metadata(&to).unwrap().ino();

        // same bytes with a new timestamp
        fs::write(&from, b"binary v1").unwrap();
        assert!(!stage_binary(&from, &to).await.unwrap());
        assert_eq!(fs::metadata(&to).unwrap().ino(), inode);
    }

    #[tokio::test]
    async fn test_same_size_different_content_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let from = dir.path().join("geesefs");
        let to = dir.path().join("staged");
        fs::write(&from, b"binary v2").unwrap();
        fs::write(&to, b"binary v1").unwrap();

        assert!(stage_binary(&from, &to).await.unwrap());
        assert_eq!(fs::read(&to).unwrap(), b"binary v2");
    }

    #[tokio::test]
    async fn test_missing_source() {
        let dir = tempfile::tempdir().unwrap();
        let err = stage_binary(&dir.path().join("nope"), &dir.path().join("staged"))
            .await
            .unwrap_err();
        assert!(matches!(err, StagingError::Stat { .. }));
    }
}
