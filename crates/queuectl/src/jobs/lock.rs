use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use fs4::fs_std::FileExt;

use crate::jobs::error::StoreError;

pub const LOCK_FILE: &str = ".lock";

/// Exclusive advisory lock on `<data_dir>/.lock`.
///
/// Every handle on a data directory (the worker process, a CLI invocation,
/// a second `JobStore` in the same process) takes it around each
/// read-modify-write, so their cycles never interleave.
#[derive(Debug, Clone)]
pub struct DirLock {
    path: PathBuf,
}

/// Held for the duration of one store operation; unlocks on drop.
#[derive(Debug)]
pub struct DirLockGuard {
    _file: File,
}

impl DirLock {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            path: data_dir.as_ref().join(LOCK_FILE),
        }
    }

    pub async fn acquire(&self) -> Result<DirLockGuard, StoreError> {
        let path = self.path.clone();
        let locked = tokio::task::spawn_blocking(move || lock_blocking(&path))
            .await
            .unwrap_or_else(|join| Err(io::Error::other(join)));

        locked
            .map(|file| DirLockGuard { _file: file })
            .map_err(|source| StoreError::Lock {
                path: self.path.clone(),
                source,
            })
    }
}

fn lock_blocking(path: &Path) -> io::Result<File> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(path)?;
    file.lock_exclusive()?;
    Ok(file)
}
