// src/storage/mod.rs

//! Storage collaborator used by the commit protocol.
//!
//! Attempts write into per-attempt staging paths; only a commit grant moves
//! staging output to its final, visible path through
//! [`OutputStorage::atomic_publish`].

use std::fmt::Debug;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use anyhow::{Context, Result, bail};

pub mod layout;
pub mod mock;

pub use mock::MockStorage;

pub trait OutputStorage: Send + Sync + Debug {
    fn write(&self, path: &Path, contents: &[u8]) -> Result<()>;
    fn read(&self, path: &Path) -> Result<Vec<u8>>;
    fn exists(&self, path: &Path) -> bool;

    /// Make `staging` visible as `final_path` in one step. Fails if
    /// `final_path` already exists.
    fn atomic_publish(&self, staging: &Path, final_path: &Path) -> Result<()>;

    /// Remove a file or directory tree. Missing paths are not an error.
    fn discard(&self, path: &Path) -> Result<()>;
}

/// Implementation on top of `std::fs`; publishing is a `rename`.
#[derive(Debug, Clone, Default)]
pub struct LocalFsStorage;

impl OutputStorage for LocalFsStorage {
    fn write(&self, path: &Path, contents: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("creating dir {parent:?}"))?;
        }
        fs::write(path, contents).with_context(|| format!("writing file {path:?}"))
    }

    fn read(&self, path: &Path) -> Result<Vec<u8>> {
        fs::read(path).with_context(|| format!("reading file {path:?}"))
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn atomic_publish(&self, staging: &Path, final_path: &Path) -> Result<()> {
        if final_path.exists() {
            bail!("final output {final_path:?} already exists");
        }
        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("creating dir {parent:?}"))?;
        }
        fs::rename(staging, final_path)
            .with_context(|| format!("publishing {staging:?} as {final_path:?}"))
    }

    fn discard(&self, path: &Path) -> Result<()> {
        let result = if path.is_dir() {
            fs::remove_dir_all(path)
        } else {
            fs::remove_file(path)
        };
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("removing {path:?}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn publish_renames_staging_output() {
        let dir = tempdir().unwrap();
        let staging = dir.path().join("_temporary/attempt_00_000000_0/map1");
        let final_path = dir.path().join("part-map1-00000");
        let storage = LocalFsStorage;

        storage.write(&staging, b"hello").unwrap();
        storage.atomic_publish(&staging, &final_path).unwrap();

        assert!(!storage.exists(&staging));
        assert_eq!(storage.read(&final_path).unwrap(), b"hello");
        assert!(storage.atomic_publish(&staging, &final_path).is_err());
    }

    #[test]
    fn discard_removes_trees_and_ignores_missing() {
        let dir = tempdir().unwrap();
        let tmp = dir.path().join("_temporary");
        let storage = LocalFsStorage;
        storage.write(&tmp.join("a/b"), b"x").unwrap();

        storage.discard(&tmp).unwrap();
        assert!(!tmp.exists());
        storage.discard(&tmp).unwrap();
        assert!(fs::read_dir(dir.path()).unwrap().next().is_none());
    }
}
