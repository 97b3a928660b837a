// src/storage/mock.rs

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Result, anyhow, bail};

use super::OutputStorage;

#[derive(Debug, Default)]
struct Inner {
    files: BTreeMap<PathBuf, Vec<u8>>,
    /// `(staging, final)` of every successful publish, in order.
    published: Vec<(PathBuf, PathBuf)>,
    /// Publishing to a final path containing one of these fragments fails.
    fail_publish: Vec<String>,
}

/// In-memory storage for tests. Directories are implicit: a path "exists"
/// when it is a file or a prefix of one.
#[derive(Debug, Clone, Default)]
pub struct MockStorage {
    inner: Arc<Mutex<Inner>>,
}

impl MockStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn add_file(&self, path: impl AsRef<Path>, content: impl Into<Vec<u8>>) {
        self.lock()
            .files
            .insert(path.as_ref().to_path_buf(), content.into());
    }

    /// Make every later publish whose final path contains `fragment` fail.
    pub fn fail_publish_matching(&self, fragment: impl Into<String>) {
        self.lock().fail_publish.push(fragment.into());
    }

    pub fn published(&self) -> Vec<(PathBuf, PathBuf)> {
        self.lock().published.clone()
    }

    /// Every file path currently stored, sorted.
    pub fn paths(&self) -> Vec<PathBuf> {
        self.lock().files.keys().cloned().collect()
    }
}

impl OutputStorage for MockStorage {
    fn write(&self, path: &Path, contents: &[u8]) -> Result<()> {
        self.add_file(path, contents);
        Ok(())
    }

    fn read(&self, path: &Path) -> Result<Vec<u8>> {
        self.lock()
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| anyhow!("file not found: {path:?}"))
    }

    fn exists(&self, path: &Path) -> bool {
        self.lock().files.keys().any(|p| p.starts_with(path))
    }

    fn atomic_publish(&self, staging: &Path, final_path: &Path) -> Result<()> {
        let mut inner = self.lock();
        let target = final_path.to_string_lossy();
        if inner.fail_publish.iter().any(|f| target.contains(f.as_str())) {
            bail!("injected publish failure for {final_path:?}");
        }
        if inner.files.contains_key(final_path) {
            bail!("final output {final_path:?} already exists");
        }
        let Some(content) = inner.files.remove(staging) else {
            bail!("staging output {staging:?} not found");
        };
        inner.files.insert(final_path.to_path_buf(), content);
        inner
            .published
            .push((staging.to_path_buf(), final_path.to_path_buf()));
        Ok(())
    }

    fn discard(&self, path: &Path) -> Result<()> {
        self.lock().files.retain(|p, _| !p.starts_with(path));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_moves_content_and_is_recorded() {
        let storage = MockStorage::new();
        storage.add_file("/out/_temporary/a/map1", "x");

        storage
            .atomic_publish(Path::new("/out/_temporary/a/map1"), Path::new("/out/part-map1-00000"))
            .unwrap();

        assert!(storage.exists(Path::new("/out")));
        assert!(!storage.exists(Path::new("/out/_temporary")));
        assert_eq!(storage.published().len(), 1);
        assert_eq!(
            storage.paths(),
            vec![PathBuf::from("/out/part-map1-00000")]
        );
    }

    #[test]
    fn injected_failure_leaves_staging_in_place() {
        let storage = MockStorage::new();
        storage.add_file("/out/_temporary/a/map1", "x");
        storage.fail_publish_matching("part-map1");

        assert!(
            storage
                .atomic_publish(Path::new("/out/_temporary/a/map1"), Path::new("/out/part-map1-00000"))
                .is_err()
        );
        assert!(storage.exists(Path::new("/out/_temporary/a/map1")));
        assert!(storage.published().is_empty());
    }
}
