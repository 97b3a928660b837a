// src/storage/layout.rs

//! Where attempts stage their output and where committed output lands.
//!
//! ```text
//! <commit_dir>/_temporary/<attempt_id>/<vertex>   staging, one per attempt
//! <commit_dir>/part-<vertex>-<task:05>            committed, one per task
//! ```

use std::path::{Path, PathBuf};

use crate::types::AttemptId;

pub const TEMPORARY_DIR: &str = "_temporary";

pub fn temporary_dir(commit_dir: &Path) -> PathBuf {
    commit_dir.join(TEMPORARY_DIR)
}

pub fn staging_path(commit_dir: &Path, attempt: AttemptId, vertex: &str) -> PathBuf {
    temporary_dir(commit_dir)
        .join(attempt.to_string())
        .join(vertex)
}

pub fn final_path(commit_dir: &Path, vertex: &str, task_index: u32) -> PathBuf {
    commit_dir.join(format!("part-{vertex}-{task_index:05}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{TaskId, VertexId};

    #[test]
    fn staging_and_final_paths() {
        let dir = Path::new("/out/parts");
        let attempt = AttemptId::new(TaskId::new(VertexId(1), 3), 2);
        assert_eq!(
            staging_path(dir, attempt, "map2"),
            PathBuf::from("/out/parts/_temporary/attempt_01_000003_2/map2")
        );
        assert_eq!(
            final_path(dir, "map2", 3),
            PathBuf::from("/out/parts/part-map2-00003")
        );
    }
}
