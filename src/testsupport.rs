//! Shared testing utilities compiled only for tests.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic counter keeping concurrently created fixture dirs distinct.
static NEXT_FIXTURE_ID: AtomicU64 = AtomicU64::new(0);

/// Self-cleaning unique temp directory for filesystem tests.
pub struct TestTempDir {
    path: PathBuf,
}

impl TestTempDir {
    /// Create a fresh directory under the system temp dir.
    pub fn new(prefix: &str) -> Self {
        let id = NEXT_FIXTURE_ID.fetch_add(1, Ordering::Relaxed);
        let path = std::env::temp_dir().join(format!(
            "webforge-test-{prefix}-{}-{id}",
            std::process::id()
        ));
        std::fs::create_dir_all(&path).expect("create test temp dir");
        Self { path }
    }

    /// Absolute path of the fixture directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write a file (creating parent dirs) relative to the fixture root.
    pub fn write(&self, rel: &str, contents: &str) -> PathBuf {
        let target = self.path.join(rel);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).expect("create parent dirs");
        }
        std::fs::write(&target, contents).expect("write fixture file");
        target
    }
}

impl Drop for TestTempDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_and_removes_directory() {
        let kept_path;
        {
            let fixture = TestTempDir::new("fixture");
            kept_path = fixture.path().to_path_buf();
            assert!(kept_path.is_dir());
        }
        assert!(!kept_path.exists());
    }

    #[test]
    fn write_creates_nested_files() {
        let fixture = TestTempDir::new("nested");
        let path = fixture.write("a/b/c.txt", "hello");
        assert_eq!(std::fs::read_to_string(path).unwrap(), "hello");
    }
}
