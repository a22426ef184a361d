//! Temporary directory management for tests.
//!
//! [`TestDir`] wraps [`tempfile::TempDir`] with a cleaner API for common test patterns.

// Test utilities are expected to panic on failure - that's their purpose
#![allow(clippy::expect_used)]

use std::{
    fs,
    path::{Path, PathBuf},
};

use tempfile::TempDir;

/// A managed temporary directory for tests.
///
/// The directory is automatically cleaned up when this struct is dropped.
///
/// # Example
///
/// ```
/// use tabula_test_utils::TestDir;
///
/// let dir = TestDir::new();
/// let data_dir = dir.join("data");
/// // Open a store at data_dir...
/// // Directory cleaned up when `dir` goes out of scope
/// ```
pub struct TestDir {
    inner: TempDir,
}

impl TestDir {
    /// Create a new temporary directory.
    ///
    /// # Panics
    ///
    /// Panics if the temporary directory cannot be created.
    #[must_use]
    pub fn new() -> Self {
        let inner = TempDir::new().expect("failed to create temp directory");
        Self { inner }
    }

    /// Returns the path to the temporary directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.inner.path()
    }

    /// Join a relative path to the temporary directory.
    ///
    /// This is a convenience method equivalent to `dir.path().join(path)`.
    #[must_use]
    pub fn join<P: AsRef<Path>>(&self, path: P) -> PathBuf {
        self.inner.path().join(path)
    }

    /// Places a regular file at `path` (relative to this directory) so that a
    /// later attempt to create a directory there fails.
    ///
    /// Used to make one tenant's layer writes fail while others succeed.
    ///
    /// # Panics
    ///
    /// Panics if the blocking file cannot be written.
    pub fn block<P: AsRef<Path>>(&self, path: P) -> PathBuf {
        let target = self.join(path);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).expect("failed to create parent directory");
        }
        fs::write(&target, b"blocked").expect("failed to write blocking file");
        target
    }

    /// Removes a file placed by [`TestDir::block`].
    ///
    /// # Panics
    ///
    /// Panics if the file cannot be removed.
    pub fn unblock<P: AsRef<Path>>(&self, path: P) {
        fs::remove_file(self.join(path)).expect("failed to remove blocking file");
    }

    /// Lists file names directly under `path`, sorted. Missing directories
    /// yield an empty list.
    #[must_use]
    pub fn file_names<P: AsRef<Path>>(&self, path: P) -> Vec<String> {
        let Ok(entries) = fs::read_dir(self.join(path)) else {
            return Vec::new();
        };
        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
            .collect();
        names.sort();
        names
    }
}

impl Default for TestDir {
    fn default() -> Self {
        Self::new()
    }
}
