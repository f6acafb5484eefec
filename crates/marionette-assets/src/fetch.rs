// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Fetch collaborators used by the resolver and the stager.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::path::normalize_path;

/// Errors raised while fetching an asset.
///
/// Callers must be able to tell a missing file from a broken transport, since
/// only the former is an expected outcome of a probe.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The asset does not exist.
    #[error("Asset not found: {path}")]
    NotFound {
        /// Requested path.
        path: String,
    },
    /// The asset could not be read for another reason.
    #[error("Failed to fetch {path}: {message}")]
    Transport {
        /// Requested path.
        path: String,
        /// Underlying failure.
        message: String,
    },
}

impl FetchError {
    /// Returns `true` for [`FetchError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, FetchError::NotFound { .. })
    }
}

/// Read access to a tree of assets addressed by slash-separated paths.
#[async_trait]
pub trait AssetFetcher: Send + Sync {
    /// Probes whether `path` exists. Never fails; transport errors read as absent.
    async fn exists(&self, path: &str) -> bool;

    /// Reads the raw bytes at `path`.
    async fn fetch_bytes(&self, path: &str) -> Result<Vec<u8>, FetchError>;

    /// Reads `path` as UTF-8 text.
    async fn fetch_text(&self, path: &str) -> Result<String, FetchError> {
        let bytes = self.fetch_bytes(path).await?;
        String::from_utf8(bytes).map_err(|e| FetchError::Transport {
            path: path.to_owned(),
            message: e.to_string(),
        })
    }
}

/// Serves assets from a directory on disk.
#[derive(Debug, Clone)]
pub struct LocalFetcher {
    root: PathBuf,
}

impl LocalFetcher {
    /// Creates a fetcher rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The directory served by this fetcher.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn locate(&self, path: &str) -> PathBuf {
        let relative = normalize_path(path);
        let relative = relative.trim_start_matches('/');
        if relative.is_empty() {
            self.root.clone()
        } else {
            self.root.join(relative)
        }
    }
}

#[async_trait]
impl AssetFetcher for LocalFetcher {
    async fn exists(&self, path: &str) -> bool {
        tokio::fs::metadata(self.locate(path))
            .await
            .is_ok_and(|meta| meta.is_file())
    }

    async fn fetch_bytes(&self, path: &str) -> Result<Vec<u8>, FetchError> {
        tokio::fs::read(self.locate(path)).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                FetchError::NotFound {
                    path: path.to_owned(),
                }
            } else {
                FetchError::Transport {
                    path: path.to_owned(),
                    message: e.to_string(),
                }
            }
        })
    }
}

/// An in-memory asset tree.
///
/// Counts probes and reads so callers can observe caching.
#[derive(Debug, Default)]
pub struct MemoryFetcher {
    files: HashMap<String, Vec<u8>>,
    failing: HashMap<String, String>,
    delay: Option<Duration>,
    probes: AtomicUsize,
    reads: AtomicUsize,
}

impl MemoryFetcher {
    /// Creates an empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a file.
    #[must_use]
    pub fn with_file(mut self, path: &str, contents: impl Into<Vec<u8>>) -> Self {
        self.insert(path, contents);
        self
    }

    /// Makes every read of `path` fail with a transport error.
    #[must_use]
    pub fn with_failure(mut self, path: &str, message: &str) -> Self {
        self.failing.insert(normalize_path(path), message.to_owned());
        self
    }

    /// Delays every read, to widen race windows in tests.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Adds or replaces a file.
    pub fn insert(&mut self, path: &str, contents: impl Into<Vec<u8>>) {
        self.files.insert(normalize_path(path), contents.into());
    }

    /// Number of `exists` calls so far.
    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    /// Number of `fetch_bytes`/`fetch_text` calls so far.
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AssetFetcher for MemoryFetcher {
    async fn exists(&self, path: &str) -> bool {
        self.probes.fetch_add(1, Ordering::SeqCst);
        self.files.contains_key(&normalize_path(path))
    }

    async fn fetch_bytes(&self, path: &str) -> Result<Vec<u8>, FetchError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let key = normalize_path(path);
        if let Some(message) = self.failing.get(&key) {
            return Err(FetchError::Transport {
                path: path.to_owned(),
                message: message.clone(),
            });
        }
        self.files
            .get(&key)
            .cloned()
            .ok_or_else(|| FetchError::NotFound {
                path: path.to_owned(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_fetcher_distinguishes_failures() {
        let fetcher = MemoryFetcher::new()
            .with_file("a/b.xml", "<mujoco/>")
            .with_failure("broken.xml", "connection reset");

        assert!(fetcher.exists("a//b.xml").await);
        assert_eq!(fetcher.fetch_text("a/./b.xml").await.unwrap(), "<mujoco/>");
        assert!(fetcher.fetch_bytes("missing.xml").await.unwrap_err().is_not_found());
        assert!(!fetcher.fetch_bytes("broken.xml").await.unwrap_err().is_not_found());
        assert_eq!(fetcher.probe_count(), 1);
        assert_eq!(fetcher.read_count(), 3);
    }

    #[tokio::test]
    async fn test_local_fetcher_reads_under_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("scene")).unwrap();
        std::fs::write(dir.path().join("scene/a.xml"), "<a/>").unwrap();

        let fetcher = LocalFetcher::new(dir.path());
        assert!(fetcher.exists("scene/a.xml").await);
        assert!(fetcher.exists("/scene/a.xml").await);
        assert!(!fetcher.exists("scene").await);
        assert_eq!(fetcher.fetch_text("scene/a.xml").await.unwrap(), "<a/>");
        assert!(fetcher.fetch_bytes("nope").await.unwrap_err().is_not_found());
    }
}
