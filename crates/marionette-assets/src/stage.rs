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

//! Staging of a scene's files into the engine's working directory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::OnceCell;

use crate::fetch::AssetFetcher;
use crate::manifest::{AssetManifest, ManifestError};
use crate::path::parent_dir;
use crate::resolver::AssetResolver;

/// Result of staging one scene.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedScene {
    /// Normalized scene path, relative to the working directory.
    pub scene_path: String,
    /// Files actually written, relative to the working directory.
    pub files: Vec<String>,
}

type StageCell = Arc<OnceCell<Arc<StagedScene>>>;

/// Copies scene dependencies from a fetcher into a local working directory.
///
/// Staging is memoised per scene: concurrent and repeated requests for the
/// same scene share one download. A failed download is forgotten so it can
/// be retried.
pub struct SceneStager {
    fetcher: Arc<dyn AssetFetcher>,
    resolver: Arc<AssetResolver>,
    working_dir: PathBuf,
    memo: Mutex<HashMap<String, StageCell>>,
}

impl SceneStager {
    /// Creates a stager writing under `working_dir`.
    pub fn new(
        fetcher: Arc<dyn AssetFetcher>,
        resolver: Arc<AssetResolver>,
        working_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            fetcher,
            resolver,
            working_dir: working_dir.into(),
            memo: Mutex::new(HashMap::new()),
        }
    }

    /// Directory staged files are written to.
    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// Stages every local dependency of `scene_path`.
    ///
    /// A path without a directory component has nothing to stage.
    pub async fn stage_scene(&self, scene_path: &str) -> Result<Arc<StagedScene>, ManifestError> {
        let normalized = scene_path
            .trim()
            .trim_start_matches("./")
            .trim_start_matches('/')
            .to_owned();
        if parent_dir(&normalized).is_empty() {
            return Ok(Arc::new(StagedScene {
                scene_path: normalized,
                files: Vec::new(),
            }));
        }

        let cell = self
            .memo_lock()
            .entry(normalized.clone())
            .or_default()
            .clone();

        let result = cell
            .get_or_try_init(|| self.download(&normalized))
            .await
            .map(Arc::clone);
        if result.is_err() {
            self.memo_lock().remove(&normalized);
        }
        result
    }

    /// Forgets every memoised staging.
    pub fn clear(&self) {
        self.memo_lock().clear();
    }

    fn memo_lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, StageCell>> {
        self.memo.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn download(&self, scene: &str) -> Result<Arc<StagedScene>, ManifestError> {
        let manifest = AssetManifest::load(self.fetcher.as_ref(), &self.resolver, scene, "").await?;
        let mut files = Vec::new();

        for entry in manifest.local_entries() {
            let bytes = match self.fetcher.fetch_bytes(&entry).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    log::warn!("[SceneStager] Failed to fetch scene asset {entry}: {e}");
                    continue;
                }
            };

            let target = self.working_dir.join(&entry);
            if let Some(parent) = target.parent() {
                if let Err(e) = tokio::fs::create_dir_all(parent).await {
                    log::warn!("[SceneStager] Failed to create {}: {e}", parent.display());
                    continue;
                }
            }
            if let Err(e) = tokio::fs::write(&target, bytes).await {
                log::warn!("[SceneStager] Failed to write {}: {e}", target.display());
                continue;
            }
            files.push(entry);
        }

        log::info!(
            "[SceneStager] Staged {} of {} files for {scene}",
            files.len(),
            manifest.entries().len()
        );
        Ok(Arc::new(StagedScene {
            scene_path: scene.to_owned(),
            files,
        }))
    }
}
