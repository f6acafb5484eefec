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

//! Dependency manifests for a scene, with the static `index.json` fallback.

use crate::fetch::AssetFetcher;
use crate::path::{is_remote, join_path, normalize_path, parent_dir};
use crate::resolver::AssetResolver;

/// Name of the static manifest expected next to a scene file.
pub const INDEX_FILE: &str = "index.json";

/// Errors raised while building a manifest.
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    /// Neither the resolver nor the static index produced a manifest.
    #[error("No asset manifest for {scene}: {reason}")]
    Unavailable {
        /// Normalized scene path.
        scene: String,
        /// Why the static index could not be used.
        reason: String,
    },
}

/// Where a manifest came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestSource {
    /// Discovered by walking the scene description.
    Resolved,
    /// Read from the scene directory's `index.json`.
    StaticIndex,
}

/// The set of paths a scene depends on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetManifest {
    scene: String,
    source: ManifestSource,
    entries: Vec<String>,
}

impl AssetManifest {
    /// Builds the manifest for `scene`, trying the resolver first and the
    /// static index second.
    pub async fn load(
        fetcher: &dyn AssetFetcher,
        resolver: &AssetResolver,
        scene: &str,
        base: &str,
    ) -> Result<Self, ManifestError> {
        let scene = normalize_path(scene);
        let resolved = resolver.resolve(&scene, base).await;
        if !resolved.is_empty() {
            return Ok(Self {
                scene,
                source: ManifestSource::Resolved,
                entries: resolved,
            });
        }

        log::warn!("[AssetManifest] Resolver found nothing for {scene}, falling back to {INDEX_FILE}");
        let scene_dir = parent_dir(&scene).to_owned();
        let index_path = join_path([base, scene_dir.as_str(), INDEX_FILE]);
        let unavailable = |reason: String| ManifestError::Unavailable {
            scene: scene.clone(),
            reason,
        };

        let text = fetcher
            .fetch_text(&index_path)
            .await
            .map_err(|e| unavailable(e.to_string()))?;
        let listed: Vec<String> =
            serde_json::from_str(&text).map_err(|e| unavailable(format!("invalid {index_path}: {e}")))?;

        let entries = listed
            .iter()
            .map(|entry| {
                if is_remote(entry) {
                    entry.clone()
                } else {
                    join_path([scene_dir.as_str(), entry.as_str()])
                }
            })
            .collect();

        Ok(Self {
            scene,
            source: ManifestSource::StaticIndex,
            entries,
        })
    }

    /// Normalized scene path this manifest belongs to.
    pub fn scene(&self) -> &str {
        &self.scene
    }

    /// Where the entries came from.
    pub fn source(&self) -> ManifestSource {
        self.source
    }

    /// Every entry, remote URLs included.
    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    /// Entries that can be staged locally: remote URLs dropped, paths
    /// normalized and made relative, duplicates removed in order.
    pub fn local_entries(&self) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        self.entries
            .iter()
            .filter(|entry| !entry.starts_with("http://") && !entry.starts_with("https://"))
            .filter_map(|entry| {
                let normalized = normalize_path(entry.trim());
                let relative = normalized.trim_start_matches('/');
                if relative.is_empty() {
                    log::warn!("[AssetManifest] Skipping asset with empty path: '{entry}'");
                    None
                } else {
                    Some(relative.to_owned())
                }
            })
            .filter(|entry| seen.insert(entry.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::MemoryFetcher;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_static_index_is_relative_to_scene_dir() {
        let fetcher = Arc::new(MemoryFetcher::new().with_file(
            "go2/index.json",
            r#"["scene.xml", "assets/base.stl", "https://cdn.example.com/t.png"]"#,
        ));
        let resolver = AssetResolver::new(fetcher.clone());

        let manifest = AssetManifest::load(fetcher.as_ref(), &resolver, "go2/scene.xml", "")
            .await
            .unwrap();
        assert_eq!(manifest.source(), ManifestSource::StaticIndex);
        assert_eq!(
            manifest.entries(),
            ["go2/scene.xml", "go2/assets/base.stl", "https://cdn.example.com/t.png"]
        );
        assert_eq!(manifest.local_entries(), vec!["go2/scene.xml", "go2/assets/base.stl"]);
    }

    #[tokio::test]
    async fn test_missing_index_is_unavailable() {
        let fetcher = Arc::new(MemoryFetcher::new());
        let resolver = AssetResolver::new(fetcher.clone());
        let err = AssetManifest::load(fetcher.as_ref(), &resolver, "go2/scene.xml", "")
            .await
            .unwrap_err();
        assert!(matches!(err, ManifestError::Unavailable { ref scene, .. } if scene == "go2/scene.xml"));
    }

    #[test]
    fn test_local_entries_normalize_and_dedup() {
        let manifest = AssetManifest {
            scene: "s/scene.xml".into(),
            source: ManifestSource::Resolved,
            entries: vec![
                "/s/a.stl".into(),
                "s/./a.stl".into(),
                "http://x/y.png".into(),
                "/".into(),
                "s/b.png".into(),
            ],
        };
        assert_eq!(manifest.local_entries(), vec!["s/a.stl", "s/b.png"]);
    }
}
