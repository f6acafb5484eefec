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

//! Discovery of every file a scene description transitively references.
//!
//! The walk is depth-first from the root document. Each document contributes
//! its compiler directory hints (merged over the inherited ones), then every
//! reference-bearing attribute is resolved by probing an ordered list of
//! candidate directories. Only `<include file=..>` targets are descended into.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};

use crate::fetch::{AssetFetcher, FetchError};
use crate::hints::{search_order, DirectoryHints};
use crate::path::{is_remote, join_path, normalize_path, parent_dir, strip_namespace};

/// Attributes that may point at another file, in scan order.
const REFERENCE_ATTRS: [&str; 9] = [
    "file", "href", "src", "fileup", "fileback", "filedown", "filefront", "fileleft", "fileright",
];

#[derive(Debug, thiserror::Error)]
enum WalkError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("Failed to parse {path}: {message}")]
    Parse { path: String, message: String },
}

/// A resolved attribute value.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Reference {
    /// A local file found under the fetch root.
    Path(String),
    /// A value collected verbatim (remote URLs, archive members).
    Text(String),
}

struct RawReference {
    tag: String,
    attr: &'static str,
    value: String,
}

/// Resolves scene dependency manifests and caches them per root.
pub struct AssetResolver {
    fetcher: Arc<dyn AssetFetcher>,
    cache: Mutex<HashMap<String, Vec<String>>>,
    debug: bool,
}

impl AssetResolver {
    /// Creates a resolver probing through `fetcher`.
    pub fn new(fetcher: Arc<dyn AssetFetcher>) -> Self {
        Self {
            fetcher,
            cache: Mutex::new(HashMap::new()),
            debug: false,
        }
    }

    /// Enables trace logging of every probed candidate.
    #[must_use]
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Returns the sorted, deduplicated set of paths `root` depends on,
    /// including `root` itself.
    ///
    /// `base` is a prefix under the fetcher where the tree lives. This never
    /// fails: an unreadable or unparsable root yields an empty list (which is
    /// not cached), so the caller can fall back to a static manifest. Failures
    /// below the root skip the offending file only.
    pub async fn resolve(&self, root: &str, base: &str) -> Vec<String> {
        let normalized_root = normalize_path(root.trim());
        if normalized_root.is_empty() {
            log::warn!("[AssetResolver] Invalid root path: '{root}'");
            return Vec::new();
        }

        let key = format!("{base}/{normalized_root}");
        if let Some(cached) = self.cache_lock().get(&key) {
            return cached.clone();
        }

        let mut walk = Walk {
            resolver: self,
            base,
            root_dir: parent_dir(&normalized_root).to_owned(),
            visited: HashSet::new(),
            collected: BTreeSet::new(),
        };

        match walk.visit(normalized_root.clone(), DirectoryHints::new()).await {
            Ok(()) => {
                let result: Vec<String> = walk.collected.into_iter().collect();
                log::info!(
                    "[AssetResolver] Analyzed {normalized_root}: found {} assets",
                    result.len()
                );
                self.cache_lock().insert(key, result.clone());
                result
            }
            Err(e) => {
                log::warn!("[AssetResolver] Failed to analyze {normalized_root}: {e}");
                Vec::new()
            }
        }
    }

    /// Forgets every cached manifest.
    pub fn clear_cache(&self) {
        self.cache_lock().clear();
    }

    fn cache_lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<String>>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn resolve_local(&self, value: &str, search_dirs: &[String], base: &str) -> Option<String> {
        if let Some(stripped) = value.strip_prefix('/') {
            if self.fetcher.exists(&join_path([base, value])).await {
                return Some(normalize_path(stripped));
            }
        }

        for dir in search_dirs {
            let candidate = join_path([dir.as_str(), value]);
            let probe = join_path([base, candidate.as_str()]);
            if self.fetcher.exists(&probe).await {
                if self.debug {
                    log::trace!("[AssetResolver] Found: {candidate}");
                }
                return Some(candidate);
            }
            if self.debug {
                log::trace!("[AssetResolver] Not found: {probe}");
            }
        }

        if self.debug {
            log::trace!("[AssetResolver] Could not resolve: {value}");
        }
        None
    }
}

struct Walk<'r> {
    resolver: &'r AssetResolver,
    base: &'r str,
    root_dir: String,
    visited: HashSet<String>,
    collected: BTreeSet<String>,
}

impl Walk<'_> {
    fn visit<'a>(
        &'a mut self,
        path: String,
        parent_hints: DirectoryHints,
    ) -> Pin<Box<dyn Future<Output = Result<(), WalkError>> + Send + 'a>> {
        Box::pin(async move {
            let path = normalize_path(&path);
            if !self.visited.insert(path.clone()) {
                return Ok(());
            }
            self.collected.insert(path.clone());

            let text = self
                .resolver
                .fetcher
                .fetch_text(&join_path([self.base, path.as_str()]))
                .await?;

            let base_dir = parent_dir(&path).to_owned();
            let (hints, references) = {
                let doc = roxmltree::Document::parse(&text).map_err(|e| WalkError::Parse {
                    path: path.clone(),
                    message: e.to_string(),
                })?;
                let local = DirectoryHints::from_document(&doc, &base_dir);
                (parent_hints.merged_with(&local), scan_references(&doc))
            };

            for raw in references {
                let Some(reference) = self.resolve_reference(&raw, &base_dir, &hints).await else {
                    continue;
                };
                match reference {
                    Reference::Path(found) => {
                        self.collected.insert(found.clone());
                        if raw.tag == "include" && raw.attr == "file" {
                            if let Err(e) = self.visit(found.clone(), hints.clone()).await {
                                log::warn!("[AssetResolver] Skipping {found}: {e}");
                            }
                        }
                    }
                    Reference::Text(text) => {
                        self.collected.insert(text);
                    }
                }
            }
            Ok(())
        })
    }

    async fn resolve_reference(
        &self,
        raw: &RawReference,
        base_dir: &str,
        hints: &DirectoryHints,
    ) -> Option<Reference> {
        let value = raw.value.trim();
        if value.is_empty() {
            return None;
        }
        if is_remote(value) {
            return Some(Reference::Text(value.to_owned()));
        }
        if value.to_ascii_lowercase().starts_with("file://") {
            log::warn!("[AssetResolver] file:// URLs are not supported: {value}");
            return None;
        }

        let search_dirs = search_order(&raw.tag, hints, base_dir, &self.root_dir);

        if !value.starts_with('@') {
            if let Some((prefix, member)) = value.split_once('@') {
                if member.is_empty() {
                    log::warn!("[AssetResolver] Invalid archive reference: {value}");
                    return None;
                }
                let archive = self
                    .resolver
                    .resolve_local(prefix, &search_dirs, self.base)
                    .await?;
                return Some(Reference::Text(format!("{archive}@{member}")));
            }
        }

        self.resolver
            .resolve_local(value, &search_dirs, self.base)
            .await
            .map(Reference::Path)
    }
}

/// Lists every reference-bearing attribute, in document order.
fn scan_references(doc: &roxmltree::Document<'_>) -> Vec<RawReference> {
    let mut references = Vec::new();
    for node in doc.descendants().filter(|n| n.is_element()) {
        let tag = node.tag_name().name().to_ascii_lowercase();
        let tag = strip_namespace(&tag).to_owned();
        for attr in REFERENCE_ATTRS {
            if let Some(value) = node.attribute(attr) {
                references.push(RawReference {
                    tag: tag.clone(),
                    attr,
                    value: value.to_owned(),
                });
            }
        }
    }
    references
}
