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

//! Directory hints and the candidate search order.
//!
//! A scene description can declare, on its `<compiler>` element, directories
//! under which a class of references lives (`meshdir`, `texturedir`...). Hints
//! accumulate down an include tree: a child sees its parent's hints followed by
//! its own, so a nested file can add directories but never hide inherited ones.

use crate::path::{join_path, normalize_path};

/// Tags whose references are searched under specific hint attributes first.
const TAG_DIRECTORY_HINTS: &[(&str, &[&str])] = &[
    ("include", &["includedir"]),
    ("mesh", &["meshdir"]),
    ("texture", &["texturedir"]),
    ("heightfield", &["heightfielddir"]),
    ("skin", &["skindir"]),
];

/// Directories probed for every non-include reference, relative to the file.
const COMMON_ASSET_DIRS: [&str; 4] = ["", "assets", "meshes", "textures"];

/// Hint attribute name → directories, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryHints {
    entries: Vec<(String, Vec<String>)>,
}

impl DirectoryHints {
    /// Creates an empty hint set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Extracts hints from every `<compiler>` element of a parsed document.
    ///
    /// Any attribute ending in `dir` or `path` counts. Relative values are
    /// resolved against `base_dir`, the directory of the declaring file.
    pub fn from_document(doc: &roxmltree::Document<'_>, base_dir: &str) -> Self {
        let mut hints = Self::new();
        for compiler in doc
            .descendants()
            .filter(|n| n.is_element() && n.tag_name().name().eq_ignore_ascii_case("compiler"))
        {
            for attr in compiler.attributes() {
                let name = attr.name().to_ascii_lowercase();
                let value = attr.value().trim();
                if value.is_empty() || !(name.ends_with("dir") || name.ends_with("path")) {
                    continue;
                }
                let dir = if value.starts_with('/') || base_dir.is_empty() {
                    normalize_path(value)
                } else {
                    join_path([base_dir, value])
                };
                hints.push(&name, dir);
            }
        }
        hints
    }

    /// Appends a directory under `key`.
    pub fn push(&mut self, key: &str, dir: String) {
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some((_, dirs)) => dirs.push(dir),
            None => self.entries.push((key.to_owned(), vec![dir])),
        }
    }

    /// Directories declared under `key`.
    pub fn get(&self, key: &str) -> &[String] {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map_or(&[], |(_, dirs)| dirs.as_slice())
    }

    /// Returns `true` if no hint is declared.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Combines inherited hints with a file's own: parent directories first,
    /// then the child's, with duplicates removed per key.
    pub fn merged_with(&self, local: &DirectoryHints) -> DirectoryHints {
        let mut merged = self.clone();
        for (key, dirs) in &local.entries {
            for dir in dirs {
                merged.push(key, dir.clone());
            }
        }
        for (_, dirs) in &mut merged.entries {
            dedup_in_order(dirs);
        }
        merged
    }

    fn all_dirs(&self) -> impl Iterator<Item = &String> {
        self.entries.iter().flat_map(|(_, dirs)| dirs.iter())
    }
}

fn dedup_in_order(items: &mut Vec<String>) {
    let mut seen = std::collections::HashSet::new();
    items.retain(|item| seen.insert(item.clone()));
}

/// Builds the ordered list of directories to probe for a reference found on
/// `tag` inside a file living in `base_dir`.
///
/// Include references look in their own folder first. Every other reference
/// tries the tag's hinted directories, then the common asset folders, then any
/// hinted directory, then the file's folder and the fetch root. The scene
/// root directory comes last.
pub fn search_order(tag: &str, hints: &DirectoryHints, base_dir: &str, root_dir: &str) -> Vec<String> {
    let is_include = tag == "include";
    let mut order: Vec<String> = Vec::new();

    if is_include {
        if !base_dir.is_empty() {
            order.push(base_dir.to_owned());
        }
        order.push(String::new());
    }

    if let Some((_, keys)) = TAG_DIRECTORY_HINTS.iter().find(|(t, _)| *t == tag) {
        for key in *keys {
            order.extend(hints.get(key).iter().cloned());
        }
    }

    if !is_include {
        for common in COMMON_ASSET_DIRS {
            if base_dir.is_empty() {
                order.push(common.to_owned());
            } else {
                order.push(join_path([base_dir, common]));
            }
        }
    }

    order.extend(hints.all_dirs().cloned());

    if !is_include {
        if !base_dir.is_empty() {
            order.push(base_dir.to_owned());
        }
        order.push(String::new());
    }

    if !root_dir.is_empty() {
        order.push(root_dir.to_owned());
    }

    dedup_in_order(&mut order);
    order
}
