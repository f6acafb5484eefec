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

//! Slash-separated path helpers.
//!
//! Asset paths are logical, forward-slash strings relative to a fetch root,
//! never OS paths. `..` segments are clipped at the root instead of escaping it.

/// Collapses repeated separators, `.` and `..` segments.
///
/// A leading `/` is preserved. The result never ends with a separator and is
/// empty for the root.
pub fn normalize_path(path: &str) -> String {
    let is_absolute = path.starts_with('/');
    let mut resolved: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                resolved.pop();
            }
            other => resolved.push(other),
        }
    }
    let joined = resolved.join("/");
    if is_absolute && !joined.is_empty() {
        format!("/{joined}")
    } else {
        joined
    }
}

/// Joins path parts and normalizes the result.
///
/// `.` parts are skipped. The result is absolute only if the first part is.
pub fn join_path<'a>(parts: impl IntoIterator<Item = &'a str>) -> String {
    let parts: Vec<&str> = parts.into_iter().filter(|p| *p != ".").collect();
    let Some(first) = parts.first() else {
        return String::new();
    };
    let absolute = first.starts_with('/');
    let normalized = normalize_path(&parts.join("/"));
    match normalized.strip_prefix('/') {
        Some(relative) if !absolute => relative.to_owned(),
        _ => normalized,
    }
}

/// Returns everything before the last separator, or `""` for a bare file name.
pub fn parent_dir(path: &str) -> &str {
    path.rfind('/').map_or("", |idx| &path[..idx])
}

/// Strips an XML namespace prefix (`ns:tag` → `tag`).
pub fn strip_namespace(tag: &str) -> &str {
    tag.split_once(':').map_or(tag, |(_, local)| local)
}

/// Returns `true` for `http://` and `https://` references, ignoring case.
pub fn is_remote(value: &str) -> bool {
    let lower = value.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_collapses_segments() {
        assert_eq!(normalize_path("a//b/./c/"), "a/b/c");
        assert_eq!(normalize_path("a/b/../c"), "a/c");
        assert_eq!(normalize_path("/a/b/"), "/a/b");
        assert_eq!(normalize_path(""), "");
        assert_eq!(normalize_path("./"), "");
    }

    #[test]
    fn test_normalize_clips_parent_at_root() {
        assert_eq!(normalize_path("../../a"), "a");
        assert_eq!(normalize_path("/.."), "");
        assert_eq!(normalize_path("a/../../b"), "b");
    }

    #[test]
    fn test_join_keeps_absolute_only_from_first_part() {
        assert_eq!(join_path(["scene", "assets/x.stl"]), "scene/assets/x.stl");
        assert_eq!(join_path(["/root", "x"]), "/root/x");
        assert_eq!(join_path(["", "/x"]), "x");
        assert_eq!(join_path([".", "x"]), "x");
        assert_eq!(join_path(["scene", ""]), "scene");
        assert_eq!(join_path(Vec::<&str>::new()), "");
    }

    #[test]
    fn test_parent_dir_and_namespace() {
        assert_eq!(parent_dir("a/b/c.xml"), "a/b");
        assert_eq!(parent_dir("c.xml"), "");
        assert_eq!(strip_namespace("mj:mesh"), "mesh");
        assert_eq!(strip_namespace("mesh"), "mesh");
        assert!(is_remote("HTTPS://example.com/a.png"));
        assert!(!is_remote("file://a.png"));
    }
}
