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

//! `cargo xtask manifest`: writes the static `index.json` that scene loading
//! falls back to when the resolver cannot walk a scene at runtime.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use marionette_assets::manifest::INDEX_FILE;
use marionette_assets::{AssetResolver, LocalFetcher};
use marionette_core::config::AppConfig;
use serde::Serialize;
use walkdir::WalkDir;

use crate::helpers::*;

/// Scene file name picked up by `--scan`.
const SCENE_FILE: &str = "scene.xml";

/// Indexes the scene of every task in an app config.
pub async fn from_config(config_path: &Path, indent: usize) -> Result<()> {
    let start = Instant::now();
    print_task_start("Scene Manifests", PACKAGE, CYAN);

    let text = fs::read_to_string(config_path)
        .with_context(|| format!("Failed to read config '{}'", config_path.display()))?;
    let config = AppConfig::from_json(&text)
        .with_context(|| format!("Invalid config '{}'", config_path.display()))?;
    if config.tasks.is_empty() {
        bail!("Config '{}' lists no tasks", config_path.display());
    }

    let config_dir = config_path.parent().unwrap_or_else(|| Path::new("."));
    let mut written = 0;
    for task in &config.tasks {
        if task.model_xml.trim().is_empty() {
            print_warning(&format!("Skipping task '{}' (no model_xml)", task.name));
            continue;
        }
        let xml_path = config_dir.join(&task.model_xml);
        if !xml_path.is_file() {
            print_warning(&format!(
                "Skipping task '{}' (missing {})",
                task.name,
                xml_path.display()
            ));
            continue;
        }
        write_index(&xml_path, indent).await?;
        written += 1;
    }

    print_success(&format!("Wrote {written} of {} manifests", config.tasks.len()));
    print_elapsed("Manifest", start);
    Ok(())
}

/// Indexes every `scene.xml` found below `dir`.
pub async fn scan(dir: &Path, indent: usize) -> Result<()> {
    let start = Instant::now();
    print_task_start("Scene Manifests", PACKAGE, CYAN);
    if !dir.is_dir() {
        bail!("'{}' is not a directory", dir.display());
    }

    let scenes = find_scenes(dir);
    if scenes.is_empty() {
        print_warning(&format!("No {SCENE_FILE} found under {}", dir.display()));
        return Ok(());
    }
    for scene in &scenes {
        write_index(scene, indent).await?;
    }

    print_success(&format!("Wrote {} manifests", scenes.len()));
    print_elapsed("Manifest", start);
    Ok(())
}

fn find_scenes(dir: &Path) -> Vec<PathBuf> {
    let mut scenes: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                log::warn!("[Manifest] Skipping unreadable entry: {e}");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file() && entry.file_name() == SCENE_FILE)
        .map(|entry| entry.into_path())
        .collect();
    scenes.sort();
    scenes
}

/// Resolves the dependencies of one scene and writes them, relative to the
/// scene directory, to `index.json` beside it.
async fn write_index(xml_path: &Path, indent: usize) -> Result<PathBuf> {
    let scene_dir = xml_path.parent().unwrap_or_else(|| Path::new("."));
    let file_name = xml_path
        .file_name()
        .and_then(|name| name.to_str())
        .with_context(|| format!("Invalid scene path '{}'", xml_path.display()))?;

    let resolver = AssetResolver::new(Arc::new(LocalFetcher::new(scene_dir)));
    let entries = resolver.resolve(file_name, "").await;
    if entries.is_empty() {
        bail!("Could not resolve '{}'", xml_path.display());
    }

    let output = scene_dir.join(INDEX_FILE);
    fs::write(&output, render_index(&entries, indent)?)
        .with_context(|| format!("Failed to write '{}'", output.display()))?;
    println!(
        "{}{} {} {} ({} files){}",
        BOLD,
        GREEN,
        CHECK,
        output.display(),
        entries.len(),
        RESET
    );
    Ok(output)
}

fn render_index(entries: &[String], indent: usize) -> Result<String> {
    let indent = " ".repeat(indent);
    let formatter = serde_json::ser::PrettyFormatter::with_indent(indent.as_bytes());
    let mut out = Vec::new();
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
    entries.serialize(&mut serializer)?;
    Ok(String::from_utf8(out)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(root: &Path, path: &str, contents: &str) {
        let full = root.join(path);
        fs::create_dir_all(full.parent().unwrap()).unwrap();
        fs::write(full, contents).unwrap();
    }

    fn read_index(dir: &Path) -> Vec<String> {
        let text = fs::read_to_string(dir.join(INDEX_FILE)).unwrap();
        serde_json::from_str(&text).unwrap()
    }

    fn go2_scene(root: &Path) {
        write(
            root,
            "scene/go2/scene.xml",
            r#"<mujoco><include file="go2.xml"/></mujoco>"#,
        );
        write(
            root,
            "scene/go2/go2.xml",
            r#"<mujoco><compiler meshdir="assets"/><asset><mesh file="base.stl"/></asset></mujoco>"#,
        );
        write(root, "scene/go2/assets/base.stl", "solid");
    }

    #[test]
    fn test_render_index_honours_indent() {
        let entries = vec!["a.xml".to_owned()];
        assert_eq!(render_index(&entries, 4).unwrap(), "[\n    \"a.xml\"\n]");
    }

    #[tokio::test]
    async fn test_config_writes_index_next_to_each_scene() {
        let dir = tempfile::tempdir().unwrap();
        go2_scene(dir.path());
        write(
            dir.path(),
            "config.json",
            r#"{ "tasks": [
                { "id": "go2", "name": "Go2", "model_xml": "scene/go2/scene.xml" },
                { "id": "bare", "name": "Bare" },
                { "id": "gone", "name": "Gone", "model_xml": "scene/gone/scene.xml" }
            ] }"#,
        );

        from_config(&dir.path().join("config.json"), 2).await.unwrap();

        let scene_dir = dir.path().join("scene/go2");
        assert_eq!(
            read_index(&scene_dir),
            vec!["assets/base.stl", "go2.xml", "scene.xml"]
        );
        assert!(!dir.path().join("scene/gone").exists());
    }

    #[tokio::test]
    async fn test_config_without_tasks_fails() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "config.json", r#"{ "tasks": [] }"#);
        assert!(from_config(&dir.path().join("config.json"), 2).await.is_err());
        assert!(from_config(&dir.path().join("missing.json"), 2).await.is_err());
    }

    #[tokio::test]
    async fn test_scan_indexes_every_scene() {
        let dir = tempfile::tempdir().unwrap();
        go2_scene(dir.path());
        write(dir.path(), "scene/empty/scene.xml", "<mujoco/>");

        scan(dir.path(), 2).await.unwrap();

        assert_eq!(read_index(&dir.path().join("scene/empty")), vec!["scene.xml"]);
        assert_eq!(read_index(&dir.path().join("scene/go2")).len(), 3);
    }
}
