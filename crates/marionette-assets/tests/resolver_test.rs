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

use anyhow::Result;
use marionette_assets::{AssetResolver, LocalFetcher, MemoryFetcher, SceneStager};
use std::sync::Arc;
use tempfile::tempdir;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

const GO2_SCENE: &str = r#"
<mujoco model="go2 scene">
  <include file="go2.xml"/>
  <asset>
    <texture type="skybox" builtin="gradient" width="512" height="3072"/>
    <texture name="groundplane" file="grid.png"/>
  </asset>
</mujoco>"#;

const GO2_ROBOT: &str = r#"
<mujoco model="go2">
  <compiler angle="radian" meshdir="assets"/>
  <asset>
    <mesh file="base_0.obj"/>
    <mesh file="hip.stl"/>
    <texture name="logo" file="https://cdn.example.com/logo.png"/>
    <skin file="skins.zip@body.skn"/>
  </asset>
</mujoco>"#;

fn go2_tree() -> MemoryFetcher {
    MemoryFetcher::new()
        .with_file("go2/scene.xml", GO2_SCENE)
        .with_file("go2/go2.xml", GO2_ROBOT)
        .with_file("go2/grid.png", "png")
        .with_file("go2/assets/base_0.obj", "obj")
        .with_file("go2/assets/hip.stl", "stl")
        .with_file("go2/skins.zip", "zip")
        // Present on the server but never referenced.
        .with_file("go2/assets/unused.stl", "stl")
        .with_file("spot/scene.xml", "<mujoco/>")
}

#[tokio::test]
async fn test_resolves_every_reachable_reference() -> Result<()> {
    init_logging();
    let resolver = AssetResolver::new(Arc::new(go2_tree()));

    let manifest = resolver.resolve("go2/scene.xml", "").await;

    assert_eq!(
        manifest,
        vec![
            "go2/assets/base_0.obj",
            "go2/assets/hip.stl",
            "go2/go2.xml",
            "go2/grid.png",
            "go2/scene.xml",
            "go2/skins.zip@body.skn",
            "https://cdn.example.com/logo.png",
        ]
    );
    assert!(!manifest.iter().any(|p| p.contains("unused") || p.starts_with("spot")));
    Ok(())
}

#[tokio::test]
async fn test_cyclic_includes_visit_each_file_once() -> Result<()> {
    init_logging();
    let fetcher = Arc::new(
        MemoryFetcher::new()
            .with_file("loop/a.xml", r#"<mujoco><include file="b.xml"/></mujoco>"#)
            .with_file("loop/b.xml", r#"<mujoco><include file="a.xml"/></mujoco>"#),
    );
    let resolver = AssetResolver::new(fetcher.clone());

    let manifest = resolver.resolve("loop/a.xml", "").await;

    assert_eq!(manifest, vec!["loop/a.xml", "loop/b.xml"]);
    // One read per document: a.xml is never fetched a second time.
    assert_eq!(fetcher.read_count(), 2);
    Ok(())
}

#[tokio::test]
async fn test_tag_hint_wins_over_generic_directory() -> Result<()> {
    init_logging();
    let fetcher = MemoryFetcher::new()
        .with_file(
            "robot/scene.xml",
            r#"<mujoco><compiler meshdir="parts"/><asset><mesh file="leg.stl"/></asset></mujoco>"#,
        )
        .with_file("robot/parts/leg.stl", "hinted")
        .with_file("robot/assets/leg.stl", "generic")
        .with_file("robot/leg.stl", "local");
    let resolver = AssetResolver::new(Arc::new(fetcher));

    let manifest = resolver.resolve("robot/scene.xml", "").await;

    assert_eq!(manifest, vec!["robot/parts/leg.stl", "robot/scene.xml"]);
    Ok(())
}

#[tokio::test]
async fn test_child_hints_extend_parent_hints() -> Result<()> {
    init_logging();
    let fetcher = MemoryFetcher::new()
        .with_file(
            "r/scene.xml",
            r#"<mujoco><compiler meshdir="shared"/><include file="sub/arm.xml"/></mujoco>"#,
        )
        .with_file(
            "r/sub/arm.xml",
            r#"<mujoco><compiler meshdir="own"/><mesh file="a.stl"/><mesh file="b.stl"/></mujoco>"#,
        )
        .with_file("r/shared/a.stl", "a")
        .with_file("r/sub/own/b.stl", "b");
    let resolver = AssetResolver::new(Arc::new(fetcher));

    let manifest = resolver.resolve("r/scene.xml", "").await;

    assert!(manifest.contains(&"r/shared/a.stl".to_string()));
    assert!(manifest.contains(&"r/sub/own/b.stl".to_string()));
    Ok(())
}

#[tokio::test]
async fn test_second_resolve_hits_the_cache() -> Result<()> {
    init_logging();
    let fetcher = Arc::new(go2_tree());
    let resolver = AssetResolver::new(fetcher.clone());

    let first = resolver.resolve("go2/scene.xml", "").await;
    let (probes, reads) = (fetcher.probe_count(), fetcher.read_count());
    let second = resolver.resolve("./go2//scene.xml", "").await;

    assert_eq!(first, second);
    assert_eq!(fetcher.probe_count(), probes);
    assert_eq!(fetcher.read_count(), reads);

    resolver.clear_cache();
    resolver.resolve("go2/scene.xml", "").await;
    assert!(fetcher.read_count() > reads);
    Ok(())
}

#[tokio::test]
async fn test_broken_include_is_skipped() -> Result<()> {
    init_logging();
    let fetcher = MemoryFetcher::new()
        .with_file(
            "s/scene.xml",
            r#"<mujoco><include file="bad.xml"/><texture file="t.png"/></mujoco>"#,
        )
        .with_file("s/bad.xml", "<mujoco><unclosed></mujoco>")
        .with_file("s/t.png", "png");
    let resolver = AssetResolver::new(Arc::new(fetcher));

    let manifest = resolver.resolve("s/scene.xml", "").await;

    assert_eq!(manifest, vec!["s/bad.xml", "s/scene.xml", "s/t.png"]);
    Ok(())
}

#[tokio::test]
async fn test_empty_archive_member_is_dropped() -> Result<()> {
    init_logging();
    let fetcher = MemoryFetcher::new()
        .with_file("s/scene.xml", r#"<mujoco><skin file="pack.zip@"/></mujoco>"#)
        .with_file("s/pack.zip", "zip");
    let resolver = AssetResolver::new(Arc::new(fetcher));

    assert_eq!(resolver.resolve("s/scene.xml", "").await, vec!["s/scene.xml"]);
    Ok(())
}

#[tokio::test]
async fn test_staging_writes_local_files() -> Result<()> {
    init_logging();
    let work = tempdir()?;
    let fetcher = Arc::new(go2_tree());
    let resolver = Arc::new(AssetResolver::new(fetcher.clone()));
    let stager = SceneStager::new(fetcher.clone(), resolver, work.path());

    let staged = stager.stage_scene("./go2/scene.xml").await?;

    assert_eq!(staged.scene_path, "go2/scene.xml");
    assert!(work.path().join("go2/scene.xml").is_file());
    assert!(work.path().join("go2/assets/hip.stl").is_file());
    assert!(!work.path().join("go2/assets/unused.stl").exists());
    // Archive members are not files on the server.
    assert!(!staged.files.iter().any(|f| f.contains('@')));

    let reads = fetcher.read_count();
    let again = stager.stage_scene("go2/scene.xml").await?;
    assert_eq!(again.files, staged.files);
    assert_eq!(fetcher.read_count(), reads);
    Ok(())
}

#[tokio::test]
async fn test_staging_falls_back_to_static_index() -> Result<()> {
    init_logging();
    let src = tempdir()?;
    let work = tempdir()?;
    std::fs::create_dir_all(src.path().join("arm/meshes"))?;
    // The scene itself is unparsable, so the resolver yields nothing.
    std::fs::write(src.path().join("arm/scene.xml"), "<mujoco")?;
    std::fs::write(src.path().join("arm/meshes/link.stl"), "stl")?;
    std::fs::write(
        src.path().join("arm/index.json"),
        r#"["scene.xml", "meshes/link.stl", "missing.png"]"#,
    )?;

    let fetcher = Arc::new(LocalFetcher::new(src.path()));
    let resolver = Arc::new(AssetResolver::new(fetcher.clone()));
    let stager = SceneStager::new(fetcher, resolver, work.path());

    let staged = stager.stage_scene("arm/scene.xml").await?;

    assert_eq!(staged.files, vec!["arm/scene.xml", "arm/meshes/link.stl"]);
    assert_eq!(std::fs::read_to_string(work.path().join("arm/meshes/link.stl"))?, "stl");
    Ok(())
}

#[tokio::test]
async fn test_failed_staging_can_be_retried() -> Result<()> {
    init_logging();
    let work = tempdir()?;
    let src = tempdir()?;
    let fetcher = Arc::new(LocalFetcher::new(src.path()));
    let resolver = Arc::new(AssetResolver::new(fetcher.clone()));
    let stager = SceneStager::new(fetcher, resolver, work.path());

    assert!(stager.stage_scene("late/scene.xml").await.is_err());

    std::fs::create_dir_all(src.path().join("late"))?;
    std::fs::write(src.path().join("late/scene.xml"), "<mujoco/>")?;
    let staged = stager.stage_scene("late/scene.xml").await?;
    assert_eq!(staged.files, vec!["late/scene.xml"]);
    Ok(())
}
