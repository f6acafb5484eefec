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

//! Camera placement derived from a scene's asset metadata.

use marionette_core::config::AssetMetadata;
use marionette_core::math::Vec3;
use marionette_core::render::CameraOverride;
use serde_json::Value;

/// Reads the camera overrides declared by `meta`.
///
/// Each field prefers the nested `camera` object and falls back to the flat
/// `camera_*` key. Values that are not a numeric triple, or a finite positive
/// field of view, are ignored.
pub fn camera_from_metadata(meta: &AssetMetadata) -> CameraOverride {
    let nested = |key: &str| meta.camera.as_ref().and_then(|c| c.get(key));
    let pick = |key: &str, flat: Option<&Value>| nested(key).or(flat).cloned();

    CameraOverride {
        position: pick("pos", meta.camera_pos.as_ref()).as_ref().and_then(vec3),
        target: pick("target", meta.camera_target.as_ref()).as_ref().and_then(vec3),
        fov: pick("fov", meta.camera_fov.as_ref())
            .and_then(|v| v.as_f64())
            .filter(|fov| fov.is_finite() && *fov > 0.0)
            .map(|fov| fov as f32),
    }
}

fn vec3(value: &Value) -> Option<Vec3> {
    let items = value.as_array()?;
    let numbers: Option<Vec<f64>> = items.iter().map(Value::as_f64).collect();
    Vec3::from_finite(&numbers?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(json: &str) -> AssetMetadata {
        AssetMetadata::from_json(json).unwrap()
    }

    #[test]
    fn test_nested_camera_wins_over_flat_keys() {
        let camera = camera_from_metadata(&meta(
            r#"{"camera": {"pos": [1, 2, 3], "fov": 60}, "camera_pos": [9, 9, 9], "camera_target": [0, 0.5, 0]}"#,
        ));
        assert_eq!(camera.position, Some(Vec3::new(1.0, 2.0, 3.0)));
        assert_eq!(camera.target, Some(Vec3::new(0.0, 0.5, 0.0)));
        assert_eq!(camera.fov, Some(60.0));
    }

    #[test]
    fn test_invalid_values_are_ignored() {
        let camera = camera_from_metadata(&meta(
            r#"{"camera_pos": [1, "two", 3], "camera_target": [1, 2], "camera_fov": -10}"#,
        ));
        assert!(camera.is_empty());
    }

    #[test]
    fn test_no_camera_fields() {
        assert!(camera_from_metadata(&meta("{}")).is_empty());
    }
}
