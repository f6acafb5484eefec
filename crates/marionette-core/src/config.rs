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

//! Configuration surfaces consumed by the runtime.
//!
//! These documents are authored by hand next to the scene files: the app
//! configuration listing tasks and policies, the per-policy descriptor, the
//! per-scene asset metadata, and recorded trajectories. All parsing is lenient
//! about optional fields and strict about the fields the runtime cannot work
//! without.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Error type for configuration documents.
#[derive(Debug)]
pub enum ConfigError {
    /// The document is not valid JSON for its schema.
    Parse {
        /// Which document failed.
        document: &'static str,
        /// Underlying parser error.
        source: serde_json::Error,
    },
    /// A field the runtime requires is absent.
    MissingField {
        /// Which document is incomplete.
        document: &'static str,
        /// Dotted path of the missing field.
        field: &'static str,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Parse { document, source } => {
                write!(f, "Malformed {document}: {source}")
            }
            ConfigError::MissingField { document, field } => {
                write!(f, "Malformed {document}: missing '{field}'")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Parse { source, .. } => Some(source),
            ConfigError::MissingField { .. } => None,
        }
    }
}

fn parse<T: for<'de> Deserialize<'de>>(document: &'static str, text: &str) -> Result<T, ConfigError> {
    serde_json::from_str(text).map_err(|source| ConfigError::Parse { document, source })
}

// ─────────────────────────────────────────────────────────────────────
// App configuration
// ─────────────────────────────────────────────────────────────────────

/// Top-level list of tasks shown to the user.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Display name of the project.
    #[serde(default)]
    pub project_name: Option<String>,
    /// Link to the project page.
    #[serde(default)]
    pub project_link: Option<String>,
    /// Every scene the user can pick.
    pub tasks: Vec<TaskConfig>,
}

impl AppConfig {
    /// Parses an app configuration.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        parse("app config", text)
    }
}

/// Camera placement declared on a task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskCamera {
    /// Camera position.
    #[serde(default)]
    pub position: Option<[f32; 3]>,
    /// Look-at target.
    #[serde(default)]
    pub target: Option<[f32; 3]>,
    /// Field of view in degrees.
    #[serde(default)]
    pub fov: Option<f32>,
}

/// One scene with the policies that can drive it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    /// Stable identifier.
    pub id: String,
    /// Display name, matched case-insensitively.
    pub name: String,
    /// Root scene description, relative to the fetch root. Empty when the
    /// task has no scene of its own.
    #[serde(default)]
    pub model_xml: String,
    /// Asset metadata document.
    #[serde(default)]
    pub asset_meta: Option<String>,
    /// Camera placement.
    #[serde(default)]
    pub camera: Option<TaskCamera>,
    /// Policy id selected when none is requested.
    #[serde(default)]
    pub default_policy: Option<String>,
    /// Policies available for this task.
    #[serde(default)]
    pub policies: Vec<PolicyConfigItem>,
}

/// One selectable policy of a task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyConfigItem {
    /// Stable identifier.
    pub id: String,
    /// Display name, matched case-insensitively.
    pub name: String,
    /// Policy descriptor document. `None` means no learned policy.
    #[serde(default)]
    pub path: Option<String>,
    /// Free-form policy kind.
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    /// Scene override for this policy.
    #[serde(default)]
    pub model_xml: Option<String>,
    /// Asset metadata override for this policy.
    #[serde(default)]
    pub asset_meta: Option<String>,
    /// Which UI controls the policy wants exposed.
    #[serde(default)]
    pub ui_controls: Vec<String>,
    /// Whether the setpoint marker starts visible.
    #[serde(default)]
    pub show_setpoint: Option<bool>,
}

/// The three paths handed to `load_environment`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentPaths {
    /// Root scene description.
    pub scene: String,
    /// Asset metadata.
    pub meta: Option<String>,
    /// Policy descriptor.
    pub policy: Option<String>,
}

impl TaskConfig {
    /// Combines the task with one of its policies, honoring the policy's
    /// scene and metadata overrides.
    pub fn environment_for(&self, policy: Option<&PolicyConfigItem>) -> EnvironmentPaths {
        EnvironmentPaths {
            scene: policy
                .and_then(|p| p.model_xml.clone())
                .unwrap_or_else(|| self.model_xml.clone()),
            meta: policy
                .and_then(|p| p.asset_meta.clone())
                .or_else(|| self.asset_meta.clone()),
            policy: policy.and_then(|p| p.path.clone()),
        }
    }
}

/// Returns the policy id to select for `task` when none was requested.
pub fn resolve_default_policy(task: Option<&TaskConfig>) -> Option<String> {
    let task = task?;
    task.default_policy
        .clone()
        .or_else(|| task.policies.first().map(|p| p.id.clone()))
}

/// Finds a task by display name, ignoring case.
pub fn find_task_by_name<'a>(config: &'a AppConfig, name: &str) -> Option<&'a TaskConfig> {
    config
        .tasks
        .iter()
        .find(|t| t.name.to_lowercase() == name.to_lowercase())
}

/// Finds a policy of `task` by display name, ignoring case.
pub fn find_policy_by_name<'a>(task: &'a TaskConfig, name: &str) -> Option<&'a PolicyConfigItem> {
    task.policies
        .iter()
        .find(|p| p.name.to_lowercase() == name.to_lowercase())
}

// ─────────────────────────────────────────────────────────────────────
// Policy descriptor
// ─────────────────────────────────────────────────────────────────────

/// A gain or scale given as one value for every joint or as a per-joint list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    /// The same value for every joint.
    Scalar(f32),
    /// One entry per joint; `null` entries take the fallback.
    PerJoint(Vec<Option<f32>>),
}

impl ParamValue {
    /// Expands an optional parameter to exactly `n` values.
    ///
    /// Missing values, short lists and `null` entries are filled with
    /// `fallback`; extra list entries are ignored.
    pub fn resolve(value: Option<&ParamValue>, n: usize, fallback: f32) -> Vec<f32> {
        match value {
            Some(ParamValue::Scalar(v)) => vec![*v; n],
            Some(ParamValue::PerJoint(values)) => (0..n)
                .map(|i| values.get(i).copied().flatten().unwrap_or(fallback))
                .collect(),
            None => vec![fallback; n],
        }
    }
}

/// Input and output key declarations of a policy network.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OnnxMeta {
    /// Logical input names, bound positionally to the network inputs.
    #[serde(default)]
    pub in_keys: Option<Vec<String>>,
    /// Logical output names, bound positionally to the network outputs.
    #[serde(default)]
    pub out_keys: Vec<String>,
}

/// Location and metadata of a policy network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnnxSpec {
    /// Network file, relative to the fetch root.
    pub path: String,
    /// Key declarations.
    pub meta: OnnxMeta,
}

/// Everything the runtime needs to run a learned policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyDescriptor {
    /// `joint_position` (default) or `torque`.
    #[serde(default)]
    pub control_type: Option<String>,
    /// Action scale.
    #[serde(default)]
    pub action_scale: Option<ParamValue>,
    /// Proportional gains.
    #[serde(default)]
    pub stiffness: Option<ParamValue>,
    /// Derivative gains.
    #[serde(default)]
    pub damping: Option<ParamValue>,
    /// Observation groups, in declaration order.
    #[serde(default)]
    pub obs_config: Map<String, Value>,
    /// Policy network.
    #[serde(default)]
    pub onnx: Option<OnnxSpec>,
}

impl PolicyDescriptor {
    /// Parses a policy descriptor.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        parse("policy descriptor", text)
    }

    /// Returns the network spec, failing if it or its input keys are absent.
    pub fn network(&self) -> Result<(&OnnxSpec, &[String]), ConfigError> {
        let spec = self.onnx.as_ref().ok_or(ConfigError::MissingField {
            document: "policy descriptor",
            field: "onnx",
        })?;
        let in_keys = spec.meta.in_keys.as_deref().ok_or(ConfigError::MissingField {
            document: "policy descriptor",
            field: "onnx.meta.in_keys",
        })?;
        Ok((spec, in_keys))
    }
}

// ─────────────────────────────────────────────────────────────────────
// Asset metadata
// ─────────────────────────────────────────────────────────────────────

/// Default gains declared for an actuator group.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActuatorDefaults {
    /// Action scale.
    pub action_scale: f32,
    /// Proportional gain.
    pub stiffness: f32,
    /// Derivative gain.
    pub damping: f32,
}

impl Default for ActuatorDefaults {
    fn default() -> Self {
        Self {
            action_scale: 1.0,
            stiffness: 0.0,
            damping: 0.0,
        }
    }
}

/// Per-scene description of the robot and the preferred camera.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetMetadata {
    /// Canonical joint order shared by policies trained for this robot.
    pub joint_names_isaac: Vec<String>,
    /// Default joint positions in canonical order.
    pub default_joint_pos: Vec<f32>,
    /// Actuator groups in document order.
    pub actuators: Map<String, Value>,
    /// Nested camera override `{ pos, target, fov }`.
    pub camera: Option<Value>,
    /// Flat camera position override.
    pub camera_pos: Option<Value>,
    /// Flat camera target override.
    pub camera_target: Option<Value>,
    /// Flat field-of-view override.
    pub camera_fov: Option<Value>,
}

impl AssetMetadata {
    /// Parses asset metadata.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        parse("asset metadata", text)
    }

    /// Gains of the first actuator group, numbers only; anything else keeps
    /// the built-in default.
    pub fn actuator_defaults(&self) -> ActuatorDefaults {
        let mut defaults = ActuatorDefaults::default();
        let Some(group) = self.actuators.values().find_map(Value::as_object) else {
            return defaults;
        };
        let number = |key: &str| group.get(key).and_then(Value::as_f64).map(|v| v as f32);
        if let Some(v) = number("action_scale") {
            defaults.action_scale = v;
        }
        if let Some(v) = number("stiffness") {
            defaults.stiffness = v;
        }
        if let Some(v) = number("damping") {
            defaults.damping = v;
        }
        defaults
    }
}

/// Returns `true` if the metadata describes actuated joints, in which case the
/// model-driven joint controller should be used instead of the passive one.
pub fn needs_model_joint_control(meta: Option<&AssetMetadata>) -> bool {
    meta.is_some_and(|m| {
        !m.joint_names_isaac.is_empty() || !m.actuators.is_empty() || !m.default_joint_pos.is_empty()
    })
}

// ─────────────────────────────────────────────────────────────────────
// Trajectories
// ─────────────────────────────────────────────────────────────────────

/// Joint values of a frame, positional or keyed by joint name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JointValues {
    /// Values in the trajectory's joint order.
    Array(Vec<f64>),
    /// Values keyed by joint name.
    Named(BTreeMap<String, f64>),
}

/// One recorded sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryFrame {
    /// Target joint positions.
    #[serde(default)]
    pub qpos: Option<JointValues>,
    /// Target joint velocities; zero when absent.
    #[serde(default)]
    pub qvel: Option<JointValues>,
}

/// A recorded joint trajectory sampled at a fixed interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryDocument {
    /// Display name.
    #[serde(default)]
    pub name: Option<String>,
    /// Sample interval in seconds.
    #[serde(default)]
    pub dt: Option<f64>,
    /// Joint order of positional frames.
    #[serde(default)]
    pub joint_names: Option<Vec<String>>,
    /// Samples in playback order.
    pub frames: Vec<TrajectoryFrame>,
}

impl TrajectoryDocument {
    /// Parses a trajectory.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        parse("trajectory", text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const APP: &str = r#"{
        "project_name": "demo",
        "tasks": [
            {
                "id": "go2", "name": "Go2", "model_xml": "scene/go2/scene.xml",
                "asset_meta": "scene/go2/asset_meta.json",
                "policies": [
                    { "id": "loco", "name": "Locomotion", "path": "policy/loco.json" },
                    { "id": "facet", "name": "Facet", "path": "policy/facet.json",
                      "model_xml": "scene/go2/facet.xml" }
                ]
            },
            { "id": "empty", "name": "Empty", "model_xml": "scene/empty.xml", "default_policy": "none" }
        ]
    }"#;

    #[test]
    fn test_default_policy_falls_back_to_first() {
        let config = AppConfig::from_json(APP).unwrap();
        assert_eq!(resolve_default_policy(config.tasks.first()), Some("loco".into()));
        assert_eq!(resolve_default_policy(config.tasks.get(1)), Some("none".into()));
        assert_eq!(resolve_default_policy(None), None);
    }

    #[test]
    fn test_lookups_ignore_case() {
        let config = AppConfig::from_json(APP).unwrap();
        let task = find_task_by_name(&config, "gO2").unwrap();
        assert_eq!(task.id, "go2");
        assert_eq!(find_policy_by_name(task, "FACET").unwrap().id, "facet");
        assert!(find_task_by_name(&config, "spot").is_none());
    }

    #[test]
    fn test_environment_honors_policy_overrides() {
        let config = AppConfig::from_json(APP).unwrap();
        let task = &config.tasks[0];
        let env = task.environment_for(find_policy_by_name(task, "facet"));
        assert_eq!(env.scene, "scene/go2/facet.xml");
        assert_eq!(env.meta.as_deref(), Some("scene/go2/asset_meta.json"));
        assert_eq!(env.policy.as_deref(), Some("policy/facet.json"));
        assert_eq!(task.environment_for(None).policy, None);
    }

    #[test]
    fn test_param_value_forms() {
        let scalar = ParamValue::Scalar(2.0);
        assert_eq!(ParamValue::resolve(Some(&scalar), 3, 1.0), vec![2.0, 2.0, 2.0]);
        let list = ParamValue::PerJoint(vec![Some(5.0), None]);
        assert_eq!(ParamValue::resolve(Some(&list), 3, 1.0), vec![5.0, 1.0, 1.0]);
        assert_eq!(ParamValue::resolve(None, 2, 0.5), vec![0.5, 0.5]);
    }

    #[test]
    fn test_policy_descriptor_requires_in_keys() {
        let policy = PolicyDescriptor::from_json(
            r#"{ "control_type": "torque", "action_scale": [0.5, null],
                 "onnx": { "path": "p.onnx", "meta": { "out_keys": ["action"] } } }"#,
        )
        .unwrap();
        assert_eq!(policy.control_type.as_deref(), Some("torque"));
        assert!(matches!(
            policy.network(),
            Err(ConfigError::MissingField { field: "onnx.meta.in_keys", .. })
        ));
    }

    #[test]
    fn test_actuator_defaults_use_first_group() {
        let meta = AssetMetadata::from_json(
            r#"{ "actuators": { "legs": { "stiffness": 20, "damping": 0.5 },
                                "arms": { "stiffness": 99 } } }"#,
        )
        .unwrap();
        let defaults = meta.actuator_defaults();
        assert_eq!(defaults.stiffness, 20.0);
        assert_eq!(defaults.damping, 0.5);
        assert_eq!(defaults.action_scale, 1.0);
        assert!(needs_model_joint_control(Some(&meta)));
        assert!(!needs_model_joint_control(Some(&AssetMetadata::default())));
        assert!(!needs_model_joint_control(None));
    }

    #[test]
    fn test_trajectory_frames_accept_arrays_and_maps() {
        let doc = TrajectoryDocument::from_json(
            r#"{ "dt": 0.05, "frames": [ { "qpos": [0.1, 0.2] },
                                         { "qpos": { "hip": 0.3 }, "qvel": [1.0] } ] }"#,
        )
        .unwrap();
        assert_eq!(doc.frames.len(), 2);
        assert!(matches!(doc.frames[0].qpos, Some(JointValues::Array(_))));
        assert!(matches!(doc.frames[1].qpos, Some(JointValues::Named(_))));
    }
}
