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

//! Joint-level control driven by a policy's action vector.

use std::any::Any;

use marionette_core::config::{ActuatorDefaults, ParamValue, PolicyDescriptor};
use marionette_core::inference::TensorMap;
use marionette_core::manager::{
    Capabilities, ControlType, Manager, ManagerRole, RuntimeLink, SimContext,
};
use marionette_core::ManagerError;

use super::JointMap;

/// Control period the policies were trained at, in seconds.
pub const CONTROL_DT: f64 = 0.02;

/// Output tensor carrying the raw action.
pub const ACTION_OUTPUT: &str = "action";

/// Exponential smoothing weights: `last = last * prev + raw * current`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActionSmoothing {
    /// Weight of the previous smoothed action.
    pub prev: f32,
    /// Weight of the new raw action.
    pub current: f32,
}

impl Default for ActionSmoothing {
    fn default() -> Self {
        Self {
            prev: 0.2,
            current: 0.8,
        }
    }
}

/// Maps a policy's action vector onto the model's actuators.
///
/// The canonical joint order comes from the scene's asset metadata
/// (`joint_names_isaac`). In `joint_position` mode each sub-step writes a PD
/// torque toward `scale * action + default_pos`; in `torque` mode it writes
/// `scale * action` directly.
#[derive(Debug, Default)]
pub struct ModelJointControl {
    smoothing: ActionSmoothing,
    joints: JointMap,
    defaults: ActuatorDefaults,
    action_scale: Vec<f32>,
    kp: Vec<f32>,
    kd: Vec<f32>,
    control_type: ControlType,
    decimation: usize,
}

impl ModelJointControl {
    /// Creates the manager with default smoothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the manager with custom smoothing weights.
    pub fn with_smoothing(smoothing: ActionSmoothing) -> Self {
        Self {
            smoothing,
            ..Self::default()
        }
    }

    /// Physics sub-steps per control update for the loaded scene.
    pub fn decimation(&self) -> usize {
        self.decimation
    }

    /// The active control mode.
    pub fn control_type(&self) -> &ControlType {
        &self.control_type
    }

    /// Per-joint stiffness currently in effect.
    pub fn stiffness(&self) -> &[f32] {
        &self.kp
    }

    /// Per-joint damping currently in effect.
    pub fn damping(&self) -> &[f32] {
        &self.kd
    }

    /// Per-joint action scale currently in effect.
    pub fn action_scale(&self) -> &[f32] {
        &self.action_scale
    }

    fn set_gains(
        &mut self,
        action_scale: Option<&ParamValue>,
        stiffness: Option<&ParamValue>,
        damping: Option<&ParamValue>,
    ) {
        let n = self.joints.len();
        self.action_scale = ParamValue::resolve(action_scale, n, 1.0);
        self.kp = ParamValue::resolve(stiffness, n, 0.0);
        self.kd = ParamValue::resolve(damping, n, 0.0);
    }

    fn restore_defaults(&mut self) {
        let d = self.defaults;
        self.set_gains(
            Some(&ParamValue::Scalar(d.action_scale)),
            Some(&ParamValue::Scalar(d.stiffness)),
            Some(&ParamValue::Scalar(d.damping)),
        );
    }
}

impl Manager for ModelJointControl {
    fn name(&self) -> &'static str {
        "ModelJointControl"
    }

    fn role(&self) -> ManagerRole {
        ManagerRole::Action
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::SCENE_LOADED
            | Capabilities::POLICY_LOADED
            | Capabilities::POLICY_CLEARED
            | Capabilities::BEFORE_STEP
            | Capabilities::POLICY_OUTPUT
            | Capabilities::DISPOSE
    }

    fn on_scene_loaded(&mut self, ctx: &mut SimContext<'_>) -> Result<(), ManagerError> {
        let meta = ctx.asset_meta;
        let names = meta.map(|m| m.joint_names_isaac.clone()).unwrap_or_default();
        self.joints = JointMap::strict(ctx.model, &names)?;

        let n = self.joints.len();
        ctx.actions.joint_names = names;
        ctx.actions.default_joint_pos = meta.map(|m| m.default_joint_pos.clone()).unwrap_or_default();
        ctx.actions.reset_actions(n);

        self.decimation = ((CONTROL_DT / ctx.model.timestep).round() as usize).max(1);
        self.defaults = meta.map(|m| m.actuator_defaults()).unwrap_or_default();
        self.restore_defaults();

        log::debug!(
            "[ModelJointControl] Mapped {n} joints, decimation {}",
            self.decimation
        );
        Ok(())
    }

    fn on_policy_loaded(
        &mut self,
        policy: &PolicyDescriptor,
        ctx: &mut SimContext<'_>,
    ) -> Result<(), ManagerError> {
        self.control_type = ControlType::parse(policy.control_type.as_deref());
        self.set_gains(
            policy.action_scale.as_ref(),
            policy.stiffness.as_ref(),
            policy.damping.as_ref(),
        );
        ctx.actions.control_type = self.control_type.clone();
        Ok(())
    }

    fn on_policy_cleared(&mut self, link: &mut RuntimeLink<'_>) -> Result<(), ManagerError> {
        self.control_type = ControlType::JointPosition;
        self.restore_defaults();
        link.actions.control_type = ControlType::JointPosition;
        Ok(())
    }

    fn on_policy_output(
        &mut self,
        output: &TensorMap,
        link: &mut RuntimeLink<'_>,
    ) -> Result<(), ManagerError> {
        let Some(raw) = output.get(ACTION_OUTPUT).and_then(|t| t.as_f32()) else {
            return Ok(());
        };

        let actions = &mut *link.actions;
        if actions.last_actions.len() != raw.len() {
            log::debug!(
                "[ModelJointControl] Action size changed {} -> {}",
                actions.last_actions.len(),
                raw.len()
            );
            actions.reset_actions(raw.len());
        }

        let ActionSmoothing { prev, current } = self.smoothing;
        for (last, raw) in actions.last_actions.iter_mut().zip(raw) {
            *last = *last * prev + raw * current;
        }
        actions.push_history();
        Ok(())
    }

    fn before_step(&mut self, ctx: &mut SimContext<'_>) -> Result<(), ManagerError> {
        let actions = &ctx.actions.last_actions;
        let n = self.joints.len().min(actions.len());

        match self.control_type {
            ControlType::JointPosition => {
                for i in 0..n {
                    let Some(ctrl) = self.joints.ctrl[i] else {
                        continue;
                    };
                    let default = ctx.actions.default_joint_pos.get(i).copied().unwrap_or(0.0);
                    let target = f64::from(self.action_scale[i] * actions[i] + default);
                    let q = ctx.data.qpos[self.joints.qpos[i]];
                    let qd = ctx.data.qvel[self.joints.qvel[i]];
                    ctx.data.ctrl[ctrl] =
                        f64::from(self.kp[i]) * (target - q) + f64::from(self.kd[i]) * (0.0 - qd);
                }
            }
            ControlType::Torque => {
                for i in 0..n {
                    if let Some(ctrl) = self.joints.ctrl[i] {
                        ctx.data.ctrl[ctrl] = f64::from(self.action_scale[i] * actions[i]);
                    }
                }
            }
            ControlType::None | ControlType::Other(_) => {}
        }
        Ok(())
    }

    fn dispose(&mut self, _link: &mut RuntimeLink<'_>) {
        self.joints = JointMap::default();
        self.action_scale.clear();
        self.kp.clear();
        self.kd.clear();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use marionette_core::config::AssetMetadata;
    use marionette_core::engine::{ModelInfo, SimData};
    use marionette_core::inference::Tensor;
    use marionette_core::manager::{ActionState, ACTION_HISTORY_DEPTH};
    use marionette_core::{RuntimeParams, ServiceRegistry};
    use marionette_test_utils::quadruped_model;

    struct Rig {
        model: ModelInfo,
        data: SimData,
        meta: AssetMetadata,
        params: RuntimeParams,
        services: ServiceRegistry,
        actions: ActionState,
    }

    impl Rig {
        fn new(meta_json: &str) -> Self {
            let model = quadruped_model();
            let data = SimData::zeroed(&model);
            Self {
                model,
                data,
                meta: AssetMetadata::from_json(meta_json).unwrap(),
                params: RuntimeParams::default(),
                services: ServiceRegistry::new(),
                actions: ActionState::default(),
            }
        }

        fn ctx(&mut self) -> SimContext<'_> {
            SimContext {
                model: &self.model,
                data: &mut self.data,
                asset_meta: Some(&self.meta),
                params: &mut self.params,
                services: &mut self.services,
                actions: &mut self.actions,
                timestep: 0.005,
                substep: 0,
            }
        }

        fn link(&mut self) -> RuntimeLink<'_> {
            RuntimeLink {
                params: &mut self.params,
                services: &mut self.services,
                actions: &mut self.actions,
            }
        }
    }

    const META: &str = r#"{
        "joint_names_isaac": ["FL_hip", "FR_hip", "RL_hip", "RR_hip"],
        "default_joint_pos": [0.1, -0.1, 0.2, -0.2],
        "actuators": { "legs": { "stiffness": 20.0, "damping": 0.5 } }
    }"#;

    fn policy(json: &str) -> PolicyDescriptor {
        PolicyDescriptor::from_json(json).unwrap()
    }

    fn output(action: Vec<f32>) -> TensorMap {
        let mut map = TensorMap::new();
        map.insert(ACTION_OUTPUT.into(), Tensor::row(action));
        map
    }

    #[test]
    fn test_scene_load_publishes_action_state() {
        let mut rig = Rig::new(META);
        let mut manager = ModelJointControl::new();
        manager.on_scene_loaded(&mut rig.ctx()).unwrap();

        assert_eq!(manager.decimation(), 4);
        assert_eq!(manager.stiffness(), &[20.0; 4]);
        assert_eq!(rig.actions.joint_names.len(), 4);
        assert_eq!(rig.actions.last_actions, vec![0.0; 4]);
        assert_eq!(rig.actions.history.len(), ACTION_HISTORY_DEPTH);
    }

    #[test]
    fn test_missing_joint_fails_scene_load() {
        let mut rig = Rig::new(r#"{ "joint_names_isaac": ["FL_hip", "tail"] }"#);
        let err = ModelJointControl::new()
            .on_scene_loaded(&mut rig.ctx())
            .unwrap_err();
        assert!(matches!(err, ManagerError::MissingJoint(ref n) if n == "tail"));
    }

    #[test]
    fn test_zero_gains_give_zero_torque() {
        let mut rig = Rig::new(META);
        let mut manager = ModelJointControl::new();
        manager.on_scene_loaded(&mut rig.ctx()).unwrap();
        manager
            .on_policy_loaded(&policy(r#"{ "stiffness": 0, "damping": 0 }"#), &mut rig.ctx())
            .unwrap();
        manager.on_policy_output(&output(vec![3.0, -2.0, 1.0, 0.5]), &mut rig.link()).unwrap();

        rig.data.qpos[7..11].copy_from_slice(&[0.7, -1.3, 2.0, 9.0]);
        rig.data.qvel[6..10].copy_from_slice(&[4.0, -4.0, 0.1, 100.0]);
        manager.before_step(&mut rig.ctx()).unwrap();

        assert_eq!(rig.data.ctrl, vec![0.0; 4]);
    }

    #[test]
    fn test_zero_action_tracks_default_pose() {
        let mut rig = Rig::new(META);
        let mut manager = ModelJointControl::new();
        manager.on_scene_loaded(&mut rig.ctx()).unwrap();
        manager
            .on_policy_loaded(&policy(r#"{ "stiffness": 10, "damping": 0 }"#), &mut rig.ctx())
            .unwrap();
        manager.on_policy_output(&output(vec![0.0; 4]), &mut rig.link()).unwrap();

        // At the default pose the PD term vanishes.
        rig.data.qpos[7..11].copy_from_slice(&[0.1, -0.1, 0.2, -0.2]);
        manager.before_step(&mut rig.ctx()).unwrap();
        for torque in &rig.data.ctrl {
            assert_abs_diff_eq!(*torque, 0.0, epsilon = 1e-6);
        }

        // Away from it, the torque pulls back toward it.
        rig.data.qpos[7] = 0.6;
        manager.before_step(&mut rig.ctx()).unwrap();
        assert_abs_diff_eq!(rig.data.ctrl[0], 10.0 * (0.1 - 0.6), epsilon = 1e-5);
    }

    #[test]
    fn test_smoothing_and_history() {
        let mut rig = Rig::new(META);
        let mut manager = ModelJointControl::new();
        manager.on_scene_loaded(&mut rig.ctx()).unwrap();

        manager.on_policy_output(&output(vec![1.0; 4]), &mut rig.link()).unwrap();
        assert_abs_diff_eq!(rig.actions.last_actions[0], 0.8, epsilon = 1e-6);
        manager.on_policy_output(&output(vec![1.0; 4]), &mut rig.link()).unwrap();
        assert_abs_diff_eq!(rig.actions.last_actions[0], 0.96, epsilon = 1e-6);

        assert_eq!(rig.actions.history.len(), ACTION_HISTORY_DEPTH);
        assert_abs_diff_eq!(rig.actions.history[0][0], 0.96, epsilon = 1e-6);
        assert_abs_diff_eq!(rig.actions.history[1][0], 0.8, epsilon = 1e-6);
        assert_eq!(rig.actions.history[2], vec![0.0; 4]);
    }

    #[test]
    fn test_output_size_change_resets_state() {
        let mut rig = Rig::new(META);
        let mut manager = ModelJointControl::new();
        manager.on_scene_loaded(&mut rig.ctx()).unwrap();
        manager.on_policy_output(&output(vec![1.0; 4]), &mut rig.link()).unwrap();

        manager.on_policy_output(&output(vec![1.0; 2]), &mut rig.link()).unwrap();

        assert_eq!(rig.actions.num_actions(), 2);
        assert_abs_diff_eq!(rig.actions.last_actions[0], 0.8, epsilon = 1e-6);
        assert!(rig.actions.history.iter().all(|h| h.len() == 2));
        assert_eq!(rig.actions.history[1], vec![0.0; 2]);
    }

    #[test]
    fn test_torque_mode_scales_action() {
        let mut rig = Rig::new(META);
        let mut manager = ModelJointControl::with_smoothing(ActionSmoothing {
            prev: 0.0,
            current: 1.0,
        });
        manager.on_scene_loaded(&mut rig.ctx()).unwrap();
        manager
            .on_policy_loaded(
                &policy(r#"{ "control_type": "torque", "action_scale": [2.0, null, 0.5] }"#),
                &mut rig.ctx(),
            )
            .unwrap();
        manager.on_policy_output(&output(vec![1.0, 1.0, 1.0, 1.0]), &mut rig.link()).unwrap();
        manager.before_step(&mut rig.ctx()).unwrap();

        assert_eq!(rig.data.ctrl, vec![2.0, 1.0, 0.5, 1.0]);
    }

    #[test]
    fn test_policy_cleared_restores_metadata_gains() {
        let mut rig = Rig::new(META);
        let mut manager = ModelJointControl::new();
        manager.on_scene_loaded(&mut rig.ctx()).unwrap();
        manager
            .on_policy_loaded(&policy(r#"{ "control_type": "torque", "stiffness": 3 }"#), &mut rig.ctx())
            .unwrap();
        assert_eq!(manager.stiffness(), &[3.0; 4]);

        manager.on_policy_cleared(&mut rig.link()).unwrap();
        assert_eq!(manager.control_type(), &ControlType::JointPosition);
        assert_eq!(manager.stiffness(), &[20.0; 4]);
        assert_eq!(manager.damping(), &[0.5; 4]);
        assert_eq!(rig.actions.control_type, ControlType::JointPosition);
    }
}
