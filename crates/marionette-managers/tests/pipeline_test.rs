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

//! Action and observation managers cooperating through the shared action
//! state, the way the runtime drives them.

use anyhow::Result;
use approx::assert_abs_diff_eq;

use marionette_core::config::{AssetMetadata, PolicyDescriptor};
use marionette_core::engine::SimData;
use marionette_core::inference::{Tensor, TensorMap};
use marionette_core::manager::{ActionState, CollectContext, Manager, RuntimeLink, SimContext};
use marionette_core::{RuntimeParams, ServiceRegistry};
use marionette_managers::{LocomotionEnvManager, ModelJointControl, ObservationAssembler};
use marionette_test_utils::quadruped_model;

const META: &str = r#"{
    "joint_names_isaac": ["RR_hip", "RL_hip", "FR_hip", "FL_hip"],
    "default_joint_pos": [0.0, 0.0, 0.0, 0.0],
    "actuators": { "hips": { "stiffness": 5.0, "damping": 0.1 } }
}"#;

const POLICY: &str = r#"{
    "control_type": "joint_position",
    "action_scale": 1.0,
    "stiffness": 10.0,
    "damping": 1.0,
    "obs_config": {
        "policy": [
            { "name": "JointPositions", "joint_names": "isaac" },
            { "name": "PreviousActions", "history_steps": 2 }
        ]
    }
}"#;

#[test]
fn test_policy_output_flows_into_observations_and_torques() -> Result<()> {
    let model = quadruped_model();
    let mut data = SimData::zeroed(&model);
    data.qpos[3] = 1.0;
    let meta = AssetMetadata::from_json(META)?;
    let policy = PolicyDescriptor::from_json(POLICY)?;
    let mut params = RuntimeParams::default();
    let mut services = ServiceRegistry::new();
    let mut actions = ActionState::default();

    let mut control = ModelJointControl::new();
    let mut observations = ObservationAssembler::new();
    let mut environment = LocomotionEnvManager::new();

    {
        let mut link = RuntimeLink {
            params: &mut params,
            services: &mut services,
            actions: &mut actions,
        };
        environment.attach_runtime(&mut link)?;
    }

    let mut ctx = SimContext {
        model: &model,
        data: &mut data,
        asset_meta: Some(&meta),
        params: &mut params,
        services: &mut services,
        actions: &mut actions,
        timestep: model.timestep,
        substep: 0,
    };
    control.on_scene_loaded(&mut ctx)?;
    environment.on_scene_loaded(&mut ctx)?;
    control.on_policy_loaded(&policy, &mut ctx)?;
    observations.on_policy_loaded(&policy, &mut ctx)?;
    assert_eq!(ctx.actions.joint_names[0], "RR_hip");

    // Raw output [1, 0, 0, 0] in canonical order drives RR_hip.
    let mut output = TensorMap::new();
    output.insert("action".into(), Tensor::row(vec![1.0, 0.0, 0.0, 0.0]));
    control.on_policy_output(&output, &mut ctx.link())?;

    ctx.data.qpos[10] = 0.2;
    ctx.data.qvel[9] = 0.5;
    environment.before_step(&mut ctx)?;
    control.before_step(&mut ctx)?;

    let smoothed = 0.8;
    let expected = 10.0 * (smoothed - 0.2) + 1.0 * (0.0 - 0.5);
    assert_abs_diff_eq!(ctx.data.ctrl[3], expected, epsilon = 1e-5);
    assert_eq!(&ctx.data.ctrl[..3], &[0.0, 0.0, 0.0]);

    let collect = CollectContext::new(
        ctx.model,
        &*ctx.data,
        &*ctx.params,
        &*ctx.services,
        &*ctx.actions,
    );
    let inputs = observations.collect(&collect)?;
    let obs = inputs["policy"].as_f32().unwrap();
    assert_eq!(obs.len(), 4 + 8);
    assert_abs_diff_eq!(obs[0], 0.2, epsilon = 1e-6);
    assert_abs_diff_eq!(obs[4], 0.8, epsilon = 1e-6);
    assert_eq!(&obs[8..], &[0.0; 4]);
    Ok(())
}
