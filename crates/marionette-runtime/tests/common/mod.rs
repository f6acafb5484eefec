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

//! Fixtures shared by the runtime integration tests.

#![allow(dead_code)]

use std::any::Any;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use marionette_assets::MemoryFetcher;
use marionette_core::config::EnvironmentPaths;
use marionette_core::manager::{Capabilities, Manager, ManagerRole, RuntimeLink, SimContext};
use marionette_core::{ManagerError, RuntimeParams};
use marionette_runtime::{RuntimeBuilder, RuntimeConfig, SimulationRuntime};
use marionette_test_utils::{
    quadruped_model, EngineProbe, InferenceProbe, MockPhysicsEngine, RecordingRenderer,
    RenderProbe, ScriptedInference,
};
use tempfile::TempDir;

pub const SCENE: &str = "go2/scene.xml";
pub const META: &str = "go2/meta.json";
pub const POLICY: &str = "go2/policy.json";
pub const NETWORK: &str = "go2/policy.onnx";

pub const META_JSON: &str = r#"{
    "joint_names_isaac": ["FL_hip", "FR_hip", "RL_hip", "RR_hip"],
    "default_joint_pos": [0.0, 0.0, 0.0, 0.0],
    "actuators": { "hip": { "stiffness": 20.0, "damping": 0.5 } },
    "camera": { "pos": [3.0, 2.0, 1.0], "fov": 50 }
}"#;

pub const POLICY_JSON: &str = r#"{
    "control_type": "joint_position",
    "action_scale": 1.0,
    "stiffness": 10.0,
    "damping": 1.0,
    "obs_config": {
        "policy": [
            { "name": "JointPositions", "joint_names": "isaac" },
            { "name": "PreviousActions" }
        ]
    },
    "onnx": {
        "path": "go2/policy.onnx",
        "meta": { "in_keys": ["policy"], "out_keys": ["action"] }
    }
}"#;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A scene tree with metadata, a policy descriptor and its network.
pub fn go2_fetcher() -> MemoryFetcher {
    MemoryFetcher::new()
        .with_file(SCENE, r#"<mujoco model="go2"><option timestep="0.005"/></mujoco>"#)
        .with_file(META, META_JSON)
        .with_file(POLICY, POLICY_JSON)
        .with_file(NETWORK, vec![0x08u8, 0x01])
}

pub fn scene_only() -> EnvironmentPaths {
    EnvironmentPaths {
        scene: SCENE.into(),
        meta: None,
        policy: None,
    }
}

pub fn with_meta() -> EnvironmentPaths {
    EnvironmentPaths {
        scene: SCENE.into(),
        meta: Some(META.into()),
        policy: None,
    }
}

pub fn with_policy() -> EnvironmentPaths {
    EnvironmentPaths {
        scene: SCENE.into(),
        meta: Some(META.into()),
        policy: Some(POLICY.into()),
    }
}

/// Runtime config with the loop unpaused from the start.
pub fn running_config() -> RuntimeConfig {
    RuntimeConfig {
        default_params: RuntimeParams {
            paused: false,
            ..RuntimeParams::default()
        },
        ..RuntimeConfig::default()
    }
}

/// State observed by [`StepRecorder`] before one physics sub-step.
#[derive(Debug, Clone, Default)]
pub struct StepSample {
    pub substep: usize,
    pub time: f64,
    pub ctrl: Vec<f64>,
    pub qpos: Vec<f64>,
    pub qvel: Vec<f64>,
}

#[derive(Debug, Default)]
pub struct RecorderLog {
    pub samples: Vec<StepSample>,
    pub resets: usize,
    pub disposed: bool,
}

/// Environment manager that records the actuator commands other managers
/// wrote, right before each physics step.
pub struct StepRecorder {
    log: Arc<Mutex<RecorderLog>>,
}

impl StepRecorder {
    pub fn new() -> (Self, Arc<Mutex<RecorderLog>>) {
        let log = Arc::new(Mutex::new(RecorderLog::default()));
        (
            Self {
                log: Arc::clone(&log),
            },
            log,
        )
    }
}

impl Manager for StepRecorder {
    fn name(&self) -> &'static str {
        "StepRecorder"
    }

    fn role(&self) -> ManagerRole {
        ManagerRole::Environment
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::BEFORE_STEP | Capabilities::RESET | Capabilities::DISPOSE
    }

    fn before_step(&mut self, ctx: &mut SimContext<'_>) -> Result<(), ManagerError> {
        let mut log = self.log.lock().unwrap();
        log.samples.push(StepSample {
            substep: ctx.substep,
            time: ctx.data.time,
            ctrl: ctx.data.ctrl.clone(),
            qpos: ctx.data.qpos.clone(),
            qvel: ctx.data.qvel.clone(),
        });
        Ok(())
    }

    fn reset(&mut self, _link: &mut RuntimeLink<'_>) -> Result<(), ManagerError> {
        self.log.lock().unwrap().resets += 1;
        Ok(())
    }

    fn dispose(&mut self, _link: &mut RuntimeLink<'_>) {
        self.log.lock().unwrap().disposed = true;
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// A runtime wired to the deterministic mocks.
pub struct Rig {
    pub runtime: SimulationRuntime,
    pub engine: EngineProbe,
    pub inference: InferenceProbe,
    pub render: RenderProbe,
    pub steps: Arc<Mutex<RecorderLog>>,
    _workdir: TempDir,
}

impl Rig {
    pub fn build(
        fetcher: MemoryFetcher,
        inference: ScriptedInference,
        configure: impl FnOnce(RuntimeBuilder) -> RuntimeBuilder,
    ) -> Result<Self> {
        init_logging();
        let workdir = tempfile::tempdir()?;
        let engine = MockPhysicsEngine::new(quadruped_model());
        let engine_probe = engine.probe();
        let inference_probe = inference.probe();
        let renderer = RecordingRenderer::new();
        let render_probe = renderer.probe();
        let (recorder, steps) = StepRecorder::new();

        let builder = SimulationRuntime::builder()
            .engine(Box::new(engine))
            .inference(Arc::new(inference))
            .fetcher(Arc::new(fetcher))
            .renderer(Box::new(renderer))
            .working_dir(workdir.path())
            .manager(Box::new(recorder));
        let runtime = configure(builder).build()?;

        Ok(Self {
            runtime,
            engine: engine_probe,
            inference: inference_probe,
            render: render_probe,
            steps,
            _workdir: workdir,
        })
    }

    /// Polls until at least `ticks` loop iterations did work.
    pub async fn wait_for_ticks(&self, ticks: u64) -> Result<()> {
        for _ in 0..200 {
            if self.runtime.stats().ticks >= ticks {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        bail!(
            "loop reached only {} of {ticks} ticks",
            self.runtime.stats().ticks
        )
    }

    pub fn last_sample(&self) -> Option<StepSample> {
        self.steps.lock().unwrap().samples.last().cloned()
    }
}
