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

//! A deterministic physics engine.
//!
//! Models are read from a template [`ModelInfo`]; the file passed to
//! `load_model` only has to exist. Stepping integrates actuator commands as
//! unit-mass joint accelerations, which is enough to observe control effects.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use marionette_core::engine::{
    EngineError, JointInfo, ModelHandle, ModelInfo, PhysicsEngine, SimData, StateHandle,
    Transmission,
};

/// A quadruped with a floating base, four hip joints and one actuator per hip.
///
/// The physics timestep is 5 ms, so a 20 ms control period runs four
/// sub-steps.
pub fn quadruped_model() -> ModelInfo {
    let hips = ["FL_hip", "FR_hip", "RL_hip", "RR_hip"];
    let mut joints = vec![JointInfo {
        name: String::new(),
        qpos_adr: 0,
        dof_adr: 0,
    }];
    joints.extend(hips.iter().enumerate().map(|(i, name)| JointInfo {
        name: (*name).to_owned(),
        qpos_adr: 7 + i,
        dof_adr: 6 + i,
    }));
    ModelInfo {
        timestep: 0.005,
        nq: 11,
        nv: 10,
        joints,
        actuators: (1..=4).map(Transmission::Joint).collect(),
        bodies: vec!["world".into(), "base".into(), "FL".into(), "FR".into()],
        nlight: 1,
        tendon_widths: vec![0.01],
    }
}

/// Observable engine activity.
#[derive(Debug, Default, Clone)]
pub struct EngineStats {
    /// Successful `load_model` calls.
    pub models_loaded: usize,
    /// Models not yet deleted.
    pub live_models: usize,
    /// States not yet deleted.
    pub live_states: usize,
    /// Highest `live_states` ever observed.
    pub max_live_states: usize,
    /// Total `step` calls.
    pub steps: usize,
    /// Total `reset_state` calls.
    pub resets: usize,
    /// Wall-clock instant of every `step` call.
    pub step_times: Vec<Instant>,
    /// Lifecycle calls in order, e.g. `delete_state:1`.
    pub events: Vec<String>,
}

/// Shared view of a [`MockPhysicsEngine`]'s activity.
#[derive(Debug, Default, Clone)]
pub struct EngineProbe(Arc<Mutex<EngineStats>>);

impl EngineProbe {
    fn lock(&self) -> MutexGuard<'_, EngineStats> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A copy of the current counters.
    pub fn stats(&self) -> EngineStats {
        self.lock().clone()
    }

    /// States currently alive.
    pub fn live_states(&self) -> usize {
        self.lock().live_states
    }

    /// Highest number of simultaneously alive states.
    pub fn max_live_states(&self) -> usize {
        self.lock().max_live_states
    }

    /// Total physics steps.
    pub fn steps(&self) -> usize {
        self.lock().steps
    }

    /// Lifecycle calls in order.
    pub fn events(&self) -> Vec<String> {
        self.lock().events.clone()
    }
}

struct MockState {
    model: ModelHandle,
    data: SimData,
}

/// In-memory [`PhysicsEngine`].
pub struct MockPhysicsEngine {
    template: ModelInfo,
    models: HashMap<ModelHandle, ModelInfo>,
    states: HashMap<StateHandle, MockState>,
    next_id: u64,
    probe: EngineProbe,
    fail_state_creation: bool,
    fail_model_deletion: bool,
}

impl MockPhysicsEngine {
    /// Creates an engine whose every model is a copy of `template`.
    pub fn new(template: ModelInfo) -> Self {
        Self {
            template,
            models: HashMap::new(),
            states: HashMap::new(),
            next_id: 1,
            probe: EngineProbe::default(),
            fail_state_creation: false,
            fail_model_deletion: false,
        }
    }

    /// Makes every `create_state` fail.
    #[must_use]
    pub fn with_failing_state_creation(mut self) -> Self {
        self.fail_state_creation = true;
        self
    }

    /// Makes every `delete_model` fail after forgetting the model.
    #[must_use]
    pub fn with_failing_model_deletion(mut self) -> Self {
        self.fail_model_deletion = true;
        self
    }

    /// A probe that stays valid after the engine is moved.
    pub fn probe(&self) -> EngineProbe {
        self.probe.clone()
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn initial_data(model: &ModelInfo) -> SimData {
        let mut data = SimData::zeroed(model);
        if let Some(w) = data.qpos.get_mut(3) {
            *w = 1.0;
        }
        if let Some(z) = data.qpos.get_mut(2) {
            *z = 0.3;
        }
        for tendon in 0..model.ntendon() {
            data.ten_wrapadr[tendon] = data.wrap_xpos.len() / 3;
            data.ten_wrapnum[tendon] = 2;
            data.wrap_xpos.extend_from_slice(&[0.2, 0.0, 0.3, 0.3, 0.0, 0.3]);
        }
        for light in 0..model.nlight {
            data.light_xpos[light * 3 + 2] = 3.0;
            data.light_xdir[light * 3 + 2] = -1.0;
        }
        update_kinematics(model, &mut data);
        data
    }

    fn state_for(
        &mut self,
        model: ModelHandle,
        state: StateHandle,
    ) -> Result<(&ModelInfo, &mut SimData), EngineError> {
        let info = self.models.get(&model).ok_or(EngineError::UnknownModel(model))?;
        let entry = self
            .states
            .get_mut(&state)
            .ok_or(EngineError::UnknownState(state))?;
        if entry.model != model {
            return Err(EngineError::Native(format!(
                "state {} does not belong to model {}",
                state.0, model.0
            )));
        }
        Ok((info, &mut entry.data))
    }
}

fn update_kinematics(model: &ModelInfo, data: &mut SimData) {
    if model.nbody() < 2 || data.qpos.len() < 7 {
        return;
    }
    data.xpos[3..6].copy_from_slice(&data.qpos[0..3]);
    data.xquat[4..8].copy_from_slice(&data.qpos[3..7]);
    for body in 2..model.nbody() {
        let offset = if body % 2 == 0 { 0.2 } else { -0.2 };
        data.xpos[body * 3] = data.qpos[0] + offset;
        data.xpos[body * 3 + 1] = data.qpos[1];
        data.xpos[body * 3 + 2] = data.qpos[2] - 0.1;
    }
}

impl PhysicsEngine for MockPhysicsEngine {
    fn load_model(&mut self, path: &Path) -> Result<ModelHandle, EngineError> {
        if !path.is_file() {
            return Err(EngineError::ModelLoad {
                path: path.to_path_buf(),
                reason: "file not found".into(),
            });
        }
        let handle = ModelHandle(self.next_id());
        self.models.insert(handle, self.template.clone());
        let mut stats = self.probe.lock();
        stats.models_loaded += 1;
        stats.live_models += 1;
        stats.events.push(format!("load_model:{}", handle.0));
        Ok(handle)
    }

    fn create_state(&mut self, model: ModelHandle) -> Result<StateHandle, EngineError> {
        if self.fail_state_creation {
            return Err(EngineError::Native("state allocation failed".into()));
        }
        let info = self.models.get(&model).ok_or(EngineError::UnknownModel(model))?;
        let data = Self::initial_data(info);
        let handle = StateHandle(self.next_id());
        self.states.insert(handle, MockState { model, data });
        let mut stats = self.probe.lock();
        stats.live_states += 1;
        stats.max_live_states = stats.max_live_states.max(stats.live_states);
        stats.events.push(format!("create_state:{}", handle.0));
        Ok(handle)
    }

    fn model_info(&self, model: ModelHandle) -> Result<ModelInfo, EngineError> {
        self.models
            .get(&model)
            .cloned()
            .ok_or(EngineError::UnknownModel(model))
    }

    fn data(&self, state: StateHandle) -> Result<&SimData, EngineError> {
        self.states
            .get(&state)
            .map(|s| &s.data)
            .ok_or(EngineError::UnknownState(state))
    }

    fn data_mut(&mut self, state: StateHandle) -> Result<&mut SimData, EngineError> {
        self.states
            .get_mut(&state)
            .map(|s| &mut s.data)
            .ok_or(EngineError::UnknownState(state))
    }

    fn step(&mut self, model: ModelHandle, state: StateHandle) -> Result<(), EngineError> {
        let (info, data) = self.state_for(model, state)?;
        let dt = info.timestep;

        for (actuator, transmission) in info.actuators.iter().enumerate() {
            if let Transmission::Joint(joint) = *transmission {
                let dof = info.joints[joint].dof_adr;
                data.qvel[dof] += (data.ctrl[actuator] + data.qfrc_applied[dof]) * dt;
            }
        }
        if let Some(base) = info.body_id("base") {
            for axis in 0..3 {
                data.qvel[axis] += data.xfrc_applied[base * 6 + axis] * dt;
            }
        }
        for axis in 0..data.qpos.len().min(3) {
            data.qpos[axis] += data.qvel[axis] * dt;
        }
        for joint in info.joints.iter().skip(1) {
            data.qpos[joint.qpos_adr] += data.qvel[joint.dof_adr] * dt;
        }
        data.time += dt;
        update_kinematics(info, data);

        let mut stats = self.probe.lock();
        stats.steps += 1;
        stats.step_times.push(Instant::now());
        Ok(())
    }

    fn forward(&mut self, model: ModelHandle, state: StateHandle) -> Result<(), EngineError> {
        let (info, data) = self.state_for(model, state)?;
        update_kinematics(info, data);
        Ok(())
    }

    fn reset_state(&mut self, model: ModelHandle, state: StateHandle) -> Result<(), EngineError> {
        let (info, _) = self.state_for(model, state)?;
        let fresh = Self::initial_data(info);
        *self.data_mut(state)? = fresh;
        self.probe.lock().resets += 1;
        Ok(())
    }

    fn delete_state(&mut self, state: StateHandle) -> Result<(), EngineError> {
        self.states
            .remove(&state)
            .ok_or(EngineError::UnknownState(state))?;
        let mut stats = self.probe.lock();
        stats.live_states -= 1;
        stats.events.push(format!("delete_state:{}", state.0));
        Ok(())
    }

    fn delete_model(&mut self, model: ModelHandle) -> Result<(), EngineError> {
        self.models
            .remove(&model)
            .ok_or(EngineError::UnknownModel(model))?;
        let mut stats = self.probe.lock();
        stats.live_models -= 1;
        stats.events.push(format!("delete_model:{}", model.0));
        if self.fail_model_deletion {
            return Err(EngineError::Native("model free reported an error".into()));
        }
        Ok(())
    }
}
