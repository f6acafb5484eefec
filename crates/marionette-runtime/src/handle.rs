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

//! Scoped ownership of the physics engine's native model and state.

use std::path::Path;

use marionette_core::engine::{
    EngineError, ModelHandle, ModelInfo, PhysicsEngine, SimData, StateHandle,
};

struct LoadedScene {
    model: ModelHandle,
    state: StateHandle,
    info: ModelInfo,
}

/// Owns the physics engine and at most one live model/state pair.
///
/// [`SimulationHandle::unload`] is the single teardown path: loading a new
/// scene, disposing the runtime and dropping the handle all go through it.
/// It frees the state before the model, guards each free individually and is
/// a no-op once nothing is loaded.
pub struct SimulationHandle {
    engine: Box<dyn PhysicsEngine>,
    loaded: Option<LoadedScene>,
}

impl SimulationHandle {
    /// Takes ownership of `engine`. Nothing is loaded yet.
    pub fn new(engine: Box<dyn PhysicsEngine>) -> Self {
        Self {
            engine,
            loaded: None,
        }
    }

    /// Replaces the current scene with the model at `path`.
    ///
    /// The previous pair is freed before the new model is loaded, so at most
    /// one live pair ever exists. On failure nothing is left loaded.
    pub fn load(&mut self, path: &Path) -> Result<&ModelInfo, EngineError> {
        self.unload();

        let model = self.engine.load_model(path)?;
        let state = match self.engine.create_state(model) {
            Ok(state) => state,
            Err(e) => {
                self.free_model(model);
                return Err(e);
            }
        };
        let info = match self.engine.model_info(model) {
            Ok(info) => info,
            Err(e) => {
                self.free_state(state);
                self.free_model(model);
                return Err(e);
            }
        };

        log::debug!(
            "[SimulationHandle] Loaded {} (model {}, state {})",
            path.display(),
            model.0,
            state.0
        );
        let loaded = self.loaded.insert(LoadedScene { model, state, info });
        Ok(&loaded.info)
    }

    /// Frees the live pair, if any.
    pub fn unload(&mut self) {
        if let Some(loaded) = self.loaded.take() {
            self.free_state(loaded.state);
            self.free_model(loaded.model);
            log::debug!("[SimulationHandle] Released model {}", loaded.model.0);
        }
    }

    /// Returns `true` while a model/state pair is live.
    pub fn is_loaded(&self) -> bool {
        self.loaded.is_some()
    }

    /// Description of the loaded model.
    pub fn model_info(&self) -> Option<&ModelInfo> {
        self.loaded.as_ref().map(|l| &l.info)
    }

    /// Read access to the simulation arrays.
    pub fn data(&self) -> Option<&SimData> {
        let loaded = self.loaded.as_ref()?;
        self.engine.data(loaded.state).ok()
    }

    /// The model description together with mutable simulation arrays.
    pub fn split_mut(&mut self) -> Option<(&ModelInfo, &mut SimData)> {
        let loaded = self.loaded.as_ref()?;
        let data = self.engine.data_mut(loaded.state).ok()?;
        Some((&loaded.info, data))
    }

    /// Advances the simulation by one physics timestep.
    pub fn step(&mut self) -> Result<(), EngineError> {
        let (model, state) = self.handles()?;
        self.engine.step(model, state)
    }

    /// Recomputes derived quantities without advancing time.
    pub fn forward(&mut self) -> Result<(), EngineError> {
        let (model, state) = self.handles()?;
        self.engine.forward(model, state)
    }

    /// Restores the initial state of the loaded model and recomputes kinematics.
    pub fn reset(&mut self) -> Result<(), EngineError> {
        let (model, state) = self.handles()?;
        self.engine.reset_state(model, state)?;
        self.engine.forward(model, state)
    }

    fn handles(&self) -> Result<(ModelHandle, StateHandle), EngineError> {
        self.loaded
            .as_ref()
            .map(|l| (l.model, l.state))
            .ok_or_else(|| EngineError::Native("no model is loaded".into()))
    }

    fn free_state(&mut self, state: StateHandle) {
        if let Err(e) = self.engine.delete_state(state) {
            log::warn!("[SimulationHandle] Failed to free state {}: {e}", state.0);
        }
    }

    fn free_model(&mut self, model: ModelHandle) {
        if let Err(e) = self.engine.delete_model(model) {
            log::warn!("[SimulationHandle] Failed to free model {}: {e}", model.0);
        }
    }
}

impl Drop for SimulationHandle {
    fn drop(&mut self) {
        self.unload();
    }
}
