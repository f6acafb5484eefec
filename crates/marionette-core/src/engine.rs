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

//! Contract for the physics engine collaborator.
//!
//! The engine owns native model and state memory. The runtime only ever holds
//! opaque [`ModelHandle`]s and [`StateHandle`]s and must release them
//! explicitly, state first, exactly once.

use std::fmt;
use std::path::{Path, PathBuf};

/// Name given to an unnamed first joint, which is assumed to be the floating base.
pub const FLOATING_BASE_JOINT: &str = "floating_base_joint";

/// An opaque handle to a compiled model owned by a [`PhysicsEngine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModelHandle(pub u64);

/// An opaque handle to a simulation state owned by a [`PhysicsEngine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StateHandle(pub u64);

/// How an actuator transmits force into the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transmission {
    /// The actuator drives a single joint.
    Joint(usize),
    /// Any other transmission (tendon, site, body...).
    Other,
}

/// Static description of one joint.
#[derive(Debug, Clone, PartialEq)]
pub struct JointInfo {
    /// Joint name as declared in the model; may be empty.
    pub name: String,
    /// Address of the joint's first position coordinate in `qpos`.
    pub qpos_adr: usize,
    /// Address of the joint's first degree of freedom in `qvel`.
    pub dof_adr: usize,
}

/// Static description of a loaded model.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelInfo {
    /// Physics timestep in seconds.
    pub timestep: f64,
    /// Number of position coordinates.
    pub nq: usize,
    /// Number of degrees of freedom.
    pub nv: usize,
    /// Joints in model order.
    pub joints: Vec<JointInfo>,
    /// Actuators in model order.
    pub actuators: Vec<Transmission>,
    /// Body names in model order. Body 0 is the world.
    pub bodies: Vec<String>,
    /// Number of lights.
    pub nlight: usize,
    /// Rendered width of each tendon.
    pub tendon_widths: Vec<f64>,
}

impl ModelInfo {
    /// Number of actuators.
    pub fn nu(&self) -> usize {
        self.actuators.len()
    }

    /// Number of bodies.
    pub fn nbody(&self) -> usize {
        self.bodies.len()
    }

    /// Number of tendons.
    pub fn ntendon(&self) -> usize {
        self.tendon_widths.len()
    }

    /// Returns the name of joint `id`, naming an unnamed first joint
    /// [`FLOATING_BASE_JOINT`].
    pub fn joint_name(&self, id: usize) -> Option<&str> {
        let joint = self.joints.get(id)?;
        if joint.name.is_empty() && id == 0 {
            Some(FLOATING_BASE_JOINT)
        } else {
            Some(joint.name.as_str())
        }
    }

    /// Returns every joint name in model order, see [`ModelInfo::joint_name`].
    pub fn joint_names(&self) -> Vec<String> {
        (0..self.joints.len())
            .filter_map(|id| self.joint_name(id).map(str::to_owned))
            .collect()
    }

    /// Looks up a joint id by name.
    pub fn joint_id(&self, name: &str) -> Option<usize> {
        (0..self.joints.len()).find(|&id| self.joint_name(id) == Some(name))
    }

    /// Returns the first actuator whose transmission drives `joint_id`.
    pub fn actuator_for_joint(&self, joint_id: usize) -> Option<usize> {
        self.actuators
            .iter()
            .position(|t| *t == Transmission::Joint(joint_id))
    }

    /// Looks up a body id by name.
    pub fn body_id(&self, name: &str) -> Option<usize> {
        self.bodies.iter().position(|b| b == name)
    }
}

/// Per-field numeric arrays of a simulation state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SimData {
    /// Simulated time in seconds.
    pub time: f64,
    /// Generalized positions (`nq`).
    pub qpos: Vec<f64>,
    /// Generalized velocities (`nv`).
    pub qvel: Vec<f64>,
    /// Actuator commands (`nu`).
    pub ctrl: Vec<f64>,
    /// Applied generalized forces (`nv`).
    pub qfrc_applied: Vec<f64>,
    /// Applied Cartesian force and torque per body (`nbody * 6`).
    pub xfrc_applied: Vec<f64>,
    /// Body world positions (`nbody * 3`).
    pub xpos: Vec<f64>,
    /// Body world orientations, scalar first (`nbody * 4`).
    pub xquat: Vec<f64>,
    /// Light world positions (`nlight * 3`).
    pub light_xpos: Vec<f64>,
    /// Light world directions (`nlight * 3`).
    pub light_xdir: Vec<f64>,
    /// Tendon wrap point positions (`3` per wrap point).
    pub wrap_xpos: Vec<f64>,
    /// First wrap point of each tendon.
    pub ten_wrapadr: Vec<usize>,
    /// Number of wrap points of each tendon.
    pub ten_wrapnum: Vec<usize>,
}

impl SimData {
    /// Allocates a zeroed state sized for `model`, with identity orientations.
    pub fn zeroed(model: &ModelInfo) -> Self {
        let nbody = model.nbody();
        let mut xquat = vec![0.0; nbody * 4];
        for q in xquat.chunks_mut(4) {
            q[0] = 1.0;
        }
        Self {
            time: 0.0,
            qpos: vec![0.0; model.nq],
            qvel: vec![0.0; model.nv],
            ctrl: vec![0.0; model.nu()],
            qfrc_applied: vec![0.0; model.nv],
            xfrc_applied: vec![0.0; nbody * 6],
            xpos: vec![0.0; nbody * 3],
            xquat,
            light_xpos: vec![0.0; model.nlight * 3],
            light_xdir: vec![0.0; model.nlight * 3],
            wrap_xpos: Vec::new(),
            ten_wrapadr: vec![0; model.ntendon()],
            ten_wrapnum: vec![0; model.ntendon()],
        }
    }
}

/// Error type for physics engine operations.
#[derive(Debug)]
pub enum EngineError {
    /// The model file could not be loaded or compiled.
    ModelLoad {
        /// Path handed to the engine.
        path: PathBuf,
        /// Engine-provided reason.
        reason: String,
    },
    /// The model handle is unknown or was already deleted.
    UnknownModel(ModelHandle),
    /// The state handle is unknown or was already deleted.
    UnknownState(StateHandle),
    /// Any other native failure.
    Native(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::ModelLoad { path, reason } => {
                write!(f, "Failed to load model {}: {reason}", path.display())
            }
            EngineError::UnknownModel(h) => write!(f, "Unknown or deleted model handle {}", h.0),
            EngineError::UnknownState(h) => write!(f, "Unknown or deleted state handle {}", h.0),
            EngineError::Native(msg) => write!(f, "Physics engine failure: {msg}"),
        }
    }
}

impl std::error::Error for EngineError {}

/// The physics engine collaborator.
///
/// Handles are never reused after deletion: every call with a deleted handle
/// must fail with [`EngineError::UnknownModel`] or [`EngineError::UnknownState`].
pub trait PhysicsEngine: Send {
    /// Loads and compiles a model from a file on the engine's filesystem.
    fn load_model(&mut self, path: &Path) -> Result<ModelHandle, EngineError>;

    /// Allocates a state for a model.
    fn create_state(&mut self, model: ModelHandle) -> Result<StateHandle, EngineError>;

    /// Returns the static description of a model.
    fn model_info(&self, model: ModelHandle) -> Result<ModelInfo, EngineError>;

    /// Read access to a state's arrays.
    fn data(&self, state: StateHandle) -> Result<&SimData, EngineError>;

    /// Write access to a state's arrays.
    fn data_mut(&mut self, state: StateHandle) -> Result<&mut SimData, EngineError>;

    /// Advances the state by one timestep.
    fn step(&mut self, model: ModelHandle, state: StateHandle) -> Result<(), EngineError>;

    /// Recomputes derived quantities (world poses) without advancing time.
    fn forward(&mut self, model: ModelHandle, state: StateHandle) -> Result<(), EngineError>;

    /// Restores the state to the model's initial configuration.
    fn reset_state(&mut self, model: ModelHandle, state: StateHandle) -> Result<(), EngineError>;

    /// Frees a state.
    fn delete_state(&mut self, state: StateHandle) -> Result<(), EngineError>;

    /// Frees a model. Its states must have been deleted first.
    fn delete_model(&mut self, model: ModelHandle) -> Result<(), EngineError>;
}
