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

//! # Manager Protocol
//!
//! A **Manager** is a pluggable behavior unit driven by the simulation runtime:
//! the command layer, the action strategy, observation assembly and
//! environment effects are all managers.
//!
//! ## Lifecycle
//!
//! `unattached → attached → [sceneLoaded ⇄ policyLoaded/policyCleared]* → disposed`
//!
//! [`Manager::attach_runtime`] is called exactly once. [`Manager::dispose`]
//! must be safe without a prior attach.
//!
//! ## Capabilities
//!
//! Every hook has a no-op default. A manager declares which hooks it actually
//! implements through [`Manager::capabilities`]; the runtime reads the set
//! once at attach time and never dispatches a hook outside it.
//!
//! ## Context
//!
//! Managers never hold references into the runtime. Each hook receives a
//! borrowed view ([`RuntimeLink`], [`SimContext`] or [`CollectContext`]) of the
//! runtime-owned parameters, services and shared action state for the
//! duration of the call.

use std::any::Any;
use std::collections::VecDeque;
use std::fmt;
use std::ops::BitOr;

use crate::config::{AssetMetadata, PolicyDescriptor};
use crate::engine::{ModelInfo, SimData};
use crate::inference::TensorMap;
use crate::math::Quaternion;
use crate::params::RuntimeParams;
use crate::service_registry::ServiceRegistry;

// ─────────────────────────────────────────────────────────────────────
// Capabilities
// ─────────────────────────────────────────────────────────────────────

/// The set of hooks a manager implements.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Capabilities {
    bits: u16,
}

impl Capabilities {
    /// No hooks.
    pub const EMPTY: Self = Self { bits: 0 };
    /// [`Manager::on_init`].
    pub const INIT: Self = Self { bits: 1 << 0 };
    /// [`Manager::on_scene_loaded`].
    pub const SCENE_LOADED: Self = Self { bits: 1 << 1 };
    /// [`Manager::on_policy_loaded`].
    pub const POLICY_LOADED: Self = Self { bits: 1 << 2 };
    /// [`Manager::on_policy_cleared`].
    pub const POLICY_CLEARED: Self = Self { bits: 1 << 3 };
    /// [`Manager::before_step`].
    pub const BEFORE_STEP: Self = Self { bits: 1 << 4 };
    /// [`Manager::after_step`].
    pub const AFTER_STEP: Self = Self { bits: 1 << 5 };
    /// [`Manager::on_policy_output`].
    pub const POLICY_OUTPUT: Self = Self { bits: 1 << 6 };
    /// [`Manager::generate_action`].
    pub const GENERATE_ACTION: Self = Self { bits: 1 << 7 };
    /// [`Manager::collect`].
    pub const COLLECT: Self = Self { bits: 1 << 8 };
    /// [`Manager::reset`].
    pub const RESET: Self = Self { bits: 1 << 9 };
    /// [`Manager::dispose`].
    pub const DISPOSE: Self = Self { bits: 1 << 10 };

    /// Returns the raw bits.
    pub const fn bits(&self) -> u16 {
        self.bits
    }

    /// Returns `true` if all hooks in `other` are contained in `self`.
    pub const fn contains(&self, other: Self) -> bool {
        (self.bits & other.bits) == other.bits
    }

    /// Returns a new set with `other` added.
    #[must_use]
    pub const fn with(mut self, other: Self) -> Self {
        self.bits |= other.bits;
        self
    }
}

impl BitOr for Capabilities {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        self.with(rhs)
    }
}

impl fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [&str; 11] = [
            "INIT",
            "SCENE_LOADED",
            "POLICY_LOADED",
            "POLICY_CLEARED",
            "BEFORE_STEP",
            "AFTER_STEP",
            "POLICY_OUTPUT",
            "GENERATE_ACTION",
            "COLLECT",
            "RESET",
            "DISPOSE",
        ];
        let set: Vec<&str> = NAMES
            .iter()
            .enumerate()
            .filter(|(i, _)| self.bits & (1 << i) != 0)
            .map(|(_, n)| *n)
            .collect();
        write!(f, "Capabilities({})", set.join(" | "))
    }
}

/// The slot a manager occupies in the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ManagerRole {
    /// Translates user commands into parameter changes.
    Command,
    /// Produces actuator commands. Exactly one per runtime.
    Action,
    /// Assembles policy inputs.
    Observation,
    /// Applies environment effects around each physics step.
    Environment,
}

impl fmt::Display for ManagerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManagerRole::Command => write!(f, "Command"),
            ManagerRole::Action => write!(f, "Action"),
            ManagerRole::Observation => write!(f, "Observation"),
            ManagerRole::Environment => write!(f, "Environment"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────
// Shared action state
// ─────────────────────────────────────────────────────────────────────

/// Depth of the rolling action history.
pub const ACTION_HISTORY_DEPTH: usize = 4;

/// How actions become actuator commands.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ControlType {
    /// PD tracking of `scale * action + default_pos`.
    #[default]
    JointPosition,
    /// Direct torque `scale * action`.
    Torque,
    /// No actuation.
    None,
    /// An unrecognized mode; no actuator is written.
    Other(String),
}

impl ControlType {
    /// Parses a policy descriptor's `control_type`, defaulting to joint position.
    pub fn parse(value: Option<&str>) -> Self {
        match value {
            None | Some("joint_position") => ControlType::JointPosition,
            Some("torque") => ControlType::Torque,
            Some("none") => ControlType::None,
            Some(other) => ControlType::Other(other.to_owned()),
        }
    }
}

/// Action state published by the action manager for observation components.
#[derive(Debug, Clone, Default)]
pub struct ActionState {
    /// Canonical joint order of the policy.
    pub joint_names: Vec<String>,
    /// Default joint positions in canonical order.
    pub default_joint_pos: Vec<f32>,
    /// Smoothed action of the last policy output.
    pub last_actions: Vec<f32>,
    /// Past smoothed actions, newest first, always [`ACTION_HISTORY_DEPTH`] long
    /// once initialized.
    pub history: VecDeque<Vec<f32>>,
    /// Active control mode.
    pub control_type: ControlType,
}

impl ActionState {
    /// Number of actions per policy output.
    pub fn num_actions(&self) -> usize {
        self.last_actions.len()
    }

    /// Zeroes the smoothed action and the history for `n` actions.
    pub fn reset_actions(&mut self, n: usize) {
        self.last_actions = vec![0.0; n];
        self.history = (0..ACTION_HISTORY_DEPTH).map(|_| vec![0.0; n]).collect();
    }

    /// Pushes a copy of the current smoothed action as the newest history entry.
    pub fn push_history(&mut self) {
        self.history.push_front(self.last_actions.clone());
        self.history.truncate(ACTION_HISTORY_DEPTH);
    }
}

// ─────────────────────────────────────────────────────────────────────
// Hook contexts
// ─────────────────────────────────────────────────────────────────────

/// The runtime-owned state every hook may read and mutate.
pub struct RuntimeLink<'a> {
    /// Control parameters.
    pub params: &'a mut RuntimeParams,
    /// Published services.
    pub services: &'a mut ServiceRegistry,
    /// Shared action state.
    pub actions: &'a mut ActionState,
}

/// Context for hooks that run against a loaded scene.
pub struct SimContext<'a> {
    /// Static model description.
    pub model: &'a ModelInfo,
    /// Mutable simulation arrays.
    pub data: &'a mut SimData,
    /// Asset metadata of the scene, if any.
    pub asset_meta: Option<&'a AssetMetadata>,
    /// Control parameters.
    pub params: &'a mut RuntimeParams,
    /// Published services.
    pub services: &'a mut ServiceRegistry,
    /// Shared action state.
    pub actions: &'a mut ActionState,
    /// Physics timestep in seconds.
    pub timestep: f64,
    /// Index of the current physics sub-step within the control tick.
    pub substep: usize,
}

impl SimContext<'_> {
    /// Reborrows the runtime-owned part of the context.
    pub fn link(&mut self) -> RuntimeLink<'_> {
        RuntimeLink {
            params: &mut *self.params,
            services: &mut *self.services,
            actions: &mut *self.actions,
        }
    }
}

/// Orientation of the floating base, computed once per collection.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BaseFrame {
    /// Base orientation from `qpos[3..7]`.
    pub orientation: Quaternion,
    /// Heading angle.
    pub yaw: f32,
}

impl BaseFrame {
    /// Reads the base frame from the floating-base coordinates.
    pub fn from_qpos(qpos: &[f64]) -> Self {
        let orientation = Quaternion::from_wxyz(qpos, 3).unwrap_or_default();
        Self {
            orientation,
            yaw: orientation.yaw_xyz(),
        }
    }
}

/// Read-only context for observation collection and action generation.
pub struct CollectContext<'a> {
    /// Static model description.
    pub model: &'a ModelInfo,
    /// Simulation arrays.
    pub data: &'a SimData,
    /// Control parameters.
    pub params: &'a RuntimeParams,
    /// Published services.
    pub services: &'a ServiceRegistry,
    /// Shared action state.
    pub actions: &'a ActionState,
    /// Base frame at collection time.
    pub base: BaseFrame,
}

impl<'a> CollectContext<'a> {
    /// Builds a context, deriving the base frame from `data`.
    pub fn new(
        model: &'a ModelInfo,
        data: &'a SimData,
        params: &'a RuntimeParams,
        services: &'a ServiceRegistry,
        actions: &'a ActionState,
    ) -> Self {
        Self {
            model,
            data,
            params,
            services,
            actions,
            base: BaseFrame::from_qpos(&data.qpos),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────

/// Error type for manager hooks.
#[derive(Debug)]
pub enum ManagerError {
    /// A declared joint is absent from the loaded model.
    MissingJoint(String),
    /// An actuator does not drive a single joint.
    UnsupportedTransmission {
        /// Actuator index.
        actuator: usize,
    },
    /// Recorded data and the live model disagree on the joint count.
    JointCountMismatch {
        /// Joints mapped in the live model.
        expected: usize,
        /// Values per recorded frame.
        found: usize,
    },
    /// An observation descriptor names no known component.
    UnknownObservation(String),
    /// A descriptor could not be interpreted.
    InvalidConfig(String),
    /// A hook that needs a scene ran without one.
    NoScene,
}

impl fmt::Display for ManagerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManagerError::MissingJoint(name) => {
                write!(f, "Failed to find joint '{name}' in model")
            }
            ManagerError::UnsupportedTransmission { actuator } => {
                write!(f, "Actuator {actuator} must drive a joint")
            }
            ManagerError::JointCountMismatch { expected, found } => write!(
                f,
                "Trajectory has {found} joints per frame but the model maps {expected}"
            ),
            ManagerError::UnknownObservation(name) => {
                write!(f, "Unknown observation type: {name}")
            }
            ManagerError::InvalidConfig(msg) => write!(f, "Invalid manager config: {msg}"),
            ManagerError::NoScene => write!(f, "No scene is loaded"),
        }
    }
}

impl std::error::Error for ManagerError {}

// ─────────────────────────────────────────────────────────────────────
// Manager trait
// ─────────────────────────────────────────────────────────────────────

/// A pluggable behavior unit driven by the runtime.
///
/// Hooks return `Err` only for unexpected conditions; the runtime propagates
/// such errors and aborts the current tick.
pub trait Manager: Send {
    /// A short human-readable name for logs.
    fn name(&self) -> &'static str;

    /// The slot this manager occupies.
    fn role(&self) -> ManagerRole;

    /// The hooks this manager implements. Read once at attach time.
    fn capabilities(&self) -> Capabilities;

    /// Called exactly once when the manager joins a runtime.
    fn attach_runtime(&mut self, _link: &mut RuntimeLink<'_>) -> Result<(), ManagerError> {
        Ok(())
    }

    /// One-time setup after every manager is attached.
    fn on_init(&mut self) -> Result<(), ManagerError> {
        Ok(())
    }

    /// Rebuilds scene-derived state.
    fn on_scene_loaded(&mut self, _ctx: &mut SimContext<'_>) -> Result<(), ManagerError> {
        Ok(())
    }

    /// Rebuilds policy-derived state.
    fn on_policy_loaded(
        &mut self,
        _policy: &PolicyDescriptor,
        _ctx: &mut SimContext<'_>,
    ) -> Result<(), ManagerError> {
        Ok(())
    }

    /// Drops policy-derived state.
    fn on_policy_cleared(&mut self, _link: &mut RuntimeLink<'_>) -> Result<(), ManagerError> {
        Ok(())
    }

    /// Runs before every physics sub-step.
    fn before_step(&mut self, _ctx: &mut SimContext<'_>) -> Result<(), ManagerError> {
        Ok(())
    }

    /// Runs after every physics sub-step.
    fn after_step(&mut self, _ctx: &mut SimContext<'_>) -> Result<(), ManagerError> {
        Ok(())
    }

    /// Consumes one inference result.
    fn on_policy_output(
        &mut self,
        _output: &TensorMap,
        _link: &mut RuntimeLink<'_>,
    ) -> Result<(), ManagerError> {
        Ok(())
    }

    /// Produces an actuator command without a policy.
    fn generate_action(&mut self, _ctx: &CollectContext<'_>) -> Result<Vec<f32>, ManagerError> {
        Ok(Vec::new())
    }

    /// Produces policy inputs.
    fn collect(&mut self, _ctx: &CollectContext<'_>) -> Result<TensorMap, ManagerError> {
        Ok(TensorMap::new())
    }

    /// Returns to the initial state without reloading anything.
    fn reset(&mut self, _link: &mut RuntimeLink<'_>) -> Result<(), ManagerError> {
        Ok(())
    }

    /// Releases buffers and withdraws published services.
    fn dispose(&mut self, _link: &mut RuntimeLink<'_>) {}

    /// Returns a reference to the concrete type.
    fn as_any(&self) -> &dyn Any;

    /// Returns a mutable reference to the concrete type.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_set_operations() {
        let caps = Capabilities::SCENE_LOADED | Capabilities::BEFORE_STEP;
        assert!(caps.contains(Capabilities::SCENE_LOADED));
        assert!(!caps.contains(Capabilities::AFTER_STEP));
        assert!(caps.contains(Capabilities::EMPTY));
        assert_eq!(
            format!("{caps:?}"),
            "Capabilities(SCENE_LOADED | BEFORE_STEP)"
        );
    }

    #[test]
    fn test_control_type_parsing() {
        assert_eq!(ControlType::parse(None), ControlType::JointPosition);
        assert_eq!(ControlType::parse(Some("torque")), ControlType::Torque);
        assert_eq!(
            ControlType::parse(Some("velocity")),
            ControlType::Other("velocity".into())
        );
    }

    #[test]
    fn test_action_history_stays_bounded() {
        let mut state = ActionState::default();
        state.reset_actions(2);
        assert_eq!(state.history.len(), ACTION_HISTORY_DEPTH);
        for i in 0..6 {
            state.last_actions = vec![i as f32; 2];
            state.push_history();
        }
        assert_eq!(state.history.len(), ACTION_HISTORY_DEPTH);
        assert_eq!(state.history[0], vec![5.0, 5.0]);
        assert_eq!(state.history[3], vec![2.0, 2.0]);
    }
}
