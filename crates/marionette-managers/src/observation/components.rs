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

//! Atomic observation components and the descriptors that build them.

use std::f32::consts::PI;

use serde::Deserialize;

use marionette_core::engine::{JointInfo, ModelInfo, FLOATING_BASE_JOINT};
use marionette_core::manager::{ActionState, CollectContext};
use marionette_core::math::{Quaternion, Vec3};
use marionette_core::ManagerError;

use super::history::StepHistory;
use crate::environment::{SetpointControl, SETPOINT_SERVICE};

/// Every component name a descriptor may use.
pub const COMPONENT_NAMES: &[&str] = &[
    "BaseLinearVelocity",
    "BaseAngularVelocity",
    "ProjectedGravity",
    "JointPositions",
    "JointVelocities",
    "PreviousActions",
    "SimpleVelocityCommand",
    "VelocityCommand",
    "VelocityCommandWithOscillators",
    "ImpedanceCommand",
    "Oscillator",
];

/// Keyword that expands to the action manager's canonical joint order.
pub const ISAAC_JOINT_ORDER: &str = "isaac";

/// Gait oscillator frequency in rad/s.
pub const OSCILLATOR_OMEGA: f32 = 4.0 * PI;

/// Upper bound on the impedance setpoint distance, in meters.
pub const MAX_SETPOINT_DISTANCE: f32 = 2.0;

/// Lower bound applied to the configured body mass.
pub const MIN_MASS: f32 = 1e-4;

/// One atomic piece of an observation vector.
pub trait ObservationComponent: Send + std::fmt::Debug {
    /// Descriptor name of the component.
    fn name(&self) -> &'static str;

    /// Length of every vector returned by [`compute`](Self::compute).
    fn dims(&self) -> usize;

    /// Computes the current values. May advance internal history.
    fn compute(&mut self, ctx: &CollectContext<'_>) -> Vec<f32>;
}

// ─────────────────────────────────────────────────────────────────────
// Descriptors
// ─────────────────────────────────────────────────────────────────────

/// A scale given once for all axes or per axis.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ScaleSpec {
    /// Same scale on every axis.
    Uniform(f32),
    /// One scale per axis.
    PerAxis([f32; 3]),
}

impl Default for ScaleSpec {
    fn default() -> Self {
        ScaleSpec::Uniform(1.0)
    }
}

impl ScaleSpec {
    /// Expands to one scale per axis.
    pub fn per_axis(self) -> [f32; 3] {
        match self {
            ScaleSpec::Uniform(s) => [s; 3],
            ScaleSpec::PerAxis(s) => s,
        }
    }
}

/// A joint list, literal or by keyword.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum JointNamesSpec {
    /// A named order, e.g. `"isaac"`.
    Keyword(String),
    /// Explicit joint names.
    List(Vec<String>),
}

impl Default for JointNamesSpec {
    fn default() -> Self {
        JointNamesSpec::List(Vec::new())
    }
}

impl JointNamesSpec {
    fn resolve(self, actions: &ActionState) -> Result<Vec<String>, ManagerError> {
        match self {
            JointNamesSpec::List(names) => Ok(names),
            JointNamesSpec::Keyword(k) if k == ISAAC_JOINT_ORDER => Ok(actions.joint_names.clone()),
            JointNamesSpec::Keyword(k) => Err(ManagerError::InvalidConfig(format!(
                "unknown joint order '{k}'"
            ))),
        }
    }
}

fn one() -> f32 {
    1.0
}

fn one_step() -> usize {
    1
}

fn setpoint_service() -> String {
    SETPOINT_SERVICE.to_owned()
}

fn down() -> [f32; 3] {
    [0.0, 0.0, -1.0]
}

fn floating_base() -> String {
    FLOATING_BASE_JOINT.to_owned()
}

/// Declarative description of one component, keyed by `name`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "name")]
pub enum ComponentSpec {
    /// Base linear velocity in the base frame.
    BaseLinearVelocity {
        /// Steps of history.
        #[serde(default = "one_step")]
        history_steps: usize,
        /// Output scale.
        #[serde(default = "one")]
        scale: f32,
    },
    /// Base angular velocity.
    BaseAngularVelocity {
        /// Steps of history.
        #[serde(default = "one_step")]
        history_steps: usize,
        /// Output scale.
        #[serde(default = "one")]
        scale: f32,
        /// Keep the world frame instead of rotating into the base frame.
        #[serde(default)]
        world_frame: bool,
    },
    /// A gravity direction in the frame of a free joint.
    ProjectedGravity {
        /// Steps of history.
        #[serde(default = "one_step")]
        history_steps: usize,
        /// Free joint whose orientation defines the frame.
        #[serde(default = "floating_base")]
        joint_name: String,
        /// World gravity direction.
        #[serde(default = "down")]
        gravity: [f32; 3],
    },
    /// Joint positions.
    JointPositions {
        /// Steps of history.
        #[serde(default = "one_step")]
        history_steps: usize,
        /// Joints to read.
        #[serde(default)]
        joint_names: JointNamesSpec,
        /// Report the offset from the default pose.
        #[serde(default)]
        subtract_default: bool,
        /// Output scale.
        #[serde(default = "one")]
        scale: f32,
    },
    /// Joint velocities.
    JointVelocities {
        /// Steps of history.
        #[serde(default = "one_step")]
        history_steps: usize,
        /// Joints to read.
        #[serde(default)]
        joint_names: JointNamesSpec,
        /// Output scale.
        #[serde(default = "one")]
        scale: f32,
    },
    /// The smoothed action history.
    PreviousActions {
        /// Steps of history.
        #[serde(default = "one_step")]
        history_steps: usize,
        /// Lay the history out joint-major.
        #[serde(default)]
        transpose: bool,
    },
    /// The commanded forward velocity.
    SimpleVelocityCommand {
        /// Steps of history.
        #[serde(default = "one_step")]
        history_steps: usize,
        /// Per-axis scale.
        #[serde(default)]
        scale: ScaleSpec,
    },
    /// The commanded velocity in the base frame plus a heading correction.
    VelocityCommand {
        /// Heading correction gain.
        #[serde(default = "one")]
        angvel_kp: f32,
        /// Per-axis scale.
        #[serde(default)]
        scale: ScaleSpec,
    },
    /// [`ComponentSpec::VelocityCommand`] followed by gait oscillators.
    VelocityCommandWithOscillators {
        /// Heading correction gain.
        #[serde(default = "one")]
        angvel_kp: f32,
    },
    /// Impedance setpoint features followed by gait oscillators.
    ImpedanceCommand {
        /// Nominal body mass.
        #[serde(default = "one")]
        mass: f32,
        /// Registry name of the setpoint service.
        #[serde(default = "setpoint_service")]
        service: String,
    },
    /// Gait oscillator phases.
    Oscillator,
}

impl ComponentSpec {
    /// Parses a descriptor, reporting unknown names distinctly.
    pub fn from_value(value: serde_json::Value) -> Result<Self, ManagerError> {
        let name = value
            .get("name")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| ManagerError::InvalidConfig("observation entry without a name".to_owned()))?
            .to_owned();
        if !COMPONENT_NAMES.contains(&name.as_str()) {
            return Err(ManagerError::UnknownObservation(name));
        }
        serde_json::from_value(value)
            .map_err(|e| ManagerError::InvalidConfig(format!("{name}: {e}")))
    }

    /// Builds the component against the live model and action state.
    pub fn build(
        self,
        model: &ModelInfo,
        actions: &ActionState,
    ) -> Result<Box<dyn ObservationComponent>, ManagerError> {
        Ok(match self {
            ComponentSpec::BaseLinearVelocity { history_steps, scale } => Box::new(BaseLinearVelocity {
                scale,
                history: StepHistory::new(3, history_steps),
            }),
            ComponentSpec::BaseAngularVelocity {
                history_steps,
                scale,
                world_frame,
            } => Box::new(BaseAngularVelocity {
                scale,
                world_frame,
                history: StepHistory::new(3, history_steps),
            }),
            ComponentSpec::ProjectedGravity {
                history_steps,
                joint_name,
                gravity,
            } => {
                let joint = model
                    .joint_id(&joint_name)
                    .ok_or(ManagerError::MissingJoint(joint_name))?;
                Box::new(ProjectedGravity {
                    quat_adr: model.joints[joint].qpos_adr + 3,
                    gravity: Vec3::new(gravity[0], gravity[1], gravity[2]),
                    history: StepHistory::new(3, history_steps),
                })
            }
            ComponentSpec::JointPositions {
                history_steps,
                joint_names,
                subtract_default,
                scale,
            } => {
                let joints = joint_names.resolve(actions)?;
                let qpos_adr = addresses(model, &joints, |j| j.qpos_adr)?;
                Box::new(JointPositions {
                    history: StepHistory::new(qpos_adr.len(), history_steps),
                    qpos_adr,
                    subtract_default,
                    scale,
                })
            }
            ComponentSpec::JointVelocities {
                history_steps,
                joint_names,
                scale,
            } => {
                let joints = joint_names.resolve(actions)?;
                let dof_adr = addresses(model, &joints, |j| j.dof_adr)?;
                Box::new(JointVelocities {
                    history: StepHistory::new(dof_adr.len(), history_steps),
                    dof_adr,
                    scale,
                })
            }
            ComponentSpec::PreviousActions {
                history_steps,
                transpose,
            } => Box::new(PreviousActions {
                num_actions: actions.num_actions(),
                steps: history_steps.max(1),
                transpose,
            }),
            ComponentSpec::SimpleVelocityCommand {
                history_steps,
                scale,
            } => Box::new(SimpleVelocityCommand {
                steps: history_steps.max(1),
                scale: scale.per_axis(),
            }),
            ComponentSpec::VelocityCommand { angvel_kp, scale } => Box::new(VelocityCommand {
                angvel_kp,
                scale: scale.per_axis(),
            }),
            ComponentSpec::VelocityCommandWithOscillators { angvel_kp } => {
                Box::new(VelocityCommandWithOscillators { angvel_kp })
            }
            ComponentSpec::ImpedanceCommand { mass, service } => Box::new(ImpedanceCommand {
                mass: mass.max(MIN_MASS),
                service,
            }),
            ComponentSpec::Oscillator => Box::new(Oscillator),
        })
    }
}

fn addresses(
    model: &ModelInfo,
    joints: &[String],
    field: impl Fn(&JointInfo) -> usize,
) -> Result<Vec<usize>, ManagerError> {
    joints
        .iter()
        .map(|name| {
            model
                .joint_id(name)
                .map(|id| field(&model.joints[id]))
                .ok_or_else(|| ManagerError::MissingJoint(name.clone()))
        })
        .collect()
}

fn read_vec3(values: &[f64], offset: usize) -> Vec3 {
    Vec3::from_slice_f64(values, offset).unwrap_or(Vec3::ZERO)
}

/// Gait phase features at simulated time `t`: four sines, four cosines and
/// four copies of the frequency.
pub fn oscillator(t: f64) -> [f32; 12] {
    let wt = OSCILLATOR_OMEGA * t as f32;
    let phase = [wt + PI, wt, wt, wt + PI];
    let mut out = [OSCILLATOR_OMEGA; 12];
    for (i, p) in phase.iter().enumerate() {
        out[i] = p.sin();
        out[4 + i] = p.cos();
    }
    out
}

// ─────────────────────────────────────────────────────────────────────
// Base state
// ─────────────────────────────────────────────────────────────────────

#[derive(Debug)]
struct BaseLinearVelocity {
    scale: f32,
    history: StepHistory,
}

impl ObservationComponent for BaseLinearVelocity {
    fn name(&self) -> &'static str {
        "BaseLinearVelocity"
    }

    fn dims(&self) -> usize {
        self.history.dims()
    }

    fn compute(&mut self, ctx: &CollectContext<'_>) -> Vec<f32> {
        let world = read_vec3(&ctx.data.qvel, 0);
        let local = ctx.base.orientation.inverse().rotate_vec3(world) * self.scale;
        self.history.push(local.to_array().to_vec())
    }
}

#[derive(Debug)]
struct BaseAngularVelocity {
    scale: f32,
    world_frame: bool,
    history: StepHistory,
}

impl ObservationComponent for BaseAngularVelocity {
    fn name(&self) -> &'static str {
        "BaseAngularVelocity"
    }

    fn dims(&self) -> usize {
        self.history.dims()
    }

    fn compute(&mut self, ctx: &CollectContext<'_>) -> Vec<f32> {
        let mut omega = read_vec3(&ctx.data.qvel, 3);
        if !self.world_frame {
            omega = ctx.base.orientation.inverse().rotate_vec3(omega);
        }
        self.history.push((omega * self.scale).to_array().to_vec())
    }
}

#[derive(Debug)]
struct ProjectedGravity {
    quat_adr: usize,
    gravity: Vec3,
    history: StepHistory,
}

impl ObservationComponent for ProjectedGravity {
    fn name(&self) -> &'static str {
        "ProjectedGravity"
    }

    fn dims(&self) -> usize {
        self.history.dims()
    }

    fn compute(&mut self, ctx: &CollectContext<'_>) -> Vec<f32> {
        let quat = Quaternion::from_wxyz(&ctx.data.qpos, self.quat_adr).unwrap_or_default();
        let projected = quat.inverse().rotate_vec3(self.gravity);
        self.history.push(projected.to_array().to_vec())
    }
}

// ─────────────────────────────────────────────────────────────────────
// Joints and actions
// ─────────────────────────────────────────────────────────────────────

#[derive(Debug)]
struct JointPositions {
    qpos_adr: Vec<usize>,
    subtract_default: bool,
    scale: f32,
    history: StepHistory,
}

impl ObservationComponent for JointPositions {
    fn name(&self) -> &'static str {
        "JointPositions"
    }

    fn dims(&self) -> usize {
        self.history.dims()
    }

    fn compute(&mut self, ctx: &CollectContext<'_>) -> Vec<f32> {
        let defaults = &ctx.actions.default_joint_pos;
        let frame = self
            .qpos_adr
            .iter()
            .enumerate()
            .map(|(i, &adr)| {
                let mut pos = ctx.data.qpos[adr] as f32;
                if self.subtract_default {
                    pos -= defaults.get(i).copied().unwrap_or(0.0);
                }
                pos * self.scale
            })
            .collect();
        self.history.push(frame)
    }
}

#[derive(Debug)]
struct JointVelocities {
    dof_adr: Vec<usize>,
    scale: f32,
    history: StepHistory,
}

impl ObservationComponent for JointVelocities {
    fn name(&self) -> &'static str {
        "JointVelocities"
    }

    fn dims(&self) -> usize {
        self.history.dims()
    }

    fn compute(&mut self, ctx: &CollectContext<'_>) -> Vec<f32> {
        let frame = self
            .dof_adr
            .iter()
            .map(|&adr| ctx.data.qvel[adr] as f32 * self.scale)
            .collect();
        self.history.push(frame)
    }
}

/// Reads the shared action history rather than keeping its own.
#[derive(Debug)]
struct PreviousActions {
    num_actions: usize,
    steps: usize,
    transpose: bool,
}

impl ObservationComponent for PreviousActions {
    fn name(&self) -> &'static str {
        "PreviousActions"
    }

    fn dims(&self) -> usize {
        self.num_actions * self.steps
    }

    fn compute(&mut self, ctx: &CollectContext<'_>) -> Vec<f32> {
        let n = self.num_actions;
        let mut flat = vec![0.0; n * self.steps];
        for i in 0..self.steps {
            let Some(step) = ctx.actions.history.get(i) else {
                continue;
            };
            for (j, value) in step.iter().take(n).enumerate() {
                if self.transpose {
                    flat[j * self.steps + i] = *value;
                } else {
                    flat[i * n + j] = *value;
                }
            }
        }
        flat
    }
}

// ─────────────────────────────────────────────────────────────────────
// Commands
// ─────────────────────────────────────────────────────────────────────

#[derive(Debug)]
struct SimpleVelocityCommand {
    steps: usize,
    scale: [f32; 3],
}

impl ObservationComponent for SimpleVelocityCommand {
    fn name(&self) -> &'static str {
        "SimpleVelocityCommand"
    }

    fn dims(&self) -> usize {
        3 * self.steps
    }

    fn compute(&mut self, ctx: &CollectContext<'_>) -> Vec<f32> {
        let command = [ctx.params.command_vel_x * self.scale[0], 0.0, 0.0];
        command.repeat(self.steps)
    }
}

/// The world-frame forward command rotated into the base frame.
fn body_velocity_command(ctx: &CollectContext<'_>) -> Vec3 {
    let command = Vec3::new(ctx.params.command_vel_x, 0.0, 0.0);
    ctx.base.orientation.inverse().rotate_vec3(command)
}

#[derive(Debug)]
struct VelocityCommand {
    angvel_kp: f32,
    scale: [f32; 3],
}

impl ObservationComponent for VelocityCommand {
    fn name(&self) -> &'static str {
        "VelocityCommand"
    }

    fn dims(&self) -> usize {
        3
    }

    fn compute(&mut self, ctx: &CollectContext<'_>) -> Vec<f32> {
        let v = body_velocity_command(ctx);
        vec![
            v.x * self.scale[0],
            v.y * self.scale[1],
            self.angvel_kp * (0.0 - ctx.base.yaw) * self.scale[2],
        ]
    }
}

#[derive(Debug)]
struct VelocityCommandWithOscillators {
    angvel_kp: f32,
}

impl ObservationComponent for VelocityCommandWithOscillators {
    fn name(&self) -> &'static str {
        "VelocityCommandWithOscillators"
    }

    fn dims(&self) -> usize {
        16
    }

    fn compute(&mut self, ctx: &CollectContext<'_>) -> Vec<f32> {
        let v = body_velocity_command(ctx);
        let mut out = vec![v.x, v.y, self.angvel_kp * (0.0 - ctx.base.yaw), 0.0];
        out.extend_from_slice(&oscillator(ctx.data.time));
        out
    }
}

/// Impedance-control features for policies steered by a spring setpoint.
///
/// The setpoint lives in the simulation frame; the marker published by the
/// setpoint service lives in the render frame (`y` up), so `sim.y = -render.z`.
#[derive(Debug)]
struct ImpedanceCommand {
    mass: f32,
    service: String,
}

impl ImpedanceCommand {
    fn setpoint(&self, ctx: &CollectContext<'_>, base_pos: Vec3, kp: f32, kd: f32) -> Vec3 {
        let params = ctx.params;
        let mut setpoint = if params.compliant_mode {
            base_pos
        } else {
            let kp_or_one = if kp == 0.0 { 1.0 } else { kp };
            Vec3::new(params.command_vel_x, 0.0, 0.0) * (kd / kp_or_one) + base_pos
        };

        let service = ctx.services.get::<SetpointControl>(&self.service);
        match service {
            Some(marker) if params.use_setpoint => {
                let m = marker.marker_position();
                setpoint = Vec3::new(m.x, -m.z, 0.0);
            }
            Some(marker) => {
                let height = marker.marker_position().y;
                marker.set_position(setpoint.x, height, -setpoint.y);
            }
            None => {}
        }
        setpoint
    }
}

impl ObservationComponent for ImpedanceCommand {
    fn name(&self) -> &'static str {
        "ImpedanceCommand"
    }

    fn dims(&self) -> usize {
        27
    }

    fn compute(&mut self, ctx: &CollectContext<'_>) -> Vec<f32> {
        let kp = ctx.params.impedance_kp;
        let kd = 1.8 * kp.max(1e-4).sqrt();
        let base_pos = read_vec3(&ctx.data.qpos, 0);

        let setpoint = self.setpoint(ctx, base_pos, kp, kd);
        let local = ctx.base.orientation.inverse().rotate_vec3(setpoint - base_pos);
        let sb = local.normalize() * local.length().min(MAX_SETPOINT_DISTANCE);

        let heading = 0.0 - ctx.base.yaw;
        let m = self.mass;
        let mut out = vec![
            sb.x,
            sb.y,
            heading,
            kp * sb.x,
            kp * sb.y,
            kd,
            kd,
            kd,
            kp * heading,
            m,
            kp * sb.x / m,
            kp * sb.y / m,
            kd / m,
            kd / m,
            kd / m,
        ];
        out.extend_from_slice(&oscillator(ctx.data.time));
        out
    }
}

#[derive(Debug)]
struct Oscillator;

impl ObservationComponent for Oscillator {
    fn name(&self) -> &'static str {
        "Oscillator"
    }

    fn dims(&self) -> usize {
        12
    }

    fn compute(&mut self, ctx: &CollectContext<'_>) -> Vec<f32> {
        oscillator(ctx.data.time).to_vec()
    }
}
