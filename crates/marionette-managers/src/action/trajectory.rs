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

//! Playback of recorded joint trajectories with PD tracking.

use std::any::Any;
use std::time::{Duration, Instant};

use marionette_core::config::{JointValues, TrajectoryDocument, TrajectoryFrame};
use marionette_core::manager::{
    Capabilities, CollectContext, Manager, ManagerRole, RuntimeLink, SimContext,
};
use marionette_core::ManagerError;

use super::JointMap;

/// Frame interval used when a trajectory declares none.
pub const DEFAULT_FRAME_DT: f64 = 0.02;

/// Proportional and derivative gains of the tracking controller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PdGains {
    /// Position gain.
    pub kp: f64,
    /// Velocity gain.
    pub kd: f64,
}

impl Default for PdGains {
    fn default() -> Self {
        Self { kp: 25.0, kd: 0.5 }
    }
}

#[derive(Debug, Clone)]
struct Trajectory {
    name: String,
    dt: f64,
    joint_names: Option<Vec<String>>,
    frames: Vec<TrajectoryFrame>,
}

impl Trajectory {
    fn from_document(doc: TrajectoryDocument) -> Result<Self, ManagerError> {
        if doc.frames.is_empty() {
            return Err(ManagerError::InvalidConfig(
                "trajectory has no frames".to_owned(),
            ));
        }
        Ok(Self {
            name: doc.name.unwrap_or_else(|| "unnamed".to_owned()),
            dt: doc.dt.filter(|dt| *dt > 0.0).unwrap_or(DEFAULT_FRAME_DT),
            // An empty name list carries no mapping; fall back to positions.
            joint_names: doc.joint_names.filter(|names| !names.is_empty()),
            frames: doc.frames,
        })
    }

    /// Rejects positional frames whose width disagrees with the mapped joints.
    fn validate(&self, joints: &JointMap) -> Result<(), ManagerError> {
        if self.joint_names.is_some() || joints.is_empty() {
            return Ok(());
        }
        for frame in &self.frames {
            if let Some(JointValues::Array(values)) = &frame.qpos {
                if values.len() != joints.len() {
                    return Err(ManagerError::JointCountMismatch {
                        expected: joints.len(),
                        found: values.len(),
                    });
                }
            }
        }
        Ok(())
    }

    /// For every mapped joint, the trajectory column holding its values.
    fn remap(&self, joints: &JointMap) -> Vec<Option<usize>> {
        match &self.joint_names {
            Some(names) => joints
                .names
                .iter()
                .map(|joint| names.iter().position(|n| n == joint))
                .collect(),
            None => (0..joints.len()).map(Some).collect(),
        }
    }

    fn column_name<'a>(&'a self, column: usize, joints: &'a JointMap) -> Option<&'a str> {
        self.joint_names
            .as_ref()
            .and_then(|names| names.get(column))
            .or_else(|| joints.names.get(column))
            .map(String::as_str)
    }

    fn value(&self, values: Option<&JointValues>, column: usize, joints: &JointMap) -> Option<f64> {
        match values? {
            JointValues::Array(v) => v.get(column).copied(),
            JointValues::Named(map) => map.get(self.column_name(column, joints)?).copied(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Playback {
    Stopped,
    Playing { start: Instant },
    /// Finished without looping; the final frame stays commanded.
    Holding,
}

/// Replays a recorded trajectory by PD-tracking its frames.
///
/// The frame is chosen from wall-clock time since [`play`](Self::play):
/// `floor(elapsed / dt)`. Past the last frame, playback wraps to frame 0 when
/// looping, otherwise it stops and keeps commanding the final frame.
#[derive(Debug)]
pub struct TrajectoryPlayback {
    gains: PdGains,
    looping: bool,
    trajectory: Option<Trajectory>,
    joints: JointMap,
    remap: Vec<Option<usize>>,
    nu: usize,
    scene_ready: bool,
    playback: Playback,
    current_frame: usize,
}

impl Default for TrajectoryPlayback {
    fn default() -> Self {
        Self {
            gains: PdGains::default(),
            looping: false,
            trajectory: None,
            joints: JointMap::default(),
            remap: Vec::new(),
            nu: 0,
            scene_ready: false,
            playback: Playback::Stopped,
            current_frame: 0,
        }
    }
}

impl TrajectoryPlayback {
    /// Creates the manager with default gains and looping disabled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a trajectory, replacing any previous one, and stops playback.
    ///
    /// With a scene loaded, positional frames must be as wide as the mapped
    /// joint list unless the trajectory names its joints.
    pub fn load(&mut self, doc: TrajectoryDocument) -> Result<(), ManagerError> {
        let trajectory = Trajectory::from_document(doc)?;
        if self.scene_ready {
            trajectory.validate(&self.joints)?;
            self.remap = trajectory.remap(&self.joints);
        }
        log::info!(
            "[TrajectoryPlayback] Loaded '{}' ({} frames, dt {})",
            trajectory.name,
            trajectory.frames.len(),
            trajectory.dt
        );
        self.trajectory = Some(trajectory);
        self.stop();
        self.current_frame = 0;
        Ok(())
    }

    /// Name of the loaded trajectory.
    pub fn trajectory_name(&self) -> Option<&str> {
        self.trajectory.as_ref().map(|t| t.name.as_str())
    }

    /// Number of frames of the loaded trajectory.
    pub fn frame_count(&self) -> usize {
        self.trajectory.as_ref().map_or(0, |t| t.frames.len())
    }

    /// Total playback time of the loaded trajectory.
    pub fn duration(&self) -> Duration {
        self.trajectory.as_ref().map_or(Duration::ZERO, |t| {
            Duration::from_secs_f64(t.frames.len() as f64 * t.dt)
        })
    }

    /// Enables or disables wrapping at the end of the trajectory.
    pub fn set_loop(&mut self, looping: bool) {
        self.looping = looping;
    }

    /// Replaces the tracking gains.
    pub fn set_pd_gains(&mut self, gains: PdGains) {
        self.gains = gains;
    }

    /// Current tracking gains.
    pub fn gains(&self) -> PdGains {
        self.gains
    }

    /// Returns `true` while playback is running.
    pub fn is_playing(&self) -> bool {
        matches!(self.playback, Playback::Playing { .. })
    }

    /// Index of the frame commanded by the last generated action.
    pub fn current_frame(&self) -> usize {
        self.current_frame
    }

    /// Starts playback from frame 0 now.
    pub fn play(&mut self) {
        self.play_at(Instant::now());
    }

    /// Starts playback from frame 0 at `now`. Without a trajectory this is a
    /// no-op.
    pub fn play_at(&mut self, now: Instant) {
        if self.trajectory.is_none() {
            log::warn!("[TrajectoryPlayback] No trajectory loaded");
            return;
        }
        self.playback = Playback::Playing { start: now };
        self.current_frame = 0;
    }

    /// Stops playback. The actuator command returns to zero.
    pub fn stop(&mut self) {
        self.playback = Playback::Stopped;
    }

    /// Rewinds to frame 0, restarting the clock if playing.
    pub fn reset_at(&mut self, now: Instant) {
        self.current_frame = 0;
        self.playback = match self.playback {
            Playback::Playing { .. } => Playback::Playing { start: now },
            Playback::Stopped | Playback::Holding => Playback::Stopped,
        };
    }

    /// Computes the actuator command at `now`.
    ///
    /// The result always has one entry per actuator. It is all zeros when no
    /// scene or trajectory is loaded and while stopped.
    pub fn generate_action_at(&mut self, ctx: &CollectContext<'_>, now: Instant) -> Vec<f32> {
        let mut command = vec![0.0; self.nu];
        if !self.scene_ready {
            return command;
        }
        let Some(trajectory) = self.trajectory.as_ref() else {
            return command;
        };

        match self.playback {
            Playback::Stopped => return command,
            Playback::Holding => {}
            Playback::Playing { start } => {
                let elapsed = now.saturating_duration_since(start).as_secs_f64();
                let frame = (elapsed / trajectory.dt).floor() as usize;
                if frame < trajectory.frames.len() {
                    self.current_frame = frame;
                } else if self.looping {
                    self.playback = Playback::Playing { start: now };
                    self.current_frame = 0;
                } else {
                    self.playback = Playback::Holding;
                    self.current_frame = trajectory.frames.len() - 1;
                    log::debug!("[TrajectoryPlayback] Reached the end of '{}'", trajectory.name);
                }
            }
        }

        let frame = &trajectory.frames[self.current_frame.min(trajectory.frames.len() - 1)];
        let Some(qpos) = frame.qpos.as_ref() else {
            return command;
        };

        let data = ctx.data;
        for (i, column) in self.remap.iter().enumerate() {
            let (Some(column), Some(ctrl)) = (*column, self.joints.ctrl[i]) else {
                continue;
            };
            let Some(target_pos) = trajectory.value(Some(qpos), column, &self.joints) else {
                continue;
            };
            let target_vel = trajectory
                .value(frame.qvel.as_ref(), column, &self.joints)
                .unwrap_or(0.0);
            let q = data.qpos[self.joints.qpos[i]];
            let qd = data.qvel[self.joints.qvel[i]];
            let cmd = self.gains.kp * (target_pos - q) + self.gains.kd * (target_vel - qd);
            if let Some(slot) = command.get_mut(ctrl) {
                *slot = cmd as f32;
            }
        }
        command
    }
}

impl Manager for TrajectoryPlayback {
    fn name(&self) -> &'static str {
        "TrajectoryPlayback"
    }

    fn role(&self) -> ManagerRole {
        ManagerRole::Action
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::SCENE_LOADED
            | Capabilities::POLICY_CLEARED
            | Capabilities::GENERATE_ACTION
            | Capabilities::RESET
            | Capabilities::DISPOSE
    }

    fn on_scene_loaded(&mut self, ctx: &mut SimContext<'_>) -> Result<(), ManagerError> {
        let names = ctx
            .asset_meta
            .map(|m| m.joint_names_isaac.clone())
            .unwrap_or_default();
        self.joints = JointMap::lenient(ctx.model, &names);
        self.nu = ctx.model.nu();
        self.scene_ready = true;
        self.stop();
        self.current_frame = 0;

        if let Some(trajectory) = &self.trajectory {
            match trajectory.validate(&self.joints) {
                Ok(()) => self.remap = trajectory.remap(&self.joints),
                Err(e) => {
                    log::warn!(
                        "[TrajectoryPlayback] Dropping '{}' for the new scene: {e}",
                        trajectory.name
                    );
                    self.trajectory = None;
                    self.remap.clear();
                }
            }
        }
        Ok(())
    }

    fn on_policy_cleared(&mut self, _link: &mut RuntimeLink<'_>) -> Result<(), ManagerError> {
        self.stop();
        Ok(())
    }

    fn generate_action(&mut self, ctx: &CollectContext<'_>) -> Result<Vec<f32>, ManagerError> {
        Ok(self.generate_action_at(ctx, Instant::now()))
    }

    fn reset(&mut self, _link: &mut RuntimeLink<'_>) -> Result<(), ManagerError> {
        self.reset_at(Instant::now());
        Ok(())
    }

    fn dispose(&mut self, _link: &mut RuntimeLink<'_>) {
        self.stop();
        self.trajectory = None;
        self.joints = JointMap::default();
        self.remap.clear();
        self.nu = 0;
        self.scene_ready = false;
        self.current_frame = 0;
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
    use marionette_core::manager::ActionState;
    use marionette_core::{RuntimeParams, ServiceRegistry};
    use marionette_test_utils::quadruped_model;

    struct Rig {
        model: ModelInfo,
        data: SimData,
        meta: Option<AssetMetadata>,
        params: RuntimeParams,
        services: ServiceRegistry,
        actions: ActionState,
    }

    impl Rig {
        fn new() -> Self {
            let model = quadruped_model();
            let data = SimData::zeroed(&model);
            Self {
                model,
                data,
                meta: None,
                params: RuntimeParams::default(),
                services: ServiceRegistry::new(),
                actions: ActionState::default(),
            }
        }

        fn load_scene(&mut self, manager: &mut TrajectoryPlayback) {
            let mut ctx = SimContext {
                model: &self.model,
                data: &mut self.data,
                asset_meta: self.meta.as_ref(),
                params: &mut self.params,
                services: &mut self.services,
                actions: &mut self.actions,
                timestep: self.model.timestep,
                substep: 0,
            };
            manager.on_scene_loaded(&mut ctx).unwrap();
        }

        fn action(&self, manager: &mut TrajectoryPlayback, now: Instant) -> Vec<f32> {
            let ctx = CollectContext::new(
                &self.model,
                &self.data,
                &self.params,
                &self.services,
                &self.actions,
            );
            manager.generate_action_at(&ctx, now)
        }
    }

    fn doc(json: &str) -> TrajectoryDocument {
        TrajectoryDocument::from_json(json).unwrap()
    }

    const THREE_FRAMES: &str = r#"{
        "name": "wave",
        "dt": 0.1,
        "frames": [
            { "qpos": [0.1, 0.2, 0.3, 0.4] },
            { "qpos": [0.5, 0.6, 0.7, 0.8], "qvel": [1, 1, 1, 1] },
            { "qpos": [1.0, 1.0, 1.0, 1.0] }
        ]
    }"#;

    #[test]
    fn test_play_commands_first_frame() {
        let mut rig = Rig::new();
        let mut manager = TrajectoryPlayback::new();
        rig.load_scene(&mut manager);
        manager.load(doc(THREE_FRAMES)).unwrap();

        rig.data.qpos[7] = 0.05;
        rig.data.qvel[6] = 0.2;
        let start = Instant::now();
        manager.play_at(start);
        let cmd = rig.action(&mut manager, start);

        assert_eq!(manager.current_frame(), 0);
        assert!(manager.is_playing());
        assert_abs_diff_eq!(cmd[0], (25.0 * (0.1 - 0.05) + 0.5 * (0.0 - 0.2)) as f32, epsilon = 1e-6);
        assert_abs_diff_eq!(cmd[3], (25.0 * 0.4) as f32, epsilon = 1e-6);
    }

    #[test]
    fn test_frame_follows_elapsed_time() {
        let mut rig = Rig::new();
        let mut manager = TrajectoryPlayback::new();
        rig.load_scene(&mut manager);
        manager.load(doc(THREE_FRAMES)).unwrap();

        let start = Instant::now();
        manager.play_at(start);
        let cmd = rig.action(&mut manager, start + Duration::from_millis(150));

        assert_eq!(manager.current_frame(), 1);
        assert_abs_diff_eq!(cmd[1], (25.0 * 0.6 + 0.5 * 1.0) as f32, epsilon = 1e-5);
    }

    #[test]
    fn test_holds_final_frame_without_loop() {
        let mut rig = Rig::new();
        let mut manager = TrajectoryPlayback::new();
        rig.load_scene(&mut manager);
        manager.load(doc(THREE_FRAMES)).unwrap();

        let start = Instant::now();
        manager.play_at(start);
        let past_end = start + manager.duration() + Duration::from_millis(50);
        let cmd = rig.action(&mut manager, past_end);

        assert!(!manager.is_playing());
        assert_eq!(manager.current_frame(), 2);
        assert_abs_diff_eq!(cmd[2], 25.0, epsilon = 1e-5);

        let later = rig.action(&mut manager, past_end + Duration::from_secs(5));
        assert_eq!(cmd, later);
    }

    #[test]
    fn test_loop_wraps_to_first_frame() {
        let mut rig = Rig::new();
        let mut manager = TrajectoryPlayback::new();
        manager.set_loop(true);
        rig.load_scene(&mut manager);
        manager.load(doc(THREE_FRAMES)).unwrap();

        let start = Instant::now();
        manager.play_at(start);
        rig.action(&mut manager, start + Duration::from_millis(400));

        assert!(manager.is_playing());
        assert_eq!(manager.current_frame(), 0);
    }

    #[test]
    fn test_named_joints_remap_columns() {
        let mut rig = Rig::new();
        let mut manager = TrajectoryPlayback::new();
        rig.load_scene(&mut manager);
        manager
            .load(doc(r#"{
                "joint_names": ["RR_hip", "unknown", "FL_hip"],
                "frames": [ { "qpos": [0.4, 9.0, 0.1] } ]
            }"#))
            .unwrap();

        let start = Instant::now();
        manager.play_at(start);
        let cmd = rig.action(&mut manager, start);

        assert_abs_diff_eq!(cmd[0], 2.5, epsilon = 1e-6);
        assert_eq!(cmd[1], 0.0);
        assert_eq!(cmd[2], 0.0);
        assert_abs_diff_eq!(cmd[3], 10.0, epsilon = 1e-5);
    }

    #[test]
    fn test_keyed_frames_use_model_names() {
        let mut rig = Rig::new();
        let mut manager = TrajectoryPlayback::new();
        manager.set_pd_gains(PdGains { kp: 10.0, kd: 0.0 });
        rig.load_scene(&mut manager);
        manager
            .load(doc(r#"{ "frames": [ { "qpos": { "FR_hip": 0.3 } } ] }"#))
            .unwrap();

        let start = Instant::now();
        manager.play_at(start);
        let cmd = rig.action(&mut manager, start);
        assert_abs_diff_eq!(cmd[1], 3.0, epsilon = 1e-6);
        assert_eq!(cmd[0], 0.0);
    }

    #[test]
    fn test_width_mismatch_is_rejected() {
        let mut rig = Rig::new();
        let mut manager = TrajectoryPlayback::new();
        rig.load_scene(&mut manager);
        let err = manager
            .load(doc(r#"{ "frames": [ { "qpos": [0.1, 0.2] } ] }"#))
            .unwrap_err();
        assert!(matches!(
            err,
            ManagerError::JointCountMismatch { expected: 4, found: 2 }
        ));
        assert!(manager.trajectory_name().is_none());
    }

    #[test]
    fn test_empty_joint_names_are_positional() {
        let mut rig = Rig::new();
        let mut manager = TrajectoryPlayback::new();
        rig.load_scene(&mut manager);
        manager
            .load(doc(r#"{ "joint_names": [], "frames": [ { "qpos": [0.1, 0.2, 0.3, 0.4] } ] }"#))
            .unwrap();

        let start = Instant::now();
        manager.play_at(start);
        let cmd = rig.action(&mut manager, start);
        assert_abs_diff_eq!(cmd[0], (25.0 * 0.1) as f32, epsilon = 1e-6);
        assert_abs_diff_eq!(cmd[3], (25.0 * 0.4) as f32, epsilon = 1e-6);

        let err = manager
            .load(doc(r#"{ "joint_names": [], "frames": [ { "qpos": [0.1] } ] }"#))
            .unwrap_err();
        assert!(matches!(
            err,
            ManagerError::JointCountMismatch { expected: 4, found: 1 }
        ));
    }

    #[test]
    fn test_invalid_trajectory_dropped_on_scene_load() {
        let mut rig = Rig::new();
        let mut manager = TrajectoryPlayback::new();
        manager
            .load(doc(r#"{ "frames": [ { "qpos": [0.1, 0.2] } ] }"#))
            .unwrap();
        assert_eq!(manager.trajectory_name(), Some("unnamed"));

        rig.load_scene(&mut manager);
        assert!(manager.trajectory_name().is_none());
    }

    #[test]
    fn test_idle_and_empty_cases_output_zeros() {
        let mut rig = Rig::new();
        let mut manager = TrajectoryPlayback::new();
        assert!(manager.load(doc(r#"{ "frames": [] }"#)).is_err());

        rig.load_scene(&mut manager);
        manager.load(doc(THREE_FRAMES)).unwrap();
        assert_eq!(rig.action(&mut manager, Instant::now()), vec![0.0; 4]);
    }
}
