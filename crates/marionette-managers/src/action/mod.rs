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

//! Action managers and the joint address tables they share.

pub mod joint_control;
pub mod passive;
pub mod trajectory;

pub use joint_control::{ActionSmoothing, ModelJointControl};
pub use passive::PassiveAction;
pub use trajectory::{PdGains, TrajectoryPlayback};

use marionette_core::engine::{ModelInfo, Transmission};
use marionette_core::ManagerError;

/// Engine addresses of an ordered list of controlled joints.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JointMap {
    /// Joint names, in control order.
    pub names: Vec<String>,
    /// Actuator driving each joint, if any.
    pub ctrl: Vec<Option<usize>>,
    /// Position address of each joint.
    pub qpos: Vec<usize>,
    /// Velocity address of each joint.
    pub qvel: Vec<usize>,
}

impl JointMap {
    /// Maps `names` onto `model`, failing on the first unknown joint or on any
    /// actuator that does not drive a joint.
    pub fn strict(model: &ModelInfo, names: &[String]) -> Result<Self, ManagerError> {
        if let Some(actuator) = model
            .actuators
            .iter()
            .position(|t| !matches!(t, Transmission::Joint(_)))
        {
            return Err(ManagerError::UnsupportedTransmission { actuator });
        }

        let mut map = Self::default();
        for name in names {
            let joint = model
                .joint_id(name)
                .ok_or_else(|| ManagerError::MissingJoint(name.clone()))?;
            map.push(model, name.clone(), joint, model.actuator_for_joint(joint));
        }
        Ok(map)
    }

    /// Maps `names` onto `model`, skipping joints that are missing or have no
    /// actuator. With no names, every joint-driving actuator is mapped in
    /// actuator order.
    pub fn lenient(model: &ModelInfo, names: &[String]) -> Self {
        let mut map = Self::default();
        if names.is_empty() {
            for (actuator, transmission) in model.actuators.iter().enumerate() {
                if let Transmission::Joint(joint) = *transmission {
                    let name = model
                        .joint_name(joint)
                        .map_or_else(|| format!("joint_{actuator}"), str::to_owned);
                    map.push(model, name, joint, Some(actuator));
                }
            }
            return map;
        }

        for name in names {
            let Some(joint) = model.joint_id(name) else {
                log::warn!("[JointMap] Joint {name} not found in model");
                continue;
            };
            let Some(actuator) = model.actuator_for_joint(joint) else {
                log::warn!("[JointMap] No actuator mapped to joint {name}");
                continue;
            };
            map.push(model, name.clone(), joint, Some(actuator));
        }
        map
    }

    fn push(&mut self, model: &ModelInfo, name: String, joint: usize, actuator: Option<usize>) {
        let info = &model.joints[joint];
        self.names.push(name);
        self.ctrl.push(actuator);
        self.qpos.push(info.qpos_adr);
        self.qvel.push(info.dof_adr);
    }

    /// Number of mapped joints.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Returns `true` if no joint is mapped.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marionette_test_utils::quadruped_model;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_owned()).collect()
    }

    #[test]
    fn test_strict_map_resolves_addresses() {
        let model = quadruped_model();
        let map = JointMap::strict(&model, &names(&["RR_hip", "FL_hip"])).unwrap();
        assert_eq!(map.ctrl, vec![Some(3), Some(0)]);
        assert_eq!(map.qpos, vec![10, 7]);
        assert_eq!(map.qvel, vec![9, 6]);
    }

    #[test]
    fn test_strict_map_fails_fast() {
        let mut model = quadruped_model();
        let err = JointMap::strict(&model, &names(&["FL_hip", "tail"])).unwrap_err();
        assert!(matches!(err, ManagerError::MissingJoint(ref n) if n == "tail"));

        model.actuators.push(Transmission::Other);
        let err = JointMap::strict(&model, &names(&["FL_hip"])).unwrap_err();
        assert!(matches!(err, ManagerError::UnsupportedTransmission { actuator: 4 }));
    }

    #[test]
    fn test_lenient_map_skips_and_falls_back() {
        let model = quadruped_model();
        let map = JointMap::lenient(&model, &names(&["tail", "FR_hip"]));
        assert_eq!(map.names, vec!["FR_hip"]);

        let all = JointMap::lenient(&model, &[]);
        assert_eq!(all.names, vec!["FL_hip", "FR_hip", "RL_hip", "RR_hip"]);
        assert_eq!(all.ctrl, vec![Some(0), Some(1), Some(2), Some(3)]);
    }
}
