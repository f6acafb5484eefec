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

use std::any::Any;

use marionette_core::manager::{Capabilities, ControlType, Manager, ManagerRole, RuntimeLink, SimContext};
use marionette_core::ManagerError;

/// Applies no actuation: the command vector is zeroed before every sub-step.
#[derive(Debug, Default)]
pub struct PassiveAction;

impl PassiveAction {
    /// Creates the manager.
    pub fn new() -> Self {
        Self
    }
}

impl Manager for PassiveAction {
    fn name(&self) -> &'static str {
        "PassiveAction"
    }

    fn role(&self) -> ManagerRole {
        ManagerRole::Action
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::SCENE_LOADED | Capabilities::POLICY_CLEARED | Capabilities::BEFORE_STEP
    }

    fn on_scene_loaded(&mut self, ctx: &mut SimContext<'_>) -> Result<(), ManagerError> {
        ctx.data.ctrl.fill(0.0);
        ctx.actions.joint_names.clear();
        ctx.actions.default_joint_pos.clear();
        ctx.actions.reset_actions(0);
        ctx.actions.control_type = ControlType::None;
        Ok(())
    }

    fn on_policy_cleared(&mut self, link: &mut RuntimeLink<'_>) -> Result<(), ManagerError> {
        link.actions.control_type = ControlType::None;
        Ok(())
    }

    fn before_step(&mut self, ctx: &mut SimContext<'_>) -> Result<(), ManagerError> {
        ctx.data.ctrl.fill(0.0);
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
