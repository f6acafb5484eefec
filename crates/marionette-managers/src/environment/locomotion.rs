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
use std::sync::Arc;

use marionette_core::manager::{Capabilities, Manager, ManagerRole, RuntimeLink, SimContext};
use marionette_core::math::Vec3;
use marionette_core::ManagerError;

use super::setpoint::{SetpointControl, SETPOINT_SERVICE};

/// Push applied to the base body while an impulse is active, in newtons.
pub const IMPULSE_FORCE: Vec3 = Vec3::new(0.0, 50.0, 0.0);

/// Name of the body that receives impulses.
pub const BASE_BODY: &str = "base";

/// Clears applied forces every sub-step, delivers push impulses to the base
/// body and publishes the [`SetpointControl`] service.
#[derive(Debug)]
pub struct LocomotionEnvManager {
    service_name: String,
    setpoint: Arc<SetpointControl>,
    base_body: Option<usize>,
}

impl Default for LocomotionEnvManager {
    fn default() -> Self {
        Self::with_service_name(SETPOINT_SERVICE)
    }
}

impl LocomotionEnvManager {
    /// Creates the manager publishing under the default service name.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the manager publishing under `name`.
    pub fn with_service_name(name: impl Into<String>) -> Self {
        Self {
            service_name: name.into(),
            setpoint: Arc::new(SetpointControl::new()),
            base_body: None,
        }
    }

    /// The published setpoint service.
    pub fn setpoint(&self) -> &Arc<SetpointControl> {
        &self.setpoint
    }

    /// Body receiving impulses in the loaded scene.
    pub fn base_body(&self) -> Option<usize> {
        self.base_body
    }
}

impl Manager for LocomotionEnvManager {
    fn name(&self) -> &'static str {
        "LocomotionEnvManager"
    }

    fn role(&self) -> ManagerRole {
        ManagerRole::Environment
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::SCENE_LOADED
            | Capabilities::BEFORE_STEP
            | Capabilities::RESET
            | Capabilities::DISPOSE
    }

    fn attach_runtime(&mut self, link: &mut RuntimeLink<'_>) -> Result<(), ManagerError> {
        link.services
            .register(self.service_name.clone(), Arc::clone(&self.setpoint));
        Ok(())
    }

    fn on_scene_loaded(&mut self, ctx: &mut SimContext<'_>) -> Result<(), ManagerError> {
        self.base_body = ctx.model.body_id(BASE_BODY);
        if self.base_body.is_none() {
            log::debug!("[LocomotionEnvManager] Scene has no '{BASE_BODY}' body");
        }
        self.setpoint.reset();
        Ok(())
    }

    fn before_step(&mut self, ctx: &mut SimContext<'_>) -> Result<(), ManagerError> {
        ctx.data.qfrc_applied.fill(0.0);
        ctx.data.xfrc_applied.fill(0.0);

        let Some(body) = self.base_body else {
            return Ok(());
        };
        if ctx.params.impulse_remain_time > 0.0 {
            if let Some(row) = ctx.data.xfrc_applied.get_mut(body * 6..body * 6 + 6) {
                row.copy_from_slice(&[
                    f64::from(IMPULSE_FORCE.x),
                    f64::from(IMPULSE_FORCE.y),
                    f64::from(IMPULSE_FORCE.z),
                    0.0,
                    0.0,
                    0.0,
                ]);
            }
            ctx.params.impulse_remain_time -= ctx.timestep;
        }
        Ok(())
    }

    fn reset(&mut self, _link: &mut RuntimeLink<'_>) -> Result<(), ManagerError> {
        self.setpoint.reset();
        Ok(())
    }

    fn dispose(&mut self, link: &mut RuntimeLink<'_>) {
        link.services.unregister(&self.service_name);
        self.base_body = None;
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
