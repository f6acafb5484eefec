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

//! User commands that translate into runtime parameter changes.

use std::any::Any;
use std::sync::Arc;

use marionette_core::manager::{Capabilities, Manager, ManagerRole, RuntimeLink};
use marionette_core::params::DEFAULT_IMPEDANCE_KP;
use marionette_core::{ManagerError, ServiceRegistry};

use crate::environment::{SetpointControl, SETPOINT_SERVICE};

/// Default length of a push impulse, in seconds.
pub const DEFAULT_IMPULSE_DURATION: f64 = 0.1;

/// Bounds and defaults of the impedance command.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandOptions {
    /// Service notified of command changes.
    pub setpoint_service: String,
    /// Lowest accepted impedance gain.
    pub min_impedance: f32,
    /// Highest accepted impedance gain.
    pub max_impedance: f32,
    /// Gain restored when compliant mode ends.
    pub default_impedance: f32,
}

impl Default for CommandOptions {
    fn default() -> Self {
        Self {
            setpoint_service: SETPOINT_SERVICE.to_owned(),
            min_impedance: 12.0,
            max_impedance: DEFAULT_IMPEDANCE_KP,
            default_impedance: DEFAULT_IMPEDANCE_KP,
        }
    }
}

/// Applies user commands to [`RuntimeParams`](marionette_core::RuntimeParams)
/// and notifies the setpoint service when one is registered.
#[derive(Debug, Default)]
pub struct CommandManager {
    options: CommandOptions,
}

impl CommandManager {
    /// Creates the manager with default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the manager with custom options.
    pub fn with_options(options: CommandOptions) -> Self {
        Self { options }
    }

    /// Current options.
    pub fn options(&self) -> &CommandOptions {
        &self.options
    }

    fn setpoint(&self, services: &ServiceRegistry) -> Option<Arc<SetpointControl>> {
        services.get::<SetpointControl>(&self.options.setpoint_service)
    }

    /// Pauses or resumes simulation.
    pub fn set_paused(&self, link: &mut RuntimeLink<'_>, paused: bool) {
        link.params.paused = paused;
    }

    /// Sets the commanded forward velocity.
    pub fn set_command_velocity_x(&self, link: &mut RuntimeLink<'_>, value: f32) {
        link.params.command_vel_x = value;
    }

    /// Sets the impedance gain, clamped to the configured bounds. Returns the
    /// applied value.
    pub fn set_impedance_kp(&self, link: &mut RuntimeLink<'_>, value: f32) -> f32 {
        let clamped = value.clamp(self.options.min_impedance, self.options.max_impedance);
        link.params.impedance_kp = clamped;
        if let Some(service) = self.setpoint(link.services) {
            service.on_impedance_change(clamped);
        }
        clamped
    }

    /// Enables or disables setpoint steering. Enabling zeroes the velocity
    /// command.
    pub fn set_use_setpoint(&self, link: &mut RuntimeLink<'_>, enabled: bool) {
        link.params.use_setpoint = enabled;
        if enabled {
            link.params.command_vel_x = 0.0;
        }
        if let Some(service) = self.setpoint(link.services) {
            service.set_use_setpoint(enabled);
        }
    }

    /// Enters or leaves zero-stiffness compliant mode.
    pub fn set_compliant_mode(&self, link: &mut RuntimeLink<'_>, compliant: bool) {
        link.params.compliant_mode = compliant;
        if compliant {
            link.params.impedance_kp = 0.0;
            link.params.command_vel_x = 0.0;
        } else {
            link.params.impedance_kp = self.options.default_impedance;
        }
        if let Some(service) = self.setpoint(link.services) {
            service.set_compliant_mode(compliant);
        }
    }

    /// Starts a push impulse lasting `duration` seconds of simulated time.
    pub fn trigger_impulse(&self, link: &mut RuntimeLink<'_>, duration: Option<f64>) {
        let duration = duration.unwrap_or(DEFAULT_IMPULSE_DURATION);
        link.params.impulse_remain_time = duration;
        if let Some(service) = self.setpoint(link.services) {
            service.on_impulse_triggered(duration);
        }
    }

    /// Tells the setpoint service which policy is active.
    pub fn set_active_policy(&self, link: &mut RuntimeLink<'_>, policy_id: Option<&str>) {
        if let Some(service) = self.setpoint(link.services) {
            service.set_active_policy(policy_id);
        }
    }
}

impl Manager for CommandManager {
    fn name(&self) -> &'static str {
        "CommandManager"
    }

    fn role(&self) -> ManagerRole {
        ManagerRole::Command
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::RESET
    }

    fn reset(&mut self, link: &mut RuntimeLink<'_>) -> Result<(), ManagerError> {
        if let Some(service) = self.setpoint(link.services) {
            service.reset();
        }
        Ok(())
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
    use marionette_core::manager::ActionState;
    use marionette_core::RuntimeParams;

    struct Rig {
        params: RuntimeParams,
        services: ServiceRegistry,
        actions: ActionState,
    }

    impl Rig {
        fn new() -> Self {
            Self {
                params: RuntimeParams::default(),
                services: ServiceRegistry::new(),
                actions: ActionState::default(),
            }
        }

        fn link(&mut self) -> RuntimeLink<'_> {
            RuntimeLink {
                params: &mut self.params,
                services: &mut self.services,
                actions: &mut self.actions,
            }
        }
    }

    #[test]
    fn test_impedance_is_clamped() {
        let mut rig = Rig::new();
        let commands = CommandManager::new();
        assert_eq!(commands.set_impedance_kp(&mut rig.link(), 3.0), 12.0);
        assert_eq!(commands.set_impedance_kp(&mut rig.link(), 99.0), 24.0);
        assert_eq!(commands.set_impedance_kp(&mut rig.link(), 16.0), 16.0);
        assert_eq!(rig.params.impedance_kp, 16.0);
    }

    #[test]
    fn test_setpoint_and_compliant_mode() {
        let mut rig = Rig::new();
        let marker = Arc::new(SetpointControl::new());
        rig.services.register(SETPOINT_SERVICE, marker.clone());
        let commands = CommandManager::new();
        commands.set_active_policy(&mut rig.link(), Some("facet"));

        commands.set_command_velocity_x(&mut rig.link(), 0.8);
        commands.set_use_setpoint(&mut rig.link(), true);
        assert_eq!(rig.params.command_vel_x, 0.0);
        assert!(marker.is_visible());

        commands.set_command_velocity_x(&mut rig.link(), 0.8);
        commands.set_compliant_mode(&mut rig.link(), true);
        assert_eq!(rig.params.impedance_kp, 0.0);
        assert_eq!(rig.params.command_vel_x, 0.0);
        assert!(!marker.is_visible());

        commands.set_compliant_mode(&mut rig.link(), false);
        assert_eq!(rig.params.impedance_kp, DEFAULT_IMPEDANCE_KP);
        assert!(marker.is_visible());
    }

    #[test]
    fn test_impulse_and_reset() {
        let mut rig = Rig::new();
        let marker = Arc::new(SetpointControl::new());
        rig.services.register(SETPOINT_SERVICE, marker.clone());
        let mut commands = CommandManager::new();

        commands.trigger_impulse(&mut rig.link(), None);
        assert_eq!(rig.params.impulse_remain_time, DEFAULT_IMPULSE_DURATION);
        commands.trigger_impulse(&mut rig.link(), Some(0.3));
        assert_eq!(rig.params.impulse_remain_time, 0.3);

        marker.set_position(4.0, 0.5, 4.0);
        commands.reset(&mut rig.link()).unwrap();
        assert_eq!(marker.marker_position(), SetpointControl::default_position());
    }

    #[test]
    fn test_commands_without_service() {
        let mut rig = Rig::new();
        let commands = CommandManager::new();
        commands.set_paused(&mut rig.link(), false);
        commands.set_use_setpoint(&mut rig.link(), false);
        commands.set_active_policy(&mut rig.link(), None);
        assert!(!rig.params.paused);
        assert!(!rig.params.use_setpoint);
    }
}
