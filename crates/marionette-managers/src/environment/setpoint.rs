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

//! The draggable setpoint marker shared between the UI, commands and the
//! impedance observation.

use std::sync::{Mutex, MutexGuard, PoisonError};

use marionette_core::math::Vec3;

/// Registry name of the setpoint service.
pub const SETPOINT_SERVICE: &str = "setpoint-control";

/// Policy id whose observations are steered by the marker.
pub const SETPOINT_POLICY: &str = "facet";

/// Marker rest height in the render frame.
pub const DEFAULT_MARKER_HEIGHT: f32 = 0.5;

#[derive(Debug, Clone, PartialEq)]
struct SetpointState {
    position: Vec3,
    active_policy: Option<String>,
    desired_visible: bool,
    use_setpoint: bool,
    compliant: bool,
}

impl Default for SetpointState {
    fn default() -> Self {
        Self {
            position: SetpointControl::default_position(),
            active_policy: None,
            desired_visible: false,
            use_setpoint: false,
            compliant: false,
        }
    }
}

/// Marker position (render frame, `y` up) and visibility.
///
/// Shared through the service registry, so every method takes `&self`.
#[derive(Debug, Default)]
pub struct SetpointControl {
    state: Mutex<SetpointState>,
}

impl SetpointControl {
    /// Creates a hidden marker at the default position.
    pub fn new() -> Self {
        Self::default()
    }

    /// The rest position of the marker.
    pub fn default_position() -> Vec3 {
        Vec3::new(0.0, DEFAULT_MARKER_HEIGHT, 0.0)
    }

    fn lock(&self) -> MutexGuard<'_, SetpointState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current marker position.
    pub fn marker_position(&self) -> Vec3 {
        self.lock().position
    }

    /// Moves the marker.
    pub fn set_position(&self, x: f32, y: f32, z: f32) {
        self.lock().position = Vec3::new(x, y, z);
    }

    /// Records the active policy id.
    pub fn set_active_policy(&self, policy_id: Option<&str>) {
        self.lock().active_policy = policy_id.map(str::to_owned);
    }

    /// Requests the marker to be shown or hidden.
    pub fn set_visible(&self, visible: bool) {
        self.lock().desired_visible = visible;
    }

    /// Mirrors the use-setpoint parameter.
    pub fn set_use_setpoint(&self, enabled: bool) {
        self.lock().use_setpoint = enabled;
    }

    /// Mirrors the compliant-mode parameter.
    pub fn set_compliant_mode(&self, compliant: bool) {
        self.lock().compliant = compliant;
    }

    /// Notification that the impedance gain changed.
    pub fn on_impedance_change(&self, kp: f32) {
        log::debug!("[SetpointControl] Impedance kp is now {kp}");
    }

    /// Notification that a push impulse started.
    pub fn on_impulse_triggered(&self, duration: f64) {
        log::debug!("[SetpointControl] Impulse for {duration}s");
    }

    /// Returns the marker to its rest position.
    pub fn reset(&self) {
        self.lock().position = Self::default_position();
    }

    /// Whether the marker should be drawn.
    pub fn is_visible(&self) -> bool {
        let state = self.lock();
        state.active_policy.as_deref() == Some(SETPOINT_POLICY)
            && !state.compliant
            && (state.use_setpoint || state.desired_visible)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_visibility_rules() {
        let marker = SetpointControl::new();
        marker.set_use_setpoint(true);
        assert!(!marker.is_visible());

        marker.set_active_policy(Some(SETPOINT_POLICY));
        assert!(marker.is_visible());

        marker.set_compliant_mode(true);
        assert!(!marker.is_visible());

        marker.set_compliant_mode(false);
        marker.set_use_setpoint(false);
        assert!(!marker.is_visible());
        marker.set_visible(true);
        assert!(marker.is_visible());

        marker.set_active_policy(Some("walk"));
        assert!(!marker.is_visible());
    }

    #[test]
    fn test_reset_restores_rest_position() {
        let marker = SetpointControl::new();
        marker.set_position(1.0, 2.0, 3.0);
        assert_eq!(marker.marker_position(), Vec3::new(1.0, 2.0, 3.0));
        marker.reset();
        assert_eq!(marker.marker_position(), SetpointControl::default_position());
    }
}
