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

//! User-tunable control parameters shared by managers and external callers.

use serde::{Deserialize, Serialize};

/// Default impedance gain.
pub const DEFAULT_IMPEDANCE_KP: f32 = 24.0;

/// A flat record of control parameters.
///
/// Owned by the runtime and lent to managers for the duration of each hook.
/// Persists across scene and policy swaps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeParams {
    /// When set, loop ticks skip all simulation work.
    pub paused: bool,
    /// Commanded forward velocity in m/s.
    pub command_vel_x: f32,
    /// Impedance stiffness fed to impedance-conditioned policies.
    pub impedance_kp: f32,
    /// Whether the draggable setpoint marker drives the impedance command.
    pub use_setpoint: bool,
    /// Seconds of push impulse left to apply.
    pub impulse_remain_time: f64,
    /// Zero-stiffness compliant mode.
    pub compliant_mode: bool,
}

impl Default for RuntimeParams {
    fn default() -> Self {
        Self {
            paused: true,
            command_vel_x: 0.0,
            impedance_kp: DEFAULT_IMPEDANCE_KP,
            use_setpoint: true,
            impulse_remain_time: 0.0,
            compliant_mode: false,
        }
    }
}
