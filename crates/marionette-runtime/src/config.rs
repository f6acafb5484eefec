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

//! Runtime tunables.

use std::path::Path;
use std::time::Duration;

use marionette_core::RuntimeParams;
use serde::{Deserialize, Serialize};

use crate::RuntimeError;

/// Configuration for the simulation runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Target control period in seconds. The loop runs `round(control_dt / timestep)`
    /// physics sub-steps per tick.
    pub control_dt: f64,
    /// Parameters the runtime starts with.
    pub default_params: RuntimeParams,
    /// Poll interval while a policy reload waits for an in-flight inference.
    pub policy_reload_poll_ms: u64,
    /// Width of the recurrent state fed to policies with an `adapt_hx` input.
    pub recurrent_state_size: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            control_dt: 0.02,
            default_params: RuntimeParams::default(),
            policy_reload_poll_ms: 10,
            recurrent_state_size: 128,
        }
    }
}

impl RuntimeConfig {
    /// Parses a TOML document. Missing keys keep their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, RuntimeError> {
        let config: Self = toml::from_str(text)?;
        if !(config.control_dt.is_finite() && config.control_dt > 0.0) {
            return Err(RuntimeError::InvalidConfig(format!(
                "control_dt must be positive, got {}",
                config.control_dt
            )));
        }
        Ok(config)
    }

    /// Reads and parses a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, RuntimeError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| RuntimeError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Poll interval as a [`Duration`].
    pub fn policy_reload_poll(&self) -> Duration {
        Duration::from_millis(self.policy_reload_poll_ms.max(1))
    }
}
