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

//! Errors raised by the runtime.

use std::path::PathBuf;

use marionette_assets::{FetchError, ManifestError};
use marionette_core::config::ConfigError;
use marionette_core::engine::EngineError;
use marionette_core::inference::InferenceError;
use marionette_core::ManagerError;

use crate::state::RuntimeState;

/// Error type for runtime operations.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// The physics engine rejected a call.
    #[error(transparent)]
    Engine(#[from] EngineError),
    /// The inference engine failed.
    #[error(transparent)]
    Inference(#[from] InferenceError),
    /// A scene, policy or metadata document could not be fetched.
    #[error(transparent)]
    Fetch(#[from] FetchError),
    /// The scene's asset manifest could not be built.
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    /// A manager hook failed.
    #[error("[{manager}] {source}")]
    Manager {
        /// Name of the failing manager.
        manager: &'static str,
        /// Hook error.
        #[source]
        source: ManagerError,
    },
    /// A descriptor document is malformed.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The runtime configuration is malformed.
    #[error("Invalid runtime config: {0}")]
    Toml(#[from] toml::de::Error),
    /// A runtime tunable is out of range.
    #[error("Invalid runtime config: {0}")]
    InvalidConfig(String),
    /// A file could not be read.
    #[error("Failed to read {}: {source}", path.display())]
    Io {
        /// File being read.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
    /// The builder is missing a required collaborator.
    #[error("Runtime builder is missing the {0}")]
    MissingComponent(&'static str),
    /// The operation needs a loaded scene.
    #[error("No scene is loaded")]
    NoSceneLoaded,
    /// No attached manager has the requested type.
    #[error("No manager of type {0} is attached")]
    ManagerNotFound(&'static str),
    /// The runtime was disposed.
    #[error("Runtime has been disposed")]
    Disposed,
    /// A lifecycle transition is not allowed from the current state.
    #[error("Invalid runtime transition {from:?} -> {to:?}")]
    InvalidTransition {
        /// Current state.
        from: RuntimeState,
        /// Requested state.
        to: RuntimeState,
    },
    /// The loop task ended abnormally.
    #[error("Simulation loop task failed: {0}")]
    LoopTask(String),
}

impl RuntimeError {
    /// Wraps a hook error with the name of the manager that raised it.
    pub fn manager(manager: &'static str, source: ManagerError) -> Self {
        RuntimeError::Manager { manager, source }
    }
}
