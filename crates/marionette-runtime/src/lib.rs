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

//! # Marionette Runtime
//!
//! Orchestrates an interactive physics simulation driven by pluggable
//! managers.
//!
//! [`SimulationRuntime`] stages a scene's assets, loads the scene into the
//! physics engine, optionally opens a policy network, and then runs a
//! fixed-rate loop. Each tick collects observations, runs inference or a
//! trajectory lookup, applies the action and steps physics `decimation`
//! times, calling the manager hooks around every sub-step. The tick ends by
//! publishing a [`WorldSnapshot`](marionette_core::render::WorldSnapshot)
//! for the renderer.
//!
//! ```text
//! idle → loadingScene → sceneReady → loadingPolicy → policyReady
//! ```

#![warn(missing_docs)]

pub mod camera;
pub mod config;
pub mod error;
pub mod handle;
pub mod policy;
pub mod runtime;
pub mod snapshot;
pub mod state;

pub use config::RuntimeConfig;
pub use error::RuntimeError;
pub use handle::SimulationHandle;
pub use policy::PolicyModule;
pub use runtime::{LoopStats, RuntimeBuilder, SimulationRuntime};
pub use state::RuntimeState;
