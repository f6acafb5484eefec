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

//! # Marionette Managers
//!
//! Concrete [`Manager`](marionette_core::Manager) implementations driven by
//! the simulation runtime:
//!
//! - **action**: [`PassiveAction`], [`ModelJointControl`] and
//!   [`TrajectoryPlayback`] turn policy output or recorded data into actuator
//!   commands.
//! - **observation**: [`ObservationAssembler`] builds the policy's input
//!   tensors from configured components.
//! - **command**: [`CommandManager`] is the entry point for user commands.
//! - **environment**: [`LocomotionEnvManager`] applies external forces and
//!   owns the [`SetpointControl`] service.

pub mod action;
pub mod command;
pub mod environment;
pub mod observation;

pub use action::{ModelJointControl, PassiveAction, TrajectoryPlayback};
pub use command::CommandManager;
pub use environment::{LocomotionEnvManager, SetpointControl, SETPOINT_SERVICE};
pub use observation::ObservationAssembler;
