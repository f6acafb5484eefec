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

//! # Marionette Core
//!
//! Foundational crate containing the manager protocol, the contracts of the
//! external collaborators (physics engine, inference engine, renderer), and
//! the configuration and parameter types shared by the runtime.

#![warn(missing_docs)]

pub mod config;
pub mod engine;
pub mod inference;
pub mod manager;
pub mod math;
pub mod params;
pub mod render;
pub mod service_registry;

pub use manager::{Capabilities, Manager, ManagerError, ManagerRole};
pub use params::RuntimeParams;
pub use service_registry::ServiceRegistry;
