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

//! Minimal linear algebra for observation frames and world snapshots.
//!
//! Simulation state is stored as `f64` arrays by the physics collaborator,
//! while policy inputs are `f32`. The types here are `f32` and convert at the
//! boundary.

/// A small constant for floating-point comparisons.
pub const EPSILON: f32 = 1e-5;

pub use std::f32::consts::PI;

pub mod quaternion;
pub mod vector;

pub use self::quaternion::Quaternion;
pub use self::vector::Vec3;
