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

//! # Marionette Test Utils
//!
//! In-process stand-ins for the external collaborators of the runtime. Each
//! mock hands out a cloneable probe so a test can keep observing it after the
//! mock itself has been moved into the runtime.

pub mod engine;
pub mod inference;
pub mod render;

pub use engine::{quadruped_model, EngineProbe, MockPhysicsEngine};
pub use inference::{InferenceProbe, ScriptedInference};
pub use render::{RecordingRenderer, RenderProbe};
