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

//! A renderer that only records what it is told.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use marionette_core::render::{CameraOverride, RenderSink};

#[derive(Debug, Default)]
struct RenderRecord {
    cameras: Vec<CameraOverride>,
    releases: usize,
}

/// Shared view of a [`RecordingRenderer`].
#[derive(Debug, Default, Clone)]
pub struct RenderProbe(Arc<Mutex<RenderRecord>>);

impl RenderProbe {
    fn lock(&self) -> MutexGuard<'_, RenderRecord> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every camera override applied, in order.
    pub fn cameras(&self) -> Vec<CameraOverride> {
        self.lock().cameras.clone()
    }

    /// Number of `release` calls.
    pub fn releases(&self) -> usize {
        self.lock().releases
    }
}

/// A [`RenderSink`] that records camera overrides and releases.
#[derive(Debug, Default)]
pub struct RecordingRenderer {
    probe: RenderProbe,
}

impl RecordingRenderer {
    /// Creates a renderer with a fresh probe.
    pub fn new() -> Self {
        Self::default()
    }

    /// A probe that stays valid after the renderer is moved.
    pub fn probe(&self) -> RenderProbe {
        self.probe.clone()
    }
}

impl RenderSink for RecordingRenderer {
    fn apply_camera_override(&mut self, camera: &CameraOverride) {
        self.probe.lock().cameras.push(*camera);
    }

    fn release(&mut self) {
        self.probe.lock().releases += 1;
    }
}
