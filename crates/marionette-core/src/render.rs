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

//! Contract for the renderer collaborator.
//!
//! The renderer never touches simulation state. It reads the last
//! [`WorldSnapshot`] published by the runtime and accepts camera overrides.

use crate::math::{Quaternion, Vec3};

/// Default camera position used before any scene override.
pub const DEFAULT_CAMERA_POSITION: Vec3 = Vec3::new(2.0, 1.7, 1.7);
/// Default camera look-at target.
pub const DEFAULT_CAMERA_TARGET: Vec3 = Vec3::new(0.0, 0.2, 0.0);
/// Default vertical field of view, in degrees.
pub const DEFAULT_CAMERA_FOV: f32 = 45.0;

/// A camera placement. `None` fields leave the current value untouched.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CameraOverride {
    /// Camera position.
    pub position: Option<Vec3>,
    /// Look-at target.
    pub target: Option<Vec3>,
    /// Vertical field of view in degrees.
    pub fov: Option<f32>,
}

impl CameraOverride {
    /// The full default placement.
    pub fn defaults() -> Self {
        Self {
            position: Some(DEFAULT_CAMERA_POSITION),
            target: Some(DEFAULT_CAMERA_TARGET),
            fov: Some(DEFAULT_CAMERA_FOV),
        }
    }

    /// Returns `true` if no field is set.
    pub fn is_empty(&self) -> bool {
        self.position.is_none() && self.target.is_none() && self.fov.is_none()
    }
}

/// World pose of one body.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BodyPose {
    /// World position.
    pub position: Vec3,
    /// World orientation.
    pub orientation: Quaternion,
}

/// World placement of one light.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LightPose {
    /// World position.
    pub position: Vec3,
    /// World direction.
    pub direction: Vec3,
}

/// One straight piece of a tendon between consecutive wrap points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TendonSegment {
    /// Segment start.
    pub start: Vec3,
    /// Segment end.
    pub end: Vec3,
    /// Rendered width.
    pub width: f32,
}

/// The render-facing copy of world state, refreshed once per loop tick.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorldSnapshot {
    /// Simulated time at capture.
    pub sim_time: f64,
    /// One pose per body, indexed by body id.
    pub bodies: Vec<BodyPose>,
    /// One placement per light, indexed by light id.
    pub lights: Vec<LightPose>,
    /// Visible tendon segments.
    pub tendons: Vec<TendonSegment>,
}

/// The renderer collaborator.
pub trait RenderSink: Send {
    /// Moves the camera. Unset fields are left untouched.
    fn apply_camera_override(&mut self, camera: &CameraOverride);

    /// Releases renderer-owned resources.
    fn release(&mut self) {}
}
