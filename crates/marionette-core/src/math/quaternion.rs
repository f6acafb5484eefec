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

//! Provides a Quaternion type for representing 3D rotations.

use serde::{Deserialize, Serialize};
use std::ops::Mul;

use super::{Vec3, EPSILON};

/// Represents a quaternion for 3D rotations.
///
/// Stored as `(x, y, z, w)`, where `[x, y, z]` is the vector part and `w` the
/// scalar part. The physics collaborator stores orientations scalar-first
/// (`w, x, y, z`); use [`Quaternion::from_wxyz`] at that boundary.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quaternion {
    /// The x component of the vector part.
    pub x: f32,
    /// The y component of the vector part.
    pub y: f32,
    /// The z component of the vector part.
    pub z: f32,
    /// The scalar (real) part.
    pub w: f32,
}

impl Default for Quaternion {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Quaternion {
    /// The identity quaternion, representing no rotation.
    pub const IDENTITY: Quaternion = Quaternion {
        x: 0.0,
        y: 0.0,
        z: 0.0,
        w: 1.0,
    };

    /// Creates a new quaternion from its raw components.
    #[inline]
    pub fn new(x: f32, y: f32, z: f32, w: f32) -> Self {
        Self { x, y, z, w }
    }

    /// Reads a scalar-first quaternion from four consecutive `f64` values.
    ///
    /// Returns `None` if the slice is too short.
    #[inline]
    pub fn from_wxyz(values: &[f64], offset: usize) -> Option<Self> {
        let q = values.get(offset..offset + 4)?;
        Some(Self::new(q[1] as f32, q[2] as f32, q[3] as f32, q[0] as f32))
    }

    /// Creates a quaternion representing a rotation around an axis.
    #[inline]
    pub fn from_axis_angle(axis: Vec3, angle_radians: f32) -> Self {
        let axis = axis.normalize();
        let (s, c) = (angle_radians * 0.5).sin_cos();
        Self::new(axis.x * s, axis.y * s, axis.z * s, c)
    }

    /// Calculates the squared magnitude.
    #[inline]
    pub fn magnitude_squared(&self) -> f32 {
        self.x * self.x + self.y * self.y + self.z * self.z + self.w * self.w
    }

    /// Returns a normalized copy, or the identity for degenerate input.
    #[inline]
    pub fn normalize(&self) -> Self {
        let mag_sq = self.magnitude_squared();
        if mag_sq > EPSILON * EPSILON {
            let inv = mag_sq.sqrt().recip();
            Self::new(self.x * inv, self.y * inv, self.z * inv, self.w * inv)
        } else {
            Self::IDENTITY
        }
    }

    /// Computes the conjugate.
    #[inline]
    pub fn conjugate(&self) -> Self {
        Self::new(-self.x, -self.y, -self.z, self.w)
    }

    /// Computes the inverse, which undoes this rotation.
    ///
    /// Returns the identity for a zero-magnitude quaternion.
    #[inline]
    pub fn inverse(&self) -> Self {
        let mag_sq = self.magnitude_squared();
        if mag_sq > EPSILON * EPSILON {
            let c = self.conjugate();
            let inv = mag_sq.recip();
            Self::new(c.x * inv, c.y * inv, c.z * inv, c.w * inv)
        } else {
            Self::IDENTITY
        }
    }

    /// Rotates a vector by this quaternion.
    #[inline]
    pub fn rotate_vec3(&self, v: Vec3) -> Vec3 {
        let u = Vec3::new(self.x, self.y, self.z);
        let t = u.cross(v) * 2.0;
        v + t * self.w + u.cross(t)
    }

    /// Returns the z angle of the intrinsic XYZ Euler decomposition.
    ///
    /// This is the heading used by the velocity and impedance command features.
    pub fn yaw_xyz(&self) -> f32 {
        let q = self.normalize();
        let m11 = 1.0 - 2.0 * (q.y * q.y + q.z * q.z);
        let m12 = 2.0 * (q.x * q.y - q.w * q.z);
        let m13 = 2.0 * (q.x * q.z + q.w * q.y);
        if m13.abs() < 0.999_999_9 {
            (-m12).atan2(m11)
        } else {
            0.0
        }
    }
}

impl Mul<Quaternion> for Quaternion {
    type Output = Self;

    /// Composes two rotations; `self * rhs` applies `rhs` first.
    #[inline]
    fn mul(self, rhs: Self) -> Self {
        Self::new(
            self.w * rhs.x + self.x * rhs.w + self.y * rhs.z - self.z * rhs.y,
            self.w * rhs.y - self.x * rhs.z + self.y * rhs.w + self.z * rhs.x,
            self.w * rhs.z + self.x * rhs.y - self.y * rhs.x + self.z * rhs.w,
            self.w * rhs.w - self.x * rhs.x - self.y * rhs.y - self.z * rhs.z,
        )
    }
}
