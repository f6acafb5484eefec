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

//! Provides a 3-component vector type.

use serde::{Deserialize, Serialize};
use std::ops::{Add, Index, Mul, Neg, Sub};

use super::EPSILON;

/// A 3-dimensional vector with `f32` components.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    /// The x component.
    pub x: f32,
    /// The y component.
    pub y: f32,
    /// The z component.
    pub z: f32,
}

impl Vec3 {
    /// A vector with all components set to zero.
    pub const ZERO: Self = Self::new(0.0, 0.0, 0.0);

    /// Creates a new vector.
    #[inline]
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Reads three consecutive `f64` values starting at `offset`.
    ///
    /// Returns `None` if the slice is too short.
    #[inline]
    pub fn from_slice_f64(values: &[f64], offset: usize) -> Option<Self> {
        let v = values.get(offset..offset + 3)?;
        Some(Self::new(v[0] as f32, v[1] as f32, v[2] as f32))
    }

    /// Builds a vector from a slice of at least three finite numbers.
    pub fn from_finite(values: &[f64]) -> Option<Self> {
        if values.len() < 3 || !values[..3].iter().all(|v| v.is_finite()) {
            return None;
        }
        Some(Self::new(values[0] as f32, values[1] as f32, values[2] as f32))
    }

    /// Returns the components as an array.
    #[inline]
    pub fn to_array(self) -> [f32; 3] {
        [self.x, self.y, self.z]
    }

    /// Calculates the squared length of the vector.
    #[inline]
    pub fn length_squared(&self) -> f32 {
        self.dot(*self)
    }

    /// Calculates the length of the vector.
    #[inline]
    pub fn length(&self) -> f32 {
        self.length_squared().sqrt()
    }

    /// Returns a unit-length copy, or zero if the vector is too short to normalize.
    #[inline]
    pub fn normalize(&self) -> Self {
        let len = self.length();
        if len > EPSILON {
            *self * (1.0 / len)
        } else {
            Self::ZERO
        }
    }

    /// Calculates the dot product.
    #[inline]
    pub fn dot(&self, other: Self) -> f32 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    /// Calculates the cross product.
    #[inline]
    pub fn cross(&self, other: Self) -> Self {
        Self::new(
            self.y * other.z - self.z * other.y,
            self.z * other.x - self.x * other.z,
            self.x * other.y - self.y * other.x,
        )
    }

    /// Calculates the distance between two points.
    #[inline]
    pub fn distance(&self, other: Self) -> f32 {
        (*self - other).length()
    }
}

impl Add for Vec3 {
    type Output = Self;
    #[inline]
    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Vec3 {
    type Output = Self;
    #[inline]
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul<f32> for Vec3 {
    type Output = Self;
    #[inline]
    fn mul(self, rhs: f32) -> Self {
        Self::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

impl Neg for Vec3 {
    type Output = Self;
    #[inline]
    fn neg(self) -> Self {
        Self::new(-self.x, -self.y, -self.z)
    }
}

impl Index<usize> for Vec3 {
    type Output = f32;
    fn index(&self, index: usize) -> &f32 {
        match index {
            0 => &self.x,
            1 => &self.y,
            2 => &self.z,
            _ => panic!("Index out of bounds for Vec3"),
        }
    }
}
