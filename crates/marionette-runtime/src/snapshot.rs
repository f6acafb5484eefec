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

//! Render-facing copies of the simulation state.

use marionette_core::engine::{ModelInfo, SimData};
use marionette_core::math::{Quaternion, Vec3};
use marionette_core::render::{BodyPose, LightPose, TendonSegment, WorldSnapshot};

/// Wrap points closer to the origin than this are treated as unset.
pub const MIN_WRAP_POINT_NORM: f32 = 0.01;

/// Copies every body, light and tendon transform out of `data`.
pub fn capture(model: &ModelInfo, data: &SimData) -> WorldSnapshot {
    let bodies = (0..model.nbody())
        .map(|b| BodyPose {
            position: Vec3::from_slice_f64(&data.xpos, b * 3).unwrap_or(Vec3::ZERO),
            orientation: Quaternion::from_wxyz(&data.xquat, b * 4).unwrap_or_default(),
        })
        .collect();

    let lights = (0..model.nlight)
        .map(|l| LightPose {
            position: Vec3::from_slice_f64(&data.light_xpos, l * 3).unwrap_or(Vec3::ZERO),
            direction: Vec3::from_slice_f64(&data.light_xdir, l * 3).unwrap_or(Vec3::ZERO),
        })
        .collect();

    WorldSnapshot {
        sim_time: data.time,
        bodies,
        lights,
        tendons: tendon_segments(model, data),
    }
}

/// Segments between consecutive wrap points of every tendon.
pub fn tendon_segments(model: &ModelInfo, data: &SimData) -> Vec<TendonSegment> {
    let mut segments = Vec::new();
    for (tendon, width) in model.tendon_widths.iter().enumerate() {
        let (Some(&adr), Some(&num)) = (data.ten_wrapadr.get(tendon), data.ten_wrapnum.get(tendon))
        else {
            continue;
        };
        for w in adr..(adr + num).saturating_sub(1) {
            let (Some(start), Some(end)) = (
                Vec3::from_slice_f64(&data.wrap_xpos, w * 3),
                Vec3::from_slice_f64(&data.wrap_xpos, (w + 1) * 3),
            ) else {
                break;
            };
            if start.length() > MIN_WRAP_POINT_NORM && end.length() > MIN_WRAP_POINT_NORM {
                segments.push(TendonSegment {
                    start,
                    end,
                    width: *width as f32,
                });
            }
        }
    }
    segments
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use marionette_test_utils::quadruped_model;

    #[test]
    fn test_capture_reads_bodies_and_lights() {
        let model = quadruped_model();
        let mut data = SimData::zeroed(&model);
        data.time = 1.5;
        data.xpos[3..6].copy_from_slice(&[1.0, 2.0, 3.0]);
        data.xquat[4..8].copy_from_slice(&[1.0, 0.0, 0.0, 0.0]);
        data.light_xdir[2] = -1.0;

        let snapshot = capture(&model, &data);
        assert_eq!(snapshot.sim_time, 1.5);
        assert_eq!(snapshot.bodies.len(), model.nbody());
        assert_eq!(snapshot.bodies[1].position, Vec3::new(1.0, 2.0, 3.0));
        assert_relative_eq!(snapshot.bodies[1].orientation.w, 1.0);
        assert_eq!(snapshot.lights.len(), 1);
        assert_eq!(snapshot.lights[0].direction, Vec3::new(0.0, 0.0, -1.0));
    }

    #[test]
    fn test_tendon_segments_skip_unset_wrap_points() {
        let model = quadruped_model();
        let mut data = SimData::zeroed(&model);
        data.ten_wrapadr[0] = 0;
        data.ten_wrapnum[0] = 3;
        data.wrap_xpos = vec![0.0, 0.0, 0.0, 0.5, 0.0, 0.2, 0.5, 0.0, 0.4];

        let segments = tendon_segments(&model, &data);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].start, Vec3::new(0.5, 0.0, 0.2));
        assert_eq!(segments[0].end, Vec3::new(0.5, 0.0, 0.4));
        assert_relative_eq!(segments[0].width, 0.01);
    }
}
