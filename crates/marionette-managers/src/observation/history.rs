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

//! Fixed-depth observation histories, newest first.

use std::collections::VecDeque;

/// History of one component's per-step values.
///
/// Holds exactly `steps` frames of `width` floats, zero-filled until enough
/// steps have been recorded.
#[derive(Debug, Clone)]
pub struct StepHistory {
    width: usize,
    frames: VecDeque<Vec<f32>>,
}

impl StepHistory {
    /// Creates a zeroed history. A depth of zero is treated as one.
    pub fn new(width: usize, steps: usize) -> Self {
        let steps = steps.max(1);
        Self {
            width,
            frames: (0..steps).map(|_| vec![0.0; width]).collect(),
        }
    }

    /// Number of recorded steps.
    pub fn steps(&self) -> usize {
        self.frames.len()
    }

    /// Total flattened length.
    pub fn dims(&self) -> usize {
        self.width * self.frames.len()
    }

    /// Records `frame` as the newest step and returns the flattened history.
    pub fn push(&mut self, frame: Vec<f32>) -> Vec<f32> {
        debug_assert_eq!(frame.len(), self.width);
        self.frames.pop_back();
        self.frames.push_front(frame);
        self.frames.iter().flatten().copied().collect()
    }
}

/// A flat window of `dims * steps` floats shifted by one step per push.
#[derive(Debug, Clone)]
pub struct WindowBuffer {
    dims: usize,
    steps: usize,
    buffer: Vec<f32>,
}

impl WindowBuffer {
    /// Creates a zeroed window. A depth of zero is treated as one.
    pub fn new(dims: usize, steps: usize) -> Self {
        let steps = steps.max(1);
        Self {
            dims,
            steps,
            buffer: vec![0.0; dims * steps],
        }
    }

    /// Floats per step.
    pub fn dims(&self) -> usize {
        self.dims
    }

    /// Window depth.
    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Shifts the window by one step and writes `current` at the front.
    ///
    /// A step of a different width restarts the window at that width.
    pub fn push(&mut self, current: &[f32]) -> &[f32] {
        if current.len() != self.dims {
            log::warn!(
                "[WindowBuffer] Step width changed {} -> {}, clearing history",
                self.dims,
                current.len()
            );
            *self = Self::new(current.len(), self.steps);
        }
        let dims = self.dims;
        let keep = self.buffer.len() - dims;
        self.buffer.copy_within(..keep, dims);
        self.buffer[..dims].copy_from_slice(current);
        &self.buffer
    }

    /// The current window contents.
    pub fn as_slice(&self) -> &[f32] {
        &self.buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_history_newest_first() {
        let mut history = StepHistory::new(2, 3);
        assert_eq!(history.dims(), 6);
        history.push(vec![1.0, 1.0]);
        let flat = history.push(vec![2.0, 2.0]);
        assert_eq!(flat, vec![2.0, 2.0, 1.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_step_history_drops_oldest_past_depth() {
        let mut history = StepHistory::new(1, 3);
        for step in 1..=5 {
            history.push(vec![step as f32]);
        }
        assert_eq!(history.steps(), 3);
        assert_eq!(history.push(vec![6.0]), vec![6.0, 5.0, 4.0]);
    }

    #[test]
    fn test_window_drops_oldest_past_depth() {
        let mut window = WindowBuffer::new(2, 2);
        for step in 1..=4 {
            window.push(&[step as f32, -(step as f32)]);
        }
        assert_eq!(window.as_slice(), &[4.0, -4.0, 3.0, -3.0]);
    }

    #[test]
    fn test_window_shifts_whole_steps() {
        let mut window = WindowBuffer::new(3, 2);
        window.push(&[1.0, 2.0, 3.0]);
        let out = window.push(&[4.0, 5.0, 6.0]);
        assert_eq!(out, &[4.0, 5.0, 6.0, 1.0, 2.0, 3.0]);
        let out = window.push(&[7.0, 8.0, 9.0]);
        assert_eq!(out, &[7.0, 8.0, 9.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_window_restarts_on_width_change() {
        let mut window = WindowBuffer::new(2, 2);
        window.push(&[1.0, 1.0]);
        let out = window.push(&[5.0]);
        assert_eq!(out, &[5.0, 0.0]);
        assert_eq!(window.dims(), 1);
    }

    #[test]
    fn test_zero_depth_is_single_step() {
        assert_eq!(StepHistory::new(4, 0).steps(), 1);
        assert_eq!(WindowBuffer::new(4, 0).as_slice().len(), 4);
    }
}
