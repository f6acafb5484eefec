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

//! Contract for the neural-network inference collaborator.

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;

/// Element storage of a [`Tensor`].
#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
    /// 32-bit floats.
    F32(Vec<f32>),
    /// Booleans.
    Bool(Vec<bool>),
}

/// A dense tensor exchanged with the inference engine.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    /// Element storage.
    pub data: TensorData,
    /// Shape; the product of its dimensions equals the element count.
    pub shape: Vec<usize>,
}

impl Tensor {
    /// Creates a float tensor.
    pub fn from_f32(data: Vec<f32>, shape: Vec<usize>) -> Self {
        Self {
            data: TensorData::F32(data),
            shape,
        }
    }

    /// Creates a boolean tensor.
    pub fn from_bool(data: Vec<bool>, shape: Vec<usize>) -> Self {
        Self {
            data: TensorData::Bool(data),
            shape,
        }
    }

    /// Creates a `[1, n]` float tensor, the shape of every observation group.
    pub fn row(data: Vec<f32>) -> Self {
        let n = data.len();
        Self::from_f32(data, vec![1, n])
    }

    /// Returns the float elements, or `None` for a boolean tensor.
    pub fn as_f32(&self) -> Option<&[f32]> {
        match &self.data {
            TensorData::F32(v) => Some(v),
            TensorData::Bool(_) => None,
        }
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        match &self.data {
            TensorData::F32(v) => v.len(),
            TensorData::Bool(v) => v.len(),
        }
    }

    /// Returns `true` if the tensor has no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Named tensors, used for both inputs and outputs.
pub type TensorMap = HashMap<String, Tensor>;

/// Error type for inference operations.
#[derive(Debug)]
pub enum InferenceError {
    /// The model bytes could not be turned into a session.
    SessionCreation(String),
    /// A declared input was not provided.
    MissingInput(String),
    /// The engine failed while running.
    Execution(String),
    /// The session was used after release.
    Released,
}

impl fmt::Display for InferenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InferenceError::SessionCreation(msg) => write!(f, "Failed to create session: {msg}"),
            InferenceError::MissingInput(name) => write!(f, "Missing inference input '{name}'"),
            InferenceError::Execution(msg) => write!(f, "Inference failed: {msg}"),
            InferenceError::Released => write!(f, "Inference session already released"),
        }
    }
}

impl std::error::Error for InferenceError {}

/// A live inference session. One `run` is in flight at a time.
#[async_trait]
pub trait InferenceSession: Send {
    /// Input names in the model's declared order.
    fn input_names(&self) -> &[String];

    /// Output names in the model's declared order.
    fn output_names(&self) -> &[String];

    /// Runs the model once, keyed by the session's own input and output names.
    async fn run(&mut self, inputs: TensorMap) -> Result<TensorMap, InferenceError>;

    /// Frees engine resources. Further `run` calls fail with
    /// [`InferenceError::Released`].
    fn release(&mut self) {}
}

/// Creates sessions from serialized model bytes.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Initializes a session for the given model.
    async fn create_session(
        &self,
        model: Vec<u8>,
    ) -> Result<Box<dyn InferenceSession>, InferenceError>;
}
