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

//! A scripted inference backend.

use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use marionette_core::inference::{
    InferenceBackend, InferenceError, InferenceSession, Tensor, TensorMap,
};

type Script = dyn Fn(&TensorMap) -> TensorMap + Send + Sync;

/// What the backend and its sessions have been asked to do.
#[derive(Debug, Default, Clone)]
pub struct InferenceRecord {
    /// Sessions created so far.
    pub sessions_created: usize,
    /// Sessions explicitly released.
    pub sessions_released: usize,
    /// Inputs of every `run`, in call order.
    pub inputs: Vec<TensorMap>,
}

/// Shared view of a [`ScriptedInference`]'s activity.
#[derive(Debug, Default, Clone)]
pub struct InferenceProbe(Arc<Mutex<InferenceRecord>>);

impl InferenceProbe {
    fn lock(&self) -> MutexGuard<'_, InferenceRecord> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A copy of the record.
    pub fn record(&self) -> InferenceRecord {
        self.lock().clone()
    }

    /// Number of completed or failed `run` calls.
    pub fn runs(&self) -> usize {
        self.lock().inputs.len()
    }

    /// Inputs of the most recent `run`.
    pub fn last_inputs(&self) -> Option<TensorMap> {
        self.lock().inputs.last().cloned()
    }
}

/// An [`InferenceBackend`] whose sessions answer from a script.
#[derive(Clone)]
pub struct ScriptedInference {
    input_names: Vec<String>,
    output_names: Vec<String>,
    script: Arc<Script>,
    fail_after: Option<usize>,
    run_delay: Option<Duration>,
    probe: InferenceProbe,
}

impl ScriptedInference {
    /// Creates a backend whose sessions declare the given tensor names and
    /// answer every run with `outputs`.
    pub fn new(input_names: &[&str], output_names: &[&str], outputs: TensorMap) -> Self {
        Self {
            input_names: input_names.iter().map(|s| (*s).to_owned()).collect(),
            output_names: output_names.iter().map(|s| (*s).to_owned()).collect(),
            script: Arc::new(move |_| outputs.clone()),
            fail_after: None,
            run_delay: None,
            probe: InferenceProbe::default(),
        }
    }

    /// A single-input policy answering `action` with a fixed vector.
    pub fn constant_action(action: Vec<f32>) -> Self {
        let mut outputs = TensorMap::new();
        outputs.insert("out_0".into(), Tensor::row(action));
        Self::new(&["in_0"], &["out_0"], outputs)
    }

    /// Replaces the answer with a function of the inputs.
    #[must_use]
    pub fn with_script(
        mut self,
        script: impl Fn(&TensorMap) -> TensorMap + Send + Sync + 'static,
    ) -> Self {
        self.script = Arc::new(script);
        self
    }

    /// Makes every run after the first `runs` fail.
    #[must_use]
    pub fn failing_after(mut self, runs: usize) -> Self {
        self.fail_after = Some(runs);
        self
    }

    /// Delays every run.
    #[must_use]
    pub fn with_run_delay(mut self, delay: Duration) -> Self {
        self.run_delay = Some(delay);
        self
    }

    /// A probe shared by the backend and all its sessions.
    pub fn probe(&self) -> InferenceProbe {
        self.probe.clone()
    }
}

#[async_trait]
impl InferenceBackend for ScriptedInference {
    async fn create_session(
        &self,
        model: Vec<u8>,
    ) -> Result<Box<dyn InferenceSession>, InferenceError> {
        if model.is_empty() {
            return Err(InferenceError::SessionCreation("empty model".into()));
        }
        self.probe.lock().sessions_created += 1;
        Ok(Box::new(ScriptedSession {
            backend: self.clone(),
            released: false,
        }))
    }
}

struct ScriptedSession {
    backend: ScriptedInference,
    released: bool,
}

#[async_trait]
impl InferenceSession for ScriptedSession {
    fn input_names(&self) -> &[String] {
        &self.backend.input_names
    }

    fn output_names(&self) -> &[String] {
        &self.backend.output_names
    }

    async fn run(&mut self, inputs: TensorMap) -> Result<TensorMap, InferenceError> {
        if self.released {
            return Err(InferenceError::Released);
        }
        for name in &self.backend.input_names {
            if !inputs.contains_key(name) {
                return Err(InferenceError::MissingInput(name.clone()));
            }
        }
        if let Some(delay) = self.backend.run_delay {
            tokio::time::sleep(delay).await;
        }

        let previous_runs = {
            let mut record = self.backend.probe.lock();
            record.inputs.push(inputs.clone());
            record.inputs.len() - 1
        };
        if self.backend.fail_after.is_some_and(|limit| previous_runs >= limit) {
            return Err(InferenceError::Execution("scripted failure".into()));
        }
        Ok((self.backend.script)(&inputs))
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.backend.probe.lock().sessions_released += 1;
        }
    }
}
