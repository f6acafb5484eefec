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

//! Wrapper around one inference session of a loaded policy.

use marionette_assets::AssetFetcher;
use marionette_core::config::PolicyDescriptor;
use marionette_core::inference::{InferenceBackend, InferenceError, InferenceSession, Tensor, TensorMap};

use crate::RuntimeError;

/// Input key marking a recurrent policy.
pub const RECURRENT_STATE_INPUT: &str = "adapt_hx";
/// Input flag that is `true` only on the first run after a load.
pub const FIRST_RUN_INPUT: &str = "is_init";
/// Output key carrying the next recurrent state.
pub const RECURRENT_STATE_OUTPUT: &str = "next,adapt_hx";

/// A policy network bound to the runtime's tensor keys.
///
/// Inputs are bound positionally: the `i`-th entry of `in_keys` feeds the
/// session's `i`-th declared input. Outputs map back the same way onto
/// `out_keys`.
pub struct PolicyModule {
    session: Box<dyn InferenceSession>,
    in_keys: Vec<String>,
    out_keys: Vec<String>,
    recurrent: bool,
    state_size: usize,
    inputs: TensorMap,
    released: bool,
}

impl PolicyModule {
    /// Fetches the network named by `descriptor` and opens a session on it.
    pub async fn load(
        descriptor: &PolicyDescriptor,
        backend: &dyn InferenceBackend,
        fetcher: &dyn AssetFetcher,
        state_size: usize,
    ) -> Result<Self, RuntimeError> {
        let (spec, in_keys) = descriptor.network()?;
        log::info!("[PolicyModule] Fetching network from {}", spec.path);
        let bytes = fetcher.fetch_bytes(&spec.path).await?;
        log::debug!("[PolicyModule] Network fetched, {} bytes", bytes.len());

        let session = backend.create_session(bytes).await?;
        let module = Self::new(session, in_keys.to_vec(), spec.meta.out_keys.clone(), state_size);
        log::info!(
            "[PolicyModule] Session ready: in_keys={:?} out_keys={:?} inputs={:?} outputs={:?}",
            module.in_keys,
            module.out_keys,
            module.session.input_names(),
            module.session.output_names()
        );
        Ok(module)
    }

    /// Wraps an open session.
    pub fn new(
        session: Box<dyn InferenceSession>,
        in_keys: Vec<String>,
        out_keys: Vec<String>,
        state_size: usize,
    ) -> Self {
        let recurrent = in_keys.iter().any(|k| k == RECURRENT_STATE_INPUT);
        let mut module = Self {
            session,
            in_keys,
            out_keys,
            recurrent,
            state_size,
            inputs: TensorMap::new(),
            released: false,
        };
        module.inputs = module.init_input();
        module
    }

    /// Whether the network carries a recurrent state between runs.
    pub fn is_recurrent(&self) -> bool {
        self.recurrent
    }

    /// Runtime-side keys of the network inputs.
    pub fn in_keys(&self) -> &[String] {
        &self.in_keys
    }

    /// Runtime-side keys of the network outputs.
    pub fn out_keys(&self) -> &[String] {
        &self.out_keys
    }

    /// The inputs a freshly loaded policy starts from.
    pub fn init_input(&self) -> TensorMap {
        let mut inputs = TensorMap::new();
        if self.recurrent {
            inputs.insert(FIRST_RUN_INPUT.into(), Tensor::from_bool(vec![true], vec![1]));
            inputs.insert(
                RECURRENT_STATE_INPUT.into(),
                Tensor::from_f32(vec![0.0; self.state_size], vec![1, self.state_size]),
            );
        }
        inputs
    }

    /// Restarts from [`PolicyModule::init_input`].
    pub fn reset_inputs(&mut self) {
        self.inputs = self.init_input();
    }

    /// Adds or replaces pending inputs, typically the latest observations.
    pub fn merge_inputs(&mut self, inputs: TensorMap) {
        self.inputs.extend(inputs);
    }

    /// Runs the network on the pending inputs.
    ///
    /// After a run the pending inputs are replaced by the carry: the next
    /// recurrent state for recurrent networks, nothing otherwise.
    pub async fn run(&mut self) -> Result<TensorMap, InferenceError> {
        if self.released {
            return Err(InferenceError::Released);
        }

        let input_names = self.session.input_names();
        let mut feed = TensorMap::with_capacity(self.in_keys.len());
        for (i, key) in self.in_keys.iter().enumerate() {
            let name = input_names
                .get(i)
                .ok_or_else(|| InferenceError::MissingInput(key.clone()))?;
            let tensor = self
                .inputs
                .get(key)
                .cloned()
                .ok_or_else(|| InferenceError::MissingInput(key.clone()))?;
            feed.insert(name.clone(), tensor);
        }

        let mut raw = self.session.run(feed).await?;
        let output_names = self.session.output_names();
        let mut result = TensorMap::with_capacity(self.out_keys.len());
        for (key, name) in self.out_keys.iter().zip(output_names) {
            if let Some(tensor) = raw.remove(name) {
                result.insert(key.clone(), tensor);
            }
        }

        let mut carry = TensorMap::new();
        if self.recurrent {
            carry.insert(FIRST_RUN_INPUT.into(), Tensor::from_bool(vec![false], vec![1]));
            if let Some(state) = result.get(RECURRENT_STATE_OUTPUT) {
                carry.insert(RECURRENT_STATE_INPUT.into(), state.clone());
            }
        }
        self.inputs = carry;
        Ok(result)
    }

    /// Frees the session. Safe to call more than once.
    pub fn release(&mut self) {
        if !self.released {
            self.session.release();
            self.released = true;
            self.inputs.clear();
            log::debug!("[PolicyModule] Session released");
        }
    }
}

impl Drop for PolicyModule {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marionette_assets::MemoryFetcher;
    use marionette_core::inference::TensorData;
    use marionette_test_utils::ScriptedInference;

    fn descriptor(in_keys: &str) -> PolicyDescriptor {
        PolicyDescriptor::from_json(&format!(
            r#"{{"onnx": {{"path": "policy.onnx", "meta": {{"in_keys": {in_keys}, "out_keys": ["action", "next,adapt_hx"]}}}}}}"#
        ))
        .unwrap()
    }

    fn fetcher() -> MemoryFetcher {
        MemoryFetcher::new().with_file("policy.onnx", vec![1u8, 2, 3])
    }

    fn recurrent_backend() -> ScriptedInference {
        ScriptedInference::new(&["obs", "flag", "hx"], &["act", "hx_out"], TensorMap::new())
            .with_script(|inputs| {
                let mut out = TensorMap::new();
                out.insert("act".into(), Tensor::row(vec![0.5]));
                let hx = inputs["hx"].as_f32().map(|v| v[0]).unwrap_or_default();
                out.insert("hx_out".into(), Tensor::from_f32(vec![hx + 1.0; 4], vec![1, 4]));
                out
            })
    }

    #[tokio::test]
    async fn test_binds_inputs_and_outputs_positionally() {
        let backend = ScriptedInference::constant_action(vec![1.0, 2.0]);
        let probe = backend.probe();
        let mut policy = PolicyModule::load(&descriptor(r#"["policy"]"#), &backend, &fetcher(), 128)
            .await
            .unwrap();
        assert!(!policy.is_recurrent());
        assert!(policy.init_input().is_empty());

        let mut obs = TensorMap::new();
        obs.insert("policy".into(), Tensor::row(vec![0.25]));
        policy.merge_inputs(obs);
        let out = policy.run().await.unwrap();

        assert_eq!(out["action"].as_f32().unwrap(), &[1.0, 2.0]);
        let fed = probe.last_inputs().unwrap();
        assert_eq!(fed["in_0"].as_f32().unwrap(), &[0.25]);
    }

    #[tokio::test]
    async fn test_recurrent_state_is_carried() {
        let backend = recurrent_backend();
        let probe = backend.probe();
        let mut policy = PolicyModule::load(
            &descriptor(r#"["policy", "is_init", "adapt_hx"]"#),
            &backend,
            &fetcher(),
            4,
        )
        .await
        .unwrap();
        assert!(policy.is_recurrent());

        for _ in 0..2 {
            let mut obs = TensorMap::new();
            obs.insert("policy".into(), Tensor::row(vec![0.0]));
            policy.merge_inputs(obs);
            policy.run().await.unwrap();
        }

        let record = probe.record();
        let first = &record.inputs[0];
        assert_eq!(first["flag"].data, TensorData::Bool(vec![true]));
        assert_eq!(first["hx"].shape, vec![1, 4]);
        assert_eq!(first["hx"].as_f32().unwrap(), &[0.0; 4]);
        let second = &record.inputs[1];
        assert_eq!(second["flag"].data, TensorData::Bool(vec![false]));
        assert_eq!(second["hx"].as_f32().unwrap(), &[1.0; 4]);
    }

    #[tokio::test]
    async fn test_missing_observation_is_an_error() {
        let backend = ScriptedInference::constant_action(vec![0.0]);
        let mut policy = PolicyModule::load(&descriptor(r#"["policy"]"#), &backend, &fetcher(), 128)
            .await
            .unwrap();
        assert!(matches!(
            policy.run().await,
            Err(InferenceError::MissingInput(key)) if key == "policy"
        ));
    }

    #[tokio::test]
    async fn test_missing_in_keys_is_a_config_error() {
        let descriptor =
            PolicyDescriptor::from_json(r#"{"onnx": {"path": "policy.onnx", "meta": {"out_keys": []}}}"#)
                .unwrap();
        let backend = ScriptedInference::constant_action(vec![0.0]);
        let result = PolicyModule::load(&descriptor, &backend, &fetcher(), 128).await;
        assert!(matches!(result, Err(RuntimeError::Config(_))));
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let backend = ScriptedInference::constant_action(vec![0.0]);
        let probe = backend.probe();
        let mut policy = PolicyModule::load(&descriptor(r#"["policy"]"#), &backend, &fetcher(), 128)
            .await
            .unwrap();
        policy.release();
        policy.release();
        drop(policy);
        assert_eq!(probe.record().sessions_released, 1);
    }
}
