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

//! Builds one observation pipeline per group of a policy's `obs_config`.

use std::any::Any;

use serde_json::Value;

use marionette_core::config::PolicyDescriptor;
use marionette_core::engine::ModelInfo;
use marionette_core::inference::{Tensor, TensorMap};
use marionette_core::manager::{
    ActionState, Capabilities, CollectContext, Manager, ManagerRole, RuntimeLink, SimContext,
};
use marionette_core::ManagerError;

use super::components::{ComponentSpec, ObservationComponent};
use super::history::WindowBuffer;

/// How a group's per-step vector is buffered.
#[derive(Debug)]
enum GroupHistory {
    /// The current step only.
    Single,
    /// A window of past steps, newest first.
    Windowed {
        window: WindowBuffer,
        interleaved: bool,
    },
}

#[derive(Debug)]
struct ObservationGroup {
    key: String,
    components: Vec<Box<dyn ObservationComponent>>,
    history: GroupHistory,
}

impl ObservationGroup {
    fn collect(&mut self, ctx: &CollectContext<'_>) -> Vec<f32> {
        let mut current = Vec::with_capacity(self.components.iter().map(|c| c.dims()).sum());
        for component in &mut self.components {
            current.extend(component.compute(ctx));
        }
        match &mut self.history {
            GroupHistory::Single => current,
            // Both layouts share the step-major window; component-major
            // grouping has no consumer yet.
            GroupHistory::Windowed { window, .. } => window.push(&current).to_vec(),
        }
    }
}

/// Assembles the named observation tensors a policy consumes.
///
/// Each `obs_config` entry is either a list of component descriptors (or a
/// single one), concatenated every step, or a windowed group
/// `{ history_steps, interleaved, components }` whose concatenated step is
/// kept in a newest-first window. Components inside a window always run with
/// one step of their own history.
#[derive(Debug, Default)]
pub struct ObservationAssembler {
    groups: Vec<ObservationGroup>,
}

impl ObservationAssembler {
    /// Creates an assembler with no groups.
    pub fn new() -> Self {
        Self::default()
    }

    /// Group keys in descriptor order.
    pub fn group_keys(&self) -> Vec<&str> {
        self.groups.iter().map(|g| g.key.as_str()).collect()
    }

    /// Flattened tensor length of a group.
    pub fn group_dims(&self, key: &str) -> Option<usize> {
        let group = self.groups.iter().find(|g| g.key == key)?;
        Some(match &group.history {
            GroupHistory::Single => group.components.iter().map(|c| c.dims()).sum(),
            GroupHistory::Windowed { window, .. } => window.dims() * window.steps(),
        })
    }

    /// Whether a windowed group was declared interleaved.
    pub fn is_interleaved(&self, key: &str) -> Option<bool> {
        self.groups.iter().find(|g| g.key == key).map(|g| match g.history {
            GroupHistory::Single => false,
            GroupHistory::Windowed { interleaved, .. } => interleaved,
        })
    }

    /// Rebuilds every group from `policy`.
    ///
    /// On error the previous groups are dropped and none are installed.
    pub fn configure(
        &mut self,
        policy: &PolicyDescriptor,
        model: &ModelInfo,
        actions: &ActionState,
    ) -> Result<(), ManagerError> {
        self.groups.clear();
        let mut groups = Vec::with_capacity(policy.obs_config.len());
        for (key, value) in &policy.obs_config {
            let group = build_group(key, value, model, actions)?;
            log::debug!(
                "[ObservationAssembler] Group '{key}': {} components",
                group.components.len()
            );
            groups.push(group);
        }
        self.groups = groups;
        Ok(())
    }

    /// Computes every group as a `[1, n]` tensor.
    pub fn collect_groups(&mut self, ctx: &CollectContext<'_>) -> TensorMap {
        self.groups
            .iter_mut()
            .map(|group| (group.key.clone(), Tensor::row(group.collect(ctx))))
            .collect()
    }
}

fn is_windowed(value: &Value) -> bool {
    value
        .as_object()
        .is_some_and(|o| o.contains_key("interleaved") || o.contains_key("history_steps"))
}

fn build_group(
    key: &str,
    value: &Value,
    model: &ModelInfo,
    actions: &ActionState,
) -> Result<ObservationGroup, ManagerError> {
    if !is_windowed(value) {
        let items = match value {
            Value::Array(items) => items.clone(),
            other => vec![other.clone()],
        };
        let components = items
            .into_iter()
            .map(|item| ComponentSpec::from_value(item)?.build(model, actions))
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(ObservationGroup {
            key: key.to_owned(),
            components,
            history: GroupHistory::Single,
        });
    }

    let steps = value
        .get("history_steps")
        .and_then(Value::as_u64)
        .filter(|s| *s > 0)
        .unwrap_or(1) as usize;
    let interleaved = value
        .get("interleaved")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let items = match value.get("components") {
        Some(Value::Array(items)) => items.clone(),
        Some(_) => {
            return Err(ManagerError::InvalidConfig(format!(
                "'{key}.components' must be a list"
            )))
        }
        None => Vec::new(),
    };

    let components = items
        .into_iter()
        .map(|mut item| {
            if let Some(obj) = item.as_object_mut() {
                obj.insert("history_steps".to_owned(), Value::from(1));
            }
            ComponentSpec::from_value(item)?.build(model, actions)
        })
        .collect::<Result<Vec<_>, _>>()?;

    let dims: usize = components.iter().map(|c| c.dims()).sum();
    log::info!(
        "[ObservationAssembler] History for '{key}': {dims} dims/step x {steps} steps (interleaved: {interleaved})"
    );
    Ok(ObservationGroup {
        key: key.to_owned(),
        components,
        history: GroupHistory::Windowed {
            window: WindowBuffer::new(dims, steps),
            interleaved,
        },
    })
}

impl Manager for ObservationAssembler {
    fn name(&self) -> &'static str {
        "ObservationAssembler"
    }

    fn role(&self) -> ManagerRole {
        ManagerRole::Observation
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::POLICY_LOADED
            | Capabilities::POLICY_CLEARED
            | Capabilities::COLLECT
            | Capabilities::DISPOSE
    }

    fn on_policy_loaded(
        &mut self,
        policy: &PolicyDescriptor,
        ctx: &mut SimContext<'_>,
    ) -> Result<(), ManagerError> {
        self.configure(policy, ctx.model, ctx.actions)
    }

    fn on_policy_cleared(&mut self, _link: &mut RuntimeLink<'_>) -> Result<(), ManagerError> {
        self.groups.clear();
        Ok(())
    }

    fn collect(&mut self, ctx: &CollectContext<'_>) -> Result<TensorMap, ManagerError> {
        Ok(self.collect_groups(ctx))
    }

    fn dispose(&mut self, _link: &mut RuntimeLink<'_>) {
        self.groups.clear();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
