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

//! Lifecycle states of the runtime.

use std::fmt;

/// Where the runtime is in its scene/policy lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RuntimeState {
    /// Nothing is loaded.
    #[default]
    Idle,
    /// A scene is being staged and loaded.
    LoadingScene,
    /// A scene is loaded and no policy is active.
    SceneReady,
    /// A policy is being fetched and initialized.
    LoadingPolicy,
    /// A scene and a policy are loaded.
    PolicyReady,
    /// Every resource has been released. Terminal.
    Disposed,
}

impl RuntimeState {
    /// Returns `true` if the runtime may move from `self` to `next`.
    pub fn can_transition_to(self, next: RuntimeState) -> bool {
        use RuntimeState::*;
        match (self, next) {
            (Disposed, _) => false,
            (_, Disposed) => true,
            (Idle | SceneReady | PolicyReady, LoadingScene) => true,
            // A failed scene load leaves nothing behind.
            (LoadingScene, SceneReady | Idle) => true,
            (SceneReady | PolicyReady, LoadingPolicy) => true,
            (LoadingPolicy, PolicyReady | SceneReady) => true,
            (PolicyReady, SceneReady) => true,
            _ => false,
        }
    }

    /// Returns `true` once a scene is loaded and usable.
    pub fn has_scene(self) -> bool {
        matches!(
            self,
            RuntimeState::SceneReady | RuntimeState::LoadingPolicy | RuntimeState::PolicyReady
        )
    }
}

impl fmt::Display for RuntimeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RuntimeState::Idle => "idle",
            RuntimeState::LoadingScene => "loadingScene",
            RuntimeState::SceneReady => "sceneReady",
            RuntimeState::LoadingPolicy => "loadingPolicy",
            RuntimeState::PolicyReady => "policyReady",
            RuntimeState::Disposed => "disposed",
        };
        f.write_str(name)
    }
}
