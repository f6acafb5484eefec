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

//! # Marionette Assets
//!
//! Finds every file a scene description depends on and stages those files
//! where the physics engine can load them.
//!
//! - [`resolver::AssetResolver`] walks the include graph of a scene and
//!   resolves each reference through directory hints.
//! - [`manifest::AssetManifest`] adds the static `index.json` fallback.
//! - [`stage::SceneStager`] downloads a manifest into a working directory.

#![warn(missing_docs)]

pub mod fetch;
pub mod hints;
pub mod manifest;
pub mod path;
pub mod resolver;
pub mod stage;

pub use fetch::{AssetFetcher, FetchError, LocalFetcher, MemoryFetcher};
pub use manifest::{AssetManifest, ManifestError, ManifestSource};
pub use resolver::AssetResolver;
pub use stage::{SceneStager, StagedScene};
