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

//! The simulation runtime: scene and policy loading, the fixed-rate step
//! loop and manager dispatch.

use std::any::type_name;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::{Duration, Instant};

use marionette_assets::{AssetFetcher, AssetResolver, SceneStager};
use marionette_core::config::{
    needs_model_joint_control, AssetMetadata, EnvironmentPaths, PolicyDescriptor,
    TrajectoryDocument,
};
use marionette_core::engine::PhysicsEngine;
use marionette_core::inference::{InferenceBackend, TensorMap};
use marionette_core::manager::{ActionState, CollectContext, RuntimeLink, SimContext};
use marionette_core::render::{CameraOverride, RenderSink, WorldSnapshot};
use marionette_core::{Capabilities, Manager, ManagerError, ManagerRole, RuntimeParams, ServiceRegistry};
use marionette_managers::{ModelJointControl, PassiveAction, TrajectoryPlayback};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;

use crate::camera::camera_from_metadata;
use crate::config::RuntimeConfig;
use crate::handle::SimulationHandle;
use crate::policy::PolicyModule;
use crate::snapshot;
use crate::state::RuntimeState;
use crate::RuntimeError;

/// Physics sub-steps per control tick: `max(1, round(control_dt / timestep))`.
pub fn decimation(control_dt: f64, timestep: f64) -> usize {
    if !(timestep.is_finite() && timestep > 0.0) {
        return 1;
    }
    ((control_dt / timestep).round() as usize).max(1)
}

/// Time left to sleep after a tick that took `elapsed`. Zero when the tick
/// overran its period.
pub fn pacing_delay(period: Duration, elapsed: Duration) -> Duration {
    period.saturating_sub(elapsed)
}

/// Picks the action strategy a scene needs: model-driven joint control when
/// its metadata declares joints, actuators or a default pose, otherwise none.
pub fn default_action_manager(meta: Option<&AssetMetadata>) -> Box<dyn Manager> {
    if needs_model_joint_control(meta) {
        Box::new(ModelJointControl::new())
    } else {
        Box::new(PassiveAction::new())
    }
}

/// Counters and timings of the step loop.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoopStats {
    /// Loop iterations that did simulation work.
    pub ticks: u64,
    /// Physics sub-steps executed.
    pub sim_steps: u64,
    /// Successful inference runs.
    pub inferences: u64,
    /// Duration of the last inference run.
    pub last_inference: Duration,
    /// Duration of the last tick's physics sub-steps.
    pub last_step: Duration,
    /// Duration of the last snapshot.
    pub last_snapshot: Duration,
}

// ─────────────────────────────────────────────────────────────────────
// Manager slots
// ─────────────────────────────────────────────────────────────────────

struct ManagerSlot {
    manager: Box<dyn Manager>,
    caps: Capabilities,
}

impl ManagerSlot {
    fn new(manager: Box<dyn Manager>) -> Self {
        let caps = manager.capabilities();
        log::debug!("[Runtime] Attaching {} with {caps:?}", manager.name());
        Self { manager, caps }
    }

    fn has(&self, cap: Capabilities) -> bool {
        self.caps.contains(cap)
    }
}

/// Managers grouped by role.
///
/// Hooks are always dispatched in the order command, action, observations,
/// environments.
struct ManagerSet {
    command: Option<ManagerSlot>,
    action: ManagerSlot,
    observations: Vec<ManagerSlot>,
    environments: Vec<ManagerSlot>,
}

impl ManagerSet {
    fn iter_mut(&mut self) -> impl Iterator<Item = &mut ManagerSlot> {
        self.command
            .iter_mut()
            .chain(std::iter::once(&mut self.action))
            .chain(self.observations.iter_mut())
            .chain(self.environments.iter_mut())
    }
}

// ─────────────────────────────────────────────────────────────────────
// Builder
// ─────────────────────────────────────────────────────────────────────

/// Assembles a [`SimulationRuntime`] from its collaborators and managers.
#[derive(Default)]
pub struct RuntimeBuilder {
    engine: Option<Box<dyn PhysicsEngine>>,
    inference: Option<Arc<dyn InferenceBackend>>,
    fetcher: Option<Arc<dyn AssetFetcher>>,
    renderer: Option<Box<dyn RenderSink>>,
    working_dir: Option<PathBuf>,
    config: RuntimeConfig,
    command: Option<Box<dyn Manager>>,
    action: Option<Box<dyn Manager>>,
    observations: Vec<Box<dyn Manager>>,
    environments: Vec<Box<dyn Manager>>,
}

impl RuntimeBuilder {
    /// Sets the physics engine. Required.
    pub fn engine(mut self, engine: Box<dyn PhysicsEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Sets the inference backend. Required.
    pub fn inference(mut self, backend: Arc<dyn InferenceBackend>) -> Self {
        self.inference = Some(backend);
        self
    }

    /// Sets where scenes, metadata and policies are fetched from. Required.
    pub fn fetcher(mut self, fetcher: Arc<dyn AssetFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Sets the renderer that receives camera overrides.
    pub fn renderer(mut self, renderer: Box<dyn RenderSink>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    /// Directory scenes are staged into. Defaults to `marionette` under the
    /// system temp directory.
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Replaces the runtime tunables.
    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Adds a manager to the slot its [`ManagerRole`] names.
    ///
    /// The command and action slots hold one manager each; a second one
    /// replaces the first. Without an action manager, the runtime picks
    /// one per scene with [`default_action_manager`].
    pub fn manager(mut self, manager: Box<dyn Manager>) -> Self {
        let slot = match manager.role() {
            ManagerRole::Command => &mut self.command,
            ManagerRole::Action => &mut self.action,
            ManagerRole::Observation => {
                self.observations.push(manager);
                return self;
            }
            ManagerRole::Environment => {
                self.environments.push(manager);
                return self;
            }
        };
        if let Some(previous) = slot.replace(manager) {
            log::warn!("[RuntimeBuilder] Replacing {} manager {}", previous.role(), previous.name());
        }
        self
    }

    /// Attaches every manager and returns the runtime.
    pub fn build(self) -> Result<SimulationRuntime, RuntimeError> {
        let engine = self.engine.ok_or(RuntimeError::MissingComponent("physics engine"))?;
        let inference = self
            .inference
            .ok_or(RuntimeError::MissingComponent("inference backend"))?;
        let fetcher = self.fetcher.ok_or(RuntimeError::MissingComponent("asset fetcher"))?;
        let working_dir = self
            .working_dir
            .unwrap_or_else(|| std::env::temp_dir().join("marionette"));

        let auto_action = self.action.is_none();
        let action = self
            .action
            .unwrap_or_else(|| Box::new(PassiveAction::new()));
        let managers = ManagerSet {
            command: self.command.map(ManagerSlot::new),
            action: ManagerSlot::new(action),
            observations: self.observations.into_iter().map(ManagerSlot::new).collect(),
            environments: self.environments.into_iter().map(ManagerSlot::new).collect(),
        };

        let mut core = RuntimeCore {
            sim: SimulationHandle::new(engine),
            renderer: self.renderer,
            managers,
            auto_action,
            params: self.config.default_params.clone(),
            services: ServiceRegistry::new(),
            actions: ActionState::default(),
            asset_meta: None,
            policy: None,
            descriptor: None,
            state: RuntimeState::Idle,
            decimation: 1,
            control_dt: self.config.control_dt,
        };
        core.attach_all()?;

        let resolver = Arc::new(AssetResolver::new(Arc::clone(&fetcher)));
        let stager = SceneStager::new(Arc::clone(&fetcher), resolver, working_dir);

        Ok(SimulationRuntime {
            shared: Arc::new(Shared {
                core: AsyncMutex::new(core),
                running: AtomicBool::new(false),
                inferencing: AtomicBool::new(false),
                snapshot: RwLock::new(Arc::new(WorldSnapshot::default())),
                stats: Mutex::new(LoopStats::default()),
                loop_error: Mutex::new(None),
            }),
            fetcher,
            inference,
            stager,
            config: self.config,
            scene_gate: AsyncMutex::new(()),
            policy_gate: AsyncMutex::new(()),
            loop_task: Mutex::new(None),
        })
    }
}

// ─────────────────────────────────────────────────────────────────────
// Runtime core (single owner of the simulation)
// ─────────────────────────────────────────────────────────────────────

struct RuntimeCore {
    sim: SimulationHandle,
    renderer: Option<Box<dyn RenderSink>>,
    managers: ManagerSet,
    auto_action: bool,
    params: RuntimeParams,
    services: ServiceRegistry,
    actions: ActionState,
    asset_meta: Option<AssetMetadata>,
    policy: Option<PolicyModule>,
    descriptor: Option<PolicyDescriptor>,
    state: RuntimeState,
    decimation: usize,
    control_dt: f64,
}

impl RuntimeCore {
    fn attach_all(&mut self) -> Result<(), RuntimeError> {
        let Self {
            managers,
            params,
            services,
            actions,
            ..
        } = self;
        for slot in managers.iter_mut() {
            let mut link = RuntimeLink {
                params: &mut *params,
                services: &mut *services,
                actions: &mut *actions,
            };
            attach(slot, &mut link)?;
        }
        Ok(())
    }

    fn transition(&mut self, next: RuntimeState) -> Result<(), RuntimeError> {
        if !self.state.can_transition_to(next) {
            return Err(RuntimeError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        log::debug!("[Runtime] {} -> {next}", self.state);
        self.state = next;
        Ok(())
    }

    fn ensure_live(&self) -> Result<(), RuntimeError> {
        if self.state == RuntimeState::Disposed {
            return Err(RuntimeError::Disposed);
        }
        Ok(())
    }

    /// Target duration of one loop iteration.
    fn period(&self) -> Duration {
        let seconds = match self.sim.model_info() {
            Some(model) => model.timestep * self.decimation as f64,
            None => self.control_dt,
        };
        Duration::try_from_secs_f64(seconds).unwrap_or(Duration::ZERO)
    }

    fn link(&mut self) -> RuntimeLink<'_> {
        RuntimeLink {
            params: &mut self.params,
            services: &mut self.services,
            actions: &mut self.actions,
        }
    }

    fn dispatch_link(
        &mut self,
        cap: Capabilities,
        mut hook: impl FnMut(&mut dyn Manager, &mut RuntimeLink<'_>) -> Result<(), ManagerError>,
    ) -> Result<(), RuntimeError> {
        let Self {
            managers,
            params,
            services,
            actions,
            ..
        } = self;
        for slot in managers.iter_mut().filter(|s| s.has(cap)) {
            let mut link = RuntimeLink {
                params: &mut *params,
                services: &mut *services,
                actions: &mut *actions,
            };
            hook(slot.manager.as_mut(), &mut link)
                .map_err(|e| RuntimeError::manager(slot.manager.name(), e))?;
        }
        Ok(())
    }

    fn dispatch_sim(
        &mut self,
        cap: Capabilities,
        substep: usize,
        mut hook: impl FnMut(&mut dyn Manager, &mut SimContext<'_>) -> Result<(), ManagerError>,
    ) -> Result<(), RuntimeError> {
        let Self {
            sim,
            managers,
            params,
            services,
            actions,
            asset_meta,
            ..
        } = self;
        let (model, data) = sim.split_mut().ok_or(RuntimeError::NoSceneLoaded)?;
        for slot in managers.iter_mut().filter(|s| s.has(cap)) {
            let mut ctx = SimContext {
                model,
                data: &mut *data,
                asset_meta: asset_meta.as_ref(),
                params: &mut *params,
                services: &mut *services,
                actions: &mut *actions,
                timestep: model.timestep,
                substep,
            };
            hook(slot.manager.as_mut(), &mut ctx)
                .map_err(|e| RuntimeError::manager(slot.manager.name(), e))?;
        }
        Ok(())
    }

    /// Merges the inputs of every collecting manager.
    fn collect(&mut self) -> Result<TensorMap, RuntimeError> {
        let Self {
            sim,
            managers,
            params,
            services,
            actions,
            ..
        } = self;
        let model = sim.model_info().ok_or(RuntimeError::NoSceneLoaded)?;
        let data = sim.data().ok_or(RuntimeError::NoSceneLoaded)?;
        let ctx = CollectContext::new(model, data, params, services, actions);

        let mut inputs = TensorMap::new();
        for slot in managers.iter_mut().filter(|s| s.has(Capabilities::COLLECT)) {
            let collected = slot
                .manager
                .collect(&ctx)
                .map_err(|e| RuntimeError::manager(slot.manager.name(), e))?;
            inputs.extend(collected);
        }
        Ok(inputs)
    }

    fn generate_action(&mut self) -> Result<Vec<f32>, RuntimeError> {
        let Self {
            sim,
            managers,
            params,
            services,
            actions,
            ..
        } = self;
        let model = sim.model_info().ok_or(RuntimeError::NoSceneLoaded)?;
        let data = sim.data().ok_or(RuntimeError::NoSceneLoaded)?;
        let ctx = CollectContext::new(model, data, params, services, actions);
        let slot = &mut managers.action;
        slot.manager
            .generate_action(&ctx)
            .map_err(|e| RuntimeError::manager(slot.manager.name(), e))
    }

    /// Copies `action` into the actuator command vector and zeroes the rest.
    fn apply_action(&mut self, action: &[f32]) {
        if let Some((_, data)) = self.sim.split_mut() {
            let n = action.len().min(data.ctrl.len());
            for (ctrl, value) in data.ctrl.iter_mut().zip(&action[..n]) {
                *ctrl = f64::from(*value);
            }
            data.ctrl[n..].fill(0.0);
        }
    }

    fn step_physics(&mut self) -> Result<(), RuntimeError> {
        for substep in 0..self.decimation {
            self.dispatch_sim(Capabilities::BEFORE_STEP, substep, |m, ctx| m.before_step(ctx))?;
            self.sim.step()?;
            self.dispatch_sim(Capabilities::AFTER_STEP, substep, |m, ctx| m.after_step(ctx))?;
        }
        Ok(())
    }

    fn capture(&self) -> Option<WorldSnapshot> {
        Some(snapshot::capture(self.sim.model_info()?, self.sim.data()?))
    }

    fn release_policy(&mut self) {
        if let Some(mut policy) = self.policy.take() {
            policy.release();
        }
        self.descriptor = None;
    }

    /// Swaps the action manager for the one `meta` calls for, when the
    /// runtime picks action managers itself.
    fn select_action_manager(&mut self) -> Result<(), RuntimeError> {
        if !self.auto_action {
            return Ok(());
        }
        let wants_joint_control = needs_model_joint_control(self.asset_meta.as_ref());
        let current = self.managers.action.manager.as_any();
        let matches = if wants_joint_control {
            current.is::<ModelJointControl>()
        } else {
            current.is::<PassiveAction>()
        };
        if matches {
            return Ok(());
        }
        let next = default_action_manager(self.asset_meta.as_ref());
        self.replace_action_manager(next)
    }

    fn replace_action_manager(&mut self, next: Box<dyn Manager>) -> Result<(), RuntimeError> {
        let mut slot = ManagerSlot::new(next);
        let Self {
            managers,
            params,
            services,
            actions,
            ..
        } = self;
        let mut link = RuntimeLink {
            params: &mut *params,
            services: &mut *services,
            actions: &mut *actions,
        };
        attach(&mut slot, &mut link)?;

        let mut previous = std::mem::replace(&mut managers.action, slot);
        if previous.has(Capabilities::DISPOSE) {
            previous.manager.dispose(&mut link);
        }
        log::info!(
            "[Runtime] Action manager {} replaced by {}",
            previous.manager.name(),
            managers.action.manager.name()
        );
        Ok(())
    }

    /// Loads a staged scene. On failure nothing is left loaded.
    fn install_scene(
        &mut self,
        path: &std::path::Path,
        meta: Option<AssetMetadata>,
    ) -> Result<(), RuntimeError> {
        if self.policy.is_some() || self.descriptor.is_some() {
            self.release_policy();
            self.dispatch_link(Capabilities::POLICY_CLEARED, |m, link| m.on_policy_cleared(link))?;
        }
        self.asset_meta = meta;
        let info = self.sim.load(path)?;
        self.decimation = decimation(self.control_dt, info.timestep);

        if let Some(renderer) = self.renderer.as_mut() {
            renderer.apply_camera_override(&CameraOverride::defaults());
            if let Some(meta) = self.asset_meta.as_ref() {
                let camera = camera_from_metadata(meta);
                if !camera.is_empty() {
                    renderer.apply_camera_override(&camera);
                }
            }
        }

        self.select_action_manager()?;
        self.dispatch_sim(Capabilities::SCENE_LOADED, 0, |m, ctx| m.on_scene_loaded(ctx))?;
        Ok(())
    }

    fn install_policy(
        &mut self,
        descriptor: PolicyDescriptor,
        mut module: PolicyModule,
    ) -> Result<(), RuntimeError> {
        self.release_policy();
        self.dispatch_sim(Capabilities::POLICY_LOADED, 0, |m, ctx| {
            m.on_policy_loaded(&descriptor, ctx)
        })?;
        self.sim.reset()?;
        module.reset_inputs();
        self.policy = Some(module);
        self.descriptor = Some(descriptor);
        Ok(())
    }

    /// Runs one control tick. Skipped while paused or without a scene.
    async fn tick(&mut self, shared: &Shared) -> Result<(), RuntimeError> {
        if self.params.paused || !self.state.has_scene() || !self.sim.is_loaded() {
            return Ok(());
        }

        let inputs = self.collect()?;
        let mut inference_time = None;
        if self.managers.action.has(Capabilities::GENERATE_ACTION) {
            let action = self.generate_action()?;
            self.apply_action(&action);
        } else if let Some(policy) = self.policy.as_mut() {
            let started = Instant::now();
            policy.merge_inputs(inputs);
            shared.inferencing.store(true, Ordering::SeqCst);
            let result = policy.run().await;
            shared.inferencing.store(false, Ordering::SeqCst);
            let output = result?;
            inference_time = Some(started.elapsed());

            self.dispatch_link(Capabilities::POLICY_OUTPUT, |m, link| {
                m.on_policy_output(&output, link)
            })?;
        }

        let started = Instant::now();
        self.step_physics()?;
        let step_time = started.elapsed();

        let started = Instant::now();
        if let Some(world) = self.capture() {
            shared.publish(world);
        }
        let snapshot_time = started.elapsed();

        let mut stats = shared.stats();
        stats.ticks += 1;
        stats.sim_steps += self.decimation as u64;
        if let Some(elapsed) = inference_time {
            stats.inferences += 1;
            stats.last_inference = elapsed;
        }
        stats.last_step = step_time;
        stats.last_snapshot = snapshot_time;
        Ok(())
    }
}

fn attach(slot: &mut ManagerSlot, link: &mut RuntimeLink<'_>) -> Result<(), RuntimeError> {
    slot.manager
        .attach_runtime(link)
        .map_err(|e| RuntimeError::manager(slot.manager.name(), e))?;
    if slot.has(Capabilities::INIT) {
        slot.manager
            .on_init()
            .map_err(|e| RuntimeError::manager(slot.manager.name(), e))?;
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────
// Shared state and the loop task
// ─────────────────────────────────────────────────────────────────────

struct Shared {
    core: AsyncMutex<RuntimeCore>,
    running: AtomicBool,
    inferencing: AtomicBool,
    snapshot: RwLock<Arc<WorldSnapshot>>,
    stats: Mutex<LoopStats>,
    loop_error: Mutex<Option<RuntimeError>>,
}

impl Shared {
    fn publish(&self, world: WorldSnapshot) {
        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(world);
    }

    fn stats(&self) -> MutexGuard<'_, LoopStats> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record_error(&self, error: RuntimeError) {
        *self.loop_error.lock().unwrap_or_else(PoisonError::into_inner) = Some(error);
    }
}

async fn run_loop(shared: Arc<Shared>) {
    log::info!("[Runtime] Simulation loop started");

    while shared.running.load(Ordering::Acquire) {
        let tick_start = Instant::now();
        let period = {
            let mut core = shared.core.lock().await;
            if !shared.running.load(Ordering::Acquire) {
                break;
            }
            match core.tick(&shared).await {
                Ok(()) => {}
                Err(e @ RuntimeError::Manager { .. }) => {
                    log::error!("[Runtime] Tick aborted: {e}");
                    shared.record_error(e);
                }
                Err(e) => {
                    log::error!("[Runtime] Stopping simulation loop: {e}");
                    shared.running.store(false, Ordering::Release);
                    shared.record_error(e);
                    break;
                }
            }
            core.period()
        };

        let delay = pacing_delay(period, tick_start.elapsed());
        if delay.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(delay).await;
        }
    }

    log::info!("[Runtime] Simulation loop stopped");
}

// ─────────────────────────────────────────────────────────────────────
// Public runtime
// ─────────────────────────────────────────────────────────────────────

/// Orchestrates scene and policy loading and owns the step loop.
///
/// Every method takes `&self`, so the runtime can be shared behind an
/// [`Arc`]. The simulation itself has a single owner: the loop task and
/// every external call take turns on one lock, so changes made here are
/// observed at the next tick boundary and never mid-tick.
pub struct SimulationRuntime {
    shared: Arc<Shared>,
    fetcher: Arc<dyn AssetFetcher>,
    inference: Arc<dyn InferenceBackend>,
    stager: SceneStager,
    config: RuntimeConfig,
    scene_gate: AsyncMutex<()>,
    policy_gate: AsyncMutex<()>,
    loop_task: Mutex<Option<JoinHandle<()>>>,
}

impl SimulationRuntime {
    /// Starts assembling a runtime.
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::default()
    }

    /// Tunables the runtime was built with.
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Stops the loop, loads a scene and optionally a policy, then restarts
    /// the loop.
    ///
    /// Concurrent calls are served one after another.
    pub async fn load_environment(&self, paths: &EnvironmentPaths) -> Result<(), RuntimeError> {
        let _scene = self.scene_gate.lock().await;
        self.stop().await?;
        self.load_scene_locked(&paths.scene, paths.meta.as_deref()).await?;

        let policy_guard = self.policy_gate.lock().await;
        match paths.policy.as_deref() {
            Some(policy) => self.load_policy_locked(policy).await?,
            None => self.clear_policy_locked().await?,
        }
        drop(policy_guard);

        self.start()?;
        log::info!("[Runtime] Environment ready: {}", paths.scene);
        Ok(())
    }

    /// Stages and loads a scene, replacing the current one. A loaded policy is
    /// released and managers see `on_policy_cleared` before the new scene.
    /// Follow with [`Self::load_policy`] if the scene needs one.
    pub async fn load_scene(&self, scene: &str, meta: Option<&str>) -> Result<(), RuntimeError> {
        let _scene = self.scene_gate.lock().await;
        self.load_scene_locked(scene, meta).await
    }

    async fn load_scene_locked(&self, scene: &str, meta: Option<&str>) -> Result<(), RuntimeError> {
        let _policy = self.policy_gate.lock().await;
        {
            let mut core = self.shared.core.lock().await;
            core.ensure_live()?;
            core.transition(RuntimeState::LoadingScene)?;
        }

        let prepared = self.prepare_scene(scene, meta).await;
        let mut core = self.shared.core.lock().await;
        let result = prepared.and_then(|(path, meta)| core.install_scene(&path, meta));
        match result {
            Ok(()) => {
                core.transition(RuntimeState::SceneReady)?;
                if let Some(world) = core.capture() {
                    self.shared.publish(world);
                }
                log::info!(
                    "[Runtime] Scene loaded: {scene} (decimation {})",
                    core.decimation
                );
                Ok(())
            }
            Err(e) => {
                core.sim.unload();
                core.transition(RuntimeState::Idle)?;
                log::error!("[Runtime] Failed to load scene {scene}: {e}");
                Err(e)
            }
        }
    }

    async fn prepare_scene(
        &self,
        scene: &str,
        meta: Option<&str>,
    ) -> Result<(PathBuf, Option<AssetMetadata>), RuntimeError> {
        let staged = self.stager.stage_scene(scene).await?;
        let path = self.stager.working_dir().join(&staged.scene_path);
        let meta = match meta {
            Some(meta_path) => {
                let text = self.fetcher.fetch_text(meta_path).await?;
                Some(AssetMetadata::from_json(&text)?)
            }
            None => None,
        };
        Ok((path, meta))
    }

    /// Loads a policy for the current scene, replacing any loaded one.
    ///
    /// Waits for an in-flight inference to finish before the session is
    /// created. A failed load keeps the previous policy.
    pub async fn load_policy(&self, policy_path: &str) -> Result<(), RuntimeError> {
        let _policy = self.policy_gate.lock().await;
        self.load_policy_locked(policy_path).await
    }

    async fn load_policy_locked(&self, policy_path: &str) -> Result<(), RuntimeError> {
        let previous = {
            let mut core = self.shared.core.lock().await;
            core.ensure_live()?;
            let previous = core.state;
            core.transition(RuntimeState::LoadingPolicy)?;
            previous
        };

        while self.shared.inferencing.load(Ordering::SeqCst) {
            tokio::time::sleep(self.config.policy_reload_poll()).await;
        }

        let prepared = self.prepare_policy(policy_path).await;
        let mut core = self.shared.core.lock().await;
        match prepared.and_then(|(descriptor, module)| core.install_policy(descriptor, module)) {
            Ok(()) => {
                core.transition(RuntimeState::PolicyReady)?;
                log::info!("[Runtime] Policy loaded: {policy_path}");
                Ok(())
            }
            Err(e) => {
                let fallback = if core.policy.is_some() {
                    previous
                } else {
                    RuntimeState::SceneReady
                };
                core.transition(fallback)?;
                log::error!("[Runtime] Failed to load policy {policy_path}: {e}");
                Err(e)
            }
        }
    }

    async fn prepare_policy(
        &self,
        policy_path: &str,
    ) -> Result<(PolicyDescriptor, PolicyModule), RuntimeError> {
        let text = self.fetcher.fetch_text(policy_path).await?;
        let descriptor = PolicyDescriptor::from_json(&text)?;
        let module = PolicyModule::load(
            &descriptor,
            self.inference.as_ref(),
            self.fetcher.as_ref(),
            self.config.recurrent_state_size,
        )
        .await?;
        Ok((descriptor, module))
    }

    /// Releases the loaded policy and notifies managers.
    pub async fn clear_policy(&self) -> Result<(), RuntimeError> {
        let _policy = self.policy_gate.lock().await;
        self.clear_policy_locked().await
    }

    async fn clear_policy_locked(&self) -> Result<(), RuntimeError> {
        let mut core = self.shared.core.lock().await;
        core.ensure_live()?;
        if !core.state.has_scene() {
            return Err(RuntimeError::NoSceneLoaded);
        }
        core.release_policy();
        core.dispatch_link(Capabilities::POLICY_CLEARED, |m, link| m.on_policy_cleared(link))?;
        if core.state == RuntimeState::PolicyReady {
            core.transition(RuntimeState::SceneReady)?;
        }
        log::info!("[Runtime] Policy cleared");
        Ok(())
    }

    /// Starts the step loop. A no-op while it is already running.
    pub fn start(&self) -> Result<(), RuntimeError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| RuntimeError::LoopTask(e.to_string()))?;
        let mut task = self.loop_task.lock().unwrap_or_else(PoisonError::into_inner);
        if self.shared.running.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        *task = Some(runtime.spawn(run_loop(Arc::clone(&self.shared))));
        Ok(())
    }

    /// Stops the step loop and waits for the in-flight tick to finish.
    pub async fn stop(&self) -> Result<(), RuntimeError> {
        self.shared.running.store(false, Ordering::Release);
        let task = self
            .loop_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.await.map_err(|e| RuntimeError::LoopTask(e.to_string()))?;
        }
        Ok(())
    }

    /// Returns `true` while the loop task is running.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Takes the last error raised inside the loop.
    pub fn take_loop_error(&self) -> Option<RuntimeError> {
        self.shared
            .loop_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Suspends simulation work. The loop keeps ticking.
    pub async fn pause(&self) {
        self.update_params(|p| p.paused = true).await;
    }

    /// Resumes simulation work.
    pub async fn resume(&self) {
        self.update_params(|p| p.paused = false).await;
    }

    /// Mutates the parameters between two ticks.
    pub async fn update_params(&self, update: impl FnOnce(&mut RuntimeParams)) {
        let mut core = self.shared.core.lock().await;
        update(&mut core.params);
    }

    /// A copy of the current parameters.
    pub async fn params(&self) -> RuntimeParams {
        self.shared.core.lock().await.params.clone()
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> RuntimeState {
        self.shared.core.lock().await.state
    }

    /// Physics sub-steps per tick for the loaded scene.
    pub async fn decimation(&self) -> usize {
        self.shared.core.lock().await.decimation
    }

    /// Looks up a service published by a manager.
    pub async fn service<T: Send + Sync + 'static>(&self, name: &str) -> Option<Arc<T>> {
        self.shared.core.lock().await.services.get::<T>(name)
    }

    /// Runs `f` against the attached manager of type `T`.
    pub async fn with_manager<T, R>(
        &self,
        f: impl FnOnce(&mut T, &mut RuntimeLink<'_>) -> R,
    ) -> Result<R, RuntimeError>
    where
        T: Manager + 'static,
    {
        let mut core = self.shared.core.lock().await;
        let RuntimeCore {
            managers,
            params,
            services,
            actions,
            ..
        } = &mut *core;
        let manager = managers
            .iter_mut()
            .find_map(|slot| slot.manager.as_any_mut().downcast_mut::<T>())
            .ok_or(RuntimeError::ManagerNotFound(type_name::<T>()))?;
        let mut link = RuntimeLink {
            params,
            services,
            actions,
        };
        Ok(f(manager, &mut link))
    }

    /// Replaces the action manager, replaying the current scene and policy
    /// into the new one. Disables per-scene action manager selection.
    pub async fn set_action_manager(&self, manager: Box<dyn Manager>) -> Result<(), RuntimeError> {
        let mut core = self.shared.core.lock().await;
        core.ensure_live()?;
        core.auto_action = false;
        core.replace_action_manager(manager)?;
        if core.state.has_scene() {
            core.dispatch_sim(Capabilities::SCENE_LOADED, 0, |m, ctx| {
                if m.role() == ManagerRole::Action {
                    m.on_scene_loaded(ctx)
                } else {
                    Ok(())
                }
            })?;
            match core.descriptor.take() {
                Some(descriptor) => {
                    let result = core.dispatch_sim(Capabilities::POLICY_LOADED, 0, |m, ctx| {
                        if m.role() == ManagerRole::Action {
                            m.on_policy_loaded(&descriptor, ctx)
                        } else {
                            Ok(())
                        }
                    });
                    core.descriptor = Some(descriptor);
                    result?;
                }
                None => core.dispatch_link(Capabilities::POLICY_CLEARED, |m, link| {
                    if m.role() == ManagerRole::Action {
                        m.on_policy_cleared(link)
                    } else {
                        Ok(())
                    }
                })?,
            }
        }
        Ok(())
    }

    /// Loads a trajectory into the attached [`TrajectoryPlayback`].
    pub async fn load_trajectory(&self, doc: TrajectoryDocument) -> Result<(), RuntimeError> {
        self.with_manager::<TrajectoryPlayback, _>(|playback, _| playback.load(doc))
            .await?
            .map_err(|e| RuntimeError::manager("TrajectoryPlayback", e))
    }

    /// Fetches a trajectory document and loads it.
    pub async fn load_trajectory_file(&self, path: &str) -> Result<(), RuntimeError> {
        let text = self.fetcher.fetch_text(path).await?;
        let doc = TrajectoryDocument::from_json(&text)?;
        self.load_trajectory(doc).await
    }

    /// Starts trajectory playback from the first frame.
    pub async fn play_trajectory(&self) -> Result<(), RuntimeError> {
        self.with_manager::<TrajectoryPlayback, _>(|playback, _| playback.play())
            .await
    }

    /// Stops trajectory playback.
    pub async fn stop_trajectory(&self) -> Result<(), RuntimeError> {
        self.with_manager::<TrajectoryPlayback, _>(|playback, _| playback.stop())
            .await
    }

    /// Enables or disables looping of the trajectory.
    pub async fn set_trajectory_loop(&self, looping: bool) -> Result<(), RuntimeError> {
        self.with_manager::<TrajectoryPlayback, _>(|playback, _| playback.set_loop(looping))
            .await
    }

    /// Restores the initial simulation state without reloading the scene.
    ///
    /// Parameters are kept. Managers with a `reset` hook are notified.
    pub async fn reset(&self) -> Result<(), RuntimeError> {
        let mut core = self.shared.core.lock().await;
        core.ensure_live()?;
        if !core.sim.is_loaded() {
            return Err(RuntimeError::NoSceneLoaded);
        }
        core.sim.reset()?;
        if let Some(policy) = core.policy.as_mut() {
            policy.reset_inputs();
        }
        core.dispatch_link(Capabilities::RESET, |m, link| m.reset(link))?;
        if let Some(world) = core.capture() {
            self.shared.publish(world);
        }
        log::info!("[Runtime] Simulation reset");
        Ok(())
    }

    /// The last published world snapshot.
    pub fn snapshot(&self) -> Arc<WorldSnapshot> {
        Arc::clone(&self.shared.snapshot.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Loop counters and timings.
    pub fn stats(&self) -> LoopStats {
        self.shared.stats().clone()
    }

    /// Stops the loop and releases every resource, in order: policy,
    /// simulation state and model, renderer, managers, services.
    ///
    /// Safe to call more than once.
    pub async fn dispose(&self) -> Result<(), RuntimeError> {
        let _scene = self.scene_gate.lock().await;
        let _policy = self.policy_gate.lock().await;
        if let Err(e) = self.stop().await {
            log::warn!("[Runtime] Loop did not stop cleanly: {e}");
        }

        let mut core = self.shared.core.lock().await;
        if core.state == RuntimeState::Disposed {
            return Ok(());
        }
        core.release_policy();
        core.sim.unload();
        if let Some(mut renderer) = core.renderer.take() {
            renderer.release();
        }
        core.dispatch_link(Capabilities::DISPOSE, |m, link| {
            m.dispose(link);
            Ok(())
        })?;
        core.services.clear();
        core.asset_meta = None;
        core.transition(RuntimeState::Disposed)?;
        self.stager.clear();
        log::info!("[Runtime] Disposed");
        Ok(())
    }
}

impl Drop for SimulationRuntime {
    fn drop(&mut self) {
        self.shared.running.store(false, Ordering::Release);
        if let Some(task) = self
            .loop_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
    }
}
