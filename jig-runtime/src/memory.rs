//! In-process container runtime.
//!
//! Keeps containers, images and networks in memory, records every mutating
//! call, and fails on demand. Used as the runtime in tests and for running
//! the control plane without an engine.

use crate::runtime::{
    ByteStream, ContainerInfo, ContainerRuntime, ContainerSpec, EventStream, ImageInfo, collect_bytes,
};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use jig_core::{JigError, ProgressEvent, RawCounters};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

/// Runtime operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    ListContainers,
    Create,
    Start,
    Stop,
    Rename,
    Remove,
    Build,
    Load,
    Tag,
    ListImages,
    Pull,
    Stats,
    Logs,
    CreateNetwork,
}

#[derive(Debug, Clone)]
struct Container {
    id: String,
    name: String,
    spec: ContainerSpec,
    running: bool,
}

#[derive(Default)]
struct State {
    containers: Vec<Container>,
    images: BTreeSet<String>,
    networks: BTreeSet<String>,
    calls: Vec<String>,
    /// (op, target) → error message. Target `*` matches anything.
    failures: HashMap<(Op, String), String>,
    stats: HashMap<String, RawCounters>,
    logs: HashMap<String, Vec<u8>>,
    next_id: u64,
}

impl State {
    fn position(&self, container: &str) -> Option<usize> {
        self.containers
            .iter()
            .position(|c| c.id == container || c.name == container)
    }

    fn lookup(&self, container: &str) -> Result<usize, JigError> {
        self.position(container)
            .ok_or_else(|| JigError::runtime(container, "no such container"))
    }

    fn failure(&self, op: Op, target: &str) -> Option<String> {
        self.failures
            .get(&(op, target.to_string()))
            .or_else(|| self.failures.get(&(op, "*".to_string())))
            .cloned()
    }

    fn check(&self, op: Op, target: &str, step: impl std::fmt::Display) -> Result<(), JigError> {
        match self.failure(op, target) {
            Some(message) => Err(JigError::runtime(step, message)),
            None => Ok(()),
        }
    }

    /// Container name for `container`, for matching failures by name.
    fn name_of(&self, container: &str) -> String {
        self.position(container)
            .map(|i| self.containers[i].name.clone())
            .unwrap_or_else(|| container.to_string())
    }

    /// Failures on a container match its current name or its id.
    fn check_container(
        &self,
        op: Op,
        container: &str,
        step: impl std::fmt::Display,
    ) -> Result<(), JigError> {
        let by_id = self
            .position(container)
            .and_then(|i| self.failure(op, &self.containers[i].id));
        match self.failure(op, &self.name_of(container)).or(by_id) {
            Some(message) => Err(JigError::runtime(step, message)),
            None => Ok(()),
        }
    }
}

#[derive(Default)]
pub struct MemoryRuntime {
    state: Arc<Mutex<State>>,
}

fn lock(state: &Mutex<State>) -> MutexGuard<'_, State> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

impl MemoryRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        lock(&self.state)
    }

    /// Make `op` fail whenever it targets `target`: a container name or id,
    /// an image reference or a network name; `*` for any target.
    pub fn fail(&self, op: Op, target: &str, message: &str) {
        self.state()
            .failures
            .insert((op, target.to_string()), message.to_string());
    }

    pub fn clear_failures(&self) {
        self.state().failures.clear();
    }

    /// Seed a container; returns its id.
    pub fn add_container(&self, spec: ContainerSpec, running: bool) -> String {
        let mut state = self.state();
        state.next_id += 1;
        let id = format!("c{:04}", state.next_id);
        state.containers.push(Container {
            id: id.clone(),
            name: spec.name.clone(),
            spec,
            running,
        });
        id
    }

    pub fn add_image(&self, reference: &str) {
        self.state().images.insert(reference.to_string());
    }

    pub fn set_stats(&self, container: &str, counters: RawCounters) {
        self.state().stats.insert(container.to_string(), counters);
    }

    pub fn set_logs(&self, container: &str, logs: &[u8]) {
        self.state().logs.insert(container.to_string(), logs.to_vec());
    }

    /// Mutating calls in order, e.g. `rename web -> web-prev`.
    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    /// Container names, sorted.
    pub fn container_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state().containers.iter().map(|c| c.name.clone()).collect();
        names.sort();
        names
    }

    /// Id of the container named `name`.
    pub fn container_id(&self, name: &str) -> Option<String> {
        let state = self.state();
        state
            .containers
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.id.clone())
    }

    /// Creation spec of the container named `name`.
    pub fn container_spec(&self, name: &str) -> Option<ContainerSpec> {
        let state = self.state();
        state
            .containers
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.spec.clone())
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.state()
            .containers
            .iter()
            .any(|c| c.name == name && c.running)
    }

    pub fn images(&self) -> Vec<String> {
        self.state().images.iter().cloned().collect()
    }

    pub fn networks(&self) -> Vec<String> {
        self.state().networks.iter().cloned().collect()
    }

    fn info(c: &Container) -> ContainerInfo {
        ContainerInfo {
            id: c.id.clone(),
            names: vec![c.name.clone()],
            image: c.spec.image.clone(),
            labels: c.spec.labels.clone().into_iter().collect(),
            state: if c.running { "running" } else { "exited" }.to_string(),
            status: if c.running { "Up" } else { "Exited (0)" }.to_string(),
        }
    }
}

fn matches_label(labels: &std::collections::BTreeMap<String, String>, filter: &str) -> bool {
    match filter.split_once('=') {
        Some((key, value)) => labels.get(key).is_some_and(|v| v == value),
        None => labels.contains_key(filter),
    }
}

#[async_trait]
impl ContainerRuntime for MemoryRuntime {
    async fn list_containers(
        &self,
        label_filter: Option<&str>,
        all: bool,
    ) -> Result<Vec<ContainerInfo>, JigError> {
        tokio::task::yield_now().await;
        let state = self.state();
        state.check(Op::ListContainers, "*", "list containers")?;
        Ok(state
            .containers
            .iter()
            .filter(|c| all || c.running)
            .filter(|c| label_filter.is_none_or(|f| matches_label(&c.spec.labels, f)))
            .map(Self::info)
            .collect())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, JigError> {
        tokio::task::yield_now().await;
        let mut state = self.state();
        let step = format!("create {}", spec.name);
        state.check(Op::Create, &spec.name, &step)?;
        if state.position(&spec.name).is_some() {
            return Err(JigError::runtime(step, "name already in use"));
        }
        if !state.images.contains(&spec.image) {
            return Err(JigError::runtime(step, format!("no such image: {}", spec.image)));
        }
        state.next_id += 1;
        let id = format!("c{:04}", state.next_id);
        state.containers.push(Container {
            id: id.clone(),
            name: spec.name.clone(),
            spec: spec.clone(),
            running: false,
        });
        state.calls.push(step);
        Ok(id)
    }

    async fn start_container(&self, container: &str) -> Result<(), JigError> {
        tokio::task::yield_now().await;
        let mut state = self.state();
        let name = state.name_of(container);
        let step = format!("start {name}");
        state.check_container(Op::Start, container, &step)?;
        let i = state.lookup(container)?;
        state.containers[i].running = true;
        state.calls.push(step);
        Ok(())
    }

    async fn stop_container(&self, container: &str) -> Result<(), JigError> {
        tokio::task::yield_now().await;
        let mut state = self.state();
        let name = state.name_of(container);
        let step = format!("stop {name}");
        state.check_container(Op::Stop, container, &step)?;
        let i = state.lookup(container)?;
        state.containers[i].running = false;
        state.calls.push(step);
        Ok(())
    }

    async fn rename_container(&self, container: &str, new_name: &str) -> Result<(), JigError> {
        tokio::task::yield_now().await;
        let mut state = self.state();
        let name = state.name_of(container);
        let step = format!("rename {name} -> {new_name}");
        state.check_container(Op::Rename, container, &step)?;
        let i = state.lookup(container)?;
        if state.position(new_name).is_some() {
            return Err(JigError::runtime(step, "name already in use"));
        }
        state.containers[i].name = new_name.to_string();
        state.calls.push(step);
        Ok(())
    }

    async fn remove_container(&self, container: &str) -> Result<(), JigError> {
        tokio::task::yield_now().await;
        let mut state = self.state();
        let name = state.name_of(container);
        let step = format!("remove {name}");
        state.check_container(Op::Remove, container, &step)?;
        let i = state.lookup(container)?;
        state.containers.remove(i);
        state.calls.push(step);
        Ok(())
    }

    fn build_image(&self, context: ByteStream, tag: &str) -> EventStream {
        self.state().calls.push(format!("build {tag}"));
        let shared = Arc::clone(&self.state);
        let tag = tag.to_string();

        stream::once(async move {
            let context = match collect_bytes(context).await {
                Ok(context) => context,
                Err(e) => return vec![Err(e)],
            };
            let mut state = lock(&shared);
            let mut events = vec![Ok(ProgressEvent::message(format!(
                "Step 1/1 : context of {} bytes\n",
                context.len()
            )))];
            match state.failure(Op::Build, &tag) {
                Some(message) => events.push(Ok(ProgressEvent::error(message))),
                None => {
                    state.images.insert(tag.clone());
                    events.push(Ok(ProgressEvent::message(format!("Successfully tagged {tag}\n"))));
                }
            }
            events
        })
        .flat_map(stream::iter)
        .boxed()
    }

    /// The archive is read as one image reference per line.
    async fn load_image(&self, archive: ByteStream) -> Result<String, JigError> {
        let archive = collect_bytes(archive).await?;
        let mut state = self.state();
        state.check(Op::Load, "*", "load image")?;
        let text = String::from_utf8_lossy(&archive);
        let references: Vec<&str> = text.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
        if references.is_empty() {
            return Err(JigError::runtime("load image", "archive contained no image"));
        }
        let mut report = Vec::with_capacity(references.len());
        for reference in references {
            state.images.insert(reference.to_string());
            report.push(format!("Loaded image: {reference}"));
        }
        state.calls.push("load image".to_string());
        Ok(report.join("\n"))
    }

    async fn tag_image(&self, source: &str, target: &str) -> Result<(), JigError> {
        tokio::task::yield_now().await;
        let mut state = self.state();
        let step = format!("tag {source} -> {target}");
        state.check(Op::Tag, source, &step)?;
        if !state.images.contains(source) {
            return Err(JigError::runtime(step, "no such image"));
        }
        state.images.insert(target.to_string());
        state.calls.push(step);
        Ok(())
    }

    async fn list_images(&self) -> Result<Vec<ImageInfo>, JigError> {
        tokio::task::yield_now().await;
        let state = self.state();
        state.check(Op::ListImages, "*", "list images")?;
        Ok(state
            .images
            .iter()
            .map(|tag| ImageInfo {
                id: format!("sha256:{tag}"),
                tags: vec![tag.clone()],
            })
            .collect())
    }

    async fn pull_image(&self, reference: &str) -> Result<(), JigError> {
        tokio::task::yield_now().await;
        let mut state = self.state();
        let step = format!("pull {reference}");
        state.check(Op::Pull, reference, &step)?;
        state.images.insert(reference.to_string());
        state.calls.push(step);
        Ok(())
    }

    async fn stats_one_shot(&self, container: &str) -> Result<RawCounters, JigError> {
        tokio::task::yield_now().await;
        let state = self.state();
        let name = state.name_of(container);
        state.check_container(Op::Stats, container, format!("stats {name}"))?;
        state.lookup(container)?;
        Ok(state.stats.get(&name).copied().unwrap_or_default())
    }

    async fn container_logs(&self, container: &str) -> Result<Vec<u8>, JigError> {
        tokio::task::yield_now().await;
        let state = self.state();
        let name = state.name_of(container);
        state.check_container(Op::Logs, container, format!("logs {name}"))?;
        state.lookup(container)?;
        Ok(state.logs.get(&name).cloned().unwrap_or_default())
    }

    async fn network_exists(&self, name: &str) -> Result<bool, JigError> {
        Ok(self.state().networks.contains(name))
    }

    async fn create_network(&self, name: &str) -> Result<(), JigError> {
        let mut state = self.state();
        let step = format!("create network {name}");
        state.check(Op::CreateNetwork, name, &step)?;
        if !state.networks.insert(name.to_string()) {
            return Err(JigError::runtime(step, "network already exists"));
        }
        state.calls.push(step);
        Ok(())
    }
}
