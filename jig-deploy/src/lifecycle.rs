//! Deploy, rollback and delete sequences.
//!
//! A service `N` is represented by at most one container per name:
//!
//! * `N`      the active deployment,
//! * `N-prev` the stopped rollback target,
//! * `N-old`  the active container while a rollback is in flight.
//!
//! Every sequence for `N` runs under the per-name lock. Every fallible
//! runtime step aborts the sequence with an error naming the step; the only
//! compensation is the documented rollback recovery.

use crate::locks::NameLocks;
use futures::StreamExt;
use futures::future::try_join_all;
use jig_core::labels::{self, CONFIG_LABEL, NAME_LABEL, NETWORK};
use jig_core::spec::{latest_image, previous_image, rollback_name, transient_name};
use jig_core::{
    Deployment, DeploymentSpec, JigError, ProgressEvent, RoutingLabels, SecretLookup, Stats,
    aggregate, resolve_env, synthesize,
};
use jig_runtime::{ByteStream, ContainerInfo, ContainerRuntime, ContainerSpec, NetworkAttachment};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Where the image for a deployment comes from. Both variants are read
/// once, as they arrive.
pub enum ImagePayload {
    /// Image archive as produced by `docker save`.
    Archive(ByteStream),
    /// Tar build context with a Dockerfile.
    BuildContext(ByteStream),
}

impl ImagePayload {
    pub fn is_archive(&self) -> bool {
        matches!(self, ImagePayload::Archive(_))
    }
}

/// A validated deployment with secrets resolved and labels synthesized.
/// Producing one touches no runtime state.
#[derive(Debug, Clone)]
pub struct PreparedDeployment {
    pub spec: DeploymentSpec,
    pub routing: RoutingLabels,
    pub container: ContainerSpec,
}

impl PreparedDeployment {
    pub fn name(&self) -> &str {
        &self.spec.name
    }
}

#[derive(Clone)]
pub struct Deployer {
    runtime: Arc<dyn ContainerRuntime>,
    secrets: Arc<dyn SecretLookup>,
    locks: NameLocks,
}

/// Best-effort progress: a departed client must not stop the sequence.
async fn emit(progress: &mpsc::Sender<ProgressEvent>, event: ProgressEvent) {
    let _ = progress.send(event).await;
}

async fn say(progress: &mpsc::Sender<ProgressEvent>, msg: &str) {
    emit(progress, ProgressEvent::message(msg)).await;
}

/// Service name of `container` unless it is a rollback target or a
/// rollback's transient container.
fn active_service(container: &ContainerInfo) -> Option<&str> {
    let service = container.label(NAME_LABEL)?;
    let name = container.name();
    (name != rollback_name(service) && name != transient_name(service)).then_some(service)
}

impl Deployer {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, secrets: Arc<dyn SecretLookup>) -> Self {
        Self {
            runtime,
            secrets,
            locks: NameLocks::new(),
        }
    }

    /// Validate `spec`, resolve its secrets and build the container spec.
    pub fn prepare(&self, spec: DeploymentSpec) -> Result<PreparedDeployment, JigError> {
        spec.validate()?;
        let env = resolve_env(&spec.envs, self.secrets.as_ref())?;
        let routing = synthesize(&spec);
        let mut labels = routing.labels.clone();
        labels.insert(CONFIG_LABEL.to_string(), serde_json::to_string(&spec)?);

        let container = ContainerSpec {
            name: spec.name.clone(),
            image: spec.image_reference(),
            labels,
            env,
            exposed_ports: spec.exposed_port().into_iter().collect(),
            restart_policy: spec.parsed_restart_policy()?,
            mounts: spec.parsed_volumes()?,
            network: Some(NetworkAttachment {
                network: NETWORK.to_string(),
                aliases: vec![spec.network_alias().to_string()],
            }),
            ..Default::default()
        };

        Ok(PreparedDeployment {
            spec,
            routing,
            container,
        })
    }

    /// Run the deploy sequence. Returns the new container id.
    pub async fn execute(
        &self,
        prepared: PreparedDeployment,
        payload: ImagePayload,
        progress: &mpsc::Sender<ProgressEvent>,
    ) -> Result<String, JigError> {
        let name = prepared.name().to_string();
        let _guard = self.locks.acquire(&name).await;
        tracing::info!(deployment = %name, "deploy started");

        let result = self.run_deploy(&name, &prepared, payload, progress).await;
        match &result {
            Ok(id) => tracing::info!(deployment = %name, container_id = %id, "deploy finished"),
            Err(e) => tracing::error!(deployment = %name, error = %e, "deploy failed"),
        }
        result
    }

    /// `prepare` followed by `execute`.
    pub async fn deploy(
        &self,
        spec: DeploymentSpec,
        payload: ImagePayload,
        progress: &mpsc::Sender<ProgressEvent>,
    ) -> Result<String, JigError> {
        let prepared = self.prepare(spec)?;
        self.execute(prepared, payload, progress).await
    }

    async fn run_deploy(
        &self,
        name: &str,
        prepared: &PreparedDeployment,
        payload: ImagePayload,
        progress: &mpsc::Sender<ProgressEvent>,
    ) -> Result<String, JigError> {
        let latest = latest_image(name);
        let previous_tag = previous_image(name);
        let prev = rollback_name(name);

        // 1. Keep the current image reachable for rollback, best-effort.
        match self.runtime.image_exists(&latest).await {
            Ok(true) => match self.runtime.tag_image(&latest, &previous_tag).await {
                Ok(()) => say(progress, "Image exists, tagging as prev for rollback\n").await,
                Err(e) => {
                    tracing::warn!(deployment = %name, error = %e, "could not tag previous image");
                }
            },
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(deployment = %name, error = %e, "could not list images, skipping prev tag");
            }
        }

        // 2. Materialize the new image.
        match payload {
            ImagePayload::Archive(archive) => {
                say(progress, "Loading image\n").await;
                let report = self.runtime.load_image(archive).await?;
                tracing::debug!(deployment = %name, %report, "image loaded");
                say(progress, &format!("{report}\n")).await;
            }
            ImagePayload::BuildContext(context) => {
                let mut build = self.runtime.build_image(context, &latest);
                while let Some(event) = build.next().await {
                    let event = event?;
                    if let Some(error) = event.error {
                        return Err(JigError::Build(error));
                    }
                    emit(progress, event).await;
                }
            }
        }

        // 3. Drop the old rollback target.
        if let Some(old) = self.runtime.find_container(&prev).await? {
            say(progress, "Rollback container exists, removing...\n").await;
            tracing::debug!(deployment = %name, container_id = %old.id, "removing rollback target");
            self.runtime.stop_container(&prev).await?;
            self.runtime.remove_container(&prev).await?;
        }

        // 4. The active container becomes the rollback target.
        if self.runtime.find_container(name).await?.is_some() {
            say(progress, "Current container exists, renaming...\n").await;
            self.runtime.stop_container(name).await?;
            self.runtime.rename_container(name, &prev).await?;
        }

        // 5-6. Create and start the new one.
        say(progress, "Creating container\n").await;
        let id = self.runtime.create_container(&prepared.container).await?;
        self.runtime.start_container(name).await?;
        say(progress, "\nImage built and container started").await;
        Ok(id)
    }

    /// Swap the active container with its rollback target. Returns the id of
    /// the container now active.
    pub async fn rollback(&self, name: &str) -> Result<String, JigError> {
        let _guard = self.locks.acquire(name).await;
        let prev = rollback_name(name);
        let old = transient_name(name);

        let Some(current) = self.runtime.find_container(name).await? else {
            return Err(JigError::NotFound(format!("deployment {name}")));
        };
        let Some(target) = self.runtime.find_container(&prev).await? else {
            return Err(JigError::NotFound(format!("rollback target for {name}")));
        };
        tracing::info!(deployment = %name, from = %current.id, to = %target.id, "rollback started");

        // Left behind by a rollback whose final removal failed.
        if let Some(stale) = self.runtime.find_container(&old).await? {
            tracing::warn!(deployment = %name, container_id = %stale.id, "removing stale transient container");
            self.runtime.stop_container(&stale.id).await?;
            self.runtime.remove_container(&stale.id).await?;
        }

        self.runtime.stop_container(name).await?;
        if let Err(e) = self.runtime.rename_container(name, &old).await {
            if let Err(restart) = self.runtime.start_container(name).await {
                tracing::error!(deployment = %name, error = %restart, "could not restart active container");
            }
            return Err(e);
        }

        let promoted = match self.runtime.rename_container(&prev, name).await {
            Ok(()) => self.runtime.start_container(name).await.map_err(|e| (e, true)),
            Err(e) => Err((e, false)),
        };
        if let Err((e, renamed)) = promoted {
            tracing::error!(deployment = %name, error = %e, "rollback failed, restoring");
            self.restore(name, renamed).await;
            return Err(e);
        }

        self.runtime.remove_container(&old).await?;
        tracing::info!(deployment = %name, container_id = %target.id, "rollback finished");
        Ok(target.id)
    }

    /// Put the pre-rollback container back under `name`. Failures here are
    /// logged; the caller reports the original error.
    async fn restore(&self, name: &str, promoted: bool) {
        let prev = rollback_name(name);
        let old = transient_name(name);

        if promoted {
            if let Err(e) = self.runtime.stop_container(name).await {
                tracing::warn!(deployment = %name, error = %e, "restore: stop promoted container");
            }
            if let Err(e) = self.runtime.rename_container(name, &prev).await {
                tracing::error!(deployment = %name, error = %e, "restore: demote promoted container");
                return;
            }
        }
        if let Err(e) = self.runtime.rename_container(&old, name).await {
            tracing::error!(deployment = %name, error = %e, "restore: rename back");
            return;
        }
        if let Err(e) = self.runtime.start_container(name).await {
            tracing::error!(deployment = %name, error = %e, "restore: start");
        }
    }

    /// Stop and remove every container of the service. Returns how many.
    pub async fn delete(&self, name: &str) -> Result<usize, JigError> {
        let _guard = self.locks.acquire(name).await;
        let filter = format!("{NAME_LABEL}={name}");
        let containers = self.runtime.list_containers(Some(&filter), true).await?;
        if containers.is_empty() {
            return Err(JigError::NotFound(format!("deployment {name}")));
        }
        for container in &containers {
            self.runtime.stop_container(&container.id).await?;
            self.runtime.remove_container(&container.id).await?;
        }
        tracing::info!(deployment = %name, removed = containers.len(), "deployment deleted");
        Ok(containers.len())
    }

    /// Active deployments; rollback targets only set `hasRollback` and
    /// transient containers are skipped.
    pub async fn list(&self) -> Result<Vec<Deployment>, JigError> {
        let containers = self.runtime.list_containers(Some(NAME_LABEL), true).await?;
        let names: HashSet<&str> = containers.iter().map(|c| c.name()).collect();

        Ok(containers
            .iter()
            .filter_map(|c| {
                let service = active_service(c)?;
                Some(Deployment {
                    id: c.id.clone(),
                    name: service.to_string(),
                    rule: labels::rule_from_labels(service, &c.labels),
                    status: c.state.clone(),
                    lifetime: c.status.clone(),
                    has_rollback: names.contains(rollback_name(service).as_str()),
                })
            })
            .collect())
    }

    /// One-shot resource usage of every running deployment container.
    pub async fn stats(&self) -> Result<Vec<Stats>, JigError> {
        let containers = self.runtime.list_containers(Some(NAME_LABEL), false).await?;
        let runtime = &self.runtime;
        let active = containers.iter().filter(|c| active_service(c).is_some());
        try_join_all(active.map(|c| async move {
            let raw = runtime.stats_one_shot(&c.id).await?;
            Ok::<_, JigError>(aggregate(c.name(), &raw))
        }))
        .await
    }

    /// Combined stdout and stderr of the active container.
    pub async fn logs(&self, name: &str) -> Result<Vec<u8>, JigError> {
        let Some(container) = self.runtime.find_container(name).await? else {
            return Err(JigError::NotFound(format!("deployment {name}")));
        };
        self.runtime.container_logs(&container.id).await
    }
}
