use crate::runtime::{
    ByteStream, ContainerInfo, ContainerRuntime, ContainerSpec, EventStream, ImageInfo,
    collect_bytes, receiver_stream,
};
use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, LogsOptions, MemoryStatsStats,
    NetworkingConfig, RemoveContainerOptions, RenameContainerOptions, StartContainerOptions,
    StatsOptions, StopContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::image::{
    BuildImageOptions, CreateImageOptions, ImportImageOptions, ListImagesOptions, TagImageOptions,
};
use bollard::network::{CreateNetworkOptions, InspectNetworkOptions};
use bollard::service::{
    BuildInfo, EndpointSettings, HostConfig, Mount, MountTypeEnum, PortBinding,
    RestartPolicy as DockerRestartPolicy, RestartPolicyNameEnum,
};
use futures::StreamExt;
use jig_core::spec::{RestartMode, RestartPolicy};
use jig_core::{JigError, ProgressEvent, RawCounters};
use std::collections::HashMap;
use std::fmt::Display;
use std::pin::pin;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Docker Engine API client.
#[derive(Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect through the platform default socket (or `DOCKER_HOST`).
    pub fn connect() -> Result<Self, JigError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| JigError::runtime("connect to docker", e))?;
        Ok(Self { docker })
    }

    pub fn from_client(docker: Docker) -> Self {
        Self { docker }
    }

    /// Ping the daemon.
    pub async fn ping(&self) -> Result<(), JigError> {
        self.docker
            .ping()
            .await
            .map_err(|e| JigError::runtime("ping docker", e))?;
        Ok(())
    }
}

fn fail(step: impl Display) -> impl FnOnce(DockerError) -> JigError {
    move |e| JigError::runtime(step, e)
}

fn status_of(err: &DockerError) -> Option<u16> {
    match err {
        DockerError::DockerResponseServerError { status_code, .. } => Some(*status_code),
        _ => None,
    }
}

/// 304 Not Modified: the container was already in the requested state.
fn not_modified_is_ok(result: Result<(), DockerError>) -> Result<(), DockerError> {
    match result {
        Err(e) if status_of(&e) == Some(304) => Ok(()),
        other => other,
    }
}

fn restart_policy(policy: &RestartPolicy) -> DockerRestartPolicy {
    let name = match policy.mode {
        RestartMode::Unset => RestartPolicyNameEnum::EMPTY,
        RestartMode::No => RestartPolicyNameEnum::NO,
        RestartMode::Always => RestartPolicyNameEnum::ALWAYS,
        RestartMode::UnlessStopped => RestartPolicyNameEnum::UNLESS_STOPPED,
        RestartMode::OnFailure => RestartPolicyNameEnum::ON_FAILURE,
    };
    DockerRestartPolicy {
        name: Some(name),
        maximum_retry_count: policy.max_retries,
    }
}

fn progress_of(info: BuildInfo) -> ProgressEvent {
    let error = info
        .error
        .or_else(|| info.error_detail.and_then(|d| d.message));
    ProgressEvent {
        stream: info.stream,
        status: info.status,
        error,
    }
}

/// Split `repo:tag`; a colon inside a registry host is not a tag separator.
fn split_reference(reference: &str) -> (&str, &str) {
    match reference.rsplit_once(':') {
        Some((repo, tag)) if !tag.contains('/') => (repo, tag),
        _ => (reference, "latest"),
    }
}

fn container_config(spec: &ContainerSpec) -> Config<String> {
    let exposed_ports: HashMap<String, HashMap<(), ()>> = spec
        .exposed_ports
        .iter()
        .map(|p| (p.clone(), HashMap::new()))
        .collect();

    let port_bindings: HashMap<String, Option<Vec<PortBinding>>> = spec
        .port_bindings
        .iter()
        .map(|p| {
            (
                p.container_port.clone(),
                Some(vec![PortBinding {
                    host_ip: None,
                    host_port: Some(p.host_port.clone()),
                }]),
            )
        })
        .collect();

    let mounts: Vec<Mount> = spec
        .mounts
        .iter()
        .map(|m| Mount {
            source: Some(m.source.clone()),
            target: Some(m.target.clone()),
            typ: Some(MountTypeEnum::BIND),
            read_only: Some(m.read_only),
            ..Default::default()
        })
        .collect();

    let host_config = HostConfig {
        restart_policy: Some(restart_policy(&spec.restart_policy)),
        mounts: (!mounts.is_empty()).then_some(mounts),
        port_bindings: (!port_bindings.is_empty()).then_some(port_bindings),
        network_mode: spec.network.as_ref().map(|n| n.network.clone()),
        ..Default::default()
    };

    let networking_config = spec.network.as_ref().map(|n| NetworkingConfig {
        endpoints_config: HashMap::from([(
            n.network.clone(),
            EndpointSettings {
                aliases: Some(n.aliases.clone()),
                ..Default::default()
            },
        )]),
    });

    Config {
        image: Some(spec.image.clone()),
        env: Some(spec.env.clone()),
        cmd: (!spec.cmd.is_empty()).then(|| spec.cmd.clone()),
        labels: Some(spec.labels.clone().into_iter().collect()),
        exposed_ports: (!exposed_ports.is_empty()).then_some(exposed_ports),
        host_config: Some(host_config),
        networking_config,
        ..Default::default()
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn list_containers(
        &self,
        label_filter: Option<&str>,
        all: bool,
    ) -> Result<Vec<ContainerInfo>, JigError> {
        let mut filters = HashMap::new();
        if let Some(label) = label_filter {
            filters.insert("label".to_string(), vec![label.to_string()]);
        }
        let options = ListContainersOptions::<String> {
            all,
            filters,
            ..Default::default()
        };
        let summaries = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(fail("list containers"))?;

        Ok(summaries
            .into_iter()
            .map(|c| ContainerInfo {
                id: c.id.unwrap_or_default(),
                names: c
                    .names
                    .unwrap_or_default()
                    .into_iter()
                    .map(|n| n.trim_start_matches('/').to_string())
                    .collect(),
                image: c.image.unwrap_or_default(),
                labels: c.labels.unwrap_or_default(),
                state: c.state.unwrap_or_default(),
                status: c.status.unwrap_or_default(),
            })
            .collect())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, JigError> {
        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };
        let created = self
            .docker
            .create_container(Some(options), container_config(spec))
            .await
            .map_err(fail(format!("create {}", spec.name)))?;
        for warning in &created.warnings {
            tracing::warn!(container = %spec.name, %warning, "docker create warning");
        }
        Ok(created.id)
    }

    async fn start_container(&self, container: &str) -> Result<(), JigError> {
        not_modified_is_ok(
            self.docker
                .start_container(container, None::<StartContainerOptions<String>>)
                .await,
        )
        .map_err(fail(format!("start {container}")))
    }

    async fn stop_container(&self, container: &str) -> Result<(), JigError> {
        not_modified_is_ok(
            self.docker
                .stop_container(container, None::<StopContainerOptions>)
                .await,
        )
        .map_err(fail(format!("stop {container}")))
    }

    async fn rename_container(&self, container: &str, new_name: &str) -> Result<(), JigError> {
        let options = RenameContainerOptions {
            name: new_name.to_string(),
        };
        self.docker
            .rename_container(container, options)
            .await
            .map_err(fail(format!("rename {container} -> {new_name}")))
    }

    async fn remove_container(&self, container: &str) -> Result<(), JigError> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        self.docker
            .remove_container(container, Some(options))
            .await
            .map_err(fail(format!("remove {container}")))
    }

    /// The engine API of this client takes the build context in one piece, so
    /// it is buffered before the build starts.
    fn build_image(&self, context: ByteStream, tag: &str) -> EventStream {
        let docker = self.docker.clone();
        let options = BuildImageOptions {
            t: tag.to_string(),
            rm: true,
            forcerm: true,
            ..Default::default()
        };
        let (tx, rx) = mpsc::channel(64);

        tokio::spawn(async move {
            let context = match collect_bytes(context).await {
                Ok(context) => context,
                Err(e) => {
                    let _ = tx.send(Err(e)).await;
                    return;
                }
            };
            let mut build = pin!(docker.build_image(options, None, Some(context)));
            while let Some(item) = build.next().await {
                let item = item
                    .map(progress_of)
                    .map_err(|e| JigError::Build(e.to_string()));
                let stop = match &item {
                    Ok(event) => event.is_error(),
                    Err(_) => true,
                };
                if tx.send(item).await.is_err() || stop {
                    break;
                }
            }
        });

        receiver_stream(rx)
    }

    /// The archive is piped to the engine as it arrives.
    async fn load_image(&self, archive: ByteStream) -> Result<String, JigError> {
        // An upload error ends the piped body; it outranks whatever the
        // engine reports about the truncated archive.
        let upload_error: Arc<Mutex<Option<JigError>>> = Arc::default();
        let slot = Arc::clone(&upload_error);
        let body = archive.scan((), move |_, chunk| {
            futures::future::ready(match chunk {
                Ok(bytes) => Some(bytes),
                Err(e) => {
                    if let Ok(mut slot) = slot.lock() {
                        *slot = Some(e);
                    }
                    None
                }
            })
        });
        let take_upload_error = || upload_error.lock().ok().and_then(|mut e| e.take());

        let mut report = String::new();
        let mut load = pin!(self.docker.import_image_stream(
            ImportImageOptions { quiet: false },
            body,
            None
        ));
        while let Some(item) = load.next().await {
            let event = match item {
                Ok(info) => progress_of(info),
                Err(e) => return Err(take_upload_error().unwrap_or_else(|| fail("load image")(e))),
            };
            if let Some(error) = event.error {
                return Err(take_upload_error()
                    .unwrap_or_else(|| JigError::runtime("load image", error)));
            }
            if let Some(line) = event.stream.or(event.status) {
                report.push_str(&line);
            }
        }
        if let Some(e) = take_upload_error() {
            return Err(e);
        }
        if !report.contains("Loaded image") {
            return Err(JigError::runtime("load image", "archive contained no image"));
        }
        Ok(report.trim().to_string())
    }

    async fn tag_image(&self, source: &str, target: &str) -> Result<(), JigError> {
        let (repo, tag) = split_reference(target);
        let options = TagImageOptions {
            repo: repo.to_string(),
            tag: tag.to_string(),
        };
        self.docker
            .tag_image(source, Some(options))
            .await
            .map_err(fail(format!("tag {source} -> {target}")))
    }

    async fn list_images(&self) -> Result<Vec<ImageInfo>, JigError> {
        let images = self
            .docker
            .list_images(Some(ListImagesOptions::<String>::default()))
            .await
            .map_err(fail("list images"))?;
        Ok(images
            .into_iter()
            .map(|i| ImageInfo {
                id: i.id,
                tags: i.repo_tags,
            })
            .collect())
    }

    async fn pull_image(&self, reference: &str) -> Result<(), JigError> {
        let options = CreateImageOptions {
            from_image: reference.to_string(),
            ..Default::default()
        };
        let mut pull = pin!(self.docker.create_image(Some(options), None, None));
        while let Some(item) = pull.next().await {
            let info = item.map_err(fail(format!("pull {reference}")))?;
            if let Some(error) = info.error {
                return Err(JigError::runtime(format!("pull {reference}"), error));
            }
            if let Some(status) = info.status {
                tracing::debug!(image = %reference, %status, "pull progress");
            }
        }
        Ok(())
    }

    async fn stats_one_shot(&self, container: &str) -> Result<RawCounters, JigError> {
        let options = StatsOptions {
            stream: false,
            one_shot: true,
        };
        let mut stream = pin!(self.docker.stats(container, Some(options)));
        let stats = stream
            .next()
            .await
            .ok_or_else(|| JigError::runtime(format!("stats {container}"), "empty response"))?
            .map_err(fail(format!("stats {container}")))?;

        let memory_cache = match stats.memory_stats.stats {
            Some(MemoryStatsStats::V1(v1)) => v1.cache,
            Some(MemoryStatsStats::V2(v2)) => v2.inactive_file,
            None => 0,
        };

        Ok(RawCounters {
            cpu_total: stats.cpu_stats.cpu_usage.total_usage,
            precpu_total: stats.precpu_stats.cpu_usage.total_usage,
            system_cpu: stats.cpu_stats.system_cpu_usage.unwrap_or(0),
            precpu_system: stats.precpu_stats.system_cpu_usage.unwrap_or(0),
            online_cpus: stats.cpu_stats.online_cpus.unwrap_or(0),
            memory_usage: stats.memory_stats.usage.unwrap_or(0),
            memory_cache,
            memory_limit: stats.memory_stats.limit.unwrap_or(0),
        })
    }

    async fn container_logs(&self, container: &str) -> Result<Vec<u8>, JigError> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            ..Default::default()
        };
        let mut out = Vec::new();
        let mut logs = pin!(self.docker.logs(container, Some(options)));
        while let Some(chunk) = logs.next().await {
            let chunk = chunk.map_err(fail(format!("logs {container}")))?;
            out.extend_from_slice(&chunk.into_bytes());
        }
        Ok(out)
    }

    async fn network_exists(&self, name: &str) -> Result<bool, JigError> {
        match self
            .docker
            .inspect_network(name, None::<InspectNetworkOptions<String>>)
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if status_of(&e) == Some(404) => Ok(false),
            Err(e) => Err(JigError::runtime(format!("inspect network {name}"), e)),
        }
    }

    async fn create_network(&self, name: &str) -> Result<(), JigError> {
        let options = CreateNetworkOptions {
            name: name.to_string(),
            driver: "bridge".to_string(),
            check_duplicate: true,
            ..Default::default()
        };
        self.docker
            .create_network(options)
            .await
            .map_err(fail(format!("create network {name}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{NetworkAttachment, PortMapping};
    use jig_core::spec::VolumeBind;

    #[test]
    fn restart_modes_map_one_to_one() {
        let cases = [
            (RestartMode::Unset, RestartPolicyNameEnum::EMPTY),
            (RestartMode::No, RestartPolicyNameEnum::NO),
            (RestartMode::Always, RestartPolicyNameEnum::ALWAYS),
            (RestartMode::UnlessStopped, RestartPolicyNameEnum::UNLESS_STOPPED),
            (RestartMode::OnFailure, RestartPolicyNameEnum::ON_FAILURE),
        ];
        for (mode, expected) in cases {
            let p = restart_policy(&RestartPolicy {
                mode,
                max_retries: Some(3),
            });
            assert_eq!(p.name, Some(expected));
            assert_eq!(p.maximum_retry_count, Some(3));
        }
    }

    #[test]
    fn reference_splitting() {
        assert_eq!(split_reference("web:prev"), ("web", "prev"));
        assert_eq!(split_reference("web"), ("web", "latest"));
        assert_eq!(
            split_reference("registry:5000/web"),
            ("registry:5000/web", "latest")
        );
        assert_eq!(
            split_reference("registry:5000/web:v2"),
            ("registry:5000/web", "v2")
        );
    }

    #[test]
    fn build_error_detail_is_surfaced() {
        let info = BuildInfo {
            error_detail: Some(bollard::service::ErrorDetail {
                code: None,
                message: Some("COPY failed".into()),
            }),
            ..Default::default()
        };
        assert_eq!(progress_of(info).error.as_deref(), Some("COPY failed"));
    }

    #[test]
    fn container_config_carries_spec() {
        let spec = ContainerSpec {
            name: "web".into(),
            image: "web:latest".into(),
            env: vec!["A=1".into()],
            exposed_ports: vec!["8080/tcp".into()],
            port_bindings: vec![PortMapping {
                container_port: "80/tcp".into(),
                host_port: "80".into(),
            }],
            mounts: vec![VolumeBind {
                source: "/data".into(),
                target: "/srv".into(),
                read_only: true,
            }],
            network: Some(NetworkAttachment {
                network: "jig".into(),
                aliases: vec!["api".into()],
            }),
            ..Default::default()
        };
        let config = container_config(&spec);
        assert_eq!(config.image.as_deref(), Some("web:latest"));
        assert!(config.exposed_ports.unwrap().contains_key("8080/tcp"));
        let host = config.host_config.unwrap();
        assert_eq!(host.network_mode.as_deref(), Some("jig"));
        let mount = &host.mounts.unwrap()[0];
        assert_eq!(mount.read_only, Some(true));
        assert_eq!(mount.typ, Some(MountTypeEnum::BIND));
        let endpoints = config.networking_config.unwrap().endpoints_config;
        assert_eq!(endpoints["jig"].aliases, Some(vec!["api".to_string()]));
    }
}
