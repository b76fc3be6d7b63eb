use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::stream::{self, BoxStream, StreamExt};
use jig_core::spec::{RestartPolicy, VolumeBind};
use jig_core::{JigError, ProgressEvent, RawCounters};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::mpsc;

/// Progress of a long-running runtime operation such as an image build.
///
/// A transport failure is an `Err` item; a failure reported by the build
/// itself arrives as an event with `error` set.
pub type EventStream = BoxStream<'static, Result<ProgressEvent, JigError>>;

/// Image archive or build context as it arrives, chunk by chunk.
pub type ByteStream = BoxStream<'static, Result<Bytes, JigError>>;

/// Summary of one container as listed by the runtime.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerInfo {
    pub id: String,
    /// Names without the leading `/`.
    pub names: Vec<String>,
    pub image: String,
    pub labels: HashMap<String, String>,
    /// Machine state, e.g. `running`, `exited`, `created`.
    pub state: String,
    /// Human status, e.g. `Up 3 hours`.
    pub status: String,
}

impl ContainerInfo {
    pub fn has_name(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    pub fn name(&self) -> &str {
        self.names.first().map(String::as_str).unwrap_or_default()
    }

    pub fn is_running(&self) -> bool {
        self.state == "running"
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageInfo {
    pub id: String,
    pub tags: Vec<String>,
}

/// Host port published for a container port (`80/tcp` → `80`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortMapping {
    pub container_port: String,
    pub host_port: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkAttachment {
    pub network: String,
    pub aliases: Vec<String>,
}

/// Everything needed to create a container.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub labels: BTreeMap<String, String>,
    /// `KEY=value` pairs.
    pub env: Vec<String>,
    pub cmd: Vec<String>,
    /// `<port>/tcp` entries.
    pub exposed_ports: Vec<String>,
    pub port_bindings: Vec<PortMapping>,
    pub restart_policy: RestartPolicy,
    pub mounts: Vec<VolumeBind>,
    pub network: Option<NetworkAttachment>,
}

/// Operations the control plane needs from a container engine.
///
/// Container arguments accept either an id or a name. `label_filter` uses
/// the engine's syntax: `key` matches any value, `key=value` an exact one.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn list_containers(
        &self,
        label_filter: Option<&str>,
        all: bool,
    ) -> Result<Vec<ContainerInfo>, JigError>;

    /// Returns the new container id.
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, JigError>;

    /// Starting a running container succeeds.
    async fn start_container(&self, container: &str) -> Result<(), JigError>;

    /// Stopping a stopped container succeeds.
    async fn stop_container(&self, container: &str) -> Result<(), JigError>;

    async fn rename_container(&self, container: &str, new_name: &str) -> Result<(), JigError>;

    async fn remove_container(&self, container: &str) -> Result<(), JigError>;

    /// Build `context` (a tar archive) and tag the result.
    fn build_image(&self, context: ByteStream, tag: &str) -> EventStream;

    /// Load an image archive; returns the engine's load report. The first
    /// error in `archive` aborts the load and is returned as is.
    async fn load_image(&self, archive: ByteStream) -> Result<String, JigError>;

    async fn tag_image(&self, source: &str, target: &str) -> Result<(), JigError>;

    async fn list_images(&self) -> Result<Vec<ImageInfo>, JigError>;

    async fn pull_image(&self, reference: &str) -> Result<(), JigError>;

    async fn stats_one_shot(&self, container: &str) -> Result<RawCounters, JigError>;

    /// Combined stdout and stderr.
    async fn container_logs(&self, container: &str) -> Result<Vec<u8>, JigError>;

    async fn network_exists(&self, name: &str) -> Result<bool, JigError>;

    async fn create_network(&self, name: &str) -> Result<(), JigError>;

    /// Container currently holding `name`, running or not.
    async fn find_container(&self, name: &str) -> Result<Option<ContainerInfo>, JigError> {
        let containers = self.list_containers(None, true).await?;
        Ok(containers.into_iter().find(|c| c.has_name(name)))
    }

    async fn image_exists(&self, reference: &str) -> Result<bool, JigError> {
        let images = self.list_images().await?;
        Ok(images.iter().any(|i| i.tags.iter().any(|t| t == reference)))
    }
}

/// Read `body` to the end into one buffer.
pub async fn collect_bytes(mut body: ByteStream) -> Result<Bytes, JigError> {
    let mut buf = BytesMut::new();
    while let Some(chunk) = body.next().await {
        buf.extend_from_slice(&chunk?);
    }
    Ok(buf.freeze())
}

/// Adapt an mpsc receiver into a stream that ends when every sender is gone.
pub fn receiver_stream<T: Send + 'static>(rx: mpsc::Receiver<T>) -> BoxStream<'static, T> {
    stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) }).boxed()
}
