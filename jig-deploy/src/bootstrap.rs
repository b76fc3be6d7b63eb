//! Start-up checks: the shared network and the reverse proxy container.

use jig_core::labels::{CERT_RESOLVER, NETWORK};
use jig_core::spec::{RestartMode, RestartPolicy, VolumeBind};
use jig_core::{JigConfig, JigError};
use jig_runtime::{ContainerRuntime, ContainerSpec, NetworkAttachment, PortMapping};

const DOCKER_SOCKET: &str = "/var/run/docker.sock";

/// Create the bridge network deployments join. Returns `true` if created.
pub async fn ensure_network(runtime: &dyn ContainerRuntime, name: &str) -> Result<bool, JigError> {
    if runtime.network_exists(name).await? {
        tracing::debug!(network = %name, "network present");
        return Ok(false);
    }
    runtime.create_network(name).await?;
    tracing::info!(network = %name, "network created");
    Ok(true)
}

/// Container spec of the reverse proxy: HTTP and HTTPS entrypoints, docker
/// provider with opt-in exposure, ACME resolver for deployments.
pub fn proxy_container_spec(config: &JigConfig) -> ContainerSpec {
    let proxy = &config.proxy;
    let resolver = format!("--certificatesresolvers.{CERT_RESOLVER}");

    let mut cmd = vec![
        "--log.level=INFO".to_string(),
        "--entrypoints.web.address=:80".to_string(),
        "--entrypoints.websecure.address=:443".to_string(),
        "--providers.docker=true".to_string(),
        "--providers.docker.exposedbydefault=false".to_string(),
        format!("--providers.docker.network={NETWORK}"),
        format!("{resolver}=true"),
        format!(
            "{resolver}.acme.storage={}",
            config.storage.acme_file().display()
        ),
    ];
    if proxy.dashboard {
        cmd.insert(0, "--api.insecure=true".to_string());
    }
    if let Some(email) = &config.ssl.email {
        cmd.push(format!("{resolver}.acme.email={email}"));
    }

    let mut env = Vec::new();
    match &config.vercel.apikey {
        Some(apikey) => {
            cmd.push(format!("{resolver}.acme.dnschallenge.provider=vercel"));
            cmd.push(format!("{resolver}.acme.dnschallenge.delaybeforecheck=2"));
            env.push(format!("VERCEL_API_TOKEN={apikey}"));
        }
        None => {
            cmd.push(format!("{resolver}.acme.httpchallenge=true"));
            cmd.push(format!("{resolver}.acme.httpchallenge.entrypoint=web"));
        }
    }

    let mut ports = vec!["80", "443"];
    if proxy.dashboard {
        ports.push("8080");
    }

    let data_dir = config.storage.dir.display().to_string();

    ContainerSpec {
        name: proxy.name.clone(),
        image: proxy.image.clone(),
        env,
        cmd,
        exposed_ports: ports.iter().map(|p| format!("{p}/tcp")).collect(),
        port_bindings: ports
            .iter()
            .map(|p| PortMapping {
                container_port: format!("{p}/tcp"),
                host_port: p.to_string(),
            })
            .collect(),
        restart_policy: RestartPolicy {
            mode: RestartMode::UnlessStopped,
            max_retries: None,
        },
        mounts: vec![
            VolumeBind {
                source: DOCKER_SOCKET.to_string(),
                target: DOCKER_SOCKET.to_string(),
                read_only: false,
            },
            VolumeBind {
                source: data_dir.clone(),
                target: data_dir,
                read_only: false,
            },
        ],
        network: Some(NetworkAttachment {
            network: NETWORK.to_string(),
            aliases: vec![proxy.name.clone()],
        }),
        ..Default::default()
    }
}

/// Make sure the reverse proxy is running: pull its image if missing,
/// restart a stopped container (recreating it if that fails), or create it.
pub async fn ensure_proxy(runtime: &dyn ContainerRuntime, config: &JigConfig) -> Result<(), JigError> {
    let proxy = &config.proxy;
    if !proxy.enabled {
        tracing::info!("proxy management disabled");
        return Ok(());
    }

    if !runtime.image_exists(&proxy.image).await? {
        tracing::info!(image = %proxy.image, "pulling proxy image");
        runtime.pull_image(&proxy.image).await?;
    }

    match runtime.find_container(&proxy.name).await? {
        Some(c) if c.is_running() => {
            tracing::debug!(container = %proxy.name, "proxy running");
            return Ok(());
        }
        Some(c) => match runtime.start_container(&c.id).await {
            Ok(()) => {
                tracing::info!(container = %proxy.name, "proxy restarted");
                return Ok(());
            }
            Err(e) => {
                tracing::warn!(container = %proxy.name, error = %e, "proxy failed to restart, recreating");
                runtime.remove_container(&c.id).await?;
            }
        },
        None => {}
    }

    let spec = proxy_container_spec(config);
    let id = runtime.create_container(&spec).await?;
    runtime.start_container(&id).await?;
    tracing::info!(container = %proxy.name, container_id = %id, image = %proxy.image, "proxy created");
    Ok(())
}
