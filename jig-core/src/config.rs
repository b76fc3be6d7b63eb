use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level control plane configuration.
///
/// Field names avoid underscores so every key is reachable from the
/// environment (`JIG_SSL_EMAIL` → `ssl.email`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JigConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub ssl: SslConfig,
    #[serde(default)]
    pub vercel: VercelConfig,
    /// Public domain of this host, printed in the login hint.
    #[serde(default)]
    pub domain: Option<String>,
}

/// Control API listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_addr")]
    pub addr: String,
    /// Largest accepted image archive or build context, in MiB.
    #[serde(default = "default_max_upload_mb")]
    pub maxuploadmb: u64,
}

/// Where secrets, tokens and ACME state live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_dir")]
    pub dir: PathBuf,
}

/// Reverse proxy container managed at start-up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_proxy_image")]
    pub image: String,
    #[serde(default = "default_proxy_name")]
    pub name: String,
    /// Expose the proxy's insecure dashboard on :8080.
    #[serde(default = "default_true")]
    pub dashboard: bool,
}

/// ACME account settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SslConfig {
    #[serde(default)]
    pub email: Option<String>,
}

/// Vercel DNS challenge credentials; HTTP challenge is used without them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VercelConfig {
    #[serde(default)]
    pub apikey: Option<String>,
}

// ── Defaults ──────────────────────────────────────────────────

fn default_addr() -> String { "0.0.0.0:5000".into() }
fn default_max_upload_mb() -> u64 { 4096 }
fn default_dir() -> PathBuf { PathBuf::from("/var/jig") }
fn default_true() -> bool { true }
fn default_proxy_image() -> String { "traefik:2.11".into() }
fn default_proxy_name() -> String { "traefik".into() }

// ── Impls ─────────────────────────────────────────────────────

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: default_addr(),
            maxuploadmb: default_max_upload_mb(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { dir: default_dir() }
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            image: default_proxy_image(),
            name: default_proxy_name(),
            dashboard: true,
        }
    }
}

impl ServerConfig {
    pub fn max_upload_bytes(&self) -> u64 {
        self.maxuploadmb.saturating_mul(1024 * 1024)
    }
}

impl StorageConfig {
    pub fn secrets_file(&self) -> PathBuf {
        self.dir.join("secrets.json")
    }

    pub fn tokens_file(&self) -> PathBuf {
        self.dir.join("tokens.json")
    }

    pub fn acme_file(&self) -> PathBuf {
        self.dir.join("acme.json")
    }
}

impl JigConfig {
    /// Load configuration from a YAML file (if present) plus `JIG_` env
    /// overrides.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let config: JigConfig = Self::figment(path).extract()?;
        Ok(config)
    }

    fn figment(path: &Path) -> Figment {
        Figment::new()
            .merge(Yaml::file(path))
            .merge(Env::prefixed("JIG_").split("_"))
    }
}
