use crate::error::JigError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::LazyLock;

/// Suffix of the stopped container kept for rollback.
pub const ROLLBACK_SUFFIX: &str = "-prev";

/// Suffix held by the active container while a rollback is in flight.
pub const TRANSIENT_SUFFIX: &str = "-old";

/// The name doubles as an image repository, so it follows the repository
/// grammar: lowercase alphanumerics joined by `.`, `_`, `__` or dashes.
static NAME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]+(?:(?:[._]|__|-+)[a-z0-9]+)*$").expect("valid name pattern")
});

/// Declarative description of a deployment, as sent by the client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentSpec {
    /// Service name: container name and default network alias.
    #[serde(default)]
    pub name: String,

    /// Exposed container port (0 = none).
    #[serde(default)]
    pub port: u16,

    /// Restart policy, `policy` or `policy:maxRetries`.
    #[serde(default)]
    pub restart_policy: String,

    /// Shorthand for a ``Host(`domain`)`` rule.
    #[serde(default)]
    pub domain: String,

    /// Hostname alias override on the internal network.
    #[serde(default)]
    pub hostname: String,

    /// Explicit routing rule; wins over `domain`.
    #[serde(default, alias = "routingRule")]
    pub rule: String,

    /// Environment: literal values or `@secret` references.
    #[serde(default, alias = "environment")]
    pub envs: BTreeMap<String, String>,

    /// Bind mounts, `source:target[:ro]`.
    #[serde(default)]
    pub volumes: Vec<String>,

    #[serde(default)]
    pub middlewares: MiddlewareSpec,
}

/// Optional proxy middlewares for a deployment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MiddlewareSpec {
    #[serde(default, rename = "noTLS", alias = "disableTLS")]
    pub no_tls: Option<bool>,

    #[serde(default, rename = "noHTTP", alias = "disableHTTP")]
    pub no_http: Option<bool>,

    #[serde(default, rename = "rateLimiting", alias = "rateLimit")]
    pub rate_limiting: Option<RateLimit>,

    #[serde(default, rename = "stripPrefix", alias = "stripPrefixes")]
    pub strip_prefix: Option<Vec<String>>,

    #[serde(default, rename = "addPrefix")]
    pub add_prefix: Option<String>,

    #[serde(default)]
    pub compression: Option<bool>,

    #[serde(default, rename = "basicAuth", alias = "basicAuthUsers")]
    pub basic_auth: Option<Vec<String>>,
}

impl MiddlewareSpec {
    pub fn keep_http(&self) -> bool {
        !self.no_http.unwrap_or(false)
    }

    pub fn keep_tls(&self) -> bool {
        !self.no_tls.unwrap_or(false)
    }

    pub fn compression(&self) -> bool {
        self.compression.unwrap_or(false)
    }
}

/// Rate limit; only applied when both values are present.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimit {
    #[serde(default)]
    pub average: Option<u64>,
    #[serde(default)]
    pub burst: Option<u64>,
}

impl RateLimit {
    pub fn complete(&self) -> Option<(u64, u64)> {
        Some((self.average?, self.burst?))
    }
}

/// Container restart behaviour.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestartMode {
    /// Runtime default.
    #[default]
    Unset,
    No,
    Always,
    UnlessStopped,
    OnFailure,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestartPolicy {
    pub mode: RestartMode,
    pub max_retries: Option<i64>,
}

impl RestartPolicy {
    pub fn parse(raw: &str) -> Result<Self, JigError> {
        let (mode, retries) = match raw.split_once(':') {
            Some((mode, retries)) => {
                let count = retries.trim().parse::<i64>().map_err(|_| {
                    JigError::Validation(format!("invalid retry count in restart policy '{raw}'"))
                })?;
                (mode, Some(count))
            }
            None => (raw, None),
        };

        let mode = match mode.trim() {
            "" => RestartMode::Unset,
            "no" => RestartMode::No,
            "always" => RestartMode::Always,
            "unless-stopped" => RestartMode::UnlessStopped,
            "on-failure" => RestartMode::OnFailure,
            other => {
                return Err(JigError::Validation(format!(
                    "unknown restart policy '{other}'"
                )));
            }
        };

        Ok(Self {
            mode,
            max_retries: retries,
        })
    }
}

/// Host bind mount parsed from `source:target[:ro]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeBind {
    pub source: String,
    pub target: String,
    pub read_only: bool,
}

impl VolumeBind {
    pub fn parse(raw: &str) -> Result<Self, JigError> {
        let mut parts = raw.splitn(3, ':');
        let source = parts.next().unwrap_or_default();
        let target = parts.next().unwrap_or_default();
        let read_only = match parts.next() {
            None | Some("rw") => false,
            Some("ro") => true,
            Some(other) => {
                return Err(JigError::Validation(format!(
                    "invalid volume mode '{other}' in '{raw}'"
                )));
            }
        };
        if source.is_empty() || target.is_empty() {
            return Err(JigError::Validation(format!("invalid volume '{raw}'")));
        }
        Ok(Self {
            source: source.to_string(),
            target: target.to_string(),
            read_only,
        })
    }
}

impl DeploymentSpec {
    /// Reject specs that must never reach the runtime.
    pub fn validate(&self) -> Result<(), JigError> {
        if self.name.is_empty() {
            return Err(JigError::Validation("name is required".into()));
        }
        if !NAME_PATTERN.is_match(&self.name) {
            return Err(JigError::Validation(format!(
                "name '{}' must be lowercase letters and digits joined by '.', '_' or '-'",
                self.name
            )));
        }
        if self.name.ends_with(ROLLBACK_SUFFIX) || self.name.ends_with(TRANSIENT_SUFFIX) {
            return Err(JigError::Validation(format!(
                "name '{}' uses a reserved suffix",
                self.name
            )));
        }
        self.parsed_restart_policy()?;
        self.parsed_volumes()?;
        Ok(())
    }

    pub fn parsed_restart_policy(&self) -> Result<RestartPolicy, JigError> {
        RestartPolicy::parse(&self.restart_policy)
    }

    pub fn parsed_volumes(&self) -> Result<Vec<VolumeBind>, JigError> {
        self.volumes.iter().map(|v| VolumeBind::parse(v)).collect()
    }

    /// Image the active container runs.
    pub fn image_reference(&self) -> String {
        latest_image(&self.name)
    }

    /// Alias on the internal network.
    pub fn network_alias(&self) -> &str {
        if self.hostname.is_empty() {
            &self.name
        } else {
            &self.hostname
        }
    }

    /// `<port>/tcp` when a port is exposed.
    pub fn exposed_port(&self) -> Option<String> {
        (self.port != 0).then(|| format!("{}/tcp", self.port))
    }
}

pub fn latest_image(name: &str) -> String {
    format!("{name}:latest")
}

pub fn previous_image(name: &str) -> String {
    format!("{name}:prev")
}

pub fn rollback_name(name: &str) -> String {
    format!("{name}{ROLLBACK_SUFFIX}")
}

pub fn transient_name(name: &str) -> String {
    format!("{name}{TRANSIENT_SUFFIX}")
}
