//! Traefik label synthesis.
//!
//! A deployment's routing is expressed entirely through container labels read
//! by the reverse proxy. The key names and value formats below are a wire
//! contract with services that are already routed: changing them re-routes
//! (or un-routes) running deployments.
//!
//! Labels are assembled as an ordered list of contributions and flattened
//! into a map only at the boundary, so the middleware order stays explicit.

use crate::spec::DeploymentSpec;
use std::collections::BTreeMap;

/// Label marking a container as belonging to a jig service.
pub const NAME_LABEL: &str = "jig.name";

/// Label holding the JSON deployment spec a container was created from.
/// Informational; the proxy ignores it.
pub const CONFIG_LABEL: &str = "jig.config";

/// Docker network shared by the proxy and every deployment.
pub const NETWORK: &str = "jig";

/// ACME resolver configured on the proxy.
pub const CERT_RESOLVER: &str = "defaultresolver";

/// Rule used when a deployment has neither a rule nor a domain.
pub const NO_MATCH_RULE: &str = "No-HTTP";

const HTTP_ENTRYPOINT: &str = "web";
const HTTPS_ENTRYPOINT: &str = "websecure";

/// Flat label map handed to the container runtime.
pub type LabelMap = BTreeMap<String, String>;

/// A proxy middleware a deployment may chain onto its routers.
///
/// Variant order is the execution order on the proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Middleware {
    HttpsRedirect,
    Compress,
    AddPrefix(String),
    StripPrefix(Vec<String>),
    BasicAuth(Vec<String>),
    RateLimit { average: u64, burst: u64 },
}

impl Middleware {
    /// Name referenced from the router chain. Per-service middlewares carry
    /// the service name so two services never share a definition.
    pub fn chain_name(&self, service: &str) -> String {
        match self {
            Middleware::HttpsRedirect => "https-only".to_string(),
            Middleware::Compress => "compress".to_string(),
            Middleware::AddPrefix(_) => format!("addPrefix-{service}"),
            Middleware::StripPrefix(_) => format!("stripPrefix-{service}"),
            Middleware::BasicAuth(_) => format!("basicAuth-{service}"),
            Middleware::RateLimit { .. } => format!("ratelimit-{service}"),
        }
    }

    fn contribute(&self, service: &str, labels: &mut LabelBuilder) {
        let prefix = format!("traefik.http.middlewares.{}", self.chain_name(service));
        match self {
            Middleware::HttpsRedirect => {
                labels.push(format!("{prefix}.redirectscheme.permanent"), "true");
                labels.push(format!("{prefix}.redirectscheme.scheme"), "https");
            }
            Middleware::Compress => {
                labels.push(format!("{prefix}.compress"), "true");
            }
            Middleware::AddPrefix(path) => {
                labels.push(format!("{prefix}.addprefix"), path.as_str());
            }
            Middleware::StripPrefix(paths) => {
                labels.push(format!("{prefix}.stripprefix.prefixes"), paths.join(","));
            }
            Middleware::BasicAuth(users) => {
                labels.push(format!("{prefix}.basicauth.users"), users.join(","));
            }
            Middleware::RateLimit { average, burst } => {
                labels.push(format!("{prefix}.ratelimit.average"), average.to_string());
                labels.push(format!("{prefix}.ratelimit.burst"), burst.to_string());
            }
        }
    }
}

/// Ordered label contributions; later duplicates overwrite earlier ones
/// when flattened.
#[derive(Debug, Default, Clone)]
pub struct LabelBuilder {
    entries: Vec<(String, String)>,
}

impl LabelBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.entries.push((key.into(), value.into()));
        self
    }

    pub fn build(self) -> LabelMap {
        self.entries.into_iter().collect()
    }
}

/// The synthesized routing configuration of one deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingLabels {
    pub rule: String,
    /// Middleware chain in proxy execution order.
    pub chain: Vec<Middleware>,
    pub labels: LabelMap,
}

/// Routing rule: explicit rule, then domain shorthand, then the no-match
/// sentinel.
pub fn routing_rule(spec: &DeploymentSpec) -> String {
    if !spec.rule.is_empty() {
        spec.rule.clone()
    } else if !spec.domain.is_empty() {
        format!("Host(`{}`)", spec.domain)
    } else {
        NO_MATCH_RULE.to_string()
    }
}

/// Enabled middlewares in the fixed chain order.
pub fn middleware_chain(spec: &DeploymentSpec) -> Vec<Middleware> {
    let mw = &spec.middlewares;
    if !mw.keep_http() {
        return Vec::new();
    }

    let mut chain = Vec::new();
    if mw.keep_tls() {
        chain.push(Middleware::HttpsRedirect);
    }
    if mw.compression() {
        chain.push(Middleware::Compress);
    }
    if let Some(prefix) = mw.add_prefix.as_ref().filter(|p| !p.is_empty()) {
        chain.push(Middleware::AddPrefix(prefix.clone()));
    }
    if let Some(prefixes) = mw.strip_prefix.as_ref().filter(|p| !p.is_empty()) {
        chain.push(Middleware::StripPrefix(prefixes.clone()));
    }
    if let Some(users) = mw.basic_auth.as_ref().filter(|u| !u.is_empty()) {
        chain.push(Middleware::BasicAuth(users.clone()));
    }
    if let Some((average, burst)) = mw.rate_limiting.and_then(|rl| rl.complete()) {
        chain.push(Middleware::RateLimit { average, burst });
    }
    chain
}

/// Build the proxy labels for a deployment. Pure: equal specs give equal
/// labels.
pub fn synthesize(spec: &DeploymentSpec) -> RoutingLabels {
    let name = spec.name.as_str();
    let rule = routing_rule(spec);
    let keep_http = spec.middlewares.keep_http();
    let keep_tls = spec.middlewares.keep_tls();
    let chain = middleware_chain(spec);

    let mut labels = LabelBuilder::new();
    labels
        .push(NAME_LABEL, name)
        .push("traefik.docker.network", NETWORK);

    if !keep_http {
        // Without HTTP there is nothing for HTTPS to redirect from.
        labels.push("traefik.enable", "false");
        return RoutingLabels {
            rule,
            chain,
            labels: labels.build(),
        };
    }

    labels.push("traefik.enable", "true");

    let mut routers = vec![name.to_string()];
    let http_router = format!("traefik.http.routers.{name}");
    labels
        .push(format!("{http_router}.rule"), rule.as_str())
        .push(format!("{http_router}.entrypoints"), HTTP_ENTRYPOINT);

    if keep_tls {
        let secure = format!("{name}-secure");
        let secure_router = format!("traefik.http.routers.{secure}");
        labels
            .push(format!("{secure_router}.rule"), rule.as_str())
            .push(format!("{secure_router}.tls"), "true")
            .push(format!("{secure_router}.tls.certresolver"), CERT_RESOLVER)
            .push(format!("{secure_router}.entrypoints"), HTTPS_ENTRYPOINT);
        routers.push(secure);
    }

    for middleware in &chain {
        middleware.contribute(name, &mut labels);
    }

    if !chain.is_empty() {
        let names = chain
            .iter()
            .map(|m| m.chain_name(name))
            .collect::<Vec<_>>()
            .join(", ");
        for router in &routers {
            labels.push(
                format!("traefik.http.routers.{router}.middlewares"),
                names.as_str(),
            );
        }
    }

    RoutingLabels {
        rule,
        chain,
        labels: labels.build(),
    }
}

/// Rule a running container was deployed with, read back from its labels.
pub fn rule_from_labels(name: &str, labels: &std::collections::HashMap<String, String>) -> String {
    labels
        .get(&format!("traefik.http.routers.{name}-secure.rule"))
        .or_else(|| labels.get(&format!("traefik.http.routers.{name}.rule")))
        .cloned()
        .unwrap_or_default()
}
