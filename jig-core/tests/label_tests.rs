use jig_core::labels::{self, Middleware, synthesize};
use jig_core::spec::{DeploymentSpec, MiddlewareSpec, RateLimit};
use std::collections::BTreeMap;

fn spec(middlewares: MiddlewareSpec) -> DeploymentSpec {
    DeploymentSpec {
        name: "jig".to_string(),
        domain: "jig.app".to_string(),
        middlewares,
        ..Default::default()
    }
}

fn expected(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn secure_routing(chain: &str) -> Vec<(&'static str, String)> {
    vec![
        ("traefik.docker.network", "jig".to_string()),
        ("jig.name", "jig".to_string()),
        ("traefik.enable", "true".to_string()),
        ("traefik.http.middlewares.https-only.redirectscheme.permanent", "true".to_string()),
        ("traefik.http.middlewares.https-only.redirectscheme.scheme", "https".to_string()),
        ("traefik.http.routers.jig-secure.rule", "Host(`jig.app`)".to_string()),
        ("traefik.http.routers.jig-secure.tls.certresolver", "defaultresolver".to_string()),
        ("traefik.http.routers.jig-secure.tls", "true".to_string()),
        ("traefik.http.routers.jig-secure.entrypoints", "websecure".to_string()),
        ("traefik.http.routers.jig-secure.middlewares", chain.to_string()),
        ("traefik.http.routers.jig.rule", "Host(`jig.app`)".to_string()),
        ("traefik.http.routers.jig.entrypoints", "web".to_string()),
        ("traefik.http.routers.jig.middlewares", chain.to_string()),
    ]
}

fn with(base: Vec<(&'static str, String)>, extra: &[(&str, &str)]) -> BTreeMap<String, String> {
    let mut map: BTreeMap<String, String> =
        base.into_iter().map(|(k, v)| (k.to_string(), v)).collect();
    map.extend(expected(extra));
    map
}

// =============================================================================
// Router variants
// =============================================================================

#[test]
fn test_basic_deployment_gets_http_and_https_routers() {
    let actual = synthesize(&spec(MiddlewareSpec::default())).labels;
    assert_eq!(actual, with(secure_routing("https-only"), &[]));
}

#[test]
fn test_custom_rule_wins_over_domain() {
    let mut s = spec(MiddlewareSpec::default());
    s.rule = "Host(`jig.app`) && PathPrefix(`/api`)".to_string();
    let labels = synthesize(&s).labels;
    assert_eq!(
        labels["traefik.http.routers.jig.rule"],
        "Host(`jig.app`) && PathPrefix(`/api`)"
    );
    assert_eq!(
        labels["traefik.http.routers.jig-secure.rule"],
        "Host(`jig.app`) && PathPrefix(`/api`)"
    );
}

#[test]
fn test_internal_service_is_not_exposed() {
    let actual = synthesize(&spec(MiddlewareSpec {
        no_http: Some(true),
        ..Default::default()
    }))
    .labels;
    assert_eq!(
        actual,
        expected(&[
            ("traefik.docker.network", "jig"),
            ("jig.name", "jig"),
            ("traefik.enable", "false"),
        ])
    );
}

#[test]
fn test_disabling_http_ignores_tls_and_middlewares() {
    for no_tls in [None, Some(false), Some(true)] {
        let routing = synthesize(&spec(MiddlewareSpec {
            no_http: Some(true),
            no_tls,
            compression: Some(true),
            add_prefix: Some("/api".to_string()),
            ..Default::default()
        }));
        assert_eq!(routing.labels["traefik.enable"], "false");
        assert!(routing.chain.is_empty());
        assert!(
            !routing.labels.keys().any(|k| k.starts_with("traefik.http.")),
            "no router or middleware labels expected, got {:?}",
            routing.labels
        );
    }
}

#[test]
fn test_tls_disabled_keeps_plain_router_only() {
    let actual = synthesize(&spec(MiddlewareSpec {
        no_tls: Some(true),
        ..Default::default()
    }))
    .labels;
    assert_eq!(
        actual,
        expected(&[
            ("traefik.docker.network", "jig"),
            ("jig.name", "jig"),
            ("traefik.enable", "true"),
            ("traefik.http.routers.jig.rule", "Host(`jig.app`)"),
            ("traefik.http.routers.jig.entrypoints", "web"),
        ])
    );
}

#[test]
fn test_tls_disabled_chain_attaches_to_plain_router() {
    let actual = synthesize(&spec(MiddlewareSpec {
        no_tls: Some(true),
        compression: Some(true),
        ..Default::default()
    }))
    .labels;
    assert_eq!(actual["traefik.http.routers.jig.middlewares"], "compress");
    assert!(!actual.contains_key("traefik.http.routers.jig-secure.middlewares"));
    assert!(!actual.contains_key("traefik.http.middlewares.https-only.redirectscheme.scheme"));
}

#[test]
fn test_no_rule_and_no_domain_uses_sentinel() {
    let s = DeploymentSpec {
        name: "jig".to_string(),
        ..Default::default()
    };
    let labels = synthesize(&s).labels;
    assert_eq!(labels["traefik.http.routers.jig.rule"], labels::NO_MATCH_RULE);
}

// =============================================================================
// Middlewares
// =============================================================================

#[test]
fn test_compression_middleware() {
    let actual = synthesize(&spec(MiddlewareSpec {
        compression: Some(true),
        ..Default::default()
    }))
    .labels;
    assert_eq!(
        actual,
        with(
            secure_routing("https-only, compress"),
            &[("traefik.http.middlewares.compress.compress", "true")]
        )
    );
}

#[test]
fn test_add_and_strip_prefix_middlewares() {
    let actual = synthesize(&spec(MiddlewareSpec {
        compression: Some(true),
        add_prefix: Some("/api".to_string()),
        strip_prefix: Some(vec!["/papi".to_string(), "/mami".to_string()]),
        ..Default::default()
    }))
    .labels;
    assert_eq!(
        actual,
        with(
            secure_routing("https-only, compress, addPrefix-jig, stripPrefix-jig"),
            &[
                ("traefik.http.middlewares.compress.compress", "true"),
                ("traefik.http.middlewares.addPrefix-jig.addprefix", "/api"),
                ("traefik.http.middlewares.stripPrefix-jig.stripprefix.prefixes", "/papi,/mami"),
            ]
        )
    );
}

#[test]
fn test_rate_limiting_middleware() {
    let actual = synthesize(&spec(MiddlewareSpec {
        compression: Some(true),
        rate_limiting: Some(RateLimit {
            average: Some(100),
            burst: Some(200),
        }),
        ..Default::default()
    }))
    .labels;
    assert_eq!(
        actual,
        with(
            secure_routing("https-only, compress, ratelimit-jig"),
            &[
                ("traefik.http.middlewares.compress.compress", "true"),
                ("traefik.http.middlewares.ratelimit-jig.ratelimit.average", "100"),
                ("traefik.http.middlewares.ratelimit-jig.ratelimit.burst", "200"),
            ]
        )
    );
}

#[test]
fn test_rate_limit_needs_average_and_burst() {
    let routing = synthesize(&spec(MiddlewareSpec {
        rate_limiting: Some(RateLimit {
            average: Some(100),
            burst: None,
        }),
        ..Default::default()
    }));
    assert_eq!(routing.chain, vec![Middleware::HttpsRedirect]);
    assert!(!routing.labels.keys().any(|k| k.contains("ratelimit")));
}

#[test]
fn test_basic_auth_users_joined_with_bare_commas() {
    let labels = synthesize(&spec(MiddlewareSpec {
        basic_auth: Some(vec!["alice:$apr1$x".to_string(), "bob:$apr1$y".to_string()]),
        ..Default::default()
    }))
    .labels;
    assert_eq!(
        labels["traefik.http.middlewares.basicAuth-jig.basicauth.users"],
        "alice:$apr1$x,bob:$apr1$y"
    );
    assert_eq!(labels["traefik.http.routers.jig.middlewares"], "https-only, basicAuth-jig");
}

#[test]
fn test_full_chain_order_is_fixed() {
    let routing = synthesize(&spec(MiddlewareSpec {
        // Deliberately set in reverse of chain order.
        rate_limiting: Some(RateLimit {
            average: Some(1),
            burst: Some(2),
        }),
        basic_auth: Some(vec!["u:p".to_string()]),
        strip_prefix: Some(vec!["/s".to_string()]),
        add_prefix: Some("/a".to_string()),
        compression: Some(true),
        no_tls: Some(false),
        no_http: Some(false),
    }));
    let order = "https-only, compress, addPrefix-jig, stripPrefix-jig, basicAuth-jig, ratelimit-jig";
    assert_eq!(routing.labels["traefik.http.routers.jig.middlewares"], order);
    assert_eq!(routing.labels["traefik.http.routers.jig-secure.middlewares"], order);
}

#[test]
fn test_empty_middleware_values_contribute_nothing() {
    let routing = synthesize(&spec(MiddlewareSpec {
        add_prefix: Some(String::new()),
        strip_prefix: Some(vec![]),
        basic_auth: Some(vec![]),
        ..Default::default()
    }));
    assert_eq!(routing.chain, vec![Middleware::HttpsRedirect]);
}

#[test]
fn test_middleware_names_do_not_collide_across_services() {
    let mut a = spec(MiddlewareSpec {
        add_prefix: Some("/a".to_string()),
        ..Default::default()
    });
    let mut b = a.clone();
    a.name = "alpha".to_string();
    b.name = "beta".to_string();
    let la = synthesize(&a).labels;
    let lb = synthesize(&b).labels;
    assert!(la.contains_key("traefik.http.middlewares.addPrefix-alpha.addprefix"));
    assert!(lb.contains_key("traefik.http.middlewares.addPrefix-beta.addprefix"));
}

// =============================================================================
// Determinism
// =============================================================================

#[test]
fn test_synthesis_is_deterministic() {
    let s = spec(MiddlewareSpec {
        compression: Some(true),
        strip_prefix: Some(vec!["/x".to_string(), "/y".to_string()]),
        basic_auth: Some(vec!["u:p".to_string()]),
        ..Default::default()
    });
    let first = synthesize(&s);
    for _ in 0..10 {
        assert_eq!(synthesize(&s), first);
    }
}
