use crate::error::JigError;
use std::collections::BTreeMap;

/// Prefix marking an environment value as a secret reference.
pub const SECRET_MARKER: char = '@';

/// Read access to the secret store.
pub trait SecretLookup: Send + Sync {
    /// `Ok(None)` when no secret has that name.
    fn get(&self, name: &str) -> Result<Option<String>, JigError>;
}

/// Resolve `@name` references and render `KEY=value` pairs.
///
/// The first missing or unreadable secret aborts resolution; no partial
/// environment is returned.
pub fn resolve_env(
    envs: &BTreeMap<String, String>,
    secrets: &dyn SecretLookup,
) -> Result<Vec<String>, JigError> {
    let mut resolved = Vec::with_capacity(envs.len());
    for (key, value) in envs {
        let value = match value.strip_prefix(SECRET_MARKER) {
            Some(secret) => match secrets.get(secret) {
                Ok(Some(v)) => v,
                Ok(None) => return Err(JigError::SecretNotFound(secret.to_string())),
                Err(e) => {
                    return Err(JigError::SecretStore {
                        name: secret.to_string(),
                        reason: e.to_string(),
                    });
                }
            },
            None => value.clone(),
        };
        resolved.push(format!("{key}={value}"));
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct MapLookup(HashMap<String, String>);

    impl SecretLookup for MapLookup {
        fn get(&self, name: &str) -> Result<Option<String>, JigError> {
            Ok(self.0.get(name).cloned())
        }
    }

    struct BrokenLookup;

    impl SecretLookup for BrokenLookup {
        fn get(&self, _name: &str) -> Result<Option<String>, JigError> {
            Err(JigError::Store("disk unreadable".into()))
        }
    }

    fn envs(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn literals_pass_through() {
        let store = MapLookup(HashMap::new());
        let out = resolve_env(&envs(&[("A", "1"), ("B", "")]), &store).unwrap();
        assert_eq!(out, vec!["A=1".to_string(), "B=".to_string()]);
    }

    #[test]
    fn references_are_resolved() {
        let store = MapLookup(HashMap::from([("db".to_string(), "postgres://x".to_string())]));
        let out = resolve_env(&envs(&[("DATABASE_URL", "@db"), ("MODE", "prod")]), &store).unwrap();
        assert_eq!(out.len(), 2);
        assert!(out.contains(&"DATABASE_URL=postgres://x".to_string()));
        assert!(out.contains(&"MODE=prod".to_string()));
    }

    #[test]
    fn missing_secret_aborts() {
        let store = MapLookup(HashMap::new());
        let err = resolve_env(&envs(&[("A", "@missing")]), &store).unwrap_err();
        assert!(matches!(err, JigError::SecretNotFound(ref n) if n == "missing"));
    }

    #[test]
    fn store_failure_is_reported_as_secret_store_error() {
        let err = resolve_env(&envs(&[("A", "@x")]), &BrokenLookup).unwrap_err();
        assert!(matches!(err, JigError::SecretStore { ref name, .. } if name == "x"));
    }

    #[test]
    fn marker_only_in_first_position() {
        let store = MapLookup(HashMap::new());
        let out = resolve_env(&envs(&[("EMAIL", "me@example.com")]), &store).unwrap();
        assert_eq!(out, vec!["EMAIL=me@example.com".to_string()]);
    }
}
