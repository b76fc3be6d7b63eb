use crate::collection::Collection;
use jig_core::{JigError, SecretLookup};
use std::path::PathBuf;

/// Named secret values referenced from deployment environments as `@name`.
#[derive(Clone)]
pub struct SecretStore {
    inner: Collection<String>,
}

impl SecretStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, JigError> {
        Ok(Self {
            inner: Collection::open("secrets", path)?,
        })
    }

    pub fn in_memory() -> Self {
        Self {
            inner: Collection::in_memory("secrets"),
        }
    }

    pub fn insert(&self, name: &str, value: &str) -> Result<(), JigError> {
        if name.is_empty() {
            return Err(JigError::Validation("secret name must not be empty".into()));
        }
        self.inner.insert_new(name, value.to_string())?;
        tracing::info!(secret = %name, "secret stored");
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<String> {
        self.inner.get(name)
    }

    /// `true` if the secret existed.
    pub fn delete(&self, name: &str) -> Result<bool, JigError> {
        let removed = self.inner.remove(name)?.is_some();
        if removed {
            tracing::info!(secret = %name, "secret deleted");
        }
        Ok(removed)
    }

    /// Secret names, sorted. Values are never listed.
    pub fn list(&self) -> Vec<String> {
        self.inner.keys()
    }
}

impl SecretLookup for SecretStore {
    fn get(&self, name: &str) -> Result<Option<String>, JigError> {
        Ok(self.inner.get(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jig_core::resolve_env;
    use std::collections::BTreeMap;

    #[test]
    fn insert_get_delete() {
        let store = SecretStore::in_memory();
        store.insert("db", "postgres://x").unwrap();
        assert_eq!(store.get("db").as_deref(), Some("postgres://x"));
        assert!(store.delete("db").unwrap());
        assert!(!store.delete("db").unwrap());
        assert!(store.get("db").is_none());
    }

    #[test]
    fn duplicate_is_conflict() {
        let store = SecretStore::in_memory();
        store.insert("db", "a").unwrap();
        let err = store.insert("db", "b").unwrap_err();
        assert_eq!(err.status_code(), 409);
        assert_eq!(store.get("db").as_deref(), Some("a"));
    }

    #[test]
    fn empty_name_rejected() {
        let store = SecretStore::in_memory();
        assert!(matches!(store.insert("", "x"), Err(JigError::Validation(_))));
    }

    #[test]
    fn list_is_sorted() {
        let store = SecretStore::in_memory();
        for name in ["zeta", "alpha", "mid"] {
            store.insert(name, "v").unwrap();
        }
        assert_eq!(store.list(), vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn serves_as_lookup_for_resolver() {
        let store = SecretStore::in_memory();
        store.insert("token", "s3cr3t").unwrap();
        let envs = BTreeMap::from([("API_TOKEN".to_string(), "@token".to_string())]);
        assert_eq!(resolve_env(&envs, &store).unwrap(), vec!["API_TOKEN=s3cr3t"]);
    }
}
