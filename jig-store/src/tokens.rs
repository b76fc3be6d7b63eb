use crate::collection::Collection;
use chrono::{DateTime, Utc};
use jig_core::JigError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Permission bitset carried by an API token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permissions(pub u8);

impl Permissions {
    pub const READ: Permissions = Permissions(1);
    pub const DEPLOY: Permissions = Permissions(2);
    pub const DELETE: Permissions = Permissions(4);
    pub const ALL: Permissions = Permissions(1 | 2 | 4);

    pub fn contains(self, other: Permissions) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for Permissions {
    type Output = Permissions;

    fn bitor(self, rhs: Self) -> Self {
        Permissions(self.0 | rhs.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Token {
    pub token: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub permissions: Permissions,
}

/// API tokens, keyed by name. Lookup by token value scans; the set is small.
#[derive(Clone)]
pub struct TokenStore {
    inner: Collection<Token>,
}

impl TokenStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, JigError> {
        Ok(Self {
            inner: Collection::open("tokens", path)?,
        })
    }

    pub fn in_memory() -> Self {
        Self {
            inner: Collection::in_memory("tokens"),
        }
    }

    /// Issue a new token with every permission.
    pub fn make(&self, name: &str) -> Result<Token, JigError> {
        self.make_with(name, Permissions::ALL)
    }

    pub fn make_with(&self, name: &str, permissions: Permissions) -> Result<Token, JigError> {
        if name.is_empty() {
            return Err(JigError::Validation("token name must not be empty".into()));
        }
        if permissions.0 == 0 || !Permissions::ALL.contains(permissions) {
            return Err(JigError::Validation(format!(
                "invalid permissions {} for token {name}",
                permissions.0
            )));
        }
        let token = Token {
            token: uuid::Uuid::new_v4().simple().to_string(),
            name: name.to_string(),
            created_at: Utc::now(),
            permissions,
        };
        self.inner.insert_new(name, token.clone())?;
        tracing::info!(token_name = %name, permissions = permissions.0, "token issued");
        Ok(token)
    }

    pub fn get(&self, token: &str) -> Option<Token> {
        self.inner.find(|t| t.token == token)
    }

    /// Tokens ordered by name.
    pub fn list(&self) -> Vec<Token> {
        self.inner.values()
    }

    /// `true` if a token with that name existed.
    pub fn delete(&self, name: &str) -> Result<bool, JigError> {
        let removed = self.inner.remove(name)?.is_some();
        if removed {
            tracing::info!(token_name = %name, "token revoked");
        }
        Ok(removed)
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_token_is_32_hex_chars_with_all_permissions() {
        let store = TokenStore::in_memory();
        let t = store.make("laptop").unwrap();
        assert_eq!(t.token.len(), 32);
        assert!(t.token.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(t.permissions, Permissions::ALL);
        assert_eq!(store.get(&t.token), Some(t));
    }

    #[test]
    fn duplicate_name_is_conflict() {
        let store = TokenStore::in_memory();
        store.make("ci").unwrap();
        assert!(matches!(store.make("ci"), Err(JigError::Conflict(_))));
    }

    #[test]
    fn unknown_token_is_none() {
        let store = TokenStore::in_memory();
        store.make("ci").unwrap();
        assert!(store.get("deadbeef").is_none());
    }

    #[test]
    fn delete_revokes() {
        let store = TokenStore::in_memory();
        let t = store.make("ci").unwrap();
        assert!(store.delete("ci").unwrap());
        assert!(store.get(&t.token).is_none());
        assert!(!store.delete("ci").unwrap());
    }

    #[test]
    fn permission_bits() {
        let p = Permissions::READ | Permissions::DELETE;
        assert!(p.contains(Permissions::READ));
        assert!(!p.contains(Permissions::DEPLOY));
        assert!(Permissions::ALL.contains(p));
        assert_eq!(Permissions::ALL.0, 7);
    }

    #[test]
    fn restricted_permissions() {
        let store = TokenStore::in_memory();
        let t = store.make_with("viewer", Permissions::READ).unwrap();
        assert_eq!(t.permissions, Permissions::READ);
        assert!(store.make_with("none", Permissions(0)).is_err());
        assert!(store.make_with("bogus", Permissions(8)).is_err());
    }

    #[test]
    fn token_serializes_camel_case() {
        let store = TokenStore::in_memory();
        let t = store.make("ci").unwrap();
        let json = serde_json::to_value(&t).unwrap();
        assert!(json.get("createdAt").is_some());
        assert_eq!(json["permissions"], 7);
    }
}
