pub mod collection;
pub mod secrets;
pub mod tokens;

pub use collection::Collection;
pub use secrets::SecretStore;
pub use tokens::{Permissions, Token, TokenStore};
