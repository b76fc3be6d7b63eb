pub mod bootstrap;
pub mod lifecycle;
pub mod locks;

pub use bootstrap::{ensure_network, ensure_proxy, proxy_container_spec};
pub use lifecycle::{Deployer, ImagePayload, PreparedDeployment};
pub use locks::NameLocks;
