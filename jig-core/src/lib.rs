pub mod config;
pub mod deployment;
pub mod error;
pub mod labels;
pub mod secrets;
pub mod spec;
pub mod stats;

pub use config::JigConfig;
pub use deployment::{Deployment, ProgressEvent};
pub use error::JigError;
pub use labels::{RoutingLabels, synthesize};
pub use secrets::{SecretLookup, resolve_env};
pub use spec::{DeploymentSpec, MiddlewareSpec};
pub use stats::{RawCounters, Stats, aggregate};
