pub mod deployments;
pub mod health;
pub mod secrets;
pub mod tokens;
