use crate::handlers;
use crate::middleware::bearer_auth;
use axum::{
    Router, middleware,
    routing::{delete, get, post},
};
use jig_deploy::Deployer;
use jig_store::{SecretStore, TokenStore};
use std::future::Future;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared state for the control API.
pub struct AdminState {
    pub deployer: Deployer,
    pub secrets: Arc<SecretStore>,
    pub tokens: Arc<TokenStore>,
    /// Cap on a deploy upload, in bytes.
    pub max_upload: u64,
}

/// Build the router. Everything except `/health` requires a bearer token.
pub fn build_admin_router(state: Arc<AdminState>) -> Router {
    use handlers::{deployments, secrets, tokens};

    let protected = Router::new()
        // Deployments
        .route(
            "/deployments",
            get(deployments::list_deployments).post(deployments::create_deployment),
        )
        .route("/deployments/stats", get(deployments::deployment_stats))
        .route("/deployments/{name}", delete(deployments::delete_deployment))
        .route("/deployments/{name}/rollback", post(deployments::rollback_deployment))
        .route("/deployments/{name}/logs", get(deployments::deployment_logs))
        // Secrets
        .route("/secrets", get(secrets::list_secrets).post(secrets::create_secret))
        .route(
            "/secrets/{name}",
            get(secrets::get_secret).delete(secrets::delete_secret),
        )
        // Tokens
        .route("/tokens", get(tokens::list_tokens).post(tokens::create_token))
        .route("/tokens/{name}", delete(tokens::delete_token))
        .route_layer(middleware::from_fn_with_state(state.clone(), bearer_auth));

    Router::new()
        .route("/health", get(handlers::health::health_check))
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the control API until `shutdown` resolves. In-flight requests
/// (including deploy streams) are allowed to finish.
pub async fn start_admin(
    addr: &str,
    state: Arc<AdminState>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "control API listening");

    axum::serve(listener, build_admin_router(state))
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("control API stopped");
    Ok(())
}
