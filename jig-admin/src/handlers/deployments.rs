use crate::error::ApiResult;
use crate::server::AdminState;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use futures::StreamExt;
use jig_core::{Deployment, DeploymentSpec, JigError, ProgressEvent, Stats};
use jig_deploy::ImagePayload;
use jig_runtime::{ByteStream, receiver_stream};
use serde_json::{Value, json};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Header carrying the JSON deployment spec.
pub const CONFIG_HEADER: &str = "x-jig-config";
/// `true` when the body is an image archive rather than a build context.
pub const IMAGE_HEADER: &str = "x-jig-image";

const PROGRESS_BUFFER: usize = 64;

fn spec_from_headers(headers: &HeaderMap) -> Result<DeploymentSpec, JigError> {
    let raw = headers
        .get(CONFIG_HEADER)
        .ok_or_else(|| JigError::Validation(format!("missing {CONFIG_HEADER} header")))?
        .to_str()
        .map_err(|_| JigError::Validation(format!("{CONFIG_HEADER} is not valid text")))?;
    serde_json::from_str(raw)
        .map_err(|e| JigError::Validation(format!("{CONFIG_HEADER}: {e}")))
}

/// The request body as a stream that fails once more than `max` bytes
/// have arrived.
fn upload_stream(body: Body, max: u64) -> ByteStream {
    let mut received: u64 = 0;
    body.into_data_stream()
        .map(move |chunk| {
            let chunk = chunk.map_err(|e| JigError::Internal(format!("reading upload: {e}")))?;
            received = received.saturating_add(chunk.len() as u64);
            if received > max {
                return Err(JigError::Validation(format!("upload exceeds {max} bytes")));
            }
            Ok(chunk)
        })
        .boxed()
}

fn payload_from(headers: &HeaderMap, body: ByteStream) -> ImagePayload {
    let is_image = headers
        .get(IMAGE_HEADER)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == "true");
    if is_image {
        ImagePayload::Archive(body)
    } else {
        ImagePayload::BuildContext(body)
    }
}

pub async fn list_deployments(
    State(state): State<Arc<AdminState>>,
) -> ApiResult<Json<Vec<Deployment>>> {
    Ok(Json(state.deployer.list().await?))
}

/// Deploy and stream progress as newline-delimited JSON. Validation and
/// secret errors are returned before the stream starts; the upload is read
/// by the deploy itself, as it arrives.
pub async fn create_deployment(
    State(state): State<Arc<AdminState>>,
    headers: HeaderMap,
    body: Body,
) -> ApiResult<Response> {
    let spec = spec_from_headers(&headers)?;
    let prepared = state.deployer.prepare(spec)?;
    let payload = payload_from(&headers, upload_stream(body, state.max_upload));
    tracing::info!(
        deployment = %prepared.name(),
        image = %prepared.container.image,
        archive = payload.is_archive(),
        "deploy requested"
    );

    let (tx, rx) = mpsc::channel::<ProgressEvent>(PROGRESS_BUFFER);
    let deployer = state.deployer.clone();
    tokio::spawn(async move {
        if let Err(e) = deployer.execute(prepared, payload, &tx).await {
            let _ = tx.send(ProgressEvent::error(e.to_string())).await;
        }
    });

    let lines = receiver_stream(rx).map(|event| Ok::<_, Infallible>(event.to_line()));
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        Body::from_stream(lines),
    )
        .into_response())
}

pub async fn delete_deployment(
    State(state): State<Arc<AdminState>>,
    Path(name): Path<String>,
) -> ApiResult<StatusCode> {
    state.deployer.delete(&name).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn rollback_deployment(
    State(state): State<Arc<AdminState>>,
    Path(name): Path<String>,
) -> ApiResult<Json<Value>> {
    let id = state.deployer.rollback(&name).await?;
    Ok(Json(json!({ "name": name, "id": id })))
}

pub async fn deployment_logs(
    State(state): State<Arc<AdminState>>,
    Path(name): Path<String>,
) -> ApiResult<Response> {
    let logs = state.deployer.logs(&name).await?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        logs,
    )
        .into_response())
}

pub async fn deployment_stats(State(state): State<Arc<AdminState>>) -> ApiResult<Json<Vec<Stats>>> {
    Ok(Json(state.deployer.stats().await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use jig_runtime::collect_bytes;

    fn empty() -> ByteStream {
        futures::stream::empty().boxed()
    }

    #[test]
    fn spec_header_is_required_and_parsed() {
        let mut headers = HeaderMap::new();
        assert!(matches!(
            spec_from_headers(&headers),
            Err(JigError::Validation(_))
        ));

        headers.insert(CONFIG_HEADER, HeaderValue::from_static("{not json"));
        assert!(matches!(
            spec_from_headers(&headers),
            Err(JigError::Validation(_))
        ));

        headers.insert(
            CONFIG_HEADER,
            HeaderValue::from_static(r#"{"name":"web","port":8080}"#),
        );
        let spec = spec_from_headers(&headers).unwrap();
        assert_eq!(spec.name, "web");
        assert_eq!(spec.port, 8080);
    }

    #[test]
    fn image_header_selects_archive() {
        let mut headers = HeaderMap::new();
        assert!(!payload_from(&headers, empty()).is_archive());
        headers.insert(IMAGE_HEADER, HeaderValue::from_static("true"));
        assert!(payload_from(&headers, empty()).is_archive());
        headers.insert(IMAGE_HEADER, HeaderValue::from_static("yes"));
        assert!(!payload_from(&headers, empty()).is_archive());
    }

    #[tokio::test]
    async fn upload_is_capped() {
        let ok = collect_bytes(upload_stream(Body::from("12345678"), 8)).await;
        assert_eq!(ok.unwrap().as_ref(), b"12345678");

        let too_big = collect_bytes(upload_stream(Body::from("123456789"), 8)).await;
        assert!(matches!(too_big, Err(JigError::Validation(_))));
    }
}
