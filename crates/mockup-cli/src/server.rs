use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, FromRequest, Multipart, Request, State};
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use mockup_engine::{CorsPolicy, MockupService, ServiceError, UploadInput};
use serde::Serialize;
use serde_json::json;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<MockupService>,
    pub cors: Arc<CorsPolicy>,
}

pub fn router(state: AppState) -> Router {
    // Multipart framing adds overhead on top of the file itself; the exact
    // per-file limit is enforced by the service.
    let body_limit = state
        .service
        .max_upload_bytes()
        .saturating_mul(2)
        .max(1024 * 1024);
    Router::new()
        .route("/health", get(health))
        .route("/upload", post(upload))
        .route("/generate-base-image", post(generate_base_image))
        .route("/enhance-mockup", post(enhance_mockup))
        .fallback(not_found)
        .method_not_allowed_fallback(not_found)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(middleware::from_fn_with_state(state.clone(), cors))
        .with_state(state)
}

pub async fn serve(bind: SocketAddr, state: AppState) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    tracing::info!(%bind, "mockup backend listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server failed")?;
    tracing::info!("mockup backend stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}

async fn cors(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let origin = request
        .headers()
        .get(header::ORIGIN)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let mut response = if request.method() == Method::OPTIONS {
        StatusCode::NO_CONTENT.into_response()
    } else {
        next.run(request).await
    };
    apply_cors(response.headers_mut(), &state.cors, origin.as_deref());
    response
}

fn apply_cors(headers: &mut HeaderMap, policy: &CorsPolicy, origin: Option<&str>) {
    for (name, value) in policy.headers_for(origin) {
        if let Ok(value) = HeaderValue::from_str(&value) {
            headers.insert(name, value);
        }
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({"ok": true}))
}

async fn not_found() -> Response {
    (StatusCode::NOT_FOUND, "Not found").into_response()
}

async fn generate_base_image(State(state): State<AppState>, body: Bytes) -> Response {
    let service = Arc::clone(&state.service);
    run_blocking(move || service.generate_base_image(&body)).await
}

async fn enhance_mockup(State(state): State<AppState>, body: Bytes) -> Response {
    let service = Arc::clone(&state.service);
    run_blocking(move || service.enhance_mockup(&body)).await
}

async fn upload(State(state): State<AppState>, request: Request) -> Response {
    let is_multipart = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.contains("multipart/form-data"));
    if !is_multipart {
        return error_response(&ServiceError::BadRequest(
            "Expected multipart/form-data".to_string(),
        ));
    }
    let multipart = match Multipart::from_request(request, &state).await {
        Ok(multipart) => multipart,
        Err(rejection) => {
            return error_response(&ServiceError::BadRequest(rejection.body_text()));
        }
    };
    let input = match read_upload(multipart, state.service.max_upload_bytes()).await {
        Ok(input) => input,
        Err(err) => return error_response(&err),
    };
    let service = Arc::clone(&state.service);
    run_blocking(move || service.upload(input)).await
}

async fn read_upload(mut multipart: Multipart, max: usize) -> Result<UploadInput, ServiceError> {
    let multipart_error = |err: axum::extract::multipart::MultipartError| {
        if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ServiceError::PayloadTooLarge { max }
        } else {
            ServiceError::BadRequest(format!("Invalid multipart body: {}", err.body_text()))
        }
    };
    let mut file = None;
    let mut folder = None;
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                let Some(file_name) = field.file_name().map(str::to_string) else {
                    continue;
                };
                let content_type = field.content_type().map(str::to_string);
                let bytes = field.bytes().await.map_err(multipart_error)?;
                file = Some((file_name, content_type, bytes.to_vec()));
            }
            Some("folder") => {
                folder = Some(field.text().await.map_err(multipart_error)?);
            }
            _ => {}
        }
    }
    let (file_name, content_type, bytes) =
        file.ok_or_else(|| ServiceError::BadRequest("Missing file field".to_string()))?;
    Ok(UploadInput {
        file_name,
        content_type,
        bytes,
        folder,
    })
}

/// Runs blocking engine work off the async workers and renders the outcome.
async fn run_blocking<T, F>(work: F) -> Response
where
    F: FnOnce() -> Result<T, ServiceError> + Send + 'static,
    T: Serialize + Send + 'static,
{
    match tokio::task::spawn_blocking(work).await {
        Ok(Ok(outcome)) => Json(outcome).into_response(),
        Ok(Err(err)) => error_response(&err),
        Err(err) => {
            tracing::error!(error = %err, "request worker failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"ok": false, "error": "Unexpected error"})),
            )
                .into_response()
        }
    }
}

fn error_response(err: &ServiceError) -> Response {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if status.is_server_error() {
        tracing::error!(status = status.as_u16(), error = %err, "request failed");
    } else {
        tracing::warn!(status = status.as_u16(), error = %err, "request rejected");
    }
    (status, Json(err.body())).into_response()
}
