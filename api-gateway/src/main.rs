// ==============================================================================
// main.rs - Sales API Gateway Entry Point
// ==============================================================================
// Description: Axum web server for chunked sales uploads and aggregation results
// Author: Sales Platform Team
// Created: 2026-10-19
// Modified: 2026-10-19
// Version: 1.0.0
// ==============================================================================

use anyhow::{Context, Result};
use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderName, Method},
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::watch;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use sales_processor::Settings;

mod events;
mod handlers;
mod middleware;
mod models;
mod state;
mod validator;

use state::AppState;

/// Open sessions idle this long are dropped from memory
const SESSION_IDLE_TTL: Duration = Duration::from_secs(60 * 60);
const SESSION_PRUNE_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Room for multipart framing around a maximal chunk
const MULTIPART_OVERHEAD: usize = 64 * 1024;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .compact()
        .init();

    info!("Starting Sales API Gateway v1.0.0");

    let settings = Settings::from_env().context("Failed to load settings")?;
    let server_port = settings.server_port;

    let state = AppState::new(settings)
        .await
        .context("Failed to initialize application state")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let subscriber = state
        .redis_client()
        .cloned()
        .map(|client| events::spawn_subscriber(client, state.notifier().clone(), shutdown_rx.clone()));
    let pruner = tokio::spawn(prune_sessions(state.clone(), shutdown_rx));

    let app = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], server_port));
    info!("API Gateway listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Shutting down");
    let _ = shutdown_tx.send(true);
    let _ = pruner.await;
    if let Some(subscriber) = subscriber {
        let _ = subscriber.await;
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}

/// Periodically forget upload sessions nobody has touched for a while
async fn prune_sessions(state: AppState, mut shutdown: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(SESSION_PRUNE_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let pruned = state.assembler().prune_idle(SESSION_IDLE_TTL);
                if pruned > 0 {
                    info!("Pruned {} idle upload sessions", pruned);
                } else {
                    debug!("{} upload sessions open", state.assembler().active_sessions());
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        // Whole file or one Content-Range chunk
        .route("/upload", post(handlers::upload_chunk))
        .route("/uploads/{upload_id}/progress", get(handlers::get_progress))
        .route("/files", get(handlers::list_files))
        .route("/files/{result_name}", get(handlers::download_result))
        .route("/notifications/ws", get(handlers::notifications_ws));

    // Origins are configured via CORS_ALLOWED_ORIGINS (comma-separated)
    let allowed_origins: Vec<_> = state
        .settings()
        .cors_allowed_origins
        .iter()
        .filter_map(|s| s.parse().ok())
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed_origins))
        .allow_credentials(false)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::CONTENT_RANGE,
            header::ACCEPT,
            HeaderName::from_static("x-upload-id"),
            HeaderName::from_static("x-forwarded-user"),
        ])
        .expose_headers([header::CONTENT_TYPE, header::CONTENT_DISPOSITION]);

    let body_limit = state
        .settings()
        .max_chunk_bytes
        .saturating_add(MULTIPART_OVERHEAD);

    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .nest("/api", api_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors)
                .layer(DefaultBodyLimit::max(body_limit)),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use sales_processor::models::FileStatus;
    use tower::ServiceExt;

    const BOUNDARY: &str = "X-SALES-BOUNDARY";

    fn multipart_body(filename: &str, bytes: &[u8]) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\n",
                filename
            )
            .as_bytes(),
        );
        body.extend_from_slice(b"Content-Type: text/csv\r\n\r\n");
        body.extend_from_slice(bytes);
        body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());
        body
    }

    fn upload_request(upload_id: &str, range: Option<&str>, bytes: &[u8]) -> Request<Body> {
        upload_request_as("alice", upload_id, range, bytes)
    }

    fn upload_request_as(user: &str, upload_id: &str, range: Option<&str>, bytes: &[u8]) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/api/upload")
            .header("x-forwarded-user", user)
            .header("x-upload-id", upload_id)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            );
        if let Some(range) = range {
            builder = builder.header(header::CONTENT_RANGE, range);
        }
        builder.body(Body::from(multipart_body("sales.csv", bytes))).unwrap()
    }

    fn progress_request(user: &str, upload_id: &str) -> Request<Body> {
        Request::builder()
            .uri(format!("/api/uploads/{}/progress", upload_id))
            .header("x-forwarded-user", user)
            .body(Body::empty())
            .unwrap()
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_router(AppState::mock(dir.path()).await);

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "OK");
    }

    #[tokio::test]
    async fn test_upload_requires_user() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_router(AppState::mock(dir.path()).await);

        let request = Request::builder()
            .method("POST")
            .uri("/api/upload")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_chunked_upload_over_http() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::mock(dir.path()).await;
        let app = build_router(state.clone());

        let response = app
            .clone()
            .oneshot(upload_request("up-1", Some("bytes 0-9/16"), b"Toys,Mike,"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let body = json_body(response).await;
        assert_eq!(body["uploadId"], "up-1");
        assert_eq!(body["status"], "first-chunk-stored");
        assert_eq!(body["nextExpectedStart"], 10);
        assert_eq!(body["isComplete"], false);

        let response = app
            .clone()
            .oneshot(upload_request("up-1", Some("bytes 10-15/16"), b"5\nA,B\n"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "upload-complete");
        assert_eq!(body["received"], 16);
        assert_eq!(body["isComplete"], true);

        let stored = std::fs::read(state.layout().canonical_path("up-1")).unwrap();
        assert_eq!(stored, b"Toys,Mike,5\nA,B\n");

        let record = state.records().get("up-1").await.unwrap().unwrap();
        assert_eq!(record.status, FileStatus::Processing);
        assert_eq!(state.queue().counts().await.unwrap().waiting, 1);

        let response = app.oneshot(progress_request("alice", "up-1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["progress"], 100);
    }

    #[tokio::test]
    async fn test_resent_chunk_leaves_progress_alone() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_router(AppState::mock(dir.path()).await);

        for (range, status) in [
            ("bytes 0-9/30", StatusCode::ACCEPTED),
            ("bytes 10-19/30", StatusCode::ACCEPTED),
            ("bytes 0-9/30", StatusCode::RANGE_NOT_SATISFIABLE),
        ] {
            let response = app
                .clone()
                .oneshot(upload_request("up-5", Some(range), b"0123456789"))
                .await
                .unwrap();
            assert_eq!(response.status(), status);
        }

        let response = app.oneshot(progress_request("alice", "up-5")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["loaded"], 20);
        assert_eq!(body["status"], "uploading");
    }

    #[tokio::test]
    async fn test_other_user_cannot_touch_upload() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::mock(dir.path()).await;
        let app = build_router(state.clone());

        let response = app
            .clone()
            .oneshot(upload_request("shared", Some("bytes 0-3/8"), b"abcd"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let response = app
            .clone()
            .oneshot(upload_request_as("mallory", "shared", Some("bytes 4-7/8"), b"evil"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(std::fs::read(state.layout().canonical_path("shared")).unwrap(), b"abcd");
        assert_eq!(state.queue().counts().await.unwrap().waiting, 0);

        let response = app.clone().oneshot(progress_request("mallory", "shared")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app.oneshot(progress_request("alice", "shared")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["loaded"], 4);
    }

    #[tokio::test]
    async fn test_out_of_order_chunk_is_416() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_router(AppState::mock(dir.path()).await);

        let response = app
            .clone()
            .oneshot(upload_request("up-2", Some("bytes 0-9/30"), b"0123456789"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let response = app
            .oneshot(upload_request("up-2", Some("bytes 20-29/30"), b"0123456789"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
        let body = json_body(response).await;
        assert_eq!(body["expectedStart"], 10);
        assert_eq!(body["requestedStart"], 20);
    }

    #[tokio::test]
    async fn test_append_without_first_chunk_is_400() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_router(AppState::mock(dir.path()).await);

        let response = app
            .oneshot(upload_request("up-3", Some("bytes 10-19/30"), b"0123456789"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["error"], "Previous chunks missing");
    }

    #[tokio::test]
    async fn test_download_is_limited_to_owner() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_router(AppState::mock(dir.path()).await);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/files/up-1-aggregated_sales.csv")
                    .header("x-forwarded-user", "mallory")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_list_files_only_shows_callers_uploads() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_router(AppState::mock(dir.path()).await);

        let response = app
            .clone()
            .oneshot(upload_request("up-4", None, b"Toys,Mike,1\n"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let list = |user: &'static str| {
            Request::builder()
                .uri("/api/files")
                .header("x-forwarded-user", user)
                .body(Body::empty())
                .unwrap()
        };

        let body = json_body(app.clone().oneshot(list("alice")).await.unwrap()).await;
        assert_eq!(body.as_array().unwrap().len(), 1);
        assert_eq!(body[0]["upload_id"], "up-4");

        let body = json_body(app.oneshot(list("bob")).await.unwrap()).await;
        assert!(body.as_array().unwrap().is_empty());
    }
}
