use crate::{
    config::DEFAULT_TOP_K,
    service::{Health, ProcessResponse, SearchResponse, SearchService, ServiceError},
};
use axum::{
    extract::{Query, State},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio::signal;

#[derive(Clone)]
struct SharedState {
    service: Arc<SearchService>,
}

async fn start_app(service: Arc<SearchService>) {
    let listen_address = service.config().listen_address.clone();
    let shared_state = Arc::new(SharedState { service });

    async fn shutdown_signal() {
        let ctrl_c = async {
            signal::ctrl_c()
                .await
                .expect("failed to install Ctrl+C handler");
        };

        let terminate = async {
            signal::unix::signal(signal::unix::SignalKind::terminate())
                .expect("failed to install signal handler")
                .recv()
                .await;
        };

        tokio::select! {
            _ = ctrl_c => log::info!("received Ctrl+C, shutting down"),
            _ = terminate => log::info!("received SIGTERM, shutting down"),
        }
    }

    let router = build_router(shared_state);

    let listener = tokio::net::TcpListener::bind(&listen_address).await.unwrap();
    log::info!("listening on {listen_address}");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .unwrap();
}

fn build_router(shared_state: Arc<SharedState>) -> Router {
    Router::new()
        .route("/", get(info))
        .route("/api/v1/process-pdf", post(process_pdf))
        .route("/api/v1/search", get(search))
        .route("/api/v1/health", get(health))
        .layer(
            tower_http::trace::TraceLayer::new_for_http()
                .make_span_with(
                    tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO),
                )
                .on_response(
                    tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO),
                ),
        )
        .with_state(shared_state)
}

pub fn start_daemon(service: SearchService) {
    let max_blocking_threads = service.config().max_blocking_threads;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .max_blocking_threads(max_blocking_threads)
        .build()
        .unwrap()
        .block_on(async { start_app(Arc::new(service)).await });
}

// Make our own error that wraps `ServiceError`.
#[derive(Debug)]
struct HttpError(ServiceError);

// Tell axum how to convert `ServiceError` into a response.
impl IntoResponse for HttpError {
    fn into_response(self) -> axum::response::Response {
        match self.0 {
            ServiceError::SourceNotFound(_) => (
                axum::http::StatusCode::NOT_FOUND,
                axum::Json(json!({"error": self.0.to_string()})),
            ),
            ServiceError::NotLoaded => {
                log::warn!("{self:?}");
                (
                    axum::http::StatusCode::SERVICE_UNAVAILABLE,
                    axum::Json(json!({"error": self.0.to_string()})),
                )
            }
            _ => {
                log::error!("{self:?}");
                (
                    axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                    axum::Json(json!({"error": self.0.to_string()})),
                )
            }
        }
        .into_response()
    }
}

// This enables using `?` on functions that return `Result<_, ServiceError>` to turn them into
// `Result<_, HttpError>`. That way you don't need to do that manually.
impl<E> From<E> for HttpError
where
    E: Into<ServiceError>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

fn join_error(err: tokio::task::JoinError) -> HttpError {
    HttpError(ServiceError::Internal(format!("blocking task failed: {err}")))
}

async fn info() -> axum::Json<serde_json::Value> {
    axum::Json(json!({
        "service": "docsearch",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "process": "POST /api/v1/process-pdf",
            "search": "GET /api/v1/search?query=...&top_k=3",
            "health": "GET /api/v1/health",
        },
    }))
}

async fn process_pdf(
    State(state): State<Arc<SharedState>>,
) -> Result<axum::Json<ProcessResponse>, HttpError> {
    let service = state.service.clone();

    tokio::task::spawn_blocking(move || service.process())
        .await
        .map_err(join_error)?
        .map(Into::into)
        .map_err(Into::into)
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    pub top_k: Option<usize>,
}

async fn search(
    State(state): State<Arc<SharedState>>,
    Query(params): Query<SearchRequest>,
) -> Result<axum::Json<SearchResponse>, HttpError> {
    log::debug!("params: {params:?}");

    let service = state.service.clone();
    let top_k = params.top_k.unwrap_or(DEFAULT_TOP_K);

    tokio::task::spawn_blocking(move || service.search(&params.query, top_k, None))
        .await
        .map_err(join_error)?
        .map(Into::into)
        .map_err(Into::into)
}

async fn health(State(state): State<Arc<SharedState>>) -> Result<axum::Json<Health>, HttpError> {
    let service = state.service.clone();

    tokio::task::spawn_blocking(move || service.health())
        .await
        .map(Into::into)
        .map_err(join_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::tests::support::{test_config, BagEmbedder};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn test_router(config: Config, vocab: &[&str]) -> Router {
        let service = SearchService::open(config, Arc::new(BagEmbedder::new(vocab))).unwrap();
        build_router(Arc::new(SharedState {
            service: Arc::new(service),
        }))
    }

    fn router_with_source(dir: &tempfile::TempDir, source_text: &str, vocab: &[&str]) -> Router {
        let source = dir.path().join("source.txt");
        std::fs::write(&source, source_text).unwrap();

        let mut config = test_config(dir.path());
        config.document = source.to_string_lossy().to_string();
        test_router(config, vocab)
    }

    async fn send(router: &Router, method: &str, uri: &str) -> (u16, serde_json::Value) {
        let response = router
            .clone()
            .oneshot(
                axum::http::Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let status = response.status().as_u16();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let value = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn test_info_lists_endpoints() {
        let dir = tempfile::tempdir().unwrap();
        let router = router_with_source(&dir, "alpha", &["alpha"]);

        let (status, body) = send(&router, "GET", "/").await;

        assert_eq!(status, 200);
        assert_eq!(body["service"], "docsearch");
        assert!(body["endpoints"]["search"].is_string());
    }

    #[tokio::test]
    async fn test_search_before_process_is_503() {
        let dir = tempfile::tempdir().unwrap();
        let router = router_with_source(&dir, "alpha", &["alpha"]);

        let (status, body) = send(&router, "GET", "/api/v1/search?query=alpha").await;

        assert_eq!(status, 503);
        assert!(body["error"].as_str().unwrap().contains("processed"));
    }

    #[tokio::test]
    async fn test_process_missing_document_is_404() {
        let dir = tempfile::tempdir().unwrap();
        let router = test_router(test_config(dir.path()), &["alpha"]);

        let (status, body) = send(&router, "POST", "/api/v1/process-pdf").await;

        assert_eq!(status, 404);
        assert!(body["error"].as_str().unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn test_process_then_search_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let router = router_with_source(
            &dir,
            "alpha beta gamma\n\nunrelated filler text",
            &["alpha", "beta", "gamma"],
        );

        let (status, body) = send(&router, "POST", "/api/v1/process-pdf").await;
        assert_eq!(status, 200);
        assert_eq!(body["chunks_created"], 2);
        assert_eq!(body["status"], "success");

        let (status, body) =
            send(&router, "GET", "/api/v1/search?query=alpha+beta+gamma&top_k=1").await;
        assert_eq!(status, 200);
        assert_eq!(body["query"], "alpha beta gamma");
        assert_eq!(body["found_results"], true);
        assert_eq!(body["top_k_requested"], 1);
        assert_eq!(body["results"][0]["chunk_id"], 0);
        assert_eq!(body["results"][0]["rank"], 1);
    }

    #[tokio::test]
    async fn test_search_top_k_defaults_to_three() {
        let dir = tempfile::tempdir().unwrap();
        let router = router_with_source(&dir, "alpha beta", &["alpha", "beta"]);

        send(&router, "POST", "/api/v1/process-pdf").await;
        let (status, body) = send(&router, "GET", "/api/v1/search?query=alpha").await;

        assert_eq!(status, 200);
        assert_eq!(body["top_k_requested"], 3);
    }

    #[tokio::test]
    async fn test_search_without_query_param_is_400() {
        let dir = tempfile::tempdir().unwrap();
        let router = router_with_source(&dir, "alpha", &["alpha"]);

        let (status, _) = send(&router, "GET", "/api/v1/search").await;
        assert_eq!(status, 400);
    }

    #[tokio::test]
    async fn test_health_reflects_processing() {
        let dir = tempfile::tempdir().unwrap();
        let router = router_with_source(&dir, "alpha", &["alpha"]);

        let (status, body) = send(&router, "GET", "/api/v1/health").await;
        assert_eq!(status, 200);
        assert_eq!(body["pdf_exists"], true);
        assert_eq!(body["embeddings_exist"], false);
        assert_eq!(body["service_loaded"], false);
        assert!(body["similarity_threshold"].is_number());

        send(&router, "POST", "/api/v1/process-pdf").await;

        let (_, body) = send(&router, "GET", "/api/v1/health").await;
        assert_eq!(body["embeddings_exist"], true);
        assert_eq!(body["service_loaded"], true);
    }
}
