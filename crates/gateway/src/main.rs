//! ChannelForge API Gateway
//!
//! HTTP control surface over the pipeline:
//! - Start, resume and cancel runs
//! - Inspect runs, their channels and the call audit log
//! - Stream run progress as server-sent events
//! - Rate limiting and observability (logging, metrics)

mod handlers;
mod middleware;

use axum::{
    routing::{get, post},
    Router,
};
use channelforge_common::{
    config::AppConfig,
    db::{DbPool, PipelineStore, Repository},
    llm::create_llm_client,
    metrics,
    youtube::YouTubeClient,
};
use channelforge_pipeline::PipelineService;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub service: PipelineService,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = AppConfig::load().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        e
    })?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.observability.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .json()
        .init();

    info!("Starting ChannelForge API Gateway v{}", channelforge_common::VERSION);

    let config = Arc::new(config);

    // Initialize metrics
    install_metrics_exporter(&config)?;
    metrics::register_metrics();

    // Initialize database connection
    info!("Connecting to database...");
    let db = DbPool::new(&config.database).await?;
    let store: Arc<dyn PipelineStore> = Arc::new(Repository::new(db));

    let llm = create_llm_client(&config.llm)?;
    let remote = YouTubeClient::from_config(&config.youtube)?;
    if remote.is_none() {
        warn!("No YouTube API key configured, resolving videos from cache only");
    }

    // Create app state
    let state = AppState {
        config: config.clone(),
        service: PipelineService::from_config(&config, store, llm, remote),
    };

    // Build the router
    let app = create_router(state);

    // Start the server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

fn install_metrics_exporter(config: &AppConfig) -> anyhow::Result<()> {
    let port = config.observability.metrics_port;
    if port == 0 {
        return Ok(());
    }

    PrometheusBuilder::new()
        .with_http_listener(SocketAddr::from(([0, 0, 0, 0], port)))
        .set_buckets(metrics::LATENCY_BUCKETS)?
        .install()?;
    info!(port, "Prometheus exporter listening");
    Ok(())
}

/// Create the main application router
fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Request ID propagation
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    let rate_limit = &state.config.rate_limit;
    let limiter = middleware::rate_limit::create_rate_limiter(
        rate_limit.requests_per_second,
        rate_limit.burst,
    );

    // API routes
    let mut api_routes = Router::new()
        // Health endpoints
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))

        // Run endpoints
        .route("/runs", post(handlers::runs::start_run).get(handlers::runs::list_runs))
        .route("/runs/{id}", get(handlers::runs::get_run))
        .route("/runs/{id}/resume", post(handlers::runs::resume_run))
        .route("/runs/{id}/cancel", post(handlers::runs::cancel_run))
        .route("/runs/{id}/calls", get(handlers::runs::list_calls))

        // Progress stream
        .route("/runs/{id}/events", get(handlers::events::run_events));

    if rate_limit.enabled {
        api_routes = api_routes.layer(axum::middleware::from_fn_with_state(
            limiter,
            middleware::rate_limit::rate_limit_middleware,
        ));
    }

    // Compose the app
    Router::new()
        .nest("/v1", api_routes)
        .layer(axum::middleware::from_fn(middleware::metrics::track_requests))
        .layer(TimeoutLayer::new(state.config.request_timeout()))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(request_id)
        .layer(propagate_id)
        .with_state(state)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use channelforge_common::db::models::Channel;
    use channelforge_common::db::MemoryStore;
    use channelforge_common::llm::ScriptedLlmClient;
    use channelforge_common::db::models::RunStatus;
    use chrono::Utc;
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use uuid::Uuid;

    async fn test_state(llm: ScriptedLlmClient) -> (AppState, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        store
            .add_channel(Channel {
                id: Uuid::new_v4(),
                youtube_channel_id: "UCalpha".into(),
                title: "Alpha".into(),
                url: "https://www.youtube.com/@alpha".into(),
                subscriber_count: 10_000,
                video_count: 12,
                view_count: 1_000_000,
                first_upload_at: None,
                category: None,
                description: None,
                discovered_at: Utc::now().into(),
            })
            .await;

        let config = Arc::new(AppConfig::default());
        let service =
            PipelineService::from_config(&config, store.clone(), Arc::new(llm), None);
        (AppState { config, service }, store)
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), 1 << 20).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (state, _) = test_state(ScriptedLlmClient::new()).await;
        let response = create_router(state)
            .oneshot(Request::get("/v1/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn test_ready_pings_store() {
        let (state, _) = test_state(ScriptedLlmClient::new()).await;
        let response = create_router(state)
            .oneshot(Request::get("/v1/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "ready");
    }

    #[tokio::test]
    async fn test_start_run_accepted() {
        let llm = ScriptedLlmClient::new().on("STEP: TRIAGE", r#"{"picks": []}"#);
        let (state, _) = test_state(llm).await;
        let service = state.service.clone();

        let response = create_router(state)
            .oneshot(post_json("/v1/runs", json!({"consider_count": 10, "pick_count": 2})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let body = body_json(response).await;
        let run_id: Uuid = body["run_id"].as_str().unwrap().parse().unwrap();
        assert_eq!(body["poll_url"], format!("/v1/runs/{}", run_id));

        let status = service.wait_for_terminal(run_id).await.unwrap();
        assert_eq!(status, RunStatus::Done);
    }

    #[tokio::test]
    async fn test_invalid_filters_rejected() {
        let (state, _) = test_state(ScriptedLlmClient::new()).await;
        let response = create_router(state)
            .oneshot(post_json("/v1/runs", json!({"consider_count": 3, "pick_count": 5})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unknown_run_is_404() {
        let (state, _) = test_state(ScriptedLlmClient::new()).await;
        let app = create_router(state);

        let uri = format!("/v1/runs/{}", Uuid::new_v4());
        let response = app
            .clone()
            .oneshot(Request::get(uri.as_str()).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app
            .oneshot(post_json(&format!("{}/cancel", uri), json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_cancel_then_detail() {
        let (state, store) = test_state(ScriptedLlmClient::new()).await;
        let run = store
            .create_run(&channelforge_common::db::TriageFilters::default())
            .await
            .unwrap();
        let app = create_router(state);

        let response = app
            .clone()
            .oneshot(post_json(&format!("/v1/runs/{}/cancel", run.id), json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["run_cancelled"], true);

        let response = app
            .oneshot(
                Request::get(format!("/v1/runs/{}", run.id).as_str())
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["run"]["status"], "error");
        assert_eq!(body["run"]["error_message"], "Cancelled by user");
    }

    #[tokio::test]
    async fn test_events_of_finished_run_end_after_snapshot() {
        let (state, store) = test_state(ScriptedLlmClient::new()).await;
        let service = state.service.clone();
        let run = store
            .create_run(&channelforge_common::db::TriageFilters::default())
            .await
            .unwrap();
        tokio_test::assert_ok!(service.cancel(run.id).await);

        let response = create_router(state)
            .oneshot(
                Request::get(format!("/v1/runs/{}/events", run.id).as_str())
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = to_bytes(response.into_body(), 1 << 20).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("event: snapshot"));
        assert!(text.contains("Cancelled by user"));
    }
}
