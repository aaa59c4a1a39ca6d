//! The HTTP surface of the bot: webhook ingress, health, and metrics.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tower::limit::ConcurrencyLimitLayer;

use crate::config::Config;
use crate::engine::event::Job;
use crate::engine::process::{process_job, EnqueueError, JobQueue};
use crate::engine::EngineContext;
use crate::server::rate_limit::RateLimiter;
use crate::server::webhook::{
    delivery_id, detect_platform, parse_event, verify_signature, WebhookError,
};

pub mod metrics;
pub mod rate_limit;
pub mod webhook;

/// Shared server state for all axum handlers.
pub struct ServerState {
    config: Arc<Config>,
    engine: Arc<EngineContext>,
    queue: JobQueue,
    rate_limiter: Option<RateLimiter>,
}

impl ServerState {
    pub fn new(config: Arc<Config>, engine: Arc<EngineContext>, queue: JobQueue) -> Self {
        let rate_limiter = config
            .rate_limit
            .enabled
            .then(|| RateLimiter::new(config.rate_limit.rpm));
        Self {
            config,
            engine,
            queue,
            rate_limiter,
        }
    }
}

pub type ServerStateRef = Arc<ServerState>;

pub fn create_app(state: ServerState) -> Router {
    let webhook_path = state.config.webhook_path.clone();
    Router::new()
        .route(&webhook_path, post(webhook_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .layer(ConcurrencyLimitLayer::new(100))
        .with_state(Arc::new(state))
}

/// What ingress decided to do with a request, before any job runs.
enum Ingress {
    Enqueued,
    RunInline(Job),
    /// Valid request with nothing to act on (e.g. a draft PR update).
    Ignored,
}

async fn webhook_handler(
    State(state): State<ServerStateRef>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let delivery = delivery_id(&headers);
    let ingress = tokio::time::timeout(
        state.config.ingress_timeout(),
        accept_webhook(&state, addr, &headers, &body, &delivery),
    )
    .await;

    match ingress {
        Err(_) => {
            tracing::error!("Ingress did not finish within its budget (delivery {delivery})");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "ingress timeout",
                &delivery,
                None,
            )
        }
        Ok(Err(error)) => webhook_error_response(error, &delivery),
        Ok(Ok(Ingress::Ignored)) => {
            (StatusCode::OK, Json(serde_json::json!({"status": "ignored"}))).into_response()
        }
        Ok(Ok(Ingress::Enqueued)) => (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({"status": "queued"})),
        )
            .into_response(),
        // Inline jobs go through the same span-instrumented entry point as
        // worker jobs, so event correlation is never lost.
        Ok(Ok(Ingress::RunInline(job))) => {
            let queue = state.queue.clone();
            match process_job(&state.engine, queue, job).await {
                Ok(()) => (
                    StatusCode::OK,
                    Json(serde_json::json!({"status": "processed"})),
                )
                    .into_response(),
                Err(_) => error_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal error",
                    &delivery,
                    None,
                ),
            }
        }
    }
}

/// The ingress pipeline of §4.1: rate limit, platform detection, signature,
/// payload parsing, repository allow-list, then enqueue or fall through to
/// inline execution.
async fn accept_webhook(
    state: &ServerState,
    addr: SocketAddr,
    headers: &HeaderMap,
    body: &[u8],
    delivery: &str,
) -> Result<Ingress, WebhookError> {
    if let Some(limiter) = &state.rate_limiter {
        if let Err(retry_after) = limiter.check(addr.ip()) {
            return Err(WebhookError::RateLimited(retry_after));
        }
    }

    let platform = detect_platform(headers).ok_or_else(|| {
        WebhookError::UnsupportedEvent("cannot detect the sending platform".to_string())
    })?;
    verify_signature(platform, headers, body, &state.config)?;

    let Some(event) = parse_event(platform, headers, body, delivery)? else {
        return Ok(Ingress::Ignored);
    };
    if !state.config.is_repo_allowed(&event.repository) {
        return Err(WebhookError::DisallowedRepo(event.repository));
    }

    state.engine.metrics.record_event();
    tracing::info!(
        "Accepted {} event for {}#{} (delivery {})",
        event.platform,
        event.repository,
        event.pr_number,
        event.delivery_id,
    );

    let job = Job::new(event);
    if !state.config.async_processing {
        return Ok(Ingress::RunInline(job));
    }
    match state.queue.try_enqueue(job.clone()) {
        Ok(()) => Ok(Ingress::Enqueued),
        Err(EnqueueError::Full | EnqueueError::Closed) if state.config.sync_fallback => {
            tracing::warn!("Job queue saturated; running inline");
            Ok(Ingress::RunInline(job))
        }
        Err(_) => Err(WebhookError::QueueFull),
    }
}

fn webhook_error_response(error: WebhookError, delivery: &str) -> Response {
    match error {
        WebhookError::UnsupportedEvent(_) | WebhookError::MalformedPayload(_) => {
            error_response(StatusCode::BAD_REQUEST, &error.to_string(), delivery, None)
        }
        WebhookError::BadSignature => {
            error_response(StatusCode::UNAUTHORIZED, &error.to_string(), delivery, None)
        }
        WebhookError::DisallowedRepo(_) => {
            error_response(StatusCode::FORBIDDEN, &error.to_string(), delivery, None)
        }
        WebhookError::RateLimited(retry_after) => error_response(
            StatusCode::TOO_MANY_REQUESTS,
            "rate limited",
            delivery,
            Some(retry_after.as_secs().max(1)),
        ),
        WebhookError::QueueFull => error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            &error.to_string(),
            delivery,
            Some(5),
        ),
    }
}

/// Error replies carry the delivery ID so callers can correlate them with the
/// server logs.
fn error_response(
    status: StatusCode,
    message: &str,
    delivery: &str,
    retry_after: Option<u64>,
) -> Response {
    let body = Json(serde_json::json!({"error": message, "delivery_id": delivery}));
    match retry_after {
        Some(seconds) => (status, [("retry-after", seconds.to_string())], body).into_response(),
        None => (status, body).into_response(),
    }
}

/// Healthy means the queue still has headroom under its watermark.
async fn health_handler(State(state): State<ServerStateRef>) -> Response {
    let depth = state.queue.depth();
    if depth < state.queue.capacity() {
        (StatusCode::OK, Json(serde_json::json!({"status": "ok"}))).into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({"status": "saturated", "queue_depth": depth})),
        )
            .into_response()
    }
}

async fn metrics_handler(State(state): State<ServerStateRef>) -> Response {
    let body = state.engine.metrics.render(state.queue.depth());
    (StatusCode::OK, body).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    use axum::body::Body;
    use axum::http::Request;
    use hmac::Mac;
    use tower::util::ServiceExt;

    use crate::config::Secret;
    use crate::engine::process::start_workers;
    use crate::tests::mock::{test_config, test_engine_context_with, MockClient};

    const ISSUE_COMMENT: &str = r#"{
        "action": "created",
        "issue": {"number": 1, "pull_request": {}},
        "comment": {"id": 7, "user": {"login": "alice"}, "body": "/help"},
        "repository": {"name": "widget", "owner": {"login": "acme"}},
        "sender": {"login": "alice"}
    }"#;

    fn sign(secret: &str, body: &str) -> String {
        let mut mac =
            hmac::Hmac::<sha2::Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body.as_bytes());
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    fn request(body: &str, signature: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/webhook")
            .header("content-type", "application/json")
            .header("x-github-event", "issue_comment")
            .header("x-github-delivery", "delivery-1");
        if let Some(signature) = signature {
            builder = builder.header("x-hub-signature-256", signature);
        }
        let mut request = builder.body(Body::from(body.to_string())).unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 4000))));
        request
    }

    fn test_state(config: crate::config::Config) -> (ServerState, Arc<MockClient>) {
        let (engine, mock) = test_engine_context_with(config);
        let engine = Arc::new(engine);
        let (queue, _pool) = start_workers(engine.clone(), 16, 1);
        (
            ServerState::new(engine.config.clone(), engine, queue),
            mock,
        )
    }

    fn secured_config() -> crate::config::Config {
        crate::config::Config {
            webhook_secret: Some(Secret::new("hunter2".to_string())),
            allowed_repos: vec!["acme/*".to_string()],
            ..test_config()
        }
    }

    #[tokio::test]
    async fn valid_webhook_is_accepted() {
        let (state, _mock) = test_state(secured_config());
        let app = create_app(state);
        let response = app
            .oneshot(request(ISSUE_COMMENT, Some(&sign("hunter2", ISSUE_COMMENT))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn bad_signature_is_unauthorized() {
        let (state, _mock) = test_state(secured_config());
        let app = create_app(state);
        let response = app
            .oneshot(request(ISSUE_COMMENT, Some(&sign("wrong", ISSUE_COMMENT))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn missing_signature_is_unauthorized() {
        let (state, _mock) = test_state(secured_config());
        let app = create_app(state);
        let response = app.oneshot(request(ISSUE_COMMENT, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn disallowed_repo_is_forbidden() {
        let config = crate::config::Config {
            allowed_repos: vec!["other/*".to_string()],
            ..secured_config()
        };
        let (state, _mock) = test_state(config);
        let app = create_app(state);
        let response = app
            .oneshot(request(ISSUE_COMMENT, Some(&sign("hunter2", ISSUE_COMMENT))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn unsupported_event_is_bad_request() {
        let (state, _mock) = test_state(secured_config());
        let app = create_app(state);
        let body = r#"{"zen": "Design for failure."}"#;
        let mut request = request(body, Some(&sign("hunter2", body)));
        request
            .headers_mut()
            .insert("x-github-event", "ping".parse().unwrap());
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn rate_limit_replies_retry_after() {
        let config = crate::config::Config {
            rate_limit: crate::config::RateLimitConfig {
                enabled: true,
                rpm: 1,
            },
            ..secured_config()
        };
        let (state, _mock) = test_state(config);
        let app = create_app(state);
        let first = app
            .clone()
            .oneshot(request(ISSUE_COMMENT, Some(&sign("hunter2", ISSUE_COMMENT))))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::ACCEPTED);
        let second = app
            .oneshot(request(ISSUE_COMMENT, Some(&sign("hunter2", ISSUE_COMMENT))))
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(second.headers().contains_key("retry-after"));
    }

    #[tokio::test]
    async fn sync_processing_runs_inline() {
        let config = crate::config::Config {
            async_processing: false,
            ..secured_config()
        };
        let (state, mock) = test_state(config);
        mock.add_comment("alice", "/help");
        let app = create_app(state);
        let response = app
            .oneshot(request(ISSUE_COMMENT, Some(&sign("hunter2", ISSUE_COMMENT))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        // The help comment was posted before the response was sent.
        assert!(!mock.posted_comments().is_empty());
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let (state, _mock) = test_state(secured_config());
        let app = create_app(state);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn metrics_are_exported() {
        let (state, _mock) = test_state(secured_config());
        let app = create_app(state);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/metrics")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
