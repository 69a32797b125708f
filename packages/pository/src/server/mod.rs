pub mod apt;
pub mod health;
pub mod keys;
pub mod pkg;

use std::{any::Any, net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    BoxError, Router,
    error_handling::HandleErrorLayer,
    extract::{ConnectInfo, DefaultBodyLimit, FromRef, Request, State},
    handler::Handler,
    http::HeaderValue,
    middleware::Next,
    response::{IntoResponse, Response},
    routing::get,
};
use http::StatusCode;
use tokio::time::Instant;
use tower::ServiceBuilder;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{Any as AnyOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

use crate::{
    api::{ErrorResponse, RequestIdentity},
    auth::{KeyStore, OidcVerifier},
    config::Config,
    events::EventBus,
    metrics::Metrics,
    storage::Storage,
};

#[derive(Clone, FromRef)]
pub struct ServerState {
    pub config: Arc<Config>,
    pub storage: Arc<Storage>,
    pub keys: Arc<KeyStore>,
    pub oidc: Option<Arc<OidcVerifier>>,
    pub metrics: Arc<Metrics>,
    pub events: Arc<EventBus>,
}

pub fn new(state: ServerState) -> Router {
    let api = Router::new()
        .route(
            "/packages",
            get(pkg::list::handler)
                .post(pkg::upload::handler.layer(DefaultBodyLimit::disable())),
        )
        .route(
            "/packages/{repo}/{distribution}/{component}/{architecture}/{name}/{version}",
            get(pkg::info::handler).delete(pkg::delete::handler),
        )
        .route(
            "/keys",
            get(keys::list_handler).post(keys::create_handler),
        )
        .route("/keys/{id}", axum::routing::delete(keys::delete_handler));

    let apt = Router::new()
        .route(
            "/{repo}/dists/{distribution}/Release",
            get(apt::release_handler),
        )
        .route(
            "/{repo}/dists/{distribution}/{component}/{binary}/Packages",
            get(apt::packages_handler),
        )
        .route(
            "/{repo}/pool/{distribution}/{component}/{architecture}/{filename}",
            get(apt::pool_handler),
        );

    // `normalize_errors` converts handler and router errors to
    // `ErrorResponse`; `handle_middleware_error` covers the middleware stack
    // and `handle_panic` anything that unwinds. The tracking middleware sits
    // outermost so panics and timeouts still count.
    Router::new()
        .nest("/api/v1", api)
        .nest("/apt", apt)
        .route(
            "/repo/{distribution}/{component}/{architecture}/{filename}",
            get(pkg::download::handler),
        )
        .route("/healthz", get(health::healthz))
        .route("/readyz", get(health::readyz))
        .route("/metrics", get(health::metrics_handler))
        .layer(axum::middleware::from_fn(normalize_errors))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CatchPanicLayer::custom(handle_panic))
                .layer(HandleErrorLayer::new(handle_middleware_error))
                .timeout(Duration::from_secs(600)),
        )
        .layer(cors_layer(&state.config))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            track_requests,
        ))
        .with_state(state)
}

fn cors_layer(config: &Config) -> CorsLayer {
    if config.cors_origins.iter().any(|origin| origin == "*") {
        return CorsLayer::new()
            .allow_origin(AnyOrigin)
            .allow_methods(AnyOrigin)
            .allow_headers(AnyOrigin);
    }
    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(AnyOrigin)
        .allow_headers(AnyOrigin)
}

/// Request-completion hook: update the metrics registry and write the JSON
/// access log line.
async fn track_requests(
    State(state): State<ServerState>,
    mut request: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let url = request.uri().to_string();
    let ip = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip().to_string());
    let identity = RequestIdentity::default();
    request.extensions_mut().insert(identity.clone());

    let response = next.run(request).await;

    let latency_ms = start.elapsed().as_millis() as u64;
    let status = response.status().as_u16();
    state
        .metrics
        .observe_request(method.as_str(), status, latency_ms);
    info!(
        target: "access",
        method = %method,
        url = %url,
        status,
        latency_ms,
        ip = ip.as_deref().unwrap_or("-"),
        key_id = identity.get().as_deref().unwrap_or(""),
    );
    response
}

/// Largest axum rejection body worth echoing back as an error detail.
const MAX_ERROR_DETAIL_BYTES: usize = 16 * 1024;

/// Reshape axum's own rejections (unknown routes, method mismatches, bad
/// path or body extractors) into the `{error, detail?}` contract. Those come
/// back as bare text; anything already JSON went through `ErrorResponse` and
/// is left alone.
async fn normalize_errors(request: Request, next: Next) -> Response {
    let uri = request.uri().to_string();
    let response = next.run(request).await;
    let status = response.status();
    if !(status.is_client_error() || status.is_server_error()) {
        return response;
    }
    let already_json = response
        .headers()
        .get(http::header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("application/json"));
    if already_json {
        return response;
    }

    let code = match status {
        StatusCode::NOT_FOUND => "ROUTE_NOT_FOUND",
        StatusCode::METHOD_NOT_ALLOWED => "METHOD_NOT_ALLOWED",
        status if status.is_client_error() => "CLIENT_ERROR",
        _ => "SERVER_ERROR",
    };
    let detail = match axum::body::to_bytes(response.into_body(), MAX_ERROR_DETAIL_BYTES).await {
        Ok(bytes) if !bytes.is_empty() => String::from_utf8_lossy(&bytes).trim().to_string(),
        _ => format!("{status} for {uri}"),
    };
    ErrorResponse::new(status, code, detail).into_response()
}

fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let details = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        String::from("unknown panic message")
    };
    tracing::error!(details, "handler panicked");
    ErrorResponse::internal().into_response()
}

async fn handle_middleware_error(err: BoxError) -> ErrorResponse {
    tracing::error!(%err, "middleware error");
    ErrorResponse::internal()
}
