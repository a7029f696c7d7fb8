//! LDAP username/password authentication provider.
//!
//! A [`LdapAuthenticator`] binds to the directory as the user, optionally
//! searches for the user's entry, and returns a [`Principal`] carrying the
//! captured attributes.

#![forbid(unsafe_code)]

pub mod attributes;
pub mod authenticator;
pub mod config;
pub mod directory;
pub mod error;
pub mod principal;
pub mod query;
mod router;
pub mod telemetry;

pub use authenticator::LdapAuthenticator;
pub use config::{Configuration, LdapOptions};
pub use error::{Result, ServerError};
pub use principal::{Credentials, Principal};

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::http::{StatusCode, header};
use axum::routing::{get, post};
use axum::{Router, middleware as AxumMiddleware};
use directory::{Directory, LdapDirectory};
use metrics_exporter_prometheus::PrometheusHandle;
use tower::ServiceBuilder;
use tower_http::LatencyUnit;
use tower_http::sensitive_headers::SetSensitiveHeadersLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{
    DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer,
};

/// MUST NEVER be used in production.
#[cfg(test)]
pub async fn make_request(
    app: Router,
    method: axum::http::Method,
    path: &str,
    body: String,
) -> axum::http::Response<axum::body::Body> {
    use axum::extract::Request;
    use tower::util::ServiceExt;

    app.oneshot(
        Request::builder()
            .method(method)
            .uri(path)
            .header(header::CONTENT_TYPE, "application/json")
            .body(axum::body::Body::from(body))
            .unwrap(),
    )
    .await
    .unwrap()
}

/// State sharing between routes.
pub struct AppState<D: Directory = LdapDirectory> {
    pub config: Arc<Configuration>,
    pub auth: LdapAuthenticator<D>,
    pub metrics: Option<PrometheusHandle>,
}

impl<D: Directory> Clone for AppState<D> {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            auth: self.auth.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

/// Create router.
pub fn app<D: Directory>(state: AppState<D>) -> Router {
    let middleware = ServiceBuilder::new()
        // Add high level tracing/logging to all requests.
        .layer(
            TraceLayer::new_for_http()
                .on_body_chunk(|chunk: &Bytes, latency: Duration, _span: &tracing::Span| {
                    tracing::trace!(size_bytes = chunk.len(), latency = ?latency, "sending body chunk")
                })
                .make_span_with(DefaultMakeSpan::new().include_headers(true).level(tracing::Level::INFO))
                .on_request(DefaultOnRequest::new())
                .on_response(DefaultOnResponse::new().include_headers(true).latency_unit(LatencyUnit::Micros)),
        )
        // Set a timeout.
        .layer(TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, Duration::from_secs(10)))
        // Remove senstive headers from trace.
        .layer(SetSensitiveHeadersLayer::new([header::AUTHORIZATION, header::COOKIE]));

    Router::new()
        // `GET /status.json` goes to `status`.
        .route("/status.json", get(router::status::status))
        // `POST /login` goes to `login`.
        .route("/login", post(router::login::handler::<D>))
        .route("/metrics", get(router::metrics::<D>))
        .with_state(state)
        .route_layer(AxumMiddleware::from_fn(telemetry::track))
        .layer(middleware)
}

/// Initialize the application state.
pub fn initialize_state(
    config: Arc<Configuration>,
    metrics: Option<PrometheusHandle>,
) -> Result<AppState> {
    let auth = LdapAuthenticator::new(config.ldap.clone())?
        .max_concurrency(config.max_concurrency)?;

    tracing::info!(
        url = %config.ldap.url,
        filter = config.ldap.filter_query.is_some(),
        "directory authentication ready"
    );

    Ok(AppState {
        config,
        auth,
        metrics,
    })
}
