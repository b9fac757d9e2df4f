// SPDX-License-Identifier: MIT
//! HTTP surface: `/hello` plus a couple of actuator-style endpoints.
//!
//! Every request runs inside a server span whose OpenTelemetry status follows the
//! response: `OK` for 2xx, `ERROR` for anything else.
use std::net::SocketAddr;
use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use opentelemetry::metrics::Meter;
use rand::Rng;
use serde_json::json;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::field::Empty;
use tracing::{info, info_span, Instrument};

use crate::error::Result;
use crate::metrics::HelloMetrics;

const BEFORE_SPAN_MILLIS: RangeInclusive<u64> = 100..=150;
const DURING_SPAN_MILLIS: RangeInclusive<u64> = 150..=250;
const AFTER_SPAN_MILLIS: RangeInclusive<u64> = 50..=100;

#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    hello_count: AtomicU64,
    metrics: HelloMetrics,
    simulate_latency: bool,
    service_name: String,
    service_version: String,
}

impl AppState {
    pub fn new(
        meter: &Meter,
        simulate_latency: bool,
        service_name: impl Into<String>,
        service_version: impl Into<String>,
    ) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                hello_count: AtomicU64::new(0),
                metrics: HelloMetrics::new(meter),
                simulate_latency,
                service_name: service_name.into(),
                service_version: service_version.into(),
            }),
        }
    }

    /// Greeting for the `n`-th call, recording metrics and a child span on the way.
    pub async fn hello(&self) -> String {
        let count = self.inner.hello_count.fetch_add(1, Ordering::SeqCst) + 1;
        let direction = if rand::random::<bool>() { 1 } else { -1 };
        self.inner.metrics.record_request(direction);

        self.pause(BEFORE_SPAN_MILLIS).await;
        let span = info_span!(
            "hello.observation",
            foo = "observation",
            hello = "Is it me you're looking for?"
        );
        async {
            let reading = rand::thread_rng().gen_range(0..100);
            self.inner.metrics.record_gauge(reading);
            self.pause(DURING_SPAN_MILLIS).await;
            info!("Hello OpenTelemetry {count}!");
        }
        .instrument(span)
        .await;
        self.pause(AFTER_SPAN_MILLIS).await;

        format!("Hello OpenTelemetry {count}!")
    }

    async fn pause(&self, millis: RangeInclusive<u64>) {
        if !self.inner.simulate_latency {
            return;
        }
        let millis = rand::thread_rng().gen_range(millis);
        tokio::time::sleep(Duration::from_millis(millis)).await;
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/hello", get(hello))
        .route("/actuator/health", get(health))
        .route("/actuator/info", get(info_endpoint))
        .layer(middleware::from_fn(trace_request))
        .with_state(state)
}

/// Serve `router(state)` on `listener` until `shutdown` fires.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: CancellationToken,
) -> Result<()> {
    let addr: Option<SocketAddr> = listener.local_addr().ok();
    info!(addr = ?addr, "http server listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
        })
        .await?;
    info!("http server stopped");
    Ok(())
}

/// OpenTelemetry status code for an HTTP response status.
pub fn span_status(status: StatusCode) -> &'static str {
    if status.is_success() {
        "OK"
    } else {
        "ERROR"
    }
}

async fn trace_request(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let span = info_span!(
        "http.request",
        otel.name = %format!("{method} {path}"),
        otel.kind = "server",
        http.request.method = %method,
        url.path = %path,
        http.response.status_code = Empty,
        otel.status_code = Empty,
    );

    let response = next.run(request).instrument(span.clone()).await;
    let status = response.status();
    span.record("http.response.status_code", status.as_u16());
    span.record("otel.status_code", span_status(status));
    response
}

async fn hello(State(state): State<AppState>) -> String {
    state.hello().await
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({ "status": "UP" })))
}

async fn info_endpoint(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "app": {
            "name": state.inner.service_name,
            "version": state.inner.service_version,
        }
    }))
}
