// SPDX-License-Identifier: MIT
//! End-to-end check against real containers. Needs a local Docker daemon:
//!
//! ```text
//! cargo test --test telemetry_stack -- --ignored --nocapture
//! ```
use std::time::Duration;

use opentelemetry::global;
use otel_demo::containers::stack::TelemetryStack;
use otel_demo::http::{self, AppState};
use otel_demo::metrics::METER_NAME;
use otel_demo::poll::{http_get, poll_http_get};
use otel_demo::telemetry::init_telemetry;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

#[tokio::test(flavor = "multi_thread")]
#[ignore = "starts Docker containers"]
async fn hello_metrics_reach_prometheus() -> anyhow::Result<()> {
    let stack = TelemetryStack::shared().await?;
    println!("{}", stack.urls().join("\n"));

    let telemetry = init_telemetry(stack.telemetry_config("otel-demo-it")?)?;
    let state = AppState::new(
        &global::meter(METER_NAME),
        false,
        "otel-demo-it",
        env!("CARGO_PKG_VERSION"),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let base = format!("http://{}", listener.local_addr()?);
    let shutdown = CancellationToken::new();
    let server = tokio::spawn(http::serve(listener, state, shutdown.clone()));

    let client = reqwest::Client::new();
    let health = poll_http_get(
        &client,
        "HEALTH",
        &format!("{base}/actuator/health"),
        r#""status":"UP""#,
        Duration::from_secs(2),
        Duration::from_millis(100),
    )
    .await;
    assert!(health.contains(r#""status":"UP""#), "{health}");

    let hello = http_get(&client, &format!("{base}/hello")).await?;
    assert_eq!(hello, "Hello OpenTelemetry 1!");

    // Pushed every two seconds; Prometheus inside LGTM exposes the counter as `hello_total`.
    let query = format!("{}/api/v1/query?query=hello_total", stack.prometheus_url()?);
    let metrics = poll_http_get(
        &client,
        "PROMETHEUS",
        &query,
        "hello_total",
        Duration::from_secs(30),
        Duration::from_secs(1),
    )
    .await;
    assert!(metrics.contains("hello_total"), "{metrics}");

    let collector = poll_http_get(
        &client,
        "OTEL-COLLECTOR",
        &stack.collector_metrics_url()?,
        "otelcol_",
        Duration::from_secs(5),
        Duration::from_millis(500),
    )
    .await;
    assert!(collector.contains("otelcol_"), "{collector}");

    shutdown.cancel();
    server.await??;
    let _ = telemetry.shutdown();
    stack.shutdown().await?;
    Ok(())
}
