// SPDX-License-Identifier: MIT
use std::sync::Arc;

use anyhow::{Context, Result};
use opentelemetry::global;
use otel_demo::config::AppConfig;
use otel_demo::generator::TelemetryGenerator;
use otel_demo::http::{self, AppState};
use otel_demo::metrics::METER_NAME;
use otel_demo::recorder::{RandomSensor, TemperatureRecorder};
use otel_demo::repository::InMemoryRepository;
use otel_demo::service::TemperatureService;
use otel_demo::telemetry::init_telemetry;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::from_env().context("invalid configuration")?;
    let telemetry = init_telemetry(config.telemetry.clone())?;
    info!(listen = %config.listen, "application started");

    let meter = global::meter(METER_NAME);
    let shutdown = CancellationToken::new();

    let service = TemperatureService::new(Arc::new(InMemoryRepository::new()));
    let recorder = TemperatureRecorder::new(&meter, Arc::new(RandomSensor), service);
    let recorder_task = tokio::spawn(recorder.run(config.recorder_interval, shutdown.clone()));

    let state = AppState::new(
        &meter,
        config.simulate_latency,
        config.telemetry.service_name.clone(),
        config.telemetry.service_version.clone(),
    );

    let generator_loops = if config.generate {
        info!("synthetic telemetry enabled");
        TelemetryGenerator::new(&meter, &config.instruments)
            .with_hello(state.clone())
            .spawn(shutdown.clone())
    } else {
        Vec::new()
    };

    let ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
        }
        ctrl_c.cancel();
    });

    let listener = TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("failed to bind {}", config.listen))?;
    if let Err(err) = http::serve(listener, state, shutdown.clone()).await {
        error!(error = %err, "http server failed");
    }
    shutdown.cancel();

    if let Err(err) = recorder_task.await {
        error!(error = %err, "recorder task failed");
    }
    for handle in generator_loops {
        match handle.await {
            Ok(iterations) => info!(iterations, "generator loop stopped"),
            Err(err) => error!(error = %err, "generator loop failed"),
        }
    }

    info!("shutting down");
    telemetry.shutdown()?;
    Ok(())
}
