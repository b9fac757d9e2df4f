// SPDX-License-Identifier: MIT
//! The telemetry backend integration tests export to.
//!
//! Two container groups are started one after the other, each under its own 45 second
//! budget:
//!
//! 1. `grafana/otel-lgtm` (Grafana, Loki, Tempo, Prometheus behind an OTLP endpoint);
//! 2. an OpenTelemetry Collector whose exporters point at the host ports LGTM was
//!    published on, which are only known once group 1 is up.
//!
//! [`TelemetryStack::shared`] starts the stack at most once per process.
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tempfile::NamedTempFile;
use tokio::sync::OnceCell;
use tracing::{info, warn};

use crate::containers::collector_config::{CollectorConfig, DOCKER_HOST};
use crate::containers::{
    launch, prefix_all_lines, ContainerRuntime, ContainerSpec, DockerCli, RunningContainer,
    WaitStrategy,
};
use crate::error::{Error, Result};
use crate::readiness::{await_ready, Readiness, ReadinessError, StartupTask};
use crate::telemetry::TelemetryConfig;

pub const LGTM_IMAGE: &str = "grafana/otel-lgtm:latest";
/// Grafana, OTLP gRPC, OTLP HTTP, Tempo, Prometheus.
pub const LGTM_PORTS: [u16; 5] = [3000, 4317, 4318, 3200, 9090];
pub const LGTM_READY_MESSAGE: &str =
    "The OpenTelemetry collector and the Grafana LGTM stack are up and running";

pub const COLLECTOR_IMAGE: &str = "otel/opentelemetry-collector-contrib:latest";
/// OTLP gRPC, OTLP HTTP, own metrics, pprof, zpages.
pub const COLLECTOR_PORTS: [u16; 5] = [4317, 4318, 8888, 1777, 55679];
pub const COLLECTOR_READY_MESSAGE: &str = "Everything is ready. Begin running and processing data.";
const COLLECTOR_CONFIG_PATH: &str = "/etc/otelcol-contrib/config.yaml";

pub const STARTUP_BUDGET: Duration = Duration::from_secs(45);
/// Metric export interval for applications under test; the default minute is too slow.
pub const METRIC_EXPORT_INTERVAL: Duration = Duration::from_secs(2);

const OTLP_HTTP_PORT: u16 = 4318;

static SHARED: OnceCell<TelemetryStack> = OnceCell::const_new();

pub struct TelemetryStack {
    runtime: Arc<dyn ContainerRuntime>,
    lgtm: RunningContainer,
    collector: RunningContainer,
    _collector_config: NamedTempFile,
}

impl TelemetryStack {
    /// The process-wide stack on the local Docker daemon, started on first use.
    pub async fn shared() -> Result<&'static TelemetryStack> {
        SHARED
            .get_or_try_init(|| async {
                info!("starting shared telemetry stack");
                Self::start(Arc::new(DockerCli::default())).await
            })
            .await
    }

    /// Start LGTM, then a collector configured to forward to it.
    ///
    /// Once both groups are up, every container is asked again whether it still runs;
    /// LGTM may have died while the collector was starting.
    pub async fn start(runtime: Arc<dyn ContainerRuntime>) -> Result<Self> {
        let mut group = vec![launch(runtime.clone(), lgtm_spec())];
        await_ready(&mut group, STARTUP_BUDGET).await?;
        let mut lgtm = take_published(&group)?;
        info!(image = %lgtm.image, ports = %lgtm.ports, "lgtm mapped ports");

        let (mut collector, collector_config) =
            match Self::start_collector(runtime.clone(), &lgtm).await {
                Ok(started) => started,
                Err(err) => {
                    remove_all(runtime.as_ref(), [&lgtm]).await;
                    return Err(err);
                }
            };

        if let Err(err) = confirm_running(runtime.as_ref(), [&mut lgtm, &mut collector]).await {
            remove_all(runtime.as_ref(), [&lgtm, &collector]).await;
            return Err(err);
        }

        Ok(Self {
            runtime,
            lgtm,
            collector,
            _collector_config: collector_config,
        })
    }

    async fn start_collector(
        runtime: Arc<dyn ContainerRuntime>,
        lgtm: &RunningContainer,
    ) -> Result<(RunningContainer, NamedTempFile)> {
        let mut config = CollectorConfig::template()?;
        let redirected = config.redirect(DOCKER_HOST, &lgtm.ports);
        let file = config.write_temp()?;
        info!(
            redirected,
            "collector config:\n{}",
            prefix_all_lines("otel-collector.yaml", &config.to_yaml_string()?)
        );

        let mut group = vec![launch(runtime, collector_spec(file.path()))];
        await_ready(&mut group, STARTUP_BUDGET).await?;
        let collector = take_published(&group)?;
        info!(image = %collector.image, ports = %collector.ports, "collector mapped ports");
        Ok((collector, file))
    }

    pub fn lgtm(&self) -> &RunningContainer {
        &self.lgtm
    }

    pub fn collector(&self) -> &RunningContainer {
        &self.collector
    }

    /// Base OTLP/HTTP endpoint of the LGTM stack, as seen from the host.
    pub fn otlp_http_endpoint(&self) -> Result<String> {
        Ok(format!(
            "http://localhost:{}",
            self.lgtm.mapped_port(OTLP_HTTP_PORT)?
        ))
    }

    /// Prometheus inside LGTM.
    pub fn prometheus_url(&self) -> Result<String> {
        Ok(format!("http://localhost:{}", self.lgtm.mapped_port(9090)?))
    }

    /// The collector's own metrics in Prometheus text format.
    pub fn collector_metrics_url(&self) -> Result<String> {
        Ok(format!(
            "http://localhost:{}/metrics",
            self.collector.mapped_port(8888)?
        ))
    }

    /// Telemetry settings that send traces, metrics and logs straight to LGTM.
    pub fn telemetry_config(&self, service_name: &str) -> Result<TelemetryConfig> {
        let mut config = TelemetryConfig::from_lookup(|_: &str| None);
        config.endpoint = self.otlp_http_endpoint()?;
        config.service_name = service_name.to_string();
        config.metric_export_interval = METRIC_EXPORT_INTERVAL;
        Ok(config)
    }

    /// One `<alias> <port> => http://localhost:<mapped>/` line per published port.
    pub fn urls(&self) -> Vec<String> {
        [&self.collector, &self.lgtm]
            .into_iter()
            .flat_map(|container| {
                container
                    .ports
                    .urls()
                    .into_iter()
                    .map(move |url| format!("{} {url}", container.alias))
            })
            .collect()
    }

    /// Dump every container's logs, then remove the containers that still run.
    pub async fn shutdown(&self) -> Result<()> {
        let containers = [&self.lgtm, &self.collector];
        for container in containers {
            match self.runtime.logs(&container.id).await {
                // Stdout, the tracing pipeline may already be shut down.
                Ok(logs) => println!("{}", prefix_all_lines(&container.image, &logs)),
                Err(err) => warn!(image = %container.image, error = %err, "failed to read logs"),
            }
        }

        let mut failures = Vec::new();
        for container in containers {
            match self.runtime.is_running(&container.id).await {
                Ok(false) => info!(image = %container.image, "container not running"),
                Ok(true) | Err(_) => {
                    info!(image = %container.image, "container stopping");
                    match self.runtime.stop(&container.id).await {
                        Ok(()) => info!(image = %container.image, "container stopped"),
                        Err(err) => failures.push(format!("{}: {err}", container.image)),
                    }
                }
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::msg(format!(
                "failed to stop containers: {}",
                failures.join("; ")
            )))
        }
    }
}

fn lgtm_spec() -> ContainerSpec {
    ContainerSpec::new(LGTM_IMAGE, "grafana-1")
        .with_exposed_ports(&LGTM_PORTS)
        .with_env("GF_SECURITY_ADMIN_USER", "admin")
        .with_env("GF_SECURITY_ADMIN_PASSWORD", "admin")
        .waiting_for(WaitStrategy::LogMessage(LGTM_READY_MESSAGE.into()))
}

fn collector_spec(config: &Path) -> ContainerSpec {
    ContainerSpec::new(COLLECTOR_IMAGE, "otel-1")
        .with_exposed_ports(&COLLECTOR_PORTS)
        .with_read_only_bind(config, COLLECTOR_CONFIG_PATH)
        .with_extra_host(DOCKER_HOST, "host-gateway")
        .waiting_for(WaitStrategy::LogMessage(COLLECTOR_READY_MESSAGE.into()))
}

async fn confirm_running<const N: usize>(
    runtime: &dyn ContainerRuntime,
    containers: [&mut RunningContainer; N],
) -> Result<()> {
    for container in containers {
        container.refresh(runtime).await?;
        if !container.is_ready() {
            warn!(image = %container.image, id = %container.id, "container no longer running");
            return Err(ReadinessError::NotReady {
                task: container.image.clone(),
            }
            .into());
        }
    }
    Ok(())
}

async fn remove_all<const N: usize>(
    runtime: &dyn ContainerRuntime,
    containers: [&RunningContainer; N],
) {
    for container in containers {
        if let Err(err) = runtime.stop(&container.id).await {
            warn!(
                image = %container.image,
                id = %container.id,
                error = %err,
                "failed to remove container"
            );
        }
    }
}

fn take_published(group: &[StartupTask<RunningContainer>]) -> Result<RunningContainer> {
    let task = group
        .first()
        .ok_or_else(|| Error::msg("empty container group"))?;
    task.published()
        .cloned()
        .ok_or_else(|| {
            ReadinessError::Missing {
                task: task.name().to_string(),
            }
            .into()
        })
}
