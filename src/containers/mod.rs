// SPDX-License-Identifier: MIT
//! Throwaway Docker containers for integration tests.
//!
//! A [`ContainerSpec`] describes what to run; a [`ContainerRuntime`] runs it. The
//! production runtime is [`DockerCli`], which shells out to the `docker` binary.
//! [`launch`] wraps the start-and-wait sequence in a [`StartupTask`] so container
//! groups can be brought up under a shared deadline with [`crate::readiness::await_ready`].
pub mod collector_config;
pub mod stack;

use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::process::{Output, Stdio};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::readiness::{Readiness, StartupTask};

/// Label attached to every container started here, value is the alias.
pub const ALIAS_LABEL: &str = "otel-demo.alias";

const READY_POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{command}` exited with {status}: {stderr}")]
    Command {
        command: String,
        status: String,
        stderr: String,
    },
    #[error("port {port} of container {id} is not published")]
    UnmappedPort { id: String, port: u16 },
    #[error("container {id} ({image}) exited before becoming ready")]
    Exited { id: String, image: String },
    #[error("start of {image} was cancelled")]
    Cancelled { image: String },
}

/// How to decide that a started container is usable.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WaitStrategy {
    /// The container's combined output contains this text.
    LogMessage(String),
    /// Every published port accepts TCP connections on the host.
    ListeningPort,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContainerSpec {
    pub image: String,
    pub alias: String,
    pub exposed_ports: Vec<u16>,
    pub env: BTreeMap<String, String>,
    /// Read-only bind mounts, host path to container path.
    pub binds: Vec<(PathBuf, String)>,
    /// `hostname:address` entries added to the container's `/etc/hosts`.
    pub extra_hosts: Vec<(String, String)>,
    pub wait: WaitStrategy,
}

impl ContainerSpec {
    pub fn new(image: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            alias: alias.into(),
            exposed_ports: Vec::new(),
            env: BTreeMap::new(),
            binds: Vec::new(),
            extra_hosts: Vec::new(),
            wait: WaitStrategy::ListeningPort,
        }
    }

    pub fn with_exposed_ports(mut self, ports: &[u16]) -> Self {
        self.exposed_ports.extend_from_slice(ports);
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_read_only_bind(
        mut self,
        host: impl Into<PathBuf>,
        container: impl Into<String>,
    ) -> Self {
        self.binds.push((host.into(), container.into()));
        self
    }

    pub fn with_extra_host(mut self, host: impl Into<String>, address: impl Into<String>) -> Self {
        self.extra_hosts.push((host.into(), address.into()));
        self
    }

    pub fn waiting_for(mut self, wait: WaitStrategy) -> Self {
        self.wait = wait;
        self
    }
}

/// Container ports and the host ports they are published on, ordered by container port.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MappedPorts(BTreeMap<u16, u16>);

impl MappedPorts {
    pub fn insert(&mut self, internal: u16, host: u16) {
        self.0.insert(internal, host);
    }

    pub fn get(&self, internal: u16) -> Option<u16> {
        self.0.get(&internal).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u16, u16)> + '_ {
        self.0.iter().map(|(&internal, &host)| (internal, host))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// `internal => http://localhost:<host>/`, one entry per port.
    pub fn urls(&self) -> Vec<String> {
        self.iter()
            .map(|(internal, host)| format!("{internal} => http://localhost:{host}/"))
            .collect()
    }
}

impl FromIterator<(u16, u16)> for MappedPorts {
    fn from_iter<I: IntoIterator<Item = (u16, u16)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for MappedPorts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (index, (internal, host)) in self.iter().enumerate() {
            if index > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{internal}=>{host}")?;
        }
        f.write_str("}")
    }
}

/// A started container, as published by a [`launch`] task.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunningContainer {
    pub id: String,
    pub image: String,
    pub alias: String,
    pub ports: MappedPorts,
    pub running: bool,
}

impl RunningContainer {
    pub fn mapped_port(&self, internal: u16) -> Result<u16, ContainerError> {
        self.ports
            .get(internal)
            .ok_or_else(|| ContainerError::UnmappedPort {
                id: self.id.clone(),
                port: internal,
            })
    }

    /// Re-read the running state from `runtime`; [`Readiness::is_ready`] reports it.
    pub async fn refresh(
        &mut self,
        runtime: &dyn ContainerRuntime,
    ) -> Result<(), ContainerError> {
        self.running = runtime.is_running(&self.id).await?;
        Ok(())
    }
}

impl Readiness for RunningContainer {
    fn is_ready(&self) -> bool {
        self.running
    }
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Create and start a detached container, returning its id.
    async fn start(&self, spec: &ContainerSpec) -> Result<String, ContainerError>;

    /// Host port that container port `port` is published on.
    async fn mapped_port(&self, id: &str, port: u16) -> Result<u16, ContainerError>;

    async fn is_running(&self, id: &str) -> Result<bool, ContainerError>;

    /// Everything the container wrote to stdout and stderr so far.
    async fn logs(&self, id: &str) -> Result<String, ContainerError>;

    /// Stop and remove the container.
    async fn stop(&self, id: &str) -> Result<(), ContainerError>;

    async fn port_accepts(&self, host_port: u16) -> bool {
        tokio::net::TcpStream::connect((Ipv4Addr::LOCALHOST, host_port))
            .await
            .is_ok()
    }
}

/// [`ContainerRuntime`] backed by the `docker` command line client.
#[derive(Clone, Debug)]
pub struct DockerCli {
    binary: String,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new("docker")
    }
}

impl DockerCli {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    async fn exec(&self, args: &[String]) -> Result<Output, ContainerError> {
        let command = format!("{} {}", self.binary, args.join(" "));
        debug!(%command, "running container command");
        let output = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| ContainerError::Spawn {
                command: command.clone(),
                source,
            })?;
        if !output.status.success() {
            return Err(ContainerError::Command {
                command,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output)
    }

    async fn run(&self, args: &[String]) -> Result<String, ContainerError> {
        let output = self.exec(args).await?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn start(&self, spec: &ContainerSpec) -> Result<String, ContainerError> {
        self.run(&run_args(spec)).await
    }

    async fn mapped_port(&self, id: &str, port: u16) -> Result<u16, ContainerError> {
        let output = self
            .run(&["port".into(), id.into(), format!("{port}/tcp")])
            .await?;
        parse_port_output(&output).ok_or_else(|| ContainerError::UnmappedPort {
            id: id.to_string(),
            port,
        })
    }

    async fn is_running(&self, id: &str) -> Result<bool, ContainerError> {
        let output = self
            .run(&[
                "inspect".into(),
                "--format".into(),
                "{{.State.Running}}".into(),
                id.into(),
            ])
            .await?;
        Ok(output == "true")
    }

    async fn logs(&self, id: &str) -> Result<String, ContainerError> {
        let output = self.exec(&["logs".into(), id.into()]).await?;
        let mut logs = String::from_utf8_lossy(&output.stdout).into_owned();
        logs.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(logs)
    }

    async fn stop(&self, id: &str) -> Result<(), ContainerError> {
        self.run(&["rm".into(), "--force".into(), id.into()])
            .await
            .map(|_| ())
    }
}

/// Arguments for `docker run` that start `spec` detached with every port published.
pub fn run_args(spec: &ContainerSpec) -> Vec<String> {
    let mut args = vec![
        "run".to_string(),
        "--detach".to_string(),
        "--label".to_string(),
        format!("{ALIAS_LABEL}={}", spec.alias),
    ];
    for port in &spec.exposed_ports {
        args.push("--publish".into());
        args.push(port.to_string());
    }
    for (key, value) in &spec.env {
        args.push("--env".into());
        args.push(format!("{key}={value}"));
    }
    for (host, container) in &spec.binds {
        args.push("--volume".into());
        args.push(format!("{}:{container}:ro", host.display()));
    }
    for (host, address) in &spec.extra_hosts {
        args.push("--add-host".into());
        args.push(format!("{host}:{address}"));
    }
    args.push(spec.image.clone());
    args
}

/// Host port from `docker port` output such as `0.0.0.0:49153` or `[::]:49153`.
pub fn parse_port_output(output: &str) -> Option<u16> {
    output
        .lines()
        .filter_map(|line| line.trim().rsplit_once(':'))
        .find_map(|(_, port)| port.parse().ok())
}

/// Prefix every line of `content` with `prefix>>> `.
pub fn prefix_all_lines(prefix: &str, content: &str) -> String {
    content
        .lines()
        .map(|line| format!("{prefix}>>> {line}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Start `spec` on `runtime` as a startup task named after the image.
///
/// The task publishes the [`RunningContainer`] once the wait strategy is met. If it
/// is cancelled or the container fails to become ready, the container is removed.
pub fn launch(
    runtime: Arc<dyn ContainerRuntime>,
    spec: ContainerSpec,
) -> StartupTask<RunningContainer> {
    StartupTask::spawn(spec.image.clone(), move |cancel| async move {
        start_and_wait(runtime.as_ref(), &spec, &cancel).await
    })
}

async fn start_and_wait(
    runtime: &dyn ContainerRuntime,
    spec: &ContainerSpec,
    cancel: &CancellationToken,
) -> Result<RunningContainer, ContainerError> {
    let started = Instant::now();
    let cancelled = || ContainerError::Cancelled {
        image: spec.image.clone(),
    };

    let id = tokio::select! {
        _ = cancel.cancelled() => return Err(cancelled()),
        id = runtime.start(spec) => id?,
    };
    info!(image = %spec.image, alias = %spec.alias, %id, "container created");

    let outcome = tokio::select! {
        _ = cancel.cancelled() => Err(cancelled()),
        ready = wait_until_ready(runtime, &id, spec) => ready,
    };

    match outcome {
        Ok(container) => {
            info!(
                image = %spec.image,
                elapsed = ?started.elapsed(),
                ports = %container.ports,
                "container started"
            );
            Ok(container)
        }
        Err(err) => {
            warn!(image = %spec.image, %id, error = %err, "removing container");
            if let Err(stop_err) = runtime.stop(&id).await {
                warn!(image = %spec.image, %id, error = %stop_err, "failed to remove container");
            }
            Err(err)
        }
    }
}

async fn wait_until_ready(
    runtime: &dyn ContainerRuntime,
    id: &str,
    spec: &ContainerSpec,
) -> Result<RunningContainer, ContainerError> {
    let mut ports = MappedPorts::default();
    for &port in &spec.exposed_ports {
        ports.insert(port, runtime.mapped_port(id, port).await?);
    }

    loop {
        let running = runtime.is_running(id).await?;
        if !running {
            return Err(ContainerError::Exited {
                id: id.to_string(),
                image: spec.image.clone(),
            });
        }

        let ready = match &spec.wait {
            WaitStrategy::LogMessage(message) => runtime.logs(id).await?.contains(message),
            WaitStrategy::ListeningPort => {
                let mut all = true;
                for (_, host) in ports.iter() {
                    if !runtime.port_accepts(host).await {
                        all = false;
                        break;
                    }
                }
                all
            }
        };
        if ready {
            return Ok(RunningContainer {
                id: id.to_string(),
                image: spec.image.clone(),
                alias: spec.alias.clone(),
                ports,
                running,
            });
        }
        tokio::time::sleep(READY_POLL_INTERVAL).await;
    }
}
