// SPDX-License-Identifier: MIT
//! Typed view of the collector configuration file.
//!
//! Only the exporter endpoints are modelled; every other section is carried through
//! as raw YAML so the template can use any collector component without code changes.
use std::collections::BTreeMap;
use std::io::Write;

use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use tempfile::NamedTempFile;
use tracing::{debug, info};
use url::Url;

use crate::containers::MappedPorts;
use crate::error::Result;

/// Collector configuration shipped with the crate.
pub const TEMPLATE: &str = include_str!("../../config/otel-collector.yaml");

/// Host name containers use to reach ports published on the Docker host.
pub const DOCKER_HOST: &str = "host.docker.internal";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CollectorConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Value>,
    pub receivers: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processors: Option<Value>,
    pub exporters: BTreeMap<String, ExporterConfig>,
    pub service: Value,
}

/// One exporter entry. Exporters must be written as mappings, `{}` when empty.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExporterConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(flatten)]
    pub settings: BTreeMap<String, Value>,
}

impl CollectorConfig {
    pub fn template() -> Result<Self> {
        Self::from_yaml_str(TEMPLATE)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn to_yaml_string(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Point exporters aimed at `host:<container port>` to the matching published port.
    ///
    /// Returns how many endpoints were rewritten.
    pub fn redirect(&mut self, host: &str, ports: &MappedPorts) -> usize {
        let mut rewritten = 0;
        for (name, exporter) in &mut self.exporters {
            let Some(endpoint) = exporter.endpoint.as_deref() else {
                continue;
            };
            if let Some(updated) = redirect_endpoint(endpoint, host, ports) {
                debug!(exporter = %name, from = %endpoint, to = %updated, "redirected exporter");
                exporter.endpoint = Some(updated);
                rewritten += 1;
            }
        }
        rewritten
    }

    /// Serialize into a world-readable temporary file, removed when the handle drops.
    pub fn write_temp(&self) -> Result<NamedTempFile> {
        let yaml = self.to_yaml_string()?;
        let mut file = tempfile::Builder::new()
            .prefix("otel-collector-")
            .suffix(".yaml")
            .tempfile()?;
        file.write_all(yaml.as_bytes())?;
        file.flush()?;
        // The collector image does not run as root.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.as_file()
                .set_permissions(std::fs::Permissions::from_mode(0o644))?;
        }
        info!(path = %file.path().display(), "wrote collector config");
        Ok(file)
    }
}

/// `endpoint` with its port replaced by the mapped one, if it targets `host` on a mapped port.
///
/// `otlphttp` exporters take a URL. `otlp` (gRPC) exporters take a bare `host:port`,
/// which is not a URL and is split by hand.
pub fn redirect_endpoint(endpoint: &str, host: &str, ports: &MappedPorts) -> Option<String> {
    if endpoint.contains("://") {
        return redirect_url(endpoint, host, ports);
    }
    let (target, port) = endpoint.rsplit_once(':')?;
    if target != host {
        return None;
    }
    let mapped = ports.get(port.parse().ok()?)?;
    Some(format!("{target}:{mapped}"))
}

fn redirect_url(endpoint: &str, host: &str, ports: &MappedPorts) -> Option<String> {
    let mut url = Url::parse(endpoint).ok()?;
    if url.host_str() != Some(host) {
        return None;
    }
    let mapped = ports.get(url.port()?)?;
    url.set_port(Some(mapped)).ok()?;

    let mut redirected = url.to_string();
    // `Url` always writes a root path; keep `scheme://host:port` as it was written.
    if url.path() == "/"
        && url.query().is_none()
        && url.fragment().is_none()
        && !endpoint.ends_with('/')
    {
        redirected.pop();
    }
    Some(redirected)
}
