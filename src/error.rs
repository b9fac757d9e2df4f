// SPDX-License-Identifier: MIT
use thiserror::Error;

use crate::config::ConfigError;
use crate::containers::ContainerError;
use crate::readiness::ReadinessError;
use crate::repository::RepositoryError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Message(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("HTTP request error: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("unexpected HTTP status {status} from {url}")]
    Status { url: String, status: u16 },
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("startup coordination failed: {0}")]
    Readiness(#[from] ReadinessError),
    #[error("container error: {0}")]
    Container(#[from] ContainerError),
    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
}

impl Error {
    pub fn msg<M>(message: M) -> Self
    where
        M: Into<String>,
    {
        Self::Message(message.into())
    }
}
