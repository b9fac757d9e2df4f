// SPDX-License-Identifier: MIT
use std::sync::Arc;

use tracing::{info, instrument};

use crate::entity::{Record, Temperature};
use crate::repository::{Repository, RepositoryError};

/// Persists temperature readings stamped with the current UTC time.
#[derive(Clone)]
pub struct TemperatureService {
    repository: Arc<dyn Repository<Temperature>>,
}

impl TemperatureService {
    pub fn new(repository: Arc<dyn Repository<Temperature>>) -> Self {
        Self { repository }
    }

    #[instrument(skip(self))]
    pub fn save_temperature(&self, celsius: f32) -> Result<Record<Temperature>, RepositoryError> {
        let record = self.repository.insert(Temperature::now(celsius))?;
        info!(id = %record.id(), celsius, "saved temperature");
        Ok(record)
    }

    /// Saves each value in order, stopping at the first rejected one.
    #[instrument(skip(self, temperatures), fields(count = temperatures.len()))]
    pub fn save_temperatures(
        &self,
        temperatures: &[f32],
    ) -> Result<Vec<Record<Temperature>>, RepositoryError> {
        let saved = temperatures
            .iter()
            .map(|&celsius| self.save_temperature(celsius))
            .collect::<Result<Vec<_>, _>>()?;
        info!(count = saved.len(), ?temperatures, "saved temperatures");
        Ok(saved)
    }

    pub fn repository(&self) -> &Arc<dyn Repository<Temperature>> {
        &self.repository
    }
}
