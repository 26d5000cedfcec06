use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ThermostatError;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HeatLossParams {
    pub outdoor_temperature: f64,
    // Per second. Zero disables the loss.
    pub coefficient: f64,
}

impl HeatLossParams {
    pub fn validate(&self) -> Result<(), ThermostatError> {
        // Written as a negated comparison so NaN is rejected too.
        if !(self.coefficient >= 0.0) {
            return Err(ThermostatError::NegativeHeatLossCoefficient);
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct HeatLossSimulator {
    params: HeatLossParams,
}

impl HeatLossSimulator {
    pub fn new(params: HeatLossParams) -> Result<Self, ThermostatError> {
        params.validate()?;
        Ok(Self { params })
    }

    pub fn params(&self) -> &HeatLossParams {
        &self.params
    }

    pub fn delta(&self, indoor_temperature: f64, dt: Duration) -> f64 {
        let diff = self.params.outdoor_temperature - indoor_temperature;
        self.params.coefficient * diff * dt.as_secs_f64()
    }
}
