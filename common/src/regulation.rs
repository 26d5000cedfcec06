use std::{sync::Arc, time::Duration};

use tokio::{
    sync::watch,
    time::{self, MissedTickBehavior},
};
use tracing::{info, trace};

use crate::{error::ThermostatError, thermostat::Thermostat};

// Also resolves when the sender is dropped.
pub async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

// Missed ticks are skipped; each tick advances exactly one period.
#[derive(Debug)]
pub struct RegulationLoop {
    thermostat: Arc<Thermostat>,
    period: Duration,
}

impl RegulationLoop {
    pub fn new(thermostat: Arc<Thermostat>, period: Duration) -> Result<Self, ThermostatError> {
        if period.is_zero() {
            return Err(ThermostatError::InvalidRegulationInterval);
        }
        Ok(Self { thermostat, period })
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = time::interval_at(time::Instant::now() + self.period, self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(period_ms = self.period.as_millis() as u64, "regulation loop started");

        loop {
            tokio::select! {
                biased;
                _ = wait_for_shutdown(&mut shutdown) => break,
                _ = interval.tick() => {
                    let (ambient, state) = self.thermostat.advance(self.period);
                    trace!(ambient, state = state.as_str(), "regulation tick");
                }
            }
        }

        info!("regulation loop stopped");
    }
}
