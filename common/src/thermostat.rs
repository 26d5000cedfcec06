use std::{
    sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    error::ThermostatError,
    heat_loss::HeatLossSimulator,
    regulator::{PidRegulator, PidRegulatorParams, RegulationState},
    types::{FanSpeed, Mode},
};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub enabled: bool,
    pub temperature_setpoint: f64,
    pub temperature_setpoint_min: f64,
    pub temperature_setpoint_max: f64,
    pub mode: Mode,
    pub fan_speed: FanSpeed,
    pub ambient_temperature: f64,
}

impl Snapshot {
    // First violation wins: mode, fan speed, bounds, setpoint.
    pub fn validate(&self) -> Result<(), ThermostatError> {
        if !self.mode.is_valid() {
            return Err(ThermostatError::InvalidMode);
        }
        if !self.fan_speed.is_valid() {
            return Err(ThermostatError::InvalidFanSpeed);
        }
        check_bounds(self.temperature_setpoint_min, self.temperature_setpoint_max)?;
        check_setpoint(
            self.temperature_setpoint,
            self.temperature_setpoint_min,
            self.temperature_setpoint_max,
        )
    }
}

fn check_bounds(min: f64, max: f64) -> Result<(), ThermostatError> {
    if !(min <= max) {
        return Err(ThermostatError::InvalidMinMax);
    }
    Ok(())
}

fn check_setpoint(setpoint: f64, min: f64, max: f64) -> Result<(), ThermostatError> {
    if !(min <= setpoint && setpoint <= max) {
        return Err(ThermostatError::SetpointOutOfRange);
    }
    Ok(())
}

#[derive(Debug)]
struct Inner {
    snapshot: Snapshot,
    regulator: PidRegulator,
}

// Snapshot and regulator share one lock. Every mutation validates and
// writes inside a single critical section; readers get copies.
#[derive(Debug)]
pub struct Thermostat {
    inner: RwLock<Inner>,
    heat_loss: Option<HeatLossSimulator>,
}

impl Thermostat {
    pub fn new(initial: Snapshot, params: PidRegulatorParams) -> Result<Self, ThermostatError> {
        initial.validate()?;
        let regulator = PidRegulator::new(params)?;
        Ok(Self {
            inner: RwLock::new(Inner {
                snapshot: initial,
                regulator,
            }),
            heat_loss: None,
        })
    }

    pub fn with_heat_loss(mut self, simulator: HeatLossSimulator) -> Self {
        self.heat_loss = Some(simulator);
        self
    }

    pub fn get(&self) -> Snapshot {
        self.read().snapshot
    }

    pub fn regulation_state(&self) -> RegulationState {
        self.read().regulator.state()
    }

    pub fn set_enabled(&self, on: bool) {
        self.write().snapshot.enabled = on;
        debug!(enabled = on, "thermostat enabled flag updated");
    }

    pub fn set_mode(&self, mode: Mode) -> Result<(), ThermostatError> {
        if !mode.is_valid() {
            debug!(%mode, "rejected mode");
            return Err(ThermostatError::InvalidMode);
        }
        self.write().snapshot.mode = mode;
        debug!(%mode, "thermostat mode updated");
        Ok(())
    }

    pub fn set_fan_speed(&self, fan_speed: FanSpeed) -> Result<(), ThermostatError> {
        if !fan_speed.is_valid() {
            debug!(%fan_speed, "rejected fan speed");
            return Err(ThermostatError::InvalidFanSpeed);
        }
        self.write().snapshot.fan_speed = fan_speed;
        debug!(%fan_speed, "thermostat fan speed updated");
        Ok(())
    }

    pub fn set_min_max(&self, min: f64, max: f64) -> Result<(), ThermostatError> {
        let result = check_bounds(min, max).and_then(|()| {
            let mut inner = self.write();
            check_setpoint(inner.snapshot.temperature_setpoint, min, max)?;
            inner.snapshot.temperature_setpoint_min = min;
            inner.snapshot.temperature_setpoint_max = max;
            Ok(())
        });

        match result {
            Ok(()) => debug!(min, max, "setpoint bounds updated"),
            Err(err) => debug!(min, max, %err, "rejected setpoint bounds"),
        }
        result
    }

    pub fn set_min(&self, min: f64) -> Result<(), ThermostatError> {
        let result = {
            let mut inner = self.write();
            let snapshot = &mut inner.snapshot;
            check_bounds(min, snapshot.temperature_setpoint_max)
                .and_then(|()| {
                    check_setpoint(
                        snapshot.temperature_setpoint,
                        min,
                        snapshot.temperature_setpoint_max,
                    )
                })
                .map(|()| snapshot.temperature_setpoint_min = min)
        };

        match result {
            Ok(()) => debug!(min, "setpoint min updated"),
            Err(err) => debug!(min, %err, "rejected setpoint min"),
        }
        result
    }

    pub fn set_max(&self, max: f64) -> Result<(), ThermostatError> {
        let result = {
            let mut inner = self.write();
            let snapshot = &mut inner.snapshot;
            check_bounds(snapshot.temperature_setpoint_min, max)
                .and_then(|()| {
                    check_setpoint(
                        snapshot.temperature_setpoint,
                        snapshot.temperature_setpoint_min,
                        max,
                    )
                })
                .map(|()| snapshot.temperature_setpoint_max = max)
        };

        match result {
            Ok(()) => debug!(max, "setpoint max updated"),
            Err(err) => debug!(max, %err, "rejected setpoint max"),
        }
        result
    }

    pub fn set_setpoint(&self, setpoint: f64) -> Result<(), ThermostatError> {
        let result = {
            let mut inner = self.write();
            let snapshot = &mut inner.snapshot;
            check_setpoint(
                setpoint,
                snapshot.temperature_setpoint_min,
                snapshot.temperature_setpoint_max,
            )
            .map(|()| snapshot.temperature_setpoint = setpoint)
        };

        match result {
            Ok(()) => debug!(setpoint, "setpoint updated"),
            Err(err) => debug!(setpoint, %err, "rejected setpoint"),
        }
        result
    }

    // Correction and heat loss both start from the pre-step ambient. Returns
    // the post-step ambient and regulator state as one consistent pair.
    pub fn advance(&self, dt: Duration) -> (f64, RegulationState) {
        let mut inner = self.write();
        let Inner {
            snapshot,
            regulator,
        } = &mut *inner;

        let ambient = snapshot.ambient_temperature;
        let correction = regulator.update(snapshot.temperature_setpoint, ambient, snapshot.mode, dt);
        let loss = self
            .heat_loss
            .as_ref()
            .map_or(0.0, |simulator| simulator.delta(ambient, dt));

        snapshot.ambient_temperature = ambient + correction + loss;
        (snapshot.ambient_temperature, regulator.state())
    }

    // Critical sections never leave a half-applied mutation behind, so a
    // poisoned lock still guards a valid snapshot.
    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}
