use crate::{
    error::ThermostatError,
    thermostat::{Snapshot, Thermostat},
    types::{FanSpeed, Mode},
};

// The only surface the protocol front ends see.
pub trait ThermostatService: Send + Sync {
    fn get(&self) -> Snapshot;
    fn set_enabled(&self, on: bool);
    fn set_setpoint(&self, setpoint: f64) -> Result<(), ThermostatError>;
    fn set_min_max(&self, min: f64, max: f64) -> Result<(), ThermostatError>;
    fn set_min(&self, min: f64) -> Result<(), ThermostatError>;
    fn set_max(&self, max: f64) -> Result<(), ThermostatError>;
    fn set_mode(&self, mode: Mode) -> Result<(), ThermostatError>;
    fn set_fan_speed(&self, fan_speed: FanSpeed) -> Result<(), ThermostatError>;
}

impl ThermostatService for Thermostat {
    fn get(&self) -> Snapshot {
        Thermostat::get(self)
    }

    fn set_enabled(&self, on: bool) {
        Thermostat::set_enabled(self, on)
    }

    fn set_setpoint(&self, setpoint: f64) -> Result<(), ThermostatError> {
        Thermostat::set_setpoint(self, setpoint)
    }

    fn set_min_max(&self, min: f64, max: f64) -> Result<(), ThermostatError> {
        Thermostat::set_min_max(self, min, max)
    }

    fn set_min(&self, min: f64) -> Result<(), ThermostatError> {
        Thermostat::set_min(self, min)
    }

    fn set_max(&self, max: f64) -> Result<(), ThermostatError> {
        Thermostat::set_max(self, max)
    }

    fn set_mode(&self, mode: Mode) -> Result<(), ThermostatError> {
        Thermostat::set_mode(self, mode)
    }

    fn set_fan_speed(&self, fan_speed: FanSpeed) -> Result<(), ThermostatError> {
        Thermostat::set_fan_speed(self, fan_speed)
    }
}
