use std::sync::Mutex;

use thermocktat_common::{FanSpeed, Mode, Snapshot, ThermostatError, ThermostatService};

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    SetEnabled(bool),
    SetSetpoint(f64),
    SetMinMax(f64, f64),
    SetMin(f64),
    SetMax(f64),
    SetMode(Mode),
    SetFanSpeed(FanSpeed),
}

/// Records every call and applies it to an unvalidated snapshot, optionally
/// failing each fallible operation with a fixed error.
#[derive(Debug)]
pub struct FakeThermostatService {
    snapshot: Mutex<Snapshot>,
    calls: Mutex<Vec<Call>>,
    fail_with: Option<ThermostatError>,
}

impl FakeThermostatService {
    pub fn new() -> Self {
        Self {
            snapshot: Mutex::new(Snapshot {
                enabled: true,
                temperature_setpoint: 22.0,
                temperature_setpoint_min: 16.0,
                temperature_setpoint_max: 28.0,
                mode: Mode::Auto,
                fan_speed: FanSpeed::Auto,
                ambient_temperature: 21.0,
            }),
            calls: Mutex::new(Vec::new()),
            fail_with: None,
        }
    }

    pub fn failing(err: ThermostatError) -> Self {
        Self {
            fail_with: Some(err),
            ..Self::new()
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: Call) -> Result<(), ThermostatError> {
        self.calls.lock().unwrap().push(call.clone());
        if let Some(err) = self.fail_with {
            return Err(err);
        }

        let mut snapshot = self.snapshot.lock().unwrap();
        match call {
            Call::SetEnabled(on) => snapshot.enabled = on,
            Call::SetSetpoint(value) => snapshot.temperature_setpoint = value,
            Call::SetMinMax(min, max) => {
                snapshot.temperature_setpoint_min = min;
                snapshot.temperature_setpoint_max = max;
            }
            Call::SetMin(min) => snapshot.temperature_setpoint_min = min,
            Call::SetMax(max) => snapshot.temperature_setpoint_max = max,
            Call::SetMode(mode) => snapshot.mode = mode,
            Call::SetFanSpeed(fan_speed) => snapshot.fan_speed = fan_speed,
        }
        Ok(())
    }
}

impl ThermostatService for FakeThermostatService {
    fn get(&self) -> Snapshot {
        *self.snapshot.lock().unwrap()
    }

    fn set_enabled(&self, on: bool) {
        let mut calls = self.calls.lock().unwrap();
        calls.push(Call::SetEnabled(on));
        self.snapshot.lock().unwrap().enabled = on;
    }

    fn set_setpoint(&self, setpoint: f64) -> Result<(), ThermostatError> {
        self.record(Call::SetSetpoint(setpoint))
    }

    fn set_min_max(&self, min: f64, max: f64) -> Result<(), ThermostatError> {
        self.record(Call::SetMinMax(min, max))
    }

    fn set_min(&self, min: f64) -> Result<(), ThermostatError> {
        self.record(Call::SetMin(min))
    }

    fn set_max(&self, max: f64) -> Result<(), ThermostatError> {
        self.record(Call::SetMax(max))
    }

    fn set_mode(&self, mode: Mode) -> Result<(), ThermostatError> {
        self.record(Call::SetMode(mode))
    }

    fn set_fan_speed(&self, fan_speed: FanSpeed) -> Result<(), ThermostatError> {
        self.record(Call::SetFanSpeed(fan_speed))
    }
}
