use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{error::ThermostatError, types::Mode};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PidRegulatorParams {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    // Band around the setpoint that counts as at target.
    pub target_hysteresis: f64,
    // Auto mode only switches between heating and cooling outside this band.
    pub mode_change_hysteresis: f64,
}

impl PidRegulatorParams {
    pub fn validate(&self) -> Result<(), ThermostatError> {
        if !(self.mode_change_hysteresis > self.target_hysteresis) {
            return Err(ThermostatError::InvalidRegulatorHysteresis);
        }
        if !(self.kp >= 0.0 && self.ki >= 0.0 && self.kd >= 0.0) {
            return Err(ThermostatError::InvalidRegulatorCoefficients);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RegulationState {
    #[default]
    Idle,
    Heating,
    Cooling,
}

impl RegulationState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Heating => "heating",
            Self::Cooling => "cooling",
        }
    }
}

// Any change of activation clears integral and derivative memory.
#[derive(Debug, Clone)]
pub struct PidRegulator {
    params: PidRegulatorParams,
    state: RegulationState,
    integral: f64,
    previous_error: f64,
}

impl PidRegulator {
    pub fn new(params: PidRegulatorParams) -> Result<Self, ThermostatError> {
        params.validate()?;
        Ok(Self {
            params,
            state: RegulationState::Idle,
            integral: 0.0,
            previous_error: 0.0,
        })
    }

    pub fn params(&self) -> &PidRegulatorParams {
        &self.params
    }

    pub fn state(&self) -> RegulationState {
        self.state
    }

    pub fn is_heating(&self) -> bool {
        self.state == RegulationState::Heating
    }

    pub fn is_cooling(&self) -> bool {
        self.state == RegulationState::Cooling
    }

    pub fn activate(&mut self, setpoint: f64, ambient: f64, mode: Mode) {
        let next = self.next_state(setpoint, ambient, mode);
        if next != self.state {
            self.state = next;
            self.integral = 0.0;
            self.previous_error = 0.0;
        }
    }

    // Far edge of the target band while active, the setpoint while idle.
    pub fn target(&self, setpoint: f64) -> f64 {
        match self.state {
            RegulationState::Idle => setpoint,
            RegulationState::Heating => setpoint + self.params.target_hysteresis,
            RegulationState::Cooling => setpoint - self.params.target_hysteresis,
        }
    }

    pub fn update(&mut self, setpoint: f64, ambient: f64, mode: Mode, dt: Duration) -> f64 {
        self.activate(setpoint, ambient, mode);
        if self.state == RegulationState::Idle {
            return 0.0;
        }

        let secs = dt.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }

        let error = self.target(setpoint) - ambient;
        self.integral += error * secs;
        let derivative = (error - self.previous_error) / secs;
        self.previous_error = error;

        self.params.kp * error + self.params.ki * self.integral + self.params.kd * derivative
    }

    fn next_state(&self, setpoint: f64, ambient: f64, mode: Mode) -> RegulationState {
        use RegulationState::{Cooling, Heating, Idle};

        let target = self.params.target_hysteresis;
        let trigger = self.params.mode_change_hysteresis;

        match mode {
            Mode::Fan | Mode::Unknown => Idle,
            Mode::Heat => match self.state {
                Heating if ambient >= setpoint + target => Idle,
                Heating => Heating,
                _ if ambient < setpoint - target => Heating,
                _ => Idle,
            },
            Mode::Cool => match self.state {
                Cooling if ambient <= setpoint - target => Idle,
                Cooling => Cooling,
                _ if ambient > setpoint + target => Cooling,
                _ => Idle,
            },
            Mode::Auto => {
                if ambient > setpoint + trigger {
                    Cooling
                } else if ambient < setpoint - trigger {
                    Heating
                } else {
                    match self.state {
                        Heating if ambient >= setpoint + target => Idle,
                        Cooling if ambient <= setpoint - target => Idle,
                        current => current,
                    }
                }
            }
        }
    }
}
