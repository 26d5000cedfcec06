use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ThermostatError {
    #[error("invalid mode")]
    InvalidMode,
    #[error("invalid fan speed")]
    InvalidFanSpeed,
    #[error("invalid min/max setpoints")]
    InvalidMinMax,
    #[error("setpoint out of range")]
    SetpointOutOfRange,
    #[error("mode change hysteresis must be strictly greater than target hysteresis")]
    InvalidRegulatorHysteresis,
    #[error("regulator PID coefficients must be greater or equal to zero")]
    InvalidRegulatorCoefficients,
    #[error("heat loss coefficient must be greater or equal to zero")]
    NegativeHeatLossCoefficient,
    #[error("regulation interval must be greater than zero")]
    InvalidRegulationInterval,
}
