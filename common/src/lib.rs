pub mod config;
pub mod error;
pub mod heat_loss;
pub mod regulation;
pub mod regulator;
pub mod service;
pub mod thermostat;
pub mod topics;
pub mod types;

pub use config::{Config, ConfigError};
pub use error::ThermostatError;
pub use heat_loss::{HeatLossParams, HeatLossSimulator};
pub use regulation::{wait_for_shutdown, RegulationLoop};
pub use regulator::{PidRegulator, PidRegulatorParams, RegulationState};
pub use service::ThermostatService;
pub use thermostat::{Snapshot, Thermostat};
pub use types::{FanSpeed, Mode};
