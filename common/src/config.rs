use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::{
    heat_loss::HeatLossParams,
    regulator::PidRegulatorParams,
    thermostat::Snapshot,
    types::{FanSpeed, Mode},
};

pub const ENV_PREFIX: &str = "THERMOCKTAT_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse yaml config: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("failed to parse json config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unsupported config extension {0:?}")]
    UnsupportedExtension(String),
    #[error("invalid value {value:?} for {key}")]
    InvalidEnvValue { key: String, value: String },
    #[error("mqtt qos must be 0 or 1, got {0}")]
    InvalidQos(u8),
    #[error("modbus unit id must be within 1..=247, got {0}")]
    InvalidUnitId(u8),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub device_id: String,
    pub controllers: ControllersConfig,
    pub thermostat: ThermostatConfig,
    pub regulator: RegulatorConfig,
    pub heat_loss: HeatLossConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device_id: "default".to_string(),
            controllers: ControllersConfig::default(),
            thermostat: ThermostatConfig::default(),
            regulator: RegulatorConfig::default(),
            heat_loss: HeatLossConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllersConfig {
    pub http: HttpConfig,
    pub mqtt: MqttConfig,
    pub modbus: ModbusConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub enabled: bool,
    pub addr: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            addr: "0.0.0.0:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub enabled: bool,
    pub broker_host: String,
    pub broker_port: u16,
    pub client_id: String,
    pub base_topic: String,
    pub qos: u8,
    pub retain_snapshot: bool,
    pub publish_interval_ms: u64,
    pub username: String,
    pub password: String,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            broker_host: "localhost".to_string(),
            broker_port: 1883,
            client_id: String::new(),
            base_topic: String::new(),
            qos: 0,
            retain_snapshot: false,
            publish_interval_ms: 1_000,
            username: String::new(),
            password: String::new(),
        }
    }
}

impl MqttConfig {
    pub fn publish_interval(&self) -> Duration {
        Duration::from_millis(self.publish_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModbusConfig {
    pub enabled: bool,
    pub addr: String,
    pub unit_id: u8,
}

impl Default for ModbusConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            addr: "127.0.0.1:1502".to_string(),
            unit_id: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThermostatConfig {
    pub enabled: bool,
    pub temperature_setpoint: f64,
    pub temperature_setpoint_min: f64,
    pub temperature_setpoint_max: f64,
    pub mode: Mode,
    pub fan_speed: FanSpeed,
    pub ambient_temperature: f64,
}

impl Default for ThermostatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            temperature_setpoint: 22.0,
            temperature_setpoint_min: 16.0,
            temperature_setpoint_max: 28.0,
            mode: Mode::Auto,
            fan_speed: FanSpeed::Auto,
            ambient_temperature: 21.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegulatorConfig {
    pub interval_ms: u64,
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    pub target_hysteresis: f64,
    pub mode_change_hysteresis: f64,
}

impl Default for RegulatorConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1_000,
            kp: 0.1,
            ki: 0.01,
            kd: 0.05,
            target_hysteresis: 0.5,
            mode_change_hysteresis: 1.0,
        }
    }
}

impl RegulatorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeatLossConfig {
    pub enabled: bool,
    pub outdoor_temperature: f64,
    pub coefficient: f64,
}

impl Default for HeatLossConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            outdoor_temperature: 10.0,
            coefficient: 0.01,
        }
    }
}

impl Config {
    pub fn resolve<I>(path: &Path, vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut config = Self::load(path)?;
        config.apply_env_overrides(vars)?;
        config.apply_defaults();
        config.validate()?;
        Ok(config)
    }

    // A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = match std::fs::read(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                warn!("config file {} not found, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();

        match extension.as_str() {
            "yaml" | "yml" => Self::from_yaml(&raw),
            "json" => Ok(serde_json::from_slice(&raw)?),
            _ => Err(ConfigError::UnsupportedExtension(extension)),
        }
    }

    pub fn from_yaml(raw: &[u8]) -> Result<Self, ConfigError> {
        // An empty document deserializes to unit, not to an empty map.
        if raw.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_slice(raw)?)
    }

    pub fn apply_defaults(&mut self) {
        if self.device_id.trim().is_empty() {
            self.device_id = "default".to_string();
        }

        let controllers = &mut self.controllers;
        if !controllers.http.enabled && !controllers.mqtt.enabled && !controllers.modbus.enabled {
            controllers.http.enabled = true;
        }

        let mqtt = &mut controllers.mqtt;
        if mqtt.client_id.is_empty() {
            mqtt.client_id = format!("thermocktat-{}", self.device_id);
        }
        if mqtt.base_topic.is_empty() {
            mqtt.base_topic = format!("thermocktat/{}", self.device_id);
        }
        if mqtt.publish_interval_ms == 0 {
            mqtt.publish_interval_ms = 1_000;
        }

        if controllers.modbus.unit_id == 0 {
            controllers.modbus.unit_id = 1;
        }
        if self.regulator.interval_ms == 0 {
            self.regulator.interval_ms = 1_000;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let qos = self.controllers.mqtt.qos;
        if qos > 1 {
            return Err(ConfigError::InvalidQos(qos));
        }
        let unit_id = self.controllers.modbus.unit_id;
        if !(1..=247).contains(&unit_id) {
            return Err(ConfigError::InvalidUnitId(unit_id));
        }
        Ok(())
    }

    pub fn apply_env_overrides<I>(&mut self, vars: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut port = None;
        let mut http_addr_overridden = false;

        for (key, value) in vars {
            if key == "PORT" {
                port = Some(value);
                continue;
            }
            let Some(suffix) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let path = env_key_path(suffix);
            if !self.set_path(&path, &value)? {
                warn!("ignoring unknown config override {key}");
                continue;
            }
            http_addr_overridden |= path == "controllers.http.addr";
        }

        // An explicit address wins over PORT, even one equal to the default.
        if let Some(port) = port {
            let port: u16 = parse_value("PORT", &port)?;
            let file_addr_set = self.controllers.http.addr != HttpConfig::default().addr;
            if !http_addr_overridden && !file_addr_set {
                self.controllers.http.addr = format!("0.0.0.0:{port}");
            }
        }

        Ok(())
    }

    fn set_path(&mut self, path: &str, value: &str) -> Result<bool, ConfigError> {
        let http = &mut self.controllers.http;
        let mqtt = &mut self.controllers.mqtt;
        let modbus = &mut self.controllers.modbus;
        let thermostat = &mut self.thermostat;
        let regulator = &mut self.regulator;
        let heat_loss = &mut self.heat_loss;

        match path {
            "device_id" => self.device_id = value.to_string(),
            "controllers.http.enabled" => http.enabled = parse_value(path, value)?,
            "controllers.http.addr" => http.addr = value.to_string(),
            "controllers.mqtt.enabled" => mqtt.enabled = parse_value(path, value)?,
            "controllers.mqtt.broker_host" => mqtt.broker_host = value.to_string(),
            "controllers.mqtt.broker_port" => mqtt.broker_port = parse_value(path, value)?,
            "controllers.mqtt.client_id" => mqtt.client_id = value.to_string(),
            "controllers.mqtt.base_topic" => mqtt.base_topic = value.to_string(),
            "controllers.mqtt.qos" => mqtt.qos = parse_value(path, value)?,
            "controllers.mqtt.retain_snapshot" => mqtt.retain_snapshot = parse_value(path, value)?,
            "controllers.mqtt.publish_interval_ms" => {
                mqtt.publish_interval_ms = parse_value(path, value)?
            }
            "controllers.mqtt.username" => mqtt.username = value.to_string(),
            "controllers.mqtt.password" => mqtt.password = value.to_string(),
            "controllers.modbus.enabled" => modbus.enabled = parse_value(path, value)?,
            "controllers.modbus.addr" => modbus.addr = value.to_string(),
            "controllers.modbus.unit_id" => modbus.unit_id = parse_value(path, value)?,
            "thermostat.enabled" => thermostat.enabled = parse_value(path, value)?,
            "thermostat.temperature_setpoint" => {
                thermostat.temperature_setpoint = parse_value(path, value)?
            }
            "thermostat.temperature_setpoint_min" => {
                thermostat.temperature_setpoint_min = parse_value(path, value)?
            }
            "thermostat.temperature_setpoint_max" => {
                thermostat.temperature_setpoint_max = parse_value(path, value)?
            }
            "thermostat.mode" => thermostat.mode = parse_value(path, value)?,
            "thermostat.fan_speed" => thermostat.fan_speed = parse_value(path, value)?,
            "thermostat.ambient_temperature" => {
                thermostat.ambient_temperature = parse_value(path, value)?
            }
            "regulator.interval_ms" => regulator.interval_ms = parse_value(path, value)?,
            "regulator.kp" => regulator.kp = parse_value(path, value)?,
            "regulator.ki" => regulator.ki = parse_value(path, value)?,
            "regulator.kd" => regulator.kd = parse_value(path, value)?,
            "regulator.target_hysteresis" => {
                regulator.target_hysteresis = parse_value(path, value)?
            }
            "regulator.mode_change_hysteresis" => {
                regulator.mode_change_hysteresis = parse_value(path, value)?
            }
            "heat_loss.enabled" => heat_loss.enabled = parse_value(path, value)?,
            "heat_loss.outdoor_temperature" => {
                heat_loss.outdoor_temperature = parse_value(path, value)?
            }
            "heat_loss.coefficient" => heat_loss.coefficient = parse_value(path, value)?,
            _ => return Ok(false),
        }
        Ok(true)
    }

    pub fn snapshot(&self) -> Snapshot {
        let t = &self.thermostat;
        Snapshot {
            enabled: t.enabled,
            temperature_setpoint: t.temperature_setpoint,
            temperature_setpoint_min: t.temperature_setpoint_min,
            temperature_setpoint_max: t.temperature_setpoint_max,
            mode: t.mode,
            fan_speed: t.fan_speed,
            ambient_temperature: t.ambient_temperature,
        }
    }

    pub fn regulator_params(&self) -> PidRegulatorParams {
        let r = &self.regulator;
        PidRegulatorParams {
            kp: r.kp,
            ki: r.ki,
            kd: r.kd,
            target_hysteresis: r.target_hysteresis,
            mode_change_hysteresis: r.mode_change_hysteresis,
        }
    }

    pub fn heat_loss_params(&self) -> Option<HeatLossParams> {
        self.heat_loss.enabled.then(|| HeatLossParams {
            outdoor_temperature: self.heat_loss.outdoor_temperature,
            coefficient: self.heat_loss.coefficient,
        })
    }
}

// CONTROLLERS_MQTT_PUBLISH_INTERVAL_MS -> controllers.mqtt.publish_interval_ms
pub fn env_key_path(key: &str) -> String {
    let key = key.trim().to_ascii_lowercase();

    if let Some(rest) = key.strip_prefix("controllers_") {
        return match rest.split_once('_') {
            Some((controller, field)) => format!("controllers.{controller}.{field}"),
            None => key,
        };
    }

    for section in ["thermostat", "regulator", "heat_loss"] {
        if let Some(field) = key
            .strip_prefix(section)
            .and_then(|rest| rest.strip_prefix('_'))
        {
            if !field.is_empty() {
                return format!("{section}.{field}");
            }
        }
    }

    key
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidEnvValue {
            key: key.to_string(),
            value: value.to_string(),
        })
}
