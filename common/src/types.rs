use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::ThermostatError;

// `Unknown` is the zero placeholder and is never accepted by the engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    #[serde(skip_deserializing)]
    Unknown,
    Heat,
    Cool,
    Fan,
    Auto,
}

impl Mode {
    pub fn is_valid(self) -> bool {
        !matches!(self, Self::Unknown)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Heat => "heat",
            Self::Cool => "cool",
            Self::Fan => "fan",
            Self::Auto => "auto",
        }
    }

    pub fn code(self) -> u16 {
        match self {
            Self::Unknown => 0,
            Self::Heat => 1,
            Self::Cool => 2,
            Self::Fan => 3,
            Self::Auto => 4,
        }
    }

    pub fn from_code(code: u16) -> Self {
        match code {
            1 => Self::Heat,
            2 => Self::Cool,
            3 => Self::Fan,
            4 => Self::Auto,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = ThermostatError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "heat" => Ok(Self::Heat),
            "cool" => Ok(Self::Cool),
            "fan" => Ok(Self::Fan),
            "auto" => Ok(Self::Auto),
            _ => Err(ThermostatError::InvalidMode),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FanSpeed {
    #[default]
    #[serde(skip_deserializing)]
    Unknown,
    Auto,
    Low,
    Medium,
    High,
}

impl FanSpeed {
    pub fn is_valid(self) -> bool {
        !matches!(self, Self::Unknown)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Auto => "auto",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    pub fn code(self) -> u16 {
        match self {
            Self::Unknown => 0,
            Self::Auto => 1,
            Self::Low => 2,
            Self::Medium => 3,
            Self::High => 4,
        }
    }

    pub fn from_code(code: u16) -> Self {
        match code {
            1 => Self::Auto,
            2 => Self::Low,
            3 => Self::Medium,
            4 => Self::High,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for FanSpeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FanSpeed {
    type Err = ThermostatError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "auto" => Ok(Self::Auto),
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            _ => Err(ThermostatError::InvalidFanSpeed),
        }
    }
}
