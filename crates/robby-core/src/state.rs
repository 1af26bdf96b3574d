use crate::error::MachineError;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MachineMode {
    /// Play the continuous shot until stopped.
    Direct,
    /// Play the shot cycle.
    Program,
    /// Calibrate and configure the machine.
    #[default]
    Configuration,
}

impl MachineMode {
    pub const fn code(self) -> u8 {
        match self {
            Self::Direct => 0,
            Self::Program => 1,
            Self::Configuration => 2,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Direct => "Direct",
            Self::Program => "Program",
            Self::Configuration => "Configuration",
        }
    }

    pub fn from_code(code: u8) -> Result<Self, MachineError> {
        match code {
            0 => Ok(Self::Direct),
            1 => Ok(Self::Program),
            2 => Ok(Self::Configuration),
            other => Err(MachineError::InputData(format!("unknown machine mode {other}"))),
        }
    }
}

impl fmt::Display for MachineMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MachineStatus {
    #[default]
    Idle,
    Preparing,
    Playing,
    Paused,
    Stopping,
    /// Terminal until the process is restarted.
    Error,
}

impl MachineStatus {
    pub const fn code(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Preparing => 1,
            Self::Playing => 2,
            Self::Paused => 3,
            Self::Stopping => 9,
            Self::Error => 99,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Preparing => "Preparing",
            Self::Playing => "Playing",
            Self::Paused => "Paused",
            Self::Stopping => "Stopping",
            Self::Error => "Error",
        }
    }

    /// Statuses an external caller may request through `issue_command`.
    pub const fn is_command(self) -> bool {
        matches!(self, Self::Idle | Self::Playing | Self::Paused)
    }

    pub fn from_code(code: u8) -> Result<Self, MachineError> {
        match code {
            0 => Ok(Self::Idle),
            1 => Ok(Self::Preparing),
            2 => Ok(Self::Playing),
            3 => Ok(Self::Paused),
            9 => Ok(Self::Stopping),
            99 => Ok(Self::Error),
            other => Err(MachineError::InputData(format!("unknown machine status {other}"))),
        }
    }
}

impl fmt::Display for MachineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
