//! Machine configuration document.
//!
//! This is the decoded shape of the persisted JSON document: actuator wiring,
//! default shot parameters and the program shot cycle. The core consumes these
//! values and produces the same shape when saving.

use crate::error::{MachineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

/// Duration in seconds the feeder needs for one full push cycle.
pub const BALL_PUSHER_DURATION_S: f64 = 1.25;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralSettings {
    pub default_ballspeed: f64,
    pub default_topspin: f64,
    pub default_sidespin: f64,
    /// Balls per second for the default shot.
    pub default_ball_frequency: f64,
    pub max_ball_frequency: f64,
    /// Feeder steps in degrees; the sum should be zero so the feeder returns
    /// to its waiting position after every ball.
    pub ball_feeder_cycle: Vec<f64>,
    pub ball_feeder_mount_index: usize,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            default_ballspeed: 1.0,
            default_topspin: 0.0,
            default_sidespin: 0.0,
            default_ball_frequency: 0.2,
            max_ball_frequency: 1.0 / BALL_PUSHER_DURATION_S,
            ball_feeder_cycle: vec![-40.0, 120.0, -80.0],
            ball_feeder_mount_index: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PwmDriverWiring {
    pub i2c_channel: u8,
    pub sda_pin: u8,
    pub address: u8,
}

impl Default for PwmDriverWiring {
    fn default() -> Self {
        Self {
            i2c_channel: 0,
            sda_pin: 4,
            address: 0x40,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MotorDriverConfig {
    #[serde(rename = "PCA9685")]
    Pca9685(PwmDriverWiring),
}

impl Default for MotorDriverConfig {
    fn default() -> Self {
        Self::Pca9685(PwmDriverWiring::default())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DcMotorConfig {
    pub motor_number: u8,
    #[serde(default = "default_polarity")]
    pub polarity: i8,
}

fn default_polarity() -> i8 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BallDriverConfig {
    pub bd_number: usize,
    /// Orientation of each motor in the forward axial view; 0 is top.
    pub motor_angles: Vec<f64>,
    #[serde(default)]
    pub motors: Vec<DcMotorConfig>,
    #[serde(default)]
    pub motor_driver: MotorDriverConfig,
}

impl Default for BallDriverConfig {
    fn default() -> Self {
        Self {
            bd_number: 0,
            motor_angles: vec![0.0, 180.0],
            motors: vec![
                DcMotorConfig {
                    motor_number: 0,
                    polarity: 1,
                },
                DcMotorConfig {
                    motor_number: 1,
                    polarity: 1,
                },
            ],
            motor_driver: MotorDriverConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StepperWiring {
    pub starting_gp_pin: u8,
    pub consecutive_pins: u8,
    pub pio_block_index: u8,
    pub gear_ratio: u32,
    pub inner_motor_steps: u32,
    /// Added to the theoretical steps per revolution to match the real gearbox.
    pub correction_steps: i32,
    pub runner_freq: u32,
    pub counter_freq: u32,
}

impl Default for StepperWiring {
    fn default() -> Self {
        Self {
            starting_gp_pin: 2,
            consecutive_pins: 4,
            pio_block_index: 0,
            gear_ratio: 64,
            inner_motor_steps: 32,
            correction_steps: -4,
            runner_freq: 20_000,
            counter_freq: 2_000,
        }
    }
}

impl StepperWiring {
    pub fn steps_per_revolution(&self) -> i64 {
        i64::from(self.gear_ratio) * i64::from(self.inner_motor_steps)
            + i64::from(self.correction_steps)
    }

    /// Angular speed of a counted rotation.
    pub fn degrees_per_second(&self) -> f64 {
        let steps = self.steps_per_revolution();
        if steps <= 0 {
            return 0.0;
        }
        f64::from(self.counter_freq) / steps as f64 * 360.0
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FeederActuatorConfig {
    #[serde(default)]
    pub config: StepperWiring,
    /// Overrides the general feeder cycle for this actuator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cycle: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mount_index: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BallFeederConfig {
    /// Ball driver this feeder releases balls into.
    pub bd_number: usize,
    pub actuators: Vec<FeederActuatorConfig>,
}

impl Default for BallFeederConfig {
    fn default() -> Self {
        Self {
            bd_number: 0,
            actuators: vec![FeederActuatorConfig::default()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServoWiring {
    pub control_pin: u8,
    pub freq: u32,
    pub t_low_ms: f64,
    pub t_high_ms: f64,
    pub halfspan_angle: f64,
}

impl Default for ServoWiring {
    fn default() -> Self {
        Self {
            control_pin: 1,
            freq: 50,
            t_low_ms: 0.5,
            t_high_ms: 2.5,
            halfspan_angle: 90.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StirrerConfig {
    #[serde(rename = "StepMotorPIO")]
    Stepper {
        #[serde(default)]
        config: StepperWiring,
        #[serde(default = "default_stirrer_speed")]
        speed: f64,
    },
    #[serde(rename = "Sg92r")]
    Servo {
        #[serde(default)]
        config: ServoWiring,
        #[serde(default = "default_stirrer_speed")]
        speed: f64,
    },
}

fn default_stirrer_speed() -> f64 {
    1.0
}

impl StirrerConfig {
    pub fn speed(&self) -> f64 {
        match self {
            Self::Stepper { speed, .. } | Self::Servo { speed, .. } => *speed,
        }
    }
}

impl Default for StirrerConfig {
    fn default() -> Self {
        Self::Stepper {
            config: StepperWiring {
                starting_gp_pin: 10,
                pio_block_index: 1,
                ..StepperWiring::default()
            },
            speed: default_stirrer_speed(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShotConfig {
    pub speed: f64,
    #[serde(default)]
    pub topspin: f64,
    #[serde(default)]
    pub sidespin: f64,
    /// Seconds between this ball and the next one.
    pub pause: f64,
    #[serde(default)]
    pub h_angle: f64,
    #[serde(default)]
    pub v_angle: f64,
    #[serde(default)]
    pub bd_number: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineConfig {
    pub general: GeneralSettings,
    pub balldrivers: Vec<BallDriverConfig>,
    pub ballfeeders: Vec<BallFeederConfig>,
    pub ballstirrers: Vec<StirrerConfig>,
    /// Program mode shots; the default shot is used when empty.
    pub shot_cycle: Vec<ShotConfig>,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            general: GeneralSettings::default(),
            balldrivers: vec![BallDriverConfig::default()],
            ballfeeders: vec![BallFeederConfig::default()],
            ballstirrers: vec![StirrerConfig::default()],
            shot_cycle: Vec::new(),
        }
    }
}

impl MachineConfig {
    pub fn from_json_str(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| MachineError::Configuration(format!("cannot parse configuration: {e}")))
    }

    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| MachineError::Configuration(format!("cannot encode configuration: {e}")))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| {
            MachineError::Configuration(format!(
                "cannot load settings from file '{}': {e}",
                path.display()
            ))
        })?;
        let config = Self::from_json_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let text = self.to_json_string()?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                MachineError::Configuration(format!("cannot create '{}': {e}", parent.display()))
            })?;
        }
        fs::write(path, text).map_err(|e| {
            MachineError::Configuration(format!(
                "cannot save settings to file '{}': {e}",
                path.display()
            ))
        })
    }

    /// Document-level checks. Per-item hardware problems are left to machine
    /// assembly, which omits the failing item instead of rejecting the document.
    pub fn validate(&self) -> Result<()> {
        let general = &self.general;
        if !general.default_ball_frequency.is_finite() || general.default_ball_frequency <= 0.0 {
            return Err(MachineError::Configuration(format!(
                "default_ball_frequency must be positive, got {}",
                general.default_ball_frequency
            )));
        }
        if !general.max_ball_frequency.is_finite() || general.max_ball_frequency <= 0.0 {
            return Err(MachineError::Configuration(format!(
                "max_ball_frequency must be positive, got {}",
                general.max_ball_frequency
            )));
        }
        validate_cycle(
            "general.ball_feeder_cycle",
            &general.ball_feeder_cycle,
            general.ball_feeder_mount_index,
        )?;

        let mut drivers = HashSet::new();
        for driver in &self.balldrivers {
            if !drivers.insert(driver.bd_number) {
                return Err(MachineError::Configuration(format!(
                    "ball driver {} is configured twice",
                    driver.bd_number
                )));
            }
            if driver.motor_angles.iter().any(|a| !a.is_finite()) {
                return Err(MachineError::Configuration(format!(
                    "ball driver {} has a non-finite motor angle",
                    driver.bd_number
                )));
            }
        }

        for (index, feeder) in self.ballfeeders.iter().enumerate() {
            if !drivers.contains(&feeder.bd_number) {
                return Err(MachineError::Configuration(format!(
                    "ball feeder {index} targets unknown ball driver {}",
                    feeder.bd_number
                )));
            }
            if feeder.actuators.is_empty() {
                return Err(MachineError::Configuration(format!(
                    "ball feeder {index} has no actuators"
                )));
            }
            for actuator in &feeder.actuators {
                let cycle = actuator.cycle.as_ref().unwrap_or(&general.ball_feeder_cycle);
                let mount = actuator
                    .mount_index
                    .unwrap_or(general.ball_feeder_mount_index);
                validate_cycle("ball feeder cycle", cycle, mount)?;
            }
        }

        for (index, shot) in self.shot_cycle.iter().enumerate() {
            if !drivers.contains(&shot.bd_number) {
                return Err(MachineError::Configuration(format!(
                    "shot {index} targets unknown ball driver {}",
                    shot.bd_number
                )));
            }
        }
        Ok(())
    }
}

fn validate_cycle(name: &str, steps: &[f64], mount_index: usize) -> Result<()> {
    if steps.is_empty() {
        return Err(MachineError::Configuration(format!("{name} is empty")));
    }
    if steps.iter().any(|s| !s.is_finite()) {
        return Err(MachineError::Configuration(format!(
            "{name} contains a non-finite step"
        )));
    }
    if mount_index >= steps.len() {
        return Err(MachineError::Configuration(format!(
            "{name}: mount index {mount_index} is outside the cycle of {} steps",
            steps.len()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_document_is_valid() {
        MachineConfig::default().validate().unwrap();
    }

    #[test]
    fn parses_device_document_shape() {
        let text = r#"{
            "general": {"default_ballspeed": 0.8, "ball_feeder_cycle": [-30, 90, -60]},
            "balldrivers": [{
                "bd_number": 0,
                "motor_angles": [0, 180],
                "motors": [{"motor_number": 0, "polarity": -1}, {"motor_number": 1}],
                "motor_driver": {"type": "PCA9685", "i2c_channel": 1, "sda_pin": 6, "address": 65}
            }],
            "ballfeeders": [{"bd_number": 0, "actuators": [{"config": {"starting_gp_pin": 2}}]}],
            "ballstirrers": [{"type": "Sg92r", "config": {"control_pin": 3}}],
            "shot_cycle": [{"speed": 0.5, "topspin": 0.3, "pause": 2.0}]
        }"#;
        let config = MachineConfig::from_json_str(text).unwrap();
        config.validate().unwrap();
        assert_eq!(config.general.default_ballspeed, 0.8);
        assert_eq!(config.general.ball_feeder_mount_index, 1);
        assert_eq!(config.balldrivers[0].motors[0].polarity, -1);
        assert_eq!(config.balldrivers[0].motors[1].polarity, 1);
        assert_eq!(
            config.balldrivers[0].motor_driver,
            MotorDriverConfig::Pca9685(PwmDriverWiring {
                i2c_channel: 1,
                sda_pin: 6,
                address: 65
            })
        );
        assert!(matches!(
            config.ballstirrers[0],
            StirrerConfig::Servo { ref config, speed } if config.control_pin == 3 && speed == 1.0
        ));
        assert_eq!(config.shot_cycle[0].bd_number, 0);
    }

    #[test]
    fn rejects_unknown_motor_driver_type() {
        let text = r#"{"balldrivers": [{"bd_number": 0, "motor_angles": [0, 180],
            "motor_driver": {"type": "L298N"}}]}"#;
        assert!(matches!(
            MachineConfig::from_json_str(text),
            Err(MachineError::Configuration(_))
        ));
    }

    #[test]
    fn rejects_mount_index_outside_cycle() {
        let mut config = MachineConfig::default();
        config.general.ball_feeder_mount_index = 3;
        assert!(matches!(config.validate(), Err(MachineError::Configuration(_))));
    }

    #[test]
    fn rejects_feeder_for_unknown_driver() {
        let mut config = MachineConfig::default();
        config.ballfeeders[0].bd_number = 4;
        assert!(matches!(config.validate(), Err(MachineError::Configuration(_))));
    }

    #[test]
    fn save_then_load_keeps_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("ttrobby-config.json");
        let mut config = MachineConfig::default();
        config.shot_cycle.push(ShotConfig {
            speed: 0.6,
            topspin: -0.2,
            sidespin: 0.0,
            pause: 1.5,
            h_angle: 10.0,
            v_angle: -5.0,
            bd_number: 0,
        });
        config.save(&path).unwrap();
        assert_eq!(MachineConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn missing_file_is_a_configuration_error() {
        let err = MachineConfig::load(Path::new("/nonexistent/ttrobby.json")).unwrap_err();
        assert!(err.is_user_facing());
    }

    #[test]
    fn default_stepper_turns_about_once_per_second() {
        let dps = StepperWiring::default().degrees_per_second();
        assert!((dps - 352.25).abs() < 0.01, "{dps}");
    }
}
