//!
//! Resolution of the external header-file loader's output into a validated,
//! immutable configuration record.
//!

pub mod error;

use std::collections::HashMap;

use error::ConfigError;

/// The allowed microstep divisors. Fixed by the device firmware, not read
/// from the header file (the source hardcodes the same list).
pub const ALLOWED_MICROSTEPS: [u32; 6] = [1, 2, 4, 8, 16, 32];

/// The two-level map produced by the (out-of-scope) header-file loader:
/// `section -> name -> value`.
pub type SectionMap = HashMap<String, HashMap<String, u32>>;

fn section<'m>(map: &'m SectionMap, name: &'static str) -> Result<&'m HashMap<String, u32>, ConfigError> {
    map.get(name).ok_or(ConfigError::MissingSection { section: name })
}

fn key(section_name: &'static str, values: &HashMap<String, u32>, key_name: &'static str) -> Result<u32, ConfigError> {
    values
        .get(key_name)
        .copied()
        .ok_or(ConfigError::MissingKey { section: section_name, key: key_name })
}

///
/// Serial link framing constants and baud rate.
///
/// # Fields:
/// - `baud_rate`: the link's baud rate
/// - `stx`: frame-start marker byte
/// - `etx`: frame-end marker byte
/// - `ack`: positive acknowledgement byte
/// - `nak`: negative acknowledgement byte
///
#[derive(getset::Getters, Debug, Clone, Copy, PartialEq, Eq)]
#[get = "pub"]
pub struct SerialSettings {
    baud_rate: u32,
    stx: u8,
    etx: u8,
    ack: u8,
    nak: u8,
}

impl SerialSettings {
    fn from_map(map: &SectionMap) -> Result<Self, ConfigError> {
        let s = section(map, "serial_settings")?;
        Ok(Self {
            baud_rate: key("serial_settings", s, "BAUD_RATE")?,
            stx: key("serial_settings", s, "STX")? as u8,
            etx: key("serial_settings", s, "ETX")? as u8,
            ack: key("serial_settings", s, "ACK")? as u8,
            nak: key("serial_settings", s, "NAK")? as u8,
        })
    }
}

///
/// Encoder feedback geometry and position-loop tolerance.
///
#[derive(getset::Getters, Debug, Clone, Copy, PartialEq, Eq)]
#[get = "pub"]
pub struct EncoderSettings {
    pulses_per_revolution: u32,
    update_period_us: u32,
    setpoint_tolerance_counts: u32,
}

impl EncoderSettings {
    fn from_map(map: &SectionMap) -> Result<Self, ConfigError> {
        let s = section(map, "encoder_settings")?;
        Ok(Self {
            pulses_per_revolution: key("encoder_settings", s, "ENCODER_PULSES_PER_REVOLUTION")?,
            update_period_us: key("encoder_settings", s, "ENCODER_UPDATE_PERIOD_US")?,
            setpoint_tolerance_counts: key("encoder_settings", s, "SETPOINT_TOLERANCE_COUNTS")?,
        })
    }
}

///
/// Bit positions of the seven status-byte flags, unpacked by `feedback::StatusSnapshot::from_byte`.
///
#[derive(getset::Getters, Debug, Clone, Copy, PartialEq, Eq)]
#[get = "pub"]
pub struct StatusBits {
    direction: u8,
    fault: u8,
    paused: u8,
    ramping: u8,
    enabled: u8,
    running: u8,
    sleeping: u8,
}

impl StatusBits {
    fn from_map(map: &SectionMap) -> Result<Self, ConfigError> {
        let s = section(map, "status_message_bits")?;
        Ok(Self {
            direction: key("status_message_bits", s, "STATUS_DIRECTION_BIT")? as u8,
            fault: key("status_message_bits", s, "STATUS_FAULT_BIT")? as u8,
            paused: key("status_message_bits", s, "STATUS_PAUSED_BIT")? as u8,
            ramping: key("status_message_bits", s, "STATUS_RAMPING_BIT")? as u8,
            enabled: key("status_message_bits", s, "STATUS_ENABLED_BIT")? as u8,
            running: key("status_message_bits", s, "STATUS_RUNNING_BIT")? as u8,
            sleeping: key("status_message_bits", s, "STATUS_SLEEP_BIT")? as u8,
        })
    }
}

///
/// Message-id values distinguishing inbound frame variants.
///
#[derive(getset::Getters, Debug, Clone, Copy, PartialEq, Eq)]
#[get = "pub"]
pub struct MessageIds {
    motor_status: u8,
    motor_feedback: u8,
    motor_fault: u8,
    response: u8,
    job_complete: u8,
    job_cancelled: u8,
}

impl MessageIds {
    fn from_map(map: &SectionMap) -> Result<Self, ConfigError> {
        let s = section(map, "message_types")?;
        Ok(Self {
            motor_status: key("message_types", s, "MOTOR_STATUS_MESSAGE_ID")? as u8,
            motor_feedback: key("message_types", s, "MOTOR_FEEDBACK_MESSAGE_ID")? as u8,
            motor_fault: key("message_types", s, "MOTOR_FAULT_MESSAGE_ID")? as u8,
            response: key("message_types", s, "RESPONSE_MESSAGE_ID")? as u8,
            job_complete: key("message_types", s, "JOB_COMPLETE_MESSAGE_ID")? as u8,
            job_cancelled: key("message_types", s, "JOB_CANCELLED_MESSAGE_ID")? as u8,
        })
    }
}

///
/// Outbound command-code values.
///
#[derive(getset::Getters, Debug, Clone, Copy, PartialEq, Eq)]
#[get = "pub"]
pub struct CommandCodes {
    send_job: u8,
    send_job_with_ramping: u8,
    send_job_all_variables: u8,
    send_job_all_variables_with_ramping: u8,
    send_job_all_variables_with_ramping_and_rate: u8,
    pause_job: u8,
    resume_job: u8,
    cancel_job: u8,
    enable_motor: u8,
    disable_motor: u8,
    sleep_motor: u8,
    wake_motor: u8,
    reset_motor: u8,
}

impl CommandCodes {
    fn from_map(map: &SectionMap) -> Result<Self, ConfigError> {
        let s = section(map, "command_types")?;
        let get = |k: &'static str| key("command_types", s, k).map(|v| v as u8);
        Ok(Self {
            send_job: get("SEND_JOB")?,
            send_job_with_ramping: get("SEND_JOB_WITH_RAMPING")?,
            send_job_all_variables: get("SEND_JOB_ALL_VARIABLES")?,
            send_job_all_variables_with_ramping: get("SEND_JOB_ALL_VARIABLES_WITH_RAMPING")?,
            send_job_all_variables_with_ramping_and_rate: get("SEND_JOB_ALL_VARIABLES_WITH_RAMPING_AND_RATE")?,
            pause_job: get("PAUSE_JOB")?,
            resume_job: get("RESUME_JOB")?,
            cancel_job: get("CANCEL_JOB")?,
            enable_motor: get("ENABLE_MOTOR")?,
            disable_motor: get("DISABLE_MOTOR")?,
            sleep_motor: get("SLEEP_MOTOR")?,
            wake_motor: get("WAKE_MOTOR")?,
            reset_motor: get("RESET_MOTOR")?,
        })
    }
}

///
/// Device-level motion limits: native steps per revolution, the minimum
/// achievable pulse interval, the default pulse-on period, and the derived
/// microstep/RPM ceiling tables.
///
#[derive(getset::Getters, Debug, Clone, PartialEq)]
#[get = "pub"]
pub struct MotorSettings {
    steps_per_revolution: u32,
    minimum_pulse_interval_us: u32,
    default_pulse_on_period: u32,
    microsteps: Vec<u32>,
    /// `max_rpm[i]` is the fastest achievable RPM at `microsteps[i]`.
    max_rpm: Vec<f64>,
    max_motor_rpm: f64,
    max_pulses_per_second: f64,
}

impl MotorSettings {
    fn from_map(map: &SectionMap) -> Result<Self, ConfigError> {
        let s = section(map, "motor_settings")?;
        let steps_per_revolution = key("motor_settings", s, "MOTOR_STEPS_PER_REV")?;
        let minimum_pulse_interval_us = key("motor_settings", s, "MINIMUM_PULSE_INTERVAL_US")?;
        let default_pulse_on_period = key("motor_settings", s, "DEFAULT_PULSE_ON_PERIOD")?;

        let microsteps: Vec<u32> = ALLOWED_MICROSTEPS.to_vec();
        if microsteps.is_empty() {
            return Err(ConfigError::EmptyMicrostepSet);
        }
        if !microsteps.windows(2).all(|w| w[0] < w[1]) {
            return Err(ConfigError::MicrostepSetNotSorted(microsteps));
        }

        let max_pulses_per_second = 1e6 / minimum_pulse_interval_us as f64;
        let max_motor_rpm = (max_pulses_per_second / steps_per_revolution as f64) * 60.0;
        let max_rpm: Vec<f64> = microsteps.iter().map(|m| max_motor_rpm / *m as f64).collect();

        Ok(Self {
            steps_per_revolution,
            minimum_pulse_interval_us,
            default_pulse_on_period,
            microsteps,
            max_rpm,
            max_motor_rpm,
            max_pulses_per_second,
        })
    }
}

///
/// The fully-resolved, immutable configuration the core consumes. Construct
/// via [`Config::from_sections`]; a `Config` that exists is guaranteed valid.
///
#[derive(getset::Getters, Debug, Clone)]
#[get = "pub"]
pub struct Config {
    serial: SerialSettings,
    encoder: EncoderSettings,
    status_bits: StatusBits,
    message_ids: MessageIds,
    command_codes: CommandCodes,
    response_codes: HashMap<String, u32>,
    motor: MotorSettings,
}

impl Config {
    ///
    /// Resolves a raw `section -> name -> value` map (as produced by the
    /// out-of-scope header-file loader) into a validated `Config`.
    ///
    /// # Parameters:
    /// - `map`: the two-level constant map
    ///
    /// # Returns:
    /// - A fully-validated `Config`
    /// - A `ConfigError` naming the first missing key or invalid invariant found
    ///
    pub fn from_sections(map: &SectionMap) -> Result<Config, ConfigError> {
        let response_codes = section(map, "response_types")?.clone();

        Ok(Config {
            serial: SerialSettings::from_map(map)?,
            encoder: EncoderSettings::from_map(map)?,
            status_bits: StatusBits::from_map(map)?,
            message_ids: MessageIds::from_map(map)?,
            command_codes: CommandCodes::from_map(map)?,
            response_codes,
            motor: MotorSettings::from_map(map)?,
        })
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    ///
    /// Builds the section map used in the spec's worked scenarios:
    /// STX=0x02, ETX=0x03, ACK=0x06, NAK=0x15, SEND_JOB=0x10, steps_per_rev=200,
    /// minimum_pulse_interval_us=100.
    ///
    pub fn scenario_sections() -> SectionMap {
        let mut map = SectionMap::new();

        map.insert(
            "serial_settings".into(),
            HashMap::from([
                ("BAUD_RATE".into(), 115200),
                ("STX".into(), 0x02),
                ("ETX".into(), 0x03),
                ("ACK".into(), 0x06),
                ("NAK".into(), 0x15),
            ]),
        );
        map.insert(
            "encoder_settings".into(),
            HashMap::from([
                ("ENCODER_PULSES_PER_REVOLUTION".into(), 2400),
                ("ENCODER_UPDATE_PERIOD_US".into(), 1000),
                ("SETPOINT_TOLERANCE_COUNTS".into(), 5),
            ]),
        );
        map.insert(
            "status_message_bits".into(),
            HashMap::from([
                ("STATUS_DIRECTION_BIT".into(), 0),
                ("STATUS_FAULT_BIT".into(), 1),
                ("STATUS_PAUSED_BIT".into(), 2),
                ("STATUS_RAMPING_BIT".into(), 3),
                ("STATUS_ENABLED_BIT".into(), 4),
                ("STATUS_RUNNING_BIT".into(), 5),
                ("STATUS_SLEEP_BIT".into(), 6),
            ]),
        );
        map.insert(
            "message_types".into(),
            HashMap::from([
                ("MOTOR_STATUS_MESSAGE_ID".into(), 0x20),
                ("MOTOR_FEEDBACK_MESSAGE_ID".into(), 0x21),
                ("MOTOR_FAULT_MESSAGE_ID".into(), 0x22),
                ("RESPONSE_MESSAGE_ID".into(), 0x23),
                ("JOB_COMPLETE_MESSAGE_ID".into(), 0x24),
                ("JOB_CANCELLED_MESSAGE_ID".into(), 0x25),
            ]),
        );
        map.insert(
            "command_types".into(),
            HashMap::from([
                ("SEND_JOB".into(), 0x10),
                ("SEND_JOB_WITH_RAMPING".into(), 0x11),
                ("SEND_JOB_ALL_VARIABLES".into(), 0x12),
                ("SEND_JOB_ALL_VARIABLES_WITH_RAMPING".into(), 0x13),
                ("SEND_JOB_ALL_VARIABLES_WITH_RAMPING_AND_RATE".into(), 0x14),
                ("PAUSE_JOB".into(), 0x30),
                ("RESUME_JOB".into(), 0x31),
                ("CANCEL_JOB".into(), 0x32),
                ("ENABLE_MOTOR".into(), 0x33),
                ("DISABLE_MOTOR".into(), 0x34),
                ("SLEEP_MOTOR".into(), 0x35),
                ("WAKE_MOTOR".into(), 0x36),
                ("RESET_MOTOR".into(), 0x37),
            ]),
        );
        map.insert(
            "response_types".into(),
            HashMap::from([("OK".into(), 0x00), ("BUSY".into(), 0x01)]),
        );
        map.insert(
            "motor_settings".into(),
            HashMap::from([
                ("MOTOR_STEPS_PER_REV".into(), 200),
                ("MINIMUM_PULSE_INTERVAL_US".into(), 100),
                ("DEFAULT_PULSE_ON_PERIOD".into(), 20),
            ]),
        );

        map
    }

    pub fn scenario_config() -> Config {
        Config::from_sections(&scenario_sections()).expect("scenario config is valid")
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn resolves_valid_map() {
        let cfg = scenario_config();
        assert_eq!(cfg.serial().stx(), &0x02);
        assert_eq!(cfg.motor().steps_per_revolution(), &200);
        assert_eq!(cfg.motor().minimum_pulse_interval_us(), &100);
    }

    #[test]
    fn derives_max_rpm_table() {
        let cfg = scenario_config();
        // max_pulses_per_second = 1e6 / 100 = 10_000
        // max_motor_rpm = (10_000 / 200) * 60 = 3_000
        assert!((cfg.motor().max_motor_rpm() - 3000.0).abs() < 1e-9);
        assert_eq!(cfg.motor().max_rpm().len(), ALLOWED_MICROSTEPS.len());
        assert!((cfg.motor().max_rpm()[0] - 3000.0).abs() < 1e-9);
        assert!((cfg.motor().max_rpm()[5] - 3000.0 / 32.0).abs() < 1e-9);
    }

    #[test]
    fn missing_section_is_hard_error() {
        let mut map = scenario_sections();
        map.remove("encoder_settings");
        let err = Config::from_sections(&map).unwrap_err();
        assert!(matches!(err, ConfigError::MissingSection { section: "encoder_settings" }));
    }

    #[test]
    fn missing_key_is_hard_error() {
        let mut map = scenario_sections();
        map.get_mut("serial_settings").unwrap().remove("STX");
        let err = Config::from_sections(&map).unwrap_err();
        assert!(matches!(err, ConfigError::MissingKey { section: "serial_settings", key: "STX" }));
    }
}
