//!
//! Numeric derivations translating a requested RPM or target rotor angle
//! into device-level pulse parameters. Closes a position loop atop the
//! open-loop pulse interface by computing residual adjustments.
//!

pub mod error;

use std::f64::consts::TAU;

use crate::protocol::Direction;
use error::MotionError;

///
/// The microstep divisor and pulse interval chosen for a requested RPM.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PulsePlan {
    pub microstep: u8,
    pub pulse_interval_us: u32,
}

///
/// Selects a microstep divisor and pulse interval for a requested RPM, per
/// spec §4.6 steps 1-3.
///
/// # Parameters:
/// - `rpm`: requested RPM, must be `> 0`
/// - `microsteps`: allowed divisors, ascending (`config::ALLOWED_MICROSTEPS`)
/// - `max_rpm`: `max_rpm[i]` is the fastest achievable RPM at `microsteps[i]`
/// - `minimum_pulse_interval_us`: the device floor on pulse interval
/// - `steps_per_revolution`: the motor's native steps per revolution
///
/// # Returns:
/// - The chosen `PulsePlan`
/// - `MotionError::NegativeRpm` if `rpm < 0`
/// - `MotionError::ZeroPulses` if `rpm == 0` (no pulse train has a finite interval at zero RPM)
///
pub fn plan_for_rpm(
    rpm: f64,
    microsteps: &[u32],
    max_rpm: &[f64],
    minimum_pulse_interval_us: u32,
    steps_per_revolution: u32,
) -> Result<PulsePlan, MotionError> {
    if rpm < 0.0 {
        return Err(MotionError::NegativeRpm(rpm));
    }
    if rpm == 0.0 {
        return Err(MotionError::ZeroPulses);
    }

    let microstep = if rpm > max_rpm[0] {
        microsteps[0]
    } else {
        let mut best = 0usize;
        for i in 0..microsteps.len() {
            if max_rpm[i] > rpm {
                best = i;
            }
        }
        microsteps[best]
    };

    let raw_interval_us = 1e6 / ((rpm / 60.0) * steps_per_revolution as f64 * microstep as f64);
    let pulse_interval_us = (raw_interval_us.round() as i64).max(minimum_pulse_interval_us as i64) as u32;

    Ok(PulsePlan { microstep: microstep as u8, pulse_interval_us })
}

///
/// Computes the pulse count for a rotation count at a given microstep, per
/// spec §4.6 step 4: `floor(abs(rotations) * steps_per_rev) * microstep`.
///
pub fn pulses_for_rotations(rotations: f64, steps_per_revolution: u32, microstep: u8) -> u32 {
    ((rotations.abs() * steps_per_revolution as f64).floor() as u32) * microstep as u32
}

///
/// Translates a target rotor angle and direction into the rotation delta to
/// travel, per spec §4.6's position-to-rotations translation.
///
/// # Parameters:
/// - `current_angle_rad`: the rotor's current angle, radians
/// - `target_angle_rad`: the desired angle, radians
/// - `direction`: which way the rotor is commanded to turn
///
/// # Returns:
/// - `Δ`, the angular distance to travel in the commanded direction, radians (always `>= 0`)
///
pub fn delta_for_target(current_angle_rad: f64, target_angle_rad: f64, direction: Direction) -> f64 {
    match direction {
        Direction::Forward => {
            if target_angle_rad >= current_angle_rad {
                target_angle_rad - current_angle_rad
            } else {
                TAU - (current_angle_rad - target_angle_rad)
            }
        }
        Direction::Reverse => {
            if target_angle_rad <= current_angle_rad {
                current_angle_rad - target_angle_rad
            } else {
                TAU - (target_angle_rad - current_angle_rad)
            }
        }
    }
}

///
/// Converts an angular delta into a rotation count for `pulses_for_rotations`.
///
pub fn rotations_for_delta(delta_rad: f64) -> f64 {
    delta_rad / TAU
}

///
/// Chooses direction and magnitude for a position-loop re-command, per spec
/// §4.6: "direction is chosen by sign of `θ_target − θ_cur`".
///
pub fn adjustment(current_angle_rad: f64, target_angle_rad: f64) -> (Direction, f64) {
    let diff = target_angle_rad - current_angle_rad;
    let direction = if diff >= 0.0 { Direction::Forward } else { Direction::Reverse };
    (direction, diff.abs())
}

///
/// Whether the rotor is within the configured setpoint tolerance of the
/// target angle, per spec §4.6: `|θ_target − θ_cur| < tolerance_counts * (2π / encoder_ppr)`.
///
pub fn is_at_target(current_angle_rad: f64, target_angle_rad: f64, tolerance_counts: u32, encoder_pulses_per_revolution: u32) -> bool {
    let tolerance_rad = tolerance_counts as f64 * (TAU / encoder_pulses_per_revolution as f64);
    (target_angle_rad - current_angle_rad).abs() < tolerance_rad
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_support::scenario_config;

    #[test]
    fn s1_slow_rpm_selects_finest_microstep() {
        let cfg = scenario_config();
        let motor = cfg.motor();
        let plan = plan_for_rpm(0.5, motor.microsteps(), motor.max_rpm(), *motor.minimum_pulse_interval_us(), *motor.steps_per_revolution()).unwrap();
        assert_eq!(plan.microstep, 32);
        assert_eq!(plan.pulse_interval_us, 18750);
        let pulses = pulses_for_rotations(1.0, *motor.steps_per_revolution(), plan.microstep);
        assert_eq!(pulses, 6400);
    }

    #[test]
    fn s2_fast_rpm_forces_full_step_and_clamps_interval() {
        let cfg = scenario_config();
        let motor = cfg.motor();
        let plan = plan_for_rpm(10_000.0, motor.microsteps(), motor.max_rpm(), *motor.minimum_pulse_interval_us(), *motor.steps_per_revolution()).unwrap();
        assert_eq!(plan.microstep, 1);
        assert_eq!(plan.pulse_interval_us, 100);
        let pulses = pulses_for_rotations(10.0, *motor.steps_per_revolution(), plan.microstep);
        assert_eq!(pulses, 2000);
    }

    #[test]
    fn negative_rpm_is_rejected() {
        let cfg = scenario_config();
        let motor = cfg.motor();
        let err = plan_for_rpm(-1.0, motor.microsteps(), motor.max_rpm(), *motor.minimum_pulse_interval_us(), *motor.steps_per_revolution()).unwrap_err();
        assert_eq!(err, MotionError::NegativeRpm(-1.0));
    }

    #[test]
    fn invariant_microstep_always_allowed_and_below_ceiling() {
        let cfg = scenario_config();
        let motor = cfg.motor();
        let mut rpm = 1.0;
        while rpm <= motor.max_rpm()[0] {
            let plan = plan_for_rpm(rpm, motor.microsteps(), motor.max_rpm(), *motor.minimum_pulse_interval_us(), *motor.steps_per_revolution()).unwrap();
            assert!(motor.microsteps().contains(&(plan.microstep as u32)));
            let idx = motor.microsteps().iter().position(|m| *m as u8 == plan.microstep).unwrap();
            assert!(rpm < motor.max_rpm()[idx]);
            assert!(plan.pulse_interval_us >= *motor.minimum_pulse_interval_us());
            rpm += 137.0;
        }
    }

    #[test]
    fn s4_goto_pi_from_zero_forward() {
        let delta = delta_for_target(0.0, std::f64::consts::PI, Direction::Forward);
        assert!((delta - std::f64::consts::PI).abs() < 1e-9);
        assert!((rotations_for_delta(delta) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn forward_wraps_when_target_behind_current() {
        let delta = delta_for_target(std::f64::consts::PI, 0.1, Direction::Forward);
        let expected = TAU - (std::f64::consts::PI - 0.1);
        assert!((delta - expected).abs() < 1e-9);
    }

    #[test]
    fn reverse_wraps_when_target_ahead_current() {
        let delta = delta_for_target(0.1, std::f64::consts::PI, Direction::Reverse);
        let expected = TAU - (std::f64::consts::PI - 0.1);
        assert!((delta - expected).abs() < 1e-9);
    }

    #[test]
    fn tolerance_check_matches_encoder_geometry() {
        let cfg = scenario_config();
        let enc = cfg.encoder();
        let tol_rad = *enc.setpoint_tolerance_counts() as f64 * (TAU / *enc.pulses_per_revolution() as f64);
        assert!(is_at_target(0.0, tol_rad * 0.5, *enc.setpoint_tolerance_counts(), *enc.pulses_per_revolution()));
        assert!(!is_at_target(0.0, tol_rad * 2.0, *enc.setpoint_tolerance_counts(), *enc.pulses_per_revolution()));
    }

    #[test]
    fn adjustment_picks_direction_by_sign() {
        let (dir, mag) = adjustment(1.0, 2.0);
        assert_eq!(dir, Direction::Forward);
        assert!((mag - 1.0).abs() < 1e-9);

        let (dir, mag) = adjustment(2.0, 1.0);
        assert_eq!(dir, Direction::Reverse);
        assert!((mag - 1.0).abs() < 1e-9);
    }
}
