//!
//! The public command surface: construction, lifecycle (`start`/`stop`),
//! status queries, idempotent control verbs, and the four motion verbs.
//! Everything here runs on the caller's own thread; it only ever touches
//! the outbound queue, the job handoff, and the feedback store.
//!

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::mpsc::{self, TrySendError};
use std::sync::Arc;

use crate::config::Config;
use crate::error::DriverError;
use crate::feedback::{FeedbackSnapshot, FeedbackStore};
use crate::job::{JobHandoff, JobStateMachine};
use crate::motion;
use crate::protocol::{Direction, OutboundCommand};
use crate::router::{self, RouterHandle};
use crate::transport::{self, OutboundQueue, TransportHandle, WhoAmIProbe, QUEUE_CAPACITY};

/// Optional ramping/rate parameters for [`MotorDriver::rotations_with_params`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RampParams {
    pub ramping_steps: Option<u32>,
    pub ramp_scaler: Option<u8>,
}

///
/// The started link to a single controller: the transport and router
/// threads, the job state machine, and the feedback store. Constructed
/// idle via [`MotorDriver::new`]; call [`MotorDriver::start`] to connect.
///
pub struct MotorDriver {
    config: Arc<Config>,
    feedback: Arc<FeedbackStore>,
    job: Arc<JobStateMachine>,
    outbound: OutboundQueue,
    /// Keeps the pre-`start` outbound channel's receive half alive so `try_send` can succeed
    /// before a transport is connected; replaced (and dropped) by `start`.
    pending_outbound_rx: Option<mpsc::Receiver<Vec<u8>>>,
    next_job_id: AtomicU8,
    transport: Option<TransportHandle>,
    router: Option<RouterHandle>,
}

impl MotorDriver {
    ///
    /// Builds the idle driver around a resolved `Config`. Does not open the
    /// serial port; call `start` to do that.
    ///
    pub fn new(config: Config) -> MotorDriver {
        let config = Arc::new(config);
        let feedback = Arc::new(FeedbackStore::new());
        let (outbound, pending_outbound_rx) = mpsc::sync_channel::<Vec<u8>>(QUEUE_CAPACITY);
        let job = Arc::new(JobStateMachine::new(JobHandoff::new(), outbound.clone(), Arc::clone(&feedback), Arc::clone(&config)));

        MotorDriver {
            config,
            feedback,
            job,
            outbound,
            pending_outbound_rx: Some(pending_outbound_rx),
            next_job_id: AtomicU8::new(1),
            transport: None,
            router: None,
        }
    }

    ///
    /// Opens the serial link (trying `device_path` first, then the built-in
    /// candidate paths) and spawns the I/O and router threads.
    ///
    /// # Parameters:
    /// - `device_path`: a caller-preferred serial device path
    /// - `probe`: an optional connect-time identity handshake
    ///
    pub fn start(&mut self, device_path: Option<String>, probe: Option<WhoAmIProbe>) -> Result<(), DriverError> {
        let (outbound_tx, outbound_rx) = mpsc::sync_channel::<Vec<u8>>(QUEUE_CAPACITY);
        let (inbound_tx, inbound_rx) = mpsc::sync_channel::<Vec<u8>>(QUEUE_CAPACITY);

        self.outbound = outbound_tx;
        self.pending_outbound_rx = None;
        self.job = Arc::new(JobStateMachine::new(JobHandoff::new(), self.outbound.clone(), Arc::clone(&self.feedback), Arc::clone(&self.config)));

        let transport = transport::connect(*self.config.serial(), device_path, probe, outbound_rx, inbound_tx)?;
        let router = router::spawn(Arc::clone(&self.config), Arc::clone(&self.job), Arc::clone(&self.feedback), inbound_rx);

        self.transport = Some(transport);
        self.router = Some(router);
        Ok(())
    }

    ///
    /// Sends a final `CANCEL_JOB` + `SLEEP_MOTOR` + `DISABLE_MOTOR` triplet,
    /// then stops the router and I/O threads. Idempotent; a second call is a
    /// no-op beyond re-sending the triplet (harmless against an already-idle
    /// or already-disconnected motor).
    ///
    pub fn stop(&mut self) {
        let _ = self.cancel_job();
        let _ = self.sleep_motor();
        let _ = self.disable_motor();

        if let Some(transport) = self.transport.take() {
            transport.stop();
        }
        if let Some(router) = self.router.take() {
            router.stop();
        }
    }

    /// Whether a new motion job can be submitted right now.
    pub fn is_ready_for_job(&self) -> bool {
        self.job.is_idle()
    }

    /// Whether the transport currently holds an open serial port (false while reconnecting, or before `start`).
    pub fn is_connected(&self) -> bool {
        self.transport.as_ref().is_some_and(TransportHandle::is_connected)
    }

    /// The most recently reported rotor angle, radians.
    pub fn current_angle_radians(&self) -> f64 {
        self.feedback.angle_rad() as f64
    }

    /// A point-in-time copy of the feedback store's contents.
    pub fn status_snapshot(&self) -> FeedbackSnapshot {
        self.feedback.snapshot()
    }

    fn send_control(&self, command_code: u8) -> Result<(), DriverError> {
        let frame = OutboundCommand::Control { command_code }.encode(*self.config.serial().stx(), *self.config.serial().etx());
        self.outbound.try_send(frame).map_err(|err| match err {
            TrySendError::Full(_) => DriverError::QueueFull,
            TrySendError::Disconnected(_) => DriverError::NotConnected,
        })
    }

    pub fn enable_motor(&self) -> Result<(), DriverError> {
        self.send_control(*self.config.command_codes().enable_motor())
    }

    pub fn disable_motor(&self) -> Result<(), DriverError> {
        self.send_control(*self.config.command_codes().disable_motor())
    }

    pub fn wake_motor(&self) -> Result<(), DriverError> {
        self.send_control(*self.config.command_codes().wake_motor())
    }

    pub fn sleep_motor(&self) -> Result<(), DriverError> {
        self.send_control(*self.config.command_codes().sleep_motor())
    }

    pub fn reset_motor(&self) -> Result<(), DriverError> {
        self.send_control(*self.config.command_codes().reset_motor())
    }

    pub fn pause_job(&self) -> Result<(), DriverError> {
        self.send_control(*self.config.command_codes().pause_job())
    }

    pub fn resume_job(&self) -> Result<(), DriverError> {
        self.send_control(*self.config.command_codes().resume_job())
    }

    pub fn cancel_job(&self) -> Result<(), DriverError> {
        self.send_control(*self.config.command_codes().cancel_job())
    }

    fn next_job_id(&self) -> u8 {
        self.next_job_id.fetch_add(1, Ordering::Relaxed)
    }

    fn plan_pulses(&self, rotations: f64, rpm: f64) -> Result<(motion::PulsePlan, u32), DriverError> {
        let motor = self.config.motor();
        let plan = motion::plan_for_rpm(rpm, motor.microsteps(), motor.max_rpm(), *motor.minimum_pulse_interval_us(), *motor.steps_per_revolution())?;
        let pulses = motion::pulses_for_rotations(rotations, *motor.steps_per_revolution(), plan.microstep);
        if pulses == 0 {
            return Err(crate::motion::error::MotionError::ZeroPulses.into());
        }
        Ok((plan, pulses))
    }

    /// Commands `rotations` full turns at `rpm` in `direction`, via `SEND_JOB_ALL_VARIABLES`.
    pub fn rotations_at_rpm(&self, rotations: f64, rpm: f64, direction: Direction) -> Result<(), DriverError> {
        let (plan, pulses) = self.plan_pulses(rotations, rpm)?;
        self.submit_all_variables(direction, plan, pulses, None, rpm)
    }

    /// Commands exactly `pulses` pulses at `rpm` in `direction`, via `SEND_JOB_ALL_VARIABLES`.
    pub fn pulses_at_rpm(&self, pulses: u32, rpm: f64, direction: Direction) -> Result<(), DriverError> {
        if pulses == 0 {
            return Err(crate::motion::error::MotionError::ZeroPulses.into());
        }
        let motor = self.config.motor();
        let plan = motion::plan_for_rpm(rpm, motor.microsteps(), motor.max_rpm(), *motor.minimum_pulse_interval_us(), *motor.steps_per_revolution())?;
        self.submit_all_variables(direction, plan, pulses, None, rpm)
    }

    /// As [`MotorDriver::rotations_at_rpm`], with optional ramping steps and ramp scaler.
    pub fn rotations_with_params(&self, rotations: f64, rpm: f64, direction: Direction, ramp: RampParams) -> Result<(), DriverError> {
        let (plan, pulses) = self.plan_pulses(rotations, rpm)?;
        self.submit_all_variables(direction, plan, pulses, Some(ramp), rpm)
    }

    /// Commands the rotor to `target_angle_rad`, choosing direction by the shortest signed delta and tracking arrival via the job's position loop.
    pub fn goto_angle(&self, target_angle_rad: f64, rpm: f64) -> Result<(), DriverError> {
        let current = self.feedback.angle_rad() as f64;
        let (direction, delta) = motion::adjustment(current, target_angle_rad);
        let rotations = motion::rotations_for_delta(delta);
        let (plan, pulses) = self.plan_pulses(rotations, rpm)?;
        let job_id = self.next_job_id();
        let command_code = *self.config.command_codes().send_job_all_variables();
        let frame = OutboundCommand::SendJobAllVariables {
            command_code,
            direction,
            microstep: plan.microstep,
            job_id,
            pulses,
            pulse_interval_us: plan.pulse_interval_us,
            pulse_on_period: *self.config.motor().default_pulse_on_period(),
        }
        .encode(*self.config.serial().stx(), *self.config.serial().etx());

        self.job
            .submit(job_id, command_code, frame, Some(target_angle_rad), Some(rpm), Some(direction))
            .map_err(DriverError::from)
    }

    fn submit_all_variables(&self, direction: Direction, plan: motion::PulsePlan, pulses: u32, ramp: Option<RampParams>, rpm: f64) -> Result<(), DriverError> {
        let job_id = self.next_job_id();
        let pulse_on_period = *self.config.motor().default_pulse_on_period();

        let (command_code, frame) = match ramp.and_then(|r| r.ramping_steps.map(|steps| (steps, r.ramp_scaler))) {
            None => {
                let command_code = *self.config.command_codes().send_job_all_variables();
                let frame = OutboundCommand::SendJobAllVariables { command_code, direction, microstep: plan.microstep, job_id, pulses, pulse_interval_us: plan.pulse_interval_us, pulse_on_period }
                    .encode(*self.config.serial().stx(), *self.config.serial().etx());
                (command_code, frame)
            }
            Some((ramping_steps, Some(ramp_scaler))) => {
                let command_code = *self.config.command_codes().send_job_all_variables_with_ramping_and_rate();
                let frame = OutboundCommand::SendJobAllVariablesWithRampingAndRate {
                    command_code,
                    direction,
                    microstep: plan.microstep,
                    job_id,
                    pulses,
                    pulse_interval_us: plan.pulse_interval_us,
                    pulse_on_period,
                    ramping_steps,
                    ramp_scaler,
                }
                .encode(*self.config.serial().stx(), *self.config.serial().etx());
                (command_code, frame)
            }
            Some((ramping_steps, None)) => {
                let command_code = *self.config.command_codes().send_job_all_variables_with_ramping();
                let frame = OutboundCommand::SendJobAllVariablesWithRamping {
                    command_code,
                    direction,
                    microstep: plan.microstep,
                    job_id,
                    pulses,
                    pulse_interval_us: plan.pulse_interval_us,
                    pulse_on_period,
                    ramping_steps,
                }
                .encode(*self.config.serial().stx(), *self.config.serial().etx());
                (command_code, frame)
            }
        };

        self.job.submit(job_id, command_code, frame, None, Some(rpm), Some(direction)).map_err(DriverError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_support::scenario_config;

    #[test]
    fn enable_motor_enqueues_control_frame_without_a_live_transport() {
        let driver = MotorDriver::new(scenario_config());
        driver.enable_motor().unwrap();
        assert!(driver.is_ready_for_job());
    }

    #[test]
    fn rotations_at_rpm_submits_and_blocks_further_jobs() {
        let driver = MotorDriver::new(scenario_config());
        driver.rotations_at_rpm(1.0, 10.0, Direction::Forward).unwrap();
        assert!(!driver.is_ready_for_job());
    }

    #[test]
    fn zero_pulse_motion_is_rejected() {
        let driver = MotorDriver::new(scenario_config());
        let err = driver.rotations_at_rpm(0.0, 10.0, Direction::Forward).unwrap_err();
        assert!(matches!(err, DriverError::Motion(crate::motion::error::MotionError::ZeroPulses)));
    }

    #[test]
    fn goto_angle_uses_current_feedback_to_choose_direction() {
        let driver = MotorDriver::new(scenario_config());
        driver.goto_angle(std::f64::consts::PI, 10.0).unwrap();
        assert!(!driver.is_ready_for_job());
    }
}
