//!
//! Tracks the requested/active/pending motion job, correlates ACK/NAK
//! against the outstanding request, and drives completion, cancellation,
//! and bounded position-loop re-command transitions.
//!

pub mod error;

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::config::Config;
use crate::feedback::FeedbackStore;
use crate::motion;
use crate::protocol::{Direction, OutboundCommand};
use crate::transport::OutboundQueue;
use error::JobError;

/// Ceiling on pending-response wait before a job is declared timed out, per spec §4.4/§5.
pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Bounded re-command cap for the position loop, per spec §9 design note.
pub const MAX_ADJUSTMENT_ATTEMPTS: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Idle,
    Pending,
    Active,
}

impl Default for JobState {
    fn default() -> Self {
        JobState::Idle
    }
}

///
/// The terminal outcome of the most recently finished job, kept around for
/// callers to inspect after the fact (spec §7: "Nak ... caller observes via
/// response snapshot", "ResponseTimeout ... caller observes via `is_ready_for_job()`").
///
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Nak { response_code: u8 },
    Timeout,
    Complete { at_commanded_position: bool },
    Cancelled,
}

///
/// The job bookkeeping record, shared between the Command Surface (which
/// mutates only via `submit`) and the router thread (which owns every other
/// transition). See spec §3's Job Record and §9's "small guarded handoff".
///
#[derive(Debug, Clone, Default)]
pub struct JobRecord {
    pub requested_job_id: Option<u8>,
    pub current_job_id: Option<u8>,
    pub commanded_command_code: Option<u8>,
    pub state: JobState,
    pub target_position: Option<f64>,
    pub commanded_rpm: Option<f64>,
    pub at_commanded_position: bool,
    direction: Option<Direction>,
    pending_since: Option<Instant>,
    adjustment_attempts: u8,
    last_outcome: Option<JobOutcome>,
}

/// The small guarded handoff record shared across threads.
pub struct JobHandoff(Mutex<JobRecord>);

impl JobHandoff {
    pub fn new() -> Arc<JobHandoff> {
        Arc::new(JobHandoff(Mutex::new(JobRecord::default())))
    }

    pub fn snapshot(&self) -> JobRecord {
        self.0.lock().expect("job handoff lock poisoned").clone()
    }
}

///
/// Owns job transitions on behalf of the router thread. Holds the shared
/// outbound queue (to enqueue `SLEEP_MOTOR` and position-loop re-commands),
/// the feedback store (to read the current angle for the position loop),
/// and the resolved configuration (command codes, tolerances).
///
pub struct JobStateMachine {
    handoff: Arc<JobHandoff>,
    outbound: OutboundQueue,
    feedback: Arc<FeedbackStore>,
    config: Arc<Config>,
}

impl JobStateMachine {
    pub fn new(handoff: Arc<JobHandoff>, outbound: OutboundQueue, feedback: Arc<FeedbackStore>, config: Arc<Config>) -> JobStateMachine {
        JobStateMachine { handoff, outbound, feedback, config }
    }

    pub fn handoff(&self) -> Arc<JobHandoff> {
        Arc::clone(&self.handoff)
    }

    pub fn is_idle(&self) -> bool {
        self.handoff.0.lock().expect("job handoff lock poisoned").state == JobState::Idle
    }

    pub fn snapshot(&self) -> JobRecord {
        self.handoff.snapshot()
    }

    ///
    /// Submits a new job. Enqueues `frame` before recording the
    /// request/commanded pair, so that a caller who observes `Pending` is
    /// guaranteed the frame has already been handed to the wire (spec §5
    /// ordering guarantee). Rejected if a job is already pending or active.
    ///
    pub fn submit(
        &self,
        job_id: u8,
        command_code: u8,
        frame: Vec<u8>,
        target_position: Option<f64>,
        commanded_rpm: Option<f64>,
        direction: Option<Direction>,
    ) -> Result<(), JobError> {
        let mut guard = self.handoff.0.lock().expect("job handoff lock poisoned");
        if guard.state != JobState::Idle {
            return Err(JobError::NotIdle);
        }

        self.outbound.try_send(frame).map_err(|_| JobError::QueueFull)?;

        guard.requested_job_id = Some(job_id);
        guard.commanded_command_code = Some(command_code);
        guard.target_position = target_position;
        guard.commanded_rpm = commanded_rpm;
        guard.direction = direction;
        guard.at_commanded_position = false;
        guard.adjustment_attempts = 0;
        guard.pending_since = Some(Instant::now());
        guard.state = JobState::Pending;
        Ok(())
    }

    ///
    /// Applies a decoded `Response` frame. ACK is correlated on
    /// `(command_code, job_id)` (spec §9 design note, the stronger of the two
    /// candidate correlation rules); NAK is correlated on `command_code`
    /// alone, per spec §4.4's per-state transition table.
    ///
    pub fn on_response(&self, command_code: u8, job_id: u8, response_code: u8, ack: bool) {
        let mut guard = self.handoff.0.lock().expect("job handoff lock poisoned");
        if guard.state != JobState::Pending || guard.commanded_command_code != Some(command_code) {
            tracing::trace!(command_code, job_id, ack, "discarding response that matches no outstanding request");
            return;
        }

        if ack {
            if guard.requested_job_id != Some(job_id) {
                tracing::trace!(job_id, "discarding ACK for mismatched job id");
                return;
            }
            guard.current_job_id = guard.requested_job_id;
            guard.commanded_command_code = None;
            guard.pending_since = None;
            guard.state = JobState::Active;
            tracing::trace!(job_id, command_code, "job acknowledged, now active");
        } else {
            tracing::warn!(job_id, command_code, response_code, "job rejected with NAK");
            self.reset_to_idle(&mut guard, JobOutcome::Nak { response_code });
        }
    }

    ///
    /// Advances a `pending` job to `idle` if it has outlived `RESPONSE_TIMEOUT`.
    /// Returns `true` if a timeout was applied.
    ///
    pub fn check_response_timeout(&self, now: Instant) -> bool {
        let mut guard = self.handoff.0.lock().expect("job handoff lock poisoned");
        if guard.state == JobState::Pending {
            if let Some(since) = guard.pending_since {
                if now.duration_since(since) > RESPONSE_TIMEOUT {
                    tracing::warn!("response timeout, returning to idle");
                    self.reset_to_idle(&mut guard, JobOutcome::Timeout);
                    return true;
                }
            }
        }
        false
    }

    ///
    /// Applies a `JobComplete` frame. If a position target is outstanding and
    /// the rotor has not arrived, computes and submits a bounded re-command
    /// (spec §4.6, capped per spec §9 design note); otherwise enqueues
    /// `SLEEP_MOTOR` and returns to `idle`.
    ///
    pub fn on_job_complete(&self, job_id: u8) {
        let mut guard = self.handoff.0.lock().expect("job handoff lock poisoned");
        if guard.state != JobState::Active || guard.current_job_id != Some(job_id) {
            tracing::trace!(job_id, "discarding job-complete for unknown job");
            return;
        }

        if let (Some(target), Some(rpm)) = (guard.target_position, guard.commanded_rpm) {
            let current_angle = self.feedback.angle_rad() as f64;
            let encoder = self.config.encoder();
            let at_target = motion::is_at_target(current_angle, target, *encoder.setpoint_tolerance_counts(), *encoder.pulses_per_revolution());

            if !at_target && guard.adjustment_attempts < MAX_ADJUSTMENT_ATTEMPTS {
                if let Some((direction, frame, command_code)) = self.build_adjustment(current_angle, target, rpm) {
                    if self.outbound.try_send(frame).is_ok() {
                        guard.adjustment_attempts += 1;
                        guard.direction = Some(direction);
                        guard.requested_job_id = Some(job_id);
                        guard.commanded_command_code = Some(command_code);
                        guard.pending_since = Some(Instant::now());
                        guard.state = JobState::Pending;
                        tracing::trace!(job_id, attempt = guard.adjustment_attempts, "re-commanding toward target position");
                        return;
                    }
                    tracing::warn!(job_id, "outbound queue full, dropping position-loop re-command");
                }
                // zero-pulse adjustment (delta resolves to no pulses): already effectively at target.
                self.finish_with_sleep(&mut guard, true);
                return;
            }

            if !at_target {
                tracing::warn!(job_id, attempts = guard.adjustment_attempts, "giving up on unreachable setpoint");
            }
            self.finish_with_sleep(&mut guard, at_target);
            return;
        }

        self.finish_with_sleep(&mut guard, true);
    }

    ///
    /// Applies a `JobCancelled` frame: returns to `idle` without enqueuing
    /// `SLEEP_MOTOR` (the cancellation was presumably already intentional).
    ///
    pub fn on_job_cancelled(&self, job_id: u8) {
        let mut guard = self.handoff.0.lock().expect("job handoff lock poisoned");
        if guard.state == JobState::Active && guard.current_job_id == Some(job_id) {
            self.reset_to_idle(&mut guard, JobOutcome::Cancelled);
        }
    }

    fn finish_with_sleep(&self, guard: &mut JobRecord, at_commanded_position: bool) {
        let sleep_frame = OutboundCommand::Control { command_code: *self.config.command_codes().sleep_motor() }
            .encode(*self.config.serial().stx(), *self.config.serial().etx());
        if self.outbound.try_send(sleep_frame).is_err() {
            tracing::warn!("outbound queue full, SLEEP_MOTOR was not transmitted");
        }
        self.reset_to_idle(guard, JobOutcome::Complete { at_commanded_position });
    }

    fn reset_to_idle(&self, guard: &mut JobRecord, outcome: JobOutcome) {
        let at_commanded_position = matches!(outcome, JobOutcome::Complete { at_commanded_position: true });
        *guard = JobRecord { at_commanded_position, last_outcome: Some(outcome), ..JobRecord::default() };
    }

    fn build_adjustment(&self, current_angle: f64, target: f64, rpm: f64) -> Option<(Direction, Vec<u8>, u8)> {
        let (direction, delta) = motion::adjustment(current_angle, target);
        let motor = self.config.motor();
        let plan = motion::plan_for_rpm(rpm, motor.microsteps(), motor.max_rpm(), *motor.minimum_pulse_interval_us(), *motor.steps_per_revolution()).ok()?;
        let rotations = motion::rotations_for_delta(delta);
        let pulses = motion::pulses_for_rotations(rotations, *motor.steps_per_revolution(), plan.microstep);
        if pulses == 0 {
            return None;
        }

        let command_code = *self.config.command_codes().send_job_all_variables();
        let frame = OutboundCommand::SendJobAllVariables {
            command_code,
            direction,
            microstep: plan.microstep,
            job_id: self.handoff.snapshot().current_job_id.unwrap_or(0),
            pulses,
            pulse_interval_us: plan.pulse_interval_us,
            pulse_on_period: *motor.default_pulse_on_period(),
        }
        .encode(*self.config.serial().stx(), *self.config.serial().etx());

        Some((direction, frame, command_code))
    }
}
