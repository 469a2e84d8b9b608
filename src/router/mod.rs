//!
//! Classifies decoded inbound frame payloads and dispatches them: feedback
//! and status frames go straight to the [`FeedbackStore`] (the "feedback
//! bypass" — they never touch job correlation), while response/completion/
//! cancellation frames drive the [`JobStateMachine`].
//!

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::config::Config;
use crate::feedback::FeedbackStore;
use crate::job::JobStateMachine;
use crate::protocol::InboundFrame;

/// How long the router blocks on the inbound queue before giving up and polling `check_response_timeout`, per spec §5.
const RECV_TIMEOUT: Duration = Duration::from_millis(10);

/// Extra pacing sleep taken after an empty `RECV_TIMEOUT` wait, per spec §5.
const IDLE_SLEEP: Duration = Duration::from_millis(5);

/// Join handle and shutdown switch for the background router thread.
pub struct RouterHandle {
    shutdown: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl RouterHandle {
    pub fn stop(mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

///
/// Spawns the router thread, which owns `inbound_rx` for its lifetime.
///
pub fn spawn(
    config: Arc<Config>,
    job: Arc<JobStateMachine>,
    feedback: Arc<FeedbackStore>,
    inbound_rx: Receiver<Vec<u8>>,
) -> RouterHandle {
    let shutdown = Arc::new(AtomicBool::new(false));
    let thread_shutdown = Arc::clone(&shutdown);

    let thread = thread::spawn(move || {
        route_loop(config, job, feedback, inbound_rx, thread_shutdown);
    });

    RouterHandle { shutdown, thread: Some(thread) }
}

fn route_loop(
    config: Arc<Config>,
    job: Arc<JobStateMachine>,
    feedback: Arc<FeedbackStore>,
    inbound_rx: Receiver<Vec<u8>>,
    shutdown: Arc<AtomicBool>,
) {
    while !shutdown.load(Ordering::SeqCst) {
        match inbound_rx.recv_timeout(RECV_TIMEOUT) {
            Ok(payload) => dispatch(&config, &job, &feedback, &payload),
            Err(RecvTimeoutError::Timeout) => thread::sleep(IDLE_SLEEP),
            Err(RecvTimeoutError::Disconnected) => return,
        }
        job.check_response_timeout(Instant::now());
    }
}

fn dispatch(config: &Config, job: &JobStateMachine, feedback: &FeedbackStore, payload: &[u8]) {
    let ack = *config.serial().ack();
    let etx = *config.serial().etx();

    let frame = match InboundFrame::parse(payload, config.message_ids(), ack, etx) {
        Ok(frame) => frame,
        Err(err) => {
            tracing::warn!(error = %err, "malformed frame dropped");
            return;
        }
    };

    match frame {
        InboundFrame::Feedback { velocity_rad_per_s, angle_rad, encoder_count } => {
            feedback.update_feedback(velocity_rad_per_s, angle_rad, encoder_count);
        }
        InboundFrame::Status { status_byte, job_id, microstep, pulses_remaining } => {
            feedback.update_status(status_byte, job_id, microstep, pulses_remaining, config.status_bits());
        }
        InboundFrame::Fault => {
            tracing::error!("motor reported a fault condition");
        }
        InboundFrame::Response { command_code, job_id, response_code, ack } => {
            job.on_response(command_code, job_id, response_code, ack);
        }
        InboundFrame::JobComplete { job_id } => {
            job.on_job_complete(job_id);
        }
        InboundFrame::JobCancelled { job_id } => {
            job.on_job_cancelled(job_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_support::scenario_config;
    use crate::job::{JobHandoff, JobState};
    use crate::protocol::OutboundCommand;
    use std::sync::mpsc;

    #[test]
    fn response_frame_drives_job_to_active() {
        let cfg = Arc::new(scenario_config());
        let feedback = Arc::new(FeedbackStore::new());
        let (outbound_tx, _outbound_rx) = mpsc::sync_channel(20);
        let job = Arc::new(JobStateMachine::new(JobHandoff::new(), outbound_tx, Arc::clone(&feedback), Arc::clone(&cfg)));

        let send_job = *cfg.command_codes().send_job();
        let frame = OutboundCommand::SendJob { command_code: send_job, direction: crate::protocol::Direction::Forward, microstep: 1, job_id: 1, pulses: 10 }
            .encode(*cfg.serial().stx(), *cfg.serial().etx());
        job.submit(1, send_job, frame, None, None, None).unwrap();

        let ack = *cfg.serial().ack();
        let payload = vec![*cfg.message_ids().response(), send_job, 1, 0x00, ack, *cfg.serial().etx()];
        dispatch(&cfg, &job, &feedback, &payload);

        assert_eq!(job.snapshot().state, JobState::Active);
    }

    #[test]
    fn feedback_frame_bypasses_job_correlation() {
        let cfg = Arc::new(scenario_config());
        let feedback = Arc::new(FeedbackStore::new());
        let (outbound_tx, _outbound_rx) = mpsc::sync_channel(20);
        let job = Arc::new(JobStateMachine::new(JobHandoff::new(), outbound_tx, Arc::clone(&feedback), Arc::clone(&cfg)));

        let mut payload = vec![*cfg.message_ids().motor_feedback()];
        payload.extend_from_slice(&1.0f32.to_le_bytes());
        payload.extend_from_slice(&2.0f32.to_le_bytes());
        payload.extend_from_slice(&5i16.to_le_bytes());
        payload.push(*cfg.serial().etx());

        dispatch(&cfg, &job, &feedback, &payload);
        assert_eq!(feedback.snapshot().angle_rad, 2.0);
        assert_eq!(job.snapshot().state, JobState::Idle);
    }

    #[test]
    fn malformed_frame_is_dropped_without_panicking() {
        let cfg = Arc::new(scenario_config());
        let feedback = Arc::new(FeedbackStore::new());
        let (outbound_tx, _outbound_rx) = mpsc::sync_channel(20);
        let job = Arc::new(JobStateMachine::new(JobHandoff::new(), outbound_tx, feedback.clone(), cfg.clone()));

        dispatch(&cfg, &job, &feedback, &[0xFF]);
        assert_eq!(job.snapshot().state, JobState::Idle);
    }
}
