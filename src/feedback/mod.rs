//!
//! Thread-safe most-recent-value store for velocity, angle, encoder count,
//! and the latest parsed status frame. Last-writer-wins; no historical
//! buffer.
//!

use std::sync::RwLock;

use crate::config::StatusBits;

///
/// The seven status-byte flags, unpacked via the configured bit positions.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatusSnapshot {
    pub direction: bool,
    pub fault: bool,
    pub paused: bool,
    pub ramping: bool,
    pub enabled: bool,
    pub running: bool,
    pub sleeping: bool,
}

impl StatusSnapshot {
    ///
    /// Unpacks a raw status byte using the configured bit positions.
    ///
    pub fn from_byte(status_byte: u8, bits: &StatusBits) -> StatusSnapshot {
        let set = |bit: u8| (status_byte & (1 << bit)) != 0;
        StatusSnapshot {
            direction: set(*bits.direction()),
            fault: set(*bits.fault()),
            paused: set(*bits.paused()),
            ramping: set(*bits.ramping()),
            enabled: set(*bits.enabled()),
            running: set(*bits.running()),
            sleeping: set(*bits.sleeping()),
        }
    }
}

///
/// A point-in-time copy of everything the Feedback Store knows. Cheap to
/// clone; returned by value from `FeedbackStore::snapshot`.
///
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FeedbackSnapshot {
    pub velocity_rad_per_s: f32,
    pub angle_rad: f32,
    pub encoder_count: i16,
    pub status: Option<StatusSnapshot>,
    pub status_job_id: Option<u8>,
    pub microstep: Option<u8>,
    pub pulses_remaining: Option<u32>,
}

///
/// The shared most-recent-value store. Readers take a shared lock; the
/// reader thread that owns updates takes an exclusive lock for the
/// duration of a single field update.
///
#[derive(Debug, Default)]
pub struct FeedbackStore {
    inner: RwLock<FeedbackSnapshot>,
}

impl FeedbackStore {
    pub fn new() -> FeedbackStore {
        FeedbackStore::default()
    }

    ///
    /// Updates velocity, angle, and encoder count from a decoded `Feedback` frame.
    ///
    pub fn update_feedback(&self, velocity_rad_per_s: f32, angle_rad: f32, encoder_count: i16) {
        let mut guard = self.inner.write().expect("feedback store lock poisoned");
        guard.velocity_rad_per_s = velocity_rad_per_s;
        guard.angle_rad = angle_rad;
        guard.encoder_count = encoder_count;
    }

    ///
    /// Updates the status snapshot from a decoded `Status` frame.
    ///
    pub fn update_status(&self, status_byte: u8, job_id: u8, microstep: u8, pulses_remaining: u32, bits: &StatusBits) {
        let mut guard = self.inner.write().expect("feedback store lock poisoned");
        guard.status = Some(StatusSnapshot::from_byte(status_byte, bits));
        guard.status_job_id = Some(job_id);
        guard.microstep = Some(microstep);
        guard.pulses_remaining = Some(pulses_remaining);
    }

    ///
    /// A point-in-time copy of the store's current contents.
    ///
    pub fn snapshot(&self) -> FeedbackSnapshot {
        *self.inner.read().expect("feedback store lock poisoned")
    }

    ///
    /// The most recently reported rotor angle, radians.
    ///
    pub fn angle_rad(&self) -> f32 {
        self.inner.read().expect("feedback store lock poisoned").angle_rad
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_support::scenario_config;

    #[test]
    fn status_bits_unpack_at_configured_positions() {
        let cfg = scenario_config();
        let bits = cfg.status_bits();
        // fault bit is index 1 in the scenario config
        let status_byte = 0b0000_0010;
        let snapshot = StatusSnapshot::from_byte(status_byte, bits);
        assert!(snapshot.fault);
        assert!(!snapshot.direction);
        assert!(!snapshot.running);
    }

    #[test]
    fn last_writer_wins_no_history() {
        let store = FeedbackStore::new();
        store.update_feedback(1.0, 2.0, 10);
        store.update_feedback(3.0, 4.0, 20);
        let snap = store.snapshot();
        assert_eq!(snap.velocity_rad_per_s, 3.0);
        assert_eq!(snap.angle_rad, 4.0);
        assert_eq!(snap.encoder_count, 20);
    }

    #[test]
    fn status_update_does_not_clobber_feedback_fields() {
        let cfg = scenario_config();
        let store = FeedbackStore::new();
        store.update_feedback(1.0, 2.0, 10);
        store.update_status(0, 5, 8, 400, cfg.status_bits());
        let snap = store.snapshot();
        assert_eq!(snap.angle_rad, 2.0);
        assert_eq!(snap.status_job_id, Some(5));
        assert_eq!(snap.microstep, Some(8));
        assert_eq!(snap.pulses_remaining, Some(400));
    }
}
