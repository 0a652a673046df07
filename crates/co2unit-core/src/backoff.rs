//! Connection backoff persisted across resets.
//!
//! After a failed connection the next `backoff_threshold - 1` communication
//! episodes are skipped. Every further failure widens the gap by one, up to
//! the configured maximum. One success resets everything.

use log::info;

use crate::nvs::{NvStore, keys};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ConnectBackoff {
    pub attempts_tried: u32,
    pub backoff_threshold: u32,
}

impl ConnectBackoff {
    pub fn load<S: NvStore + ?Sized>(store: &mut S) -> Result<Self, S::Error> {
        Ok(Self {
            attempts_tried: store.get_or(keys::BACKOFF_TRIED, 0)?,
            backoff_threshold: store.get_or(keys::BACKOFF_THRESHOLD, 0)?,
        })
    }

    pub fn save<S: NvStore + ?Sized>(&self, store: &mut S) -> Result<(), S::Error> {
        store.set(keys::BACKOFF_TRIED, self.attempts_tried)?;
        store.set(keys::BACKOFF_THRESHOLD, self.backoff_threshold)
    }

    /// Returns `false` when this episode must be skipped.
    pub fn should_attempt(&mut self) -> bool {
        if self.attempts_tried < self.backoff_threshold {
            self.attempts_tried += 1;
            info!(
                "backoff: skipping attempts_tried={} threshold={}",
                self.attempts_tried, self.backoff_threshold
            );
            false
        } else {
            true
        }
    }

    pub fn record_success(&mut self) {
        self.attempts_tried = 0;
        self.backoff_threshold = 0;
    }

    pub fn record_failure(&mut self, max_threshold: u32) {
        self.backoff_threshold = self.backoff_threshold.saturating_add(1).min(max_threshold);
        self.attempts_tried = 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nvs::MemoryNvStore;

    #[test]
    fn fresh_state_always_attempts() {
        let mut backoff = ConnectBackoff::default();
        assert!(backoff.should_attempt());
        assert!(backoff.should_attempt());
    }

    #[test]
    fn failures_skip_a_growing_number_of_episodes() {
        let mut backoff = ConnectBackoff::default();

        backoff.record_failure(10);
        assert!(backoff.should_attempt());

        backoff.record_failure(10);
        assert!(!backoff.should_attempt());
        assert!(backoff.should_attempt());

        backoff.record_failure(10);
        assert!(!backoff.should_attempt());
        assert!(!backoff.should_attempt());
        assert!(backoff.should_attempt());
    }

    #[test]
    fn threshold_saturates_and_success_resets() {
        let mut backoff = ConnectBackoff::default();
        for _ in 0..50 {
            backoff.record_failure(4);
            assert!(backoff.backoff_threshold <= 4);
        }
        assert_eq!(backoff.backoff_threshold, 4);

        backoff.record_success();
        assert_eq!(backoff, ConnectBackoff::default());
    }

    #[test]
    fn state_survives_a_reset() {
        let mut store = MemoryNvStore::new();
        let mut backoff = ConnectBackoff::default();
        backoff.record_failure(6);
        backoff.record_failure(6);
        backoff.save(&mut store).unwrap();

        let loaded = ConnectBackoff::load(&mut store).unwrap();
        assert_eq!(loaded, backoff);
    }
}
