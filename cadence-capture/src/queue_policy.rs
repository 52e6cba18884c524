//! Adaptive queue length for cards that do not drive the output clock
//!
//! Every non-master card runs on its own clock, so frames arrive slightly too
//! early or too late relative to the master. Keeping a few frames queued
//! protects against starvation at the cost of latency. The policy learns how
//! many: it grows the safe length by one frame when the card starves after
//! having reached the current safe point, and shrinks it by one after a long
//! run of frames where the card always had something to spare.

/// Tuning constants for [`QueueLengthPolicy`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueuePolicyConfig {
    /// Ceiling for the safe queue length
    pub max_safe_queue_length: usize,
    /// Consecutive surplus frames before the safe length shrinks
    pub surplus_window: u32,
    /// Safe length after a reset
    pub initial_safe_queue_length: usize,
}

impl Default for QueuePolicyConfig {
    fn default() -> Self {
        Self {
            max_safe_queue_length: 5,
            surplus_window: 1000,
            initial_safe_queue_length: 1,
        }
    }
}

/// What the scheduler saw on one card during one output frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueObservation {
    /// A frame was needed but the queue was empty
    Starved,
    /// A frame was taken; this many were left behind
    Surplus(usize),
}

#[derive(Debug, Clone)]
pub struct QueueLengthPolicy {
    config: QueuePolicyConfig,
    safe_queue_length: usize,
    frames_with_at_least_one: u32,
    been_at_safe_point_since_last_starvation: bool,
}

impl QueueLengthPolicy {
    pub fn new(config: QueuePolicyConfig) -> Self {
        let mut policy = Self {
            config,
            safe_queue_length: 0,
            frames_with_at_least_one: 0,
            been_at_safe_point_since_last_starvation: false,
        };
        policy.reset();
        policy
    }

    pub fn reset(&mut self) {
        self.safe_queue_length = self
            .config
            .initial_safe_queue_length
            .min(self.config.max_safe_queue_length);
        self.frames_with_at_least_one = 0;
        self.been_at_safe_point_since_last_starvation = false;
    }

    pub fn safe_queue_length(&self) -> usize {
        self.safe_queue_length
    }

    /// Feed one frame's observation; the safe length moves by at most one
    pub fn update(&mut self, observation: QueueObservation) {
        match observation {
            QueueObservation::Starved => {
                if self.been_at_safe_point_since_last_starvation
                    && self.safe_queue_length < self.config.max_safe_queue_length
                {
                    self.safe_queue_length += 1;
                }
                self.frames_with_at_least_one = 0;
                self.been_at_safe_point_since_last_starvation = false;
            }
            QueueObservation::Surplus(0) => {
                self.frames_with_at_least_one = 0;
            }
            QueueObservation::Surplus(queue_length) => {
                if queue_length >= self.safe_queue_length {
                    self.been_at_safe_point_since_last_starvation = true;
                }
                self.frames_with_at_least_one += 1;
                if self.frames_with_at_least_one >= self.config.surplus_window && self.safe_queue_length > 0 {
                    self.safe_queue_length -= 1;
                    self.frames_with_at_least_one = 0;
                }
            }
        }
    }
}

impl Default for QueueLengthPolicy {
    fn default() -> Self {
        Self::new(QueuePolicyConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shrinks_after_exactly_one_window() {
        let mut policy = QueueLengthPolicy::default();
        assert_eq!(policy.safe_queue_length(), 1);

        for _ in 0..999 {
            policy.update(QueueObservation::Surplus(3));
        }
        assert_eq!(policy.safe_queue_length(), 1);
        policy.update(QueueObservation::Surplus(3));
        assert_eq!(policy.safe_queue_length(), 0);

        // Floor at zero
        for _ in 0..2000 {
            policy.update(QueueObservation::Surplus(3));
        }
        assert_eq!(policy.safe_queue_length(), 0);
    }

    #[test]
    fn test_starvation_grows_only_after_safe_point() {
        let mut policy = QueueLengthPolicy::default();

        // Never reached the safe point
        policy.update(QueueObservation::Starved);
        assert_eq!(policy.safe_queue_length(), 1);

        policy.update(QueueObservation::Surplus(1));
        policy.update(QueueObservation::Starved);
        assert_eq!(policy.safe_queue_length(), 2);

        // The flag is cleared by the starvation itself
        policy.update(QueueObservation::Starved);
        assert_eq!(policy.safe_queue_length(), 2);

        // Surplus below the safe length does not count as reaching it
        policy.update(QueueObservation::Surplus(1));
        policy.update(QueueObservation::Starved);
        assert_eq!(policy.safe_queue_length(), 2);
    }

    #[test]
    fn test_ceiling() {
        let mut policy = QueueLengthPolicy::default();
        for _ in 0..20 {
            policy.update(QueueObservation::Surplus(10));
            policy.update(QueueObservation::Starved);
        }
        assert_eq!(policy.safe_queue_length(), 5);
    }

    #[test]
    fn test_zero_surplus_restarts_window() {
        let mut policy = QueueLengthPolicy::default();
        for _ in 0..999 {
            policy.update(QueueObservation::Surplus(2));
        }
        policy.update(QueueObservation::Surplus(0));
        assert_eq!(policy.safe_queue_length(), 1);
        for _ in 0..999 {
            policy.update(QueueObservation::Surplus(2));
        }
        assert_eq!(policy.safe_queue_length(), 1);
        policy.update(QueueObservation::Surplus(2));
        assert_eq!(policy.safe_queue_length(), 0);
    }

    #[test]
    fn test_starvation_restarts_window() {
        let mut policy = QueueLengthPolicy::default();
        for _ in 0..500 {
            policy.update(QueueObservation::Surplus(2));
        }
        policy.update(QueueObservation::Starved);
        assert_eq!(policy.safe_queue_length(), 2);
        for _ in 0..999 {
            policy.update(QueueObservation::Surplus(2));
        }
        assert_eq!(policy.safe_queue_length(), 2);
        policy.update(QueueObservation::Surplus(2));
        assert_eq!(policy.safe_queue_length(), 1);
    }
}
