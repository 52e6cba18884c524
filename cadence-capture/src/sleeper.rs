//! Sleep that can be cut short from another thread

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// A sleeper for capture threads; `quit()` wakes every sleeper at once
#[derive(Debug, Default)]
pub struct QuittableSleeper {
    should_quit: Mutex<bool>,
    quit_changed: Condvar,
}

impl QuittableSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn quit(&self) {
        *self.should_quit.lock() = true;
        self.quit_changed.notify_all();
    }

    /// Allow sleeping again after a quit, e.g. when a card is restarted
    pub fn unquit(&self) {
        *self.should_quit.lock() = false;
    }

    pub fn should_quit(&self) -> bool {
        *self.should_quit.lock()
    }

    /// Sleep until `deadline`; returns `false` if woken by quit
    pub fn sleep_until(&self, deadline: Instant) -> bool {
        let mut quit = self.should_quit.lock();
        while !*quit {
            if self.quit_changed.wait_until(&mut quit, deadline).timed_out() {
                break;
            }
        }
        !*quit
    }

    /// Sleep for `duration`; returns `false` if woken by quit
    pub fn sleep_for(&self, duration: Duration) -> bool {
        self.sleep_until(Instant::now() + duration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_full_sleep_without_quit() {
        let sleeper = QuittableSleeper::new();
        let start = Instant::now();
        assert!(sleeper.sleep_for(Duration::from_millis(20)));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_quit_wakes_mid_sleep() {
        let sleeper = Arc::new(QuittableSleeper::new());
        let waker = sleeper.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            waker.quit();
        });

        let start = Instant::now();
        assert!(!sleeper.sleep_for(Duration::from_secs(10)));
        assert!(start.elapsed() < Duration::from_secs(5));
        handle.join().unwrap();

        // Stays quit until unquit
        assert!(!sleeper.sleep_for(Duration::from_secs(10)));
        sleeper.unquit();
        assert!(sleeper.sleep_for(Duration::from_millis(1)));
    }
}
