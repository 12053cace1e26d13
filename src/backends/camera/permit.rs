// SPDX-License-Identifier: GPL-3.0-only

//! Single-holder permit guarding capture session transitions
//!
//! Opening, configuring and closing the camera each hold the permit for the
//! duration of the transition. Because the transition often completes on a
//! different thread than it started on, the permit is represented by a
//! [`PermitGuard`] value that can be moved into a callback and is released
//! when dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

struct PermitState {
    held: Mutex<bool>,
    available: Condvar,
    acquired: AtomicU64,
    released: AtomicU64,
}

/// Counters for tests and diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PermitStats {
    pub acquired: u64,
    pub released: u64,
}

#[derive(Clone)]
pub struct SessionPermit {
    state: Arc<PermitState>,
}

impl Default for SessionPermit {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionPermit {
    pub fn new() -> Self {
        Self {
            state: Arc::new(PermitState {
                held: Mutex::new(false),
                available: Condvar::new(),
                acquired: AtomicU64::new(0),
                released: AtomicU64::new(0),
            }),
        }
    }

    /// Wait for the permit, without a bound
    pub fn acquire(&self) -> PermitGuard {
        let mut held = self
            .state
            .held
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        while *held {
            held = self
                .state
                .available
                .wait(held)
                .unwrap_or_else(PoisonError::into_inner);
        }

        *held = true;
        self.state.acquired.fetch_add(1, Ordering::SeqCst);
        PermitGuard {
            state: Arc::clone(&self.state),
        }
    }

    /// Wait up to `timeout` for the permit
    pub fn try_acquire_for(&self, timeout: Duration) -> Option<PermitGuard> {
        let deadline = Instant::now() + timeout;
        let mut held = self
            .state
            .held
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        while *held {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            let (guard, _) = self
                .state
                .available
                .wait_timeout(held, remaining)
                .unwrap_or_else(PoisonError::into_inner);
            held = guard;
        }

        *held = true;
        self.state.acquired.fetch_add(1, Ordering::SeqCst);
        Some(PermitGuard {
            state: Arc::clone(&self.state),
        })
    }

    pub fn is_held(&self) -> bool {
        *self
            .state
            .held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn stats(&self) -> PermitStats {
        PermitStats {
            acquired: self.state.acquired.load(Ordering::SeqCst),
            released: self.state.released.load(Ordering::SeqCst),
        }
    }
}

impl std::fmt::Debug for SessionPermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionPermit")
            .field("held", &self.is_held())
            .field("stats", &self.stats())
            .finish()
    }
}

/// Proof of holding the permit; releasing happens exactly once, on drop
#[must_use = "dropping the guard releases the permit immediately"]
pub struct PermitGuard {
    state: Arc<PermitState>,
}

impl PermitGuard {
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for PermitGuard {
    fn drop(&mut self) {
        let mut held = self
            .state
            .held
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *held = false;
        self.state.released.fetch_add(1, Ordering::SeqCst);
        drop(held);
        self.state.available.notify_one();
    }
}

impl std::fmt::Debug for PermitGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PermitGuard")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_second_acquire_times_out() {
        let permit = SessionPermit::new();
        let guard = permit.try_acquire_for(Duration::from_millis(10)).unwrap();
        let start = Instant::now();
        assert!(permit.try_acquire_for(Duration::from_millis(50)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(50));
        guard.release();
        assert!(permit.try_acquire_for(Duration::ZERO).is_some());
        assert_eq!(permit.stats(), PermitStats { acquired: 2, released: 2 });
    }

    #[test]
    fn test_guard_released_on_other_thread() {
        let permit = SessionPermit::new();
        let guard = permit.try_acquire_for(Duration::ZERO).unwrap();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            drop(guard);
        });
        assert!(permit.try_acquire_for(Duration::from_secs(2)).is_some());
        handle.join().unwrap();
        assert!(!permit.is_held());
    }

    #[test]
    fn test_acquire_waits_for_release() {
        let permit = SessionPermit::new();
        let guard = permit.acquire();
        let waiter = {
            let permit = permit.clone();
            thread::spawn(move || {
                let _guard = permit.acquire();
            })
        };
        thread::sleep(Duration::from_millis(50));
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.join().unwrap();
        assert_eq!(permit.stats(), PermitStats { acquired: 2, released: 2 });
    }
}
