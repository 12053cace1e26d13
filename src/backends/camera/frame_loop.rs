// SPDX-License-Identifier: GPL-3.0-only
//! Thread lifecycle management for camera stream loops
//!
//! Every driver that produces frames runs one loop thread per active
//! repeating request. Stopping the repeating request stops and joins the
//! thread, so after `stop()` returns no further frame reaches the surface.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Action returned by the loop callback to control loop behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopAction {
    /// Continue running the loop
    Continue,
    /// Stop the loop gracefully
    Stop,
}

/// Controller for a stream loop running in a separate thread
///
/// # Example
///
/// ```ignore
/// let mut controller = CaptureLoopController::start("synthetic-stream", move || {
///     surface.queue_frame(render_pattern());
///     LoopAction::Continue
/// })?;
///
/// // Later, stop the loop and wait for the thread
/// controller.stop();
/// ```
pub struct CaptureLoopController {
    /// Thread handle for joining
    thread_handle: Option<JoinHandle<()>>,
    /// Signal to stop the loop
    stop_signal: Arc<AtomicBool>,
    /// Completed iterations
    iterations: Arc<AtomicU64>,
    /// Name for logging
    name: String,
}

impl CaptureLoopController {
    /// Start a new loop in a named thread
    ///
    /// The closure is called repeatedly until it returns `LoopAction::Stop`
    /// or `stop()` is called.
    pub fn start<F>(name: &str, mut loop_fn: F) -> std::io::Result<Self>
    where
        F: FnMut() -> LoopAction + Send + 'static,
    {
        Self::start_with_init(name, || Ok(()), move |_: &mut ()| loop_fn())
    }

    /// Start a loop whose state is built on the loop thread
    ///
    /// `init_fn` runs once on the new thread, so the state it returns does
    /// not need to be `Send` (V4L2 streams are created this way). If
    /// initialization fails, the thread exits immediately and `on_init_error`
    /// receives the message.
    pub fn start_with_init<S, I, F>(name: &str, init_fn: I, loop_fn: F) -> std::io::Result<Self>
    where
        S: 'static,
        I: FnOnce() -> Result<S, String> + Send + 'static,
        F: FnMut(&mut S) -> LoopAction + Send + 'static,
    {
        Self::spawn(name, init_fn, loop_fn, |_| {})
    }

    /// Like [`start_with_init`](Self::start_with_init) with an init failure hook
    pub fn start_with_init_or_else<S, I, F, E>(
        name: &str,
        init_fn: I,
        loop_fn: F,
        on_init_error: E,
    ) -> std::io::Result<Self>
    where
        S: 'static,
        I: FnOnce() -> Result<S, String> + Send + 'static,
        F: FnMut(&mut S) -> LoopAction + Send + 'static,
        E: FnOnce(String) + Send + 'static,
    {
        Self::spawn(name, init_fn, loop_fn, on_init_error)
    }

    fn spawn<S, I, F, E>(
        name: &str,
        init_fn: I,
        mut loop_fn: F,
        on_init_error: E,
    ) -> std::io::Result<Self>
    where
        S: 'static,
        I: FnOnce() -> Result<S, String> + Send + 'static,
        F: FnMut(&mut S) -> LoopAction + Send + 'static,
        E: FnOnce(String) + Send + 'static,
    {
        let stop_signal = Arc::new(AtomicBool::new(false));
        let iterations = Arc::new(AtomicU64::new(0));
        let stop_signal_clone = Arc::clone(&stop_signal);
        let iterations_clone = Arc::clone(&iterations);
        let name_clone = name.to_string();

        info!(name = %name, "Starting stream loop");

        let thread_handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let mut state = match init_fn() {
                    Ok(s) => s,
                    Err(e) => {
                        warn!(name = %name_clone, error = %e, "Stream loop initialization failed");
                        on_init_error(e);
                        return;
                    }
                };

                while !stop_signal_clone.load(Ordering::SeqCst) {
                    let action = loop_fn(&mut state);
                    iterations_clone.fetch_add(1, Ordering::Relaxed);
                    if action == LoopAction::Stop {
                        debug!(name = %name_clone, "Loop requested stop");
                        break;
                    }
                }

                info!(name = %name_clone, "Stream loop thread exiting");
            })?;

        Ok(Self {
            thread_handle: Some(thread_handle),
            stop_signal,
            iterations,
            name: name.to_string(),
        })
    }

    /// Check if the loop is still running
    pub fn is_running(&self) -> bool {
        self.thread_handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Shared stop flag for long blocking operations inside the loop
    pub fn stop_signal(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop_signal)
    }

    pub fn iterations(&self) -> u64 {
        self.iterations.load(Ordering::Relaxed)
    }

    /// Signal the loop to stop without waiting
    pub fn request_stop(&self) {
        debug!(name = %self.name, "Requesting stream loop stop");
        self.stop_signal.store(true, Ordering::SeqCst);
    }

    /// Stop the loop and wait for the thread to finish
    pub fn stop(&mut self) {
        self.request_stop();
        self.join();
    }

    /// Wait for the thread to finish without sending stop signal
    pub fn join(&mut self) {
        if let Some(handle) = self.thread_handle.take() {
            if handle.thread().id() == thread::current().id() {
                // Stopped from inside the loop; the loop exits on its own
                return;
            }
            if let Err(e) = handle.join() {
                warn!(name = %self.name, "Stream loop thread panicked: {:?}", e);
            } else {
                debug!(name = %self.name, "Stream loop thread finished");
            }
        }
    }
}

impl Drop for CaptureLoopController {
    fn drop(&mut self) {
        if self.thread_handle.is_some() {
            debug!(name = %self.name, "CaptureLoopController dropped, stopping loop");
            self.stop();
        }
    }
}

/// Sleeps a loop to a fixed rate while staying responsive to a stop flag
pub struct FramePacer {
    interval: Duration,
    next_tick: Instant,
}

impl FramePacer {
    pub fn new(fps: u32) -> Self {
        Self {
            interval: Duration::from_secs(1) / fps.max(1),
            next_tick: Instant::now(),
        }
    }

    /// Block until the next tick. Returns false if `stop` was raised meanwhile.
    pub fn wait(&mut self, stop: &AtomicBool) -> bool {
        self.next_tick += self.interval;
        loop {
            if stop.load(Ordering::SeqCst) {
                return false;
            }
            let now = Instant::now();
            if now >= self.next_tick {
                // Fell behind: do not try to catch up with a burst
                if now - self.next_tick > self.interval {
                    self.next_tick = now;
                }
                return true;
            }
            thread::sleep((self.next_tick - now).min(Duration::from_millis(5)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn test_basic_loop() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = Arc::clone(&counter);

        let mut controller = CaptureLoopController::start("test-loop", move || {
            let count = counter_clone.fetch_add(1, Ordering::SeqCst);
            if count >= 10 {
                LoopAction::Stop
            } else {
                LoopAction::Continue
            }
        })
        .unwrap();

        controller.join();

        assert_eq!(counter.load(Ordering::SeqCst), 11); // 0-10 inclusive
        assert_eq!(controller.iterations(), 11);
    }

    #[test]
    fn test_stop_signal() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = Arc::clone(&counter);

        let mut controller = CaptureLoopController::start("test-loop", move || {
            counter_clone.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(10));
            LoopAction::Continue
        })
        .unwrap();

        thread::sleep(Duration::from_millis(50));

        controller.stop();
        assert!(counter.load(Ordering::SeqCst) > 0);
        assert!(!controller.is_running());
    }

    #[test]
    fn test_init_state_need_not_be_send() {
        let result = Arc::new(AtomicU32::new(0));
        let result_clone = Arc::clone(&result);

        let mut controller = CaptureLoopController::start_with_init(
            "test-init-loop",
            || Ok(std::rc::Rc::new(42u32)),
            move |state| {
                result_clone.store(**state, Ordering::SeqCst);
                LoopAction::Stop
            },
        )
        .unwrap();

        controller.join();
        assert_eq!(result.load(Ordering::SeqCst), 42);
    }

    #[test]
    fn test_init_failure_reported() {
        let ran = Arc::new(AtomicBool::new(false));
        let ran_clone = Arc::clone(&ran);
        let (tx, rx) = std::sync::mpsc::channel();

        let mut controller = CaptureLoopController::start_with_init_or_else(
            "test-fail-init",
            || Err::<(), _>("Init failed".to_string()),
            move |_: &mut ()| {
                ran_clone.store(true, Ordering::SeqCst);
                LoopAction::Stop
            },
            move |e| tx.send(e).unwrap(),
        )
        .unwrap();

        controller.join();
        assert!(!ran.load(Ordering::SeqCst));
        assert_eq!(rx.recv().unwrap(), "Init failed");
    }

    #[test]
    fn test_pacer_stops_on_signal() {
        let stop = AtomicBool::new(true);
        let mut pacer = FramePacer::new(1);
        let start = Instant::now();
        assert!(!pacer.wait(&stop));
        assert!(start.elapsed() < Duration::from_millis(500));
    }
}
