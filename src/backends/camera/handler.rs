// SPDX-License-Identifier: GPL-3.0-only

//! Dedicated callback thread for camera device and session events
//!
//! Drivers never invoke callbacks inline. Every device and session callback
//! is posted to a [`CallbackHandler`] and runs, in posting order, on the
//! single thread owned by the matching [`HandlerThread`].

use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;
use tracing::{debug, info, warn};

type Job = Box<dyn FnOnce() + Send + 'static>;

enum HandlerMessage {
    Run(Job),
    Quit,
}

/// Cloneable queue into a [`HandlerThread`]
#[derive(Clone)]
pub struct CallbackHandler {
    name: String,
    sender: Sender<HandlerMessage>,
    thread_id: ThreadId,
}

impl CallbackHandler {
    /// Queue a job. Returns false if the thread has already quit.
    pub fn post<F>(&self, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let posted = self.sender.send(HandlerMessage::Run(Box::new(job))).is_ok();
        if !posted {
            warn!(name = %self.name, "Dropping job posted to stopped handler thread");
        }
        posted
    }

    /// Wait until every job posted before this call has run
    ///
    /// Returns false on timeout, when the thread is gone, or when called from
    /// the handler thread itself (which would wait on itself).
    pub fn flush(&self, timeout: Duration) -> bool {
        if self.is_current_thread() {
            warn!(name = %self.name, "flush() called from the handler thread");
            return false;
        }
        let (done_tx, done_rx) = mpsc::sync_channel(1);
        if !self.post(move || {
            let _ = done_tx.send(());
        }) {
            return false;
        }
        done_rx.recv_timeout(timeout).is_ok()
    }

    pub fn is_current_thread(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for CallbackHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackHandler")
            .field("name", &self.name)
            .finish()
    }
}

/// Thread that runs jobs posted through its [`CallbackHandler`]
pub struct HandlerThread {
    handler: CallbackHandler,
    thread_handle: Option<JoinHandle<()>>,
}

impl HandlerThread {
    pub fn start(name: &str) -> std::io::Result<Self> {
        let (sender, receiver) = mpsc::channel();
        let thread_name = name.to_string();

        let thread_handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || run_jobs(&thread_name, receiver))?;

        info!(name = %name, "Handler thread started");

        Ok(Self {
            handler: CallbackHandler {
                name: name.to_string(),
                sender,
                thread_id: thread_handle.thread().id(),
            },
            thread_handle: Some(thread_handle),
        })
    }

    pub fn handler(&self) -> CallbackHandler {
        self.handler.clone()
    }

    /// Run everything already queued, then stop the thread and join it
    pub fn quit_safely(&mut self) {
        let Some(handle) = self.thread_handle.take() else {
            return;
        };
        let _ = self.handler.sender.send(HandlerMessage::Quit);
        if handle.thread().id() == thread::current().id() {
            // Joining ourselves would deadlock; the loop exits after this job.
            return;
        }
        if let Err(e) = handle.join() {
            warn!(name = %self.handler.name, "Handler thread panicked: {:?}", e);
        } else {
            debug!(name = %self.handler.name, "Handler thread finished");
        }
    }
}

impl Drop for HandlerThread {
    fn drop(&mut self) {
        self.quit_safely();
    }
}

fn run_jobs(name: &str, receiver: Receiver<HandlerMessage>) {
    debug!(name = %name, "Handler loop running");
    while let Ok(message) = receiver.recv() {
        match message {
            HandlerMessage::Run(job) => job(),
            HandlerMessage::Quit => break,
        }
    }
    info!(name = %name, "Handler thread exiting");
}
