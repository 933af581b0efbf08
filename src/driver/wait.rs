//! Child-process wait registration.
//!
//! Waiting on a child process is blocking work, so each registration hands
//! the `Child` to a detached watcher thread that collects the exit status
//! and output, then marshals the result back through the wakeup channel.
//! Cancellation is soft: the watcher cannot be interrupted mid-wait, so
//! `cancel` suppresses the settlement instead and the child runs to
//! completion.

use crate::driver::poller::{RemoteSettle, Wakeup};
use crate::error::Error;
use crate::types::DeferredId;
use core::fmt;
use std::collections::HashMap;
use std::process::Child;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

/// Handle to one registered process wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WaitToken(u64);

/// Captured output of a finished process.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    /// Exit code, if the process exited normally.
    pub status: Option<i32>,
    /// Captured standard output.
    pub stdout: Vec<u8>,
    /// Captured standard error.
    pub stderr: Vec<u8>,
}

impl ProcessOutput {
    /// Returns true if the process exited with status zero.
    #[must_use]
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

impl fmt::Display for ProcessOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(code) => write!(f, "exit {code}"),
            None => write!(f, "terminated by signal"),
        }
    }
}

/// Table of in-flight process waits.
#[derive(Default)]
pub(crate) struct WaitTable {
    suppressors: HashMap<u64, Arc<AtomicBool>>,
    next_token: u64,
}

impl WaitTable {
    /// Spawns a detached watcher thread that waits for `child` and settles
    /// `node` with a [`ProcessOutput`] payload through the wakeup channel.
    pub(crate) fn register(
        &mut self,
        node: DeferredId,
        child: Child,
        wakeup: Arc<Wakeup>,
    ) -> WaitToken {
        let token = self.next_token;
        self.next_token += 1;

        let settle = RemoteSettle::new(node, wakeup);
        self.suppressors.insert(token, settle.suppress_flag());

        thread::Builder::new()
            .name(format!("adefer-wait-{token}"))
            .spawn(move || watch(child, &settle))
            .expect("spawn wait watcher");
        WaitToken(token)
    }

    /// Soft-cancels a wait: the eventual settlement is suppressed.
    /// Idempotent; unknown tokens are ignored.
    pub(crate) fn cancel(&mut self, token: WaitToken) {
        if let Some(flag) = self.suppressors.remove(&token.0) {
            flag.store(true, Ordering::Release);
        }
    }

    /// Suppresses every outstanding wait (barrier teardown).
    pub(crate) fn suppress_all(&mut self) {
        for flag in self.suppressors.values() {
            flag.store(true, Ordering::Release);
        }
        self.suppressors.clear();
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.suppressors.len()
    }
}

impl Drop for WaitTable {
    fn drop(&mut self) {
        // Watchers own their children and exit on their own; settlements
        // after this point land in a queue nobody drains.
        self.suppress_all();
    }
}

impl fmt::Debug for WaitTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaitTable")
            .field("in_flight", &self.suppressors.len())
            .finish()
    }
}

fn watch(child: Child, settle: &RemoteSettle) {
    match child.wait_with_output() {
        Ok(output) => {
            let payload = ProcessOutput {
                status: output.status.code(),
                stdout: output.stdout,
                stderr: output.stderr,
            };
            settle.fulfil(Box::new(payload));
        }
        Err(err) => {
            settle.reject(Error::user("process wait failed").with_source(err));
        }
    }
}
