//! The worker-pool source.
//!
//! A small fixed pool of OS threads for blocking or CPU-bound work. A
//! worker call produces a deferred that settles through the loop's wakeup
//! channel when the job finishes on a pool thread.
//!
//! Blocking work cannot be interrupted mid-execution, so cancellation is
//! soft: the job is marked cancelled, runs to completion, and its
//! settlement is suppressed.

use core::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_queue::SegQueue;
use parking_lot::{Condvar, Mutex};

use crate::barrier::with_engine;
use crate::deferred::Deferred;
use crate::driver::poller::RemoteSettle;
use crate::error::{Error, Result};
use crate::source::{SourceAdapter, SourceContext};
use crate::types::PanicPayload;

type Job = Box<dyn FnOnce() + Send>;

const IDLE_WAIT: Duration = Duration::from_millis(50);

struct PoolInner {
    queue: SegQueue<Job>,
    lock: Mutex<()>,
    available: Condvar,
    shutdown: AtomicBool,
}

impl PoolInner {
    fn submit(&self, job: Job) {
        self.queue.push(job);
        self.available.notify_one();
    }

    fn worker_loop(&self) {
        loop {
            if let Some(job) = self.queue.pop() {
                job();
                continue;
            }
            if self.shutdown.load(Ordering::Acquire) {
                return;
            }
            let mut guard = self.lock.lock();
            let _ = self.available.wait_for(&mut guard, IDLE_WAIT);
        }
    }
}

/// A fixed-size pool of worker threads for blocking jobs.
pub struct WorkerPool {
    inner: Arc<PoolInner>,
    threads: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns a pool with `threads` workers (at least one).
    #[must_use]
    pub fn new(threads: usize) -> Self {
        let inner = Arc::new(PoolInner {
            queue: SegQueue::new(),
            lock: Mutex::new(()),
            available: Condvar::new(),
            shutdown: AtomicBool::new(false),
        });

        let count = threads.max(1);
        let mut handles = Vec::with_capacity(count);
        for index in 0..count {
            let worker = Arc::clone(&inner);
            let handle = thread::Builder::new()
                .name(format!("adefer-worker-{index}"))
                .spawn(move || worker.worker_loop())
                .expect("spawn pool worker");
            handles.push(handle);
        }

        Self {
            inner,
            threads: handles,
        }
    }

    /// A deferred that fulfils with the job's result, computed on a pool
    /// thread. Must be called under an active barrier.
    pub fn call<T, F>(&self, job: F) -> Result<Deferred>
    where
        T: Any + Send,
        F: FnOnce() -> core::result::Result<T, Error> + Send + 'static,
    {
        let pool = Arc::clone(&self.inner);
        with_engine(move |state| {
            let node = state.insert_source(Box::new(WorkerSource {
                pool,
                job: Some(Box::new(move |settle: RemoteSettle| {
                    match catch_unwind(AssertUnwindSafe(job)) {
                        Ok(Ok(value)) => settle.fulfil(Box::new(value)),
                        Ok(Err(error)) => settle.reject(error),
                        Err(payload) => settle.reject(
                            Error::user("worker job panicked")
                                .with_source(PanicPayload::from_unwind(payload.as_ref())),
                        ),
                    }
                })),
                suppress: None,
            }));
            Ok(Deferred::new(state.barrier, node))
        })
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.inner.shutdown.store(true, Ordering::Release);
        self.inner.available.notify_all();
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
    }
}

impl core::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("threads", &self.threads.len())
            .field("queued", &self.inner.queue.len())
            .finish()
    }
}

struct WorkerSource {
    pool: Arc<PoolInner>,
    job: Option<Box<dyn FnOnce(RemoteSettle) + Send>>,
    suppress: Option<Arc<AtomicBool>>,
}

impl SourceAdapter for WorkerSource {
    fn start(&mut self, cx: &mut SourceContext<'_>) {
        let Some(job) = self.job.take() else { return };
        let settle = cx.remote();
        self.suppress = Some(settle.suppress_flag());
        self.pool.submit(Box::new(move || job(settle)));
    }

    fn abort(&mut self) {
        // Soft cancel: the job may already be running; its settlement is
        // suppressed instead.
        self.job = None;
        if let Some(flag) = &self.suppress {
            flag.store(true, Ordering::Release);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn pool_runs_submitted_jobs() {
        let pool = WorkerPool::new(2);
        let (tx, rx) = mpsc::channel();
        pool.inner.submit(Box::new(move || {
            tx.send(7_i32).expect("send result");
        }));
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)), Ok(7));
    }

    #[test]
    fn drop_joins_workers() {
        let pool = WorkerPool::new(1);
        let (tx, rx) = mpsc::channel();
        pool.inner.submit(Box::new(move || {
            tx.send(()).expect("send");
        }));
        rx.recv_timeout(Duration::from_secs(5)).expect("job ran");
        drop(pool);
    }
}
