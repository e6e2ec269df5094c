//! Fixed worker pool with a cooperative stop flag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use tracing::warn;

/// Fixed-size pool of named OS threads running one shared body.
///
/// The body receives its worker index and the shared stop flag; it is
/// expected to poll the flag during timed waits, since workers are never
/// preempted. There is no rebalancing and no dynamic scaling.
pub struct ThreadExecutor {
    stop: Arc<AtomicBool>,
    workers: Vec<thread::JoinHandle<()>>,
}

impl ThreadExecutor {
    /// Spawn `workers` threads, each running `body(worker_id, stop_flag)`
    /// until the flag is set.
    pub fn new<F>(workers: usize, body: F) -> Self
    where
        F: Fn(usize, &AtomicBool) + Send + Sync + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let body = Arc::new(body);
        let mut handles = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            let stop = stop.clone();
            let body = body.clone();
            let handle = thread::Builder::new()
                .name(format!("udf-worker-{worker_id}"))
                .spawn(move || body(worker_id, &stop))
                .expect("failed to spawn UDF worker thread");
            handles.push(handle);
        }
        Self {
            stop,
            workers: handles,
        }
    }

    /// Flag the workers to stop without waiting for them.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Set the stop flag and join every worker. Idempotent: later calls find
    /// nothing left to join.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                warn!("UDF worker panicked before joining");
            }
        }
    }
}

impl Drop for ThreadExecutor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use super::*;

    #[test]
    fn every_worker_runs_with_its_own_id() {
        let seen = Arc::new(AtomicUsize::new(0));
        let body_seen = seen.clone();
        let mut executor = ThreadExecutor::new(4, move |worker_id, stop| {
            body_seen.fetch_add(worker_id + 1, Ordering::SeqCst);
            while !stop.load(Ordering::Relaxed) {
                thread::sleep(Duration::from_millis(5));
            }
        });

        // Worker ids 0..4 contribute 1+2+3+4.
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while seen.load(Ordering::SeqCst) != 10 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(seen.load(Ordering::SeqCst), 10);
        executor.stop();
    }

    #[test]
    fn stop_is_idempotent() {
        let rounds = Arc::new(AtomicUsize::new(0));
        let body_rounds = rounds.clone();
        let mut executor = ThreadExecutor::new(2, move |_worker_id, stop| {
            while !stop.load(Ordering::Relaxed) {
                body_rounds.fetch_add(1, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(1));
            }
        });

        executor.stop();
        let after_first = rounds.load(Ordering::SeqCst);
        executor.stop();
        executor.stop();
        thread::sleep(Duration::from_millis(10));
        assert_eq!(rounds.load(Ordering::SeqCst), after_first);
    }

    #[test]
    fn drop_joins_workers() {
        let running = Arc::new(AtomicBool::new(true));
        let body_running = running.clone();
        let executor = ThreadExecutor::new(1, move |_worker_id, stop| {
            while !stop.load(Ordering::Relaxed) {
                thread::sleep(Duration::from_millis(1));
            }
            body_running.store(false, Ordering::SeqCst);
        });
        drop(executor);
        assert!(!running.load(Ordering::SeqCst));
    }
}
