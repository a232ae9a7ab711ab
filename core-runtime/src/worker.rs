//! # Named Worker Threads
//!
//! Long-running background loops (one decode task per playing sound) run on
//! dedicated OS threads rather than a shared pool, so a slow source never
//! delays another sound's refill.

use crate::error::{Error, Result};
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

/// Owned handle to a spawned worker thread.
#[derive(Debug)]
pub struct Worker {
    name: String,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    /// Thread name the worker was spawned with.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// `true` while the thread body has not returned.
    pub fn is_alive(&self) -> bool {
        self.handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Block until the thread exits.
    ///
    /// The caller must have already told the loop to stop (cancellation token
    /// or dropped channel), otherwise this waits forever.
    pub fn join(mut self) -> Result<()> {
        self.join_inner()
    }

    fn join_inner(&mut self) -> Result<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };

        handle.join().map_err(|_| {
            warn!(worker = %self.name, "Worker thread panicked");
            Error::WorkerPanicked(self.name.clone())
        })?;

        debug!(worker = %self.name, "Worker joined");
        Ok(())
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        let _ = self.join_inner();
    }
}

/// Spawn `body` on a new thread called `name`.
pub fn spawn_worker<F>(name: impl Into<String>, body: F) -> Result<Worker>
where
    F: FnOnce() + Send + 'static,
{
    let name = name.into();

    let handle = thread::Builder::new()
        .name(name.clone())
        .spawn(body)
        .map_err(|source| Error::Spawn {
            name: name.clone(),
            source,
        })?;

    debug!(worker = %name, "Worker spawned");
    Ok(Worker {
        name,
        handle: Some(handle),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_worker_runs_with_name() {
        let seen = Arc::new(std::sync::Mutex::new(None));
        let seen_clone = Arc::clone(&seen);

        let worker = spawn_worker("oggbp-test", move || {
            *seen_clone.lock().unwrap() = thread::current().name().map(str::to_string);
        })
        .unwrap();

        assert_eq!(worker.name(), "oggbp-test");
        worker.join().unwrap();
        assert_eq!(seen.lock().unwrap().as_deref(), Some("oggbp-test"));
    }

    #[test]
    fn test_panicking_worker_reports_error() {
        let worker = spawn_worker("oggbp-panics", || panic!("boom")).unwrap();
        let err = worker.join().unwrap_err();
        assert!(matches!(err, Error::WorkerPanicked(name) if name == "oggbp-panics"));
    }

    #[test]
    fn test_drop_joins_thread() {
        let done = Arc::new(AtomicBool::new(false));
        let done_clone = Arc::clone(&done);

        let worker = spawn_worker("oggbp-drop", move || {
            done_clone.store(true, Ordering::SeqCst);
        })
        .unwrap();
        drop(worker);

        assert!(done.load(Ordering::SeqCst));
    }
}
