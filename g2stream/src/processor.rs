//! Histogram recomputation on its own thread
//!
//! Requests go through a channel of capacity one: while a recompute runs,
//! any number of `notify` calls collapse into a single pending request,
//! which always sees the newest periods once it is served.

use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::JoinHandle;

use g2tools::corr::{ComputeError, CorrelationWindow, HistogramState, Snapshot};

#[allow(unused_imports)]
use tracing::{debug, error, info, span, warn, Level};

use crate::ingest::Diagnostics;

/// Cheap to clone; the worker thread exits once every handle is dropped
#[derive(Clone)]
pub struct HistogramWorker {
    notify: flume::Sender<()>,
}

impl HistogramWorker {
    /// Start the worker. Each completed recompute is delivered on
    /// `results`; a failed one redelivers the last good histogram.
    pub fn spawn(
        window: Arc<Mutex<CorrelationWindow>>,
        results: flume::Sender<HistogramState>,
        diagnostics: Arc<Mutex<Diagnostics>>,
    ) -> (Self, JoinHandle<()>) {
        let (notify, requests) = flume::bounded(1);
        let join_handle = std::thread::spawn(move || {
            let span = span!(Level::INFO, "histogram worker");
            let _enter = span.enter();
            while let Ok(()) = requests.recv() {
                let state = match recompute(&window) {
                    Some(Ok(state)) => state,
                    Some(Err(e)) => {
                        warn!("recompute failed, keeping previous histogram: {}", e);
                        diagnostics.lock().compute_failures += 1;
                        window.lock().state().clone()
                    }
                    None => {
                        debug!("result outdated, abandoned");
                        continue;
                    }
                };
                if results.send(state).is_err() {
                    break;
                }
            }
        });
        (HistogramWorker { notify }, join_handle)
    }

    /// Ask for a recompute without blocking. Returns false if a request was
    /// already pending, in which case that one covers this call.
    pub fn notify(&self) -> bool {
        self.notify.try_send(()).is_ok()
    }
}

/// Snapshot under the lock, compute outside it, then commit
fn recompute(window: &Mutex<CorrelationWindow>) -> Option<Result<HistogramState, ComputeError>> {
    let snap = window.lock().snapshot();
    let result = snap.compute();
    settle(window, &snap, result)
}

/// `None` when the window was reset since `snap` was taken, or a newer
/// result is already stored. Failures are only reported for the current
/// generation.
fn settle(
    window: &Mutex<CorrelationWindow>,
    snap: &Snapshot,
    result: Result<HistogramState, ComputeError>,
) -> Option<Result<HistogramState, ComputeError>> {
    let mut window = window.lock();
    match result {
        Ok(state) => {
            if window.commit(snap, state.clone()) {
                Some(Ok(state))
            } else {
                None
            }
        }
        Err(_) if window.generation() != snap.generation => None,
        Err(e) => Some(Err(e)),
    }
}
