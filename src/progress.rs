//! Shared progress/cancellation cell and the background reporter thread.
//!
//! Kernels write progress and poll the cancel flag between work units; UI,
//! CLI or IPC reporters read it from another thread.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::mpsc::{channel, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Default polling interval of [`ProgressReporter`].
pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_millis(100);

/// Atomic `(progress, cancel_requested)` pair.
///
/// Progress is stored as `f32` bits, clamped to `[0, 1]` and never decreases
/// until [`reset`](Self::reset).
#[derive(Debug, Default)]
pub struct BakeProgressState {
    progress_bits: AtomicU32,
    cancel: AtomicBool,
}

impl BakeProgressState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current progress in `[0, 1]`.
    #[inline]
    pub fn progress(&self) -> f32 {
        f32::from_bits(self.progress_bits.load(Ordering::Acquire))
    }

    /// Raise progress to `value`; lower or NaN values are ignored.
    pub fn set_progress(&self, value: f32) {
        if value.is_nan() {
            return;
        }
        let value = value.clamp(0.0, 1.0);
        let _ = self
            .progress_bits
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
                (value > f32::from_bits(bits)).then(|| value.to_bits())
            });
    }

    /// Ask running work to stop at its next poll.
    pub fn request_cancel(&self) {
        self.cancel.store(true, Ordering::Release);
    }

    #[inline]
    pub fn is_cancel_requested(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    /// Clear progress and the cancel flag for the next bake.
    pub fn reset(&self) {
        self.progress_bits.store(0f32.to_bits(), Ordering::Release);
        self.cancel.store(false, Ordering::Release);
    }
}

/// Maps a sub-task's `[0, 1]` progress into a window of the shared state.
#[derive(Clone, Copy)]
pub struct ProgressSpan<'a> {
    state: &'a BakeProgressState,
    start: f32,
    len: f32,
}

impl<'a> ProgressSpan<'a> {
    pub fn new(state: &'a BakeProgressState, start: f32, end: f32) -> Self {
        Self {
            state,
            start,
            len: (end - start).max(0.0),
        }
    }

    /// Report `fraction` of this span as done.
    pub fn set(&self, fraction: f32) {
        self.state.set_progress(self.start + self.len * fraction.clamp(0.0, 1.0));
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.state.is_cancel_requested()
    }
}

/// Thread forwarding progress to a sink at a fixed interval.
///
/// Call [`stop`](Self::stop) (or drop it) before reporting the final result so
/// a late progress update cannot race the final report.
pub struct ProgressReporter {
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl ProgressReporter {
    /// Spawn a reporter polling `state` every `interval`.
    pub fn spawn<F>(state: Arc<BakeProgressState>, interval: Duration, mut sink: F) -> Self
    where
        F: FnMut(f32) + Send + 'static,
    {
        let (stop_tx, stop_rx) = channel::<()>();
        let handle = thread::Builder::new()
            .name("lightbaker-progress".into())
            .spawn(move || {
                let mut last = f32::NAN;
                loop {
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {
                            let p = state.progress();
                            if p != last {
                                sink(p);
                                last = p;
                            }
                        }
                        // Stop requested or reporter handle dropped
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
            });

        let handle = match handle {
            Ok(h) => Some(h),
            Err(e) => {
                tracing::warn!("progress reporter thread not started: {}", e);
                None
            }
        };

        Self {
            stop_tx: Some(stop_tx),
            handle,
        }
    }

    /// Stop the thread and wait for it to finish.
    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ProgressReporter {
    fn drop(&mut self) {
        self.stop();
    }
}
