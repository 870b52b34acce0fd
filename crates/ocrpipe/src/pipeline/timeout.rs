//! Deadline-bounded execution of blocking steps.
//!
//! The step runs on a helper thread; the caller waits on a channel with a
//! deadline. A step that overruns is abandoned: its thread keeps running
//! until the blocking call returns, but its result is discarded.

use std::panic::{self, AssertUnwindSafe};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, select, unbounded, Sender};

use crate::strategy::PageProgress;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepFailure {
    TimedOut,
    Panicked(String),
}

/// Forwards page progress from the helper thread to the waiting caller.
struct ChannelPageProgress(Sender<(usize, usize)>);

impl PageProgress for ChannelPageProgress {
    fn page_done(&self, page: usize, total: usize) {
        let _ = self.0.send((page, total));
    }
}

pub(crate) fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Runs `step` on a helper thread and waits at most `limit` for it.
///
/// Page progress reported by the step is delivered to `on_page` on the
/// calling thread while waiting.
pub fn run_with_deadline<T, F>(
    name: &str,
    limit: Duration,
    step: F,
    on_page: &dyn Fn(usize, usize),
) -> Result<T, StepFailure>
where
    T: Send + 'static,
    F: FnOnce(&dyn PageProgress) -> T + Send + 'static,
{
    let (done_tx, done_rx) = bounded::<Result<T, String>>(1);
    let (page_tx, page_rx) = unbounded::<(usize, usize)>();

    thread::Builder::new()
        .name(format!("ocrpipe-{}", name))
        .spawn(move || {
            let progress = ChannelPageProgress(page_tx);
            let result = panic::catch_unwind(AssertUnwindSafe(|| step(&progress)))
                .map_err(panic_message);
            // The caller may have given up already
            let _ = done_tx.send(result);
        })
        .map_err(|e| StepFailure::Panicked(format!("failed to spawn step thread: {}", e)))?;

    let deadline = Instant::now() + limit;

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        select! {
            recv(done_rx) -> msg => {
                // Deliver page updates that raced with completion
                for (page, total) in page_rx.try_iter() {
                    on_page(page, total);
                }
                return finish(msg.ok());
            }
            recv(page_rx) -> msg => match msg {
                Ok((page, total)) => on_page(page, total),
                // The helper drops its sender only after sending the result
                Err(_) => return finish(done_rx.recv().ok()),
            },
            default(remaining) => {
                log::warn!("Step '{}' exceeded {:?}, abandoning it", name, limit);
                return Err(StepFailure::TimedOut);
            }
        }
    }
}

fn finish<T>(msg: Option<Result<T, String>>) -> Result<T, StepFailure> {
    match msg {
        Some(Ok(value)) => Ok(value),
        Some(Err(reason)) => Err(StepFailure::Panicked(reason)),
        None => Err(StepFailure::Panicked(
            "step thread exited without a result".to_string(),
        )),
    }
}
