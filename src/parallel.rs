//! Fork-join parallel driver
//!
//! One primitive: run a body over an index range on OS threads with atomic
//! work claiming, and hand every result back to the caller.
//!
//! ## Scheduling model
//! A shared atomic counter is pre-seeded to `range.start`; each worker
//! fetch-and-increments it to claim the next index, so load balances itself
//! without any per-item queueing. The worker pool is bounded by the hardware
//! concurrency minus one because the **caller participates** as the last
//! worker. The call blocks until every index has been claimed and completed;
//! there is no early abort and no cross-item ordering guarantee.
//!
//! ## Results & errors
//! Workers send `(index, value)` pairs back over a channel and the caller
//! scatters them into per-index slots after the join. Fallible bodies return
//! `Result`, leaving one error slot per index for the caller to check — see
//! [`collect_results`].
//!
//! ## Progress
//! An optional label attaches an [`indicatif`] progress bar, updated behind
//! a mutex held only for the update operation.

#![forbid(unsafe_code)]

use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Mutex};

use indicatif::{ProgressBar, ProgressStyle};

const PROGRESS_TEMPLATE: &str = "{msg} [{bar:50}] {pos}/{len} ({elapsed} elapsed, {eta} remaining)";

/// Run `body` for every index in `range` and collect the results in index
/// order. `label` attaches a progress bar.
pub fn parallel_map<T, F>(range: Range<usize>, label: Option<&str>, body: F) -> Vec<T>
where
    T: Send,
    F: Fn(usize) -> T + Sync,
{
    let start = range.start;
    let end = range.end;
    let len = end.saturating_sub(start);
    if len == 0 {
        return Vec::new();
    }

    let progress = label.map(|name| {
        let bar = ProgressBar::new(len as u64);
        bar.set_style(
            ProgressStyle::with_template(PROGRESS_TEMPLATE).expect("static progress template"),
        );
        bar.set_message(name.to_string());
        Mutex::new(bar)
    });

    let next_free = AtomicUsize::new(start);
    let extra_workers = num_cpus::get().min(len).saturating_sub(1);

    let (sender, receiver) = mpsc::channel::<(usize, T)>();
    std::thread::scope(|scope| {
        let next_free = &next_free;
        let body = &body;
        let progress = progress.as_ref();
        for _ in 0..extra_workers {
            let worker_sender = sender.clone();
            scope.spawn(move || run_worker(next_free, end, body, worker_sender, progress));
        }
        run_worker(next_free, end, body, sender, progress);
    });

    if let Some(bar) = &progress {
        if let Ok(bar) = bar.lock() {
            bar.finish();
        }
    }

    let mut slots: Vec<Option<T>> = (0..len).map(|_| None).collect();
    for (index, value) in receiver {
        slots[index - start] = Some(value);
    }
    slots
        .into_iter()
        .map(|slot| slot.expect("every index is claimed exactly once"))
        .collect()
}

/// Side-effect variant of [`parallel_map`] for bodies with no result value.
pub fn parallel_for<F>(range: Range<usize>, label: Option<&str>, body: F)
where
    F: Fn(usize) + Sync,
{
    parallel_map(range, label, body);
}

fn run_worker<T, F>(
    next_free: &AtomicUsize,
    end: usize,
    body: &F,
    sender: mpsc::Sender<(usize, T)>,
    progress: Option<&Mutex<ProgressBar>>,
) where
    T: Send,
    F: Fn(usize) -> T + Sync,
{
    loop {
        let index = next_free.fetch_add(1, Ordering::SeqCst);
        if index >= end {
            break;
        }
        let value = body(index);
        // The receiver outlives the scope; a send can only fail if the
        // caller's collection loop is gone, in which case the result set is
        // dead anyway.
        let _ = sender.send((index, value));
        if let Some(bar) = progress {
            if let Ok(bar) = bar.lock() {
                bar.inc(1);
            }
        }
    }
}

/// Fold per-index error slots into the first error, or the full result set.
pub fn collect_results<T>(slots: Vec<crate::Result<T>>) -> crate::Result<Vec<T>> {
    slots.into_iter().collect()
}
