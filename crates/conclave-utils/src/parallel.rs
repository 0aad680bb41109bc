//! Grain-sized parallel loops over index ranges.
//!
//! [`parallel_for`] and [`parallel_reduce`] partition `[begin, end)` into
//! tasks of at least `grain_size` indices, at most one task per available
//! core, and run them on scoped threads. Ranges smaller than one grain run
//! inline on the caller's thread, as does any loop started from inside a
//! worker: nesting falls back to sequential execution instead of
//! oversubscribing.

use std::cell::Cell;

thread_local! {
    static IN_PARALLEL: Cell<bool> = const { Cell::new(false) };
}

/// Whether the current thread is a parallel-loop worker.
pub fn in_parallel_region() -> bool {
    IN_PARALLEL.with(Cell::get)
}

fn num_threads() -> usize {
    std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(1)
}

/// Partitioning arithmetic: how many tasks, and how many indices per task.
///
/// The chunk size is the range divided over the available threads, but never
/// below `grain_size`; a range smaller than one grain is a single task.
pub fn num_tasks_and_chunk_size(begin: i64, end: i64, grain_size: i64) -> (usize, usize) {
    let span = (end - begin).max(0) as usize;
    if span < grain_size as usize {
        return (1, span);
    }
    let chunk_size = span.div_ceil(num_threads()).max(grain_size as usize);
    (span.div_ceil(chunk_size), chunk_size)
}

/// Run `f` over subranges of `[begin, end)` in parallel.
///
/// `f` receives half-open `(begin, end)` bounds and is invoked once per task.
///
/// # Panics
///
/// Panics if `grain_size` is zero, or if any task panics.
pub fn parallel_for<F>(begin: i64, end: i64, grain_size: i64, f: F)
where
    F: Fn(i64, i64) + Send + Sync,
{
    assert!(grain_size > 0, "grain_size must be positive");
    if begin >= end {
        return;
    }
    if (end - begin) < grain_size || in_parallel_region() {
        f(begin, end);
        return;
    }

    let (num_tasks, chunk_size) = num_tasks_and_chunk_size(begin, end, grain_size);
    tracing::trace!(begin, end, num_tasks, chunk_size, "parallel_for");
    std::thread::scope(|s| {
        for task in 0..num_tasks {
            let task_begin = begin + (task * chunk_size) as i64;
            let task_end = end.min(task_begin + chunk_size as i64);
            let f = &f;
            s.spawn(move || {
                IN_PARALLEL.with(|flag| flag.set(true));
                f(task_begin, task_end);
            });
        }
    });
}

/// Fold `[begin, end)` in parallel.
///
/// Each task folds its subrange with `f(begin, end, identity)`; the partial
/// results are combined with `combine` in task order, starting from
/// `identity`. `combine` must be associative for the result to be
/// deterministic.
///
/// # Panics
///
/// Panics if `grain_size` is zero, or if any task panics.
pub fn parallel_reduce<T, F, C>(begin: i64, end: i64, grain_size: i64, identity: T, f: F, combine: C) -> T
where
    T: Send + Clone,
    F: Fn(i64, i64, T) -> T + Send + Sync,
    C: Fn(T, T) -> T,
{
    assert!(grain_size > 0, "grain_size must be positive");
    if begin >= end {
        return identity;
    }
    if (end - begin) < grain_size || in_parallel_region() {
        return f(begin, end, identity);
    }

    let (num_tasks, chunk_size) = num_tasks_and_chunk_size(begin, end, grain_size);
    tracing::trace!(begin, end, num_tasks, chunk_size, "parallel_reduce");
    let partials = std::thread::scope(|s| {
        let handles: Vec<_> = (0..num_tasks)
            .map(|task| {
                let task_begin = begin + (task * chunk_size) as i64;
                let task_end = end.min(task_begin + chunk_size as i64);
                let f = &f;
                let identity = identity.clone();
                s.spawn(move || {
                    IN_PARALLEL.with(|flag| flag.set(true));
                    f(task_begin, task_end, identity)
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("parallel task panicked"))
            .collect::<Vec<T>>()
    });

    partials.into_iter().fold(identity, combine)
}
