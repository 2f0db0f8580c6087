//! Fixed-size worker pool with per-worker priority queues and work-stealing.
//!
//! Submission round-robins across workers, preferring a non-blocking push so a submitter never
//! blocks behind a busy worker's queue; each worker, once idle, scans every queue before parking.
//! This is the same shape as a classic work-stealing pool, but built directly on
//! `crossbeam-deque`'s injector/stealer primitives rather than pulling in a full executor crate.
//! Nothing here suspends mid-task, so a `rayon`/`tokio`-style scheduler would add machinery this
//! pipeline never uses.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use crossbeam_deque::{Injector, Steal};

/// Relative priority of a submitted task. Higher-priority injectors are drained first by every
/// worker's scan.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Low,
    Normal,
    High,
}

const PRIORITY_LEVELS: usize = 3;

fn priority_index(p: Priority) -> usize {
    match p {
        Priority::High => 0,
        Priority::Normal => 1,
        Priority::Low => 2,
    }
}

type Task = Box<dyn FnOnce() + Send + 'static>;

struct Queues {
    levels: [Injector<Task>; PRIORITY_LEVELS],
    lock: Mutex<()>,
    condvar: Condvar,
}

impl Queues {
    fn new() -> Self {
        Self {
            levels: [Injector::new(), Injector::new(), Injector::new()],
            lock: Mutex::new(()),
            condvar: Condvar::new(),
        }
    }

    fn push(&self, priority: Priority, task: Task) {
        let _guard = self.lock.lock().unwrap();
        self.levels[priority_index(priority)].push(task);
        self.condvar.notify_one();
    }

    /// Pops the highest-priority task available across all levels, or `None` if every queue is
    /// momentarily empty (a concurrent push can still race this and be missed; the caller is
    /// expected to retry or park).
    fn pop(&self) -> Option<Task> {
        for level in &self.levels {
            loop {
                match level.steal() {
                    Steal::Success(task) => return Some(task),
                    Steal::Retry => continue,
                    Steal::Empty => break,
                }
            }
        }
        None
    }

    /// Blocks until a task is available or `shutdown` is set, parking on `condvar` in between.
    /// Re-checks `pop` and `shutdown` under `lock` before waiting and right after waking, so a push
    /// or a shutdown that lands between an empty `pop` and the wait call is never missed: [`Self::push`]
    /// and [`Self::notify_shutdown`] both take the same lock around their own state change plus
    /// notify, which serializes them against this check-then-wait.
    fn park(&self, shutdown: &std::sync::atomic::AtomicBool) -> Option<Task> {
        let mut guard = self.lock.lock().unwrap();
        loop {
            if let Some(task) = self.pop() {
                return Some(task);
            }
            if shutdown.load(Ordering::Acquire) {
                return None;
            }
            guard = self.condvar.wait(guard).unwrap();
        }
    }

    fn notify_shutdown(&self) {
        let _guard = self.lock.lock().unwrap();
        self.condvar.notify_all();
    }
}

/// RAII token tracking one outstanding unit of submitted work.
///
/// Cloning increments the shared counter; dropping the last clone decrements it and, if it reaches
/// zero, wakes anyone blocked in [`WorkCounter::join`]. A `Clone` + `Drop` token fits better than a
/// scope-exit destructor here, since the unit of work is "still referenced by a queued closure," not
/// "still in a lexical scope."
pub struct WorkCounter {
    inner: Arc<WorkCounterInner>,
}

struct WorkCounterInner {
    outstanding: AtomicUsize,
    done: Mutex<()>,
    condvar: Condvar,
}

impl WorkCounter {
    fn new() -> Self {
        Self {
            inner: Arc::new(WorkCounterInner {
                outstanding: AtomicUsize::new(1),
                done: Mutex::new(()),
                condvar: Condvar::new(),
            }),
        }
    }

    /// Blocks until every clone of this token (including the one returned by
    /// [`TaskSystem::work_counter`] itself) has been dropped.
    pub fn join(self) {
        let inner = Arc::clone(&self.inner);
        // Release the caller's own reference before waiting, or outstanding never reaches 0.
        drop(self);
        let mut guard = inner.done.lock().unwrap();
        while inner.outstanding.load(Ordering::Acquire) != 0 {
            guard = inner.condvar.wait(guard).unwrap();
        }
    }
}

/// Cloning adds one to the outstanding count before the clone is handed off. The two halves of
/// "now there are two references" must never be observable separately, or a racing [`Self::join`]
/// could see the count drop to zero between an old clone's drop and a new clone's construction.
impl Clone for WorkCounter {
    fn clone(&self) -> Self {
        self.inner.outstanding.fetch_add(1, Ordering::AcqRel);
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Drop for WorkCounter {
    fn drop(&mut self) {
        if self.inner.outstanding.fetch_sub(1, Ordering::AcqRel) == 1 {
            let _guard = self.inner.done.lock().unwrap();
            self.inner.condvar.notify_all();
        }
    }
}

/// A fixed pool of OS threads draining a shared set of priority queues.
///
/// Built directly on `std::thread` rather than a `rayon`/`tokio` runtime: every task here is
/// synchronous CPU work (parse this file, hash these DIEs) with no I/O suspension point, so a
/// cooperative-scheduling runtime has nothing to schedule around.
pub struct TaskSystem {
    queues: Arc<Queues>,
    handles: Vec<std::thread::JoinHandle<()>>,
    shutdown: Arc<std::sync::atomic::AtomicBool>,
    parallel: bool,
}

impl TaskSystem {
    /// Spawns `max(1, available_parallelism())` workers, or runs every task inline on the calling
    /// thread when `parallel` is `false` (honoring the `parallel_processing` setting).
    pub fn new(parallel: bool) -> Self {
        let queues = Arc::new(Queues::new());
        let shutdown = Arc::new(std::sync::atomic::AtomicBool::new(false));

        if !parallel {
            return Self {
                queues,
                handles: Vec::new(),
                shutdown,
                parallel,
            };
        }

        let worker_count = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1).max(1);
        let mut handles = Vec::with_capacity(worker_count);
        for _ in 0..worker_count {
            let queues = Arc::clone(&queues);
            let shutdown = Arc::clone(&shutdown);
            handles.push(std::thread::spawn(move || worker_loop(queues, shutdown)));
        }

        Self {
            queues,
            handles,
            shutdown,
            parallel,
        }
    }

    /// Returns a fresh [`WorkCounter`] token. Clone it into every closure passed to [`Self::execute`]
    /// for this batch of work, then call [`WorkCounter::join`] to block until they have all run.
    pub fn work_counter(&self) -> WorkCounter {
        WorkCounter::new()
    }

    /// Submits `task` at `priority`. In single-threaded mode (`parallel_processing = false`), runs it
    /// synchronously before returning.
    pub fn execute(&self, priority: Priority, task: impl FnOnce() + Send + 'static) {
        if !self.parallel {
            run_catching(task);
            return;
        }
        self.queues.push(priority, Box::new(task));
    }
}

impl Drop for TaskSystem {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        self.queues.notify_shutdown();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

fn worker_loop(queues: Arc<Queues>, shutdown: Arc<std::sync::atomic::AtomicBool>) {
    loop {
        match queues.park(&shutdown) {
            Some(task) => run_catching(task),
            None => return,
        }
    }
}

/// Runs `task`, converting a panic into a logged, counted failure rather than letting it unwind
/// across the worker thread boundary. A malformed input file should not take the whole pool down.
fn run_catching(task: impl FnOnce() + Send + 'static) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(task)) {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        tracing::error!(panic = %message, "worker task panicked");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn serial_mode_runs_inline() {
        let tasks = TaskSystem::new(false);
        let ran = Arc::new(AtomicU32::new(0));
        let counted = Arc::clone(&ran);
        tasks.execute(Priority::Normal, move || {
            counted.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn parallel_mode_runs_every_task() {
        let tasks = TaskSystem::new(true);
        let counter = Arc::new(AtomicU32::new(0));
        let work = tasks.work_counter();
        for _ in 0..64 {
            let counter = Arc::clone(&counter);
            let token = work.clone();
            tasks.execute(Priority::Normal, move || {
                let _token = token;
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        work.join();
        assert_eq!(counter.load(Ordering::SeqCst), 64);
    }

    #[test]
    fn a_panicking_task_does_not_stop_the_pool() {
        let tasks = TaskSystem::new(true);
        let work = tasks.work_counter();
        let survived = Arc::new(AtomicU32::new(0));

        let token = work.clone();
        tasks.execute(Priority::Normal, move || {
            let _token = token;
            panic!("boom");
        });

        let counter = Arc::clone(&survived);
        let token = work.clone();
        tasks.execute(Priority::Normal, move || {
            let _token = token;
            counter.fetch_add(1, Ordering::SeqCst);
        });

        work.join();
        assert_eq!(survived.load(Ordering::SeqCst), 1);
    }
}
