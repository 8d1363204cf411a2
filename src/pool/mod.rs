//! Fixed-size worker pool running opaque tasks with future-style handles.
//!
//! Tasks are plain closures executed to completion on OS threads. A panic
//! inside a task is captured into its handle as a tagged error and never
//! terminates the worker. `sync()` blocks until every dispatched task has
//! finished.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use thiserror::Error;

/// Failure of a single pool task, surfaced when its handle is consumed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    #[error("task panicked: {0}")]
    Panicked(String),
}

type Job = Box<dyn FnOnce() + Send + 'static>;

struct Queue {
    jobs: VecDeque<Job>,
    /// Enqueued plus currently running tasks.
    pending: usize,
    shutdown: bool,
}

struct Shared {
    queue: Mutex<Queue>,
    job_available: Condvar,
    all_done: Condvar,
}

/// A pool of worker threads with a FIFO task queue and a barrier.
pub struct ThreadPool {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl ThreadPool {
    /// Creates a pool with `num_threads` workers.
    pub fn new(num_threads: usize) -> Self {
        let shared = Arc::new(Shared {
            queue: Mutex::new(Queue {
                jobs: VecDeque::new(),
                pending: 0,
                shutdown: false,
            }),
            job_available: Condvar::new(),
            all_done: Condvar::new(),
        });

        let workers = (0..num_threads.max(1))
            .map(|_| {
                let shared = Arc::clone(&shared);
                thread::spawn(move || worker_loop(shared))
            })
            .collect();

        Self { shared, workers }
    }

    /// Creates a pool sized to the machine's available parallelism.
    pub fn with_available_parallelism() -> Self {
        let n = thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        Self::new(n)
    }

    pub fn num_threads(&self) -> usize {
        self.workers.len()
    }

    /// Enqueues one task and returns a handle to its eventual result.
    pub fn spawn<T, F>(&self, f: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let state = Arc::new(HandleState {
            slot: Mutex::new(None),
            ready: Condvar::new(),
        });
        let task_state = Arc::clone(&state);
        let job: Job = Box::new(move || {
            let outcome = catch_unwind(AssertUnwindSafe(f));
            let result = outcome.map_err(|payload| TaskError::Panicked(panic_message(&payload)));
            let mut slot = task_state.slot.lock().unwrap();
            *slot = Some(result);
            task_state.ready.notify_all();
        });

        {
            let mut queue = self.shared.queue.lock().unwrap();
            queue.jobs.push_back(job);
            queue.pending += 1;
        }
        self.shared.job_available.notify_one();

        TaskHandle { state }
    }

    /// Enqueues a batch of tasks and returns their handles without waiting.
    pub fn run<T, F>(&self, batch: Vec<F>) -> Vec<TaskHandle<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        batch.into_iter().map(|f| self.spawn(f)).collect()
    }

    /// Blocks until every dispatched task has finished.
    pub fn sync(&self) {
        let mut queue = self.shared.queue.lock().unwrap();
        while queue.pending > 0 {
            queue = self.shared.all_done.wait(queue).unwrap();
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        {
            let mut queue = self.shared.queue.lock().unwrap();
            queue.shutdown = true;
        }
        self.shared.job_available.notify_all();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

fn worker_loop(shared: Arc<Shared>) {
    loop {
        let job = {
            let mut queue = shared.queue.lock().unwrap();
            loop {
                if let Some(job) = queue.jobs.pop_front() {
                    break job;
                }
                if queue.shutdown {
                    return;
                }
                queue = shared.job_available.wait(queue).unwrap();
            }
        };

        // The job stores its own result; panics are already contained.
        job();

        let mut queue = shared.queue.lock().unwrap();
        queue.pending -= 1;
        if queue.pending == 0 {
            shared.all_done.notify_all();
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

struct HandleState<T> {
    slot: Mutex<Option<Result<T, TaskError>>>,
    ready: Condvar,
}

/// Future for a pool task: either its value or the captured failure.
pub struct TaskHandle<T> {
    state: Arc<HandleState<T>>,
}

impl<T> TaskHandle<T> {
    /// Blocks until the task finishes and returns its outcome.
    pub fn get(self) -> Result<T, TaskError> {
        let mut slot = self.state.slot.lock().unwrap();
        loop {
            if let Some(result) = slot.take() {
                return result;
            }
            slot = self.state.ready.wait(slot).unwrap();
        }
    }
}
