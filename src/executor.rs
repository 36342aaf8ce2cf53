//! Pluggable task execution for running service `start`/`stop` callbacks off
//! the thread that triggered the transition.

use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

/// Runs boxed tasks. Implementations must not run a task inline on the
/// calling thread unless documented (see [`SyncExecutor`]) — the controller
/// relies on a real executor to keep deep dependency chains from growing the
/// call stack.
pub trait Executor: Send + Sync {
    fn execute(&self, task: Box<dyn FnOnce() + Send>);
}

/// Runs every task immediately, on the calling thread. Useful for tests that
/// want deterministic, single-threaded ordering; not suitable for deep
/// dependency chains, since nothing breaks the call stack between a
/// dependency's completion and its dependents' own start attempts.
#[derive(Default)]
pub struct SyncExecutor;

impl Executor for SyncExecutor {
    fn execute(&self, task: Box<dyn FnOnce() + Send>) {
        task();
    }
}

/// A fixed-size pool of worker threads pulling from a shared queue, the
/// default executor for a [`crate::container::Container`].
pub struct ThreadPoolExecutor {
    sender: mpsc::Sender<Box<dyn FnOnce() + Send>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl ThreadPoolExecutor {
    /// Spawn `size` worker threads pulling from a shared MPSC queue.
    pub fn new(size: usize) -> Arc<Self> {
        let (sender, receiver) = mpsc::channel::<Box<dyn FnOnce() + Send>>();
        let receiver = Arc::new(Mutex::new(receiver));
        let mut workers = Vec::with_capacity(size);
        for index in 0..size.max(1) {
            let receiver = Arc::clone(&receiver);
            let handle = std::thread::Builder::new()
                .name(format!("service-container-worker-{index}"))
                .spawn(move || loop {
                    let task = {
                        let receiver = receiver.lock().expect("executor queue poisoned");
                        receiver.recv()
                    };
                    match task {
                        Ok(task) => task(),
                        Err(_) => break,
                    }
                })
                .expect("failed to spawn executor worker thread");
            workers.push(handle);
        }
        Arc::new(Self {
            sender,
            workers: Mutex::new(workers),
        })
    }
}

impl ThreadPoolExecutor {
    /// Size the pool from the available parallelism, falling back to 4.
    pub fn with_default_size() -> Arc<Self> {
        let size = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4);
        Self::new(size)
    }
}

impl Executor for ThreadPoolExecutor {
    fn execute(&self, task: Box<dyn FnOnce() + Send>) {
        // A send error means every worker thread has exited (e.g. the pool
        // is shutting down); dropping the task is the right call since there
        // is nobody left to run it.
        let _ = self.sender.send(task);
    }
}

#[cfg(feature = "async")]
pub use tokio_executor::TokioExecutor;

#[cfg(feature = "async")]
mod tokio_executor {
    use super::Executor;
    use tokio::runtime::Handle;

    /// Dispatches tasks onto a Tokio runtime via [`Handle::spawn_blocking`],
    /// for embedding this crate in an application already driven by Tokio
    /// rather than spinning up its own dedicated thread pool.
    pub struct TokioExecutor {
        handle: Handle,
    }

    impl TokioExecutor {
        pub fn new(handle: Handle) -> Self {
            Self { handle }
        }

        /// Build from the handle of the runtime the caller is currently
        /// executing on.
        pub fn current() -> Self {
            Self::new(Handle::current())
        }
    }

    impl Executor for TokioExecutor {
        fn execute(&self, task: Box<dyn FnOnce() + Send>) {
            self.handle.spawn_blocking(move || task());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn sync_executor_runs_inline() {
        let executor = SyncExecutor;
        let flag = Arc::new(AtomicUsize::new(0));
        let flag2 = Arc::clone(&flag);
        executor.execute(Box::new(move || {
            flag2.store(1, Ordering::SeqCst);
        }));
        assert_eq!(flag.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn thread_pool_executor_runs_tasks() {
        let executor = ThreadPoolExecutor::new(2);
        let (tx, rx) = mpsc::channel();
        for i in 0..8 {
            let tx = tx.clone();
            executor.execute(Box::new(move || {
                let _ = tx.send(i);
            }));
        }
        drop(tx);
        let mut results: Vec<i32> = rx.iter().collect();
        results.sort_unstable();
        assert_eq!(results, (0..8).collect::<Vec<_>>());
    }
}
