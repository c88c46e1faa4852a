//! Thread pool implementation from The Book.
//! <https://doc.rust-lang.org/book/ch20-02-multithreaded.html>

use std::num::NonZeroUsize;
use std::sync::{mpsc, Arc, Mutex};
use std::thread;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed-size pool of named threads, each one handling one association at a time.
pub struct ThreadPool {
    workers: Vec<Worker>,
    sender: Option<mpsc::Sender<Job>>,
}

impl ThreadPool {
    /// Create a thread pool. Its threads are named `{name}/{id}`.
    pub fn new(size: NonZeroUsize, name: &'static str) -> std::io::Result<ThreadPool> {
        let (sender, receiver) = mpsc::channel();
        let receiver = Arc::new(Mutex::new(receiver));
        let workers = (0..size.get())
            .map(|id| Worker::new(id, Arc::clone(&receiver), name))
            .collect::<std::io::Result<_>>()?;
        Ok(ThreadPool {
            workers,
            sender: Some(sender),
        })
    }

    /// Run a job in this thread pool.
    ///
    /// Returns `false` if the pool was already shut down, in which case `f` is dropped.
    pub fn execute<F>(&self, f: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.sender
            .as_ref()
            .is_some_and(|sender| sender.send(Box::new(f)).is_ok())
    }

    /// Close the thread pool, waiting for running jobs to finish.
    ///
    /// Note: unlike The Book, the cleanup code is here as a method instead of the Drop trait
    /// so that CTRL-C aborts threads immediately instead of waiting for them to finish.
    pub fn shutdown(&mut self) {
        drop(self.sender.take());
        for worker in &mut self.workers {
            if let Some(thread) = worker.thread.take() {
                if thread.join().is_err() {
                    tracing::error!("Worker {} panicked", worker.name);
                }
            }
        }
    }
}

struct Worker {
    name: String,
    thread: Option<thread::JoinHandle<()>>,
}

impl Worker {
    fn new(
        id: usize,
        receiver: Arc<Mutex<mpsc::Receiver<Job>>>,
        pool_name: &'static str,
    ) -> std::io::Result<Worker> {
        let name = format!("{pool_name}/{id}");
        let thread = thread::Builder::new().name(name.clone()).spawn(move || {
            tracing::debug!("Starting worker {pool_name}/{id}");
            loop {
                // a poisoned lock means another worker panicked while receiving
                let message = match receiver.lock() {
                    Ok(receiver) => receiver.recv(),
                    Err(poisoned) => poisoned.into_inner().recv(),
                };
                match message {
                    Ok(job) => {
                        job();
                    }
                    Err(_) => {
                        tracing::debug!("Shutting down worker {pool_name}/{id}");
                        break;
                    }
                }
            }
        })?;
        Ok(Worker {
            name,
            thread: Some(thread),
        })
    }
}
