//! # Auto-Pipelining Dispatcher
//!
//! Purpose: Batch commands from concurrent callers onto one pooled connection
//! per round trip, trading a thread hop for fewer syscalls and round trips.
//!
//! ## Design Principles
//! 1. **Single Writer**: One dispatcher thread owns the write/read cycle, so
//!    reply order always matches submission order.
//! 2. **Opportunistic Batching**: After the first job arrives, everything
//!    already queued (up to `MAX_BATCH`) joins the same write.
//! 3. **Caller-Side Deadlines**: A caller that times out stops waiting; the
//!    dispatcher still reads the reply, so the connection stays in sync.

use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::deadline::Deadline;
use crate::error::{ClientError, ClientResult};
use crate::pool::ConnectionPool;
use crate::resp::{Command, Reply};

/// Upper bound on jobs written in one batch.
const MAX_BATCH: usize = 128;

struct Job {
    commands: Vec<Command>,
    reply: Sender<ClientResult<Vec<Reply>>>,
}

enum Message {
    Job(Job),
    Shutdown,
}

pub(crate) struct Pipeline {
    queue: Sender<Message>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Pipeline {
    pub(crate) fn start(pool: ConnectionPool, io_timeout: Duration) -> ClientResult<Self> {
        let (queue, rx) = unbounded();
        let worker = thread::Builder::new()
            .name("kvf-pipeline".to_string())
            .spawn(move || run(rx, pool, io_timeout))?;
        Ok(Pipeline {
            queue,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Queues `commands` as one job and waits for their replies.
    pub(crate) fn submit(
        &self,
        commands: Vec<Command>,
        deadline: Deadline,
    ) -> ClientResult<Vec<Reply>> {
        if deadline.is_expired() {
            return Err(ClientError::Timeout);
        }

        let (reply, replies) = bounded(1);
        self.queue
            .send(Message::Job(Job { commands, reply }))
            .map_err(|_| ClientError::Closed)?;

        match deadline.instant() {
            Some(at) => match replies.recv_deadline(at) {
                Ok(outcome) => outcome,
                Err(RecvTimeoutError::Timeout) => Err(ClientError::Timeout),
                Err(RecvTimeoutError::Disconnected) => Err(ClientError::Closed),
            },
            None => replies.recv().map_err(|_| ClientError::Closed)?,
        }
    }

    /// Flushes queued jobs, stops the dispatcher, and joins it.
    pub(crate) fn shutdown(&self) {
        let _ = self.queue.send(Message::Shutdown);
        if let Some(worker) = self.worker.lock().take() {
            let _ = worker.join();
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(queue: Receiver<Message>, pool: ConnectionPool, io_timeout: Duration) {
    while let Ok(message) = queue.recv() {
        let first = match message {
            Message::Job(job) => job,
            Message::Shutdown => break,
        };

        let mut batch = vec![first];
        let mut stop = false;
        while batch.len() < MAX_BATCH {
            match queue.try_recv() {
                Ok(Message::Job(job)) => batch.push(job),
                Ok(Message::Shutdown) => {
                    stop = true;
                    break;
                }
                Err(_) => break,
            }
        }

        dispatch(&pool, batch, io_timeout);
        if stop {
            break;
        }
    }
    trace!("pipeline dispatcher stopped");
}

fn dispatch(pool: &ConnectionPool, batch: Vec<Job>, io_timeout: Duration) {
    let deadline = Deadline::after(io_timeout);
    let result = pool.acquire(deadline).and_then(|mut conn| {
        conn.run(batch.iter().flat_map(|job| job.commands.iter()), deadline)
    });
    trace!(jobs = batch.len(), ok = result.is_ok(), "pipeline batch dispatched");

    match result {
        Ok(replies) => {
            let mut replies = replies.into_iter();
            for job in batch {
                let part: Vec<Reply> = replies.by_ref().take(job.commands.len()).collect();
                // The caller may have given up; its receiver is then gone.
                let _ = job.reply.send(Ok(part));
            }
        }
        Err(err) => {
            debug!(error = %err, "pipeline batch failed");
            for job in batch {
                let _ = job.reply.send(Err(err.clone()));
            }
        }
    }
}
