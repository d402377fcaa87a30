// src/scheduler.rs
//! Deferred one-shot tasks: a min-heap of (fire time, id) owned by a single
//! driver task. Due tasks are spawned, so a slow task never delays the next.
//! Runs on tokio's clock, which makes it drivable with a paused clock in tests.

use std::{
    cmp::Reverse,
    collections::{BinaryHeap, HashMap},
    future::Future,
    pin::Pin,
    sync::{
        Arc,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
    time::Duration,
};

use tokio::{
    sync::mpsc,
    time::{Instant, sleep_until},
};
use tracing::{debug, trace};

pub type Task = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

enum Command {
    Schedule { id: TaskId, at: Instant, task: Task },
    Cancel(TaskId),
}

/// Cloneable handle to the scheduler. The driver keeps firing what is already
/// queued after the last handle is dropped, then exits.
#[derive(Clone)]
pub struct ProbeScheduler {
    tx: mpsc::UnboundedSender<Command>,
    next_id: Arc<AtomicU64>,
    pending: Arc<AtomicUsize>,
}

impl ProbeScheduler {
    /// Must be called inside a tokio runtime.
    pub fn start() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let pending = Arc::new(AtomicUsize::new(0));
        tokio::spawn(drive(rx, pending.clone()));
        Self {
            tx,
            next_id: Arc::new(AtomicU64::new(1)),
            pending,
        }
    }

    pub fn schedule<F>(&self, delay: Duration, task: F) -> TaskId
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let id = TaskId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let at = Instant::now() + delay;
        self.pending.fetch_add(1, Ordering::SeqCst);
        if self
            .tx
            .send(Command::Schedule {
                id,
                at,
                task: Box::pin(task),
            })
            .is_err()
        {
            self.pending.fetch_sub(1, Ordering::SeqCst);
        }
        id
    }

    /// Drops a task that has not fired yet. Unknown or already fired ids are ignored.
    pub fn cancel(&self, id: TaskId) {
        let _ = self.tx.send(Command::Cancel(id));
    }

    /// Tasks scheduled and not yet fired or cancelled.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }
}

async fn drive(mut rx: mpsc::UnboundedReceiver<Command>, pending: Arc<AtomicUsize>) {
    let mut queue: BinaryHeap<Reverse<(Instant, TaskId)>> = BinaryHeap::new();
    let mut tasks: HashMap<TaskId, Task> = HashMap::new();
    let mut open = true;

    loop {
        let next_at = queue.peek().map(|Reverse((at, _))| *at);
        if !open && next_at.is_none() {
            break;
        }

        tokio::select! {
            cmd = rx.recv(), if open => match cmd {
                Some(Command::Schedule { id, at, task }) => {
                    trace!(?id, "task queued");
                    queue.push(Reverse((at, id)));
                    tasks.insert(id, task);
                }
                Some(Command::Cancel(id)) => {
                    if tasks.remove(&id).is_some() {
                        pending.fetch_sub(1, Ordering::SeqCst);
                        debug!(?id, "task cancelled");
                    }
                }
                None => open = false,
            },
            _ = sleep_until(next_at.unwrap_or_else(Instant::now)), if next_at.is_some() => {
                let now = Instant::now();
                while let Some(Reverse((at, id))) = queue.peek().copied() {
                    if at > now {
                        break;
                    }
                    queue.pop();
                    // cancelled ids stay in the heap until they surface here
                    if let Some(task) = tasks.remove(&id) {
                        pending.fetch_sub(1, Ordering::SeqCst);
                        tokio::spawn(task);
                    }
                }
            }
        }
    }
    debug!("probe scheduler drained");
}
