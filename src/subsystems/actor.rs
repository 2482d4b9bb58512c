// Command-queue actor shared by every mechanism
//
// Each actor owns a FIFO of pending commands and one task that executes them
// to completion one at a time. Callers either wait on the returned id or
// poll it later.

use std::collections::{HashMap, VecDeque};
use std::fmt::Debug;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info};

use crate::config::{ACTOR_IDLE_DELAY, COMPLETION_POLL_PERIOD};

/// Identifies one submitted command; unique per actor, never reused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CommandId(u64);

impl CommandId {
    pub fn value(self) -> u64 {
        self.0
    }
}

/// How a command finished
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Finite routine ran to its end
    Completed,
    /// Closed-loop motion converged
    Settled,
    /// Closed-loop motion gave up at its timeout
    TimedOut,
    /// Dropped from the queue by a reset before it started
    Cancelled,
}

/// A mechanism that executes one command at a time
pub trait Mechanism: Send + Sync + 'static {
    type Command: Debug + Send + 'static;

    /// Name used in logs
    const NAME: &'static str;

    /// Sleep between polls of an empty queue
    const IDLE_DELAY: Duration = ACTOR_IDLE_DELAY;

    fn execute(&self, command: Self::Command) -> impl Future<Output = Outcome> + Send;
}

struct Queue<C> {
    pending: Mutex<VecDeque<(CommandId, C)>>,
    finished: Mutex<HashMap<CommandId, Outcome>>,
    next_id: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl<C> Queue<C> {
    fn new() -> Self {
        Self {
            pending: Mutex::new(VecDeque::new()),
            finished: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn push(&self, command: C) -> CommandId {
        let mut pending = lock(&self.pending);
        // Allocated under the queue lock so id order matches queue order
        let id = CommandId(self.next_id.fetch_add(1, Ordering::Relaxed));
        pending.push_back((id, command));
        id
    }

    fn pop(&self) -> Option<(CommandId, C)> {
        lock(&self.pending).pop_front()
    }

    fn finish(&self, id: CommandId, outcome: Outcome) {
        lock(&self.finished).insert(id, outcome);
    }
}

/// Handle onto a running mechanism actor
///
/// Dropping the handle aborts the actor task.
pub struct Actor<M: Mechanism> {
    mechanism: Arc<M>,
    queue: Arc<Queue<M::Command>>,
    task: JoinHandle<()>,
}

impl<M: Mechanism> Actor<M> {
    /// Start the actor task; must be called inside a tokio runtime
    pub fn spawn(mechanism: M) -> Self {
        let mechanism = Arc::new(mechanism);
        let queue = Arc::new(Queue::new());
        let task = tokio::spawn(worker(Arc::clone(&mechanism), Arc::clone(&queue)));
        info!("Started {} actor", M::NAME);
        Self {
            mechanism,
            queue,
            task,
        }
    }

    /// Enqueue a command and return immediately
    pub fn submit(&self, command: M::Command) -> CommandId {
        debug!("{} <- {:?}", M::NAME, command);
        self.queue.push(command)
    }

    /// Enqueue a command and wait for it to finish
    pub async fn run(&self, command: M::Command) -> Outcome {
        let id = self.submit(command);
        self.wait(id).await
    }

    /// Take the outcome of a finished command, if it has finished
    pub fn poll(&self, id: CommandId) -> Option<Outcome> {
        lock(&self.queue.finished).remove(&id)
    }

    /// Wait until `id` finishes and take its outcome
    pub async fn wait(&self, id: CommandId) -> Outcome {
        loop {
            if let Some(outcome) = self.poll(id) {
                return outcome;
            }
            sleep(COMPLETION_POLL_PERIOD).await;
        }
    }

    /// Drop every pending command; the one executing is unaffected
    ///
    /// Dropped commands finish as [`Outcome::Cancelled`] so waiters return.
    pub fn reset_queue(&self) -> usize {
        let dropped = std::mem::take(&mut *lock(&self.queue.pending));
        if !dropped.is_empty() {
            debug!("{} dropped {} pending commands", M::NAME, dropped.len());
        }
        let mut finished = lock(&self.queue.finished);
        for (id, _) in &dropped {
            finished.insert(*id, Outcome::Cancelled);
        }
        dropped.len()
    }

    /// Number of commands waiting to start
    pub fn pending(&self) -> usize {
        lock(&self.queue.pending).len()
    }

    pub fn mechanism(&self) -> &M {
        &self.mechanism
    }
}

impl<M: Mechanism> Drop for Actor<M> {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn worker<M: Mechanism>(mechanism: Arc<M>, queue: Arc<Queue<M::Command>>) {
    loop {
        let Some((id, command)) = queue.pop() else {
            sleep(M::IDLE_DELAY).await;
            continue;
        };
        debug!("{} executing {:?} ({:?})", M::NAME, command, id);
        let outcome = mechanism.execute(command).await;
        debug!("{} finished {:?}: {:?}", M::NAME, id, outcome);
        queue.finish(id, outcome);
    }
}
