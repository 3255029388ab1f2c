//! Per-session deferred tasks
//!
//! The completion trigger arms one task per session through a [`Scheduler`]. Production
//! uses [`TokioScheduler`]; tests use [`ManualScheduler`] and fire tasks on command.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub type DeferredTask = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Keyed by session id; at most one task is armed per session
pub trait Scheduler: Send + Sync {
    /// Arm `task` to run once `delay` has elapsed, replacing any task already armed for
    /// the session
    fn schedule(&self, session_id: i64, delay: Duration, task: DeferredTask);

    /// Disarm without running. Returns whether a task was still waiting.
    fn cancel(&self, session_id: i64) -> bool;

    /// Fire-now primitive: disarm and hand the task back so the caller can run it
    /// immediately. `None` when nothing is waiting.
    fn take(&self, session_id: i64) -> Option<DeferredTask>;

    /// Number of sessions with a task still waiting
    fn pending(&self) -> usize;
}

type Slot = Arc<Mutex<Option<DeferredTask>>>;

fn take_slot(slot: &Slot) -> Option<DeferredTask> {
    slot.lock().unwrap_or_else(|e| e.into_inner()).take()
}

struct Armed {
    generation: u64,
    slot: Slot,
    sleeper: tokio::task::AbortHandle,
}

/// Wall-clock timers on the tokio runtime
///
/// Each armed session owns a sleeper task and a slot holding the deferred task. Whoever
/// empties the slot first (the sleeper on expiry, or `cancel`/`take`) decides what happens
/// to the task, so it can never run twice.
#[derive(Default)]
pub struct TokioScheduler {
    armed: Arc<DashMap<i64, Armed>>,
    next_generation: AtomicU64,
}

impl TokioScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    fn disarm(&self, session_id: i64) -> Option<DeferredTask> {
        let (_, armed) = self.armed.remove(&session_id)?;
        armed.sleeper.abort();
        take_slot(&armed.slot)
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, session_id: i64, delay: Duration, task: DeferredTask) {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let slot: Slot = Arc::new(Mutex::new(Some(task)));

        // Hold the entry while spawning so the sleeper cannot look for it before it exists
        let entry = self.armed.entry(session_id);

        let armed_map = Arc::clone(&self.armed);
        let sleeper_slot = Arc::clone(&slot);
        let sleeper = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            armed_map.remove_if(&session_id, |_, armed| armed.generation == generation);
            // No await between taking and spawning: an abort cannot strand the task
            if let Some(task) = take_slot(&sleeper_slot) {
                tokio::spawn(task);
            }
        });

        let armed = Armed {
            generation,
            slot,
            sleeper: sleeper.abort_handle(),
        };
        match entry {
            Entry::Occupied(mut occupied) => {
                let previous = occupied.insert(armed);
                previous.sleeper.abort();
            }
            Entry::Vacant(vacant) => {
                vacant.insert(armed);
            }
        }
    }

    fn cancel(&self, session_id: i64) -> bool {
        self.disarm(session_id).is_some()
    }

    fn take(&self, session_id: i64) -> Option<DeferredTask> {
        self.disarm(session_id)
    }

    fn pending(&self) -> usize {
        self.armed.len()
    }
}

/// Scheduler that never fires on its own
///
/// Tasks wait until [`ManualScheduler::fire`] or [`ManualScheduler::fire_all`] is called,
/// which lets tests decide exactly when a quiescence delay "elapses".
#[derive(Default)]
pub struct ManualScheduler {
    tasks: Mutex<BTreeMap<i64, (Duration, DeferredTask)>>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<i64, (Duration, DeferredTask)>> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_armed(&self, session_id: i64) -> bool {
        self.lock().contains_key(&session_id)
    }

    pub fn delay_for(&self, session_id: i64) -> Option<Duration> {
        self.lock().get(&session_id).map(|(delay, _)| *delay)
    }

    /// Run the session's task as if its delay had elapsed. Returns false if none was armed.
    pub async fn fire(&self, session_id: i64) -> bool {
        match self.take(session_id) {
            Some(task) => {
                task.await;
                true
            }
            None => false,
        }
    }

    /// Run every armed task in session id order
    pub async fn fire_all(&self) -> usize {
        let tasks = std::mem::take(&mut *self.lock());
        let count = tasks.len();
        for (_, (_, task)) in tasks {
            task.await;
        }
        count
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, session_id: i64, delay: Duration, task: DeferredTask) {
        self.lock().insert(session_id, (delay, task));
    }

    fn cancel(&self, session_id: i64) -> bool {
        self.lock().remove(&session_id).is_some()
    }

    fn take(&self, session_id: i64) -> Option<DeferredTask> {
        self.lock().remove(&session_id).map(|(_, task)| task)
    }

    fn pending(&self) -> usize {
        self.lock().len()
    }
}
