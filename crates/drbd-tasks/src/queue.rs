//! Four-queue task scheduler with a bounded worker pool.
//!
//! All queue topology lives behind one mutex. Workers drop that mutex only
//! while the external process runs, so the control thread can inspect and
//! rearrange the queues at any time. An entry in the active queue is never
//! freed by anyone but the worker that runs it.

use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Mutex, MutexGuard};
use rustc_hash::FxHashMap;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::cmdline::CmdLine;
use crate::process::{ProcessFactory, SubProcess, EXIT_STATUS_NONE};

pub type TaskId = u64;

/// Default limit on the entries across all four queues.
pub const MAX_ENTRY_COUNT: usize = 1024;
/// Default limit on concurrently running processes.
pub const MAX_ACTIVE_COUNT: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueLimits {
    pub max_entries: usize,
    pub max_active: usize,
}

impl Default for QueueLimits {
    fn default() -> Self {
        Self {
            max_entries: MAX_ENTRY_COUNT,
            max_active: MAX_ACTIVE_COUNT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueKind {
    /// Suspended by the operator.
    Waiting,
    /// Pending, picked up as soon as a worker is free.
    Ready,
    Active,
    Finished,
}

impl QueueKind {
    pub const ALL: [Self; 4] = [Self::Active, Self::Ready, Self::Waiting, Self::Finished];

    fn slot(self) -> usize {
        match self {
            Self::Waiting => 0,
            Self::Ready => 1,
            Self::Active => 2,
            Self::Finished => 3,
        }
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Waiting => "Suspended",
            Self::Ready => "Pending",
            Self::Active => "Active",
            Self::Finished => "Finished",
        }
    }
}

impl fmt::Display for QueueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    Waiting,
    Ready,
    Active,
    Finished,
    InvalidId,
}

impl From<QueueKind> for TaskState {
    fn from(kind: QueueKind) -> Self {
        match kind {
            QueueKind::Waiting => Self::Waiting,
            QueueKind::Ready => Self::Ready,
            QueueKind::Active => Self::Active,
            QueueKind::Finished => Self::Finished,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("task queue is full ({limit} entries)")]
    CapacityExceeded { limit: usize },
}

/// Receives queue notifications.
///
/// Callbacks run on the thread that changed the queue while the queue lock
/// is held; they must not call back into the queue.
pub trait QueueObserver: Send + Sync {
    fn notify_queue_changed(&self);
    fn notify_out_of_memory(&self);
}

/// Borrowed view of one entry, valid while the queue lock is held.
pub struct TaskView<'a> {
    pub id: TaskId,
    pub command: &'a CmdLine,
    pub process: Option<&'a dyn SubProcess>,
}

/// Owned copy of an entry for display outside the lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSnapshot {
    pub id: TaskId,
    pub state: TaskState,
    pub description: String,
    pub command: String,
    pub pid: Option<u32>,
    pub exit_status: i32,
}

struct Entry {
    id: TaskId,
    command: Arc<CmdLine>,
    process: Option<Arc<dyn SubProcess>>,
    queue: QueueKind,
    prev: Option<usize>,
    next: Option<usize>,
}

#[derive(Debug, Default, Clone, Copy)]
struct QueueLinks {
    head: Option<usize>,
    tail: Option<usize>,
    len: usize,
    selected: Option<TaskId>,
}

struct QueueState {
    slots: Vec<Option<Entry>>,
    free: Vec<usize>,
    index: FxHashMap<TaskId, usize>,
    queues: [QueueLinks; 4],
    next_id: TaskId,
    limits: QueueLimits,
    discard_finished: bool,
    discard_succeeded: bool,
    shutdown: bool,
    live_workers: usize,
    workers: Vec<JoinHandle<()>>,
    observer: Option<Arc<dyn QueueObserver>>,
}

impl QueueState {
    fn entry(&self, slot: usize) -> &Entry {
        match self.slots[slot].as_ref() {
            Some(entry) => entry,
            None => unreachable!("linked slot {slot} is free"),
        }
    }

    fn entry_mut(&mut self, slot: usize) -> &mut Entry {
        match self.slots[slot].as_mut() {
            Some(entry) => entry,
            None => unreachable!("linked slot {slot} is free"),
        }
    }

    fn links(&self, kind: QueueKind) -> &QueueLinks {
        &self.queues[kind.slot()]
    }

    fn append(&mut self, slot: usize, kind: QueueKind) {
        let tail = self.queues[kind.slot()].tail;
        {
            let entry = self.entry_mut(slot);
            entry.queue = kind;
            entry.prev = tail;
            entry.next = None;
        }
        match tail {
            Some(tail) => self.entry_mut(tail).next = Some(slot),
            None => self.queues[kind.slot()].head = Some(slot),
        }
        let links = &mut self.queues[kind.slot()];
        links.tail = Some(slot);
        links.len += 1;
    }

    /// Unlinks the entry from its queue. A selection on the entry moves to
    /// its successor, else its predecessor.
    fn unlink(&mut self, slot: usize) {
        let (id, kind, prev, next) = {
            let entry = self.entry(slot);
            (entry.id, entry.queue, entry.prev, entry.next)
        };
        match prev {
            Some(prev) => self.entry_mut(prev).next = next,
            None => self.queues[kind.slot()].head = next,
        }
        match next {
            Some(next) => self.entry_mut(next).prev = prev,
            None => self.queues[kind.slot()].tail = prev,
        }
        let successor = next.or(prev).map(|neighbor| self.entry(neighbor).id);
        let links = &mut self.queues[kind.slot()];
        links.len -= 1;
        if links.selected == Some(id) {
            links.selected = successor;
        }
        let entry = self.entry_mut(slot);
        entry.prev = None;
        entry.next = None;
    }

    fn move_to(&mut self, slot: usize, kind: QueueKind) {
        self.unlink(slot);
        self.append(slot, kind);
    }

    fn insert(&mut self, command: CmdLine, kind: QueueKind) -> TaskId {
        let id = self.next_id;
        self.next_id += 1;
        let entry = Entry {
            id,
            command: Arc::new(command),
            process: None,
            queue: kind,
            prev: None,
            next: None,
        };
        let slot = match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(entry);
                slot
            }
            None => {
                self.slots.push(Some(entry));
                self.slots.len() - 1
            }
        };
        self.index.insert(id, slot);
        self.append(slot, kind);
        id
    }

    /// Frees an entry that is not active.
    fn remove(&mut self, slot: usize) -> bool {
        if self.entry(slot).queue == QueueKind::Active {
            return false;
        }
        self.unlink(slot);
        if let Some(entry) = self.slots[slot].take() {
            self.index.remove(&entry.id);
        }
        self.free.push(slot);
        self.notify_changed();
        true
    }

    fn entry_count(&self) -> usize {
        self.index.len()
    }

    fn notify_changed(&self) {
        if let Some(observer) = &self.observer {
            observer.notify_queue_changed();
        }
    }

    fn notify_out_of_memory(&self) {
        if let Some(observer) = &self.observer {
            observer.notify_out_of_memory();
        }
    }

    fn iter_queue(&self, kind: QueueKind, start: Option<usize>) -> QueueIter<'_> {
        QueueIter {
            state: self,
            cursor: start.or(self.links(kind).head),
        }
    }
}

struct QueueIter<'a> {
    state: &'a QueueState,
    cursor: Option<usize>,
}

impl<'a> Iterator for QueueIter<'a> {
    type Item = &'a Entry;

    fn next(&mut self) -> Option<Self::Item> {
        let slot = self.cursor?;
        let entry = self.state.entry(slot);
        self.cursor = entry.next;
        Some(entry)
    }
}

/// Entries of one queue in order, borrowed under the queue lock.
pub struct TaskViews<'a> {
    inner: QueueIter<'a>,
}

impl<'a> Iterator for TaskViews<'a> {
    type Item = TaskView<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|entry| TaskView {
            id: entry.id,
            command: &entry.command,
            process: entry.process.as_deref(),
        })
    }
}

struct Shared {
    state: Mutex<QueueState>,
    factory: Arc<dyn ProcessFactory>,
}

/// Scheduler for external commands.
///
/// Dropping the queue force-terminates running processes, waits for every
/// worker to return and then frees all entries.
pub struct TaskQueue {
    shared: Arc<Shared>,
}

impl fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("TaskQueue")
            .field("entries", &state.entry_count())
            .field("live_workers", &state.live_workers)
            .field("limits", &state.limits)
            .finish_non_exhaustive()
    }
}

impl TaskQueue {
    #[must_use]
    pub fn new(factory: Arc<dyn ProcessFactory>) -> Self {
        Self::with_limits(factory, QueueLimits::default())
    }

    #[must_use]
    pub fn with_limits(factory: Arc<dyn ProcessFactory>, limits: QueueLimits) -> Self {
        let limits = QueueLimits {
            max_entries: limits.max_entries.max(1),
            max_active: limits.max_active.max(1),
        };
        let state = QueueState {
            slots: Vec::new(),
            free: Vec::new(),
            index: FxHashMap::default(),
            queues: [QueueLinks::default(); 4],
            next_id: 0,
            limits,
            discard_finished: false,
            discard_succeeded: false,
            shutdown: false,
            live_workers: 0,
            workers: Vec::new(),
            observer: None,
        };
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                factory,
            }),
        }
    }

    pub fn set_observer(&self, observer: Option<Arc<dyn QueueObserver>>) {
        self.shared.state.lock().observer = observer;
    }

    #[must_use]
    pub fn limits(&self) -> QueueLimits {
        self.shared.state.lock().limits
    }

    /// Appends a task to the ready queue if `activate` is set, else to the
    /// waiting queue.
    pub fn add_entry(&self, command: CmdLine, activate: bool) -> Result<TaskId, QueueError> {
        let mut state = self.shared.state.lock();
        if state.entry_count() >= state.limits.max_entries {
            return Err(QueueError::CapacityExceeded {
                limit: state.limits.max_entries,
            });
        }
        let kind = if activate {
            QueueKind::Ready
        } else {
            QueueKind::Waiting
        };
        let id = state.insert(command, kind);
        info!(id, queue = %kind, "task queued");
        state.notify_changed();
        if activate {
            schedule_workers(&self.shared, &mut state);
        }
        Ok(id)
    }

    /// Frees a task. Active tasks are rejected; terminate them instead and
    /// remove them once finished.
    pub fn remove_entry(&self, id: TaskId) -> bool {
        let mut state = self.shared.state.lock();
        match state.index.get(&id).copied() {
            Some(slot) => state.remove(slot),
            None => false,
        }
    }

    #[must_use]
    pub fn entry_state(&self, id: TaskId) -> TaskState {
        let state = self.shared.state.lock();
        state
            .index
            .get(&id)
            .map_or(TaskState::InvalidId, |&slot| state.entry(slot).queue.into())
    }

    /// Moves a waiting task to the tail of the ready queue.
    pub fn activate_entry(&self, id: TaskId) -> bool {
        let mut state = self.shared.state.lock();
        let Some(slot) = state.index.get(&id).copied() else {
            return false;
        };
        if state.entry(slot).queue != QueueKind::Waiting {
            return false;
        }
        state.move_to(slot, QueueKind::Ready);
        state.notify_changed();
        schedule_workers(&self.shared, &mut state);
        true
    }

    /// Moves a ready task back to the tail of the waiting queue.
    pub fn inactivate_entry(&self, id: TaskId) -> bool {
        let mut state = self.shared.state.lock();
        let Some(slot) = state.index.get(&id).copied() else {
            return false;
        };
        if state.entry(slot).queue != QueueKind::Ready {
            return false;
        }
        state.move_to(slot, QueueKind::Waiting);
        state.notify_changed();
        true
    }

    /// Signals the process of an active task. The entry stays active until
    /// its worker observes the exit. Returns whether a signal was sent.
    pub fn terminate_task(&self, id: TaskId, force: bool) -> bool {
        let state = self.shared.state.lock();
        let Some(&slot) = state.index.get(&id) else {
            return false;
        };
        let entry = state.entry(slot);
        if entry.queue != QueueKind::Active {
            return false;
        }
        match &entry.process {
            Some(process) => {
                info!(id, force, "terminating task");
                process.terminate(force);
                true
            }
            None => false,
        }
    }

    pub fn set_discard_finished(&self, discard: bool) {
        self.shared.state.lock().discard_finished = discard;
    }

    pub fn set_discard_succeeded(&self, discard: bool) {
        self.shared.state.lock().discard_succeeded = discard;
    }

    #[must_use]
    pub fn selected_id(&self, kind: QueueKind) -> Option<TaskId> {
        self.shared.state.lock().links(kind).selected
    }

    pub fn set_selected_id(&self, kind: QueueKind, id: Option<TaskId>) {
        self.shared.state.lock().queues[kind.slot()].selected = id;
    }

    #[must_use]
    pub fn len(&self, kind: QueueKind) -> usize {
        self.shared.state.lock().links(kind).len
    }

    #[must_use]
    pub fn total_len(&self) -> usize {
        self.shared.state.lock().entry_count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.total_len() == 0
    }

    #[must_use]
    pub fn live_workers(&self) -> usize {
        self.shared.state.lock().live_workers
    }

    /// Walks one queue under the lock, starting at `start` if that entry is
    /// still in the queue, else at the head.
    pub fn with_entries<R>(
        &self,
        kind: QueueKind,
        start: Option<TaskId>,
        visit: impl FnOnce(TaskViews<'_>) -> R,
    ) -> R {
        let state = self.shared.state.lock();
        let start = start
            .and_then(|id| state.index.get(&id).copied())
            .filter(|&slot| state.entry(slot).queue == kind);
        visit(TaskViews {
            inner: state.iter_queue(kind, start),
        })
    }

    #[must_use]
    pub fn snapshot(&self, kind: QueueKind) -> Vec<TaskSnapshot> {
        let state = self.shared.state.lock();
        state
            .iter_queue(kind, None)
            .map(|entry| TaskSnapshot {
                id: entry.id,
                state: entry.queue.into(),
                description: entry.command.description().to_owned(),
                command: entry.command.to_string(),
                pid: entry.process.as_ref().and_then(|process| process.pid()),
                exit_status: entry
                    .process
                    .as_ref()
                    .map_or(EXIT_STATUS_NONE, |process| process.exit_status()),
            })
            .collect()
    }

    /// Captured stdout and stderr of a task that has run.
    #[must_use]
    pub fn task_output(&self, id: TaskId) -> Option<(String, String)> {
        let state = self.shared.state.lock();
        let slot = *state.index.get(&id)?;
        let process = state.entry(slot).process.as_ref()?;
        Some((process.stdout_output(), process.stderr_output()))
    }
}

impl Drop for TaskQueue {
    fn drop(&mut self) {
        let workers = {
            let mut state = self.shared.state.lock();
            state.shutdown = true;
            for entry in state.iter_queue(QueueKind::Active, None) {
                if let Some(process) = &entry.process {
                    process.terminate(true);
                }
            }
            std::mem::take(&mut state.workers)
        };
        for worker in workers {
            if worker.join().is_err() {
                warn!("task worker panicked");
            }
        }
        let mut state = self.shared.state.lock();
        state.index.clear();
        state.slots.clear();
        state.free.clear();
        state.queues = [QueueLinks::default(); 4];
    }
}

/// Raises the worker count to match demand. Caller holds the lock.
fn schedule_workers(shared: &Arc<Shared>, state: &mut MutexGuard<'_, QueueState>) {
    if state.shutdown {
        return;
    }
    let demand = (state.links(QueueKind::Ready).len + state.links(QueueKind::Active).len)
        .min(state.limits.max_active);
    if demand <= state.live_workers {
        return;
    }
    state.workers.retain(|worker| !worker.is_finished());
    while demand > state.live_workers {
        let worker_shared = Arc::clone(shared);
        let spawned = thread::Builder::new()
            .name(format!("drbd-task-{}", state.live_workers))
            .spawn(move || run_worker(&worker_shared));
        match spawned {
            Ok(handle) => {
                state.workers.push(handle);
                state.live_workers += 1;
            }
            Err(err) => {
                error!(error = %err, "failed to spawn task worker");
                state.notify_out_of_memory();
                break;
            }
        }
    }
    debug!(workers = state.live_workers, demand, "task workers scheduled");
}

fn run_worker(shared: &Shared) {
    let mut state = shared.state.lock();
    while !state.shutdown {
        let Some(slot) = state.links(QueueKind::Ready).head else {
            break;
        };
        state.move_to(slot, QueueKind::Active);
        state.notify_changed();
        let id = state.entry(slot).id;

        match shared.factory.create() {
            Ok(process) => {
                state.entry_mut(slot).process = Some(Arc::clone(&process));
                if !state.shutdown {
                    let command = Arc::clone(&state.entry(slot).command);
                    info!(id, command = %command, "task started");
                    let result = MutexGuard::unlocked(&mut state, || process.execute(&command));
                    match result {
                        Ok(()) => info!(id, exit_status = process.exit_status(), "task finished"),
                        Err(err) => warn!(id, error = %err, "task failed"),
                    }
                }
            }
            Err(err) => {
                error!(id, error = %err, "no process handle for task");
                state.notify_out_of_memory();
            }
        }

        state.move_to(slot, QueueKind::Finished);
        let discard = match &state.entry(slot).process {
            Some(process) => {
                state.discard_finished
                    || (state.discard_succeeded && process.exit_status() == 0)
            }
            None => false,
        };
        if discard {
            state.remove(slot);
        }
        state.notify_changed();
    }
    state.live_workers -= 1;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::ProcessError;

    struct IdleFactory;

    impl ProcessFactory for IdleFactory {
        fn create(&self) -> Result<Arc<dyn SubProcess>, ProcessError> {
            Err(ProcessError::Unavailable("idle".into()))
        }
    }

    fn idle_queue() -> TaskQueue {
        TaskQueue::new(Arc::new(IdleFactory))
    }

    fn ids(queue: &TaskQueue, kind: QueueKind) -> Vec<TaskId> {
        queue.snapshot(kind).iter().map(|task| task.id).collect()
    }

    #[test]
    fn suspended_tasks_keep_fifo_order_across_moves() {
        let queue = idle_queue();
        let first = queue.add_entry(CmdLine::new("a"), false).expect("capacity");
        let second = queue.add_entry(CmdLine::new("b"), false).expect("capacity");
        let third = queue.add_entry(CmdLine::new("c"), false).expect("capacity");
        assert_eq!(ids(&queue, QueueKind::Waiting), vec![first, second, third]);
        assert_eq!(queue.entry_state(second), TaskState::Waiting);

        assert!(!queue.inactivate_entry(second));
        assert!(queue.remove_entry(second));
        assert_eq!(queue.entry_state(second), TaskState::InvalidId);
        assert!(!queue.activate_entry(second));
        assert_eq!(ids(&queue, QueueKind::Waiting), vec![first, third]);
    }

    #[test]
    fn selection_moves_to_neighbor_on_removal() {
        let queue = idle_queue();
        let first = queue.add_entry(CmdLine::new("a"), false).expect("capacity");
        let second = queue.add_entry(CmdLine::new("b"), false).expect("capacity");
        let third = queue.add_entry(CmdLine::new("c"), false).expect("capacity");

        queue.set_selected_id(QueueKind::Waiting, Some(second));
        assert!(queue.remove_entry(second));
        assert_eq!(queue.selected_id(QueueKind::Waiting), Some(third));
        assert!(queue.remove_entry(third));
        assert_eq!(queue.selected_id(QueueKind::Waiting), Some(first));
        assert!(queue.remove_entry(first));
        assert_eq!(queue.selected_id(QueueKind::Waiting), None);
        assert!(queue.is_empty());
    }

    #[test]
    fn capacity_is_enforced_and_slots_are_reused() {
        let queue = TaskQueue::with_limits(
            Arc::new(IdleFactory),
            QueueLimits {
                max_entries: 2,
                max_active: 1,
            },
        );
        let first = queue.add_entry(CmdLine::new("a"), false).expect("capacity");
        queue.add_entry(CmdLine::new("b"), false).expect("capacity");
        assert_eq!(
            queue.add_entry(CmdLine::new("c"), false),
            Err(QueueError::CapacityExceeded { limit: 2 })
        );
        assert!(queue.remove_entry(first));
        let third = queue.add_entry(CmdLine::new("c"), false).expect("capacity");
        assert!(third > first);
        assert_eq!(queue.total_len(), 2);
    }

    #[test]
    fn iteration_can_start_at_a_remembered_entry() {
        let queue = idle_queue();
        let ids: Vec<_> = ["a", "b", "c"]
            .into_iter()
            .map(|name| queue.add_entry(CmdLine::new(name), false).expect("capacity"))
            .collect();
        let from_second: Vec<String> = queue.with_entries(QueueKind::Waiting, Some(ids[1]), |iter| {
            iter.map(|view| view.command.description().to_owned()).collect()
        });
        assert_eq!(from_second, vec!["b", "c"]);
        let from_stale: usize = queue.with_entries(QueueKind::Ready, Some(ids[1]), |iter| iter.count());
        assert_eq!(from_stale, 0);
    }
}
