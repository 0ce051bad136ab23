use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, Sender};
use drbd_tasks::{
    CmdLine, ProcessError, ProcessFactory, QueueKind, QueueLimits, QueueObserver, SubProcess,
    TaskId, TaskQueue, TaskState, EXIT_STATUS_FAILED, EXIT_STATUS_NONE,
};

const DEADLINE: Duration = Duration::from_secs(10);

#[derive(Default)]
struct Tracker {
    running: AtomicUsize,
    max_running: AtomicUsize,
    runs: AtomicUsize,
}

/// Runs for a fixed time, or until terminated when `hold` is set.
struct MockProcess {
    tracker: Arc<Tracker>,
    hold: bool,
    run_time: Duration,
    exit_code: i32,
    stop_tx: Sender<()>,
    stop_rx: Receiver<()>,
    exit_status: AtomicI32,
}

impl SubProcess for MockProcess {
    fn execute(&self, _cmd: &CmdLine) -> Result<(), ProcessError> {
        let now_running = self.tracker.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.tracker.max_running.fetch_max(now_running, Ordering::SeqCst);
        self.tracker.runs.fetch_add(1, Ordering::SeqCst);
        let status = if self.hold {
            match self.stop_rx.recv_timeout(DEADLINE) {
                Ok(()) => EXIT_STATUS_FAILED,
                Err(_) => self.exit_code,
            }
        } else {
            thread::sleep(self.run_time);
            self.exit_code
        };
        self.exit_status.store(status, Ordering::SeqCst);
        self.tracker.running.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }

    fn exit_status(&self) -> i32 {
        self.exit_status.load(Ordering::SeqCst)
    }

    fn terminate(&self, _force: bool) {
        let _ = self.stop_tx.try_send(());
    }

    fn pid(&self) -> Option<u32> {
        Some(4242)
    }
}

struct MockFactory {
    tracker: Arc<Tracker>,
    hold: bool,
    run_time: Duration,
    exit_code: i32,
}

impl MockFactory {
    fn new(hold: bool, exit_code: i32) -> Self {
        Self {
            tracker: Arc::new(Tracker::default()),
            hold,
            run_time: Duration::from_millis(15),
            exit_code,
        }
    }
}

impl ProcessFactory for MockFactory {
    fn create(&self) -> Result<Arc<dyn SubProcess>, ProcessError> {
        let (stop_tx, stop_rx) = bounded(1);
        Ok(Arc::new(MockProcess {
            tracker: Arc::clone(&self.tracker),
            hold: self.hold,
            run_time: self.run_time,
            exit_code: self.exit_code,
            stop_tx,
            stop_rx,
            exit_status: AtomicI32::new(EXIT_STATUS_NONE),
        }))
    }
}

struct FailingFactory;

impl ProcessFactory for FailingFactory {
    fn create(&self) -> Result<Arc<dyn SubProcess>, ProcessError> {
        Err(ProcessError::Unavailable("no memory for process handle".into()))
    }
}

#[derive(Default)]
struct CountingObserver {
    changes: AtomicUsize,
    out_of_memory: AtomicUsize,
}

impl QueueObserver for CountingObserver {
    fn notify_queue_changed(&self) {
        self.changes.fetch_add(1, Ordering::SeqCst);
    }

    fn notify_out_of_memory(&self) {
        self.out_of_memory.fetch_add(1, Ordering::SeqCst);
    }
}

fn wait_until(mut condition: impl FnMut() -> bool) {
    let start = Instant::now();
    while !condition() {
        assert!(start.elapsed() < DEADLINE, "condition not reached in time");
        thread::sleep(Duration::from_millis(5));
    }
}

fn command(index: usize) -> CmdLine {
    CmdLine::new(format!("task {index}")).arg("/bin/true").arg(index.to_string())
}

#[test]
fn all_tasks_finish_within_the_active_limit() {
    let factory = Arc::new(MockFactory::new(false, 0));
    let tracker = Arc::clone(&factory.tracker);
    let queue = TaskQueue::with_limits(
        factory,
        QueueLimits {
            max_entries: 64,
            max_active: 3,
        },
    );
    let observer = Arc::new(CountingObserver::default());
    queue.set_observer(Some(observer.clone()));

    let ids: Vec<TaskId> = (0..40)
        .map(|index| queue.add_entry(command(index), true).expect("capacity"))
        .collect();

    wait_until(|| {
        assert!(queue.len(QueueKind::Active) <= 3);
        queue.len(QueueKind::Finished) == ids.len()
    });
    for id in &ids {
        assert_eq!(queue.entry_state(*id), TaskState::Finished);
    }
    assert_eq!(tracker.runs.load(Ordering::SeqCst), 40);
    assert!(tracker.max_running.load(Ordering::SeqCst) <= 3);
    // queued, activated and finished for every task
    assert!(observer.changes.load(Ordering::SeqCst) >= 3 * ids.len());
    assert_eq!(observer.out_of_memory.load(Ordering::SeqCst), 0);

    let finished = queue.snapshot(QueueKind::Finished);
    let finished_ids: Vec<TaskId> = finished.iter().map(|task| task.id).collect();
    let mut sorted = finished_ids.clone();
    sorted.sort_unstable();
    assert_eq!(sorted, ids);
    assert!(finished.iter().all(|task| task.exit_status == 0));

    wait_until(|| queue.live_workers() == 0);
}

#[test]
fn active_task_is_removed_only_after_it_finished() {
    let queue = TaskQueue::new(Arc::new(MockFactory::new(true, 0)));
    let id = queue.add_entry(command(0), true).expect("capacity");
    wait_until(|| queue.entry_state(id) == TaskState::Active);
    wait_until(|| {
        queue.with_entries(QueueKind::Active, None, |mut views| {
            views.any(|view| view.process.is_some())
        })
    });

    assert!(!queue.remove_entry(id));
    assert_eq!(queue.entry_state(id), TaskState::Active);

    assert!(queue.terminate_task(id, false));
    wait_until(|| queue.entry_state(id) == TaskState::Finished);
    let snapshot = queue.snapshot(QueueKind::Finished);
    assert_eq!(snapshot[0].exit_status, EXIT_STATUS_FAILED);
    assert_eq!(snapshot[0].pid, Some(4242));

    assert!(queue.remove_entry(id));
    assert_eq!(queue.entry_state(id), TaskState::InvalidId);
}

#[test]
fn suspended_task_runs_after_activation() {
    let queue = TaskQueue::new(Arc::new(MockFactory::new(false, 0)));
    let id = queue.add_entry(command(0), false).expect("capacity");
    thread::sleep(Duration::from_millis(30));
    assert_eq!(queue.entry_state(id), TaskState::Waiting);
    assert_eq!(queue.live_workers(), 0);

    assert!(queue.activate_entry(id));
    wait_until(|| queue.entry_state(id) == TaskState::Finished);
    assert!(!queue.activate_entry(id));
    assert!(!queue.terminate_task(id, true));
}

#[test]
fn discard_policies_free_finished_tasks() {
    let succeeding = TaskQueue::new(Arc::new(MockFactory::new(false, 0)));
    succeeding.set_discard_succeeded(true);
    let id = succeeding.add_entry(command(0), true).expect("capacity");
    wait_until(|| succeeding.entry_state(id) == TaskState::InvalidId);
    assert!(succeeding.is_empty());

    let failing = TaskQueue::new(Arc::new(MockFactory::new(false, 1)));
    failing.set_discard_succeeded(true);
    let kept = failing.add_entry(command(1), true).expect("capacity");
    wait_until(|| failing.entry_state(kept) == TaskState::Finished);

    failing.set_discard_finished(true);
    let dropped = failing.add_entry(command(2), true).expect("capacity");
    wait_until(|| failing.entry_state(dropped) == TaskState::InvalidId);
    assert_eq!(failing.total_len(), 1);
}

#[test]
fn handle_creation_failure_is_reported_to_the_observer() {
    let queue = TaskQueue::new(Arc::new(FailingFactory));
    let observer = Arc::new(CountingObserver::default());
    queue.set_observer(Some(observer.clone()));

    let first = queue.add_entry(command(0), true).expect("capacity");
    let second = queue.add_entry(command(1), true).expect("capacity");
    wait_until(|| {
        queue.entry_state(first) == TaskState::Finished
            && queue.entry_state(second) == TaskState::Finished
    });
    assert_eq!(observer.out_of_memory.load(Ordering::SeqCst), 2);
    let snapshot = queue.snapshot(QueueKind::Finished);
    assert!(snapshot.iter().all(|task| task.pid.is_none()));
    assert!(queue.task_output(first).is_none());
}

#[test]
fn dropping_the_queue_terminates_running_tasks() {
    let factory = Arc::new(MockFactory::new(true, 0));
    let tracker = Arc::clone(&factory.tracker);
    let queue = TaskQueue::new(factory);
    for index in 0..4 {
        queue.add_entry(command(index), true).expect("capacity");
    }
    wait_until(|| tracker.running.load(Ordering::SeqCst) == 4);

    let start = Instant::now();
    drop(queue);
    assert!(start.elapsed() < DEADLINE);
    assert_eq!(tracker.running.load(Ordering::SeqCst), 0);
}
