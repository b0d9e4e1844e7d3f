use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

/// A deferred unit of work.
pub type ScheduledTask = Box<dyn FnOnce()>;

/// Opaque handle to a scheduled task.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct TaskHandle(u64);

/// Cancelable one-shot timers.
///
/// Single-threaded: tasks run on the thread that drives the scheduler and may
/// capture `Rc` state.
pub trait Scheduler {
    /// Runs `task` once after `delay` has elapsed.
    fn schedule_once(&self, delay: Duration, task: ScheduledTask) -> TaskHandle;

    /// Cancels a pending task.
    ///
    /// Cancelling a handle that already fired, was already cancelled, or was
    /// never issued by this scheduler is a no-op.
    fn cancel(&self, handle: TaskHandle);
}

#[derive(Default)]
struct Timers {
    now: Duration,
    next_id: u64,
    /// Keyed by (deadline, id) so equal deadlines fire in scheduling order.
    queue: BTreeMap<(Duration, u64), ScheduledTask>,
    deadlines: HashMap<u64, Duration>,
}

/// Virtual-clock scheduler advanced explicitly by its owner.
///
/// A host frame loop calls [`ManualScheduler::advance`] with each frame's
/// delta; tests call it with exact durations.
#[derive(Default)]
pub struct ManualScheduler {
    timers: RefCell<Timers>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current virtual time.
    pub fn now(&self) -> Duration {
        self.timers.borrow().now
    }

    /// Number of tasks waiting to fire.
    pub fn pending(&self) -> usize {
        self.timers.borrow().queue.len()
    }

    /// Moves the clock forward by `dt`, running every task that comes due.
    ///
    /// Tasks run with no internal borrow held, so they may schedule or cancel
    /// other tasks. A task scheduled while advancing fires in the same call if
    /// its deadline falls inside the window.
    pub fn advance(&self, dt: Duration) -> usize {
        let target = self.timers.borrow().now + dt;
        let mut fired = 0;

        loop {
            let task = {
                let mut timers = self.timers.borrow_mut();
                let due = match timers.queue.keys().next() {
                    Some(&key) if key.0 <= target => key,
                    _ => break,
                };
                timers.now = due.0;
                timers.deadlines.remove(&due.1);
                timers.queue.remove(&due)
            };

            if let Some(task) = task {
                task();
                fired += 1;
            }
        }

        self.timers.borrow_mut().now = target;
        fired
    }
}

impl Scheduler for ManualScheduler {
    fn schedule_once(&self, delay: Duration, task: ScheduledTask) -> TaskHandle {
        let mut timers = self.timers.borrow_mut();
        let id = timers.next_id;
        timers.next_id += 1;

        let deadline = timers.now + delay;
        timers.queue.insert((deadline, id), task);
        timers.deadlines.insert(id, deadline);
        TaskHandle(id)
    }

    fn cancel(&self, handle: TaskHandle) {
        let mut timers = self.timers.borrow_mut();
        if let Some(deadline) = timers.deadlines.remove(&handle.0) {
            timers.queue.remove(&(deadline, handle.0));
        }
    }
}
