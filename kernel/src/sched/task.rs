//! Scheduler task control block.
//!
//! A `Task` is the scheduler's view of a runnable unit of execution. It is
//! deliberately thin: the heavyweight state (register context, stacks, TLS)
//! lives on the owning [`crate::process::Thread`], which holds a pointer
//! back to its `Task` via [`crate::process::thread::TaskPtr`]. The two
//! structures cross-reference each other so thread-state transitions
//! (blocked, ready, exited, ...) and scheduler decisions stay in sync
//! without copying state back and forth on every tick.

#[cfg(feature = "alloc")]
extern crate alloc;
#[cfg(feature = "alloc")]
use alloc::string::String;
use core::sync::atomic::{AtomicU64, Ordering};

use super::ProcessState;

/// Static scheduling priority. Lower numeric value runs first within its
/// class.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Priority {
    /// Real-time, highest priority band.
    RealTimeHigh = 0,
    RealTimeNormal = 10,
    RealTimeLow = 20,
    SystemHigh = 30,
    SystemNormal = 40,
    UserHigh = 50,
    #[default]
    UserNormal = 60,
    UserLow = 70,
    /// Only runs when nothing else is ready.
    Idle = 99,
}

/// Which ready-queue band a task is scheduled from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedClass {
    /// Fixed-priority real-time tasks; always preempt `Normal`/`Idle`.
    RealTime,
    /// Ordinary round-robin/priority tasks.
    Normal,
    /// Runs only when the ready queue is otherwise empty.
    Idle,
}

/// Per-task scheduling statistics, updated on every context switch.
#[derive(Debug, Default)]
pub struct TaskStats {
    /// Total time spent running, in timer ticks.
    pub runtime: AtomicU64,
    /// Number of times this task was scheduled.
    pub run_count: AtomicU64,
    /// Context switches the task initiated itself (yield, block).
    pub voluntary_switches: AtomicU64,
    /// Context switches forced by timer preemption.
    pub involuntary_switches: AtomicU64,
    /// Tick count at the last time this task ran.
    pub last_run: AtomicU64,
}

/// Scheduler task control block.
///
/// `pid`/`tid` are plain integers rather than [`crate::process::ProcessId`]/
/// [`crate::process::ThreadId`] newtypes: the scheduler only needs them to
/// look the owning process/thread back up in the process table, and keeping
/// them as raw `u64` avoids a dependency cycle between `sched` and
/// `process`.
pub struct Task {
    pub pid: u64,
    pub tid: u64,
    pub parent_pid: u64,
    #[cfg(feature = "alloc")]
    pub name: String,
    /// Mirrors the owning thread's state; kept here so the scheduler can
    /// make enqueue/dequeue decisions without locking the process table.
    pub state: ProcessState,
    pub priority: Priority,
    pub sched_class: SchedClass,
    /// Time slice remaining in this scheduling quantum, in timer ticks.
    pub time_slice: u32,
    pub stats: TaskStats,
    /// Saved instruction pointer, used only to seed a brand-new task before
    /// its first switch-in; after that, the authoritative register state
    /// lives in the owning thread's `ArchThreadContext`.
    pub instruction_pointer: usize,
    pub stack_pointer: usize,
    pub page_table: usize,
    /// Opaque blocking reason set by `Thread::set_blocked`; `None` once
    /// runnable again.
    pub blocked_on: Option<u64>,
}

/// Default time slice for a newly created task, in timer ticks.
pub const DEFAULT_TIME_SLICE: u32 = 10;

/// How many ticks a `Normal`-class task waits before its effective
/// priority is boosted by one step, to avoid starvation under load.
pub const PRIORITY_BOOST_INTERVAL: u64 = 100;

impl Task {
    #[cfg(feature = "alloc")]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pid: u64,
        tid: u64,
        name: String,
        instruction_pointer: usize,
        stack_pointer: usize,
        page_table: usize,
    ) -> Self {
        Self {
            pid,
            tid,
            parent_pid: 0,
            name,
            state: ProcessState::Ready,
            priority: Priority::default(),
            sched_class: SchedClass::Normal,
            time_slice: DEFAULT_TIME_SLICE,
            stats: TaskStats::default(),
            instruction_pointer,
            stack_pointer,
            page_table,
            blocked_on: None,
        }
    }

    /// Record that the task just ran for `ticks`.
    pub fn update_runtime(&self, ticks: u64) {
        self.stats.runtime.fetch_add(ticks, Ordering::Relaxed);
        self.stats
            .last_run
            .store(crate::arch::timer::get_ticks(), Ordering::Relaxed);
    }

    /// Record a context switch into this task.
    pub fn mark_scheduled(&self, voluntary: bool) {
        self.stats.run_count.fetch_add(1, Ordering::Relaxed);
        if voluntary {
            self.stats
                .voluntary_switches
                .fetch_add(1, Ordering::Relaxed);
        } else {
            self.stats
                .involuntary_switches
                .fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Effective priority after anti-starvation aging. Real-time and idle
    /// tasks are unaffected; `Normal` tasks that have waited a long time
    /// get a numerically lower (better) priority, up to 20 steps.
    pub fn effective_priority(&self) -> u8 {
        match self.sched_class {
            SchedClass::RealTime => self.priority as u8,
            SchedClass::Normal => {
                let now = crate::arch::timer::get_ticks();
                let last_run = self.stats.last_run.load(Ordering::Relaxed);
                let wait_time = now.saturating_sub(last_run);
                let boost = (wait_time / PRIORITY_BOOST_INTERVAL).min(20) as u8;
                (self.priority as u8).saturating_sub(boost)
            }
            SchedClass::Idle => Priority::Idle as u8,
        }
    }
}
