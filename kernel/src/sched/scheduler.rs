//! The scheduler proper: tracks the currently running task and drives
//! context switches into whatever [`super::queue::READY_QUEUE`] hands back.
//!
//! There is exactly one CPU, so there is exactly one [`Scheduler`], guarded
//! by [`SCHEDULER`]. Three policies share the same underlying
//! [`super::queue::ReadyQueue`] bucket scheme: `RoundRobin` and `Priority`
//! only differ in how a `Normal`-class task's time slice is computed;
//! `RealTime` tasks always preempt both regardless of which policy is
//! active (see `Task::sched_class`).

#[cfg(feature = "alloc")]
extern crate alloc;

use core::ptr::NonNull;

use spin::Mutex;

use super::queue::READY_QUEUE;
use super::task::{Priority, SchedClass, Task};
use super::ProcessState;
use crate::arch::context::{switch_to, Context, ThreadContext};
use crate::arch::x86::gdt;
use crate::process::{table, ProcessId, ThreadId};

/// Which policy governs `Normal`-class tasks' time-slice length.
/// `RealTime`-class tasks are unaffected by this setting; they always run
/// fixed-priority, preemptive, to completion or block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedAlgorithm {
    /// Every `Normal` task gets [`Scheduler::default_slice`] ticks,
    /// irrespective of priority.
    RoundRobin,
    /// Time slice scales with priority: higher-priority `Normal` tasks get
    /// a longer quantum before voluntarily giving up the CPU to same-band
    /// peers.
    Priority,
    /// Real-time tasks already bypass slice-based preemption entirely via
    /// `SchedClass::RealTime`; selecting this just pins `Normal` tasks to
    /// the flat default slice, same as `RoundRobin`, for callers that want
    /// the whole system running one fixed quantum.
    RealTime,
}

/// The context a freshly created idle/bootstrap pseudo-task switches into
/// and out of. Unlike every other task, the idle task has no owning
/// [`crate::process::Thread`] to hold its `Context` in, since it is the
/// kernel's own boot stack rather than a scheduled program; this static
/// holds the one idle context the same way a `Thread` would.
static IDLE_CONTEXT: Mutex<Context> = Mutex::new(Context::empty());

/// Sentinel pid identifying the idle pseudo-task. Never allocated to a real
/// process: process IDs are allocated starting at 1.
const IDLE_PID: u64 = 0;

pub struct Scheduler {
    current: Option<NonNull<Task>>,
    algorithm: SchedAlgorithm,
    default_slice: u32,
}

// SAFETY: every field is only ever touched with `SCHEDULER`'s lock held, and
// there is exactly one CPU in this kernel to contend for it.
unsafe impl Send for Scheduler {}

impl Scheduler {
    pub const fn new() -> Self {
        Self {
            current: None,
            algorithm: SchedAlgorithm::RoundRobin,
            default_slice: super::task::DEFAULT_TIME_SLICE,
        }
    }

    /// Install `idle` as the currently running task. Called once at boot,
    /// before any interrupt can fire.
    pub fn init(&mut self, idle: NonNull<Task>) {
        self.current = Some(idle);
    }

    /// The task presently running on the CPU, if the scheduler has been
    /// initialized.
    pub fn current(&self) -> Option<NonNull<Task>> {
        self.current
    }

    pub fn set_algorithm(&mut self, algorithm: SchedAlgorithm) {
        self.algorithm = algorithm;
    }

    pub fn set_slice(&mut self, ticks: u32) {
        self.default_slice = ticks.max(1);
    }

    /// Time slice a newly (re)scheduled `Normal`-class task should start
    /// with, under the active policy.
    fn slice_for(&self, task: &Task) -> u32 {
        match (self.algorithm, task.sched_class) {
            (_, SchedClass::RealTime) | (_, SchedClass::Idle) => self.default_slice,
            (SchedAlgorithm::Priority, SchedClass::Normal) => {
                // Lower numeric priority (more urgent) -> longer slice.
                let bonus = (Priority::UserLow as u32 - task.priority as u32) / 10;
                self.default_slice + bonus
            }
            (SchedAlgorithm::RoundRobin, SchedClass::Normal)
            | (SchedAlgorithm::RealTime, SchedClass::Normal) => self.default_slice,
        }
    }

    /// Timer-tick hook: decrement the running task's slice and reschedule
    /// once it hits zero. Real-time tasks are exempt from slice-based
    /// preemption; they only give up the CPU by blocking or exiting.
    pub fn tick(&mut self) {
        let Some(current) = self.current else {
            return;
        };
        // SAFETY: `current` always points at a live task: either the
        // idle/bootstrap task (leaked for the kernel's lifetime) or a task
        // owned by a thread that has not yet exited.
        let task = unsafe { current.as_ref() };
        task.update_runtime(1);

        if task.sched_class == SchedClass::RealTime || task.time_slice == 0 {
            return;
        }

        let remaining = task.time_slice.saturating_sub(1);
        // SAFETY: sole owner of `*current` while holding the scheduler lock.
        unsafe {
            (*current.as_ptr()).time_slice = remaining;
        }
        if remaining == 0 {
            self.schedule();
        }
    }

    /// Voluntary yield: always considers other ready tasks, regardless of
    /// remaining time slice.
    pub fn tasks_yield(&mut self) {
        if let Some(current) = self.current {
            // SAFETY: see `tick`.
            unsafe {
                current.as_ref().mark_scheduled(true);
            }
        }
        self.schedule();
    }

    /// Pick the next task to run and switch into it. If the ready queue is
    /// empty, keeps running the current task.
    pub fn schedule(&mut self) {
        let Some(current) = self.current else {
            return;
        };

        let next = READY_QUEUE.lock().dequeue();
        let Some(next) = next else {
            return;
        };

        if next == current {
            self.requeue_if_runnable(next);
            return;
        }

        // SAFETY: both pointers reference live tasks (see `tick`).
        let current_state = unsafe { current.as_ref().state };

        if !matches!(
            current_state,
            ProcessState::Blocked | ProcessState::Zombie | ProcessState::Dead
        ) {
            // SAFETY: see above.
            unsafe {
                (*current.as_ptr()).state = ProcessState::Ready;
            }
            self.requeue_if_runnable(current);
        }

        // SAFETY: see above.
        unsafe {
            (*next.as_ptr()).state = ProcessState::Running;
            (*next.as_ptr()).time_slice = self.slice_for(next.as_ref());
            next.as_ref().mark_scheduled(false);
        }

        self.current = Some(next);
        // SAFETY: `current`/`next` are distinct live tasks; `context_ptr`
        // looks up stable storage (the idle context static, or a thread's
        // `Mutex<ArchThreadContext>`, which this kernel assumes does not
        // move once created -- the same assumption `process::table` already
        // relies on to hand out `&'static Thread` references).
        unsafe {
            if let (Some(prev_ctx), Some(next_ctx)) = (context_ptr(current), context_ptr(next)) {
                activate(next);
                switch_to(prev_ctx, next_ctx);
            }
        }
    }

    fn requeue_if_runnable(&self, task: NonNull<Task>) {
        // SAFETY: see `tick`.
        let runnable = unsafe { task.as_ref().state == ProcessState::Ready };
        if runnable {
            READY_QUEUE.lock().enqueue(task);
        }
    }

    /// Terminate the currently running task and never return into it.
    pub fn exit_current(&mut self, exit_code: i32) -> ! {
        if let Some(current) = self.current {
            // SAFETY: see `tick`.
            unsafe {
                (*current.as_ptr()).state = ProcessState::Zombie;
            }
        }
        let _ = exit_code;
        self.schedule();
        // `schedule` never switches back into a task marked `Zombie` above:
        // by construction it was not re-enqueued. Park defensively rather
        // than fall off the end of a `-> !` function if the ready queue is
        // momentarily empty.
        loop {
            crate::arch::idle();
        }
    }

    /// Find the task owned by `pid`'s current/main thread and move it into
    /// the ready queue, regardless of which band it belongs in.
    pub fn wake(&mut self, pid: u64) {
        let Some(task_ptr) = find_task(pid) else {
            return;
        };
        // SAFETY: `find_task` only returns pointers obtained from a live
        // thread's `TaskPtr`.
        unsafe {
            (*task_ptr.as_ptr()).state = ProcessState::Ready;
        }
        READY_QUEUE.lock().enqueue(task_ptr);
    }

    /// Mark the task owned by `pid` blocked. If it is the task currently
    /// running, reschedules immediately; otherwise just removes it from the
    /// ready queue if it happened to be sitting in one.
    pub fn block(&mut self, pid: u64) {
        let Some(task_ptr) = find_task(pid) else {
            return;
        };
        // SAFETY: see `wake`.
        unsafe {
            (*task_ptr.as_ptr()).state = ProcessState::Blocked;
        }
        READY_QUEUE.lock().remove(task_ptr);
        if self.current == Some(task_ptr) {
            self.schedule();
        }
    }

    /// Update a task's static priority and re-derive its scheduling class.
    pub fn set_priority(&mut self, pid: u64, priority: Priority) {
        let Some(task_ptr) = find_task(pid) else {
            return;
        };
        let was_queued = READY_QUEUE.lock().remove(task_ptr);
        // SAFETY: see `wake`.
        unsafe {
            (*task_ptr.as_ptr()).priority = priority;
            (*task_ptr.as_ptr()).sched_class = if priority <= Priority::RealTimeLow {
                SchedClass::RealTime
            } else if priority == Priority::Idle {
                SchedClass::Idle
            } else {
                SchedClass::Normal
            };
        }
        if was_queued {
            READY_QUEUE.lock().enqueue(task_ptr);
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// Program the TSS/page table for `task` before switching into it.
///
/// # Safety
/// Caller must ensure `task` is about to be switched into via `switch_to`
/// immediately after this returns.
unsafe fn activate(task: NonNull<Task>) {
    // SAFETY: forwarded from caller.
    let task_ref = unsafe { task.as_ref() };
    if task_ref.pid == IDLE_PID {
        return;
    }
    if let Some(process) = table::get_process(ProcessId(task_ref.pid)) {
        if let Some(thread) = process.get_thread(ThreadId(task_ref.tid)) {
            gdt::set_kernel_stack(thread.kernel_stack.top() as u32);
            thread.tls.lock().activate_tls_register();
        }
    }
    if task_ref.page_table != 0 {
        // SAFETY: `page_table` is the cr3 value captured from the owning
        // process's `VirtualAddressSpace` when its scheduler task was
        // created; it stays valid for the process's lifetime.
        unsafe {
            crate::arch::write_cr3(task_ref.page_table as u32);
        }
    }
}

/// Resolve the raw context pointer `switch_to` reads/writes for `task`: the
/// shared idle context for the idle pseudo-task, or the owning thread's
/// `ArchThreadContext` otherwise.
///
/// # Safety
/// The returned pointer is valid only as long as the underlying storage
/// (the `IDLE_CONTEXT` static, or the owning `Thread`) is not freed or
/// moved, which holds for the lifetime of this kernel's single CPU loop.
unsafe fn context_ptr(task: NonNull<Task>) -> Option<*mut Context> {
    // SAFETY: forwarded from caller.
    let task_ref = unsafe { task.as_ref() };
    if task_ref.pid == IDLE_PID {
        return Some(&mut *IDLE_CONTEXT.lock() as *mut Context);
    }
    let process = table::get_process(ProcessId(task_ref.pid))?;
    let thread = process.get_thread(ThreadId(task_ref.tid))?;
    let mut ctx = thread.context.lock();
    Some(ctx.kernel_context_mut() as *mut Context)
}

/// Look up the scheduler task for `pid`'s current/main thread via the
/// process table rather than scanning the ready queue: blocked tasks are
/// not enqueued anywhere, so the queue alone can't answer "does pid X have
/// a task and what state is it in".
fn find_task(pid: u64) -> Option<NonNull<Task>> {
    let process = table::get_process(ProcessId(pid))?;
    let threads = process.threads.lock();
    for (_, thread) in threads.iter() {
        if let Some(task_ptr) = thread.get_task_ptr() {
            return Some(task_ptr);
        }
    }
    None
}

pub static SCHEDULER: Mutex<Scheduler> = Mutex::new(Scheduler::new());

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slice_for_round_robin_is_flat() {
        let sched = Scheduler::new();
        let task = Task::new(1, 1, alloc::string::String::from("t"), 0, 0, 0);
        assert_eq!(
            sched.slice_for(&task),
            super::super::task::DEFAULT_TIME_SLICE
        );
    }

    #[test]
    fn slice_for_priority_favors_high_priority() {
        let mut sched = Scheduler::new();
        sched.set_algorithm(SchedAlgorithm::Priority);
        let mut high = Task::new(1, 1, alloc::string::String::from("t"), 0, 0, 0);
        high.priority = Priority::UserHigh;
        let mut low = Task::new(2, 1, alloc::string::String::from("t"), 0, 0, 0);
        low.priority = Priority::UserLow;
        assert!(sched.slice_for(&high) <= sched.slice_for(&low));
    }
}
