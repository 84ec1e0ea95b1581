//! Single-CPU preemptive scheduler: round-robin, priority, and real-time
//! policies over a bitmap-indexed ready queue (see [`queue`]).
//!
//! There is no SMP support: [`SCHEDULER`] is a single global, and the idle
//! pseudo-task (pid 0) stands in for the kernel's own boot stack so the
//! first call to [`schedule`] has something to switch *out of*.

#[cfg(feature = "alloc")]
extern crate alloc;

pub mod queue;
pub mod scheduler;
pub mod task;

pub use crate::process::pcb::ProcessState;
pub use scheduler::{SchedAlgorithm, Scheduler, SCHEDULER};
pub use task::{Priority, SchedClass, Task};

use core::ptr::NonNull;

/// Build and install the idle pseudo-task, then hand it to the scheduler as
/// the initially "running" task. Must run after `process::init()` (the idle
/// task does not belong to any process, but `tick`/`schedule` assume
/// `current()` is always `Some` once booted) and before interrupts are
/// enabled, since the timer tick drives `tick()`.
#[cfg(feature = "alloc")]
pub fn init() {
    println!("[SCHED] Initializing scheduler...");
    let idle = alloc::boxed::Box::new(Task::new(
        0,
        0,
        alloc::string::String::from("idle"),
        0,
        0,
        0,
    ));
    let mut idle = idle;
    idle.sched_class = SchedClass::Idle;
    idle.priority = Priority::Idle;
    let idle_ptr = NonNull::new(alloc::boxed::Box::leak(idle) as *mut _)
        .expect("idle task allocation failed");
    SCHEDULER.lock().init(idle_ptr);
    println!("[SCHED] Scheduler initialized");
}

#[cfg(not(feature = "alloc"))]
pub fn init() {
    println!("[SCHED] Scheduler initialized (no-alloc stub)");
}

/// Enter the scheduling loop. Never returns: once the idle task has handed
/// off to the first real task, control only comes back here via later
/// `schedule()` calls that happen to pick the idle task again.
pub fn run() -> ! {
    println!("[SCHED] Entering scheduler main loop");
    loop {
        schedule();
        crate::arch::idle();
    }
}

/// Timer-tick hook: decrement the running task's slice, preempting at zero.
pub fn tick() {
    SCHEDULER.lock().tick();
}

/// Pick the next ready task and switch into it, if one is available.
pub fn schedule() {
    SCHEDULER.lock().schedule();
}

/// Add `task` to the ready queue.
pub fn enqueue(task: NonNull<Task>) {
    queue::READY_QUEUE.lock().enqueue(task);
}

/// Remove `task` from the ready queue, e.g. because its owning thread
/// exited.
pub fn remove_task(task: NonNull<Task>) {
    queue::READY_QUEUE.lock().remove(task);
}

/// Voluntarily give up the CPU, considering other ready tasks even if the
/// current time slice has not expired.
pub fn yield_cpu() {
    SCHEDULER.lock().tasks_yield();
}

/// Terminate the currently running task and never return into it.
pub fn exit_task(exit_code: i32) -> ! {
    SCHEDULER.lock().exit_current(exit_code)
}

/// Move the task owned by `pid` (accepts both [`crate::process::ProcessId`]
/// and raw `u64`) back into the ready queue.
pub fn wake_up_process<T: Into<u64>>(pid: T) {
    SCHEDULER.lock().wake(pid.into());
}

/// Mark the task owned by `pid` blocked and reschedule if it was running.
pub fn block_process<T: Into<u64>>(pid: T) {
    SCHEDULER.lock().block(pid.into());
}

/// Change the static priority (and derived scheduling class) of the task
/// owned by `pid`.
pub fn set_priority<T: Into<u64>>(pid: T, priority: Priority) {
    SCHEDULER.lock().set_priority(pid.into(), priority);
}

/// Switch which policy governs `Normal`-class time-slice length.
pub fn set_algorithm(algorithm: SchedAlgorithm) {
    SCHEDULER.lock().set_algorithm(algorithm);
}

/// Set the flat/base time slice, in timer ticks, used by every policy.
pub fn set_slice(ticks: u32) {
    SCHEDULER.lock().set_slice(ticks);
}
