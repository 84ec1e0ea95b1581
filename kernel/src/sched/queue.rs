//! Ready queue: a fixed set of priority bands, each a circular FIFO.
//!
//! Real-time tasks occupy their own bands and always preempt `Normal`/`Idle`
//! tasks. Within a band, tasks run round-robin. This is the bucket scheme
//! [`super::scheduler::Scheduler`] uses to implement round-robin, priority,
//! and real-time policies from a single data structure instead of three.

use core::ptr::NonNull;

use spin::Mutex;

use super::task::{Priority, SchedClass, Task};

/// `NonNull<Task>` is neither `Send` nor `Sync` on its own; every task this
/// queue ever holds is only ever touched while [`READY_QUEUE`]'s spinlock is
/// held, so sharing the pointer across whichever CPU happens to be running
/// the scheduler is sound.
#[derive(Clone, Copy)]
struct QueuedTask(NonNull<Task>);

// SAFETY: see the struct doc comment: all access is serialized through
// `READY_QUEUE`'s `Mutex`.
unsafe impl Send for QueuedTask {}
// SAFETY: see above.
unsafe impl Sync for QueuedTask {}

/// Maximum tasks any single priority band can hold.
const MAX_TASKS_PER_QUEUE: usize = 256;

/// Number of real-time priority bands (`Priority::RealTimeHigh` through
/// `Priority::RealTimeLow`, i.e. 0..=20 in steps of 10, clamped generously).
const NUM_RT_PRIORITIES: usize = 30;

/// Number of normal priority bands (`SystemHigh`..`UserLow`).
const NUM_NORMAL_PRIORITIES: usize = 4;

/// Circular FIFO of tasks at a single priority level.
struct PriorityQueue {
    tasks: [Option<QueuedTask>; MAX_TASKS_PER_QUEUE],
    head: usize,
    tail: usize,
    count: usize,
}

impl PriorityQueue {
    const fn new() -> Self {
        Self {
            tasks: [None; MAX_TASKS_PER_QUEUE],
            head: 0,
            tail: 0,
            count: 0,
        }
    }

    fn is_empty(&self) -> bool {
        self.count == 0
    }

    fn is_full(&self) -> bool {
        self.count == MAX_TASKS_PER_QUEUE
    }

    fn enqueue(&mut self, task: NonNull<Task>) -> bool {
        if self.is_full() {
            return false;
        }
        self.tasks[self.tail] = Some(QueuedTask(task));
        self.tail = (self.tail + 1) % MAX_TASKS_PER_QUEUE;
        self.count += 1;
        true
    }

    fn dequeue(&mut self) -> Option<NonNull<Task>> {
        if self.is_empty() {
            return None;
        }
        let task = self.tasks[self.head].take();
        self.head = (self.head + 1) % MAX_TASKS_PER_QUEUE;
        self.count -= 1;
        task.map(|t| t.0)
    }

    /// Remove `target` from wherever it sits in the ring, preserving the
    /// relative order of everything else.
    fn remove(&mut self, target: NonNull<Task>) -> bool {
        if self.is_empty() {
            return false;
        }

        let mut found = false;
        let mut new_tasks: [Option<QueuedTask>; MAX_TASKS_PER_QUEUE] = [None; MAX_TASKS_PER_QUEUE];
        let mut new_count = 0;

        let mut idx = self.head;
        for _ in 0..self.count {
            if let Some(task) = self.tasks[idx] {
                if task.0 != target {
                    new_tasks[new_count] = Some(task);
                    new_count += 1;
                } else {
                    found = true;
                }
            }
            idx = (idx + 1) % MAX_TASKS_PER_QUEUE;
        }

        if found {
            self.tasks = new_tasks;
            self.head = 0;
            self.tail = new_count;
            self.count = new_count;
        }

        found
    }
}

impl Default for PriorityQueue {
    fn default() -> Self {
        Self::new()
    }
}

fn rt_band(priority: Priority) -> usize {
    ((priority as usize) / 10).min(NUM_RT_PRIORITIES - 1)
}

fn normal_band(priority: Priority) -> usize {
    ((priority as usize).saturating_sub(Priority::SystemHigh as usize) / 10)
        .min(NUM_NORMAL_PRIORITIES - 1)
}

/// The single-CPU ready queue: one bucket set for `RealTime`, one for
/// `Normal`, and a dedicated idle bucket that only yields a task when
/// everything else is empty.
pub struct ReadyQueue {
    rt_queues: [PriorityQueue; NUM_RT_PRIORITIES],
    normal_queues: [PriorityQueue; NUM_NORMAL_PRIORITIES],
    idle_queue: PriorityQueue,
    rt_bitmap: u32,
    normal_bitmap: u32,
    idle_flag: bool,
}

impl ReadyQueue {
    pub const fn new() -> Self {
        Self {
            rt_queues: [const { PriorityQueue::new() }; NUM_RT_PRIORITIES],
            normal_queues: [const { PriorityQueue::new() }; NUM_NORMAL_PRIORITIES],
            idle_queue: PriorityQueue::new(),
            rt_bitmap: 0,
            normal_bitmap: 0,
            idle_flag: false,
        }
    }

    /// Enqueue `task` into the band matching its `sched_class`/`priority`.
    pub fn enqueue(&mut self, task: NonNull<Task>) -> bool {
        // SAFETY: `task` is a live `Task` owned by a thread's `TaskPtr`;
        // callers never enqueue a task whose owning thread has exited.
        let task_ref = unsafe { task.as_ref() };
        match task_ref.sched_class {
            SchedClass::RealTime => {
                let idx = rt_band(task_ref.priority);
                if self.rt_queues[idx].enqueue(task) {
                    self.rt_bitmap |= 1 << idx;
                    true
                } else {
                    false
                }
            }
            SchedClass::Normal => {
                let idx = normal_band(task_ref.priority);
                if self.normal_queues[idx].enqueue(task) {
                    self.normal_bitmap |= 1 << idx;
                    true
                } else {
                    false
                }
            }
            SchedClass::Idle => {
                if self.idle_queue.enqueue(task) {
                    self.idle_flag = true;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Dequeue the next task to run: highest real-time band first, then
    /// the lowest-numbered non-empty normal band, then idle.
    pub fn dequeue(&mut self) -> Option<NonNull<Task>> {
        if self.rt_bitmap != 0 {
            let idx = self.rt_bitmap.trailing_zeros() as usize;
            if let Some(task) = self.rt_queues[idx].dequeue() {
                if self.rt_queues[idx].is_empty() {
                    self.rt_bitmap &= !(1 << idx);
                }
                return Some(task);
            }
        }

        if self.normal_bitmap != 0 {
            let idx = self.normal_bitmap.trailing_zeros() as usize;
            if let Some(task) = self.normal_queues[idx].dequeue() {
                if self.normal_queues[idx].is_empty() {
                    self.normal_bitmap &= !(1 << idx);
                }
                return Some(task);
            }
        }

        if self.idle_flag {
            if let Some(task) = self.idle_queue.dequeue() {
                if self.idle_queue.is_empty() {
                    self.idle_flag = false;
                }
                return Some(task);
            }
        }

        None
    }

    /// Remove `task` from whichever band it's queued in (used when a task
    /// is terminated or has its priority/class changed while still ready).
    pub fn remove(&mut self, task: NonNull<Task>) -> bool {
        // SAFETY: see `enqueue`.
        let task_ref = unsafe { task.as_ref() };
        match task_ref.sched_class {
            SchedClass::RealTime => {
                let idx = rt_band(task_ref.priority);
                let removed = self.rt_queues[idx].remove(task);
                if removed && self.rt_queues[idx].is_empty() {
                    self.rt_bitmap &= !(1 << idx);
                }
                removed
            }
            SchedClass::Normal => {
                let idx = normal_band(task_ref.priority);
                let removed = self.normal_queues[idx].remove(task);
                if removed && self.normal_queues[idx].is_empty() {
                    self.normal_bitmap &= !(1 << idx);
                }
                removed
            }
            SchedClass::Idle => {
                let removed = self.idle_queue.remove(task);
                if removed && self.idle_queue.is_empty() {
                    self.idle_flag = false;
                }
                removed
            }
        }
    }

    pub fn has_ready_tasks(&self) -> bool {
        self.rt_bitmap != 0 || self.normal_bitmap != 0 || self.idle_flag
    }
}

impl Default for ReadyQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// The kernel's single ready queue. There is exactly one CPU, so there is
/// exactly one queue.
pub static READY_QUEUE: Mutex<ReadyQueue> = Mutex::new(ReadyQueue::new());

#[cfg(test)]
mod tests {
    use super::*;

    fn leak_task(pid: u64, priority: Priority, class: SchedClass) -> NonNull<Task> {
        extern crate alloc;
        let mut task = alloc::boxed::Box::new(Task::new(
            pid,
            0,
            alloc::string::String::from("t"),
            0,
            0,
            0,
        ));
        task.priority = priority;
        task.sched_class = class;
        NonNull::new(alloc::boxed::Box::leak(task) as *mut Task).unwrap()
    }

    #[test]
    fn real_time_preempts_normal() {
        let mut q = ReadyQueue::new();
        q.enqueue(leak_task(1, Priority::UserNormal, SchedClass::Normal));
        q.enqueue(leak_task(2, Priority::RealTimeHigh, SchedClass::RealTime));
        let next = q.dequeue().unwrap();
        // SAFETY: task was just leaked above and is still alive.
        assert_eq!(unsafe { next.as_ref() }.pid, 2);
    }

    #[test]
    fn idle_only_runs_when_nothing_else_ready() {
        let mut q = ReadyQueue::new();
        q.enqueue(leak_task(1, Priority::Idle, SchedClass::Idle));
        assert!(q.has_ready_tasks());
        q.enqueue(leak_task(2, Priority::UserNormal, SchedClass::Normal));
        let next = q.dequeue().unwrap();
        assert_eq!(unsafe { next.as_ref() }.pid, 2);
    }
}
