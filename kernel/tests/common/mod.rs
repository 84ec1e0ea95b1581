//! Common test utilities and helpers for JSOS kernel tests.

use crate::{serial_println, test_framework::*};

/// Announce a test suite on the serial console. Subsystem initialization
/// itself (heap, frame allocator, ...) is each test binary's own
/// responsibility since the exact set of subsystems needed varies per
/// suite.
pub fn init_test_env(subsystem: &str) {
    serial_println!("\n=== {} Test Suite ===", subsystem);
}

/// Helper to create a standalone test process, bypassing `process::init()`
/// and `lifecycle::create_process` (which allocate real stacks via the
/// frame allocator and are overkill for exercising the process table and
/// PCB bookkeeping directly).
#[cfg(feature = "alloc")]
pub fn create_test_process(name: &str) -> crate::process::ProcessId {
    extern crate alloc;
    use alloc::string::String;

    use crate::process::{self, Process, ProcessPriority};

    let pid = process::alloc_pid();
    let process = Process::new(pid, None, String::from(name), ProcessPriority::Normal);
    let _ = process::table::add_process(process);
    pid
}

/// Helper to clean up test processes created by `create_test_process`.
#[cfg(feature = "alloc")]
pub fn cleanup_test_process(pid: crate::process::ProcessId) {
    crate::process::table::remove_process(pid);
}

/// Test helper for scheduler operations.
///
/// Tasks created here are never wired up to a process/thread via
/// `TaskPtr`, so callers must stick to the ready-queue-level API
/// (`sched::enqueue`/`sched::remove_task`) rather than anything keyed by
/// pid (`wake_up_process`, `block_process`, `set_priority`), which looks
/// the task back up through the process table.
#[cfg(feature = "alloc")]
pub mod scheduler_helpers {
    extern crate alloc;

    use alloc::{boxed::Box, string::String};
    use core::ptr::NonNull;

    use crate::sched::Task;

    /// Leak a standalone task for scheduler tests.
    pub fn create_test_task(name: &str, pid: u64, tid: u64) -> NonNull<Task> {
        let task = Box::new(Task::new(pid, tid, String::from(name), 0, 0, 0));
        NonNull::new(Box::leak(task) as *mut Task).unwrap()
    }

    /// Reclaim a task created by `create_test_task`.
    ///
    /// # Safety
    /// The caller must have already removed `task` from every queue that
    /// might still hold it (`sched::remove_task`), and must not use `task`
    /// again afterward.
    pub unsafe fn cleanup_test_task(task: NonNull<Task>) {
        // SAFETY: forwarded from caller; `task` was leaked from a `Box` by
        // `create_test_task`.
        unsafe {
            drop(Box::from_raw(task.as_ptr()));
        }
    }
}

/// Test helper for memory operations.
pub mod memory_helpers {
    use crate::mm::PhysicalAddress;

    /// Placeholder physical address for tests that just need *a* value,
    /// not a real allocation.
    pub fn alloc_test_frame() -> Option<PhysicalAddress> {
        Some(PhysicalAddress::new(0x0010_0000))
    }
}

/// Assertion helpers for kernel tests.
#[macro_export]
macro_rules! assert_ok {
    ($result:expr) => {
        match $result {
            Ok(val) => val,
            Err(e) => {
                serial_println!("Assertion failed: {:?} is not Ok", e);
                panic!("Expected Ok, got Err");
            }
        }
    };
}

#[macro_export]
macro_rules! assert_err {
    ($result:expr) => {
        match $result {
            Ok(_) => {
                serial_println!("Assertion failed: result is Ok");
                panic!("Expected Err, got Ok");
            }
            Err(e) => e,
        }
    };
}

/// Performance assertion for benchmarks.
#[macro_export]
macro_rules! assert_performance {
    ($time_ns:expr, < $limit_ns:expr) => {
        if $time_ns >= $limit_ns {
            serial_println!(
                "Performance assertion failed: {} ns >= {} ns",
                $time_ns,
                $limit_ns
            );
            panic!("Performance requirement not met");
        }
    };
}
