//! Domain types providing compile-time safety and self-documentation

use std::fmt;

/// Process ID
///
/// Represents the target process being profiled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pid(pub i32);

impl Pid {
    /// Path of this process's `/proc` directory
    #[must_use]
    pub fn proc_dir(self) -> String {
        format!("/proc/{}", self.0)
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PID:{}", self.0)
    }
}

impl From<i32> for Pid {
    fn from(pid: i32) -> Self {
        Pid(pid)
    }
}

/// Accumulated CPU time in clock ticks (`USER_HZ`)
///
/// Both per-process (`/proc/<pid>/stat`) and system-wide (`/proc/stat`)
/// counters use this unit, so their deltas can be divided directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Ticks(pub u64);

impl Ticks {
    /// Ticks elapsed since `earlier`, or `None` if the counter went backwards
    #[must_use]
    pub fn since(self, earlier: Ticks) -> Option<u64> {
        self.0.checked_sub(earlier.0)
    }
}
