//! Decides once at startup whether per-process memory and CPU detail can be
//! read on this host.
//!
//! The decision itself is platform independent: enumerate every task through
//! a privileged interface and look for the primordial process. The platform
//! layer only supplies the enumeration and the task handles, which release
//! themselves when dropped.

use serde::Serialize;

/// Pid of the host's primordial process.
pub const PRIMORDIAL_PID: u32 = 1;

/// A task handle obtained from a privileged enumeration.
///
/// Dropping the handle must release the underlying kernel resource.
pub trait TaskHandle {
    /// Pid behind this task, or `None` when it cannot be resolved.
    fn pid(&self) -> Option<u32>;
}

/// Enumerates every task of the default processor set.
pub trait TaskEnumerator {
    type Task: TaskHandle;

    /// `Err` when the privileged enumeration is refused, usually because the
    /// caller is not root.
    fn tasks(&self) -> std::io::Result<Vec<Self::Task>>;
}

/// Whether per-process detail is readable for this daemon's lifetime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Capability {
    pub can_read_process_detail: bool,
}

impl Capability {
    pub const FULL: Capability = Capability {
        can_read_process_detail: true,
    };
    pub const REDUCED: Capability = Capability {
        can_read_process_detail: false,
    };

    pub fn from_flag(can_read_process_detail: bool) -> Self {
        Capability {
            can_read_process_detail,
        }
    }
}

/// Run the probe against an enumerator.
///
/// Every handle returned by the enumeration is dropped before this returns,
/// whichever way the decision goes.
pub fn probe<E: TaskEnumerator>(enumerator: &E) -> bool {
    let tasks = match enumerator.tasks() {
        Ok(tasks) => tasks,
        Err(err) => {
            tracing::info!(
                error = %err,
                "privileged task enumeration unavailable; per-process memory and CPU will not be collected"
            );
            return false;
        }
    };

    let primordial_visible = tasks
        .iter()
        .any(|task| task.pid() == Some(PRIMORDIAL_PID));
    drop(tasks);

    if !primordial_visible {
        tracing::info!(
            "security policy hides pid 1 from task enumeration; per-process memory and CPU will not be collected"
        );
    }
    primordial_visible
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::io;

    struct CountingTask<'a> {
        pid: Option<u32>,
        released: &'a Cell<usize>,
    }

    impl TaskHandle for CountingTask<'_> {
        fn pid(&self) -> Option<u32> {
            self.pid
        }
    }

    impl Drop for CountingTask<'_> {
        fn drop(&mut self) {
            self.released.set(self.released.get() + 1);
        }
    }

    struct FakeHost<'a> {
        pids: Option<Vec<Option<u32>>>,
        acquired: &'a Cell<usize>,
        released: &'a Cell<usize>,
    }

    impl<'a> TaskEnumerator for FakeHost<'a> {
        type Task = CountingTask<'a>;

        fn tasks(&self) -> io::Result<Vec<Self::Task>> {
            let Some(pids) = &self.pids else {
                return Err(io::Error::from(io::ErrorKind::PermissionDenied));
            };
            Ok(pids
                .iter()
                .map(|&pid| {
                    self.acquired.set(self.acquired.get() + 1);
                    CountingTask {
                        pid,
                        released: self.released,
                    }
                })
                .collect())
        }
    }

    fn run(pids: Option<Vec<Option<u32>>>) -> (bool, usize, usize) {
        let acquired = Cell::new(0);
        let released = Cell::new(0);
        let host = FakeHost {
            pids,
            acquired: &acquired,
            released: &released,
        };
        let result = probe(&host);
        (result, acquired.get(), released.get())
    }

    #[test]
    fn refused_enumeration_is_reduced_capability() {
        let (result, acquired, released) = run(None);
        assert!(!result);
        assert_eq!(acquired, 0);
        assert_eq!(released, 0);
    }

    #[test]
    fn missing_pid_one_is_reduced_capability() {
        let (result, acquired, released) = run(Some(vec![Some(0), Some(88), None, Some(412)]));
        assert!(!result);
        assert_eq!(acquired, 4);
        assert_eq!(released, 4);
    }

    #[test]
    fn visible_pid_one_is_full_capability() {
        let (result, acquired, released) = run(Some(vec![Some(0), Some(1), Some(77)]));
        assert!(result);
        assert_eq!(acquired, 3);
        assert_eq!(released, 3);
    }

    #[test]
    fn empty_enumeration_is_reduced_capability() {
        let (result, _, _) = run(Some(Vec::new()));
        assert!(!result);
    }
}
