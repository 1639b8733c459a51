use serde::Serialize;

/// Reported for both percentages while no interval has been measured yet.
pub const NOT_YET_AVAILABLE: i32 = -10;

/// Raw host-wide cumulative CPU tick counters.
///
/// `total` is the sum over every CPU state the kernel reports, not just the
/// three named ones.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CpuTicks {
    pub user: u64,
    pub system: u64,
    pub wait: Option<u64>,
    pub total: u64,
}

impl CpuTicks {
    pub fn from_states(user: u64, system: u64, wait: Option<u64>, all_states: &[u64]) -> Self {
        CpuTicks {
            user,
            system,
            wait,
            total: all_states.iter().sum(),
        }
    }
}

/// Host CPU utilization over one interval, in permille.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct CpuUsage {
    pub user_permille: i32,
    pub system_permille: i32,
    pub wait_permille: i32,
}

impl CpuUsage {
    pub fn not_yet_available() -> Self {
        CpuUsage {
            user_permille: NOT_YET_AVAILABLE,
            system_permille: NOT_YET_AVAILABLE,
            wait_permille: 0,
        }
    }

    pub fn is_available(&self) -> bool {
        self.user_permille != NOT_YET_AVAILABLE
    }
}

/// Counters from the previous cycle. The only state carried between cycles.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CpuCounterState {
    previous: Option<CpuTicks>,
}

impl CpuCounterState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_previous(previous: CpuTicks) -> Self {
        CpuCounterState {
            previous: Some(previous),
        }
    }

    pub fn previous(&self) -> Option<CpuTicks> {
        self.previous
    }

    /// Turn the latest raw counters into usage since the previous call.
    ///
    /// The stored counters are replaced on every path, so a sentinel result
    /// still starts a fresh interval for the next cycle.
    pub fn advance(&mut self, current: CpuTicks) -> CpuUsage {
        let usage = match self.previous {
            Some(previous) => delta(&previous, &current),
            None => CpuUsage::not_yet_available(),
        };
        self.previous = Some(current);
        usage
    }
}

fn delta(previous: &CpuTicks, current: &CpuTicks) -> CpuUsage {
    let total = current.total as i128 - previous.total as i128;
    if total <= 0 {
        return CpuUsage::not_yet_available();
    }
    let permille = |now: u64, before: u64| -> i32 {
        (1000 * (now as i128 - before as i128) / total) as i32
    };
    let wait_permille = match (current.wait, previous.wait) {
        (Some(now), Some(before)) => permille(now, before),
        _ => 0,
    };
    CpuUsage {
        user_permille: permille(current.user, previous.user),
        system_permille: permille(current.system, previous.system),
        wait_permille,
    }
}
