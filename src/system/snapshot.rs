use serde::Serialize;

use super::cpu::CpuUsage;
use super::memory::MemoryUsage;
use super::process::ProcessSnapshot;

/// Host-wide figures for one cycle.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SystemInfo {
    pub total_memory_kib: u64,
    /// `None` when the memory or swap query failed this cycle.
    pub memory: Option<MemoryUsage>,
    pub cpu: CpuUsage,
    pub load_average: [f64; 3],
}

/// Everything one cycle hands to the rule engine.
#[derive(Clone, Debug, Serialize)]
pub struct SystemSnapshot {
    pub system: SystemInfo,
    pub processes: ProcessSnapshot,
}
