use serde::Serialize;

/// Static host facts read once at startup.
///
/// Memory and page size are stored in KiB so every later sampler shares
/// one unit system.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct HostFacts {
    pub clock_ticks_per_second: u64,
    pub cpu_count: u32,
    pub total_memory_kib: u64,
    pub page_size_kib: u64,
}

impl HostFacts {
    pub fn from_raw(
        clock_ticks_per_second: u64,
        cpu_count: u32,
        total_memory_bytes: u64,
        page_size_bytes: u64,
    ) -> Self {
        HostFacts {
            clock_ticks_per_second,
            cpu_count,
            total_memory_kib: total_memory_bytes / 1024,
            page_size_kib: page_size_bytes / 1024,
        }
    }

    /// Convert a kernel tick count into tenths of a second.
    pub fn ticks_to_tenths(&self, ticks: u64) -> u64 {
        if self.clock_ticks_per_second == 0 {
            return 0;
        }
        ticks * 10 / self.clock_ticks_per_second
    }
}
