use serde::Serialize;

/// Host memory and swap utilization for one cycle, in KiB.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MemoryUsage {
    pub used_memory_kib: u64,
    pub used_swap_kib: u64,
    pub swap_capacity_kib: u64,
}

/// Wired plus active pages. Cache and inactive pages are not counted as used.
pub fn active_memory_kib(wired_pages: u64, active_pages: u64, page_size_kib: u64) -> u64 {
    (wired_pages + active_pages) * page_size_kib
}

pub fn bytes_to_kib(bytes: u64) -> u64 {
    bytes / 1024
}

/// Used memory from a Linux `/proc/meminfo` style reading, all values in KiB.
pub fn unavailable_memory_kib(total_kib: u64, available_kib: u64) -> u64 {
    total_kib.saturating_sub(available_kib)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wired_and_active_pages_only() {
        assert_eq!(active_memory_kib(100, 50, 4), 600);
        assert_eq!(active_memory_kib(0, 0, 16), 0);
    }

    #[test]
    fn swap_bytes_truncate_to_kib() {
        assert_eq!(bytes_to_kib(1024 * 1024 * 1024), 1024 * 1024);
        assert_eq!(bytes_to_kib(1023), 0);
    }

    #[test]
    fn available_above_total_does_not_underflow() {
        assert_eq!(unavailable_memory_kib(1000, 400), 600);
        assert_eq!(unavailable_memory_kib(1000, 1200), 0);
    }
}
