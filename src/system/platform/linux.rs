use std::fs;
use std::io;
use std::time::SystemTime;

use sysinfo::{
    ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, System, ThreadKind, UpdateKind,
};

use super::PlatformSampler;
use crate::error::{CollectorError, Result};
use crate::system::capability::{self, Capability, TaskEnumerator, TaskHandle};
use crate::system::cpu::CpuTicks;
use crate::system::host::HostFacts;
use crate::system::memory::{MemoryUsage, unavailable_memory_kib};
use crate::system::process::{ProcessRecord, command_line_or_name};

pub struct Platform;

impl PlatformSampler for Platform {
    fn host_facts() -> Result<HostFacts> {
        let hz = sysconf(libc::_SC_CLK_TCK, "clock tick rate")?;
        let cpus = sysconf(libc::_SC_NPROCESSORS_ONLN, "cpu count")?;
        let pages = sysconf(libc::_SC_PHYS_PAGES, "physical memory")?;
        let page_size = sysconf(libc::_SC_PAGESIZE, "page size")?;
        Ok(HostFacts::from_raw(hz, cpus as u32, pages * page_size, page_size))
    }

    fn probe_capability() -> bool {
        capability::probe(&ProcTasks)
    }

    fn processes(host: &HostFacts, capability: Capability) -> Result<Vec<ProcessRecord>> {
        // Surface an unreadable /proc instead of an empty snapshot.
        fs::read_dir("/proc").map_err(|e| CollectorError::enumeration("/proc", e))?;

        let sampled_at = SystemTime::now();
        let mut sys = System::new();
        sys.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing()
                .with_cmd(UpdateKind::Always)
                .with_user(UpdateKind::Always)
                .with_memory(),
        );

        let mut records = Vec::with_capacity(sys.processes().len());
        for (pid, process) in sys.processes() {
            // Kernel threads such as kthreadd are processes in their own
            // right; only userland threads of a listed process are skipped.
            if matches!(process.thread_kind(), Some(ThreadKind::Userland)) {
                continue;
            }
            let pid_u32 = pid.as_u32();
            let name = process.name().to_string_lossy().to_string();
            let argv = process
                .cmd()
                .iter()
                .map(|s| s.to_string_lossy().to_string())
                .collect::<Vec<_>>()
                .join(" ");
            let command_line = command_line_or_name(Some(argv), &name);

            let (resident_memory_kib, cpu_time_tenths) = if capability.can_read_process_detail {
                (
                    Some(process.memory() / 1024),
                    read_cpu_ticks(pid_u32).map(|ticks| host.ticks_to_tenths(ticks)),
                )
            } else {
                (None, None)
            };

            records.push(ProcessRecord {
                pid: pid_u32,
                parent_pid: process.parent().map(|p| p.as_u32()).unwrap_or(0),
                real_uid: process.user_id().map(|uid| **uid).unwrap_or(0),
                effective_uid: process.effective_user_id().map(|uid| **uid).unwrap_or(0),
                real_gid: process.group_id().map(|gid| *gid).unwrap_or(0),
                start_time: process.start_time(),
                name,
                command_line,
                is_zombie: process.status() == ProcessStatus::Zombie,
                resident_memory_kib,
                cpu_time_tenths,
                sampled_at,
            });
        }
        Ok(records)
    }

    fn cpu_ticks() -> Result<CpuTicks> {
        let content = fs::read_to_string("/proc/stat")
            .map_err(|e| CollectorError::counter("cpu load", e))?;
        parse_cpu_ticks(&content).ok_or_else(|| {
            CollectorError::counter(
                "cpu load",
                io::Error::new(io::ErrorKind::InvalidData, "no aggregate cpu line in /proc/stat"),
            )
        })
    }

    fn memory(_host: &HostFacts) -> Result<MemoryUsage> {
        let content = fs::read_to_string("/proc/meminfo")
            .map_err(|e| CollectorError::counter("memory usage", e))?;
        parse_meminfo(&content)
    }

    fn load_average() -> Result<[f64; 3]> {
        super::getloadavg().map_err(|e| CollectorError::counter("load average", e))
    }
}

fn sysconf(name: libc::c_int, what: &'static str) -> Result<u64> {
    let value = unsafe { libc::sysconf(name) };
    if value <= 0 {
        return Err(CollectorError::initialization(what, io::Error::last_os_error()));
    }
    Ok(value as u64)
}

/// Pid directories under `/proc`. Mounting with `hidepid` hides pid 1 from
/// unprivileged callers, the Linux analogue of a policy blocking
/// introspection.
struct ProcTasks;

struct ProcTask(u32);

impl TaskHandle for ProcTask {
    fn pid(&self) -> Option<u32> {
        Some(self.0)
    }
}

impl TaskEnumerator for ProcTasks {
    type Task = ProcTask;

    fn tasks(&self) -> io::Result<Vec<ProcTask>> {
        let mut tasks = Vec::new();
        for entry in fs::read_dir("/proc")? {
            let entry = entry?;
            if let Some(pid) = entry.file_name().to_str().and_then(|s| s.parse().ok()) {
                tasks.push(ProcTask(pid));
            }
        }
        Ok(tasks)
    }
}

/// utime + stime from `/proc/<pid>/stat`, in clock ticks.
fn read_cpu_ticks(pid: u32) -> Option<u64> {
    let contents = fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    parse_stat_cpu_ticks(&contents)
}

fn parse_stat_cpu_ticks(contents: &str) -> Option<u64> {
    // comm may contain spaces and parens, so split after the last ')'
    let after_comm = contents.rfind(')')? + 1;
    let fields: Vec<&str> = contents[after_comm..].split_whitespace().collect();
    // state(0) ppid(1) pgrp(2) session(3) tty_nr(4) tpgid(5) flags(6)
    // minflt(7) cminflt(8) majflt(9) cmajflt(10) utime(11) stime(12)
    let utime: u64 = fields.get(11)?.parse().ok()?;
    let stime: u64 = fields.get(12)?.parse().ok()?;
    Some(utime + stime)
}

/// Aggregate `cpu` line of `/proc/stat`.
fn parse_cpu_ticks(content: &str) -> Option<CpuTicks> {
    let line = content.lines().find(|l| l.starts_with("cpu "))?;
    let values: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .map(|v| v.parse::<u64>().ok())
        .collect::<Option<_>>()?;
    if values.len() < 4 {
        return None;
    }
    // guest and guest_nice are already folded into user and nice
    let states = &values[..values.len().min(8)];
    Some(CpuTicks::from_states(
        values[0],
        values[2],
        values.get(4).copied(),
        states,
    ))
}

fn parse_meminfo(content: &str) -> Result<MemoryUsage> {
    let mut total = None;
    let mut available = None;
    let mut swap_total = None;
    let mut swap_free = None;

    for line in content.lines() {
        let mut parts = line.split_whitespace();
        let (Some(key), Some(value)) = (parts.next(), parts.next()) else {
            continue;
        };
        let Ok(kib) = value.parse::<u64>() else {
            continue;
        };
        match key {
            "MemTotal:" => total = Some(kib),
            "MemAvailable:" => available = Some(kib),
            "SwapTotal:" => swap_total = Some(kib),
            "SwapFree:" => swap_free = Some(kib),
            _ => {}
        }
    }

    let missing = |field: &str| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("{field} missing from /proc/meminfo"),
        )
    };
    let (Some(total), Some(available)) = (total, available) else {
        return Err(CollectorError::counter(
            "memory usage",
            missing("MemTotal/MemAvailable"),
        ));
    };
    let (Some(swap_total), Some(swap_free)) = (swap_total, swap_free) else {
        return Err(CollectorError::counter(
            "swap usage",
            missing("SwapTotal/SwapFree"),
        ));
    };

    Ok(MemoryUsage {
        used_memory_kib: unavailable_memory_kib(total, available),
        used_swap_kib: swap_total.saturating_sub(swap_free),
        swap_capacity_kib: swap_total,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_aggregate_cpu_line() {
        let stat = "cpu  100 5 50 800 20 3 2 0 7 0\ncpu0 50 2 25 400 10 1 1 0 0 0\nintr 1\n";
        let ticks = parse_cpu_ticks(stat).unwrap();
        assert_eq!(ticks.user, 100);
        assert_eq!(ticks.system, 50);
        assert_eq!(ticks.wait, Some(20));
        assert_eq!(ticks.total, 100 + 5 + 50 + 800 + 20 + 3 + 2);
    }

    #[test]
    fn missing_cpu_line_is_none() {
        assert!(parse_cpu_ticks("intr 1\nctxt 2\n").is_none());
    }

    #[test]
    fn corrupt_cpu_field_is_none() {
        let stat = "cpu  100 5 x50 800 20 3 2 0 0 0\n";
        assert!(parse_cpu_ticks(stat).is_none());
    }

    #[test]
    fn stat_cpu_ticks_survive_parens_in_comm() {
        let stat = "42 (weird) name) S 1 42 42 0 -1 4194560 100 0 0 0 30 12 0 0 20 0 1 0 100 0 0";
        assert_eq!(parse_stat_cpu_ticks(stat), Some(42));
    }

    #[test]
    fn meminfo_used_and_swap() {
        let meminfo = "MemTotal:       16000 kB\nMemFree:         2000 kB\nMemAvailable:    6000 kB\nSwapTotal:       4096 kB\nSwapFree:        1024 kB\n";
        let usage = parse_meminfo(meminfo).unwrap();
        assert_eq!(usage.used_memory_kib, 10000);
        assert_eq!(usage.used_swap_kib, 3072);
        assert_eq!(usage.swap_capacity_kib, 4096);
    }

    #[test]
    fn meminfo_without_swap_is_counter_unavailable() {
        let meminfo = "MemTotal:       16000 kB\nMemAvailable:    6000 kB\n";
        let err = parse_meminfo(meminfo).unwrap_err();
        assert!(matches!(
            err,
            CollectorError::CounterUnavailable {
                counter: "swap usage",
                ..
            }
        ));
    }

    #[test]
    fn proc_enumeration_sees_this_process() {
        let tasks = ProcTasks.tasks().unwrap();
        let me = std::process::id();
        assert!(tasks.iter().any(|t| t.pid() == Some(me)));
    }

    #[test]
    fn kernel_threads_are_listed() {
        let kthreadd = fs::read_to_string("/proc/2/stat").unwrap_or_default();
        if !kthreadd.contains("(kthreadd)") {
            // Containers without a host kernel thread table.
            return;
        }
        let host = Platform::host_facts().unwrap();
        let records = Platform::processes(&host, Capability::REDUCED).unwrap();
        let pid2 = records.iter().find(|r| r.pid == 2).expect("kthreadd (pid 2) missing");
        assert_eq!(pid2.command_line, "kthreadd");
    }

    #[test]
    fn own_record_carries_credentials_and_command_line() {
        let host = Platform::host_facts().unwrap();
        let records = Platform::processes(&host, Capability::REDUCED).unwrap();
        let own = records
            .iter()
            .find(|r| r.pid == std::process::id())
            .expect("own pid missing");
        assert_eq!(own.real_uid, unsafe { libc::getuid() });
        assert_eq!(own.effective_uid, unsafe { libc::geteuid() });
        assert_eq!(own.real_gid, unsafe { libc::getgid() });
        assert_eq!(own.parent_pid, unsafe { libc::getppid() } as u32);
        assert!(!own.command_line.is_empty());
        assert!(own.start_time > 0);
        assert!(own.resident_memory_kib.is_none());
    }
}
