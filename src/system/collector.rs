use super::capability::Capability;
use super::cpu::{CpuCounterState, CpuUsage};
use super::host::HostFacts;
use super::memory::MemoryUsage;
use super::platform;
use super::process::ProcessSnapshot;
use super::snapshot::{SystemInfo, SystemSnapshot};
use crate::config::ProcessDetail;
use crate::error::Result;

/// Read the static host facts. Fails with `Initialization`, in which case
/// monitoring must not start.
pub fn init_host_facts() -> Result<HostFacts> {
    let host = platform::host_facts()?;
    tracing::debug!(
        hz = host.clock_ticks_per_second,
        cpus = host.cpu_count,
        total_memory_kib = host.total_memory_kib,
        page_size_kib = host.page_size_kib,
        "host facts"
    );
    Ok(host)
}

pub fn probe_capability() -> Capability {
    Capability::from_flag(platform::probe_capability())
}

/// One fresh snapshot of every visible process.
pub fn build_snapshot(host: &HostFacts, capability: Capability) -> Result<ProcessSnapshot> {
    #[cfg(feature = "perf-tracing")]
    let _snapshot_span = tracing::debug_span!("collector.build_snapshot").entered();

    let records = platform::processes(host, capability)?;
    Ok(ProcessSnapshot::from_records(records))
}

/// Host CPU usage since the previous call on the same state.
///
/// On error the state is left untouched, so the next successful call
/// measures across the gap.
pub fn sample_cpu(state: &mut CpuCounterState) -> Result<CpuUsage> {
    let ticks = platform::cpu_ticks()?;
    Ok(state.advance(ticks))
}

pub fn sample_memory(host: &HostFacts) -> Result<MemoryUsage> {
    platform::memory(host)
}

pub fn sample_load_average() -> Result<[f64; 3]> {
    platform::load_average()
}

/// Owns everything that outlives a single cycle: the host facts and the
/// capability decided at startup, and the CPU counters of the last cycle.
pub struct Collector {
    host: HostFacts,
    capability: Capability,
    cpu: CpuCounterState,
}

impl Collector {
    pub fn new(detail: ProcessDetail) -> Result<Self> {
        let host = init_host_facts()?;
        let capability = match detail {
            ProcessDetail::Auto => probe_capability(),
            ProcessDetail::Off => {
                tracing::info!("per-process detail disabled by configuration");
                Capability::REDUCED
            }
        };
        Ok(Collector {
            host,
            capability,
            cpu: CpuCounterState::new(),
        })
    }

    pub fn host(&self) -> &HostFacts {
        &self.host
    }

    pub fn capability(&self) -> Capability {
        self.capability
    }

    /// Run one cycle.
    ///
    /// An `Enumeration` error means the cycle should be skipped. Counter
    /// failures only degrade their own figures.
    pub fn sample(&mut self) -> Result<SystemSnapshot> {
        #[cfg(feature = "perf-tracing")]
        let _sample_span = tracing::debug_span!("collector.sample").entered();

        let processes = match build_snapshot(&self.host, self.capability) {
            Ok(processes) => processes,
            Err(e) => {
                tracing::warn!(error = %e, "process enumeration failed, skipping cycle");
                return Err(e);
            }
        };

        let cpu = sample_cpu(&mut self.cpu).unwrap_or_else(|e| {
            tracing::debug!(error = %e, "cpu counters unavailable");
            CpuUsage::not_yet_available()
        });
        let memory = sample_memory(&self.host)
            .inspect_err(|e| tracing::debug!(error = %e, "dropping memory figures this cycle"))
            .ok();
        let load_average = sample_load_average().unwrap_or_else(|e| {
            tracing::debug!(error = %e, "load average unavailable");
            [0.0; 3]
        });

        Ok(SystemSnapshot {
            system: SystemInfo {
                total_memory_kib: self.host.total_memory_kib,
                memory,
                cpu,
                load_average,
            },
            processes,
        })
    }
}
