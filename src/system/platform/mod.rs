use crate::error::Result;
use crate::system::capability::Capability;
use crate::system::cpu::CpuTicks;
use crate::system::host::HostFacts;
use crate::system::memory::MemoryUsage;
use crate::system::process::ProcessRecord;

/// Native telemetry each platform provides behind the same contract.
pub trait PlatformSampler {
    /// Clock rate, CPU count, physical memory and page size, in that order.
    fn host_facts() -> Result<HostFacts>;
    fn probe_capability() -> bool;
    /// Every visible process, in kernel enumeration order.
    fn processes(host: &HostFacts, capability: Capability) -> Result<Vec<ProcessRecord>>;
    fn cpu_ticks() -> Result<CpuTicks>;
    fn memory(host: &HostFacts) -> Result<MemoryUsage>;
    fn load_average() -> Result<[f64; 3]>;
}

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "macos")]
mod kinfo;
#[cfg(target_os = "macos")]
mod mach;
#[cfg(target_os = "macos")]
mod macos;
#[cfg(not(any(target_os = "linux", target_os = "macos")))]
mod unsupported;

#[cfg(target_os = "linux")]
use linux as platform_impl;
#[cfg(target_os = "macos")]
use macos as platform_impl;
#[cfg(not(any(target_os = "linux", target_os = "macos")))]
use unsupported as platform_impl;

pub fn host_facts() -> Result<HostFacts> {
    <platform_impl::Platform as PlatformSampler>::host_facts()
}

pub fn probe_capability() -> bool {
    <platform_impl::Platform as PlatformSampler>::probe_capability()
}

pub fn processes(host: &HostFacts, capability: Capability) -> Result<Vec<ProcessRecord>> {
    <platform_impl::Platform as PlatformSampler>::processes(host, capability)
}

pub fn cpu_ticks() -> Result<CpuTicks> {
    <platform_impl::Platform as PlatformSampler>::cpu_ticks()
}

pub fn memory(host: &HostFacts) -> Result<MemoryUsage> {
    <platform_impl::Platform as PlatformSampler>::memory(host)
}

pub fn load_average() -> Result<[f64; 3]> {
    <platform_impl::Platform as PlatformSampler>::load_average()
}

#[cfg(unix)]
fn getloadavg() -> std::io::Result<[f64; 3]> {
    let mut loads = [0.0f64; 3];
    let n = unsafe { libc::getloadavg(loads.as_mut_ptr(), 3) };
    if n < 0 {
        return Err(std::io::Error::other("getloadavg returned no samples"));
    }
    Ok(loads)
}
