use std::io;

use super::PlatformSampler;
use crate::error::{CollectorError, Result};
use crate::system::capability::Capability;
use crate::system::cpu::CpuTicks;
use crate::system::host::HostFacts;
use crate::system::memory::MemoryUsage;
use crate::system::process::ProcessRecord;

pub struct Platform;

fn unsupported() -> io::Error {
    io::Error::new(
        io::ErrorKind::Unsupported,
        "no native sampler for this operating system",
    )
}

impl PlatformSampler for Platform {
    fn host_facts() -> Result<HostFacts> {
        Err(CollectorError::initialization("facts", unsupported()))
    }

    fn probe_capability() -> bool {
        false
    }

    fn processes(_host: &HostFacts, _capability: Capability) -> Result<Vec<ProcessRecord>> {
        Err(CollectorError::enumeration("process table", unsupported()))
    }

    fn cpu_ticks() -> Result<CpuTicks> {
        Err(CollectorError::counter("cpu load", unsupported()))
    }

    fn memory(_host: &HostFacts) -> Result<MemoryUsage> {
        Err(CollectorError::counter("memory usage", unsupported()))
    }

    fn load_average() -> Result<[f64; 3]> {
        Err(CollectorError::counter("load average", unsupported()))
    }
}
