use std::ffi::{c_int, c_uint, c_void};
use std::io;
use std::mem;
use std::ptr;
use std::time::SystemTime;

use super::PlatformSampler;
use super::kinfo::KinfoProc;
use super::mach::{
    self, HostCpuLoadInfo, KERN_SUCCESS, MachTaskBasicInfo, Port, ThreadBasicInfo, VmArray,
    VmStatistics, kern_error,
};
use crate::error::{CollectorError, Result};
use crate::system::capability::{self, Capability, TaskEnumerator, TaskHandle};
use crate::system::cpu::CpuTicks;
use crate::system::host::HostFacts;
use crate::system::memory::{MemoryUsage, active_memory_kib, bytes_to_kib};
use crate::system::process::{
    ProcessRecord, command_line_from_args_blob, command_line_or_name, tenths_of_second,
};

const CTL_KERN: c_int = 1;
const CTL_VM: c_int = 2;
const CTL_HW: c_int = 6;
const KERN_ARGMAX: c_int = 8;
const KERN_PROC: c_int = 14;
const KERN_CLOCKRATE: c_int = 12;
const KERN_PROCARGS2: c_int = 49;
const KERN_PROC_ALL: c_int = 0;
const HW_NCPU: c_int = 3;
const HW_PAGESIZE: c_int = 7;
const HW_MEMSIZE: c_int = 24;
const VM_SWAPUSAGE: c_int = 5;

/// `p_stat` of a terminated process not yet reaped by its parent.
const SZOMB: libc::c_char = 5;

/// Extra control blocks allowed for processes spawned between the size query
/// and the fill.
const PROC_SLACK: usize = 16;
const PROC_LIST_ATTEMPTS: usize = 4;

#[repr(C)]
#[derive(Clone, Copy, Default)]
struct ClockInfo {
    hz: c_int,
    tick: c_int,
    tickadj: c_int,
    stathz: c_int,
    profhz: c_int,
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
struct XswUsage {
    xsu_total: u64,
    xsu_avail: u64,
    xsu_used: u64,
    xsu_pagesize: u32,
    xsu_encrypted: u32,
}

pub struct Platform;

impl PlatformSampler for Platform {
    fn host_facts() -> Result<HostFacts> {
        let clock: ClockInfo = sysctl_value(&mut [CTL_KERN, KERN_CLOCKRATE])
            .map_err(|e| CollectorError::initialization("clock rate", e))?;
        let cpus: c_int = sysctl_value(&mut [CTL_HW, HW_NCPU])
            .map_err(|e| CollectorError::initialization("cpu count", e))?;
        let memsize: u64 = sysctl_value(&mut [CTL_HW, HW_MEMSIZE])
            .map_err(|e| CollectorError::initialization("physical memory", e))?;
        let page_size: c_int = sysctl_value(&mut [CTL_HW, HW_PAGESIZE])
            .map_err(|e| CollectorError::initialization("page size", e))?;
        Ok(HostFacts::from_raw(
            positive(clock.hz.into(), "clock rate")?,
            positive(cpus.into(), "cpu count")? as u32,
            positive(memsize as i64, "physical memory")?,
            positive(page_size.into(), "page size")?,
        ))
    }

    fn probe_capability() -> bool {
        // Without root, or with System Integrity Protection enabled,
        // task_for_pid is refused for other processes.
        capability::probe(&DefaultProcessorSet)
    }

    fn processes(_host: &HostFacts, capability: Capability) -> Result<Vec<ProcessRecord>> {
        let procs = kinfo_procs().map_err(|e| CollectorError::enumeration("kern.proc.all", e))?;
        let argmax: c_int = sysctl_value(&mut [CTL_KERN, KERN_ARGMAX])
            .map_err(|e| CollectorError::enumeration("kern.argmax", e))?;
        let mut args = vec![0u8; argmax.max(0) as usize + 1];
        let sampled_at = SystemTime::now();

        let mut records = Vec::with_capacity(procs.len());
        for kp in &procs {
            let pid = kp.kp_proc.p_pid;
            let name = comm_to_string(&kp.kp_proc.p_comm);
            let command_line = command_line_or_name(
                args_blob(pid, &mut args).and_then(command_line_from_args_blob),
                &name,
            );

            let (resident_memory_kib, cpu_time_tenths) = if capability.can_read_process_detail {
                task_detail(pid)
            } else {
                (None, None)
            };

            records.push(ProcessRecord {
                pid: pid.max(0) as u32,
                parent_pid: kp.kp_eproc.e_ppid.max(0) as u32,
                real_uid: kp.kp_eproc.e_pcred.p_ruid,
                effective_uid: kp.kp_eproc.e_ucred.cr_uid,
                real_gid: kp.kp_eproc.e_pcred.p_rgid,
                start_time: kp.kp_proc.p_starttime.tv_sec.max(0) as u64,
                name,
                command_line,
                is_zombie: kp.kp_proc.p_stat == SZOMB,
                resident_memory_kib,
                cpu_time_tenths,
                sampled_at,
            });
        }
        Ok(records)
    }

    fn cpu_ticks() -> Result<CpuTicks> {
        let host = Port::new(unsafe { mach::mach_host_self() });
        let mut info = HostCpuLoadInfo::default();
        let mut count = HostCpuLoadInfo::COUNT;
        let kr = unsafe {
            mach::host_statistics(
                host.raw(),
                mach::HOST_CPU_LOAD_INFO,
                (&mut info as *mut HostCpuLoadInfo).cast(),
                &mut count,
            )
        };
        if kr != KERN_SUCCESS {
            return Err(CollectorError::counter(
                "cpu load",
                kern_error("host_statistics(HOST_CPU_LOAD_INFO)", kr),
            ));
        }
        let all: Vec<u64> = info.cpu_ticks.iter().map(|&t| t as u64).collect();
        Ok(CpuTicks::from_states(
            info.cpu_ticks[mach::CPU_STATE_USER] as u64,
            info.cpu_ticks[mach::CPU_STATE_SYSTEM] as u64,
            None,
            &all,
        ))
    }

    fn memory(host: &HostFacts) -> Result<MemoryUsage> {
        let port = Port::new(unsafe { mach::mach_host_self() });
        let mut vm = VmStatistics::default();
        let mut count = VmStatistics::COUNT;
        let kr = unsafe {
            mach::host_statistics(
                port.raw(),
                mach::HOST_VM_INFO,
                (&mut vm as *mut VmStatistics).cast(),
                &mut count,
            )
        };
        if kr != KERN_SUCCESS {
            return Err(CollectorError::counter(
                "memory usage",
                kern_error("host_statistics(HOST_VM_INFO)", kr),
            ));
        }
        let used_memory_kib = active_memory_kib(
            vm.wire_count as u64,
            vm.active_count as u64,
            host.page_size_kib,
        );

        let swap: XswUsage = sysctl_value(&mut [CTL_VM, VM_SWAPUSAGE])
            .map_err(|e| CollectorError::counter("swap usage", e))?;

        Ok(MemoryUsage {
            used_memory_kib,
            used_swap_kib: bytes_to_kib(swap.xsu_used),
            swap_capacity_kib: bytes_to_kib(swap.xsu_total),
        })
    }

    fn load_average() -> Result<[f64; 3]> {
        super::getloadavg().map_err(|e| CollectorError::counter("load average", e))
    }
}

/// Host facts must be positive; a zero reading means the query is unusable.
fn positive(value: i64, what: &'static str) -> Result<u64> {
    if value <= 0 {
        return Err(CollectorError::initialization(
            what,
            io::Error::new(io::ErrorKind::InvalidData, format!("kernel reported {value}")),
        ));
    }
    Ok(value as u64)
}

/// Read a fixed-size value with `sysctl(3)`.
fn sysctl_value<T: Copy + Default>(mib: &mut [c_int]) -> io::Result<T> {
    let mut value = T::default();
    let mut len = mem::size_of::<T>();
    let rc = unsafe {
        libc::sysctl(
            mib.as_mut_ptr(),
            mib.len() as c_uint,
            (&mut value as *mut T).cast::<c_void>(),
            &mut len,
            ptr::null_mut(),
            0,
        )
    };
    if rc == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(value)
}

/// Every process control block, sized with a fresh capacity query on each
/// attempt. The table can grow between the query and the fill, in which case
/// the kernel reports `ENOMEM` and the size is queried again.
fn kinfo_procs() -> io::Result<Vec<KinfoProc>> {
    let mut mib = [CTL_KERN, KERN_PROC, KERN_PROC_ALL, 0];
    let entry = mem::size_of::<KinfoProc>();

    for _ in 0..PROC_LIST_ATTEMPTS {
        let mut size = 0usize;
        let rc = unsafe {
            libc::sysctl(
                mib.as_mut_ptr(),
                mib.len() as c_uint,
                ptr::null_mut(),
                &mut size,
                ptr::null_mut(),
                0,
            )
        };
        if rc == -1 {
            return Err(io::Error::last_os_error());
        }

        let capacity = size / entry + PROC_SLACK;
        let mut procs: Vec<KinfoProc> = Vec::with_capacity(capacity);
        let mut len = capacity * entry;
        let rc = unsafe {
            libc::sysctl(
                mib.as_mut_ptr(),
                mib.len() as c_uint,
                procs.as_mut_ptr().cast::<c_void>(),
                &mut len,
                ptr::null_mut(),
                0,
            )
        };
        if rc == 0 {
            // SAFETY: the kernel wrote `len` bytes of whole kinfo_proc entries.
            unsafe { procs.set_len((len / entry).min(capacity)) };
            return Ok(procs);
        }
        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ENOMEM) {
            return Err(err);
        }
        tracing::debug!("process table grew during enumeration, retrying");
    }
    Err(io::Error::other("process table kept growing during enumeration"))
}

/// Fill `buf` with the argument blob of `pid`.
///
/// The fill length is reset to the buffer size for every pid since the
/// kernel shrinks it to the bytes written.
fn args_blob(pid: libc::pid_t, buf: &mut [u8]) -> Option<&[u8]> {
    let mut mib = [CTL_KERN, KERN_PROCARGS2, pid];
    let mut len = buf.len();
    let rc = unsafe {
        libc::sysctl(
            mib.as_mut_ptr(),
            mib.len() as c_uint,
            buf.as_mut_ptr().cast::<c_void>(),
            &mut len,
            ptr::null_mut(),
            0,
        )
    };
    if rc == -1 {
        tracing::trace!(pid, "argument blob unavailable, using process name");
        return None;
    }
    Some(&buf[..len.min(buf.len())])
}

fn comm_to_string(comm: &[libc::c_char]) -> String {
    let bytes: Vec<u8> = comm
        .iter()
        .take_while(|&&c| c != 0)
        .map(|&c| c as u8)
        .collect();
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Resident size and cumulative CPU time of one task.
///
/// Thread times are added to the task's own figure because the task-level
/// counter only covers terminated threads. Every port and the thread array
/// are released before returning.
fn task_detail(pid: libc::pid_t) -> (Option<u64>, Option<u64>) {
    let Some(task) = Port::task_for_pid(pid) else {
        return (None, None);
    };

    let mut resident_kib = None;
    let mut cpu_tenths = None;

    let mut info = MachTaskBasicInfo::default();
    let mut count = MachTaskBasicInfo::COUNT;
    let kr = unsafe {
        mach::task_info(
            task.raw(),
            mach::MACH_TASK_BASIC_INFO,
            (&mut info as *mut MachTaskBasicInfo).cast(),
            &mut count,
        )
    };
    if kr == KERN_SUCCESS {
        let resident = info.resident_size;
        let user = info.user_time;
        let system = info.system_time;
        resident_kib = Some(bytes_to_kib(resident));
        cpu_tenths = Some(tenths_of_second(
            user.seconds as i64 + system.seconds as i64,
            user.microseconds as i64 + system.microseconds as i64,
        ));
    }

    if let Some(threads) = task_threads(&task) {
        for thread in &threads {
            let mut info = ThreadBasicInfo::default();
            let mut count = ThreadBasicInfo::COUNT;
            let kr = unsafe {
                mach::thread_info(
                    thread.raw(),
                    mach::THREAD_BASIC_INFO,
                    (&mut info as *mut ThreadBasicInfo).cast(),
                    &mut count,
                )
            };
            if kr != KERN_SUCCESS || info.flags & mach::TH_FLAGS_IDLE != 0 {
                continue;
            }
            let own = tenths_of_second(
                info.user_time.seconds as i64 + info.system_time.seconds as i64,
                info.user_time.microseconds as i64 + info.system_time.microseconds as i64,
            );
            cpu_tenths = Some(cpu_tenths.unwrap_or(0) + own);
        }
    }

    (resident_kib, cpu_tenths)
}

/// Thread ports of a task. The kernel-allocated array is released here; the
/// ports are released as the returned guards drop.
fn task_threads(task: &Port) -> Option<Vec<Port>> {
    let mut list: *mut mach::mach_port_t = ptr::null_mut();
    let mut count: mach::mach_msg_type_number_t = 0;
    let kr = unsafe { mach::task_threads(task.raw(), &mut list, &mut count) };
    if kr != KERN_SUCCESS {
        return None;
    }
    let array = VmArray::new(list, count as usize);
    Some(array.iter().map(|&port| Port::new(port)).collect())
}

/// Privileged enumeration of the default processor set's tasks.
struct DefaultProcessorSet;

struct MachTask(Port);

impl TaskHandle for MachTask {
    fn pid(&self) -> Option<u32> {
        let mut pid: c_int = -1;
        let kr = unsafe { mach::pid_for_task(self.0.raw(), &mut pid) };
        (kr == KERN_SUCCESS && pid >= 0).then_some(pid as u32)
    }
}

impl TaskEnumerator for DefaultProcessorSet {
    type Task = MachTask;

    fn tasks(&self) -> io::Result<Vec<MachTask>> {
        let host = Port::new(unsafe { mach::mach_host_self() });

        let mut name: mach::mach_port_t = 0;
        let kr = unsafe { mach::processor_set_default(host.raw(), &mut name) };
        if kr != KERN_SUCCESS {
            return Err(kern_error("processor_set_default", kr));
        }
        let name = Port::new(name);

        let mut control: mach::mach_port_t = 0;
        let kr = unsafe { mach::host_processor_set_priv(host.raw(), name.raw(), &mut control) };
        if kr != KERN_SUCCESS {
            return Err(kern_error("host_processor_set_priv", kr));
        }
        let control = Port::new(control);

        let mut list: *mut mach::mach_port_t = ptr::null_mut();
        let mut count: mach::mach_msg_type_number_t = 0;
        let kr = unsafe { mach::processor_set_tasks(control.raw(), &mut list, &mut count) };
        if kr != KERN_SUCCESS {
            return Err(kern_error("processor_set_tasks", kr));
        }
        let array = VmArray::new(list, count as usize);
        Ok(array
            .iter()
            .map(|&port| MachTask(Port::new(port)))
            .collect())
    }
}
