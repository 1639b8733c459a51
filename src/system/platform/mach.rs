//! Mach kernel interfaces used by the macOS sampler, with guards that
//! release ports and kernel-allocated arrays on drop.

#![allow(non_camel_case_types)]

use std::ffi::c_int;
use std::io;
use std::mem;

pub type kern_return_t = c_int;
pub type natural_t = u32;
pub type integer_t = c_int;
pub type mach_port_t = natural_t;
pub type mach_msg_type_number_t = natural_t;
pub type vm_address_t = usize;
pub type vm_size_t = usize;

pub const KERN_SUCCESS: kern_return_t = 0;
pub const MACH_PORT_NULL: mach_port_t = 0;

pub const HOST_VM_INFO: c_int = 2;
pub const HOST_CPU_LOAD_INFO: c_int = 3;
pub const MACH_TASK_BASIC_INFO: natural_t = 20;
pub const THREAD_BASIC_INFO: natural_t = 3;
pub const TH_FLAGS_IDLE: integer_t = 0x2;

pub const CPU_STATE_USER: usize = 0;
pub const CPU_STATE_SYSTEM: usize = 1;
pub const CPU_STATE_MAX: usize = 4;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct TimeValue {
    pub seconds: integer_t,
    pub microseconds: integer_t,
}

#[repr(C, packed(4))]
#[derive(Clone, Copy, Default)]
pub struct MachTaskBasicInfo {
    pub virtual_size: u64,
    pub resident_size: u64,
    pub resident_size_max: u64,
    pub user_time: TimeValue,
    pub system_time: TimeValue,
    pub policy: integer_t,
    pub suspend_count: integer_t,
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct ThreadBasicInfo {
    pub user_time: TimeValue,
    pub system_time: TimeValue,
    pub cpu_usage: integer_t,
    pub policy: integer_t,
    pub run_state: integer_t,
    pub flags: integer_t,
    pub suspend_count: integer_t,
    pub sleep_time: integer_t,
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct HostCpuLoadInfo {
    pub cpu_ticks: [natural_t; CPU_STATE_MAX],
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct VmStatistics {
    pub free_count: natural_t,
    pub active_count: natural_t,
    pub inactive_count: natural_t,
    pub wire_count: natural_t,
    pub zero_fill_count: natural_t,
    pub reactivations: natural_t,
    pub pageins: natural_t,
    pub pageouts: natural_t,
    pub faults: natural_t,
    pub cow_faults: natural_t,
    pub lookups: natural_t,
    pub hits: natural_t,
    pub purgeable_count: natural_t,
    pub purges: natural_t,
    pub speculative_count: natural_t,
}

/// Size of an info struct in `integer_t` units, as the kernel expects.
const fn info_count<T>() -> mach_msg_type_number_t {
    (mem::size_of::<T>() / mem::size_of::<integer_t>()) as mach_msg_type_number_t
}

impl MachTaskBasicInfo {
    pub const COUNT: mach_msg_type_number_t = info_count::<Self>();
}

impl ThreadBasicInfo {
    pub const COUNT: mach_msg_type_number_t = info_count::<Self>();
}

impl HostCpuLoadInfo {
    pub const COUNT: mach_msg_type_number_t = info_count::<Self>();
}

impl VmStatistics {
    pub const COUNT: mach_msg_type_number_t = info_count::<Self>();
}

unsafe extern "C" {
    static mach_task_self_: mach_port_t;

    pub fn mach_host_self() -> mach_port_t;
    pub fn mach_port_deallocate(task: mach_port_t, name: mach_port_t) -> kern_return_t;
    pub fn vm_deallocate(
        target_task: mach_port_t,
        address: vm_address_t,
        size: vm_size_t,
    ) -> kern_return_t;

    pub fn processor_set_default(host: mach_port_t, default_set: *mut mach_port_t)
    -> kern_return_t;
    pub fn host_processor_set_priv(
        host_priv: mach_port_t,
        set_name: mach_port_t,
        set: *mut mach_port_t,
    ) -> kern_return_t;
    pub fn processor_set_tasks(
        processor_set: mach_port_t,
        task_list: *mut *mut mach_port_t,
        task_count: *mut mach_msg_type_number_t,
    ) -> kern_return_t;

    pub fn pid_for_task(task: mach_port_t, pid: *mut c_int) -> kern_return_t;
    pub fn task_for_pid(target: mach_port_t, pid: c_int, task: *mut mach_port_t)
    -> kern_return_t;
    pub fn task_info(
        task: mach_port_t,
        flavor: natural_t,
        info: *mut integer_t,
        count: *mut mach_msg_type_number_t,
    ) -> kern_return_t;
    pub fn task_threads(
        task: mach_port_t,
        threads: *mut *mut mach_port_t,
        count: *mut mach_msg_type_number_t,
    ) -> kern_return_t;
    pub fn thread_info(
        thread: mach_port_t,
        flavor: natural_t,
        info: *mut integer_t,
        count: *mut mach_msg_type_number_t,
    ) -> kern_return_t;

    pub fn host_statistics(
        host: mach_port_t,
        flavor: c_int,
        info: *mut integer_t,
        count: *mut mach_msg_type_number_t,
    ) -> kern_return_t;
}

pub fn mach_task_self() -> mach_port_t {
    unsafe { mach_task_self_ }
}

pub fn kern_error(call: &str, kr: kern_return_t) -> io::Error {
    io::Error::other(format!("{call} failed with kern_return_t {kr}"))
}

/// A port right owned by this process, deallocated exactly once on drop.
pub struct Port(mach_port_t);

impl Port {
    pub fn new(name: mach_port_t) -> Self {
        Port(name)
    }

    pub fn raw(&self) -> mach_port_t {
        self.0
    }

    /// `None` when the kernel refuses the task port: privileged, exited or
    /// kernel-owned processes.
    pub fn task_for_pid(pid: c_int) -> Option<Port> {
        let mut task: mach_port_t = MACH_PORT_NULL;
        let kr = unsafe { task_for_pid(mach_task_self(), pid, &mut task) };
        (kr == KERN_SUCCESS && task != MACH_PORT_NULL).then(|| Port(task))
    }
}

impl Drop for Port {
    fn drop(&mut self) {
        if self.0 != MACH_PORT_NULL {
            unsafe {
                mach_port_deallocate(mach_task_self(), self.0);
            }
        }
    }
}

/// An out-of-line array the kernel allocated in our address space.
pub struct VmArray<T> {
    ptr: *mut T,
    len: usize,
}

impl<T> VmArray<T> {
    pub fn new(ptr: *mut T, len: usize) -> Self {
        VmArray { ptr, len }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        if self.ptr.is_null() {
            return [].iter();
        }
        // SAFETY: the kernel handed us `len` initialized elements at `ptr`.
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }.iter()
    }
}

impl<T> Drop for VmArray<T> {
    fn drop(&mut self) {
        if self.ptr.is_null() {
            return;
        }
        unsafe {
            vm_deallocate(
                mach_task_self(),
                self.ptr as vm_address_t,
                self.len * mem::size_of::<T>(),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn info_counts_match_kernel_headers() {
        assert_eq!(MachTaskBasicInfo::COUNT, 12);
        assert_eq!(ThreadBasicInfo::COUNT, 10);
        assert_eq!(HostCpuLoadInfo::COUNT, 4);
        assert_eq!(VmStatistics::COUNT, 15);
    }

    #[test]
    fn own_task_port_is_available() {
        let task = Port::task_for_pid(std::process::id() as c_int);
        assert!(task.is_some());
    }
}
