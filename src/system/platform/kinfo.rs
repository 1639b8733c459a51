//! Process control block returned by `sysctl(KERN_PROC_ALL)`, laid out as in
//! `<sys/sysctl.h>` and `<sys/proc.h>` for 64-bit Darwin.

#![allow(dead_code)]

use std::ffi::{c_char, c_int, c_short, c_uint, c_ushort, c_void};

pub const MAXCOMLEN: usize = 16;
const NGROUPS: usize = 16;
const WMESGLEN: usize = 7;
const COMAPT_MAXLOGNAME: usize = 12;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct Timeval {
    pub tv_sec: i64,
    pub tv_usec: i32,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct Itimerval {
    pub it_interval: Timeval,
    pub it_value: Timeval,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct ExternProc {
    /// Union with the run-queue links; only the start time is meaningful in
    /// a sysctl copy.
    pub p_starttime: Timeval,
    pub p_vmspace: *mut c_void,
    pub p_sigacts: *mut c_void,
    pub p_flag: c_int,
    pub p_stat: c_char,
    pub p_pid: c_int,
    pub p_oppid: c_int,
    pub p_dupfd: c_int,
    pub user_stack: *mut c_char,
    pub exit_thread: *mut c_void,
    pub p_debugger: c_int,
    pub sigwait: c_int,
    pub p_estcpu: c_uint,
    pub p_cpticks: c_int,
    pub p_pctcpu: u32,
    pub p_wchan: *mut c_void,
    pub p_wmesg: *mut c_char,
    pub p_swtime: c_uint,
    pub p_slptime: c_uint,
    pub p_realtimer: Itimerval,
    pub p_rtime: Timeval,
    pub p_uticks: u64,
    pub p_sticks: u64,
    pub p_iticks: u64,
    pub p_traceflag: c_int,
    pub p_tracep: *mut c_void,
    pub p_siglist: c_int,
    pub p_textvp: *mut c_void,
    pub p_holdcnt: c_int,
    pub p_sigmask: u32,
    pub p_sigignore: u32,
    pub p_sigcatch: u32,
    pub p_priority: u8,
    pub p_usrpri: u8,
    pub p_nice: c_char,
    pub p_comm: [c_char; MAXCOMLEN + 1],
    pub p_pgrp: *mut c_void,
    pub p_addr: *mut c_void,
    pub p_xstat: c_ushort,
    pub p_acflag: c_ushort,
    pub p_ru: *mut c_void,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct Pcred {
    pub pc_lock: [c_char; 72],
    pub pc_ucred: *mut c_void,
    pub p_ruid: u32,
    pub p_svuid: u32,
    pub p_rgid: u32,
    pub p_svgid: u32,
    pub p_refcnt: c_int,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct Ucred {
    pub cr_ref: i32,
    pub cr_uid: u32,
    pub cr_ngroups: c_short,
    pub cr_groups: [u32; NGROUPS],
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct Vmspace {
    pub dummy: i32,
    pub dummy2: *mut c_char,
    pub dummy3: [i32; 5],
    pub dummy4: [*mut c_char; 3],
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct Eproc {
    pub e_paddr: *mut c_void,
    pub e_sess: *mut c_void,
    pub e_pcred: Pcred,
    pub e_ucred: Ucred,
    pub e_vm: Vmspace,
    pub e_ppid: c_int,
    pub e_pgid: c_int,
    pub e_jobc: c_short,
    pub e_tdev: i32,
    pub e_tpgid: c_int,
    pub e_tsess: *mut c_void,
    pub e_wmesg: [c_char; WMESGLEN + 1],
    pub e_xsize: i32,
    pub e_xrssize: c_short,
    pub e_xccount: c_short,
    pub e_xswrss: c_short,
    pub e_flag: i32,
    pub e_login: [c_char; COMAPT_MAXLOGNAME],
    pub e_spare: [i32; 4],
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct KinfoProc {
    pub kp_proc: ExternProc,
    pub kp_eproc: Eproc,
}
