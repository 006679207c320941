#![allow(non_upper_case_globals)]

// Hand-written subset of `linux/perf_event.h` for one contemporary kernel
// ABI. Fields and constants this crate never sets or reads are omitted
// rather than carried as dead weight.

pub const PERF_TYPE_HARDWARE: u32 = 0;
pub const PERF_TYPE_SOFTWARE: u32 = 1;
pub const PERF_TYPE_TRACEPOINT: u32 = 2;
pub const PERF_TYPE_HW_CACHE: u32 = 3;
pub const PERF_TYPE_RAW: u32 = 4;
pub const PERF_TYPE_BREAKPOINT: u32 = 5;

pub const PERF_COUNT_HW_CPU_CYCLES: u64 = 0;
pub const PERF_COUNT_HW_INSTRUCTIONS: u64 = 1;
pub const PERF_COUNT_HW_CACHE_REFERENCES: u64 = 2;
pub const PERF_COUNT_HW_CACHE_MISSES: u64 = 3;
pub const PERF_COUNT_HW_BRANCH_INSTRUCTIONS: u64 = 4;
pub const PERF_COUNT_HW_BRANCH_MISSES: u64 = 5;
pub const PERF_COUNT_HW_BUS_CYCLES: u64 = 6;
pub const PERF_COUNT_HW_STALLED_CYCLES_FRONTEND: u64 = 7;
pub const PERF_COUNT_HW_STALLED_CYCLES_BACKEND: u64 = 8;

pub const PERF_COUNT_SW_CPU_CLOCK: u64 = 0;
pub const PERF_COUNT_SW_TASK_CLOCK: u64 = 1;
pub const PERF_COUNT_SW_PAGE_FAULTS: u64 = 2;
pub const PERF_COUNT_SW_CONTEXT_SWITCHES: u64 = 3;
pub const PERF_COUNT_SW_CPU_MIGRATIONS: u64 = 4;
pub const PERF_COUNT_SW_PAGE_FAULTS_MIN: u64 = 5;
pub const PERF_COUNT_SW_PAGE_FAULTS_MAJ: u64 = 6;
pub const PERF_COUNT_SW_ALIGNMENT_FAULTS: u64 = 7;
pub const PERF_COUNT_SW_EMULATION_FAULTS: u64 = 8;
// 9 is PERF_COUNT_SW_DUMMY, unused by this crate's catalog.
pub const PERF_COUNT_SW_BPF_OUTPUT: u64 = 10;
pub const PERF_COUNT_SW_CGROUP_SWITCHES: u64 = 11;

pub const PERF_COUNT_HW_CACHE_L1D: u64 = 0;
pub const PERF_COUNT_HW_CACHE_L1I: u64 = 1;
pub const PERF_COUNT_HW_CACHE_DTLB: u64 = 3;
pub const PERF_COUNT_HW_CACHE_ITLB: u64 = 4;
pub const PERF_COUNT_HW_CACHE_OP_READ: u64 = 0;
pub const PERF_COUNT_HW_CACHE_RESULT_ACCESS: u64 = 0;
pub const PERF_COUNT_HW_CACHE_RESULT_MISS: u64 = 1;

pub const PERF_FORMAT_TOTAL_TIME_ENABLED: u64 = 1 << 0;
pub const PERF_FORMAT_TOTAL_TIME_RUNNING: u64 = 1 << 1;
pub const PERF_FORMAT_ID: u64 = 1 << 2;
pub const PERF_FORMAT_GROUP: u64 = 1 << 3;
pub const PERF_FORMAT_LOST: u64 = 1 << 4;

pub const PERF_SAMPLE_IP: u64 = 1 << 0;
pub const PERF_SAMPLE_TID: u64 = 1 << 1;
pub const PERF_SAMPLE_TIME: u64 = 1 << 2;
pub const PERF_SAMPLE_ADDR: u64 = 1 << 3;
pub const PERF_SAMPLE_READ: u64 = 1 << 4;
pub const PERF_SAMPLE_CALLCHAIN: u64 = 1 << 5;
pub const PERF_SAMPLE_ID: u64 = 1 << 6;
pub const PERF_SAMPLE_CPU: u64 = 1 << 7;
pub const PERF_SAMPLE_PERIOD: u64 = 1 << 8;
pub const PERF_SAMPLE_STREAM_ID: u64 = 1 << 9;
pub const PERF_SAMPLE_RAW: u64 = 1 << 10;
pub const PERF_SAMPLE_BRANCH_STACK: u64 = 1 << 11;
pub const PERF_SAMPLE_REGS_USER: u64 = 1 << 12;
pub const PERF_SAMPLE_STACK_USER: u64 = 1 << 13;
pub const PERF_SAMPLE_WEIGHT: u64 = 1 << 14;
pub const PERF_SAMPLE_DATA_SRC: u64 = 1 << 15;
pub const PERF_SAMPLE_TRANSACTION: u64 = 1 << 17;
pub const PERF_SAMPLE_REGS_INTR: u64 = 1 << 18;
pub const PERF_SAMPLE_PHYS_ADDR: u64 = 1 << 19;
pub const PERF_SAMPLE_AUX: u64 = 1 << 20;
pub const PERF_SAMPLE_CGROUP: u64 = 1 << 21;
pub const PERF_SAMPLE_DATA_PAGE_SIZE: u64 = 1 << 22;
pub const PERF_SAMPLE_CODE_PAGE_SIZE: u64 = 1 << 23;
pub const PERF_SAMPLE_WEIGHT_STRUCT: u64 = 1 << 24;

pub const PERF_SAMPLE_BRANCH_USER: u64 = 1 << 0;
pub const PERF_SAMPLE_BRANCH_KERNEL: u64 = 1 << 1;
pub const PERF_SAMPLE_BRANCH_HV: u64 = 1 << 2;
pub const PERF_SAMPLE_BRANCH_ANY: u64 = 1 << 3;
pub const PERF_SAMPLE_BRANCH_NO_FLAGS: u64 = 1 << 14;
pub const PERF_SAMPLE_BRANCH_NO_CYCLES: u64 = 1 << 15;

// `perf_event_attr` bitflag word: bit positions for the options this crate
// sets, collapsed into a single u64 (the kernel struct packs these as C
// bitfields over what is functionally one word).
mod attr_flag {
    pub const DISABLED: u64 = 1 << 0;
    pub const INHERIT: u64 = 1 << 1;
    pub const PINNED: u64 = 1 << 2;
    pub const EXCLUSIVE: u64 = 1 << 3;
    pub const EXCLUDE_USER: u64 = 1 << 4;
    pub const EXCLUDE_KERNEL: u64 = 1 << 5;
    pub const EXCLUDE_HV: u64 = 1 << 6;
    pub const EXCLUDE_IDLE: u64 = 1 << 7;
    pub const MMAP: u64 = 1 << 8;
    pub const FREQ: u64 = 1 << 10;
    pub const EXCLUDE_HOST: u64 = 1 << 24;
    pub const EXCLUDE_GUEST: u64 = 1 << 25;
    pub const SAMPLE_ID_ALL: u64 = 1 << 18;
    pub const CONTEXT_SWITCH: u64 = 1 << 29;
    pub const CGROUP: u64 = 1 << 32;
    pub const PRECISE_IP_SHIFT: u32 = 15;
    pub const PRECISE_IP_MASK: u64 = 0b11 << PRECISE_IP_SHIFT;
}

/// `perf_event_attr`, trimmed to the fields this crate populates.
///
/// Field order matches the kernel struct; fields this crate never sets
/// (build_id, aux tracing, clockid, signal data, ...) are omitted rather
/// than zero-padded, since this type is built up field-by-field in Rust
/// and never transmuted from a foreign blob.
#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct perf_event_attr {
    pub type_: u32,
    pub size: u32,
    pub config: u64,
    pub sample_period_or_freq: u64,
    pub sample_type: u64,
    pub read_format: u64,
    pub(crate) flags: u64,
    pub wakeup_events: u32,
    pub bp_type: u32,
    pub config1: u64,
    pub config2: u64,
    pub branch_sample_type: u64,
    pub sample_regs_user: u64,
    pub sample_stack_user: u32,
    pub sample_regs_intr: u64,
    pub sample_max_stack: u16,
    pub config3: u64,
}

macro_rules! flag_accessor {
    ($get:ident, $set:ident, $bit:expr) => {
        pub fn $get(&self) -> bool {
            self.flags & $bit != 0
        }
        pub fn $set(&mut self, on: bool) {
            if on {
                self.flags |= $bit;
            } else {
                self.flags &= !$bit;
            }
        }
    };
}

impl perf_event_attr {
    flag_accessor!(disabled, set_disabled, attr_flag::DISABLED);
    flag_accessor!(inherit, set_inherit, attr_flag::INHERIT);
    flag_accessor!(pinned, set_pinned, attr_flag::PINNED);
    flag_accessor!(exclusive, set_exclusive, attr_flag::EXCLUSIVE);
    flag_accessor!(exclude_user, set_exclude_user, attr_flag::EXCLUDE_USER);
    flag_accessor!(exclude_kernel, set_exclude_kernel, attr_flag::EXCLUDE_KERNEL);
    flag_accessor!(exclude_hv, set_exclude_hv, attr_flag::EXCLUDE_HV);
    flag_accessor!(exclude_idle, set_exclude_idle, attr_flag::EXCLUDE_IDLE);
    flag_accessor!(exclude_host, set_exclude_host, attr_flag::EXCLUDE_HOST);
    flag_accessor!(exclude_guest, set_exclude_guest, attr_flag::EXCLUDE_GUEST);
    flag_accessor!(mmap, set_mmap, attr_flag::MMAP);
    flag_accessor!(freq, set_freq, attr_flag::FREQ);
    flag_accessor!(sample_id_all, set_sample_id_all, attr_flag::SAMPLE_ID_ALL);
    flag_accessor!(context_switch, set_context_switch, attr_flag::CONTEXT_SWITCH);
    flag_accessor!(cgroup, set_cgroup, attr_flag::CGROUP);

    pub fn precise_ip(&self) -> u8 {
        ((self.flags & attr_flag::PRECISE_IP_MASK) >> attr_flag::PRECISE_IP_SHIFT) as u8
    }

    pub fn set_precise_ip(&mut self, level: u8) {
        self.flags &= !attr_flag::PRECISE_IP_MASK;
        self.flags |= ((level as u64) & 0b11) << attr_flag::PRECISE_IP_SHIFT;
    }
}

// ioctl operation codes, from `_IO`/`_IOW` expansions on `'$'` (0x24).
const fn ioc(nr: u32) -> u64 {
    (0 << 30) | (0x24 << 8) | nr as u64
}
pub const PERF_EVENT_IOC_ENABLE: u64 = ioc(0);
pub const PERF_EVENT_IOC_DISABLE: u64 = ioc(1);
pub const PERF_EVENT_IOC_REFRESH: u64 = ioc(2);
pub const PERF_EVENT_IOC_RESET: u64 = ioc(3);
pub const PERF_EVENT_IOC_ID: u64 = (2 << 30) | (0x24 << 8) | 7 | (8 << 16);

pub const PERF_IOC_FLAG_GROUP: u64 = 1;

pub const PERF_FLAG_FD_CLOEXEC: u64 = 1 << 3;
pub const PERF_FLAG_PID_CGROUP: u64 = 1 << 2;

// Record types and `misc` bits from `enum perf_event_type`.
pub const PERF_RECORD_MMAP: u32 = 1;
pub const PERF_RECORD_LOST: u32 = 2;
pub const PERF_RECORD_COMM: u32 = 3;
pub const PERF_RECORD_EXIT: u32 = 4;
pub const PERF_RECORD_THROTTLE: u32 = 5;
pub const PERF_RECORD_UNTHROTTLE: u32 = 6;
pub const PERF_RECORD_FORK: u32 = 7;
pub const PERF_RECORD_READ: u32 = 8;
pub const PERF_RECORD_SAMPLE: u32 = 9;
pub const PERF_RECORD_CGROUP: u32 = 19;
pub const PERF_RECORD_SWITCH: u32 = 14;
pub const PERF_RECORD_SWITCH_CPU_WIDE: u32 = 15;

pub const PERF_RECORD_MISC_CPUMODE_MASK: u16 = 0b111;
pub const PERF_RECORD_MISC_CPUMODE_UNKNOWN: u16 = 0;
pub const PERF_RECORD_MISC_KERNEL: u16 = 1;
pub const PERF_RECORD_MISC_USER: u16 = 2;
pub const PERF_RECORD_MISC_HYPERVISOR: u16 = 3;
pub const PERF_RECORD_MISC_GUEST_KERNEL: u16 = 4;
pub const PERF_RECORD_MISC_GUEST_USER: u16 = 5;

pub const PERF_RECORD_MISC_SWITCH_OUT: u16 = 1 << 13;
pub const PERF_RECORD_MISC_SWITCH_OUT_PREEMPT: u16 = 1 << 14;
pub const PERF_RECORD_MISC_EXACT_IP: u16 = 1 << 14;

/// `struct perf_event_header`.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct perf_event_header {
    pub type_: u32,
    pub misc: u16,
    pub size: u16,
}

/// Layout of the first page of the mmap'd ring (the control page).
/// Full field set is reproduced (rather than padded-and-skipped) since
/// `data_head`/`data_tail` sit near the end of the struct, after a large
/// reserved region.
#[repr(C)]
pub struct perf_event_mmap_page_cursors {
    _version: u32,
    _compat_version: u32,
    _lock: u32,
    _index: u32,
    _offset: i64,
    _time_enabled: u64,
    _time_running: u64,
    _capabilities_or_bits: u64,
    _pmc_width: u16,
    _time_shift: u16,
    _time_mult: u32,
    _time_offset: u64,
    _time_zero: u64,
    _size: u32,
    _reserved_1: u32,
    _time_cycles: u64,
    _time_mask: u64,
    _reserved: [u64; 120],
    pub data_head: u64,
    pub data_tail: u64,
}

// Data-source (`PERF_SAMPLE_DATA_SRC`) bitfield layout.
pub const PERF_MEM_OP_NA: u64 = 0x01;
pub const PERF_MEM_OP_LOAD: u64 = 0x02;
pub const PERF_MEM_OP_STORE: u64 = 0x04;
pub const PERF_MEM_OP_PFETCH: u64 = 0x08;
pub const PERF_MEM_OP_EXEC: u64 = 0x10;
pub const PERF_MEM_OP_SHIFT: u32 = 0;

pub const PERF_MEM_LVL_NA: u64 = 0x01;
pub const PERF_MEM_LVL_HIT: u64 = 0x02;
pub const PERF_MEM_LVL_MISS: u64 = 0x04;
pub const PERF_MEM_LVL_SHIFT: u32 = 5;

pub const PERF_MEM_LVLNUM_L1: u64 = 0x1;
pub const PERF_MEM_LVLNUM_L2: u64 = 0x2;
pub const PERF_MEM_LVLNUM_L3: u64 = 0x3;
pub const PERF_MEM_LVLNUM_L4: u64 = 0x4;
pub const PERF_MEM_LVLNUM_LFB: u64 = 0xc;
pub const PERF_MEM_LVLNUM_RAM: u64 = 0xd;
pub const PERF_MEM_LVLNUM_SHIFT: u32 = 33;

pub const PERF_MEM_REMOTE_REMOTE: u64 = 0x1;
pub const PERF_MEM_REMOTE_SHIFT: u32 = 37;

pub const PERF_MEM_SNOOP_NA: u64 = 0x01;
pub const PERF_MEM_SNOOP_HIT: u64 = 0x04;
pub const PERF_MEM_SNOOP_MISS: u64 = 0x08;
pub const PERF_MEM_SNOOP_SHIFT: u32 = 19;

pub const PERF_MEM_LOCK_NA: u64 = 0x01;
pub const PERF_MEM_LOCK_LOCKED: u64 = 0x02;
pub const PERF_MEM_LOCK_SHIFT: u32 = 24;

pub const PERF_MEM_TLB_NA: u64 = 0x01;
pub const PERF_MEM_TLB_HIT: u64 = 0x02;
pub const PERF_MEM_TLB_MISS: u64 = 0x04;
pub const PERF_MEM_TLB_SHIFT: u32 = 26;
