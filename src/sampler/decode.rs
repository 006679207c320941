use std::ffi::CStr;
use std::mem::{align_of, size_of};
use std::slice;

use crate::ffi::bindings as b;
use crate::ffi::deref_offset;

/// CPU privilege level a record was taken in, from `header.misc & CPUMODE_MASK`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Mode {
    Kernel,
    User,
    Hypervisor,
    GuestKernel,
    GuestUser,
    Unknown,
}

impl Mode {
    fn from_misc(misc: u16) -> Self {
        match misc as u32 & b::PERF_RECORD_MISC_CPUMODE_MASK as u32 {
            x if x == b::PERF_RECORD_MISC_KERNEL as u32 => Self::Kernel,
            x if x == b::PERF_RECORD_MISC_USER as u32 => Self::User,
            x if x == b::PERF_RECORD_MISC_HYPERVISOR as u32 => Self::Hypervisor,
            x if x == b::PERF_RECORD_MISC_GUEST_KERNEL as u32 => Self::GuestKernel,
            x if x == b::PERF_RECORD_MISC_GUEST_USER as u32 => Self::GuestUser,
            _ => Self::Unknown,
        }
    }
}

#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Task {
    pub pid: u32,
    pub tid: u32,
}

/// Register ABI width a `user_regs`/`kernel_regs` capture was taken under.
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Abi {
    Bits32,
    Bits64,
}

/// Latency weight of a sample. The kernel reports this as either a bare `u64`
/// (`PERF_SAMPLE_WEIGHT`) or a `{latency, var2, var3}` struct
/// (`PERF_SAMPLE_WEIGHT_STRUCT`); both collapse into this one shape, with
/// `var2`/`var3` left zero for the bare-`u64` variant.
#[derive(Clone, Copy, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Weight {
    pub latency: u64,
    pub var2: u16,
    pub var3: u16,
}

#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BranchEntry {
    pub from: u64,
    pub to: u64,
    pub mispredicted: bool,
    pub predicted: bool,
    pub in_tx: bool,
    pub abort: bool,
    pub cycles: u16,
}

/// Raw `PERF_SAMPLE_DATA_SRC` word with bitfield predicates. Predicates that
/// would require a constant absent from this crate's single-ABI bindings
/// always return `false`, matching how kernel-version-conditional fields
/// degrade elsewhere in this crate.
#[derive(Clone, Copy, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DataSource(pub u64);

impl DataSource {
    fn lvl_num(&self) -> u64 {
        (self.0 >> b::PERF_MEM_LVLNUM_SHIFT) & 0xf
    }

    pub fn is_mem_l1(&self) -> bool {
        self.lvl_num() == b::PERF_MEM_LVLNUM_L1
    }

    pub fn is_mem_l2(&self) -> bool {
        self.lvl_num() == b::PERF_MEM_LVLNUM_L2
    }

    pub fn is_mem_l3(&self) -> bool {
        self.lvl_num() == b::PERF_MEM_LVLNUM_L3
    }

    pub fn is_mem_l4(&self) -> bool {
        self.lvl_num() == b::PERF_MEM_LVLNUM_L4
    }

    pub fn is_mem_lfb(&self) -> bool {
        self.lvl_num() == b::PERF_MEM_LVLNUM_LFB
    }

    pub fn is_mem_local_ram(&self) -> bool {
        self.lvl_num() == b::PERF_MEM_LVLNUM_RAM && !self.is_remote()
    }

    pub fn is_remote(&self) -> bool {
        (self.0 >> b::PERF_MEM_REMOTE_SHIFT) & b::PERF_MEM_REMOTE_REMOTE != 0
    }

    fn snoop_bits(&self) -> u64 {
        self.0 >> b::PERF_MEM_SNOOP_SHIFT
    }

    pub fn is_snoop_hit(&self) -> bool {
        self.snoop_bits() & b::PERF_MEM_SNOOP_HIT != 0
    }

    pub fn is_snoop_miss(&self) -> bool {
        self.snoop_bits() & b::PERF_MEM_SNOOP_MISS != 0
    }

    fn tlb_bits(&self) -> u64 {
        self.0 >> b::PERF_MEM_TLB_SHIFT
    }

    pub fn is_tlb_hit(&self) -> bool {
        self.tlb_bits() & b::PERF_MEM_TLB_HIT != 0
    }

    pub fn is_tlb_miss(&self) -> bool {
        self.tlb_bits() & b::PERF_MEM_TLB_MISS != 0
    }

    pub fn is_locked(&self) -> bool {
        (self.0 >> b::PERF_MEM_LOCK_SHIFT) & b::PERF_MEM_LOCK_LOCKED != 0
    }
}

/// One `read_format`-decoded counter-values block (`PERF_FORMAT_GROUP|ID|LOST`),
/// as requested by [`crate::sampler::Sampler`]'s `counter_values` field.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CounterValues {
    pub values: Vec<(u64, u64, Option<u64>)>, // (value, id, lost)
}

impl CounterValues {
    unsafe fn decode(ptr: &mut *const u8) -> Self {
        let nr: u64 = deref_offset(ptr);
        let values = (0..nr)
            .map(|_| {
                let value = deref_offset(ptr);
                let id = deref_offset(ptr);
                let lost = Some(deref_offset(ptr));
                (value, id, lost)
            })
            .collect();
        Self { values }
    }
}

#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ContextSwitch {
    pub is_out: bool,
    pub is_preempt: bool,
    pub task: Option<Task>,
}

#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Throttle {
    pub is_throttle: bool,
}

#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Cgroup {
    pub id: u64,
    pub path: String,
}

/// One decoded ring record. Every field beyond `mode` is optional: which ones
/// are populated depends on the record's type and, for `SAMPLE` records, the
/// bits set in the sample-type mask that produced it.
#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Sample {
    pub mode: Option<Mode>,

    pub instruction_pointer: Option<u64>,
    pub is_exact_ip: bool,
    pub task: Option<Task>,
    pub time: Option<u64>,
    pub logical_memory_address: Option<u64>,
    pub id: Option<u64>,
    pub stream_id: Option<u64>,
    pub cpu: Option<u32>,
    pub period: Option<u64>,
    pub counter_values: Option<CounterValues>,
    pub call_chain: Option<Vec<u64>>,
    pub raw: Option<Vec<u8>>,
    pub branch_stack: Option<Vec<BranchEntry>>,
    pub user_registers: Option<(Vec<u64>, Abi)>,
    pub data_source: Option<DataSource>,
    pub weight: Option<Weight>,
    pub kernel_registers: Option<(Vec<u64>, Abi)>,
    pub physical_memory_address: Option<u64>,
    pub cgroup_id: Option<u64>,
    pub data_page_size: Option<u64>,
    pub code_page_size: Option<u64>,

    pub count_loss: Option<u64>,
    pub context_switch: Option<ContextSwitch>,
    pub throttle: Option<Throttle>,
    pub cgroup: Option<Cgroup>,
}

unsafe fn parse_regs(ptr: &mut *const u8, mask: u64) -> Option<(Vec<u64>, Abi)> {
    let abi: u64 = deref_offset(ptr);
    if abi == 0 {
        return None;
    }
    let count = mask.count_ones() as usize;
    let regs = slice::from_raw_parts(*ptr as *const u64, count).to_vec();
    *ptr = ptr.add(count * size_of::<u64>());
    let abi = if abi == 1 { Abi::Bits32 } else { Abi::Bits64 };
    Some((regs, abi))
}

unsafe fn parse_branch_stack(ptr: &mut *const u8) -> Vec<BranchEntry> {
    #[repr(C)]
    struct Layout {
        from: u64,
        to: u64,
        flags: u64,
    }

    let nr: u64 = deref_offset(ptr);
    let layouts = slice::from_raw_parts(*ptr as *const Layout, nr as usize);
    *ptr = ptr.add(nr as usize * size_of::<Layout>());

    layouts
        .iter()
        .map(|entry| BranchEntry {
            from: entry.from,
            to: entry.to,
            mispredicted: entry.flags & 0b1 != 0,
            predicted: entry.flags & 0b10 != 0,
            in_tx: entry.flags & 0b100 != 0,
            abort: entry.flags & 0b1000 != 0,
            cycles: (entry.flags >> 4) as u16,
        })
        .collect()
}

/// Decodes a `PERF_RECORD_SAMPLE` payload (after the header) per the field order
/// fixed by the kernel for the given `sample_type` mask.
#[allow(clippy::too_many_arguments)]
pub(super) unsafe fn decode_sample_body(
    mut ptr: *const u8,
    misc: u16,
    sample_type: u64,
    user_regs_mask: u64,
    kernel_regs_mask: u64,
) -> Sample {
    macro_rules! when {
        ($flag:ident, $ty:ty) => {
            (sample_type & b::$flag != 0).then(|| deref_offset::<$ty>(&mut ptr))
        };
        ($flag:ident, $then:expr) => {
            (sample_type & b::$flag != 0).then(|| $then)
        };
    }

    let instruction_pointer = when!(PERF_SAMPLE_IP, u64);
    let is_exact_ip = instruction_pointer.is_some() && misc & b::PERF_RECORD_MISC_EXACT_IP != 0;
    let task = when!(
        PERF_SAMPLE_TID,
        Task { pid: deref_offset(&mut ptr), tid: deref_offset(&mut ptr) }
    );
    let time = when!(PERF_SAMPLE_TIME, u64);
    let logical_memory_address = when!(PERF_SAMPLE_ADDR, u64);
    let id = when!(PERF_SAMPLE_ID, u64);
    let stream_id = when!(PERF_SAMPLE_STREAM_ID, u64);
    let cpu = when!(PERF_SAMPLE_CPU, {
        let cpu = deref_offset(&mut ptr);
        ptr = ptr.add(size_of::<u32>()); // reserved
        cpu
    });
    let period = when!(PERF_SAMPLE_PERIOD, u64);
    let counter_values = when!(PERF_SAMPLE_READ, { CounterValues::decode(&mut ptr) });
    let call_chain = when!(PERF_SAMPLE_CALLCHAIN, {
        let len = deref_offset::<u64>(&mut ptr) as usize;
        let ips = slice::from_raw_parts(ptr as *const u64, len).to_vec();
        ptr = ptr.add(len * size_of::<u64>());
        ips
    });
    let raw = when!(PERF_SAMPLE_RAW, {
        let len = deref_offset::<u32>(&mut ptr) as usize;
        let bytes = slice::from_raw_parts(ptr, len).to_vec();
        ptr = ptr.add(len);
        ptr = ptr.add(ptr.align_offset(align_of::<u64>()));
        bytes
    });
    let branch_stack = when!(PERF_SAMPLE_BRANCH_STACK, { parse_branch_stack(&mut ptr) });
    let user_registers = when!(PERF_SAMPLE_REGS_USER, { parse_regs(&mut ptr, user_regs_mask) }).flatten();
    if sample_type & b::PERF_SAMPLE_STACK_USER != 0 {
        let len = deref_offset::<u64>(&mut ptr) as usize;
        ptr = ptr.add(len);
        if len > 0 {
            let _dyn_len: u64 = deref_offset(&mut ptr);
        }
    }
    let weight = if sample_type & b::PERF_SAMPLE_WEIGHT != 0 {
        Some(Weight { latency: deref_offset(&mut ptr), var2: 0, var3: 0 })
    } else if sample_type & b::PERF_SAMPLE_WEIGHT_STRUCT != 0 {
        let latency: u32 = deref_offset(&mut ptr);
        let var2 = deref_offset(&mut ptr);
        let var3 = deref_offset(&mut ptr);
        Some(Weight { latency: latency as u64, var2, var3 })
    } else {
        None
    };
    let data_source = when!(PERF_SAMPLE_DATA_SRC, { DataSource(deref_offset(&mut ptr)) });
    if sample_type & b::PERF_SAMPLE_TRANSACTION != 0 {
        let _txn: u64 = deref_offset(&mut ptr);
    }
    let kernel_registers = when!(PERF_SAMPLE_REGS_INTR, { parse_regs(&mut ptr, kernel_regs_mask) }).flatten();
    let physical_memory_address = when!(PERF_SAMPLE_PHYS_ADDR, u64);
    let cgroup_id = when!(PERF_SAMPLE_CGROUP, u64);
    let data_page_size = when!(PERF_SAMPLE_DATA_PAGE_SIZE, u64);
    let code_page_size = when!(PERF_SAMPLE_CODE_PAGE_SIZE, u64);

    Sample {
        mode: Some(Mode::from_misc(misc)),
        instruction_pointer,
        is_exact_ip,
        task,
        time,
        logical_memory_address,
        id,
        stream_id,
        cpu,
        period,
        counter_values,
        call_chain,
        raw,
        branch_stack,
        user_registers,
        data_source,
        weight,
        kernel_registers,
        physical_memory_address,
        cgroup_id,
        data_page_size,
        code_page_size,
        ..Sample::default()
    }
}

/// Dispatches on a record's header and decodes its body, or returns `None` for
/// types this crate doesn't surface (skipped by `header.size`).
pub(super) unsafe fn decode_record(
    header: &b::perf_event_header,
    body: *const u8,
    sample_type: u64,
    user_regs_mask: u64,
    kernel_regs_mask: u64,
) -> Option<Sample> {
    match header.type_ {
        b::PERF_RECORD_SAMPLE => Some(decode_sample_body(body, header.misc, sample_type, user_regs_mask, kernel_regs_mask)),
        b::PERF_RECORD_LOST => {
            let mut ptr = body;
            let _id: u64 = deref_offset(&mut ptr);
            let lost: u64 = deref_offset(&mut ptr);
            Some(Sample { mode: Some(Mode::from_misc(header.misc)), count_loss: Some(lost), ..Sample::default() })
        }
        b::PERF_RECORD_SWITCH => {
            let is_out = header.misc & b::PERF_RECORD_MISC_SWITCH_OUT != 0;
            let is_preempt = header.misc & b::PERF_RECORD_MISC_SWITCH_OUT_PREEMPT != 0;
            Some(Sample {
                mode: Some(Mode::from_misc(header.misc)),
                context_switch: Some(ContextSwitch { is_out, is_preempt, task: None }),
                ..Sample::default()
            })
        }
        b::PERF_RECORD_SWITCH_CPU_WIDE => {
            let mut ptr = body;
            let task = Task { pid: deref_offset(&mut ptr), tid: deref_offset(&mut ptr) };
            let is_out = header.misc & b::PERF_RECORD_MISC_SWITCH_OUT != 0;
            let is_preempt = header.misc & b::PERF_RECORD_MISC_SWITCH_OUT_PREEMPT != 0;
            Some(Sample {
                mode: Some(Mode::from_misc(header.misc)),
                context_switch: Some(ContextSwitch { is_out, is_preempt, task: Some(task) }),
                ..Sample::default()
            })
        }
        b::PERF_RECORD_THROTTLE => {
            Some(Sample { mode: Some(Mode::from_misc(header.misc)), throttle: Some(Throttle { is_throttle: true }), ..Sample::default() })
        }
        b::PERF_RECORD_UNTHROTTLE => {
            Some(Sample { mode: Some(Mode::from_misc(header.misc)), throttle: Some(Throttle { is_throttle: false }), ..Sample::default() })
        }
        b::PERF_RECORD_CGROUP => {
            let mut ptr = body;
            let id: u64 = deref_offset(&mut ptr);
            let path = CStr::from_ptr(ptr as _).to_string_lossy().into_owned();
            Some(Sample { mode: Some(Mode::from_misc(header.misc)), cgroup: Some(Cgroup { id, path }), ..Sample::default() })
        }
        _ => None,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn data_source_predicates_read_their_own_bitfield_shift() {
        let l1_hit = b::PERF_MEM_LVLNUM_L1 << b::PERF_MEM_LVLNUM_SHIFT;
        let source = DataSource(l1_hit);
        assert!(source.is_mem_l1());
        assert!(!source.is_mem_l2());
    }

    #[test]
    fn weight_default_has_zeroed_fields() {
        let w = Weight::default();
        assert_eq!((w.latency, w.var2, w.var3), (0, 0, 0));
    }

    #[test]
    fn decode_lost_record_populates_only_count_loss() {
        let mut body = Vec::new();
        body.extend_from_slice(&0u64.to_ne_bytes()); // id
        body.extend_from_slice(&9u64.to_ne_bytes()); // lost
        let header = b::perf_event_header { type_: b::PERF_RECORD_LOST, misc: 0, size: 24 };
        let sample = unsafe { decode_record(&header, body.as_ptr(), 0, 0, 0) }.unwrap();
        assert_eq!(sample.count_loss, Some(9));
        assert!(sample.instruction_pointer.is_none());
    }
}
