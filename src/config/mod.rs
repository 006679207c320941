mod target;

pub use target::*;

/// Sample skid level, mapping 1:1 onto the kernel's `precise_ip` values.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Precision {
    /// `precise_ip = 0`: the kernel may attribute samples to any instruction near the event.
    AllowArbitrarySkid,
    /// `precise_ip = 1`: skid is constant, though possibly nonzero.
    MustHaveConstantSkid,
    /// `precise_ip = 2`: request zero skid, falling back if the hardware cannot provide it.
    RequestZeroSkid,
    /// `precise_ip = 3`: zero skid is mandatory; opening fails if unsupported.
    MustHaveZeroSkid,
    /// No preference stated; behaves like [`AllowArbitrarySkid`][Self::AllowArbitrarySkid].
    Unspecified,
}

impl Precision {
    pub(crate) fn as_precise_ip(&self) -> u8 {
        match self {
            Self::AllowArbitrarySkid | Self::Unspecified => 0,
            Self::MustHaveConstantSkid => 1,
            Self::RequestZeroSkid => 2,
            Self::MustHaveZeroSkid => 3,
        }
    }
}

impl Default for Precision {
    fn default() -> Self {
        Self::Unspecified
    }
}

/// Controls when the kernel overflows and produces a sample.
#[derive(Clone, Copy, Debug)]
pub enum PeriodOrFrequency {
    /// Sample once every N occurrences of the trigger event.
    Period(u64),
    /// Let the kernel adjust the period to approximate N samples per second.
    Frequency(u64),
}

/// Register mask selecting which CPU registers to capture on a sample.
///
/// Layout is architecture-specific; see `arch/<arch>/include/uapi/asm/perf_regs.h`.
#[derive(Clone, Copy, Debug, Default)]
pub struct RegsMask(pub u64);

/// Scheduling and filter configuration shared by counting and sampling.
#[derive(Clone, Debug)]
pub struct Config {
    /// New child tasks (forked after the counter opens) inherit it too.
    pub include_child_threads: bool,
    pub include_kernel: bool,
    pub include_user: bool,
    pub include_hypervisor: bool,
    pub include_idle: bool,
    pub include_guest: bool,

    /// Maximum number of counter groups an [`EventCounter`][crate::counter::EventCounter] may open.
    pub max_groups: u32,
    /// Maximum members per counter group, bounded above by the hardware cap.
    pub max_counters_per_group: u32,
}

/// Hardware limit on group members; no `Config` may raise `max_counters_per_group` above this.
pub const HARDWARE_MAX_GROUP_MEMBERS: u32 = 8;

impl Default for Config {
    fn default() -> Self {
        Self {
            include_child_threads: false,
            include_kernel: true,
            include_user: true,
            include_hypervisor: true,
            include_idle: true,
            include_guest: true,
            max_groups: 5,
            max_counters_per_group: 4,
        }
    }
}

impl Config {
    pub(crate) fn max_counters_per_group(&self) -> u32 {
        self.max_counters_per_group.min(HARDWARE_MAX_GROUP_MEMBERS)
    }
}

/// [`Config`] plus the knobs that only apply to sampling.
///
/// Precision and period/frequency are per-trigger (passed to
/// [`crate::sampler::Sampler::trigger`]) rather than configured here, since
/// each trigger can overflow on a different schedule.
#[derive(Clone, Debug)]
pub struct SampleConfig {
    pub base: Config,
    /// Ring size: `1 + 2^n` pages, the `1` being the control page. Must be `2^n + 1`.
    pub buffer_pages: u32,
    pub user_regs: Option<RegsMask>,
    pub kernel_regs: Option<RegsMask>,
}

impl Default for SampleConfig {
    fn default() -> Self {
        Self { base: Config::default(), buffer_pages: 8193, user_regs: None, kernel_regs: None }
    }
}
