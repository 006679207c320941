mod arena;
pub mod decode;
mod rb;

use std::fs::File;
use std::mem::size_of;
use std::sync::atomic::AtomicU64;

use arena::Arena;
use decode::{decode_record, Sample};
use rb::Rb;

use crate::catalog::{Catalog, EventDescriptor};
use crate::config::{PeriodOrFrequency, Precision, SampleConfig, Target};
use crate::error::{Error, Result};
use crate::ffi::bindings as b;
use crate::ffi::syscall::{self, ioctl_arg, perf_event_open};
use crate::ffi::{page_size, Attr};

const READ_FORMAT: u64 = b::PERF_FORMAT_GROUP | b::PERF_FORMAT_ID | b::PERF_FORMAT_LOST;

/// Which optional fields a triggered sample should carry, and which bits of
/// `branch_sample_type` filter the branch stack when branches are requested.
///
/// Each field maps onto one `PERF_SAMPLE_*` bit (see [`Values::sample_type`]);
/// `context_switch` instead maps onto the `PERF_RECORD_SWITCH` attribute flag,
/// since it produces separate records rather than extending every sample.
#[derive(Clone, Copy, Debug, Default)]
pub struct Values {
    pub instruction_pointer: bool,
    pub time: bool,
    pub cpu_id: bool,
    pub thread_id: bool,
    pub period: bool,
    pub counter_values: bool,
    pub logical_memory_address: bool,
    pub physical_memory_address: bool,
    pub data_src: bool,
    pub weight: bool,
    pub weight_struct: bool,
    /// `Some(mask)` requests branch-stack capture filtered to `mask`; `None` disables it.
    pub branches: Option<u64>,
    pub user_registers: bool,
    pub kernel_registers: bool,
    pub callchain: bool,
    pub cgroup_id: bool,
    pub data_page_size: bool,
    pub code_page_size: bool,
    pub context_switch: bool,
    pub raw: bool,
}

impl Values {
    fn sample_type(&self) -> u64 {
        let mut mask = 0;
        if self.instruction_pointer {
            mask |= b::PERF_SAMPLE_IP;
        }
        if self.thread_id {
            mask |= b::PERF_SAMPLE_TID;
        }
        if self.time {
            mask |= b::PERF_SAMPLE_TIME;
        }
        if self.logical_memory_address {
            mask |= b::PERF_SAMPLE_ADDR;
        }
        if self.cpu_id {
            mask |= b::PERF_SAMPLE_CPU;
        }
        if self.period {
            mask |= b::PERF_SAMPLE_PERIOD;
        }
        if self.counter_values {
            mask |= b::PERF_SAMPLE_READ;
        }
        if self.callchain {
            mask |= b::PERF_SAMPLE_CALLCHAIN;
        }
        if self.raw {
            mask |= b::PERF_SAMPLE_RAW;
        }
        if self.branches.is_some() {
            mask |= b::PERF_SAMPLE_BRANCH_STACK;
        }
        if self.user_registers {
            mask |= b::PERF_SAMPLE_REGS_USER;
        }
        if self.weight {
            mask |= b::PERF_SAMPLE_WEIGHT;
        }
        if self.weight_struct {
            mask |= b::PERF_SAMPLE_WEIGHT_STRUCT;
        }
        if self.data_src {
            mask |= b::PERF_SAMPLE_DATA_SRC;
        }
        if self.kernel_registers {
            mask |= b::PERF_SAMPLE_REGS_INTR;
        }
        if self.physical_memory_address {
            mask |= b::PERF_SAMPLE_PHYS_ADDR;
        }
        if self.cgroup_id {
            mask |= b::PERF_SAMPLE_CGROUP;
        }
        if self.data_page_size {
            mask |= b::PERF_SAMPLE_DATA_PAGE_SIZE;
        }
        if self.code_page_size {
            mask |= b::PERF_SAMPLE_CODE_PAGE_SIZE;
        }
        mask
    }
}

struct TriggerSpec {
    descriptor: EventDescriptor,
    precision: Precision,
    period_or_frequency: PeriodOrFrequency,
}

struct TriggerGroup {
    leader: File,
    arena: Arena,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Configured,
    Running,
    Stopped,
    Drained,
    Closed,
}

/// Opens one or more trigger events in sampling mode, each with its own ring
/// buffer, and decodes the records the kernel writes into them.
///
/// Valid lifecycle: `trigger`/`values` any number of times while
/// [`Phase::Configured`], then `start` → `stop` → `result` → `close`, each
/// advancing the state machine by exactly one step. Calling an operation out
/// of order returns [`Error::StateInvalid`] rather than silently doing
/// nothing, since misuse here usually means a descriptor or mapping leaked.
pub struct Sampler<'c> {
    catalog: &'c Catalog,
    target: Target,
    config: SampleConfig,
    values: Values,
    triggers: Vec<TriggerSpec>,
    groups: Vec<TriggerGroup>,
    phase: Phase,
    last_error: Option<std::io::Error>,
}

impl<'c> Sampler<'c> {
    pub fn new(catalog: &'c Catalog, target: impl Into<Target>, config: SampleConfig) -> Self {
        Self {
            catalog,
            target: target.into(),
            config,
            values: Values::default(),
            triggers: Vec::new(),
            groups: Vec::new(),
            phase: Phase::Configured,
            last_error: None,
        }
    }

    /// The mutable field-selection object described by [`Values`]: toggle fields
    /// on it before calling [`Self::start`].
    pub fn values(&mut self) -> &mut Values {
        &mut self.values
    }

    /// Adds one independent trigger: an event whose overflow produces samples
    /// in its own ring. Must be called before [`Self::start`].
    pub fn trigger(&mut self, event_name: &str, precision: Precision, period_or_frequency: PeriodOrFrequency) -> Result<()> {
        if self.phase != Phase::Configured {
            return Err(Error::StateInvalid("trigger called outside the Configured phase"));
        }
        let descriptor = self.catalog.lookup_event(event_name).ok_or_else(|| Error::CatalogMiss(event_name.to_owned()))?;
        self.triggers.push(TriggerSpec { descriptor, precision, period_or_frequency });
        Ok(())
    }

    /// Opens every trigger's leader fd, mmaps its ring, and enables it. On any
    /// failure nothing opened so far is kept open: dropping the partially-built
    /// `Vec<TriggerGroup>` closes fds and unmaps rings via RAII.
    pub fn start(&mut self) -> Result<()> {
        if self.phase != Phase::Configured {
            return Err(Error::StateInvalid("start called outside the Configured phase"));
        }
        if self.triggers.is_empty() {
            return Err(Error::StateInvalid("start called with no triggers configured"));
        }

        let ring_len = self.config.buffer_pages as usize * page_size();
        let sample_type = self.values.sample_type();

        let mut opened: Vec<TriggerGroup> = Vec::with_capacity(self.triggers.len());
        for trigger in &self.triggers {
            let mut attr =
                Attr { type_: trigger.descriptor.pmu_type, size: size_of::<Attr>() as u32, ..Attr::default() };
            attr.config = trigger.descriptor.event_id;
            attr.config1 = trigger.descriptor.event_id_ext[0];
            attr.config2 = trigger.descriptor.event_id_ext[1];
            attr.sample_type = sample_type;
            attr.read_format = READ_FORMAT;
            match trigger.period_or_frequency {
                PeriodOrFrequency::Period(period) => {
                    attr.sample_period_or_freq = period;
                    attr.set_freq(false);
                }
                PeriodOrFrequency::Frequency(frequency) => {
                    attr.sample_period_or_freq = frequency;
                    attr.set_freq(true);
                }
            }
            attr.set_precise_ip(trigger.precision.as_precise_ip());
            attr.set_mmap(true);
            attr.set_inherit(self.config.base.include_child_threads);
            attr.set_exclude_user(!self.config.base.include_user);
            attr.set_exclude_kernel(!self.config.base.include_kernel);
            attr.set_exclude_hv(!self.config.base.include_hypervisor);
            attr.set_exclude_idle(!self.config.base.include_idle);
            attr.set_exclude_guest(!self.config.base.include_guest);
            attr.set_context_switch(self.values.context_switch);
            attr.set_disabled(true);
            if let Some(branch_sample_type) = self.values.branches {
                attr.branch_sample_type = branch_sample_type;
            }
            if self.values.user_registers {
                attr.sample_regs_user = self.config.user_regs.unwrap_or_default().0;
            }
            if self.values.kernel_registers {
                attr.sample_regs_intr = self.config.kernel_regs.unwrap_or_default().0;
            }

            let leader = perf_event_open(&attr, self.target.pid, self.target.cpu, -1, b::PERF_FLAG_FD_CLOEXEC).map_err(|source| {
                self.last_error = Some(io_clone(&source));
                Error::OpenFailed(source)
            })?;

            let arena = Arena::new(&leader, ring_len).map_err(|source| {
                self.last_error = Some(io_clone(&source));
                Error::MapFailed(source)
            })?;

            opened.push(TriggerGroup { leader, arena });
        }

        for group in &opened {
            ioctl_arg(&group.leader, b::PERF_EVENT_IOC_RESET, b::PERF_IOC_FLAG_GROUP).map_err(Error::OpenFailed)?;
            ioctl_arg(&group.leader, b::PERF_EVENT_IOC_ENABLE, b::PERF_IOC_FLAG_GROUP).map_err(Error::OpenFailed)?;
        }

        log::debug!("sampler started with {} trigger(s)", opened.len());
        self.groups = opened;
        self.phase = Phase::Running;
        Ok(())
    }

    /// Disables every trigger's leader. The kernel stops writing new records,
    /// but whatever is already in the ring survives until [`Self::result`] drains it.
    pub fn stop(&mut self) -> Result<()> {
        if self.phase != Phase::Running {
            return Err(Error::StateInvalid("stop called outside the Running phase"));
        }

        let mut first_error = None;
        for group in &self.groups {
            if let Err(source) = ioctl_arg(&group.leader, b::PERF_EVENT_IOC_DISABLE, b::PERF_IOC_FLAG_GROUP) {
                first_error.get_or_insert(Error::OpenFailed(source));
            }
        }

        self.phase = Phase::Stopped;
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Drains every trigger's ring, decoding each record per its type, and
    /// returns them concatenated. With `sort_by_time`, stably sorts by the
    /// `time` field if every decoded sample carries one.
    pub fn result(&mut self, sort_by_time: bool) -> Result<Vec<Sample>> {
        if self.phase != Phase::Stopped {
            return Err(Error::StateInvalid("result called outside the Stopped phase"));
        }

        let page = page_size();
        let sample_type = self.values.sample_type();
        let user_regs_mask = self.config.user_regs.map_or(0, |mask| mask.0);
        let kernel_regs_mask = self.config.kernel_regs.map_or(0, |mask| mask.0);

        let mut samples = Vec::new();
        for group in &self.groups {
            let region = group.arena.as_slice();
            let control = unsafe { &mut *(region.as_ptr() as *mut b::perf_event_mmap_page_cursors) };
            let tail = unsafe { AtomicU64::from_ptr(&mut control.data_tail) };
            let head = unsafe { AtomicU64::from_ptr(&mut control.data_head) };
            let data = &region[page..];
            let rb = Rb::new(data, tail, head);

            let mut drained = 0usize;
            loop {
                match rb.pop() {
                    Ok(Some(chunk)) => {
                        let bytes = chunk.as_bytes();
                        if bytes.len() < size_of::<b::perf_event_header>() {
                            continue;
                        }
                        let header = unsafe { *(bytes.as_ptr() as *const b::perf_event_header) };
                        let body = unsafe { bytes.as_ptr().add(size_of::<b::perf_event_header>()) };
                        if let Some(sample) = unsafe { decode_record(&header, body, sample_type, user_regs_mask, kernel_regs_mask) } {
                            samples.push(sample);
                        }
                        drained += 1;
                    }
                    Ok(None) => break,
                    Err((declared, available)) => {
                        log::warn!("{}; stopping this ring's drain", Error::DecodeShort { declared, available });
                        break;
                    }
                }
            }
            log::debug!("ring drained {drained} record(s)");
        }

        if sort_by_time && !samples.is_empty() && samples.iter().all(|sample| sample.time.is_some()) {
            samples.sort_by_key(|sample| sample.time.unwrap());
        }

        self.phase = Phase::Drained;
        Ok(samples)
    }

    /// Unmaps every ring and closes every leader fd. Must follow [`Self::result`].
    /// A leader fd the kernel has already invalidated is logged rather than
    /// propagated, since the sampler is being torn down regardless.
    pub fn close(&mut self) -> Result<()> {
        if self.phase != Phase::Drained {
            return Err(Error::StateInvalid("close called before result"));
        }
        for group in self.groups.drain(..) {
            if let Err(source) = syscall::close(group.leader) {
                log::error!("closing sampler trigger leader fd failed: {source}");
            }
        }
        self.phase = Phase::Closed;
        Ok(())
    }

    /// The errno of the most recent failed syscall, if any.
    pub fn last_error(&self) -> Option<&std::io::Error> {
        self.last_error.as_ref()
    }
}

fn io_clone(err: &std::io::Error) -> std::io::Error {
    std::io::Error::from_raw_os_error(err.raw_os_error().unwrap_or(0))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn trigger_before_configured_is_rejected_after_start() {
        let catalog = Catalog::new();
        let mut sampler = Sampler::new(&catalog, crate::config::Proc::CURRENT, SampleConfig::default());
        sampler.phase = Phase::Running;
        assert!(matches!(
            sampler.trigger("cycles", Precision::Unspecified, PeriodOrFrequency::Period(1000)),
            Err(Error::StateInvalid(_))
        ));
    }

    #[test]
    fn start_with_no_triggers_is_rejected() {
        let catalog = Catalog::new();
        let mut sampler = Sampler::new(&catalog, crate::config::Proc::CURRENT, SampleConfig::default());
        assert!(matches!(sampler.start(), Err(Error::StateInvalid(_))));
    }

    #[test]
    fn result_before_stop_is_rejected() {
        let catalog = Catalog::new();
        let mut sampler = Sampler::new(&catalog, crate::config::Proc::CURRENT, SampleConfig::default());
        sampler.phase = Phase::Running;
        assert!(matches!(sampler.result(false), Err(Error::StateInvalid(_))));
    }

    #[test]
    fn close_before_result_is_rejected() {
        let catalog = Catalog::new();
        let mut sampler = Sampler::new(&catalog, crate::config::Proc::CURRENT, SampleConfig::default());
        assert!(matches!(sampler.close(), Err(Error::StateInvalid(_))));
    }

    #[test]
    fn values_sample_type_combines_requested_bits() {
        let mut values = Values::default();
        values.instruction_pointer = true;
        values.time = true;
        let mask = values.sample_type();
        assert_eq!(mask, b::PERF_SAMPLE_IP | b::PERF_SAMPLE_TIME);
    }

    /// Needs `CAP_PERFMON`/`CAP_SYS_ADMIN` or a permissive `perf_event_paranoid`.
    /// Skips rather than fails when the environment denies `perf_event_open`,
    /// since this suite also runs inside unprivileged containers.
    #[test]
    fn samples_cycles_over_the_current_thread_when_pmu_access_is_available() {
        env_logger::try_init().ok();
        let catalog = Catalog::new();
        let mut sampler = Sampler::new(&catalog, crate::config::Proc::CURRENT, SampleConfig::default());
        sampler.trigger("cycles", Precision::Unspecified, PeriodOrFrequency::Period(10_000)).unwrap();
        sampler.values().instruction_pointer = true;
        sampler.values().time = true;

        if let Err(err) = sampler.start() {
            log::warn!("skipping live PMU test, perf_event_open denied: {err}");
            return;
        }

        std::hint::black_box((0..100_000u64).sum::<u64>());
        sampler.stop().unwrap();
        let samples = sampler.result(true).unwrap();
        sampler.close().unwrap();

        assert!(samples.iter().all(|sample| sample.mode.is_some()));
    }
}
