use std::fs::File;
use std::os::fd::AsRawFd;

use crate::catalog::EventDescriptor;
use crate::config::{Config, Target};
use crate::error::{Error, Result};
use crate::ffi::bindings as b;
use crate::ffi::syscall::{self, ioctl_arg, ioctl_argp, perf_event_open, read};
use crate::ffi::{deref_offset, Attr};

const READ_FORMAT: u64 =
    b::PERF_FORMAT_GROUP | b::PERF_FORMAT_ID | b::PERF_FORMAT_TOTAL_TIME_ENABLED | b::PERF_FORMAT_TOTAL_TIME_RUNNING;

/// One grouped `read()` of a [`CounterGroup`]: per-member `(id, value)` pairs
/// plus the multiplexing correction factor shared by the whole group.
///
/// Values are matched up between a start and an end snapshot by kernel-assigned
/// `id`, not by position: the kernel makes no ordering guarantee inside a
/// grouped read beyond "member order at open time", which this crate doesn't
/// rely on for anything but picking a leader.
#[derive(Clone, Debug, Default)]
struct GroupStat {
    time_enabled: u64,
    time_running: u64,
    values: Vec<(u64, u64)>, // (id, value)
}

impl GroupStat {
    fn decode(buf: &[u8]) -> Self {
        let mut ptr = buf.as_ptr();
        unsafe {
            let nr: u64 = deref_offset(&mut ptr);
            let time_enabled: u64 = deref_offset(&mut ptr);
            let time_running: u64 = deref_offset(&mut ptr);
            let values = (0..nr)
                .map(|_| {
                    let value: u64 = deref_offset(&mut ptr);
                    let id: u64 = deref_offset(&mut ptr);
                    (id, value)
                })
                .collect();
            Self { time_enabled, time_running, values }
        }
    }

    fn buf_size(member_count: usize) -> usize {
        // nr, time_enabled, time_running, then (value, id) per member.
        8 * 3 + member_count * 16
    }

    fn value_for_id(&self, id: u64) -> Option<u64> {
        self.values.iter().find(|&&(member_id, _)| member_id == id).map(|&(_, value)| value)
    }
}

/// A set of counters opened together so the kernel schedules them onto the CPU
/// as a unit, making their raw counts directly comparable.
///
/// Members beyond the hardware's simultaneous-counter limit cannot be opened
/// in the same group; [`crate::counter::EventCounter`] is responsible for
/// splitting events across multiple groups to stay under that cap.
pub struct CounterGroup {
    fds: Vec<File>,
    /// Kernel-assigned id per member, in the order passed to [`Self::open`].
    /// Captured at open time so it survives independently of any later read.
    ids: Vec<u64>,
    start: Option<GroupStat>,
    end: Option<GroupStat>,
}

impl CounterGroup {
    /// Opens one group containing every descriptor in `descriptors`, in order.
    /// `descriptors[0]` becomes the group leader. Rolls back (closes already-opened
    /// fds) and returns the first failure if any member fails to open.
    pub fn open(descriptors: &[EventDescriptor], target: Target, config: &Config) -> Result<Self> {
        let mut fds: Vec<File> = Vec::with_capacity(descriptors.len());
        let mut ids: Vec<u64> = Vec::with_capacity(descriptors.len());

        for (index, descriptor) in descriptors.iter().enumerate() {
            let mut attr = Attr { type_: descriptor.pmu_type, size: size_of::<Attr>() as u32, ..Attr::default() };
            attr.config = descriptor.event_id;
            attr.config1 = descriptor.event_id_ext[0];
            attr.config2 = descriptor.event_id_ext[1];
            attr.read_format = READ_FORMAT;
            attr.set_inherit(config.include_child_threads);
            attr.set_exclude_user(!config.include_user);
            attr.set_exclude_kernel(!config.include_kernel);
            attr.set_exclude_hv(!config.include_hypervisor);
            attr.set_exclude_idle(!config.include_idle);
            attr.set_exclude_guest(!config.include_guest);
            attr.set_disabled(index == 0);

            let group_fd = match fds.first() {
                Some(leader) => leader.as_raw_fd(),
                None => -1,
            };
            match perf_event_open(&attr, target.pid, target.cpu, group_fd, b::PERF_FLAG_FD_CLOEXEC) {
                Ok(fd) => {
                    let mut id: u64 = 0;
                    ioctl_argp(&fd, b::PERF_EVENT_IOC_ID, &mut id).map_err(Error::OpenFailed)?;
                    fds.push(fd);
                    ids.push(id);
                }
                Err(source) => {
                    // Dropping `fds` here closes every fd already opened for this group.
                    return Err(Error::OpenFailed(source));
                }
            }
        }

        log::debug!("group opened with {} member(s)", fds.len());
        Ok(Self { fds, ids, start: None, end: None })
    }

    fn grouped_read(&self) -> Result<GroupStat> {
        let mut buf = vec![0u8; GroupStat::buf_size(self.fds.len())];
        let leader = &self.fds[0];
        let got = read(leader, &mut buf).map_err(Error::OpenFailed)?;
        if got < buf.len() {
            return Err(Error::ReadTruncated { expected: buf.len(), got });
        }
        Ok(GroupStat::decode(&buf))
    }

    /// Resets counts to zero, enables every member, and snapshots the starting values.
    pub fn start(&mut self) -> Result<()> {
        let leader = &self.fds[0];
        ioctl_arg(leader, b::PERF_EVENT_IOC_RESET, b::PERF_IOC_FLAG_GROUP).map_err(Error::OpenFailed)?;
        ioctl_arg(leader, b::PERF_EVENT_IOC_ENABLE, b::PERF_IOC_FLAG_GROUP).map_err(Error::OpenFailed)?;
        self.start = Some(self.grouped_read()?);
        Ok(())
    }

    /// Snapshots the ending values and disables every member.
    pub fn stop(&mut self) -> Result<()> {
        self.end = Some(self.grouped_read()?);
        let leader = &self.fds[0];
        ioctl_arg(leader, b::PERF_EVENT_IOC_DISABLE, b::PERF_IOC_FLAG_GROUP).map_err(Error::OpenFailed)?;
        Ok(())
    }

    /// Closes every fd in the group. Idempotent: a closed group simply has no
    /// fds left to close. A descriptor that the kernel has already invalidated
    /// out from under us is logged rather than propagated, since the group is
    /// being torn down regardless.
    pub fn close(&mut self) {
        for fd in self.fds.drain(..) {
            if let Err(source) = syscall::close(fd) {
                log::error!("closing counter group member fd failed: {source}");
            }
        }
    }

    /// Multiplexing-corrected delta per member, in the order passed to [`Self::open`].
    ///
    /// Members are matched between the start and end snapshot by kernel-assigned id,
    /// not by position. A member whose id is missing from either snapshot is
    /// unavailable and comes back as `None` rather than a zero or an error.
    ///
    /// If the kernel never scheduled the group (`time_running` delta is zero, which
    /// happens when the group never ran, e.g. monitoring an already-exited process),
    /// every available delta is clamped to `0.0` rather than dividing by zero.
    pub fn deltas(&self) -> Result<Vec<Option<f64>>> {
        let start = self.start.as_ref().ok_or(Error::StateInvalid("group has not been started"))?;
        let end = self.end.as_ref().ok_or(Error::StateInvalid("group has not been stopped"))?;

        let enabled_delta = end.time_enabled.saturating_sub(start.time_enabled) as f64;
        let running_delta = end.time_running.saturating_sub(start.time_running) as f64;
        let scale = if running_delta == 0.0 { 0.0 } else { enabled_delta / running_delta };

        Ok(self
            .ids
            .iter()
            .map(|&id| {
                let s = start.value_for_id(id)?;
                let e = end.value_for_id(id)?;
                Some(if scale == 0.0 { 0.0 } else { (e.saturating_sub(s) as f64) * scale })
            })
            .collect())
    }
}

#[cfg(test)]
mod test {
    use std::os::fd::FromRawFd;

    use super::*;

    #[test]
    fn group_stat_buf_size_matches_layout() {
        assert_eq!(GroupStat::buf_size(0), 24);
        assert_eq!(GroupStat::buf_size(3), 24 + 48);
    }

    #[test]
    fn group_stat_decode_round_trips() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&2u64.to_ne_bytes()); // nr
        buf.extend_from_slice(&1000u64.to_ne_bytes()); // time_enabled
        buf.extend_from_slice(&800u64.to_ne_bytes()); // time_running
        buf.extend_from_slice(&42u64.to_ne_bytes()); // value[0]
        buf.extend_from_slice(&1u64.to_ne_bytes()); // id[0]
        buf.extend_from_slice(&7u64.to_ne_bytes()); // value[1]
        buf.extend_from_slice(&2u64.to_ne_bytes()); // id[1]

        let stat = GroupStat::decode(&buf);
        assert_eq!(stat.time_enabled, 1000);
        assert_eq!(stat.time_running, 800);
        assert_eq!(stat.values, vec![(1, 42), (2, 7)]);
    }

    #[test]
    fn deltas_clamp_to_zero_when_never_scheduled() {
        let group = CounterGroup {
            fds: vec![],
            ids: vec![1, 2],
            start: Some(GroupStat { time_enabled: 100, time_running: 0, values: vec![(1, 0), (2, 0)] }),
            end: Some(GroupStat { time_enabled: 200, time_running: 0, values: vec![(1, 5), (2, 9)] }),
        };
        assert_eq!(group.deltas().unwrap(), vec![Some(0.0), Some(0.0)]);
    }

    #[test]
    fn close_logs_rather_than_panics_on_an_already_invalid_fd() {
        env_logger::try_init().ok();
        let mut group = CounterGroup {
            fds: vec![unsafe { File::from_raw_fd(-1) }],
            ids: vec![],
            start: None,
            end: None,
        };
        group.close();
        assert!(group.fds.is_empty());
    }

    #[test]
    fn deltas_apply_multiplexing_correction() {
        let group = CounterGroup {
            fds: vec![],
            ids: vec![1],
            start: Some(GroupStat { time_enabled: 0, time_running: 0, values: vec![(1, 0)] }),
            end: Some(GroupStat { time_enabled: 1000, time_running: 500, values: vec![(1, 100)] }),
        };
        // Counter ran half the time it was enabled, so scale its count by 2x.
        assert_eq!(group.deltas().unwrap(), vec![Some(200.0)]);
    }

    #[test]
    fn deltas_are_unavailable_when_id_is_missing_from_a_snapshot() {
        let group = CounterGroup {
            fds: vec![],
            ids: vec![1, 2],
            start: Some(GroupStat { time_enabled: 0, time_running: 0, values: vec![(1, 0), (2, 0)] }),
            // id 2 dropped out of the end snapshot.
            end: Some(GroupStat { time_enabled: 1000, time_running: 1000, values: vec![(1, 50)] }),
        };
        assert_eq!(group.deltas().unwrap(), vec![Some(50.0), None]);
    }
}
