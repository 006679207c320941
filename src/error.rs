use std::io;

use thiserror::Error;

/// Error taxonomy for counting and sampling operations.
#[derive(Debug, Error)]
pub enum Error {
    /// An event or metric name has no entry in the catalog.
    #[error("unknown event or metric name: {0}")]
    CatalogMiss(String),

    /// Adding another counter would exceed `max_groups * max_counters_per_group`.
    #[error("capacity exceeded: max_groups={max_groups} max_counters_per_group={max_counters_per_group}")]
    CapacityExceeded {
        max_groups: u32,
        max_counters_per_group: u32,
    },

    /// `perf_event_open` failed; the whole group open this member belonged to was rolled back.
    #[error("perf_event_open failed: {0}")]
    OpenFailed(#[source] io::Error),

    /// `mmap` of the sampler ring failed; the sampler's descriptors were rolled back.
    #[error("mmap of sample ring failed: {0}")]
    MapFailed(#[source] io::Error),

    /// A grouped `read()` returned fewer bytes than the read-format implied.
    #[error("grouped read returned {got} bytes, expected at least {expected}")]
    ReadTruncated { expected: usize, got: usize },

    /// An operation was invoked in a phase that does not allow it.
    #[error("invalid state: {0}")]
    StateInvalid(&'static str),

    /// A ring record declared a size exceeding the bytes remaining in the drain.
    #[error("truncated ring record: declared size {declared} exceeds {available} bytes available")]
    DecodeShort { declared: usize, available: usize },
}

pub type Result<T> = std::result::Result<T, Error>;
