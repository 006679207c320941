mod metric;

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

pub use metric::Metric;
use metric::built_in_metrics;

use crate::ffi::bindings as b;

/// `(pmu_type, event_id, event_id_ext)` as passed to `perf_event_open`'s attr struct.
///
/// Immutable once registered; identity is by the catalog name it was registered under,
/// not by this struct's contents.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EventDescriptor {
    pub pmu_type: u32,
    pub event_id: u64,
    pub event_id_ext: [u64; 2],
}

impl EventDescriptor {
    const fn hw(id: u64) -> Self {
        Self { pmu_type: b::PERF_TYPE_HARDWARE, event_id: id, event_id_ext: [0, 0] }
    }

    const fn sw(id: u64) -> Self {
        Self { pmu_type: b::PERF_TYPE_SOFTWARE, event_id: id, event_id_ext: [0, 0] }
    }

    const fn cache(cache: u64, op: u64, result: u64) -> Self {
        Self {
            pmu_type: b::PERF_TYPE_HW_CACHE,
            event_id: cache | (op << 8) | (result << 16),
            event_id_ext: [0, 0],
        }
    }
}

/// Mapping from human-readable event name to [`EventDescriptor`], plus derived metrics.
///
/// Populated with a built-in set at construction; extendable at runtime or from a
/// CSV-style file. Name collisions replace by last write. The catalog owns its metric
/// objects for as long as it exists; counters and samplers only ever borrow from it.
pub struct Catalog {
    events: HashMap<String, EventDescriptor>,
    metrics: HashMap<String, Metric>,
}

impl Default for Catalog {
    fn default() -> Self {
        let mut catalog = Self { events: HashMap::with_capacity(64), metrics: HashMap::with_capacity(16) };
        catalog.add_built_in_events();
        for metric in built_in_metrics() {
            catalog.add_metric(metric);
        }
        catalog
    }
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers or overwrites an event descriptor under `name`.
    pub fn add(&mut self, name: impl Into<String>, descriptor: EventDescriptor) {
        self.events.insert(name.into(), descriptor);
    }

    /// Registers or overwrites a metric under its own name.
    pub fn add_metric(&mut self, metric: Metric) {
        self.metrics.insert(metric.name().to_owned(), metric);
    }

    pub fn lookup_event(&self, name: &str) -> Option<EventDescriptor> {
        self.events.get(name).copied()
    }

    pub fn is_metric(&self, name: &str) -> bool {
        self.metrics.contains_key(name)
    }

    pub fn lookup_metric(&self, name: &str) -> Option<&Metric> {
        self.metrics.get(name)
    }

    /// Parses `name,value` lines, `value` as `0x`-prefixed hex or decimal.
    ///
    /// Lines with an empty name or a zero event ID are skipped silently, as are
    /// malformed lines (no comma, unparseable value) and anything past the first
    /// two comma-separated fields.
    pub fn load_from_file(&mut self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let file = File::open(path)?;
        for line in BufReader::new(file).lines() {
            let line = line?;
            let mut fields = line.splitn(2, ',');
            let (Some(name), Some(raw_value)) = (fields.next(), fields.next()) else {
                continue;
            };
            if name.is_empty() {
                continue;
            }
            let event_id = if let Some(hex) = raw_value.strip_prefix("0x") {
                u64::from_str_radix(hex, 16).ok()
            } else {
                raw_value.parse::<u64>().ok()
            };
            let Some(event_id) = event_id else { continue };
            if event_id == 0 {
                continue;
            }
            self.add(name, EventDescriptor { pmu_type: b::PERF_TYPE_RAW, event_id, event_id_ext: [0, 0] });
        }
        Ok(())
    }

    fn add_built_in_events(&mut self) {
        use b::*;
        self.add("instructions", EventDescriptor::hw(PERF_COUNT_HW_INSTRUCTIONS));
        self.add("cycles", EventDescriptor::hw(PERF_COUNT_HW_CPU_CYCLES));
        self.add("cpu-cycles", EventDescriptor::hw(PERF_COUNT_HW_CPU_CYCLES));
        self.add("bus-cycles", EventDescriptor::hw(PERF_COUNT_HW_BUS_CYCLES));
        self.add("cache-misses", EventDescriptor::hw(PERF_COUNT_HW_CACHE_MISSES));
        self.add("cache-references", EventDescriptor::hw(PERF_COUNT_HW_CACHE_REFERENCES));
        self.add("branches", EventDescriptor::hw(PERF_COUNT_HW_BRANCH_INSTRUCTIONS));
        self.add("branch-instructions", EventDescriptor::hw(PERF_COUNT_HW_BRANCH_INSTRUCTIONS));
        self.add("branch-misses", EventDescriptor::hw(PERF_COUNT_HW_BRANCH_MISSES));
        self.add("stalled-cycles-backend", EventDescriptor::hw(PERF_COUNT_HW_STALLED_CYCLES_BACKEND));
        self.add("idle-cycles-backend", EventDescriptor::hw(PERF_COUNT_HW_STALLED_CYCLES_BACKEND));
        self.add("stalled-cycles-frontend", EventDescriptor::hw(PERF_COUNT_HW_STALLED_CYCLES_FRONTEND));
        self.add("idle-cycles-frontend", EventDescriptor::hw(PERF_COUNT_HW_STALLED_CYCLES_FRONTEND));

        self.add("cpu-clock", EventDescriptor::sw(PERF_COUNT_SW_CPU_CLOCK));
        self.add("task-clock", EventDescriptor::sw(PERF_COUNT_SW_TASK_CLOCK));
        self.add("page-faults", EventDescriptor::sw(PERF_COUNT_SW_PAGE_FAULTS));
        self.add("faults", EventDescriptor::sw(PERF_COUNT_SW_PAGE_FAULTS));
        self.add("major-faults", EventDescriptor::sw(PERF_COUNT_SW_PAGE_FAULTS_MAJ));
        self.add("minor-faults", EventDescriptor::sw(PERF_COUNT_SW_PAGE_FAULTS_MIN));
        self.add("alignment-faults", EventDescriptor::sw(PERF_COUNT_SW_ALIGNMENT_FAULTS));
        self.add("emulation-faults", EventDescriptor::sw(PERF_COUNT_SW_EMULATION_FAULTS));
        self.add("context-switches", EventDescriptor::sw(PERF_COUNT_SW_CONTEXT_SWITCHES));
        self.add("cpu-migrations", EventDescriptor::sw(PERF_COUNT_SW_CPU_MIGRATIONS));
        self.add("migrations", EventDescriptor::sw(PERF_COUNT_SW_CPU_MIGRATIONS));
        self.add("bpf-output", EventDescriptor::sw(PERF_COUNT_SW_BPF_OUTPUT));
        self.add("cgroup-switches", EventDescriptor::sw(PERF_COUNT_SW_CGROUP_SWITCHES));

        let access = PERF_COUNT_HW_CACHE_RESULT_ACCESS;
        let miss = PERF_COUNT_HW_CACHE_RESULT_MISS;
        let read = PERF_COUNT_HW_CACHE_OP_READ;
        self.add("L1-dcache-loads", EventDescriptor::cache(PERF_COUNT_HW_CACHE_L1D, read, access));
        self.add("L1-dcache-load-misses", EventDescriptor::cache(PERF_COUNT_HW_CACHE_L1D, read, miss));
        self.add("L1-icache-loads", EventDescriptor::cache(PERF_COUNT_HW_CACHE_L1I, read, access));
        self.add("L1-icache-load-misses", EventDescriptor::cache(PERF_COUNT_HW_CACHE_L1I, read, miss));
        self.add("dTLB-loads", EventDescriptor::cache(PERF_COUNT_HW_CACHE_DTLB, read, access));
        self.add("dTLB-load-misses", EventDescriptor::cache(PERF_COUNT_HW_CACHE_DTLB, read, miss));
        self.add("iTLB-loads", EventDescriptor::cache(PERF_COUNT_HW_CACHE_ITLB, read, access));
        self.add("iTLB-load-misses", EventDescriptor::cache(PERF_COUNT_HW_CACHE_ITLB, read, miss));
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write;

    #[test]
    fn built_in_lookup_round_trips() {
        let catalog = Catalog::new();
        assert_eq!(
            catalog.lookup_event("instructions"),
            Some(EventDescriptor::hw(b::PERF_COUNT_HW_INSTRUCTIONS))
        );
        assert!(catalog.is_metric("cycles-per-instruction"));
        assert!(catalog.lookup_event("does-not-exist").is_none());
    }

    #[test]
    fn add_then_lookup_round_trips() {
        let mut catalog = Catalog::new();
        let descriptor = EventDescriptor { pmu_type: b::PERF_TYPE_RAW, event_id: 0x1234, event_id_ext: [0, 0] };
        catalog.add("my-event", descriptor);
        assert_eq!(catalog.lookup_event("my-event"), Some(descriptor));
    }

    #[test]
    fn csv_load_skips_malformed_and_zero_lines() {
        let path = std::env::temp_dir().join(format!("perfscope-catalog-test-{}.csv", std::process::id()));
        File::create(&path)
            .unwrap()
            .write_all(b"first,0x2a\nsecond,42\n,99\nthird,0\nnocomma\n")
            .unwrap();

        let mut catalog = Catalog::new();
        catalog.load_from_file(&path).unwrap();
        let _ = std::fs::remove_file(&path);

        assert_eq!(
            catalog.lookup_event("first"),
            Some(EventDescriptor { pmu_type: b::PERF_TYPE_RAW, event_id: 0x2a, event_id_ext: [0, 0] })
        );
        assert_eq!(
            catalog.lookup_event("second"),
            Some(EventDescriptor { pmu_type: b::PERF_TYPE_RAW, event_id: 42, event_id_ext: [0, 0] })
        );
        assert!(catalog.lookup_event("third").is_none());
    }
}
