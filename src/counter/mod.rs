use std::collections::HashMap;

use crate::catalog::{Catalog, EventDescriptor};
use crate::config::{Config, Target};
use crate::error::{Error, Result};
use crate::group::CounterGroup;

/// One requested name: either a real counter (backed by a group member) or a
/// metric (computed from other counters' values, possibly hidden ones).
pub(crate) struct Event {
    name: String,
    is_hidden: bool,
    is_counter: bool,
    group_id: usize,
    in_group_id: usize,
}

/// An ordered set of named values produced by [`EventCounter::result`].
///
/// Iteration order matches the order names were added, minus any counters
/// added only as a hidden dependency of a metric.
#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CounterResult {
    entries: Vec<(String, f64)>,
}

impl CounterResult {
    fn push(&mut self, name: impl Into<String>, value: f64) {
        self.entries.push((name.into(), value));
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, v)| *v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Counts named events and metrics over one target, opening as many groups
/// as `max_groups` allows and splitting counters across them as they fill up.
///
/// Borrows a [`Catalog`] for the lifetime of the measurement; names are
/// resolved against it at `add` time, not at `result` time.
pub struct EventCounter<'c> {
    catalog: &'c Catalog,
    target: Target,
    config: Config,
    counters: Vec<Event>,
    pending: Vec<Vec<EventDescriptor>>,
    groups: Vec<CounterGroup>,
}

impl<'c> EventCounter<'c> {
    pub fn new(catalog: &'c Catalog, target: impl Into<Target>, config: Config) -> Self {
        Self { catalog, target: target.into(), config, counters: Vec::new(), pending: Vec::new(), groups: Vec::new() }
    }

    /// Adds a counter or metric by name, or (with an empty name) forces the next
    /// counter into a fresh group.
    ///
    /// Adding an already-present name just widens its visibility: a counter added
    /// again non-hidden after having been added hidden (as a metric dependency)
    /// becomes visible in [`Self::result`].
    pub fn add(&mut self, name: &str) -> Result<()> {
        if name.is_empty() {
            return self.close_group();
        }

        if let Some(descriptor) = self.catalog.lookup_event(name) {
            return self.add_counter(name, descriptor, false);
        }

        if self.catalog.is_metric(name) {
            let metric = self.catalog.lookup_metric(name).expect("is_metric implies lookup_metric");
            for dependency in metric.required_event_names() {
                let descriptor =
                    self.catalog.lookup_event(dependency).ok_or_else(|| Error::CatalogMiss((*dependency).to_owned()))?;
                self.add_counter(dependency, descriptor, true)?;
            }
            if let Some(existing) = self.counters.iter_mut().find(|event| event.name == name) {
                existing.is_hidden &= false;
                return Ok(());
            }
            self.counters.push(Event { name: name.to_owned(), is_hidden: false, is_counter: false, group_id: 0, in_group_id: 0 });
            return Ok(());
        }

        Err(Error::CatalogMiss(name.to_owned()))
    }

    pub fn add_all<'a>(&mut self, names: impl IntoIterator<Item = &'a str>) -> Result<()> {
        for name in names {
            self.add(name)?;
        }
        Ok(())
    }

    fn close_group(&mut self) -> Result<()> {
        if self.pending.last().map_or(true, Vec::is_empty) {
            return Ok(());
        }
        if self.pending.len() < self.config.max_groups as usize {
            self.pending.push(Vec::new());
            Ok(())
        } else {
            Err(Error::CapacityExceeded { max_groups: self.config.max_groups, max_counters_per_group: self.config.max_counters_per_group() })
        }
    }

    fn add_counter(&mut self, name: &str, descriptor: EventDescriptor, is_hidden: bool) -> Result<()> {
        if let Some(existing) = self.counters.iter_mut().find(|event| event.name == name) {
            existing.is_hidden &= is_hidden;
            return Ok(());
        }

        let max_per_group = self.config.max_counters_per_group() as usize;
        let group_full = self.pending.last().map_or(true, |g| g.len() >= max_per_group);
        if self.pending.len() as u32 == self.config.max_groups && group_full {
            return Err(Error::CapacityExceeded { max_groups: self.config.max_groups, max_counters_per_group: self.config.max_counters_per_group() });
        }
        if group_full {
            self.pending.push(Vec::new());
        }

        let group_id = self.pending.len() - 1;
        let in_group_id = self.pending[group_id].len();
        self.counters.push(Event { name: name.to_owned(), is_hidden, is_counter: true, group_id, in_group_id });
        self.pending[group_id].push(descriptor);
        Ok(())
    }

    /// Opens every pending group and enables them. On any failure, nothing opened
    /// so far is kept open: the partially-built groups are dropped, closing their
    /// file descriptors, and the counter can be retried or abandoned cleanly.
    pub fn start(&mut self) -> Result<()> {
        if !self.groups.is_empty() {
            return Err(Error::StateInvalid("counter already started"));
        }

        let mut opened = Vec::with_capacity(self.pending.len());
        for descriptors in &self.pending {
            opened.push(CounterGroup::open(descriptors, self.target, &self.config)?);
        }
        for group in &mut opened {
            group.start()?;
        }

        self.groups = opened;
        Ok(())
    }

    /// Snapshots and disables every group, then closes their file descriptors.
    /// Returns the first error encountered, if any, but still attempts every group.
    pub fn stop(&mut self) -> Result<()> {
        let mut first_error = None;
        for group in &mut self.groups {
            if let Err(err) = group.stop() {
                first_error.get_or_insert(err);
            }
        }
        for group in &mut self.groups {
            group.close();
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub(crate) fn raw_values(&self) -> Result<HashMap<String, f64>> {
        let mut raw = HashMap::with_capacity(self.counters.len());
        for event in &self.counters {
            if event.is_counter {
                let deltas = self.groups[event.group_id].deltas()?;
                if let Some(value) = deltas[event.in_group_id] {
                    raw.insert(event.name.clone(), value);
                }
            }
        }
        Ok(raw)
    }

    pub(crate) fn events(&self) -> &[Event] {
        &self.counters
    }

    pub(crate) fn catalog(&self) -> &Catalog {
        self.catalog
    }

    /// Computes the result of the measurement: every non-hidden counter plus every
    /// metric whose dependencies were all resolved, normalized by dividing each raw
    /// counter value by `normalization` before metrics are derived from it.
    pub fn result(&self, normalization: u64) -> Result<CounterResult> {
        let raw = self.raw_values()?;
        Ok(finalize(self.catalog, &self.counters, &raw, normalization.max(1) as f64))
    }
}

/// Shared by [`EventCounter::result`] and the fan-out aggregations in
/// [`crate::fanout`]: turns a raw per-counter-name value map into the ordered,
/// hidden-filtered, metric-augmented result.
pub(crate) fn finalize(catalog: &Catalog, events: &[Event], raw: &HashMap<String, f64>, normalization: f64) -> CounterResult {
    let normalized: HashMap<String, f64> = raw.iter().map(|(name, value)| (name.clone(), value / normalization)).collect();

    let mut result = CounterResult::default();
    for event in events {
        if event.is_counter {
            if !event.is_hidden {
                if let Some(&value) = normalized.get(&event.name) {
                    result.push(event.name.clone(), value);
                }
            }
        } else if let Some(metric) = catalog.lookup_metric(&event.name) {
            if let Some(value) = metric.compute(&normalized) {
                result.push(event.name.clone(), value);
            }
        }
    }
    result
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn counter_result_preserves_insertion_order() {
        let mut result = CounterResult::default();
        result.push("b", 2.0);
        result.push("a", 1.0);
        assert_eq!(result.iter().collect::<Vec<_>>(), vec![("b", 2.0), ("a", 1.0)]);
        assert_eq!(result.get("a"), Some(1.0));
        assert_eq!(result.get("missing"), None);
    }

    #[test]
    fn add_unknown_name_is_catalog_miss() {
        let catalog = Catalog::new();
        let mut counter = EventCounter::new(&catalog, crate::config::Proc::CURRENT, Config::default());
        assert!(matches!(counter.add("not-a-real-event"), Err(Error::CatalogMiss(_))));
    }

    #[test]
    fn metric_pulls_in_hidden_dependencies() {
        let catalog = Catalog::new();
        let mut counter = EventCounter::new(&catalog, crate::config::Proc::CURRENT, Config::default());
        counter.add("cycles-per-instruction").unwrap();
        assert_eq!(counter.counters.len(), 3); // cycles, instructions, cycles-per-instruction
        assert!(counter.counters.iter().all(|e| !e.is_counter || e.is_hidden));
    }

    #[test]
    fn re_adding_non_hidden_clears_hidden_flag() {
        let catalog = Catalog::new();
        let mut counter = EventCounter::new(&catalog, crate::config::Proc::CURRENT, Config::default());
        counter.add("cycles-per-instruction").unwrap();
        counter.add("cycles").unwrap();
        let cycles = counter.counters.iter().find(|e| e.name == "cycles").unwrap();
        assert!(!cycles.is_hidden);
    }

    #[test]
    fn capacity_exceeded_once_groups_and_members_are_full() {
        let catalog = Catalog::new();
        let config = Config { max_groups: 1, max_counters_per_group: 1, ..Config::default() };
        let mut counter = EventCounter::new(&catalog, crate::config::Proc::CURRENT, config);
        counter.add("cycles").unwrap();
        assert!(matches!(counter.add("instructions"), Err(Error::CapacityExceeded { .. })));
    }

    /// Needs `CAP_PERFMON`/`CAP_SYS_ADMIN` or a permissive `perf_event_paranoid`.
    /// Skips rather than fails when the environment denies `perf_event_open`,
    /// since this suite also runs inside unprivileged containers.
    #[test]
    fn counts_cycles_over_the_current_thread_when_pmu_access_is_available() {
        env_logger::try_init().ok();
        let catalog = Catalog::new();
        let mut counter = EventCounter::new(&catalog, crate::config::Proc::CURRENT, Config::default());
        counter.add("cycles").unwrap();

        if let Err(err) = counter.start() {
            log::warn!("skipping live PMU test, perf_event_open denied: {err}");
            return;
        }

        std::hint::black_box((0..10_000u64).sum::<u64>());
        counter.stop().unwrap();

        let result = counter.result(1).unwrap();
        assert!(result.get("cycles").is_some());
    }
}
