use std::collections::HashMap;

use crate::catalog::Catalog;
use crate::config::{All, Config, Cpu, Proc};
use crate::counter::{finalize, CounterResult, EventCounter};
use crate::error::Result;

/// Runs the same [`EventCounter`] template over several targets at once and
/// reports results either per-instance or summed across all of them.
///
/// Summation always happens on raw counter deltas before any metric is
/// derived from them: a ratio metric computed from the sum of its inputs is
/// not the same number as the average of each instance's own ratio, and only
/// the former is meaningful across threads/processes/CPUs that ran unevenly.
pub struct FanOut<'c> {
    counters: Vec<EventCounter<'c>>,
}

impl<'c> FanOut<'c> {
    fn new(counters: Vec<EventCounter<'c>>) -> Self {
        Self { counters }
    }

    /// One independently-configured [`EventCounter`] per thread id `0..num_threads`,
    /// targeting `Proc::CURRENT` (`pid=0`, "the calling thread").
    ///
    /// That target only resolves to the right thread if `open`/`start` runs on the
    /// worker thread itself, not on whichever thread calls [`Self::start`]: use
    /// [`Self::instances_mut`] and drive each instance from inside its own spawned
    /// thread. [`Self::start`]/[`Self::stop`] are for the CPU-wide and PID-wide
    /// fan-outs, which are legitimately coordinator-driven.
    pub fn per_thread(catalog: &'c Catalog, config: Config, num_threads: u16) -> Self {
        let counters = (0..num_threads).map(|_| EventCounter::new(catalog, Proc::CURRENT, config.clone())).collect();
        Self::new(counters)
    }

    /// One [`EventCounter`] per process id in `process_ids`.
    pub fn per_process(catalog: &'c Catalog, config: Config, process_ids: &[u32]) -> Self {
        let counters = process_ids.iter().map(|&pid| EventCounter::new(catalog, Proc(pid), config.clone())).collect();
        Self::new(counters)
    }

    /// One [`EventCounter`] per CPU id in `cpu_ids`, each recording every thread
    /// scheduled onto that CPU.
    pub fn per_cpu(catalog: &'c Catalog, config: Config, cpu_ids: &[u32]) -> Self {
        let counters = cpu_ids.iter().map(|&cpu| EventCounter::new(catalog, (All, Cpu(cpu)), config.clone())).collect();
        Self::new(counters)
    }

    /// Applies `add` to every instance, in order. All instances must resolve the
    /// same names to the same groups for [`Self::result`]'s summation to line up;
    /// callers should add identical sequences of names to each.
    pub fn add_all<'a>(&mut self, names: impl IntoIterator<Item = &'a str> + Clone) -> Result<()> {
        for counter in &mut self.counters {
            counter.add_all(names.clone())?;
        }
        Ok(())
    }

    /// Starts every instance from the calling thread. Correct for CPU-wide and
    /// PID-wide fan-outs; a per-thread fan-out must instead drive its instances
    /// from inside their own worker threads via [`Self::instances_mut`].
    pub fn start(&mut self) -> Result<()> {
        for counter in &mut self.counters {
            counter.start()?;
        }
        Ok(())
    }

    /// Stops every instance from the calling thread. See [`Self::start`].
    pub fn stop(&mut self) -> Result<()> {
        let mut first_error = None;
        for counter in &mut self.counters {
            if let Err(err) = counter.stop() {
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Per-instance access for fan-outs that must be driven from inside their
    /// own worker threads (see [`Self::per_thread`]). Callers typically use
    /// `std::thread::scope` to spawn one thread per element and call
    /// `add`/`start`/`stop` on that thread's own `&mut EventCounter`.
    pub fn instances_mut(&mut self) -> &mut [EventCounter<'c>] {
        &mut self.counters
    }

    pub fn result_of(&self, index: usize, normalization: u64) -> Result<CounterResult> {
        self.counters[index].result(normalization)
    }

    /// Sums each counter's raw delta across every instance, then derives metrics
    /// from the summed values (never from the per-instance metric results).
    pub fn result(&self, normalization: u64) -> Result<CounterResult> {
        let Some(template) = self.counters.first() else {
            return Ok(CounterResult::default());
        };

        let mut summed: HashMap<String, f64> = HashMap::new();
        for counter in &self.counters {
            for (name, value) in counter.raw_values()? {
                *summed.entry(name).or_insert(0.0) += value;
            }
        }

        Ok(finalize(template.catalog(), template.events(), &summed, normalization.max(1) as f64))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn empty_fan_out_yields_empty_result() {
        let catalog = Catalog::new();
        let fan_out = FanOut::per_thread(&catalog, Config::default(), 0);
        assert!(fan_out.result(1).unwrap().is_empty());
    }

    /// Needs `CAP_PERFMON`/`CAP_SYS_ADMIN` or a permissive `perf_event_paranoid`.
    /// Skips rather than fails when the environment denies `perf_event_open`.
    #[test]
    fn per_thread_instances_are_started_from_their_own_worker_thread() {
        env_logger::try_init().ok();
        let catalog = Catalog::new();
        let mut fan_out = FanOut::per_thread(&catalog, Config::default(), 3);
        fan_out.add_all(["cycles"]).unwrap();

        let denied = std::sync::atomic::AtomicBool::new(false);
        std::thread::scope(|scope| {
            for counter in fan_out.instances_mut() {
                scope.spawn(|| {
                    if let Err(err) = counter.start() {
                        log::warn!("skipping live PMU test, perf_event_open denied: {err}");
                        denied.store(true, std::sync::atomic::Ordering::Relaxed);
                        return;
                    }
                    std::hint::black_box((0..10_000u64).sum::<u64>());
                    counter.stop().unwrap();
                });
            }
        });
        if denied.load(std::sync::atomic::Ordering::Relaxed) {
            return;
        }

        let result = fan_out.result(1).unwrap();
        assert!(result.get("cycles").is_some());
    }
}
