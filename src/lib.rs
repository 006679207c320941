//! In-process hardware performance counting and sampling on Linux, built
//! directly on `perf_event_open(2)`.
//!
//! ## Counting
//!
//! ```rust,no_run
//! use perfscope::catalog::Catalog;
//! use perfscope::config::{Config, Proc};
//! use perfscope::counter::EventCounter;
//!
//! let catalog = Catalog::new();
//! let mut counter = EventCounter::new(&catalog, Proc::CURRENT, Config::default());
//! counter.add("cycles-per-instruction").unwrap();
//!
//! counter.start().unwrap();
//! std::hint::black_box((0..1_000_000u64).sum::<u64>());
//! counter.stop().unwrap();
//!
//! let result = counter.result(1).unwrap();
//! println!("cycles-per-instruction: {:?}", result.get("cycles-per-instruction"));
//! ```
//!
//! ## Sampling
//!
//! ```rust,no_run
//! use perfscope::catalog::Catalog;
//! use perfscope::config::{PeriodOrFrequency, Precision, Proc, SampleConfig};
//! use perfscope::sampler::Sampler;
//!
//! let catalog = Catalog::new();
//! let mut sampler = Sampler::new(&catalog, Proc::CURRENT, SampleConfig::default());
//! sampler.trigger("cycles", Precision::Unspecified, PeriodOrFrequency::Period(4000)).unwrap();
//! sampler.values().instruction_pointer = true;
//! sampler.values().time = true;
//!
//! sampler.start().unwrap();
//! std::hint::black_box((0..1_000_000u64).sum::<u64>());
//! sampler.stop().unwrap();
//!
//! let samples = sampler.result(true).unwrap();
//! sampler.close().unwrap();
//! println!("collected {} samples", samples.len());
//! ```

pub mod catalog;
pub mod config;
pub mod counter;
pub mod error;
pub mod fanout;
mod ffi;
pub mod group;
pub mod sampler;
