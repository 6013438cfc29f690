// Copyright (C) 2025 Michael Herstine <sp1ff@pobox.com>
//
// This file is part of agora.
//
// agora is free software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// agora is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without
// even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU
// General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with agora.  If not,
// see <http://www.gnu.org/licenses/>.

//! # agora metrics
//!
//! agora reports through [OpenTelemetry] "instruments". Rather than keep a field per instrument on
//! the engine, each metric is registered by name next to the code that bumps it:
//!
//! [OpenTelemetry]: https://docs.rs/opentelemetry/latest/opentelemetry/index.html
//!
//! ```ignore
//! inventory::submit! { metrics::Registration::new("votes.cast", Sort::IntegralCounter) }
//! // ...
//! counter_add!(self.instruments, "votes.cast", 1, &[]);
//! ```
//!
//! [Instruments::new] walks the [inventory] of registrations, builds every instrument up-front &
//! panics on a duplicate name. Looking up an unregistered name, or the wrong sort of instrument,
//! also panics; those are logic errors, not runtime conditions.
//!
//! OTel instruments are write-only, which is awkward for the simulator (which wants to print what
//! happened) & for tests (which want to assert on it), so [Instruments] also keeps a running total
//! per counter, available through [Instruments::total].

use std::{
    collections::{HashMap, HashSet, hash_map::Entry},
    sync::atomic::{AtomicU64, Ordering},
};

use opentelemetry::{
    KeyValue, global,
    metrics::{Counter, Gauge},
};

/// Instrument type
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Sort {
    /// Corresponds to `Counter<u64>`
    IntegralCounter,
    /// `Gauge<u64>`
    IntegralGauge,
}

/// The type of thing being inventoried
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Registration {
    name: &'static str,
    sort: Sort,
}

impl Registration {
    pub const fn new(name: &'static str, sort: Sort) -> Registration {
        Registration { name, sort }
    }
    pub fn name(&self) -> &'static str {
        self.name
    }
    pub fn sort(&self) -> Sort {
        self.sort
    }
}

inventory::collect!(Registration);

/// Panic if two registrations share a name
pub fn check_metric_registrations() {
    let mut names: HashSet<&'static str> = HashSet::new();
    inventory::iter::<Registration>.into_iter().for_each(|reg| {
        if !names.insert(reg.name()) {
            panic!("The metric name {} was registered twice", reg.name());
        }
    });
}

enum Instrument {
    CounterU64(Counter<u64>, AtomicU64),
    GaugeU64(Gauge<u64>, AtomicU64),
}

/// Container for OTel instruments
pub struct Instruments {
    map: HashMap<&'static str, Instrument>,
}

impl Instruments {
    pub fn new(prefix: &'static str) -> Instruments {
        let meter = global::meter(prefix);
        let mut map: HashMap<&'static str, Instrument> = HashMap::new();
        inventory::iter::<Registration>.into_iter().for_each(|reg| {
            match map.entry(reg.name()) {
                Entry::Occupied(_) => panic!("The metric name {} was used twice", reg.name()),
                Entry::Vacant(vacant) => {
                    vacant.insert(match reg.sort() {
                        Sort::IntegralCounter => Instrument::CounterU64(
                            meter.u64_counter(reg.name()).build(),
                            AtomicU64::new(0),
                        ),
                        Sort::IntegralGauge => Instrument::GaugeU64(
                            meter.u64_gauge(reg.name()).build(),
                            AtomicU64::new(0),
                        ),
                    });
                }
            }
        });
        Instruments { map }
    }
    // panics if `name` doesn't name a counter
    pub fn add(&self, name: &str, count: u64, attributes: &[KeyValue]) {
        if let Some(Instrument::CounterU64(c, total)) = self.map.get(name) {
            c.add(count, attributes);
            total.fetch_add(count, Ordering::Relaxed);
        } else {
            panic!("{} does not name a counter", name);
        }
    }
    // panics if `name` doesn't name a gauge
    pub fn recordu(&self, name: &str, value: u64, attributes: &[KeyValue]) {
        if let Some(Instrument::GaugeU64(g, last)) = self.map.get(name) {
            g.record(value, attributes);
            last.store(value, Ordering::Relaxed);
        } else {
            panic!("{} does not name a gauge", name);
        }
    }
    /// For a counter, the sum of everything added to it (regardless of attributes) since this
    /// [Instruments] was created; for a gauge, the last value recorded. None if `name` isn't
    /// registered.
    pub fn total(&self, name: &str) -> Option<u64> {
        self.map.get(name).map(|instr| match instr {
            Instrument::CounterU64(_, total) => total.load(Ordering::Relaxed),
            Instrument::GaugeU64(_, last) => last.load(Ordering::Relaxed),
        })
    }
    /// Every registered metric with its [total](Instruments::total), sorted by name
    pub fn totals(&self) -> Vec<(&'static str, u64)> {
        let mut totals: Vec<(&'static str, u64)> = self
            .map
            .iter()
            .map(|(name, instr)| {
                (
                    *name,
                    match instr {
                        Instrument::CounterU64(_, total) => total.load(Ordering::Relaxed),
                        Instrument::GaugeU64(_, last) => last.load(Ordering::Relaxed),
                    },
                )
            })
            .collect();
        totals.sort_by_key(|(name, _)| *name);
        totals
    }
}

impl Default for Instruments {
    fn default() -> Self {
        Instruments::new("agora")
    }
}

#[macro_export]
macro_rules! counter_add {
    ($instr:expr, $name:expr, $count:expr, $attrs:expr) => {
        $instr.add($name, $count, $attrs);
    };
}

#[macro_export]
macro_rules! gauge_setu {
    ($instr:expr, $name:expr, $value:expr, $attrs:expr) => {
        $instr.recordu($name, $value, $attrs);
    };
}
