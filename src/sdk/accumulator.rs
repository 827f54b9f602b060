use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::warn;

use super::{Accumulator, Collector, MetricValue, Processor, Record};

/// Monotonic integer instrument.
#[derive(Clone, Default)]
pub struct Counter(Arc<AtomicI64>);

impl Counter {
    pub fn add(&self, delta: i64) {
        self.0.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn value(&self) -> i64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Last-value float instrument.
#[derive(Clone, Default)]
pub struct Gauge(Arc<AtomicU64>);

impl Gauge {
    pub fn set(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }

    pub fn value(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }
}

enum Instrument {
    Counter(Counter),
    Gauge(Gauge),
    Collector(Arc<dyn Collector>),
}

/// Named instruments, collected in name order.
#[derive(Default)]
pub struct Registry {
    instruments: RwLock<BTreeMap<String, Instrument>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the counter registered under `name`, creating it if needed. A
    /// different instrument kind under the same name is replaced.
    pub fn counter(&self, name: &str) -> Counter {
        let mut instruments = self.instruments.write();
        if let Some(Instrument::Counter(counter)) = instruments.get(name) {
            return counter.clone();
        }
        let counter = Counter::default();
        instruments.insert(name.to_string(), Instrument::Counter(counter.clone()));
        counter
    }

    pub fn gauge(&self, name: &str) -> Gauge {
        let mut instruments = self.instruments.write();
        if let Some(Instrument::Gauge(gauge)) = instruments.get(name) {
            return gauge.clone();
        }
        let gauge = Gauge::default();
        instruments.insert(name.to_string(), Instrument::Gauge(gauge.clone()));
        gauge
    }

    /// Registers a collector under its own name. It only runs on ticks where
    /// that name is due.
    pub fn register(&self, collector: Arc<dyn Collector>) {
        self.instruments
            .write()
            .insert(collector.name().to_string(), Instrument::Collector(collector));
    }

    pub fn len(&self) -> usize {
        self.instruments.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.instruments.read().is_empty()
    }
}

impl Accumulator for Registry {
    fn collect(&self, rule: &mut dyn FnMut(&str) -> bool, processor: &mut dyn Processor) -> usize {
        let instruments = self.instruments.read();
        let mut produced = 0;

        for (name, instrument) in instruments.iter() {
            if !rule(name.as_str()) {
                continue;
            }
            match instrument {
                Instrument::Counter(counter) => {
                    processor.process(Record::new(name.as_str(), MetricValue::Integer(counter.value()), HashMap::new()));
                    produced += 1;
                }
                Instrument::Gauge(gauge) => {
                    processor.process(Record::new(name.as_str(), MetricValue::Float(gauge.value()), HashMap::new()));
                    produced += 1;
                }
                Instrument::Collector(collector) => match collector.collect() {
                    Ok(records) => {
                        produced += records.len();
                        for record in records {
                            processor.process(record);
                        }
                    }
                    Err(e) => warn!(instrument = %name, error = %e, "collector failed"),
                },
            }
        }

        produced
    }
}
