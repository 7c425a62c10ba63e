// Reduction rule shared by aggregators and the merger

use std::collections::HashMap;

/// Running summary of every observation seen for one station
///
/// There is no empty aggregate: a station without observations is simply absent
/// from its `StationMap`, so `count >= 1` and `min <= max` always hold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aggregate {
    pub sum: f64,
    pub count: u64,
    pub min: f64,
    pub max: f64,
}

/// Station name to aggregate, owned by exactly one worker or by the merger
pub type StationMap = HashMap<String, Aggregate>;

impl Aggregate {
    /// Aggregate of a single observation
    pub fn new(value: f64) -> Self {
        Self {
            sum: value,
            count: 1,
            min: value,
            max: value,
        }
    }

    /// Fold one more observation in place
    #[inline]
    pub fn observe(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
        if value < self.min {
            self.min = value;
        }
        if value > self.max {
            self.max = value;
        }
    }

    /// Fold another aggregate in place
    #[inline]
    pub fn merge(&mut self, other: &Aggregate) {
        self.sum += other.sum;
        self.count += other.count;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }

    /// Associative, commutative combination of two aggregates
    pub fn combine(mut self, other: &Aggregate) -> Aggregate {
        self.merge(other);
        self
    }

    pub fn mean(&self) -> f64 {
        self.sum / self.count as f64
    }
}

/// Record one observation for `station`, allocating the key only on first sight
#[inline]
pub fn observe_into(map: &mut StationMap, station: &str, value: f64) {
    match map.get_mut(station) {
        Some(aggregate) => aggregate.observe(value),
        None => {
            map.insert(station.to_owned(), Aggregate::new(value));
        }
    }
}

/// Drain `from` into `into` with the reduction rule
///
/// Keys are moved, never cloned, so the cost is proportional to the number of
/// distinct stations in `from`.
pub fn merge_maps(into: &mut StationMap, from: StationMap) {
    if into.is_empty() {
        *into = from;
        return;
    }
    for (station, aggregate) in from {
        into.entry(station)
            .and_modify(|existing| existing.merge(&aggregate))
            .or_insert(aggregate);
    }
}
