//! Counter and histogram accumulation (spec.md §3, §4.1, §8).
//!
//! Counters and histograms are owned by the Aggregator between flushes:
//! every sample updates a running total in place, and the batch worker
//! flushes a single synthetic [`MetricRecord`] per dirty key carrying the
//! *cumulative* value, never a delta. Gauges and timers are not
//! accumulated — they pass straight through the session buffer as
//! individual records.

use std::collections::BTreeMap;

use chrono::Utc;
use datacat_common::{MetricRecord, MetricType};
use serde_json::{json, Value};

use crate::session_table::sorted_tags;

/// A single metric sample submitted by a client via `POST /metric`.
#[derive(Debug, Clone)]
pub struct MetricSample {
    pub name: String,
    pub metric_type: MetricType,
    pub value: f64,
    pub delta: Option<f64>,
    pub tags: BTreeMap<String, String>,
    pub unit: Option<String>,
    pub buckets: Option<Vec<f64>>,
}

/// Identifies one accumulated counter or histogram: spec.md §3's "a
/// histogram entry is identified by the tuple (name, tag-set,
/// bucket-boundary-set)", generalized to counters by dropping the boundary
/// component.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct AccumulatorKey {
    name: String,
    tags: Vec<(String, String)>,
    boundaries: Vec<u64>,
}

impl AccumulatorKey {
    fn new(name: &str, tags: &BTreeMap<String, String>, boundaries: &[f64]) -> Self {
        Self {
            name: name.to_string(),
            tags: sorted_tags(tags),
            boundaries: boundaries.iter().map(|b| b.to_bits()).collect(),
        }
    }
}

#[derive(Debug, Clone)]
struct CounterState {
    cumulative: f64,
    unit: Option<String>,
    tags: BTreeMap<String, String>,
    dirty: bool,
}

#[derive(Debug, Clone)]
struct HistogramState {
    boundaries: Vec<f64>,
    bucket_counts: Vec<u64>,
    sum: f64,
    count: u64,
    unit: Option<String>,
    tags: BTreeMap<String, String>,
    dirty: bool,
}

impl HistogramState {
    fn record(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
        for (boundary, count) in self.boundaries.iter().zip(self.bucket_counts.iter_mut()) {
            if value <= *boundary {
                *count += 1;
            }
        }
        self.dirty = true;
    }

    fn to_record(&self, name: &str) -> MetricRecord {
        let buckets: Vec<Value> = self
            .boundaries
            .iter()
            .zip(self.bucket_counts.iter())
            .map(|(le, count)| json!({"le": le, "count": count}))
            .collect();
        MetricRecord {
            timestamp: Utc::now(),
            name: name.to_string(),
            metric_type: MetricType::Histogram,
            value: self.sum,
            tags: self.tags.clone(),
            unit: self.unit.clone(),
            metadata: Some(json!({"buckets": buckets, "sum": self.sum, "count": self.count})),
        }
    }
}

/// Per-session accumulation table for counters and histograms, plus a
/// pass-through list for the gauge/timer samples that bypass it.
#[derive(Default)]
pub struct MetricAccumulator {
    counters: BTreeMap<AccumulatorKeyOrdered, CounterState>,
    histograms: BTreeMap<AccumulatorKeyOrdered, HistogramState>,
    passthrough: Vec<MetricRecord>,
}

/// `BTreeMap` needs `Ord`; derive it on a thin wrapper rather than on
/// [`AccumulatorKey`] itself so equality/hash semantics used elsewhere stay
/// untouched.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct AccumulatorKeyOrdered(String, Vec<(String, String)>, Vec<u64>);

impl From<AccumulatorKey> for AccumulatorKeyOrdered {
    fn from(k: AccumulatorKey) -> Self {
        Self(k.name, k.tags, k.boundaries)
    }
}

impl MetricAccumulator {
    /// Feeds one sample from a client into the accumulator. Returns
    /// `true` if the sample was accumulated (counter/histogram), `false`
    /// if it was queued as a pass-through record (gauge/timer).
    pub fn record(&mut self, sample: MetricSample) -> bool {
        match sample.metric_type {
            MetricType::Counter => {
                let key: AccumulatorKeyOrdered =
                    AccumulatorKey::new(&sample.name, &sample.tags, &[]).into();
                let entry = self.counters.entry(key).or_insert_with(|| CounterState {
                    cumulative: 0.0,
                    unit: sample.unit.clone(),
                    tags: sample.tags.clone(),
                    dirty: false,
                });
                entry.cumulative += sample.delta.unwrap_or(sample.value);
                entry.dirty = true;
                true
            }
            MetricType::Histogram => {
                let boundaries = sample.buckets.clone().unwrap_or_default();
                let key: AccumulatorKeyOrdered =
                    AccumulatorKey::new(&sample.name, &sample.tags, &boundaries).into();
                let entry = self.histograms.entry(key).or_insert_with(|| HistogramState {
                    boundaries: boundaries.clone(),
                    bucket_counts: vec![0; boundaries.len()],
                    sum: 0.0,
                    count: 0,
                    unit: sample.unit.clone(),
                    tags: sample.tags.clone(),
                    dirty: false,
                });
                entry.record(sample.value);
                true
            }
            MetricType::Gauge | MetricType::Timer => {
                self.passthrough.push(MetricRecord {
                    timestamp: Utc::now(),
                    name: sample.name,
                    metric_type: sample.metric_type,
                    value: sample.value,
                    tags: sample.tags,
                    unit: sample.unit,
                    metadata: None,
                });
                false
            }
        }
    }

    /// Drains pass-through records and produces a cumulative snapshot for
    /// every dirty counter/histogram, clearing dirty flags. Accumulated
    /// totals themselves are never reset — only the dirty bit is, so an
    /// unchanged key is skipped on the next flush.
    pub fn drain_for_flush(&mut self) -> Vec<MetricRecord> {
        let mut out = std::mem::take(&mut self.passthrough);
        for (key, state) in self.counters.iter_mut() {
            if state.dirty {
                out.push(MetricRecord {
                    timestamp: Utc::now(),
                    name: key.0.clone(),
                    metric_type: MetricType::Counter,
                    value: state.cumulative,
                    tags: state.tags.clone(),
                    unit: state.unit.clone(),
                    metadata: None,
                });
                state.dirty = false;
            }
        }
        for (key, state) in self.histograms.iter_mut() {
            if state.dirty {
                out.push(state.to_record(&key.0));
                state.dirty = false;
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(value: f64, delta: Option<f64>) -> MetricSample {
        MetricSample {
            name: "requests".into(),
            metric_type: MetricType::Counter,
            value,
            delta,
            tags: BTreeMap::new(),
            unit: None,
            buckets: None,
        }
    }

    #[test]
    fn counter_accumulates_cumulatively_across_samples() {
        let mut acc = MetricAccumulator::default();
        for _ in 0..50 {
            acc.record(sample(1.0, Some(1.0)));
        }
        acc.record(sample(10.0, Some(10.0)));
        let records = acc.drain_for_flush();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].value, 60.0);
    }

    #[test]
    fn a_second_flush_with_no_new_samples_yields_nothing() {
        let mut acc = MetricAccumulator::default();
        acc.record(sample(1.0, Some(1.0)));
        assert_eq!(acc.drain_for_flush().len(), 1);
        assert_eq!(acc.drain_for_flush().len(), 0);
    }

    #[test]
    fn histogram_buckets_are_cumulative_and_sum_matches_total() {
        let mut acc = MetricAccumulator::default();
        let boundaries = vec![0.0167, 0.0333];
        for value in [0.010, 0.020, 0.040] {
            acc.record(MetricSample {
                name: "latency".into(),
                metric_type: MetricType::Histogram,
                value,
                delta: None,
                tags: BTreeMap::new(),
                unit: None,
                buckets: Some(boundaries.clone()),
            });
        }
        let records = acc.drain_for_flush();
        assert_eq!(records.len(), 1);
        let metadata = records[0].metadata.clone().unwrap();
        assert_eq!(metadata["buckets"][0]["count"], json!(1));
        assert_eq!(metadata["buckets"][1]["count"], json!(2));
        assert_eq!(metadata["sum"], json!(0.070));
        assert_eq!(metadata["count"], json!(3));
    }
}
