//! Aggregation: classified records to per-key metric groups

use crate::types::{AbandonBuckets, ClassifiedRecord, GroupKey, MetricGroup};
use std::collections::BTreeMap;

#[derive(Debug, Default)]
struct Accumulator {
    client_name: Option<String>,
    total_calls: i64,
    total_answered: i64,
    buckets: AbandonBuckets,
    abandoned_unknown: i64,
    handle_time_sum: i64,
    handle_time_count: i64,
    acw_sum: i64,
    acw_count: i64,
}

impl Accumulator {
    fn push(&mut self, classified: ClassifiedRecord) {
        let record = &classified.record;

        if self.client_name.is_none() {
            self.client_name = classified.client_name;
        }

        self.total_calls += 1;

        if let Some(handle) = record.handle_time_secs() {
            self.handle_time_sum += handle;
            self.handle_time_count += 1;
        }

        if classified.answered {
            self.total_answered += 1;
            if let Some(acw) = record.post_call_time {
                self.acw_sum += acw;
                self.acw_count += 1;
            }
        } else {
            match record.talk_time {
                Some(secs) => self.buckets.record(secs),
                None => self.abandoned_unknown += 1,
            }
        }
    }

    fn finish(self, key: GroupKey) -> MetricGroup {
        MetricGroup {
            key,
            client_name: self.client_name,
            total_calls: self.total_calls,
            total_answered: self.total_answered,
            total_unanswered: self.total_calls - self.total_answered,
            buckets: self.buckets,
            abandoned_unknown: self.abandoned_unknown,
            avg_handle_time_sec: mean(self.handle_time_sum, self.handle_time_count),
            avg_after_call_work_sec: mean(self.acw_sum, self.acw_count),
        }
    }
}

fn mean(sum: i64, count: i64) -> Option<f64> {
    (count > 0).then(|| sum as f64 / count as f64)
}

/// Groups classified records by [`GroupKey`].
///
/// Output is independent of push order and comes out in key order.
#[derive(Debug, Default)]
pub struct Aggregator {
    groups: BTreeMap<GroupKey, Accumulator>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one record to its group.
    pub fn push(&mut self, record: ClassifiedRecord) {
        let key = GroupKey::for_record(&record.record);
        self.groups.entry(key).or_default().push(record);
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Consume the aggregator, yielding one group per key in key order.
    pub fn finish(self) -> Vec<MetricGroup> {
        self.groups
            .into_iter()
            .map(|(key, acc)| acc.finish(key))
            .collect()
    }
}

impl FromIterator<ClassifiedRecord> for Aggregator {
    fn from_iter<I: IntoIterator<Item = ClassifiedRecord>>(iter: I) -> Self {
        let mut aggregator = Aggregator::new();
        for record in iter {
            aggregator.push(record);
        }
        aggregator
    }
}
