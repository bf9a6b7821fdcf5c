//! Reshaping operations over log trees

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use opentelemetry_proto::tonic::common::v1::InstrumentationScope;
use opentelemetry_proto::tonic::logs::v1::{LogRecord, ResourceLogs, ScopeLogs};
use opentelemetry_proto::tonic::resource::v1::Resource;

use super::{format_nanos, nanos_to_datetime};

/// Predicate over a log record and its enclosing resource and scope.
pub type LogRecordPredicate =
    Box<dyn Fn(Option<&Resource>, Option<&InstrumentationScope>, &LogRecord) -> bool + Send + Sync>;

/// Total number of log records across all envelopes.
pub fn total_log_records(src: &[ResourceLogs]) -> usize {
    src.iter()
        .flat_map(|rl| &rl.scope_logs)
        .map(|sl| sl.log_records.len())
        .sum()
}

/// Split envelopes into one-record trees, preserving pre-order.
pub fn split_resource_logs(src: &[ResourceLogs]) -> Vec<ResourceLogs> {
    let mut dst = Vec::with_capacity(total_log_records(src));
    for rl in src {
        for sl in split_scope_logs(&rl.scope_logs) {
            dst.push(ResourceLogs {
                resource: rl.resource.clone(),
                scope_logs: vec![sl],
                schema_url: rl.schema_url.clone(),
            });
        }
    }
    dst
}

fn split_scope_logs(src: &[ScopeLogs]) -> Vec<ScopeLogs> {
    let mut dst = Vec::with_capacity(src.len());
    for sl in src {
        for record in &sl.log_records {
            dst.push(ScopeLogs {
                scope: sl.scope.clone(),
                log_records: vec![record.clone()],
                schema_url: sl.schema_url.clone(),
            });
        }
    }
    dst
}

/// Merge a one-record tree into a list, coalescing by resource and scope.
pub fn append_resource_logs(mut dst: Vec<ResourceLogs>, elem: ResourceLogs) -> Vec<ResourceLogs> {
    let existing = dst
        .iter_mut()
        .find(|rl| rl.resource == elem.resource && rl.schema_url == elem.schema_url);
    let Some(target) = existing else {
        dst.push(elem);
        return dst;
    };
    for sl in elem.scope_logs {
        match target
            .scope_logs
            .iter_mut()
            .find(|existing| existing.scope == sl.scope && existing.schema_url == sl.schema_url)
        {
            Some(existing) => existing.log_records.extend(sl.log_records),
            None => target.scope_logs.push(sl),
        }
    }
    dst
}

/// Keep the one-record trees whose record satisfies every predicate.
///
/// The input is split first, so one envelope with several matching records
/// yields one output tree per match.
pub fn filter_resource_logs(
    src: &[ResourceLogs],
    predicates: &[LogRecordPredicate],
) -> Vec<ResourceLogs> {
    let split = split_resource_logs(src);
    let mut filtered = Vec::with_capacity(split.len());
    for elem in split {
        let resource = elem.resource.as_ref();
        let matched = elem.scope_logs.iter().any(|sl| {
            let scope = sl.scope.as_ref();
            sl.log_records
                .iter()
                .any(|record| predicates.iter().all(|p| p(resource, scope, record)))
        });
        if matched {
            filtered.push(elem);
        }
    }
    filtered
}

/// Group one-record trees by a partition key.
pub fn partition_resource_logs<K>(
    src: &[ResourceLogs],
    key_fn: K,
) -> HashMap<String, Vec<ResourceLogs>>
where
    K: Fn(&ResourceLogs) -> String,
{
    let mut partitions: HashMap<String, Vec<ResourceLogs>> = HashMap::new();
    for elem in split_resource_logs(src) {
        let key = key_fn(&elem);
        let bucket = partitions.remove(&key).unwrap_or_default();
        partitions.insert(key, append_resource_logs(bucket, elem));
    }
    partitions
}

fn first_record(rl: &ResourceLogs) -> Option<&LogRecord> {
    rl.scope_logs.first()?.log_records.first()
}

/// Partition key: record time formatted with `layout` in `tz` (UTC when
/// `None`).
pub fn by_log_time(layout: &str, tz: Option<Tz>) -> impl Fn(&ResourceLogs) -> String {
    let layout = layout.to_owned();
    move |rl| match first_record(rl) {
        Some(record) => format_nanos(record.time_unix_nano, &layout, tz),
        None => String::new(),
    }
}

/// Partition key: record observed time formatted with `layout` in `tz` (UTC
/// when `None`).
pub fn by_log_observed_time(layout: &str, tz: Option<Tz>) -> impl Fn(&ResourceLogs) -> String {
    let layout = layout.to_owned();
    move |rl| match first_record(rl) {
        Some(record) => format_nanos(record.observed_time_unix_nano, &layout, tz),
        None => String::new(),
    }
}

/// Partition key: the record's severity text.
pub fn by_log_severity_text() -> impl Fn(&ResourceLogs) -> String {
    |rl| match first_record(rl) {
        Some(record) => record.severity_text.clone(),
        None => String::new(),
    }
}

/// Partition key: the record's numeric severity, rendered in decimal.
pub fn by_log_severity_number() -> impl Fn(&ResourceLogs) -> String {
    |rl| match first_record(rl) {
        Some(record) => record.severity_number.to_string(),
        None => String::new(),
    }
}

/// Predicate keeping records inside the exclusive `(start, end)` range.
pub fn log_record_in_time_range(start: DateTime<Utc>, end: DateTime<Utc>) -> LogRecordPredicate {
    Box::new(move |_, _, record| {
        let t = nanos_to_datetime(record.time_unix_nano);
        t > start && t < end
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry_proto::tonic::common::v1::{any_value, AnyValue};

    fn record(body: &str, time: u64, severity_number: i32, severity_text: &str) -> LogRecord {
        LogRecord {
            time_unix_nano: time,
            observed_time_unix_nano: time,
            severity_number,
            severity_text: severity_text.to_string(),
            body: Some(AnyValue {
                value: Some(any_value::Value::StringValue(body.to_string())),
            }),
            ..Default::default()
        }
    }

    fn batched() -> Vec<ResourceLogs> {
        vec![ResourceLogs {
            resource: None,
            scope_logs: vec![ScopeLogs {
                scope: None,
                log_records: vec![
                    record("first", 1_544_712_660_000_000_000, 9, "INFO"),
                    record("second", 1_544_713_200_000_000_000, 13, "WARN"),
                ],
                schema_url: String::new(),
            }],
            schema_url: String::new(),
        }]
    }

    #[test]
    fn test_total_log_records() {
        assert_eq!(total_log_records(&batched()), 2);
    }

    #[test]
    fn test_split_and_append_roundtrip() {
        let src = batched();
        let split = split_resource_logs(&src);
        assert_eq!(split.len(), 2);
        assert_eq!(split_resource_logs(&split), split);

        let mut merged = Vec::new();
        for elem in split {
            merged = append_resource_logs(merged, elem);
        }
        assert_eq!(merged, src);
    }

    #[test]
    fn test_partition_by_log_time() {
        let partitions = partition_resource_logs(
            &batched(),
            by_log_time(super::super::HOURLY, Some(chrono_tz::Asia::Tokyo)),
        );
        let mut keys: Vec<_> = partitions.keys().cloned().collect();
        keys.sort();
        assert_eq!(keys, vec!["2018/12/13/23", "2018/12/14/00"]);
    }

    #[test]
    fn test_severity_partitioners_are_distinct() {
        let by_text = partition_resource_logs(&batched(), by_log_severity_text());
        let mut text_keys: Vec<_> = by_text.keys().cloned().collect();
        text_keys.sort();
        assert_eq!(text_keys, vec!["INFO", "WARN"]);

        let by_number = partition_resource_logs(&batched(), by_log_severity_number());
        let mut number_keys: Vec<_> = by_number.keys().cloned().collect();
        number_keys.sort();
        assert_eq!(number_keys, vec!["13", "9"]);
    }

    #[test]
    fn test_filter_by_time_range() {
        let start = nanos_to_datetime(1_544_712_659_000_000_000);
        let end = nanos_to_datetime(1_544_712_661_000_000_000);
        let filtered = filter_resource_logs(&batched(), &[log_record_in_time_range(start, end)]);
        assert_eq!(total_log_records(&filtered), 1);
        assert_eq!(
            filtered[0].scope_logs[0].log_records[0]
                .body
                .as_ref()
                .and_then(|b| b.value.as_ref())
                .map(|v| match v {
                    any_value::Value::StringValue(s) => s.clone(),
                    _ => String::new(),
                }),
            Some("first".to_string())
        );
    }
}
