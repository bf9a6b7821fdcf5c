//! Reshaping operations over metric trees
//!
//! Metrics are one level deeper than the other signals: every metric wraps
//! one of five point shapes (gauge, sum, summary, histogram, exponential
//! histogram), each holding its own data-point list. Splitting traverses by
//! case over the shapes and keeps the parent metric metadata and the
//! shape-specific parameters on every one-point leaf.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use opentelemetry_proto::tonic::common::v1::InstrumentationScope;
use opentelemetry_proto::tonic::metrics::v1::{
    metric, ExponentialHistogram, Gauge, Histogram, Metric, ResourceMetrics, ScopeMetrics, Sum,
    Summary,
};
use opentelemetry_proto::tonic::resource::v1::Resource;

use super::{format_nanos, nanos_to_datetime};

/// Predicate over a metric and its enclosing resource and scope.
pub type MetricPredicate =
    Box<dyn Fn(Option<&Resource>, Option<&InstrumentationScope>, &Metric) -> bool + Send + Sync>;

/// Total number of data points across all envelopes and point shapes.
pub fn total_data_points(src: &[ResourceMetrics]) -> usize {
    src.iter()
        .flat_map(|rm| &rm.scope_metrics)
        .flat_map(|sm| &sm.metrics)
        .map(metric_data_points)
        .sum()
}

fn metric_data_points(metric: &Metric) -> usize {
    match &metric.data {
        Some(metric::Data::Gauge(gauge)) => gauge.data_points.len(),
        Some(metric::Data::Sum(sum)) => sum.data_points.len(),
        Some(metric::Data::Summary(summary)) => summary.data_points.len(),
        Some(metric::Data::Histogram(histogram)) => histogram.data_points.len(),
        Some(metric::Data::ExponentialHistogram(histogram)) => histogram.data_points.len(),
        None => 0,
    }
}

/// Split envelopes into one-data-point trees, preserving pre-order.
///
/// Every leaf keeps the metric's `name`, `description`, `unit`, and
/// `metadata`, plus the shape parameters (`aggregation_temporality`,
/// `is_monotonic`) of its point kind.
pub fn split_resource_metrics(src: &[ResourceMetrics]) -> Vec<ResourceMetrics> {
    let mut dst = Vec::with_capacity(total_data_points(src));
    for rm in src {
        for sm in split_scope_metrics(&rm.scope_metrics) {
            dst.push(ResourceMetrics {
                resource: rm.resource.clone(),
                scope_metrics: vec![sm],
                schema_url: rm.schema_url.clone(),
            });
        }
    }
    dst
}

fn split_scope_metrics(src: &[ScopeMetrics]) -> Vec<ScopeMetrics> {
    let mut dst = Vec::with_capacity(src.len());
    for sm in src {
        for metric in split_metrics(&sm.metrics) {
            dst.push(ScopeMetrics {
                scope: sm.scope.clone(),
                metrics: vec![metric],
                schema_url: sm.schema_url.clone(),
            });
        }
    }
    dst
}

fn metric_with_data(metric: &Metric, data: metric::Data) -> Metric {
    Metric {
        name: metric.name.clone(),
        description: metric.description.clone(),
        unit: metric.unit.clone(),
        metadata: metric.metadata.clone(),
        data: Some(data),
    }
}

fn split_metrics(src: &[Metric]) -> Vec<Metric> {
    let mut dst = Vec::with_capacity(src.len());
    for metric in src {
        match &metric.data {
            Some(metric::Data::Gauge(gauge)) => {
                for point in &gauge.data_points {
                    dst.push(metric_with_data(
                        metric,
                        metric::Data::Gauge(Gauge {
                            data_points: vec![point.clone()],
                        }),
                    ));
                }
            }
            Some(metric::Data::Sum(sum)) => {
                for point in &sum.data_points {
                    dst.push(metric_with_data(
                        metric,
                        metric::Data::Sum(Sum {
                            data_points: vec![point.clone()],
                            aggregation_temporality: sum.aggregation_temporality,
                            is_monotonic: sum.is_monotonic,
                        }),
                    ));
                }
            }
            Some(metric::Data::Summary(summary)) => {
                for point in &summary.data_points {
                    dst.push(metric_with_data(
                        metric,
                        metric::Data::Summary(Summary {
                            data_points: vec![point.clone()],
                        }),
                    ));
                }
            }
            Some(metric::Data::Histogram(histogram)) => {
                for point in &histogram.data_points {
                    dst.push(metric_with_data(
                        metric,
                        metric::Data::Histogram(Histogram {
                            data_points: vec![point.clone()],
                            aggregation_temporality: histogram.aggregation_temporality,
                        }),
                    ));
                }
            }
            Some(metric::Data::ExponentialHistogram(histogram)) => {
                for point in &histogram.data_points {
                    dst.push(metric_with_data(
                        metric,
                        metric::Data::ExponentialHistogram(ExponentialHistogram {
                            data_points: vec![point.clone()],
                            aggregation_temporality: histogram.aggregation_temporality,
                        }),
                    ));
                }
            }
            None => {}
        }
    }
    dst
}

/// Merge a one-data-point tree into a list, coalescing by resource and scope.
pub fn append_resource_metrics(
    mut dst: Vec<ResourceMetrics>,
    elem: ResourceMetrics,
) -> Vec<ResourceMetrics> {
    let existing = dst
        .iter_mut()
        .find(|rm| rm.resource == elem.resource && rm.schema_url == elem.schema_url);
    let Some(target) = existing else {
        dst.push(elem);
        return dst;
    };
    for sm in elem.scope_metrics {
        match target
            .scope_metrics
            .iter_mut()
            .find(|existing| existing.scope == sm.scope && existing.schema_url == sm.schema_url)
        {
            Some(existing) => existing.metrics.extend(sm.metrics),
            None => target.scope_metrics.push(sm),
        }
    }
    dst
}

/// Keep the one-data-point trees whose metric satisfies every predicate.
///
/// The input is split first, so one envelope with several matching points
/// yields one output tree per match.
pub fn filter_resource_metrics(
    src: &[ResourceMetrics],
    predicates: &[MetricPredicate],
) -> Vec<ResourceMetrics> {
    let split = split_resource_metrics(src);
    let mut filtered = Vec::with_capacity(split.len());
    for elem in split {
        let resource = elem.resource.as_ref();
        let matched = elem.scope_metrics.iter().any(|sm| {
            let scope = sm.scope.as_ref();
            sm.metrics
                .iter()
                .any(|metric| predicates.iter().all(|p| p(resource, scope, metric)))
        });
        if matched {
            filtered.push(elem);
        }
    }
    filtered
}

/// Group one-data-point trees by a partition key.
pub fn partition_resource_metrics<K>(
    src: &[ResourceMetrics],
    key_fn: K,
) -> HashMap<String, Vec<ResourceMetrics>>
where
    K: Fn(&ResourceMetrics) -> String,
{
    let mut partitions: HashMap<String, Vec<ResourceMetrics>> = HashMap::new();
    for elem in split_resource_metrics(src) {
        let key = key_fn(&elem);
        let bucket = partitions.remove(&key).unwrap_or_default();
        partitions.insert(key, append_resource_metrics(bucket, elem));
    }
    partitions
}

fn first_metric(rm: &ResourceMetrics) -> Option<&Metric> {
    rm.scope_metrics.first()?.metrics.first()
}

/// Partition key: the metric's point-shape name.
pub fn by_metric_type() -> impl Fn(&ResourceMetrics) -> String {
    |rm| {
        let Some(metric) = first_metric(rm) else {
            return String::new();
        };
        match metric.data {
            Some(metric::Data::Gauge(_)) => "Gauge".to_string(),
            Some(metric::Data::Sum(_)) => "Sum".to_string(),
            Some(metric::Data::Summary(_)) => "Summary".to_string(),
            Some(metric::Data::Histogram(_)) => "Histogram".to_string(),
            Some(metric::Data::ExponentialHistogram(_)) => "ExponentialHistogram".to_string(),
            None => String::new(),
        }
    }
}

fn first_point_times(metric: &Metric) -> Option<(u64, u64)> {
    match metric.data.as_ref()? {
        metric::Data::Gauge(gauge) => {
            let point = gauge.data_points.first()?;
            Some((point.start_time_unix_nano, point.time_unix_nano))
        }
        metric::Data::Sum(sum) => {
            let point = sum.data_points.first()?;
            Some((point.start_time_unix_nano, point.time_unix_nano))
        }
        metric::Data::Summary(summary) => {
            let point = summary.data_points.first()?;
            Some((point.start_time_unix_nano, point.time_unix_nano))
        }
        metric::Data::Histogram(histogram) => {
            let point = histogram.data_points.first()?;
            Some((point.start_time_unix_nano, point.time_unix_nano))
        }
        metric::Data::ExponentialHistogram(histogram) => {
            let point = histogram.data_points.first()?;
            Some((point.start_time_unix_nano, point.time_unix_nano))
        }
    }
}

/// Partition key: data-point start time formatted with `layout` in `tz` (UTC
/// when `None`).
pub fn by_metric_start_time(layout: &str, tz: Option<Tz>) -> impl Fn(&ResourceMetrics) -> String {
    let layout = layout.to_owned();
    move |rm| {
        let times = first_metric(rm).and_then(first_point_times);
        match times {
            Some((start, _)) => format_nanos(start, &layout, tz),
            None => String::new(),
        }
    }
}

/// Partition key: data-point time formatted with `layout` in `tz` (UTC when
/// `None`).
pub fn by_metric_time(layout: &str, tz: Option<Tz>) -> impl Fn(&ResourceMetrics) -> String {
    let layout = layout.to_owned();
    move |rm| {
        let times = first_metric(rm).and_then(first_point_times);
        match times {
            Some((_, time)) => format_nanos(time, &layout, tz),
            None => String::new(),
        }
    }
}

fn point_times(metric: &Metric) -> Vec<u64> {
    match &metric.data {
        Some(metric::Data::Gauge(gauge)) => {
            gauge.data_points.iter().map(|p| p.time_unix_nano).collect()
        }
        Some(metric::Data::Sum(sum)) => sum.data_points.iter().map(|p| p.time_unix_nano).collect(),
        Some(metric::Data::Summary(summary)) => summary
            .data_points
            .iter()
            .map(|p| p.time_unix_nano)
            .collect(),
        Some(metric::Data::Histogram(histogram)) => histogram
            .data_points
            .iter()
            .map(|p| p.time_unix_nano)
            .collect(),
        Some(metric::Data::ExponentialHistogram(histogram)) => histogram
            .data_points
            .iter()
            .map(|p| p.time_unix_nano)
            .collect(),
        None => Vec::new(),
    }
}

/// Predicate keeping metrics with at least one data point inside the
/// exclusive `(start, end)` range.
pub fn metric_data_point_in_time_range(start: DateTime<Utc>, end: DateTime<Utc>) -> MetricPredicate {
    Box::new(move |_, _, metric| {
        point_times(metric).into_iter().any(|nanos| {
            let t = nanos_to_datetime(nanos);
            t > start && t < end
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry_proto::tonic::metrics::v1::{number_data_point, NumberDataPoint};

    fn number_point(time: u64, value: f64) -> NumberDataPoint {
        NumberDataPoint {
            time_unix_nano: time,
            start_time_unix_nano: time,
            value: Some(number_data_point::Value::AsDouble(value)),
            ..Default::default()
        }
    }

    fn sum_metric(name: &str, points: Vec<NumberDataPoint>) -> Metric {
        Metric {
            name: name.to_string(),
            unit: "1".to_string(),
            data: Some(metric::Data::Sum(Sum {
                data_points: points,
                aggregation_temporality: 2,
                is_monotonic: true,
            })),
            ..Default::default()
        }
    }

    fn gauge_metric(name: &str, points: Vec<NumberDataPoint>) -> Metric {
        Metric {
            name: name.to_string(),
            data: Some(metric::Data::Gauge(Gauge {
                data_points: points,
            })),
            ..Default::default()
        }
    }

    fn batched() -> Vec<ResourceMetrics> {
        vec![ResourceMetrics {
            resource: None,
            scope_metrics: vec![ScopeMetrics {
                scope: None,
                metrics: vec![
                    sum_metric(
                        "my.counter",
                        vec![
                            number_point(1_544_712_660_000_000_000, 1.0),
                            number_point(1_544_712_660_500_000_000, 2.0),
                        ],
                    ),
                    gauge_metric("my.gauge", vec![number_point(1_544_713_200_000_000_000, 3.0)]),
                ],
                schema_url: String::new(),
            }],
            schema_url: String::new(),
        }]
    }

    #[test]
    fn test_total_data_points() {
        assert_eq!(total_data_points(&batched()), 3);
    }

    #[test]
    fn test_split_preserves_total_and_sum_parameters() {
        let src = batched();
        let split = split_resource_metrics(&src);
        assert_eq!(split.len(), 3);
        assert_eq!(total_data_points(&split), 3);
        let first = &split[0].scope_metrics[0].metrics[0];
        assert_eq!(first.name, "my.counter");
        assert_eq!(first.unit, "1");
        match &first.data {
            Some(metric::Data::Sum(sum)) => {
                assert_eq!(sum.data_points.len(), 1);
                assert_eq!(sum.aggregation_temporality, 2);
                assert!(sum.is_monotonic);
            }
            other => panic!("expected sum data, got {:?}", other),
        }
    }

    #[test]
    fn test_split_is_idempotent() {
        let split = split_resource_metrics(&batched());
        assert_eq!(split_resource_metrics(&split), split);
    }

    #[test]
    fn test_append_restores_batched_shape() {
        let src = batched();
        let mut merged = Vec::new();
        for elem in split_resource_metrics(&src) {
            merged = append_resource_metrics(merged, elem);
        }
        // Split tears metrics apart, so the coalesced shape has one metric
        // per point; totals and grouping must still match.
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].scope_metrics.len(), 1);
        assert_eq!(total_data_points(&merged), total_data_points(&src));
    }

    #[test]
    fn test_partition_by_metric_type() {
        let partitions = partition_resource_metrics(&batched(), by_metric_type());
        let mut keys: Vec<_> = partitions.keys().cloned().collect();
        keys.sort();
        assert_eq!(keys, vec!["Gauge", "Sum"]);
        assert_eq!(total_data_points(&partitions["Sum"]), 2);
        assert_eq!(total_data_points(&partitions["Gauge"]), 1);
    }

    #[test]
    fn test_partition_by_metric_time() {
        let partitions = partition_resource_metrics(
            &batched(),
            by_metric_time(super::super::HOURLY, Some(chrono_tz::Asia::Tokyo)),
        );
        let mut keys: Vec<_> = partitions.keys().cloned().collect();
        keys.sort();
        assert_eq!(keys, vec!["2018/12/13/23", "2018/12/14/00"]);
    }

    #[test]
    fn test_filter_by_name_and_time_range() {
        let start = nanos_to_datetime(1_544_712_659_000_000_000);
        let end = nanos_to_datetime(1_544_712_661_000_000_000);
        let named: MetricPredicate = Box::new(|_, _, m| m.name == "my.counter");
        let filtered = filter_resource_metrics(
            &batched(),
            &[metric_data_point_in_time_range(start, end), named],
        );
        assert_eq!(total_data_points(&filtered), 2);
        for rm in &filtered {
            assert_eq!(rm.scope_metrics[0].metrics[0].name, "my.counter");
        }
    }
}
