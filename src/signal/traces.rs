//! Reshaping operations over trace trees

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use opentelemetry_proto::tonic::common::v1::InstrumentationScope;
use opentelemetry_proto::tonic::resource::v1::Resource;
use opentelemetry_proto::tonic::trace::v1::{ResourceSpans, ScopeSpans, Span};

use super::{format_nanos, nanos_to_datetime};

/// Predicate over a span and its enclosing resource and scope.
pub type SpanPredicate =
    Box<dyn Fn(Option<&Resource>, Option<&InstrumentationScope>, &Span) -> bool + Send + Sync>;

/// Total number of spans across all envelopes.
pub fn total_spans(src: &[ResourceSpans]) -> usize {
    src.iter()
        .flat_map(|rs| &rs.scope_spans)
        .map(|ss| ss.spans.len())
        .sum()
}

/// Split envelopes into one-span trees, preserving pre-order.
///
/// Each output tree carries the originating resource, scope, and schema URLs
/// unchanged. Splitting an already-split list is a no-op.
pub fn split_resource_spans(src: &[ResourceSpans]) -> Vec<ResourceSpans> {
    let mut dst = Vec::with_capacity(total_spans(src));
    for rs in src {
        for ss in split_scope_spans(&rs.scope_spans) {
            dst.push(ResourceSpans {
                resource: rs.resource.clone(),
                scope_spans: vec![ss],
                schema_url: rs.schema_url.clone(),
            });
        }
    }
    dst
}

fn split_scope_spans(src: &[ScopeSpans]) -> Vec<ScopeSpans> {
    let mut dst = Vec::with_capacity(src.len());
    for ss in src {
        for span in &ss.spans {
            dst.push(ScopeSpans {
                scope: ss.scope.clone(),
                spans: vec![span.clone()],
                schema_url: ss.schema_url.clone(),
            });
        }
    }
    dst
}

/// Merge a one-span tree into a list, coalescing by resource and scope.
///
/// The inverse of [`split_resource_spans`]: an envelope with an equal
/// `(resource, schema_url)` absorbs the element, and within it a scope with
/// an equal `(scope, schema_url)` absorbs the span.
pub fn append_resource_spans(mut dst: Vec<ResourceSpans>, elem: ResourceSpans) -> Vec<ResourceSpans> {
    let existing = dst
        .iter_mut()
        .find(|rs| rs.resource == elem.resource && rs.schema_url == elem.schema_url);
    let Some(target) = existing else {
        dst.push(elem);
        return dst;
    };
    for ss in elem.scope_spans {
        match target
            .scope_spans
            .iter_mut()
            .find(|existing| existing.scope == ss.scope && existing.schema_url == ss.schema_url)
        {
            Some(existing) => existing.spans.extend(ss.spans),
            None => target.scope_spans.push(ss),
        }
    }
    dst
}

/// Keep the one-span trees whose span satisfies every predicate.
///
/// The input is split first, so one envelope with several matching spans
/// yields one output tree per match.
pub fn filter_resource_spans(src: &[ResourceSpans], predicates: &[SpanPredicate]) -> Vec<ResourceSpans> {
    let split = split_resource_spans(src);
    let mut filtered = Vec::with_capacity(split.len());
    for elem in split {
        let resource = elem.resource.as_ref();
        let matched = elem.scope_spans.iter().any(|ss| {
            let scope = ss.scope.as_ref();
            ss.spans
                .iter()
                .any(|span| predicates.iter().all(|p| p(resource, scope, span)))
        });
        if matched {
            filtered.push(elem);
        }
    }
    filtered
}

/// Group one-span trees by a partition key.
///
/// The union of all buckets equals `split_resource_spans(src)`.
pub fn partition_resource_spans<K>(
    src: &[ResourceSpans],
    key_fn: K,
) -> HashMap<String, Vec<ResourceSpans>>
where
    K: Fn(&ResourceSpans) -> String,
{
    let mut partitions: HashMap<String, Vec<ResourceSpans>> = HashMap::new();
    for elem in split_resource_spans(src) {
        let key = key_fn(&elem);
        let bucket = partitions.remove(&key).unwrap_or_default();
        partitions.insert(key, append_resource_spans(bucket, elem));
    }
    partitions
}

fn first_span(rs: &ResourceSpans) -> Option<&Span> {
    rs.scope_spans.first()?.spans.first()
}

/// Partition key: span start time formatted with `layout` in `tz` (UTC when
/// `None`).
pub fn by_span_start_time(layout: &str, tz: Option<Tz>) -> impl Fn(&ResourceSpans) -> String {
    let layout = layout.to_owned();
    move |rs| match first_span(rs) {
        Some(span) => format_nanos(span.start_time_unix_nano, &layout, tz),
        None => String::new(),
    }
}

/// Partition key: span end time formatted with `layout` in `tz` (UTC when
/// `None`).
pub fn by_span_end_time(layout: &str, tz: Option<Tz>) -> impl Fn(&ResourceSpans) -> String {
    let layout = layout.to_owned();
    move |rs| match first_span(rs) {
        Some(span) => format_nanos(span.end_time_unix_nano, &layout, tz),
        None => String::new(),
    }
}

/// Predicate keeping spans that start after `start` and end before `end`
/// (both exclusive).
pub fn span_in_time_range(start: DateTime<Utc>, end: DateTime<Utc>) -> SpanPredicate {
    Box::new(move |_, _, span| {
        let span_start = nanos_to_datetime(span.start_time_unix_nano);
        let span_end = nanos_to_datetime(span.end_time_unix_nano);
        span_start > start && span_end < end
    })
}
