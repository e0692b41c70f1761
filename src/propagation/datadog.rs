use std::collections::HashMap;

use tracing::debug;

use super::{
    decode_baggage, encode_baggage, normalize_tagged_headers, Extracted, Extractor, Injector,
    Propagator, BAGGAGE_PREFIX,
};
use crate::model::{Id, SamplingPriority, SpanContext};

const TRACE_ID_HEADER: &str = "x-datadog-trace-id";
const PARENT_ID_HEADER: &str = "x-datadog-parent-id";
const SAMPLING_PRIORITY_HEADER: &str = "x-datadog-sampling-priority";

/// Datadog-native header codec.
///
/// Ids travel as lowercase hex and must fit in 64 bits. Unlike B3, the
/// sampling header carries the full four-valued priority as a decimal
/// integer, so the decision survives propagation without loss.
#[derive(Debug, Default)]
pub struct DatadogCodec {
    /// Inbound header name (lowercase) to span tag name.
    tagged_headers: HashMap<String, String>,
}

impl DatadogCodec {
    pub fn new() -> Self {
        DatadogCodec::default()
    }

    pub fn with_tagged_headers(tagged_headers: HashMap<String, String>) -> Self {
        DatadogCodec {
            tagged_headers: normalize_tagged_headers(tagged_headers),
        }
    }
}

impl Propagator for DatadogCodec {
    fn inject(&self, context: &SpanContext, carrier: &mut dyn Injector) {
        if context.trace_id().is_zero() || context.span_id().is_zero() {
            debug!("refusing to inject datadog headers for a context with zero ids");
            return;
        }
        if context.trace_id().to_u128() > u64::MAX as u128
            || context.span_id().to_u128() > u64::MAX as u128
        {
            debug!("refusing to inject datadog headers for ids wider than 64 bits");
            return;
        }
        carrier.set(TRACE_ID_HEADER, context.trace_id().to_hex());
        carrier.set(PARENT_ID_HEADER, context.span_id().to_hex());
        if let Some(priority) = context.read_and_lock_priority() {
            carrier.set(SAMPLING_PRIORITY_HEADER, priority.as_i32().to_string());
        }
        for (key, value) in context.baggage() {
            carrier.set(
                &format!("{BAGGAGE_PREFIX}{key}"),
                encode_baggage(&value),
            );
        }
    }

    fn extract(&self, carrier: &dyn Extractor) -> Option<Extracted> {
        let mut trace_id = Id::ZERO;
        let mut parent_span_id = Id::ZERO;
        let mut priority: Option<SamplingPriority> = None;
        let mut baggage = HashMap::new();
        let mut tags = HashMap::new();

        for key in carrier.keys() {
            let lowered = key.to_lowercase();
            let Some(value) = carrier.get(key) else {
                continue;
            };
            match lowered.as_str() {
                TRACE_ID_HEADER => match parse_id(value) {
                    Some(id) if !id.is_zero() => trace_id = id,
                    _ => debug!(header = %value, "ignoring invalid datadog trace id"),
                },
                PARENT_ID_HEADER => match parse_id(value) {
                    Some(id) => parent_span_id = id,
                    None => debug!(header = %value, "ignoring invalid datadog parent id"),
                },
                SAMPLING_PRIORITY_HEADER => {
                    priority = value
                        .parse::<i32>()
                        .ok()
                        .and_then(SamplingPriority::from_i32);
                }
                _ => {
                    if let Some(item) = lowered.strip_prefix(BAGGAGE_PREFIX) {
                        baggage.insert(item.to_string(), decode_baggage(value));
                    }
                    if let Some(tag) = self.tagged_headers.get(&lowered) {
                        tags.insert(tag.clone(), value.to_string());
                    }
                }
            }
        }

        if trace_id.is_zero() {
            if tags.is_empty() {
                return None;
            }
            return Some(Extracted::TagContext { tags });
        }

        let context = SpanContext::with_baggage(trace_id, parent_span_id, Id::ZERO, baggage);
        if let Some(priority) = priority {
            context.set_sampling_priority(priority);
            context.read_and_lock_priority();
        }
        Some(Extracted::Context { context, tags })
    }
}

/// Both id headers are 64-bit on this wire.
fn parse_id(value: &str) -> Option<Id> {
    if value.len() > 16 {
        return None;
    }
    Id::from_hex(value)
}
