use std::collections::HashMap;

use tracing::debug;

use super::{
    decode_baggage, encode_baggage, normalize_tagged_headers, Extracted, Extractor, Injector,
    Propagator, BAGGAGE_PREFIX,
};
use crate::model::{Id, SamplingPriority, SpanContext};

const TRACE_ID_HEADER: &str = "x-b3-traceid";
const SPAN_ID_HEADER: &str = "x-b3-spanid";
const PARENT_SPAN_ID_HEADER: &str = "x-b3-parentspanid";
const SAMPLED_HEADER: &str = "x-b3-sampled";
const FLAGS_HEADER: &str = "x-b3-flags";

/// B3 multi-header codec.
///
/// Ids travel as lowercase hex, 16 digits for 64-bit values and 32 digits for
/// larger ones. The sampled header collapses the four-valued priority to a
/// keep/drop bit; the debug flag wins over the sampled header on extract no
/// matter which header arrives first.
#[derive(Debug, Default)]
pub struct B3Codec {
    /// Inbound header name (lowercase) to span tag name.
    tagged_headers: HashMap<String, String>,
}

impl B3Codec {
    pub fn new() -> Self {
        B3Codec::default()
    }

    pub fn with_tagged_headers(tagged_headers: HashMap<String, String>) -> Self {
        B3Codec {
            tagged_headers: normalize_tagged_headers(tagged_headers),
        }
    }
}

impl Propagator for B3Codec {
    fn inject(&self, context: &SpanContext, carrier: &mut dyn Injector) {
        if context.trace_id().is_zero() || context.span_id().is_zero() {
            debug!("refusing to inject b3 headers for a context with zero ids");
            return;
        }
        carrier.set(TRACE_ID_HEADER, context.trace_id().to_hex());
        carrier.set(SPAN_ID_HEADER, context.span_id().to_hex());
        if !context.parent_id().is_zero() {
            carrier.set(PARENT_SPAN_ID_HEADER, context.parent_id().to_hex());
        }
        match context.read_and_lock_priority() {
            // A user keep is a debug trace on this wire.
            Some(SamplingPriority::UserKeep) => {
                carrier.set(FLAGS_HEADER, "1".to_string());
            }
            Some(SamplingPriority::SamplerKeep) => {
                carrier.set(SAMPLED_HEADER, "1".to_string());
            }
            Some(_) => {
                carrier.set(SAMPLED_HEADER, "0".to_string());
            }
            None => {}
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
        let mut span_id = Id::ZERO;
        let mut parent_id = Id::ZERO;
        let mut sampled: Option<SamplingPriority> = None;
        let mut debug_flag = false;
        let mut baggage = HashMap::new();
        let mut tags = HashMap::new();

        for key in carrier.keys() {
            let lowered = key.to_lowercase();
            let Some(value) = carrier.get(key) else {
                continue;
            };
            match lowered.as_str() {
                TRACE_ID_HEADER => {
                    match Id::from_hex(value) {
                        Some(id) if !id.is_zero() => trace_id = id,
                        _ => debug!(header = %value, "ignoring invalid b3 trace id"),
                    }
                }
                SPAN_ID_HEADER => {
                    match Id::from_hex(value) {
                        Some(id) => span_id = id,
                        None => debug!(header = %value, "ignoring invalid b3 span id"),
                    }
                }
                PARENT_SPAN_ID_HEADER => {
                    if let Some(id) = Id::from_hex(value) {
                        parent_id = id;
                    }
                }
                SAMPLED_HEADER => match value {
                    "1" | "true" => sampled = Some(SamplingPriority::SamplerKeep),
                    "0" | "false" => sampled = Some(SamplingPriority::SamplerDrop),
                    _ => debug!(header = %value, "ignoring unrecognized b3 sampled value"),
                },
                FLAGS_HEADER => {
                    if value == "1" {
                        debug_flag = true;
                    }
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

        let context = SpanContext::with_baggage(trace_id, span_id, parent_id, baggage);
        // The debug flag forces a keep regardless of the sampled header.
        let priority = if debug_flag {
            Some(SamplingPriority::UserKeep)
        } else {
            sampled
        };
        if let Some(priority) = priority {
            context.set_sampling_priority(priority);
            context.read_and_lock_priority();
        }
        Some(Extracted::Context { context, tags })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract(headers: &[(&str, &str)]) -> Option<Extracted> {
        let codec = B3Codec::new();
        let carrier: HashMap<String, String> = headers
            .iter()
            .map(|(key, value)| (key.to_lowercase(), value.to_string()))
            .collect();
        codec.extract(&carrier)
    }

    fn expect_context(extracted: Option<Extracted>) -> SpanContext {
        match extracted {
            Some(Extracted::Context { context, .. }) => context,
            other => panic!("expected full context, got {other:?}"),
        }
    }

    #[test]
    fn extracts_64_bit_ids() {
        let context = expect_context(extract(&[
            ("X-B3-TraceId", "00000000000004d2"),
            ("X-B3-SpanId", "0000000000000162"),
        ]));
        assert_eq!(context.trace_id(), Id::from_u64(1234));
        assert_eq!(context.span_id(), Id::from_u64(354));
        assert_eq!(context.parent_id(), Id::ZERO);
        assert_eq!(context.sampling_priority(), None);
    }

    #[test]
    fn extracts_128_bit_trace_id() {
        let context = expect_context(extract(&[
            ("x-b3-traceid", "4bf92f3577b34da6a3ce929d0e0e4736"),
            ("x-b3-spanid", "00f067aa0ba902b7"),
        ]));
        assert_eq!(
            context.trace_id(),
            Id::from_u128(0x4bf9_2f35_77b3_4da6_a3ce_929d_0e0e_4736)
        );
    }

    #[test]
    fn sampled_header_maps_to_priority() {
        let kept = expect_context(extract(&[
            ("x-b3-traceid", "0000000000000001"),
            ("x-b3-spanid", "0000000000000002"),
            ("x-b3-sampled", "1"),
        ]));
        assert_eq!(
            kept.sampling_priority(),
            Some(SamplingPriority::SamplerKeep)
        );
        // Extraction locks the inbound decision.
        assert!(!kept.set_sampling_priority(SamplingPriority::UserDrop));

        let dropped = expect_context(extract(&[
            ("x-b3-traceid", "0000000000000001"),
            ("x-b3-spanid", "0000000000000002"),
            ("x-b3-sampled", "0"),
        ]));
        assert_eq!(
            dropped.sampling_priority(),
            Some(SamplingPriority::SamplerDrop)
        );
    }

    #[test]
    fn unrecognized_sampled_value_is_skipped() {
        let context = expect_context(extract(&[
            ("x-b3-traceid", "0000000000000001"),
            ("x-b3-spanid", "0000000000000002"),
            ("x-b3-sampled", "abc"),
        ]));
        assert_eq!(context.sampling_priority(), None);
        assert!(!context.priority_locked());
    }

    #[test]
    fn debug_flag_wins_regardless_of_header_order() {
        for headers in [
            [
                ("x-b3-traceid", "0000000000000001"),
                ("x-b3-spanid", "0000000000000002"),
                ("x-b3-sampled", "0"),
                ("x-b3-flags", "1"),
            ],
            [
                ("x-b3-flags", "1"),
                ("x-b3-sampled", "0"),
                ("x-b3-traceid", "0000000000000001"),
                ("x-b3-spanid", "0000000000000002"),
            ],
        ] {
            let context = expect_context(extract(&headers));
            assert_eq!(
                context.sampling_priority(),
                Some(SamplingPriority::UserKeep)
            );
        }
    }

    #[test]
    fn oversized_trace_id_is_skipped() {
        // 33 hex digits exceeds 128 bits; the trace id is ignored rather than
        // failing the whole extraction.
        assert!(extract(&[
            ("x-b3-traceid", "100000000000000000000000000000000"),
            ("x-b3-spanid", "0000000000000002"),
        ])
        .is_none());
    }

    #[test]
    fn oversized_span_id_reads_as_absent() {
        // 33 hex digits exceeds the 128-bit range; 17 digits is still valid.
        let context = expect_context(extract(&[
            ("x-b3-traceid", "0000000000000001"),
            ("x-b3-spanid", "100000000000000000000000000000000"),
        ]));
        assert_eq!(context.span_id(), Id::ZERO);
    }

    #[test]
    fn wide_span_id_survives_inject_and_extract() {
        let codec = B3Codec::new();
        let span_id = Id::from_u128(u64::MAX as u128 + 7);
        let context = SpanContext::new(Id::from_u64(1), span_id, Id::ZERO);

        let mut carrier = HashMap::new();
        codec.inject(&context, &mut carrier);
        assert_eq!(
            Extractor::get(&carrier, SPAN_ID_HEADER),
            Some("00000000000000010000000000000006")
        );

        let extracted = expect_context(codec.extract(&carrier));
        assert_eq!(extracted.span_id(), span_id);
    }

    #[test]
    fn baggage_is_decoded() {
        let context = expect_context(extract(&[
            ("x-b3-traceid", "0000000000000001"),
            ("x-b3-spanid", "0000000000000002"),
            ("ot-baggage-user-name", "sergei%20rachmaninoff"),
        ]));
        assert_eq!(
            context.baggage_item("user-name").as_deref(),
            Some("sergei rachmaninoff")
        );
    }

    #[test]
    fn tagged_headers_without_ids_yield_tag_context() {
        let codec = B3Codec::with_tagged_headers(HashMap::from([(
            "X-Request-Id".to_string(),
            "request_id".to_string(),
        )]));
        let carrier =
            HashMap::from([("x-request-id".to_string(), "abc-123".to_string())]);
        match codec.extract(&carrier) {
            Some(Extracted::TagContext { tags }) => {
                assert_eq!(tags.get("request_id").map(String::as_str), Some("abc-123"));
            }
            other => panic!("expected tag context, got {other:?}"),
        }
    }

    #[test]
    fn empty_carrier_extracts_nothing() {
        assert!(extract(&[]).is_none());
    }

    #[test]
    fn inject_writes_all_headers_and_locks_priority() {
        let codec = B3Codec::new();
        let context = SpanContext::new(
            Id::from_u128(0x4bf9_2f35_77b3_4da6_a3ce_929d_0e0e_4736),
            Id::from_u64(354),
            Id::from_u64(1234),
        );
        context.set_sampling_priority(SamplingPriority::UserKeep);
        context.set_baggage_item("user name", "a b");

        let mut carrier = HashMap::new();
        codec.inject(&context, &mut carrier);

        assert_eq!(
            Extractor::get(&carrier, TRACE_ID_HEADER),
            Some("4bf92f3577b34da6a3ce929d0e0e4736")
        );
        assert_eq!(
            Extractor::get(&carrier, SPAN_ID_HEADER),
            Some("0000000000000162")
        );
        assert_eq!(
            Extractor::get(&carrier, PARENT_SPAN_ID_HEADER),
            Some("00000000000004d2")
        );
        assert_eq!(Extractor::get(&carrier, FLAGS_HEADER), Some("1"));
        assert_eq!(Extractor::get(&carrier, SAMPLED_HEADER), None);
        assert_eq!(
            Extractor::get(&carrier, "ot-baggage-user name"),
            Some("a%20b")
        );
        assert!(context.priority_locked());
    }

    #[test]
    fn inject_maps_sampler_keep_to_sampled_one() {
        let codec = B3Codec::new();
        let context = SpanContext::new(Id::from_u64(1), Id::from_u64(2), Id::ZERO);
        context.set_sampling_priority(SamplingPriority::SamplerKeep);

        let mut carrier = HashMap::new();
        codec.inject(&context, &mut carrier);
        assert_eq!(Extractor::get(&carrier, SAMPLED_HEADER), Some("1"));
        assert_eq!(Extractor::get(&carrier, FLAGS_HEADER), None);
    }

    #[test]
    fn inject_aborts_for_zero_ids() {
        let codec = B3Codec::new();
        let context = SpanContext::new(Id::ZERO, Id::from_u64(2), Id::ZERO);
        let mut carrier = HashMap::new();
        codec.inject(&context, &mut carrier);
        assert!(carrier.is_empty());
    }

    #[test]
    fn inject_maps_drop_priorities_to_zero() {
        let codec = B3Codec::new();
        let context = SpanContext::new(Id::from_u64(1), Id::from_u64(2), Id::ZERO);
        context.set_sampling_priority(SamplingPriority::UserDrop);

        let mut carrier = HashMap::new();
        codec.inject(&context, &mut carrier);
        assert_eq!(Extractor::get(&carrier, SAMPLED_HEADER), Some("0"));
    }

    #[test]
    fn inject_omits_sampled_when_priority_unset() {
        let codec = B3Codec::new();
        let context = SpanContext::new(Id::from_u64(1), Id::from_u64(2), Id::ZERO);

        let mut carrier = HashMap::new();
        codec.inject(&context, &mut carrier);
        assert_eq!(Extractor::get(&carrier, SAMPLED_HEADER), None);
        // An unset priority must not end up locked by injection.
        assert!(!context.priority_locked());
    }
}
