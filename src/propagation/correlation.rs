//! One-way correlation header for edge proxies.
//!
//! Rendered in the W3C `traceparent` shape but sent as a `Server-Timing`
//! style value, so intermediaries that only understand fixed widths can
//! still correlate. This path never extracts.

use crate::model::SpanContext;

/// Renders the correlation value for a context. The trace id is always 32
/// hex digits and the span id 16, regardless of the ids' natural widths.
pub fn traceparent_header(context: &SpanContext) -> String {
    format!(
        "traceparent;desc=\"00-{:032x}-{:016x}-01\"",
        context.trace_id().to_u128(),
        context.span_id().to_u64()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Id;

    #[test]
    fn renders_fixed_width_ids() {
        let context = SpanContext::new(Id::from_u64(1234), Id::from_u64(354), Id::ZERO);
        assert_eq!(
            traceparent_header(&context),
            "traceparent;desc=\"00-000000000000000000000000000004d2-0000000000000162-01\""
        );
    }

    #[test]
    fn renders_128_bit_trace_id() {
        let context = SpanContext::new(
            Id::from_u128(0x4bf9_2f35_77b3_4da6_a3ce_929d_0e0e_4736),
            Id::from_u64(0x00f0_67aa_0ba9_02b7),
            Id::ZERO,
        );
        assert_eq!(
            traceparent_header(&context),
            "traceparent;desc=\"00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01\""
        );
    }
}
