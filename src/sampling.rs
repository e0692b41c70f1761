//! Sampling policies. The export pipeline only needs the two-operation
//! contract below; rate-based policies plug in through the same trait.

use crate::model::{SamplingPriority, Span, SpanData};

/// Decides whether spans are kept, and stamps the initial priority on roots.
pub trait Sampler: Send + Sync + std::fmt::Debug {
    /// Informational keep/drop decision. Does not by itself gate writing.
    fn sample(&self, span: &SpanData) -> bool;

    /// Called once per root span. Must not override a priority that an
    /// inbound propagation codec already set.
    fn initialize_priority(&self, span: &Span);
}

/// Sampler that always says yes.
#[derive(Debug, Default)]
pub struct AllSampler;

impl AllSampler {
    pub fn new() -> Self {
        AllSampler
    }
}

impl Sampler for AllSampler {
    fn sample(&self, _span: &SpanData) -> bool {
        true
    }

    fn initialize_priority(&self, span: &Span) {
        if span.context().sampling_priority().is_none() {
            span.context()
                .set_sampling_priority(SamplingPriority::SamplerKeep);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Id, SpanContext};
    use indexmap::IndexMap;
    use std::sync::Arc;
    use std::time::SystemTime;

    fn root_span() -> Span {
        Span::new(
            Arc::new(SpanContext::new(Id::from_u64(7), Id::from_u64(1), Id::ZERO)),
            "operation".to_string(),
            "service".to_string(),
            "resource".to_string(),
            None,
            SystemTime::UNIX_EPOCH,
            IndexMap::new(),
            None,
        )
    }

    #[test]
    fn stamps_sampler_keep_when_unset() {
        let span = root_span();
        AllSampler::new().initialize_priority(&span);
        assert_eq!(
            span.context().sampling_priority(),
            Some(SamplingPriority::SamplerKeep)
        );
    }

    #[test]
    fn never_overrides_extracted_priority() {
        let span = root_span();
        span.context()
            .set_sampling_priority(SamplingPriority::UserDrop);
        AllSampler::new().initialize_priority(&span);
        assert_eq!(
            span.context().sampling_priority(),
            Some(SamplingPriority::UserDrop)
        );
    }
}
