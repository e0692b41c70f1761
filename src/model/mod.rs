//! The span/trace data model: ids, the propagable [`SpanContext`] with its
//! sampling-priority state machine, live [`Span`]s and finished [`SpanData`].

mod context;
mod id;
mod span;

pub use context::{SamplingPriority, SpanContext};
pub use id::Id;
pub use span::{LogRecord, Span, SpanData, SpanSink, TagValue};
