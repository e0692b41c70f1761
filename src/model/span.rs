use std::sync::Arc;
use std::time::SystemTime;

use indexmap::IndexMap;

use super::{Id, SpanContext};
use crate::tags;

/// A span tag value. Strings and booleans land in the payload's `meta` map,
/// numbers in `metrics`.
#[derive(Clone, Debug, PartialEq)]
pub enum TagValue {
    String(String),
    Bool(bool),
    Number(f64),
}

impl From<&str> for TagValue {
    fn from(value: &str) -> Self {
        TagValue::String(value.to_string())
    }
}

impl From<String> for TagValue {
    fn from(value: String) -> Self {
        TagValue::String(value)
    }
}

impl From<bool> for TagValue {
    fn from(value: bool) -> Self {
        TagValue::Bool(value)
    }
}

impl From<f64> for TagValue {
    fn from(value: f64) -> Self {
        TagValue::Number(value)
    }
}

impl From<i64> for TagValue {
    fn from(value: i64) -> Self {
        TagValue::Number(value as f64)
    }
}

impl From<u64> for TagValue {
    fn from(value: u64) -> Self {
        TagValue::Number(value as f64)
    }
}

impl From<i32> for TagValue {
    fn from(value: i32) -> Self {
        TagValue::Number(value as f64)
    }
}

/// One timestamped log entry attached to a span.
#[derive(Clone, Debug, PartialEq)]
pub struct LogRecord {
    pub timestamp_micros: u64,
    pub fields: IndexMap<String, String>,
}

/// Receives finished spans. Implemented by the per-trace accumulator; a span
/// holds its sink so `finish` needs no other collaborator.
pub trait SpanSink: Send + Sync + std::fmt::Debug {
    fn on_span_finished(&self, span: SpanData);
}

/// An immutable, finished span ready for export.
#[derive(Clone, Debug)]
pub struct SpanData {
    pub context: Arc<SpanContext>,
    pub operation_name: String,
    pub service_name: String,
    pub resource_name: String,
    pub span_type: Option<String>,
    pub start_time: SystemTime,
    pub duration_nanos: u64,
    pub tags: IndexMap<String, TagValue>,
    pub logs: Vec<LogRecord>,
    pub error: bool,
}

impl SpanData {
    pub fn trace_id(&self) -> Id {
        self.context.trace_id()
    }

    pub fn span_id(&self) -> Id {
        self.context.span_id()
    }

    pub fn parent_id(&self) -> Id {
        self.context.parent_id()
    }

    /// A span is the root of its trace iff it has no parent.
    pub fn is_root(&self) -> bool {
        self.context.parent_id().is_zero()
    }
}

/// A live, mutable span. Tag and log writes are owned by the thread holding
/// the span; the shared pieces (priority, baggage) live on the context.
/// Finishing converts the span into a [`SpanData`] and hands it to its sink.
/// A span that is dropped without `finish` is never reported.
#[derive(Debug)]
pub struct Span {
    context: Arc<SpanContext>,
    operation_name: String,
    service_name: String,
    resource_name: String,
    span_type: Option<String>,
    start_time: SystemTime,
    tags: IndexMap<String, TagValue>,
    logs: Vec<LogRecord>,
    error: bool,
    sink: Option<Arc<dyn SpanSink>>,
}

impl Span {
    pub(crate) fn new(
        context: Arc<SpanContext>,
        operation_name: String,
        service_name: String,
        resource_name: String,
        span_type: Option<String>,
        start_time: SystemTime,
        tags: IndexMap<String, TagValue>,
        sink: Option<Arc<dyn SpanSink>>,
    ) -> Self {
        Span {
            context,
            operation_name,
            service_name,
            resource_name,
            span_type,
            start_time,
            tags,
            logs: Vec::new(),
            error: false,
            sink,
        }
    }

    pub fn context(&self) -> &Arc<SpanContext> {
        &self.context
    }

    pub fn operation_name(&self) -> &str {
        &self.operation_name
    }

    pub fn set_operation_name(&mut self, name: impl Into<String>) {
        self.operation_name = name.into();
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn set_service_name(&mut self, name: impl Into<String>) {
        self.service_name = name.into();
    }

    pub fn resource_name(&self) -> &str {
        &self.resource_name
    }

    pub fn set_resource_name(&mut self, name: impl Into<String>) {
        self.resource_name = name.into();
    }

    pub fn set_span_type(&mut self, span_type: impl Into<String>) {
        self.span_type = Some(span_type.into());
    }

    pub fn is_error(&self) -> bool {
        self.error
    }

    pub fn set_error(&mut self, error: bool) {
        self.error = error;
    }

    /// Last write wins.
    pub fn set_tag(&mut self, key: impl Into<String>, value: impl Into<TagValue>) {
        self.tags.insert(key.into(), value.into());
    }

    pub fn set_baggage_item(&self, key: impl Into<String>, value: impl Into<String>) {
        self.context.set_baggage_item(key, value);
    }

    /// Appends a log entry stamped with the current time.
    pub fn log<I, K, V>(&mut self, fields: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let now = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|elapsed| elapsed.as_micros() as u64)
            .unwrap_or(0);
        self.log_at(now, fields);
    }

    /// Appends a log entry with an explicit timestamp. An `error.object` or
    /// `message` field marks the span as errored instead of being recorded,
    /// matching the original tracer's log handler.
    pub fn log_at<I, K, V>(&mut self, timestamp_micros: u64, fields: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let fields: IndexMap<String, String> = fields
            .into_iter()
            .map(|(key, value)| (key.into(), value.into()))
            .collect();
        if fields.contains_key(tags::LOG_ERROR_OBJECT) {
            self.error = true;
            return;
        }
        if let Some(message) = fields.get(tags::LOG_MESSAGE) {
            let message = message.clone();
            self.set_tag(tags::ERROR_MSG, message);
            return;
        }
        self.logs.push(LogRecord {
            timestamp_micros,
            fields,
        });
    }

    /// Finishes the span now.
    pub fn finish(self) {
        self.finish_at(SystemTime::now());
    }

    /// Finishes the span with an explicit end time.
    pub fn finish_at(mut self, end_time: SystemTime) {
        let duration_nanos = end_time
            .duration_since(self.start_time)
            .map(|elapsed| elapsed.as_nanos() as u64)
            .unwrap_or(0);
        let sink = self.sink.take();
        let data = SpanData {
            context: self.context,
            operation_name: self.operation_name,
            service_name: self.service_name,
            resource_name: self.resource_name,
            span_type: self.span_type,
            start_time: self.start_time,
            duration_nanos,
            tags: self.tags,
            logs: self.logs,
            error: self.error,
        };
        if let Some(sink) = sink {
            sink.on_span_finished(data);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn test_span() -> Span {
        let context = Arc::new(SpanContext::new(
            Id::from_u64(1),
            Id::from_u64(2),
            Id::ZERO,
        ));
        Span::new(
            context,
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
    fn tags_are_last_write_wins() {
        let mut span = test_span();
        span.set_tag("key", "first");
        span.set_tag("key", "second");
        assert_eq!(
            span.tags.get("key"),
            Some(&TagValue::String("second".to_string()))
        );
    }

    #[test]
    fn error_log_sets_error_flag() {
        let mut span = test_span();
        span.log([("error.object", "connection refused")]);
        assert!(span.is_error());
        assert!(span.logs.is_empty());
    }

    #[test]
    fn plain_log_is_appended_in_order() {
        let mut span = test_span();
        span.log_at(1, [("event", "cache.miss")]);
        span.log_at(2, [("event", "retry")]);
        assert_eq!(span.logs.len(), 2);
        assert_eq!(span.logs[0].timestamp_micros, 1);
        assert_eq!(span.logs[1].fields.get("event").map(String::as_str), Some("retry"));
    }

    #[test]
    fn finish_computes_duration() {
        #[derive(Debug, Default)]
        struct Capture(std::sync::Mutex<Vec<SpanData>>);
        impl SpanSink for Capture {
            fn on_span_finished(&self, span: SpanData) {
                self.0.lock().unwrap().push(span);
            }
        }

        let capture = Arc::new(Capture::default());
        let context = Arc::new(SpanContext::new(
            Id::from_u64(1),
            Id::from_u64(2),
            Id::ZERO,
        ));
        let span = Span::new(
            context,
            "operation".to_string(),
            "service".to_string(),
            "resource".to_string(),
            None,
            SystemTime::UNIX_EPOCH,
            IndexMap::new(),
            Some(capture.clone()),
        );
        span.finish_at(SystemTime::UNIX_EPOCH + Duration::from_secs(1));

        let finished = capture.0.lock().unwrap();
        assert_eq!(finished.len(), 1);
        assert_eq!(finished[0].duration_nanos, 1_000_000_000);
        assert!(finished[0].is_root());
    }
}
