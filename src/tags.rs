//! Well-known tag keys, plus the tag-setting helpers call sites use in place
//! of per-library decorator classes.

use crate::model::Span;

pub const ENV: &str = "env";
pub const SPAN_TYPE: &str = "span.type";
pub const SERVICE_NAME: &str = "service.name";
pub const RESOURCE_NAME: &str = "resource.name";
pub const THREAD_NAME: &str = "thread.name";
pub const THREAD_ID: &str = "thread.id";
pub const DB_STATEMENT: &str = "db.statement";

pub const HTTP_METHOD: &str = "http.method";
pub const HTTP_URL: &str = "http.url";
pub const HTTP_STATUS: &str = "http.status_code";

pub const ERROR_MSG: &str = "error.msg";
pub const ERROR_TYPE: &str = "error.type";
pub const ERROR_STACK: &str = "error.stack";

pub const SPAN_KIND: &str = "span.kind";
pub const SPAN_KIND_SERVER: &str = "server";
pub const SPAN_KIND_CLIENT: &str = "client";

pub const LANGUAGE: &str = "language";
pub const LANGUAGE_VALUE: &str = "rust";

/// Log field that carries an error payload; mapped onto the span error flag.
pub const LOG_ERROR_OBJECT: &str = "error.object";
/// Log field with a bare error message; mapped onto [`ERROR_MSG`].
pub const LOG_MESSAGE: &str = "message";

/// Marks a span as a client of an outbound HTTP call.
pub fn http_client(span: &mut Span, method: &str, url: &str) {
    span.set_tag(SPAN_KIND, SPAN_KIND_CLIENT);
    span.set_tag(HTTP_METHOD, method);
    span.set_tag(HTTP_URL, url);
}

/// Marks a span as serving an inbound HTTP request.
pub fn http_server(span: &mut Span, method: &str, url: &str) {
    span.set_tag(SPAN_KIND, SPAN_KIND_SERVER);
    span.set_tag(HTTP_METHOD, method);
    span.set_tag(HTTP_URL, url);
}

/// Records an HTTP status; 5xx marks the span as errored.
pub fn http_status(span: &mut Span, status: u16) {
    span.set_tag(HTTP_STATUS, i64::from(status));
    if status >= 500 {
        span.set_error(true);
    }
}

/// Records an error value on the span: flag plus message/type tags.
pub fn error(span: &mut Span, err: &dyn std::error::Error) {
    span.set_error(true);
    span.set_tag(ERROR_MSG, err.to_string());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Id, SpanContext};
    use indexmap::IndexMap;
    use std::sync::Arc;
    use std::time::SystemTime;

    fn test_span() -> Span {
        Span::new(
            Arc::new(SpanContext::new(Id::from_u64(1), Id::from_u64(2), Id::ZERO)),
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
    fn server_error_status_flags_span() {
        let mut span = test_span();
        http_server(&mut span, "GET", "/checkout");
        http_status(&mut span, 503);
        assert!(span.is_error());
    }

    #[test]
    fn client_status_ok_does_not_flag() {
        let mut span = test_span();
        http_client(&mut span, "GET", "http://example.com");
        http_status(&mut span, 404);
        assert!(!span.is_error());
    }
}
