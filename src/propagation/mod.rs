//! Context propagation: generic string-keyed carriers plus the two header
//! codecs (B3 and Datadog-native) and the one-way correlation renderer.
//!
//! The codecs are parallel implementations of the same [`Propagator`]
//! contract; they share the model but no codec code.

use std::collections::HashMap;

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

use crate::model::SpanContext;

mod b3;
pub mod correlation;
mod datadog;

pub use b3::B3Codec;
pub use datadog::DatadogCodec;

/// Baggage entries travel under this header prefix in both codecs.
pub const BAGGAGE_PREFIX: &str = "ot-baggage-";

/// Adds fields to an outbound carrier.
pub trait Injector {
    fn set(&mut self, key: &str, value: String);
}

/// Reads fields from an inbound carrier. Lookup is case-insensitive.
pub trait Extractor {
    fn get(&self, key: &str) -> Option<&str>;
    fn keys(&self) -> Vec<&str>;
}

impl<S: std::hash::BuildHasher> Injector for HashMap<String, String, S> {
    fn set(&mut self, key: &str, value: String) {
        self.insert(key.to_lowercase(), value);
    }
}

impl<S: std::hash::BuildHasher> Extractor for HashMap<String, String, S> {
    fn get(&self, key: &str) -> Option<&str> {
        self.get(&key.to_lowercase()).map(String::as_str)
    }

    fn keys(&self) -> Vec<&str> {
        self.keys().map(String::as_str).collect()
    }
}

/// Injector over an [`http::HeaderMap`]. Invalid names or values are dropped.
pub struct HeaderInjector<'a>(pub &'a mut http::HeaderMap);

impl Injector for HeaderInjector<'_> {
    fn set(&mut self, key: &str, value: String) {
        if let Ok(name) = http::header::HeaderName::from_bytes(key.as_bytes()) {
            if let Ok(value) = http::header::HeaderValue::from_str(&value) {
                self.0.insert(name, value);
            }
        }
    }
}

/// Extractor over an [`http::HeaderMap`]. Non-ASCII values read as absent.
pub struct HeaderExtractor<'a>(pub &'a http::HeaderMap);

impl Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|value| value.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(http::HeaderName::as_str).collect()
    }
}

/// What extraction produced.
#[derive(Debug)]
pub enum Extracted {
    /// A full inbound context: the ids to parent onto, with the sampling
    /// priority already locked, plus any tags matched from configured
    /// header-to-tag mappings.
    Context {
        context: SpanContext,
        tags: HashMap<String, String>,
    },
    /// No trace id was present, but a configured header-to-tag mapping
    /// matched. Carries metadata without starting a real trace.
    TagContext { tags: HashMap<String, String> },
}

/// The abstract codec contract both header formats implement.
pub trait Propagator: Send + Sync + std::fmt::Debug {
    fn inject(&self, context: &SpanContext, carrier: &mut dyn Injector);
    fn extract(&self, carrier: &dyn Extractor) -> Option<Extracted>;
}

/// RFC 3986 unreserved characters stay literal; everything else is escaped.
const BAGGAGE_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

pub(crate) fn encode_baggage(value: &str) -> String {
    utf8_percent_encode(value, BAGGAGE_ENCODE_SET).to_string()
}

pub(crate) fn decode_baggage(value: &str) -> String {
    percent_decode_str(value)
        .decode_utf8()
        .map(|decoded| decoded.into_owned())
        .unwrap_or_else(|_| value.to_string())
}

/// Lowercases and trims the keys of a configured header-to-tag mapping.
pub(crate) fn normalize_tagged_headers(
    tagged_headers: HashMap<String, String>,
) -> HashMap<String, String> {
    tagged_headers
        .into_iter()
        .map(|(header, tag)| (header.trim().to_lowercase(), tag))
        .collect()
}
