//! A Datadog tracing runtime: span model, trace-aware context propagation
//! and batched export to a local trace agent.
//!
//! # Overview
//!
//! Spans are created through a [`Tracer`], grouped into traces by a per-trace
//! registry, and shipped to the agent by a background writer when each
//! trace's root span finishes. Two header codecs, B3 multi-header and
//! Datadog-native, carry trace identity and the sampling decision across
//! process boundaries; a one-way `traceparent` renderer serves edge proxies
//! that only correlate.
//!
//! The sampling decision is a four-valued priority with a one-way lock: the
//! first time a decision is read for propagation it freezes, so every
//! downstream service sees the same answer.
//!
//! The writer never blocks span-finishing threads. Traces go through a
//! bounded queue to a dedicated thread that batches them, probes the agent
//! once for the preferred intake endpoint (v0.4, falling back to v0.3), and
//! reports per-service sampling rates back to registered listeners.
//!
//! # Example
//!
//! ```no_run
//! use dd_trace::Tracer;
//!
//! fn main() -> Result<(), dd_trace::Error> {
//!     let tracer = Tracer::builder()
//!         .with_service_name("checkout")
//!         .with_agent_endpoint("http://localhost:8126")
//!         .build()?;
//!
//!     let mut span = tracer
//!         .span("http.request")
//!         .with_resource_name("GET /cart")
//!         .start();
//!     span.set_tag("http.method", "GET");
//!     span.finish();
//!
//!     tracer.shutdown();
//!     Ok(())
//! }
//! ```

pub mod exporter;
pub mod model;
pub mod propagation;
pub mod registry;
pub mod sampling;
pub mod tags;
mod tracer;

pub use exporter::{
    AgentApi, AgentWriter, ApiVersion, Error, ListWriter, ResponseListener,
    SampleRatesByService, Transport, Writer,
};
pub use model::{Id, LogRecord, SamplingPriority, Span, SpanContext, SpanData, TagValue};
pub use propagation::{Extracted, Extractor, Injector, Propagator};
pub use sampling::{AllSampler, Sampler};
pub use tracer::{SpanBuilder, Tracer, TracerBuilder};
