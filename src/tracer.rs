//! The tracer: span creation, codec fan-out and pipeline lifecycle.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use indexmap::IndexMap;
use rand::Rng;
use tracing::debug;

use crate::exporter::{AgentApi, AgentWriter, Error, ResponseListener, Transport, Writer};
use crate::model::{Id, SamplingPriority, Span, SpanContext, TagValue};
use crate::propagation::{Extracted, Extractor, Injector, Propagator, B3Codec, DatadogCodec};
use crate::registry::TraceRegistry;
use crate::sampling::{AllSampler, Sampler};
use crate::tags;

const DEFAULT_SERVICE_NAME: &str = "unnamed-rust-service";
const DEFAULT_AGENT_ENDPOINT: &str = "http://localhost:8126";
const DEFAULT_AGENT_TIMEOUT: Duration = Duration::from_secs(2);

/// Entry point of the tracing runtime.
///
/// A tracer owns the whole pipeline: spans feed the per-trace registry, the
/// registry feeds the writer, the writer ships to the agent. There is no
/// global instance; applications create one and share it.
#[derive(Debug)]
pub struct Tracer {
    service_name: String,
    writer: Arc<dyn Writer>,
    registry: Arc<TraceRegistry>,
    sampler: Arc<dyn Sampler>,
    codecs: Vec<Arc<dyn Propagator>>,
    api: Option<Arc<AgentApi>>,
}

impl Tracer {
    pub fn builder() -> TracerBuilder {
        TracerBuilder::default()
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Starts building a span with the given operation name.
    pub fn span(&self, operation_name: impl Into<String>) -> SpanBuilder<'_> {
        SpanBuilder {
            tracer: self,
            operation_name: operation_name.into(),
            service_name: None,
            resource_name: None,
            span_type: None,
            start_time: None,
            tags: IndexMap::new(),
            parent: None,
            extracted_tags: HashMap::new(),
        }
    }

    /// Writes the context into the carrier through every configured codec.
    pub fn inject(&self, context: &SpanContext, carrier: &mut dyn Injector) {
        for codec in &self.codecs {
            codec.inject(context, carrier);
        }
    }

    /// Reads a context out of the carrier; the first codec that finds one
    /// wins.
    pub fn extract(&self, carrier: &dyn Extractor) -> Option<Extracted> {
        self.codecs.iter().find_map(|codec| codec.extract(carrier))
    }

    /// Registers for per-service sample-rate feedback from the agent. A
    /// no-op when the tracer writes somewhere other than an agent.
    pub fn add_response_listener(&self, listener: Arc<dyn ResponseListener>) {
        match &self.api {
            Some(api) => api.add_response_listener(listener),
            None => debug!("no agent api, ignoring response listener"),
        }
    }

    /// Pushes buffered traces to the agent.
    pub fn flush(&self) -> bool {
        self.writer.flush()
    }

    /// Flushes and stops the export pipeline. Spans finished afterwards are
    /// dropped.
    pub fn shutdown(&self) {
        self.writer.close();
    }
}

/// Configuration for a [`Tracer`]. Transport problems surface from `build`,
/// before any span is created.
#[derive(Debug)]
pub struct TracerBuilder {
    service_name: String,
    agent_endpoint: String,
    agent_timeout: Duration,
    sampler: Arc<dyn Sampler>,
    codecs: Option<Vec<Arc<dyn Propagator>>>,
    tagged_headers: HashMap<String, String>,
    writer: Option<Arc<dyn Writer>>,
}

impl Default for TracerBuilder {
    fn default() -> Self {
        TracerBuilder {
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            agent_endpoint: DEFAULT_AGENT_ENDPOINT.to_string(),
            agent_timeout: DEFAULT_AGENT_TIMEOUT,
            sampler: Arc::new(AllSampler::new()),
            codecs: None,
            tagged_headers: HashMap::new(),
            writer: None,
        }
    }
}

impl TracerBuilder {
    pub fn with_service_name(mut self, service_name: impl Into<String>) -> Self {
        self.service_name = service_name.into();
        self
    }

    /// Agent endpoint, `http://host:port` or `unix:///path`.
    pub fn with_agent_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.agent_endpoint = endpoint.into();
        self
    }

    pub fn with_agent_timeout(mut self, timeout: Duration) -> Self {
        self.agent_timeout = timeout;
        self
    }

    pub fn with_sampler(mut self, sampler: Arc<dyn Sampler>) -> Self {
        self.sampler = sampler;
        self
    }

    /// Replaces the default codec pair (Datadog-native, then B3).
    pub fn with_codecs(mut self, codecs: Vec<Arc<dyn Propagator>>) -> Self {
        self.codecs = Some(codecs);
        self
    }

    /// Inbound headers to capture as span tags during extraction.
    pub fn with_tagged_headers(mut self, tagged_headers: HashMap<String, String>) -> Self {
        self.tagged_headers = tagged_headers;
        self
    }

    /// Bypasses the agent and writes traces to the given sink instead.
    pub fn with_writer(mut self, writer: Arc<dyn Writer>) -> Self {
        self.writer = Some(writer);
        self
    }

    pub fn build(self) -> Result<Tracer, Error> {
        let codecs = self.codecs.unwrap_or_else(|| {
            vec![
                Arc::new(DatadogCodec::with_tagged_headers(
                    self.tagged_headers.clone(),
                )) as Arc<dyn Propagator>,
                Arc::new(B3Codec::with_tagged_headers(self.tagged_headers.clone())),
            ]
        });

        let (writer, api) = match self.writer {
            Some(writer) => (writer, None),
            None => {
                let transport = Transport::parse(&self.agent_endpoint)?;
                let api = Arc::new(AgentApi::new(transport, self.agent_timeout)?);
                let writer: Arc<dyn Writer> = Arc::new(AgentWriter::new(api.clone())?);
                (writer, Some(api))
            }
        };

        Ok(Tracer {
            service_name: self.service_name,
            registry: Arc::new(TraceRegistry::new(writer.clone())),
            writer,
            sampler: self.sampler,
            codecs,
            api,
        })
    }
}

#[derive(Debug)]
struct ParentInfo {
    trace_id: Id,
    span_id: Id,
    baggage: HashMap<String, String>,
    priority: Option<SamplingPriority>,
    priority_locked: bool,
}

impl ParentInfo {
    fn of(context: &SpanContext) -> ParentInfo {
        ParentInfo {
            trace_id: context.trace_id(),
            span_id: context.span_id(),
            baggage: context.baggage(),
            priority: context.sampling_priority(),
            priority_locked: context.priority_locked(),
        }
    }
}

/// Builder for a single span.
#[derive(Debug)]
pub struct SpanBuilder<'a> {
    tracer: &'a Tracer,
    operation_name: String,
    service_name: Option<String>,
    resource_name: Option<String>,
    span_type: Option<String>,
    start_time: Option<SystemTime>,
    tags: IndexMap<String, TagValue>,
    parent: Option<ParentInfo>,
    extracted_tags: HashMap<String, String>,
}

impl SpanBuilder<'_> {
    /// Parents the span on a local context.
    pub fn child_of(mut self, parent: &SpanContext) -> Self {
        self.parent = Some(ParentInfo::of(parent));
        self
    }

    /// Parents the span on whatever extraction produced: a full context
    /// continues the inbound trace, a tag context only contributes tags.
    pub fn continue_from(mut self, extracted: &Extracted) -> Self {
        match extracted {
            Extracted::Context { context, tags } => {
                self.parent = Some(ParentInfo::of(context));
                self.extracted_tags = tags.clone();
            }
            Extracted::TagContext { tags } => {
                self.extracted_tags = tags.clone();
            }
        }
        self
    }

    pub fn with_service_name(mut self, service_name: impl Into<String>) -> Self {
        self.service_name = Some(service_name.into());
        self
    }

    /// Defaults to the operation name when unset.
    pub fn with_resource_name(mut self, resource_name: impl Into<String>) -> Self {
        self.resource_name = Some(resource_name.into());
        self
    }

    pub fn with_span_type(mut self, span_type: impl Into<String>) -> Self {
        self.span_type = Some(span_type.into());
        self
    }

    pub fn with_start_time(mut self, start_time: SystemTime) -> Self {
        self.start_time = Some(start_time);
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<TagValue>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn start(self) -> Span {
        let span_id = random_id();
        let context = match &self.parent {
            Some(parent) => {
                let context = SpanContext::with_baggage(
                    parent.trace_id,
                    span_id,
                    parent.span_id,
                    parent.baggage.clone(),
                );
                // Children start from the decision in force at creation time.
                if let Some(priority) = parent.priority {
                    context.set_sampling_priority(priority);
                    if parent.priority_locked {
                        context.read_and_lock_priority();
                    }
                }
                context
            }
            None => SpanContext::new(random_id(), span_id, Id::ZERO),
        };
        let is_root = self.parent.is_none();

        let mut tags = self.tags;
        for (key, value) in self.extracted_tags {
            tags.insert(key, TagValue::String(value));
        }
        tags.insert(
            tags::LANGUAGE.to_string(),
            TagValue::String(tags::LANGUAGE_VALUE.to_string()),
        );
        let current = std::thread::current();
        if let Some(name) = current.name() {
            tags.insert(
                tags::THREAD_NAME.to_string(),
                TagValue::String(name.to_string()),
            );
        }
        if let Some(thread_id) = numeric_thread_id() {
            tags.insert(tags::THREAD_ID.to_string(), TagValue::Number(thread_id));
        }

        let span = Span::new(
            Arc::new(context),
            self.operation_name.clone(),
            self.service_name
                .unwrap_or_else(|| self.tracer.service_name.clone()),
            self.resource_name.unwrap_or(self.operation_name),
            self.span_type,
            self.start_time.unwrap_or_else(SystemTime::now),
            tags,
            Some(self.tracer.registry.clone()),
        );
        if is_root {
            self.tracer.sampler.initialize_priority(&span);
        }
        span
    }
}

/// Nonzero 64-bit id. Ids stay within 64 bits so every codec and the agent
/// payload carry them without truncation.
fn random_id() -> Id {
    Id::from_u64(rand::rng().random_range(1..=u64::MAX))
}

/// The numeric part of the thread id's debug form; there is no stable
/// accessor for it yet.
fn numeric_thread_id() -> Option<f64> {
    let id = format!("{:?}", std::thread::current().id());
    let digits: String = id.chars().filter(char::is_ascii_digit).collect();
    digits.parse().ok()
}
