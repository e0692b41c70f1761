//! The agent-facing API: endpoint probing, request metadata and sample-rate
//! feedback.
//!
//! Sends are fire-and-verify: a failed batch is reported to the caller and
//! dropped, never retried. Failures are logged at debug level every time and
//! at warn level at most once per five minutes, so a long agent outage does
//! not flood the host application's logs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use http_body_util::Full;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::exporter::container;
use crate::exporter::model::{encode_batch, ApiVersion, Error};
use crate::exporter::transport::{AgentClient, Transport};
use crate::model::SpanData;

pub(crate) const LANG_HEADER: &str = "Datadog-Meta-Lang";
pub(crate) const LANG_VERSION_HEADER: &str = "Datadog-Meta-Lang-Version";
pub(crate) const TRACER_VERSION_HEADER: &str = "Datadog-Meta-Tracer-Version";
pub(crate) const CONTAINER_ID_HEADER: &str = "Datadog-Container-ID";
pub(crate) const TRACE_COUNT_HEADER: &str = "X-Datadog-Trace-Count";

const LANG: &str = "rust";
const TRACER_VERSION: &str = env!("CARGO_PKG_VERSION");
const LANG_VERSION: &str = env!("CARGO_PKG_RUST_VERSION");

/// An empty msgpack trace array, used to probe the preferred endpoint.
const PROBE_PAYLOAD: [u8; 1] = [0x90];

/// Seconds between warn-level reports of send failures.
const WARN_INTERVAL_SECS: u64 = 5 * 60;

/// Sampling rates keyed by service, as returned by the v0.4 endpoint.
pub type SampleRatesByService = HashMap<String, HashMap<String, f64>>;

/// Receives agent feedback after each successful send that carried any.
pub trait ResponseListener: Send + Sync + std::fmt::Debug {
    /// `endpoint` is the full uri the batch was sent to.
    fn on_response(&self, endpoint: &str, rates: &SampleRatesByService);
}

/// The writer's view of the trace intake.
pub(crate) trait Api: Send + Sync + std::fmt::Debug {
    /// Sends a batch. `representative_count` is the number of traces the
    /// batch stands for, including traces dropped before encoding.
    fn send_traces(&self, traces: Vec<Vec<SpanData>>, representative_count: u64) -> bool;
}

/// Client for the Datadog trace agent.
///
/// The intake version is probed once, on the first send: an empty payload is
/// PUT to the v0.4 endpoint, and a non-success status downgrades every later
/// send to v0.3. The api owns a single-threaded tokio runtime; callers drive
/// it by blocking, which suits the one dedicated writer thread.
#[derive(Debug)]
pub struct AgentApi {
    runtime: tokio::runtime::Runtime,
    client: AgentClient,
    version: OnceCell<ApiVersion>,
    listeners: RwLock<Vec<Arc<dyn ResponseListener>>>,
    container_id: Option<String>,
    next_warn_at: AtomicU64,
}

impl AgentApi {
    pub fn new(transport: Transport, timeout: Duration) -> Result<AgentApi, Error> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        Ok(AgentApi {
            runtime,
            client: AgentClient::new(transport, timeout),
            version: OnceCell::new(),
            listeners: RwLock::new(Vec::new()),
            container_id: container::container_id(),
            next_warn_at: AtomicU64::new(0),
        })
    }

    /// Registers a feedback listener. The same listener instance is only
    /// registered once.
    pub fn add_response_listener(&self, listener: Arc<dyn ResponseListener>) {
        if let Ok(mut listeners) = self.listeners.write() {
            if !listeners.iter().any(|known| Arc::ptr_eq(known, &listener)) {
                listeners.push(listener);
            }
        }
    }

    /// The detected intake version, if the probe already ran.
    pub fn detected_version(&self) -> Option<ApiVersion> {
        self.version.get().copied()
    }

    async fn detect_version(&self) -> Result<ApiVersion, Error> {
        // One retry covers an agent that is still binding its socket.
        for attempt in 0..2u32 {
            let request =
                self.build_request(ApiVersion::Version04, PROBE_PAYLOAD.to_vec(), 0)?;
            match self.client.send(request).await {
                Ok(response) if response.status().is_success() => {
                    debug!("agent supports the v0.4 trace endpoint");
                    return Ok(ApiVersion::Version04);
                }
                Ok(response) => {
                    debug!(
                        status = %response.status(),
                        "agent rejected the v0.4 endpoint, falling back to v0.3"
                    );
                    return Ok(ApiVersion::Version03);
                }
                Err(error) => debug!(%error, attempt, "endpoint probe failed"),
            }
        }
        // An unreachable agent binds the conservative endpoint for the
        // lifetime of the process; the probe never runs again.
        Ok(ApiVersion::Version03)
    }

    fn build_request(
        &self,
        version: ApiVersion,
        payload: Vec<u8>,
        representative_count: u64,
    ) -> Result<http::Request<Full<Bytes>>, Error> {
        let mut builder = http::Request::builder()
            .method(http::Method::PUT)
            .uri(version.path())
            .header(http::header::HOST, self.client.transport().host_header())
            .header(http::header::CONNECTION, "close")
            .header(http::header::CONTENT_TYPE, version.content_type())
            .header(LANG_HEADER, LANG)
            .header(LANG_VERSION_HEADER, LANG_VERSION)
            .header(TRACER_VERSION_HEADER, TRACER_VERSION)
            .header(TRACE_COUNT_HEADER, representative_count.to_string());
        if let Some(container_id) = &self.container_id {
            builder = builder.header(CONTAINER_ID_HEADER, container_id);
        }
        Ok(builder.body(Full::new(Bytes::from(payload)))?)
    }

    /// Forwards per-service sample rates to registered listeners. An empty
    /// or `OK` body means the agent had no feedback to give.
    fn dispatch_feedback(&self, version: ApiVersion, body: &Bytes) {
        let text = String::from_utf8_lossy(body);
        let trimmed = text.trim();
        if trimmed.is_empty() || trimmed == "OK" {
            return;
        }
        let rates: SampleRatesByService = match serde_json::from_str(trimmed) {
            Ok(rates) => rates,
            Err(error) => {
                debug!(%error, "ignoring unparseable agent response body");
                return;
            }
        };
        let endpoint = format!("{}{}", self.client.transport(), version.path());
        if let Ok(listeners) = self.listeners.read() {
            for listener in listeners.iter() {
                listener.on_response(&endpoint, &rates);
            }
        }
    }

    fn log_send_failure(&self, message: &str) {
        debug!("{message}");
        let now = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or(0);
        let next = self.next_warn_at.load(Ordering::Relaxed);
        if now >= next
            && self
                .next_warn_at
                .compare_exchange(
                    next,
                    now + WARN_INTERVAL_SECS,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                )
                .is_ok()
        {
            warn!("{message} (further failures logged at debug level)");
        }
    }
}

impl Api for AgentApi {
    fn send_traces(&self, traces: Vec<Vec<SpanData>>, representative_count: u64) -> bool {
        let (payload, encoded_count) = match encode_batch(traces) {
            Ok(encoded) => encoded,
            Err(error) => {
                self.log_send_failure(&format!("failed to encode trace batch: {error}"));
                return false;
            }
        };

        self.runtime.block_on(async {
            let version = match self.version.get_or_try_init(|| self.detect_version()).await {
                Ok(version) => *version,
                Err(error) => {
                    self.log_send_failure(&format!(
                        "failed to probe agent at {}: {error}",
                        self.client.transport()
                    ));
                    return false;
                }
            };

            let request = match self.build_request(version, payload, representative_count) {
                Ok(request) => request,
                Err(error) => {
                    self.log_send_failure(&format!("failed to build agent request: {error}"));
                    return false;
                }
            };

            match self.client.send(request).await {
                Ok(response) if response.status().is_success() => {
                    debug!(
                        traces = encoded_count,
                        endpoint = version.path(),
                        "sent trace batch to agent"
                    );
                    self.dispatch_feedback(version, response.body());
                    true
                }
                Ok(response) => {
                    self.log_send_failure(&format!(
                        "agent at {} responded with {}",
                        self.client.transport(),
                        response.status()
                    ));
                    false
                }
                Err(error) => {
                    self.log_send_failure(&format!(
                        "failed to send traces to agent at {}: {error}",
                        self.client.transport()
                    ));
                    false
                }
            }
        })
    }
}
