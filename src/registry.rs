//! Per-trace span accumulation.
//!
//! Finished spans are grouped by trace id; when the root span of a trace
//! finishes, the whole group is handed to the writer exactly once. A trace's
//! flush decision happens under that trace's own lock, so concurrent
//! finishers cannot double-write a trace. Spans finishing after their trace
//! was flushed are dropped and counted.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::exporter::Writer;
use crate::model::{SpanData, SpanSink};

/// Flushed trace ids remembered so late spans do not resurrect their trace.
/// Oldest entries are evicted to keep the registry bounded.
const FLUSHED_TRACKING_LIMIT: usize = 4096;

#[derive(Debug, Default)]
struct PendingTrace {
    spans: Vec<SpanData>,
    flushed: bool,
}

/// Groups finished spans into traces and flushes each trace on root finish.
#[derive(Debug)]
pub struct TraceRegistry {
    writer: Arc<dyn Writer>,
    // The outer lock covers only lookup and insert; span accumulation and the
    // flush decision happen under the per-trace lock. Flushed entries stay in
    // the map as tombstones until evicted, so a span finishing after the
    // flush hits the `flushed` branch instead of starting a new accumulation.
    traces: Mutex<HashMap<u128, Arc<Mutex<PendingTrace>>>>,
    flushed_ids: Mutex<VecDeque<u128>>,
    late_spans_dropped: AtomicU64,
}

impl TraceRegistry {
    pub fn new(writer: Arc<dyn Writer>) -> Self {
        TraceRegistry {
            writer,
            traces: Mutex::new(HashMap::new()),
            flushed_ids: Mutex::new(VecDeque::new()),
            late_spans_dropped: AtomicU64::new(0),
        }
    }

    /// Number of traces with at least one finished span awaiting their root.
    pub fn pending_traces(&self) -> usize {
        let total = self.traces.lock().map(|traces| traces.len()).unwrap_or(0);
        let flushed = self
            .flushed_ids
            .lock()
            .map(|flushed| flushed.len())
            .unwrap_or(0);
        total.saturating_sub(flushed)
    }

    /// Spans that finished after their trace had already been written.
    pub fn late_spans_dropped(&self) -> u64 {
        self.late_spans_dropped.load(Ordering::Relaxed)
    }

    fn entry(&self, trace_id: u128) -> Option<Arc<Mutex<PendingTrace>>> {
        let mut traces = self.traces.lock().ok()?;
        Some(Arc::clone(
            traces.entry(trace_id).or_default(),
        ))
    }

    /// Marks a trace id as flushed, evicting the oldest tombstone once the
    /// tracking window is full.
    fn retire(&self, trace_id: u128) {
        let evicted = match self.flushed_ids.lock() {
            Ok(mut flushed) => {
                flushed.push_back(trace_id);
                if flushed.len() > FLUSHED_TRACKING_LIMIT {
                    flushed.pop_front()
                } else {
                    None
                }
            }
            Err(_) => None,
        };
        if let Some(old) = evicted {
            if let Ok(mut traces) = self.traces.lock() {
                traces.remove(&old);
            }
        }
    }
}

impl SpanSink for TraceRegistry {
    fn on_span_finished(&self, span: SpanData) {
        let trace_id = span.trace_id().to_u128();
        let Some(entry) = self.entry(trace_id) else {
            return;
        };

        let flush = {
            let Ok(mut pending) = entry.lock() else {
                return;
            };
            if pending.flushed {
                self.late_spans_dropped.fetch_add(1, Ordering::Relaxed);
                debug!(
                    trace_id = %span.trace_id(),
                    span_id = %span.span_id(),
                    "dropping span finished after its trace was written"
                );
                return;
            }
            let is_root = span.is_root();
            pending.spans.push(span);
            if !is_root {
                None
            } else {
                pending.flushed = true;
                Some(std::mem::take(&mut pending.spans))
            }
        };

        if let Some(trace) = flush {
            self.retire(trace_id);
            self.writer.write(trace);
        }
    }
}
