use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::RwLock;

use super::Id;

/// Sentinel for "no priority has been decided yet".
const PRIORITY_UNSET: i32 = i32::MIN;

/// Keep/drop decision propagated with a trace.
///
/// The numeric values are the ones carried by the Datadog-native sampling
/// header and the `_sampling_priority_v1` metric.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SamplingPriority {
    /// The user explicitly dropped the trace.
    UserDrop,
    /// The sampler decided to drop the trace.
    SamplerDrop,
    /// The sampler decided to keep the trace.
    SamplerKeep,
    /// The user explicitly kept the trace (debug/force-keep on the wire).
    UserKeep,
}

impl SamplingPriority {
    pub const fn as_i32(self) -> i32 {
        match self {
            SamplingPriority::UserDrop => -1,
            SamplingPriority::SamplerDrop => 0,
            SamplingPriority::SamplerKeep => 1,
            SamplingPriority::UserKeep => 2,
        }
    }

    pub const fn from_i32(value: i32) -> Option<Self> {
        match value {
            -1 => Some(SamplingPriority::UserDrop),
            0 => Some(SamplingPriority::SamplerDrop),
            1 => Some(SamplingPriority::SamplerKeep),
            2 => Some(SamplingPriority::UserKeep),
            _ => None,
        }
    }
}

/// The propagable identity of a span: ids, sampling decision and baggage.
///
/// A context is shared behind an `Arc` between the span that owns it and any
/// code propagating it across threads, so the mutable pieces use interior
/// mutability. The sampling priority is guarded by a one-way lock: the first
/// read for propagation freezes the value, so every downstream inject of the
/// same context emits a consistent decision.
#[derive(Debug)]
pub struct SpanContext {
    trace_id: Id,
    span_id: Id,
    parent_id: Id,
    priority: AtomicI32,
    priority_locked: AtomicBool,
    baggage: RwLock<HashMap<String, String>>,
}

impl SpanContext {
    pub fn new(trace_id: Id, span_id: Id, parent_id: Id) -> Self {
        Self::with_baggage(trace_id, span_id, parent_id, HashMap::new())
    }

    pub fn with_baggage(
        trace_id: Id,
        span_id: Id,
        parent_id: Id,
        baggage: HashMap<String, String>,
    ) -> Self {
        SpanContext {
            trace_id,
            span_id,
            parent_id,
            priority: AtomicI32::new(PRIORITY_UNSET),
            priority_locked: AtomicBool::new(false),
            baggage: RwLock::new(baggage),
        }
    }

    pub fn trace_id(&self) -> Id {
        self.trace_id
    }

    pub fn span_id(&self) -> Id {
        self.span_id
    }

    pub fn parent_id(&self) -> Id {
        self.parent_id
    }

    /// Current priority, `None` while unset.
    pub fn sampling_priority(&self) -> Option<SamplingPriority> {
        SamplingPriority::from_i32(self.priority.load(Ordering::Acquire))
    }

    /// Sets the priority unless a consumer already locked it for propagation.
    /// Returns whether the new value was applied.
    pub fn set_sampling_priority(&self, priority: SamplingPriority) -> bool {
        if self.priority_locked.load(Ordering::Acquire) {
            return false;
        }
        self.priority.store(priority.as_i32(), Ordering::Release);
        true
    }

    /// Reads the priority for propagation. If a decision exists it becomes
    /// locked and later `set_sampling_priority` calls are rejected.
    pub fn read_and_lock_priority(&self) -> Option<SamplingPriority> {
        let current = self.sampling_priority();
        if current.is_some() {
            self.priority_locked.store(true, Ordering::Release);
        }
        current
    }

    pub fn priority_locked(&self) -> bool {
        self.priority_locked.load(Ordering::Acquire)
    }

    pub fn set_baggage_item(&self, key: impl Into<String>, value: impl Into<String>) {
        if let Ok(mut baggage) = self.baggage.write() {
            baggage.insert(key.into(), value.into());
        }
    }

    pub fn baggage_item(&self, key: &str) -> Option<String> {
        self.baggage.read().ok()?.get(key).cloned()
    }

    /// Snapshot of all baggage items.
    pub fn baggage(&self) -> HashMap<String, String> {
        self.baggage
            .read()
            .map(|baggage| baggage.clone())
            .unwrap_or_default()
    }
}
