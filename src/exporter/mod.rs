//! Trace export: batching writer, agent api and payload encoding.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::model::SpanData;

mod api;
mod container;
pub(crate) mod model;
mod transport;

pub use api::{AgentApi, ResponseListener, SampleRatesByService};
pub(crate) use api::Api;
pub use model::{ApiVersion, Error};
pub use transport::Transport;

const DEFAULT_QUEUE_CAPACITY: usize = 1024;
const MAX_BATCH_TRACES: usize = 256;
const FLUSH_INTERVAL: Duration = Duration::from_secs(1);
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Sink for completed traces.
pub trait Writer: Send + Sync + std::fmt::Debug {
    /// Brings the writer up. Writers that spawn their machinery at
    /// construction need not do anything here.
    fn start(&self) {}

    /// Hands over one completed trace. Must not block span finishing.
    fn write(&self, trace: Vec<SpanData>);

    /// Pushes buffered traces out. Returns whether everything buffered at
    /// call time was sent.
    fn flush(&self) -> bool;

    /// Flushes and releases resources. Later writes are dropped.
    fn close(&self);
}

/// Writer that keeps traces in memory, for tests and local debugging.
#[derive(Debug, Default)]
pub struct ListWriter {
    traces: Mutex<Vec<Vec<SpanData>>>,
}

impl ListWriter {
    pub fn new() -> Self {
        ListWriter::default()
    }

    pub fn traces(&self) -> Vec<Vec<SpanData>> {
        self.traces
            .lock()
            .map(|traces| traces.clone())
            .unwrap_or_default()
    }

    pub fn clear(&self) {
        if let Ok(mut traces) = self.traces.lock() {
            traces.clear();
        }
    }
}

impl Writer for ListWriter {
    fn write(&self, trace: Vec<SpanData>) {
        if let Ok(mut traces) = self.traces.lock() {
            traces.push(trace);
        }
    }

    fn flush(&self) -> bool {
        true
    }

    fn close(&self) {}
}

enum WriterMessage {
    Trace(Vec<SpanData>),
    Flush(SyncSender<bool>),
    Shutdown(SyncSender<bool>),
}

/// Writer that batches traces on a dedicated thread and ships them to the
/// agent.
///
/// `write` never blocks: traces go through a bounded queue and are dropped,
/// counted, when the queue is full. The worker flushes when a batch fills or
/// on a one second cadence. Dropped traces still count towards the
/// representative trace count sent with the next batch, so agent-side
/// sampling math stays honest.
#[derive(Debug)]
pub struct AgentWriter {
    sender: SyncSender<WriterMessage>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
    dropped: Arc<AtomicU64>,
    queue_full_warned: AtomicBool,
}

impl AgentWriter {
    pub fn new(api: Arc<AgentApi>) -> Result<AgentWriter, Error> {
        Self::with_api(api, DEFAULT_QUEUE_CAPACITY)
    }

    pub(crate) fn with_api(api: Arc<dyn Api>, capacity: usize) -> Result<AgentWriter, Error> {
        let (sender, receiver) = sync_channel(capacity);
        let dropped = Arc::new(AtomicU64::new(0));
        let worker_dropped = dropped.clone();
        let worker = thread::Builder::new()
            .name("dd-trace-writer".to_string())
            .spawn(move || worker_loop(api, receiver, worker_dropped))?;
        Ok(AgentWriter {
            sender,
            worker: Mutex::new(Some(worker)),
            dropped,
            queue_full_warned: AtomicBool::new(false),
        })
    }

    /// Traces dropped because the queue was full.
    pub fn traces_dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn request_ack(&self, make: impl FnOnce(SyncSender<bool>) -> WriterMessage) -> bool {
        let (ack, done) = sync_channel(1);
        if self.sender.try_send(make(ack)).is_err() {
            return false;
        }
        done.recv_timeout(CLOSE_TIMEOUT).unwrap_or(false)
    }
}

impl Writer for AgentWriter {
    fn write(&self, trace: Vec<SpanData>) {
        match self.sender.try_send(WriterMessage::Trace(trace)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                if !self.queue_full_warned.swap(true, Ordering::Relaxed) {
                    warn!("trace queue is full, dropping traces");
                } else {
                    debug!("trace queue is full, dropping trace");
                }
            }
            Err(TrySendError::Disconnected(_)) => {
                debug!("trace writer is closed, dropping trace");
            }
        }
    }

    fn flush(&self) -> bool {
        self.request_ack(WriterMessage::Flush)
    }

    fn close(&self) {
        let worker = self
            .worker
            .lock()
            .ok()
            .and_then(|mut worker| worker.take());
        let Some(worker) = worker else {
            return;
        };
        if !self.request_ack(WriterMessage::Shutdown) {
            debug!("trace writer did not confirm shutdown flush");
        }
        if worker.join().is_err() {
            debug!("trace writer thread panicked");
        }
    }
}

impl Drop for AgentWriter {
    fn drop(&mut self) {
        self.close();
    }
}

fn worker_loop(
    api: Arc<dyn Api>,
    receiver: Receiver<WriterMessage>,
    dropped: Arc<AtomicU64>,
) {
    let mut batch: Vec<Vec<SpanData>> = Vec::new();

    let flush = |batch: &mut Vec<Vec<SpanData>>| -> bool {
        if batch.is_empty() {
            return true;
        }
        let traces = std::mem::take(batch);
        // Dropped traces fold into this batch's representative count.
        let representative = traces.len() as u64 + dropped.swap(0, Ordering::Relaxed);
        api.send_traces(traces, representative)
    };

    loop {
        match receiver.recv_timeout(FLUSH_INTERVAL) {
            Ok(WriterMessage::Trace(trace)) => {
                batch.push(trace);
                if batch.len() >= MAX_BATCH_TRACES {
                    flush(&mut batch);
                }
            }
            Ok(WriterMessage::Flush(ack)) => {
                let sent = flush(&mut batch);
                let _ = ack.try_send(sent);
            }
            Ok(WriterMessage::Shutdown(ack)) => {
                let sent = flush(&mut batch);
                let _ = ack.try_send(sent);
                break;
            }
            Err(RecvTimeoutError::Timeout) => {
                flush(&mut batch);
            }
            Err(RecvTimeoutError::Disconnected) => {
                flush(&mut batch);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exporter::model::tests::test_span;
    use std::sync::mpsc;

    #[derive(Debug)]
    struct MockApi {
        batches: Mutex<Vec<(usize, u64)>>,
        started: mpsc::Sender<()>,
        release: Mutex<mpsc::Receiver<()>>,
        gated: bool,
    }

    impl MockApi {
        fn new(gated: bool) -> (Arc<MockApi>, mpsc::Receiver<()>, mpsc::Sender<()>) {
            let (started_tx, started_rx) = mpsc::channel();
            let (release_tx, release_rx) = mpsc::channel();
            let api = Arc::new(MockApi {
                batches: Mutex::new(Vec::new()),
                started: started_tx,
                release: Mutex::new(release_rx),
                gated,
            });
            (api, started_rx, release_tx)
        }

        fn batches(&self) -> Vec<(usize, u64)> {
            self.batches.lock().unwrap().clone()
        }
    }

    impl Api for MockApi {
        fn send_traces(&self, traces: Vec<Vec<SpanData>>, representative_count: u64) -> bool {
            if self.gated {
                let _ = self.started.send(());
                let _ = self.release.lock().unwrap().recv();
            }
            self.batches
                .lock()
                .unwrap()
                .push((traces.len(), representative_count));
            true
        }
    }

    #[test]
    fn flush_sends_the_buffered_batch() {
        let (api, _started, _release) = MockApi::new(false);
        let writer = AgentWriter::with_api(api.clone(), 16).unwrap();

        for trace_id in 1..=3u64 {
            writer.write(vec![test_span(trace_id, 1, 0)]);
        }
        assert!(writer.flush());
        assert_eq!(api.batches(), vec![(3, 3)]);
        writer.close();
    }

    #[test]
    fn empty_flush_sends_nothing() {
        let (api, _started, _release) = MockApi::new(false);
        let writer = AgentWriter::with_api(api.clone(), 16).unwrap();
        assert!(writer.flush());
        assert!(api.batches().is_empty());
        writer.close();
    }

    #[test]
    fn full_queue_drops_are_counted_in_the_next_batch() {
        let (api, started, release) = MockApi::new(true);
        let writer = Arc::new(AgentWriter::with_api(api.clone(), 2).unwrap());

        // Park the worker inside a send so the queue backs up.
        writer.write(vec![test_span(1, 1, 0)]);
        let flusher = {
            let writer = writer.clone();
            std::thread::spawn(move || writer.flush())
        };
        started.recv().unwrap();

        // Queue holds 2; everything past that is dropped and counted.
        for trace_id in 1..=5u64 {
            writer.write(vec![test_span(1000 + trace_id, 1, 0)]);
        }
        assert_eq!(writer.traces_dropped(), 3);

        release.send(()).unwrap();
        assert!(flusher.join().unwrap());

        // The queued survivors stand for themselves plus the three drops.
        let second = {
            let writer = writer.clone();
            std::thread::spawn(move || writer.flush())
        };
        started.recv().unwrap();
        release.send(()).unwrap();
        assert!(second.join().unwrap());
        writer.close();

        let batches = api.batches();
        assert_eq!(batches[0], (1, 1));
        assert!(batches.iter().any(|&(traces, count)| traces == 2 && count == 5));
    }

    #[test]
    fn close_is_idempotent_and_drops_later_writes() {
        let (api, _started, _release) = MockApi::new(false);
        let writer = AgentWriter::with_api(api.clone(), 16).unwrap();
        writer.write(vec![test_span(1, 1, 0)]);
        writer.close();
        writer.close();
        assert_eq!(api.batches(), vec![(1, 1)]);

        writer.write(vec![test_span(2, 1, 0)]);
        assert!(!writer.flush());
        assert_eq!(api.batches(), vec![(1, 1)]);
    }
}
