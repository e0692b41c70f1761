//! Agent payload encoding.
//!
//! Both supported intake versions carry the same span shape, so they share
//! one encoder. Traces are encoded into per-trace buffers first; a trace
//! whose encoding fails is skipped, and the outer array header is written
//! once the surviving count is known.

use tracing::warn;

use crate::model::SpanData;

mod v04;

/// Metrics key the agent reads the sampling decision from.
pub(crate) const SAMPLING_PRIORITY_KEY: &str = "_sampling_priority_v1";

/// Errors surfaced by the export pipeline.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Message pack encoding failed
    #[error("message pack error")]
    MessagePack,
    /// The writer was configured with an unusable agent address
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    /// Building the http request failed
    #[error(transparent)]
    Http(#[from] http::Error),
    /// The agent address did not parse as a uri
    #[error(transparent)]
    InvalidUri(#[from] http::uri::InvalidUri),
    /// Connecting to the agent failed
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// The request itself failed
    #[error(transparent)]
    Hyper(#[from] hyper::Error),
    /// Other errors
    #[error("{0}")]
    Other(String),
}

impl From<rmp::encode::ValueWriteError> for Error {
    fn from(_: rmp::encode::ValueWriteError) -> Self {
        Self::MessagePack
    }
}

/// Version of the agent trace intake.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ApiVersion {
    /// Fallback for old agents without the v0.4 endpoint
    Version03,
    /// Preferred endpoint
    Version04,
}

impl ApiVersion {
    pub(crate) fn path(self) -> &'static str {
        match self {
            ApiVersion::Version03 => "/v0.3/traces",
            ApiVersion::Version04 => "/v0.4/traces",
        }
    }

    pub(crate) fn content_type(self) -> &'static str {
        match self {
            ApiVersion::Version03 => "application/msgpack",
            ApiVersion::Version04 => "application/msgpack",
        }
    }
}

/// Encodes a batch of traces as a msgpack array of arrays of span maps.
/// Returns the payload and the number of traces that made it in.
pub(crate) fn encode_batch(traces: Vec<Vec<SpanData>>) -> Result<(Vec<u8>, usize), Error> {
    let mut bodies = Vec::with_capacity(traces.len());
    for trace in traces {
        let mut body = Vec::new();
        match v04::encode_trace(&mut body, &trace) {
            Ok(()) => bodies.push(body),
            Err(error) => {
                warn!(%error, spans = trace.len(), "dropping unencodable trace");
            }
        }
    }

    let mut encoded = Vec::new();
    write_array_header(&mut encoded, bodies.len())?;
    for body in &bodies {
        encoded.extend_from_slice(body);
    }
    Ok((encoded, bodies.len()))
}

/// Minimal-width msgpack array header.
fn write_array_header(buf: &mut Vec<u8>, len: usize) -> Result<(), Error> {
    if len < 16 {
        buf.push(0x90 | len as u8);
    } else if len <= u16::MAX as usize {
        buf.push(0xdc);
        buf.extend_from_slice(&(len as u16).to_be_bytes());
    } else if len <= u32::MAX as usize {
        buf.push(0xdd);
        buf.extend_from_slice(&(len as u32).to_be_bytes());
    } else {
        return Err(Error::MessagePack);
    }
    Ok(())
}
