//! Connection handling for the trace agent.
//!
//! The agent sits on localhost or a unix socket, so requests are short-lived
//! and cheap to set up: each send opens a fresh connection, performs one
//! http/1 exchange with `Connection: close`, and lets the connection task
//! finish on its own.

use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
#[cfg(unix)]
use tokio::net::UnixStream;

use crate::exporter::Error;

const DEFAULT_AGENT_PORT: u16 = 8126;

/// Where the agent listens.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Transport {
    Tcp { host: String, port: u16 },
    #[cfg(unix)]
    Unix { path: std::path::PathBuf },
}

impl Transport {
    /// Parses an agent endpoint such as `http://localhost:8126`,
    /// `agent-host:8126`, or `unix:///var/run/datadog/apm.socket`.
    pub fn parse(endpoint: &str) -> Result<Transport, Error> {
        let endpoint = endpoint.trim();
        if endpoint.is_empty() {
            return Err(Error::InvalidConfiguration(
                "agent endpoint is empty".to_string(),
            ));
        }

        if let Some(path) = endpoint.strip_prefix("unix://") {
            if path.is_empty() {
                return Err(Error::InvalidConfiguration(
                    "unix endpoint has no socket path".to_string(),
                ));
            }
            #[cfg(unix)]
            return Ok(Transport::Unix {
                path: std::path::PathBuf::from(path),
            });
            #[cfg(not(unix))]
            return Err(Error::InvalidConfiguration(
                "unix socket endpoints are not supported on this platform".to_string(),
            ));
        }

        let with_scheme = if endpoint.contains("://") {
            endpoint.to_string()
        } else {
            format!("http://{endpoint}")
        };
        let uri: http::Uri = with_scheme.parse()?;
        match uri.scheme_str() {
            Some("http") => {}
            Some(other) => {
                return Err(Error::InvalidConfiguration(format!(
                    "unsupported agent scheme {other:?}"
                )))
            }
            None => {
                return Err(Error::InvalidConfiguration(
                    "agent endpoint has no scheme".to_string(),
                ))
            }
        }
        let host = uri
            .host()
            .ok_or_else(|| {
                Error::InvalidConfiguration("agent endpoint has no host".to_string())
            })?
            .to_string();
        Ok(Transport::Tcp {
            host,
            port: uri.port_u16().unwrap_or(DEFAULT_AGENT_PORT),
        })
    }

    /// Value for the `Host` request header.
    pub(crate) fn host_header(&self) -> String {
        match self {
            Transport::Tcp { host, port } => format!("{host}:{port}"),
            #[cfg(unix)]
            Transport::Unix { .. } => "localhost".to_string(),
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Tcp { host, port } => write!(f, "http://{host}:{port}"),
            #[cfg(unix)]
            Transport::Unix { path } => write!(f, "unix://{}", path.display()),
        }
    }
}

/// One-shot http/1 client over the configured transport.
#[derive(Debug)]
pub(crate) struct AgentClient {
    transport: Transport,
    timeout: Duration,
}

impl AgentClient {
    pub(crate) fn new(transport: Transport, timeout: Duration) -> Self {
        AgentClient { transport, timeout }
    }

    pub(crate) fn transport(&self) -> &Transport {
        &self.transport
    }

    /// Sends one request and reads the full response body. The request uri
    /// must be in origin form; connection setup, the exchange and the body
    /// read all share one deadline.
    pub(crate) async fn send(
        &self,
        request: http::Request<Full<Bytes>>,
    ) -> Result<http::Response<Bytes>, Error> {
        let exchange = async {
            match &self.transport {
                Transport::Tcp { host, port } => {
                    let stream = TcpStream::connect((host.as_str(), *port)).await?;
                    exchange(stream, request).await
                }
                #[cfg(unix)]
                Transport::Unix { path } => {
                    let stream = UnixStream::connect(path).await?;
                    exchange(stream, request).await
                }
            }
        };
        tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| {
                Error::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "agent request timed out",
                ))
            })?
    }
}

async fn exchange<S>(
    stream: S,
    request: http::Request<Full<Bytes>>,
) -> Result<http::Response<Bytes>, Error>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut sender, connection) = hyper::client::conn::http1::handshake(TokioIo::new(stream)).await?;
    // The connection task ends once the single exchange completes; with
    // Connection: close the agent will not keep it open either.
    tokio::spawn(async move {
        let _ = connection.await;
    });
    let response = sender.send_request(request).await?;
    let (parts, body) = response.into_parts();
    let body = body.collect().await?.to_bytes();
    Ok(http::Response::from_parts(parts, body))
}
