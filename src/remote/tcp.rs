//! Newline-delimited JSON over TCP.
//!
//! Each request is one JSON-encoded [`ConfigRequest`] followed by `\n`; the
//! server answers with one JSON-encoded [`ConfigResponse`] line. A connection
//! carries any number of round trips.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::time;
use tracing::{debug, warn};

use super::{ConfigRequest, ConfigResponse, ConfigTransport};
use crate::error::TransportError;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Client side. Connects lazily and reconnects after any failure.
pub struct TcpTransport {
    addr: String,
    request_timeout: Duration,
    conn: Mutex<Option<BufReader<TcpStream>>>,
}

impl TcpTransport {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            conn: Mutex::new(None),
        }
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }
}

#[async_trait]
impl ConfigTransport for TcpTransport {
    async fn get_config(&self, request: ConfigRequest) -> Result<ConfigResponse, TransportError> {
        let mut conn = self.conn.lock().await;
        let result = time::timeout(
            self.request_timeout,
            round_trip(&self.addr, &mut conn, &request),
        )
        .await;

        match result {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(err)) => {
                *conn = None;
                Err(err)
            }
            Err(_) => {
                *conn = None;
                Err(TransportError::DeadlineExceeded(self.request_timeout))
            }
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        if let Some(stream) = self.conn.lock().await.take() {
            stream.into_inner().shutdown().await?;
        }
        Ok(())
    }
}

async fn connect(addr: &str) -> Result<TcpStream, TransportError> {
    TcpStream::connect(addr).await.map_err(|e| match e.kind() {
        io::ErrorKind::ConnectionRefused => TransportError::ConnectionRefused,
        _ => TransportError::Io(e),
    })
}

async fn round_trip(
    addr: &str,
    slot: &mut Option<BufReader<TcpStream>>,
    request: &ConfigRequest,
) -> Result<ConfigResponse, TransportError> {
    let stream = match slot.take() {
        Some(stream) => stream,
        None => BufReader::new(connect(addr).await?),
    };
    let stream = slot.insert(stream);

    let mut line = serde_json::to_vec(request)?;
    line.push(b'\n');
    stream.get_mut().write_all(&line).await?;

    let mut buf = String::new();
    if stream.read_line(&mut buf).await? == 0 {
        return Err(TransportError::ConnectionClosed);
    }
    Ok(serde_json::from_str(&buf)?)
}

/// Answers config requests. Implemented for plain closures.
pub trait ConfigSource: Send + Sync {
    fn respond(&self, request: &ConfigRequest) -> ConfigResponse;
}

impl<F> ConfigSource for F
where
    F: Fn(&ConfigRequest) -> ConfigResponse + Send + Sync,
{
    fn respond(&self, request: &ConfigRequest) -> ConfigResponse {
        self(request)
    }
}

/// Serves `source` on `listener` until the listener fails. Abort the task
/// running this future to stop serving.
pub async fn serve(listener: TcpListener, source: Arc<dyn ConfigSource>) -> io::Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        debug!(%peer, "config client connected");
        let source = source.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, source.as_ref()).await {
                warn!(%peer, error = %e, "config client connection failed");
            }
        });
    }
}

async fn handle_connection(stream: TcpStream, source: &dyn ConfigSource) -> Result<(), TransportError> {
    let mut stream = BufReader::new(stream);
    let mut buf = String::new();
    loop {
        buf.clear();
        if stream.read_line(&mut buf).await? == 0 {
            return Ok(());
        }
        let request: ConfigRequest = serde_json::from_str(&buf)?;
        let mut line = serde_json::to_vec(&source.respond(&request))?;
        line.push(b'\n');
        stream.get_mut().write_all(&line).await?;
    }
}
