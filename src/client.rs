//! Host-side client for the authbridge worker.
//!
//! Keeps one worker process alive for many calls:
//!   1. `spawn(program, args)` starts the worker and a background stdout reader
//!   2. `call(fn, args)` writes one request line and waits for the response
//!      with the same `id`
//!   3. `shutdown()` closes the worker's stdin and waits for it to exit
//!
//! Requests may be issued concurrently; the reader routes each response to
//! its waiter by `id`, so completion order does not matter.

use std::collections::HashMap;
use std::io;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use authbridge_protocol::{
    decode, encode, ErrorCode, MarkerError, RpcError, RpcRequest, RpcResponse, Value,
    DEFAULT_METHOD,
};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::Child;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;

/// Per-call timeout unless overridden with [`BridgeClient::with_timeout`].
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Host-side errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to spawn worker '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("worker I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("timed out waiting for {fn_name} after {after:?}")]
    Timeout { fn_name: String, after: Duration },

    #[error("worker connection closed")]
    Closed,

    #[error("worker returned an error: {0}")]
    Remote(RpcError),

    #[error("invalid marker in worker result: {0}")]
    Marker(#[from] MarkerError),

    #[error("failed to encode request: {0}")]
    Encode(#[from] serde_json::Error),
}

impl ClientError {
    /// The worker's error code, for [`ClientError::Remote`].
    pub fn remote_code(&self) -> Option<ErrorCode> {
        match self {
            Self::Remote(err) => err.code(),
            _ => None,
        }
    }
}

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<RpcResponse>>>>;
type BoxedWriter = Box<dyn AsyncWrite + Unpin + Send>;

/// A connection to one worker process.
pub struct BridgeClient {
    writer: Mutex<Option<BoxedWriter>>,
    pending: PendingMap,
    next_id: AtomicU64,
    alive: Arc<AtomicBool>,
    method: String,
    timeout: Duration,
    child: Mutex<Option<Child>>,
    reader_handle: Mutex<Option<JoinHandle<()>>>,
}

impl BridgeClient {
    /// Spawn the worker and start the background reader.
    ///
    /// The worker's stderr is inherited so its logs reach the host's stderr.
    pub fn spawn(program: &str, args: &[String]) -> Result<Self, ClientError> {
        tracing::info!(program, args = ?args, "spawning worker");

        let mut child = tokio::process::Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ClientError::Spawn {
                program: program.to_string(),
                source,
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "no stdin on worker process"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "no stdout on worker process"))?;

        let mut client = Self::from_streams(stdout, stdin);
        client.child = Mutex::new(Some(child));
        Ok(client)
    }

    /// Connect over existing streams (an in-process worker, a socket, ...).
    pub fn from_streams<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let alive = Arc::new(AtomicBool::new(true));
        let reader_handle = tokio::spawn(read_responses(reader, pending.clone(), alive.clone()));

        Self {
            writer: Mutex::new(Some(Box::new(writer))),
            pending,
            next_id: AtomicU64::new(1),
            alive,
            method: DEFAULT_METHOD.to_string(),
            timeout: DEFAULT_TIMEOUT,
            child: Mutex::new(None),
            reader_handle: Mutex::new(Some(reader_handle)),
        }
    }

    /// Use a different RPC method name.
    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    /// Set the per-call timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Call a capability with in-process values.
    ///
    /// Arguments are marker-encoded and spread positionally; the result is
    /// decoded back into a [`Value`].
    pub async fn call(&self, fn_name: &str, args: Vec<Value>) -> Result<Value, ClientError> {
        let wire = encode(&Value::Array(args));
        let result = self.call_raw(fn_name, wire).await?;
        Ok(decode(result)?)
    }

    /// Call a capability with transport-form JSON arguments and return the
    /// transport-form result.
    pub async fn call_raw(
        &self,
        fn_name: &str,
        args: serde_json::Value,
    ) -> Result<serde_json::Value, ClientError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = RpcRequest::call(serde_json::Value::from(id), &self.method, fn_name, args);
        let mut line = serde_json::to_string(&request)?;
        line.push('\n');

        let (tx, rx) = oneshot::channel();
        {
            // The reader flips `alive` under this lock, so a waiter is never
            // inserted after the map was cleared.
            let mut pending = self.pending.lock().await;
            if !self.is_alive() {
                return Err(ClientError::Closed);
            }
            pending.insert(id, tx);
        }

        if let Err(e) = self.write_line(&line).await {
            self.pending.lock().await.remove(&id);
            return Err(e);
        }
        tracing::debug!(id, fn_name, "request sent");

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(response)) => into_result(response),
            Ok(Err(_)) => Err(ClientError::Closed),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                tracing::warn!(id, fn_name, timeout_ms = self.timeout.as_millis() as u64, "call timed out");
                Err(ClientError::Timeout {
                    fn_name: fn_name.to_string(),
                    after: self.timeout,
                })
            }
        }
    }

    async fn write_line(&self, line: &str) -> Result<(), ClientError> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(ClientError::Closed)?;
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Close the worker's stdin and wait for it to finish.
    ///
    /// The worker answers whatever is still in flight before exiting, so
    /// outstanding calls still complete. Returns the exit status when the
    /// worker was spawned by [`BridgeClient::spawn`].
    pub async fn shutdown(&self) -> Result<Option<ExitStatus>, ClientError> {
        if let Some(mut writer) = self.writer.lock().await.take() {
            writer.shutdown().await?;
        }
        if let Some(handle) = self.reader_handle.lock().await.take() {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "response reader task failed");
            }
        }
        match self.child.lock().await.take() {
            Some(mut child) => Ok(Some(child.wait().await?)),
            None => Ok(None),
        }
    }
}

fn into_result(response: RpcResponse) -> Result<serde_json::Value, ClientError> {
    if response.ok {
        return Ok(response.result.unwrap_or(serde_json::Value::Null));
    }
    let error = response
        .error
        .unwrap_or_else(|| RpcError::new(ErrorCode::InternalError, "error response without error body"));
    Err(ClientError::Remote(error))
}

/// Route response lines to their waiters until the worker's stdout closes.
async fn read_responses<R>(reader: R, pending: PendingMap, alive: Arc<AtomicBool>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "failed to read worker output");
                break;
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let response: RpcResponse = match serde_json::from_str(line) {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(error = %e, "unparseable worker output");
                continue;
            }
        };

        let Some(id) = response.id.as_u64() else {
            // Protocol errors for lines the worker could not read carry a null id.
            tracing::warn!(error = ?response.error, "worker response without a routable id");
            continue;
        };

        match pending.lock().await.remove(&id) {
            Some(tx) => {
                let _ = tx.send(response);
            }
            None => tracing::debug!(id, "response for unknown or expired request"),
        }
    }

    let mut pending = pending.lock().await;
    alive.store(false, Ordering::SeqCst);
    // Dropping the senders wakes every waiter with `Closed`.
    pending.clear();
    drop(pending);
    tracing::debug!("worker output closed");
}
