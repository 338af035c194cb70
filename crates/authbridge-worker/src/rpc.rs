//! Worker RPC Handler
//!
//! Implements the line-delimited stdin/stdout JSON RPC loop:
//!
//!   authbridge-worker [--config worker.toml]
//!
//! Input bytes accumulate in a buffer; every complete line is parsed as one
//! envelope. Protocol errors (bad JSON, wrong method) are answered
//! immediately, valid calls are dispatched as independent tasks so a slow
//! capability never holds up later lines. Responses go through a single
//! writer task, one whole line per write, in completion order.

use std::io;

use authbridge_protocol::{ErrorCode, RpcError, RpcRequest, RpcResponse};
use serde_json::json;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinSet};

use crate::config::{ShutdownPolicy, WorkerConfig};
use crate::dispatcher::Dispatcher;

const READ_CHUNK: usize = 8 * 1024;

/// Counters reported when the loop ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Non-blank lines processed.
    pub lines: u64,
    /// Lines rejected before dispatch (bad JSON, unknown method, non-object).
    pub rejected: u64,
    /// Calls handed to the dispatcher.
    pub dispatched: u64,
    /// Calls still in flight at end of input and left unanswered.
    pub abandoned: u64,
}

/// Main RPC handler for the worker.
#[derive(Debug, Clone)]
pub struct RpcHandler {
    method: String,
    shutdown: ShutdownPolicy,
    dispatcher: Dispatcher,
}

impl RpcHandler {
    /// Create a new RPC handler with the given configuration.
    pub fn new(config: &WorkerConfig, dispatcher: Dispatcher) -> Self {
        Self {
            method: config.method.clone(),
            shutdown: config.shutdown,
            dispatcher,
        }
    }

    /// Capability names that resolved at bind time.
    pub fn bound_names(&self) -> Vec<&str> {
        self.dispatcher.table().bound_names()
    }

    /// Run the RPC handler, reading from stdin and writing to stdout.
    pub async fn run(&self) -> io::Result<RunSummary> {
        self.run_with_io(tokio::io::stdin(), tokio::io::stdout()).await
    }

    /// Run the RPC handler with custom I/O (for testing).
    ///
    /// Returns once input reaches end-of-file and the output has been
    /// flushed. An output write error ends the loop with that error.
    pub async fn run_with_io<R, W>(&self, mut reader: R, writer: W) -> io::Result<RunSummary>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel::<RpcResponse>();
        let writer_task = tokio::spawn(write_responses(rx, writer));

        let mut tasks = JoinSet::new();
        let mut summary = RunSummary::default();
        let mut buffer = LineBuffer::default();
        let mut chunk = vec![0u8; READ_CHUNK];

        loop {
            let n = reader.read(&mut chunk).await?;
            if n == 0 {
                break;
            }
            buffer.extend(&chunk[..n]);

            while let Some(line) = buffer.next_line() {
                self.handle_line(&line, &tx, &mut tasks, &mut summary);
            }

            // Reap finished tasks so the set only holds in-flight work.
            while tasks.try_join_next().is_some() {}

            if tx.is_closed() {
                break;
            }
        }

        // An unterminated final line still counts as a request.
        if let Some(line) = buffer.take_rest() {
            if !tx.is_closed() {
                self.handle_line(&line, &tx, &mut tasks, &mut summary);
            }
        }

        match self.shutdown {
            ShutdownPolicy::Drain => {
                tracing::info!(in_flight = tasks.len(), "end of input; draining");
                while tasks.join_next().await.is_some() {}
            }
            ShutdownPolicy::FireAndForget => {
                while tasks.try_join_next().is_some() {}
                summary.abandoned = tasks.len() as u64;
                if summary.abandoned > 0 {
                    tracing::warn!(abandoned = summary.abandoned, "end of input; abandoning in-flight calls");
                }
                tasks.shutdown().await;
            }
        }

        drop(tx);
        writer_task
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))??;

        tracing::info!(
            lines = summary.lines,
            dispatched = summary.dispatched,
            rejected = summary.rejected,
            "input closed"
        );
        Ok(summary)
    }

    /// Process one raw line (newline included or not).
    fn handle_line(
        &self,
        raw: &[u8],
        tx: &mpsc::UnboundedSender<RpcResponse>,
        tasks: &mut JoinSet<()>,
        summary: &mut RunSummary,
    ) {
        let text = String::from_utf8_lossy(raw);
        let line = text.trim();
        if line.is_empty() {
            return;
        }
        summary.lines += 1;

        let parsed = std::str::from_utf8(raw)
            .map_err(|e| e.to_string())
            .and_then(|_| serde_json::from_str::<serde_json::Value>(line).map_err(|e| e.to_string()));
        let value = match parsed {
            Ok(value) => value,
            Err(reason) => {
                tracing::debug!(%reason, "invalid JSON line");
                summary.rejected += 1;
                send(tx, RpcResponse::error(serde_json::Value::Null, RpcError::invalid_json(line, reason)));
                return;
            }
        };

        let request = match RpcRequest::from_json(value) {
            Some(request) => request,
            None => {
                summary.rejected += 1;
                send(
                    tx,
                    RpcResponse::error(
                        serde_json::Value::Null,
                        RpcError::invalid_request("request must be a JSON object")
                            .with_detail("line", json!(line)),
                    ),
                );
                return;
            }
        };

        if request.method_name() != Some(self.method.as_str()) {
            tracing::debug!(id = %request.id, method = %request.method, "unknown method");
            summary.rejected += 1;
            send(
                tx,
                RpcResponse::error(request.id, RpcError::unknown_method(&request.method, &self.method)),
            );
            return;
        }

        summary.dispatched += 1;
        self.spawn_dispatch(request, tx.clone(), tasks);
    }

    /// Launch one call as its own task.
    ///
    /// The dispatch itself runs in a nested task so that a panicking
    /// capability is observed as a `JoinError` here and still answered.
    fn spawn_dispatch(
        &self,
        request: RpcRequest,
        tx: mpsc::UnboundedSender<RpcResponse>,
        tasks: &mut JoinSet<()>,
    ) {
        let dispatcher = self.dispatcher.clone();
        let RpcRequest { id, params, .. } = request;
        let fn_name = params
            .as_ref()
            .and_then(|p| p.get("fn"))
            .and_then(|f| f.as_str())
            .map(str::to_string);

        tasks.spawn(async move {
            tracing::debug!(%id, fn_name = fn_name.as_deref().unwrap_or(""), "dispatching");
            let inner = tokio::spawn(async move { dispatcher.dispatch(params).await });
            let _abort = AbortOnDrop(inner.abort_handle());
            let outcome = inner.await;

            let response = match outcome {
                Ok(Ok(result)) => RpcResponse::success(id, result),
                Ok(Err(e)) => {
                    tracing::debug!(%id, code = %e.code(), error = %e, "call failed");
                    RpcResponse::error(id, e.to_rpc_error(fn_name.as_deref()))
                }
                Err(join_error) => {
                    tracing::error!(%id, error = %join_error, "dispatch task faulted");
                    let err = RpcError::new(ErrorCode::InternalError, "Exception")
                        .with_detail("reason", json!(join_error.to_string()));
                    let err = match fn_name.as_deref() {
                        Some(name) => err.with_detail("fn", json!(name)),
                        None => err,
                    };
                    RpcResponse::error(id, err)
                }
            };
            send(&tx, response);
        });
    }
}

/// Input accumulator that splits on `\n`.
///
/// `scanned` marks how much of the pending partial line has already been
/// searched, so a long line arriving in many chunks is scanned once.
#[derive(Debug, Default)]
struct LineBuffer {
    bytes: Vec<u8>,
    scanned: usize,
}

impl LineBuffer {
    fn extend(&mut self, chunk: &[u8]) {
        self.bytes.extend_from_slice(chunk);
    }

    /// Next complete line, newline included.
    fn next_line(&mut self) -> Option<Vec<u8>> {
        match self.bytes[self.scanned..].iter().position(|&b| b == b'\n') {
            Some(offset) => {
                let end = self.scanned + offset;
                self.scanned = 0;
                Some(self.bytes.drain(..=end).collect())
            }
            None => {
                self.scanned = self.bytes.len();
                None
            }
        }
    }

    /// Whatever is left after end of input.
    fn take_rest(&mut self) -> Option<Vec<u8>> {
        self.scanned = 0;
        if self.bytes.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.bytes))
        }
    }
}

/// Aborts the nested dispatch when its tracking task is cancelled.
struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

fn send(tx: &mpsc::UnboundedSender<RpcResponse>, response: RpcResponse) {
    // The writer only goes away after an output error, which ends the loop.
    if tx.send(response).is_err() {
        tracing::debug!("response dropped; output closed");
    }
}

/// Single owner of the output stream. Each response is one `write_all`.
async fn write_responses<W>(mut rx: mpsc::UnboundedReceiver<RpcResponse>, mut writer: W) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(response) = rx.recv().await {
        let line = response
            .to_line()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
    }
    writer.shutdown().await
}
