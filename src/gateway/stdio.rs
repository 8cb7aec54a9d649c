//! Newline-delimited JSON-RPC over stdio
//!
//! stdout carries protocol messages only; logs go to stderr.

use std::sync::Arc;

use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use super::handler::{self, TOOLS_LIST_CHANGED};
use super::session::Session;
use crate::protocol::JsonRpcNotification;
use crate::{Error, Result};

/// Serve one session over the process's stdin/stdout
pub async fn serve_stdio(session: Arc<Session>) -> Result<()> {
    serve_lines(session, tokio::io::stdin(), tokio::io::stdout()).await
}

/// Serve one session over any line-oriented reader/writer pair.
///
/// Each line is handled in its own task. Returns once the reader hits EOF and
/// every in-flight request has been answered.
pub async fn serve_lines<R, W>(session: Arc<Session>, reader: R, writer: W) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel::<String>();
    let writer_task = tokio::spawn(write_lines(writer, rx));

    info!(session = %session.id(), "MCP server running on stdio");

    let mut lines = BufReader::new(reader).lines();
    let mut in_flight = JoinSet::new();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let session = Arc::clone(&session);
        let tx = tx.clone();
        in_flight.spawn(async move {
            let dispatch = handler::handle_text(&session, &line).await;
            if let Some(response) = dispatch.response {
                send(&tx, &response);
            }
            if dispatch.tools_changed {
                send(&tx, &JsonRpcNotification::new(TOOLS_LIST_CHANGED));
            }
        });
    }

    debug!("stdin closed; draining in-flight requests");
    while let Some(joined) = in_flight.join_next().await {
        if let Err(e) = joined {
            error!(error = %e, "Request task panicked");
        }
    }

    drop(tx);
    writer_task
        .await
        .map_err(|e| Error::Internal(format!("stdout writer task failed: {e}")))??;
    info!(session = %session.id(), "stdio session closed");
    Ok(())
}

fn send<T: Serialize>(tx: &mpsc::UnboundedSender<String>, message: &T) {
    match serde_json::to_string(message) {
        Ok(line) => {
            // The receiver only goes away once every sender is dropped.
            let _ = tx.send(line);
        }
        Err(e) => error!(error = %e, "Failed to serialize outgoing message"),
    }
}

async fn write_lines<W>(mut writer: W, mut rx: mpsc::UnboundedReceiver<String>) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(line) = rx.recv().await {
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
    }
    writer.shutdown().await?;
    Ok(())
}
