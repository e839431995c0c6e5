//! Agent stdin writer task.
//!
//! Every outbound message funnels through one task so concurrent callers
//! never interleave partial lines. When the task exits it drops `stdin`,
//! which is how the child observes EOF during shutdown.

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{AppError, Result};

/// Serialize each queued value as one `\n`-terminated line and write it.
///
/// Exits when `cancel` fires, when every sender is dropped, or on the first
/// write failure.
///
/// # Errors
///
/// Returns `AppError::Agent` if writing to the child fails.
pub async fn run_writer<W>(
    stdin: W,
    mut msg_rx: mpsc::Receiver<serde_json::Value>,
    cancel: CancellationToken,
) -> Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    let mut stdin = stdin;

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!("agent writer: cancellation received, closing stdin");
                break;
            }

            msg = msg_rx.recv() => {
                let Some(value) = msg else {
                    debug!("agent writer: channel closed, closing stdin");
                    break;
                };

                let mut bytes = serde_json::to_vec(&value)?;
                bytes.push(b'\n');

                if let Err(err) = write_line(&mut stdin, &bytes).await {
                    warn!(%err, "agent writer: write to stdin failed");
                    return Err(AppError::Agent(format!("write failed: {err}")));
                }
            }
        }
    }

    let _ = stdin.shutdown().await;
    Ok(())
}

async fn write_line<W>(stdin: &mut W, bytes: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    stdin.write_all(bytes).await?;
    stdin.flush().await
}
