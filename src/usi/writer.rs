//! USI writer task.
//!
//! Receives rendered command strings from an unbounded channel and writes
//! each one, newline-terminated, to the engine's stdin. Callers never wait
//! on the write: the channel absorbs bursts and the task flushes one
//! command at a time, so stdin stays a single serialised byte sink.

use futures_util::SinkExt;
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;
use tokio_util::codec::FramedWrite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::usi::codec::UsiCodec;
use crate::usi::{ProcessEvent, ProcessEventKind};

/// USI writer task: writes queued commands to `stdin`.
///
/// Exits when `cancel` fires, when the command channel closes, or after the
/// first failed write. A failed write is reported as
/// [`ProcessEventKind::WriteFailed`]; the receiver is dropped on exit so
/// later sends by the session fail immediately.
pub async fn run_writer<W>(
    generation: u64,
    stdin: W,
    mut cmd_rx: mpsc::UnboundedReceiver<String>,
    event_tx: mpsc::UnboundedSender<ProcessEvent>,
    cancel: CancellationToken,
) where
    W: AsyncWrite + Unpin + Send,
{
    let mut framed = FramedWrite::new(stdin, UsiCodec::new());

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(generation, "usi writer: cancellation received, stopping");
                break;
            }

            cmd = cmd_rx.recv() => {
                let Some(line) = cmd else {
                    debug!(generation, "usi writer: command channel closed, stopping");
                    break;
                };

                // `send` flushes after every item.
                if let Err(e) = framed.send(line).await {
                    warn!(generation, error = %e, "usi writer: write to stdin failed");
                    let event = ProcessEvent {
                        generation,
                        kind: ProcessEventKind::WriteFailed(e.to_string()),
                    };
                    if event_tx.send(event).is_err() {
                        debug!(generation, "usi writer: session gone before WriteFailed could be delivered");
                    }
                    break;
                }
                trace!(generation, "usi writer: stdin drained");
            }
        }
    }
}
