//! USI reader tasks.
//!
//! [`run_reader`] drives a [`FramedRead`] over the engine's stdout using
//! [`UsiCodec`] and forwards every decoded line to the owning session as
//! [`ProcessEventKind::Line`]. Classification happens in the session, not
//! here: the reader only guarantees ordering and completeness.
//!
//! [`run_stderr_logger`] drains stderr so a chatty engine never blocks on a
//! full pipe, logging each line at `WARN`.

use futures_util::StreamExt;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::usi::codec::UsiCodec;
use crate::usi::{ProcessEvent, ProcessEventKind};
use crate::AppError;

/// USI reader task: reads lines from `stdout` and emits [`ProcessEvent`]s.
///
/// Oversized lines are logged and skipped. On EOF or an unrecoverable I/O
/// error a [`ProcessEventKind::StdoutClosed`] event is sent before
/// returning.
///
/// # Cancellation
///
/// When `cancel` fires the reader exits without emitting anything.
pub async fn run_reader<R>(
    generation: u64,
    stdout: R,
    event_tx: mpsc::UnboundedSender<ProcessEvent>,
    cancel: CancellationToken,
) where
    R: AsyncRead + Unpin + Send,
{
    let mut framed = FramedRead::new(stdout, UsiCodec::new());
    // FramedRead yields a single `None` after a decode error, then resumes.
    let mut resume_after_error = false;

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(generation, "usi reader: cancellation received, stopping");
                break;
            }

            item = framed.next() => {
                match item {
                    None if resume_after_error => {
                        resume_after_error = false;
                    }

                    None => {
                        debug!(generation, "usi reader: EOF detected");
                        send_closed(&event_tx, generation, "stream closed");
                        break;
                    }

                    Some(Err(AppError::Protocol(ref msg))) => {
                        warn!(generation, error = msg.as_str(), "usi reader: framing error, skipping");
                        resume_after_error = true;
                    }

                    Some(Err(e)) => {
                        warn!(generation, error = %e, "usi reader: IO error, stopping");
                        send_closed(&event_tx, generation, &format!("stream error: {e}"));
                        break;
                    }

                    Some(Ok(line)) => {
                        debug!(generation, line = %line, "<- engine");
                        let event = ProcessEvent {
                            generation,
                            kind: ProcessEventKind::Line(line),
                        };
                        if event_tx.send(event).is_err() {
                            debug!(generation, "usi reader: session gone, stopping");
                            break;
                        }
                    }
                }
            }
        }
    }
}

/// Drain an engine's stderr, logging each line.
pub async fn run_stderr_logger<R>(generation: u64, stderr: R, cancel: CancellationToken)
where
    R: AsyncRead + Unpin + Send,
{
    let mut framed = FramedRead::new(stderr, UsiCodec::new());
    let mut resume_after_error = false;

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => break,

            item = framed.next() => match item {
                None if resume_after_error => resume_after_error = false,
                None => break,
                Some(Ok(line)) => warn!(generation, line = %line, "engine stderr"),
                Some(Err(AppError::Protocol(_))) => resume_after_error = true,
                Some(Err(e)) => {
                    debug!(generation, error = %e, "stderr reader: IO error, stopping");
                    break;
                }
            }
        }
    }
}

fn send_closed(event_tx: &mpsc::UnboundedSender<ProcessEvent>, generation: u64, reason: &str) {
    let event = ProcessEvent {
        generation,
        kind: ProcessEventKind::StdoutClosed {
            reason: reason.to_owned(),
        },
    };
    if event_tx.send(event).is_err() {
        debug!(generation, "usi reader: session gone before StdoutClosed could be delivered");
    }
}
