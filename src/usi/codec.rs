//! Line codec for USI engine streams.
//!
//! Wraps [`tokio_util::codec::AnyDelimiterCodec`] split on `\n` with a
//! configurable maximum line length, so an engine that never terminates a
//! line cannot make the bridge allocate without bound.
//!
//! # Usage
//!
//! Use [`UsiCodec`] as the codec parameter for
//! [`tokio_util::codec::FramedRead`] (engine stdout) and
//! [`tokio_util::codec::FramedWrite`] (engine stdin).
//!
//! Inbound bytes are decoded as UTF-8 lossily, trimmed (which also strips a
//! Windows `\r`), and blank lines are swallowed. Engines built for Windows
//! occasionally emit non-UTF-8 bytes in `info string` output; a lossy decode
//! keeps those from tearing down the stream.

use bytes::BytesMut;
use tokio_util::codec::{AnyDelimiterCodec, AnyDelimiterCodecError, Decoder, Encoder};

use crate::{AppError, Result};

/// Maximum line length accepted by the USI codec: 1 MiB.
pub const MAX_LINE_BYTES: usize = 1_048_576;

/// Newline-delimited text codec for USI engine streams.
///
/// # Decoder
///
/// Yields trimmed, non-empty lines in arrival order. A partial trailing
/// line stays buffered until its `\n` arrives, or is yielded by
/// [`Decoder::decode_eof`] when the stream ends. Lines longer than
/// [`MAX_LINE_BYTES`] return [`AppError::Protocol`]; the codec then
/// discards bytes up to the next newline and continues normally.
///
/// # Encoder
///
/// Outbound commands are encoded as `command\n`.
#[derive(Debug)]
pub struct UsiCodec(AnyDelimiterCodec);

impl UsiCodec {
    /// Create a new `UsiCodec` with the default [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_length(MAX_LINE_BYTES)
    }

    /// Create a codec with a custom line limit.
    #[must_use]
    pub fn with_max_length(max_length: usize) -> Self {
        Self(AnyDelimiterCodec::new_with_max_length(
            b"\n".to_vec(),
            b"\n".to_vec(),
            max_length,
        ))
    }
}

impl Default for UsiCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for UsiCodec {
    type Item = String;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        loop {
            match self.0.decode(src).map_err(map_codec_error)? {
                Some(chunk) => {
                    if let Some(line) = normalize(&chunk) {
                        return Ok(Some(line));
                    }
                }
                None => return Ok(None),
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        loop {
            match self.0.decode_eof(src).map_err(map_codec_error)? {
                Some(chunk) => {
                    if let Some(line) = normalize(&chunk) {
                        return Ok(Some(line));
                    }
                }
                None => return Ok(None),
            }
        }
    }
}

impl Encoder<String> for UsiCodec {
    type Error = AppError;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<()> {
        self.0.encode(item, dst).map_err(map_codec_error)
    }
}

// ── Private helpers ───────────────────────────────────────────────────────────

/// Lossy UTF-8 decode and trim; `None` for blank lines.
fn normalize(chunk: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(chunk);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_owned())
    }
}

fn map_codec_error(e: AnyDelimiterCodecError) -> AppError {
    match e {
        AnyDelimiterCodecError::MaxChunkLengthExceeded => {
            AppError::Protocol("line too long: exceeded max line length".into())
        }
        AnyDelimiterCodecError::Io(io_err) => AppError::Io(io_err.to_string()),
    }
}
