//! Line framing for the agent's stdio streams.
//!
//! Every protocol message is one UTF-8 JSON document terminated by `\n`.
//! [`NdjsonCodec`] bounds a single line at [`MAX_LINE_BYTES`] so a child that
//! never emits a newline cannot grow the read buffer without limit.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};
use tracing::warn;

use crate::{AppError, Result};

/// Longest inbound line accepted from the agent: 1 MiB.
pub const MAX_LINE_BYTES: usize = 1_048_576;

/// Newline-delimited JSON framing over [`LinesCodec`].
///
/// Lines that are too long or not valid UTF-8 are dropped inside the codec
/// and decoding resumes at the next line. `FramedRead` ends the stream after
/// any decoder error, so these must never surface as `Err`.
#[derive(Debug)]
pub struct NdjsonCodec {
    inner: LinesCodec,
    skipped: usize,
}

impl NdjsonCodec {
    /// Codec with the default [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_length(MAX_LINE_BYTES)
    }

    /// Codec with a custom inbound line limit.
    #[must_use]
    pub fn with_max_length(max: usize) -> Self {
        Self {
            inner: LinesCodec::new_with_max_length(max),
            skipped: 0,
        }
    }

    /// Lines dropped so far.
    #[must_use]
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Swallow a per-line failure; the offending bytes are already consumed.
    fn skip(&mut self, err: LinesCodecError) {
        self.skipped += 1;
        match err {
            LinesCodecError::MaxLineLengthExceeded => {
                warn!("agent stream: line exceeds max length, skipping");
            }
            LinesCodecError::Io(io_err) => {
                warn!(error = %io_err, "agent stream: line is not valid UTF-8, skipping");
            }
        }
    }
}

impl Default for NdjsonCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for NdjsonCodec {
    type Item = String;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        loop {
            match self.inner.decode(src) {
                Ok(line) => return Ok(line),
                Err(err) => self.skip(err),
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        loop {
            match self.inner.decode_eof(src) {
                Ok(line) => return Ok(line),
                Err(err) => self.skip(err),
            }
        }
    }
}

impl Encoder<String> for NdjsonCodec {
    type Error = AppError;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<()> {
        self.inner
            .encode(item, dst)
            .map_err(|err| AppError::Io(err.to_string()))
    }
}
