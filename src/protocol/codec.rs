//! Stream framing for both directions of the discovery pipe.
//!
//! - [`CommandCodec`] frames the controller → discovery direction: one ASCII
//!   command per `\n`-terminated line, built on [`LinesCodec`] with a maximum
//!   line length.
//! - [`EnvelopeCodec`] frames the discovery → controller direction: a
//!   sequence of JSON objects that are *not* required to be newline
//!   delimited. Each call to [`Decoder::decode`] pulls exactly one complete
//!   value off the front of the buffer with `serde_json`'s streaming
//!   deserializer.
//!
//! Use them with [`tokio_util::codec::FramedRead`] and
//! [`tokio_util::codec::FramedWrite`].

use std::io;

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

use crate::models::message::Envelope;
use crate::protocol::command::Command;
use crate::{AppError, Result};

/// Maximum command line length accepted by [`CommandCodec`]: 64 KiB.
pub const MAX_COMMAND_BYTES: usize = 65_536;

/// Maximum size of a single buffered envelope: 1 MiB.
///
/// A discovery that streams more than this without completing a JSON value
/// is treated as malformed rather than buffered without bound.
pub const MAX_ENVELOPE_BYTES: usize = 1_048_576;

// ── Commands ─────────────────────────────────────────────────────────────────

/// Line codec for discovery commands.
///
/// Decodes raw lines (the server parses them into [`Command`]s so that a
/// malformed line can still be answered) and encodes [`Command`]s as
/// `COMMAND\n`.
///
/// Lines that are too long or not UTF-8 are yielded as `Err` items rather
/// than decoder errors: `FramedRead` ends the stream after a decoder error,
/// and one bad line must not end the session. Only I/O failures are
/// returned as decoder errors.
#[derive(Debug)]
pub struct CommandCodec(LinesCodec);

impl CommandCodec {
    /// Create a new `CommandCodec` with the default [`MAX_COMMAND_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self(LinesCodec::new_with_max_length(MAX_COMMAND_BYTES))
    }
}

impl Default for CommandCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for CommandCodec {
    type Item = Result<String>;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        match self.0.decode(src) {
            Ok(line) => Ok(line.map(Ok)),
            Err(err) => unreadable_line(err).map(|err| Some(Err(err))),
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        match self.0.decode_eof(src) {
            Ok(line) => Ok(line.map(Ok)),
            Err(err) => unreadable_line(err).map(|err| Some(Err(err))),
        }
    }
}

impl Encoder<Command> for CommandCodec {
    type Error = AppError;

    fn encode(&mut self, item: Command, dst: &mut BytesMut) -> Result<()> {
        self.0
            .encode(item.to_string(), dst)
            .map_err(map_lines_error)
    }
}

/// Line-level failures become [`AppError::Protocol`] items; I/O failures
/// stay stream errors.
fn unreadable_line(e: LinesCodecError) -> Result<AppError> {
    match e {
        LinesCodecError::MaxLineLengthExceeded => Ok(map_lines_error(e)),
        LinesCodecError::Io(io_err) if io_err.kind() == io::ErrorKind::InvalidData => Ok(
            AppError::Protocol("command line is not valid UTF-8".into()),
        ),
        LinesCodecError::Io(io_err) => Err(AppError::Transport(io_err.to_string())),
    }
}

/// Map a [`LinesCodecError`] to an [`AppError`].
fn map_lines_error(e: LinesCodecError) -> AppError {
    match e {
        LinesCodecError::MaxLineLengthExceeded => AppError::Protocol(format!(
            "command line too long: exceeded {MAX_COMMAND_BYTES} bytes"
        )),
        LinesCodecError::Io(io_err) => AppError::Transport(io_err.to_string()),
    }
}

// ── Envelopes ────────────────────────────────────────────────────────────────

/// Streaming JSON codec for discovery envelopes.
///
/// # Decoder
///
/// Leading whitespace between values is skipped. An incomplete value leaves
/// the buffer untouched and returns `Ok(None)`; anything that can never
/// become a valid envelope returns [`AppError::Protocol`].
///
/// # Encoder
///
/// Envelopes are written as compact JSON followed by `\n`. The newline is a
/// courtesy for humans reading the stream; decoders must not rely on it.
#[derive(Debug, Default)]
pub struct EnvelopeCodec;

impl EnvelopeCodec {
    /// Create a new `EnvelopeCodec`.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for EnvelopeCodec {
    type Item = Envelope;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        let blank = src.iter().take_while(|b| b.is_ascii_whitespace()).count();
        src.advance(blank);
        if src.is_empty() {
            return Ok(None);
        }

        let (decoded, consumed) = {
            let mut stream = serde_json::Deserializer::from_slice(&src[..]).into_iter::<Envelope>();
            let decoded = stream.next();
            (decoded, stream.byte_offset())
        };

        match decoded {
            Some(Ok(envelope)) => {
                src.advance(consumed);
                Ok(Some(envelope))
            }
            Some(Err(err)) if err.is_eof() => {
                if src.len() > MAX_ENVELOPE_BYTES {
                    return Err(AppError::Protocol(format!(
                        "envelope too long: exceeded {MAX_ENVELOPE_BYTES} bytes"
                    )));
                }
                Ok(None)
            }
            Some(Err(err)) => Err(err.into()),
            None => Ok(None),
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        match self.decode(src)? {
            Some(envelope) => Ok(Some(envelope)),
            None if src.is_empty() => Ok(None),
            None => Err(AppError::Protocol(format!(
                "stream ended inside an envelope ({} bytes pending)",
                src.len()
            ))),
        }
    }
}

impl Encoder<Envelope> for EnvelopeCodec {
    type Error = AppError;

    fn encode(&mut self, item: Envelope, dst: &mut BytesMut) -> Result<()> {
        let mut writer = dst.writer();
        serde_json::to_writer(&mut writer, &item)?;
        writer.into_inner().put_u8(b'\n');
        Ok(())
    }
}
