//! Discovery wire protocol: text commands one way, JSON envelopes the other.
//!
//! - `command`: the [`Command`] set and its line syntax.
//! - `codec`: [`CommandCodec`] and [`EnvelopeCodec`] stream framing for
//!   [`FramedRead`](tokio_util::codec::FramedRead) /
//!   [`FramedWrite`](tokio_util::codec::FramedWrite).

pub mod codec;
pub mod command;

pub use codec::{CommandCodec, EnvelopeCodec};
pub use command::{Command, ParseCommandError, PROTOCOL_VERSION};
