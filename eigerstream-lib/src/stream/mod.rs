//! Detector stream parsing.
//!
//! The detector control unit pushes a series of framed message parts per
//! acquisition run: a global header (2 or 8 parts plus an optional appendix),
//! then 4 parts per image frame (plus an optional appendix), then a series-end
//! record. Everything here consumes those parts in strict transport order.
//!
//! [`StreamParser`] is the seam between the transport loop and a concrete
//! converter: the loop hands each message part to [`StreamParser::parse`] and
//! uses the returned [`ParseOutcome`] to track series boundaries.

mod convert;
mod detector;
mod global;
mod receiver;
mod source;

pub use convert::CbfConverter;
pub use detector::{DetectorConfig, HeaderDetail, Mask, MaskElement};
pub use global::{GlobalHeaderParser, SeriesRecord};
pub use receiver::{StreamReceiver, DEFAULT_POLL_INTERVAL, DEFAULT_RECV_BUFFER_LEN};
pub use source::{MessageSource, ZmqSource};

use crate::Result;

/// Outcome of feeding one message part to a parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseOutcome {
    /// More parts are expected for the current series.
    InProgress,
    /// A series-end record was consumed; the parser is ready for the next
    /// series' global header.
    SeriesComplete,
}

/// A consumer of detector stream message parts.
///
/// Implementations parse one part per call, emit any completed image to
/// storage, and report when an entire series has been committed. Errors abort
/// the current series; the caller is expected to [`reset`](Self::reset) the
/// parser before feeding further parts.
pub trait StreamParser {
    /// Absorb one framed message part.
    ///
    /// # Errors
    /// Any [`crate::Error`] other than shutdown aborts the current series.
    fn parse(&mut self, msg: &[u8]) -> Result<ParseOutcome>;

    /// Commit all parsed-but-unwritten data to the destination.
    ///
    /// # Errors
    /// [`crate::Error::Emit`] when the destination rejects the write.
    fn flush(&mut self) -> Result<()>;

    /// Return to the initial state, dropping any partial series.
    ///
    /// Idempotent.
    fn reset(&mut self);
}
