//! The receive loop driving a [`StreamParser`] from a [`MessageSource`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use super::{MessageSource, ParseOutcome, StreamParser};
use crate::{Error, Result};

/// Default receive buffer: large enough for a full-detector calibration blob.
pub const DEFAULT_RECV_BUFFER_LEN: usize = 128 * 1024 * 1024;

/// Default idle heartbeat interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Drives a parser from an inbound framed transport.
///
/// The loop alternates between a long idle poll (the detector may sit quiet
/// for hours between acquisitions) and a tight receive phase that takes
/// message parts back-to-back with no intervening poll, because the upstream
/// may be bursting at line rate and every avoided syscall counts.
///
/// A parser error aborts the current series: it is logged, the parser is
/// reset, and the loop returns to the idle poll to await the next series.
/// Transport errors end the loop.
///
/// Shutdown is cooperative via [`shutdown_flag`](Self::shutdown_flag): the
/// flag is checked at the top of the outer loop and observed between tight
/// receives, but an in-progress series always runs to completion first.
pub struct StreamReceiver<P> {
    parser: P,
    poll_interval: Duration,
    recv_buf: Vec<u8>,
    shutdown: Arc<AtomicBool>,
}

impl<P: StreamParser> StreamReceiver<P> {
    #[must_use]
    pub fn new(parser: P) -> Self {
        StreamReceiver {
            parser,
            poll_interval: DEFAULT_POLL_INTERVAL,
            recv_buf: vec![0u8; DEFAULT_RECV_BUFFER_LEN],
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Size the reusable receive buffer. It must hold the largest possible
    /// single message part; for `header_detail="all"` streams that is a
    /// detector-sized calibration blob.
    #[must_use]
    pub fn with_recv_buffer_len(mut self, len: usize) -> Self {
        self.recv_buf = vec![0u8; len];
        self
    }

    /// The flag a signal handler sets to request cooperative shutdown.
    #[must_use]
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Run until shutdown is requested.
    ///
    /// # Errors
    /// Transport errors other than an interrupted receive.
    pub fn run<S: MessageSource>(&mut self, source: &mut S) -> Result<()> {
        while !self.shutdown.load(Ordering::Relaxed) {
            // Wait for the start of the next series.
            if !source.poll(self.poll_interval)? {
                info!(
                    "no activity in the past {} minutes",
                    self.poll_interval.as_secs() / 60
                );
                continue;
            }
            self.receive_series(source)?;
        }
        info!("shutdown requested; receive loop exiting");
        Ok(())
    }

    /// Tight receive phase: consume parts until the parser reports the end
    /// of the series or aborts it.
    fn receive_series<S: MessageSource>(&mut self, source: &mut S) -> Result<()> {
        let mut shutdown_logged = false;
        loop {
            let n = match source.recv(&mut self.recv_buf) {
                Ok(n) => n,
                // Interrupted by a signal; the series must still complete,
                // so retry. The flag is acted on by the outer loop.
                Err(Error::Shutdown) => continue,
                Err(err) => return Err(err),
            };
            if n > self.recv_buf.len() {
                error!(
                    "series aborted: a {n} byte message part exceeds the {} byte receive buffer",
                    self.recv_buf.len()
                );
                self.parser.reset();
                return Ok(());
            }
            if !shutdown_logged && self.shutdown.load(Ordering::Relaxed) {
                info!("shutdown requested; finishing the current series first");
                shutdown_logged = true;
            }
            match self.parser.parse(&self.recv_buf[..n]) {
                Ok(ParseOutcome::SeriesComplete) => {
                    info!("image series successfully committed to storage");
                    return Ok(());
                }
                Ok(ParseOutcome::InProgress) => {}
                Err(err) => {
                    error!("series aborted: {err}");
                    self.parser.reset();
                    return Ok(());
                }
            }
        }
    }
}
