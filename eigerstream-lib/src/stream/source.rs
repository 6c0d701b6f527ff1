//! Inbound message transports.

use std::time::Duration;

use tracing::info;

use crate::{Error, Result};

/// A push-style framed message transport: one call to
/// [`recv`](MessageSource::recv) yields exactly one message part.
///
/// Abstracting the socket keeps the receive loop testable with an in-memory
/// source.
pub trait MessageSource {
    /// Wait up to `timeout` for input. `Ok(true)` when a message is ready.
    ///
    /// # Errors
    /// Transport failure. An interrupted wait is reported as `Ok(false)` so
    /// the caller can re-check its shutdown flag.
    fn poll(&mut self, timeout: Duration) -> Result<bool>;

    /// Receive one message part into `buf`, returning the part's full length
    /// (which may exceed `buf.len()`, in which case the part was truncated).
    ///
    /// # Errors
    /// [`Error::Shutdown`] when the blocking receive was interrupted by a
    /// signal; transport failure otherwise.
    fn recv(&mut self, buf: &mut [u8]) -> Result<usize>;
}

/// ZeroMQ pull socket connected to the detector's push endpoint.
pub struct ZmqSource {
    socket: zmq::Socket,
    // Keeps the context's I/O threads alive as long as the socket.
    _context: zmq::Context,
}

impl ZmqSource {
    /// Connect to `endpoint` (e.g. `tcp://dcu:9999`) with `io_threads`
    /// transport I/O threads.
    ///
    /// # Errors
    /// [`Error::Io`] when the context or socket cannot be set up.
    pub fn connect(endpoint: &str, io_threads: i32) -> Result<Self> {
        let context = zmq::Context::new();
        context.set_io_threads(io_threads).map_err(zmq_err)?;
        let socket = context.socket(zmq::PULL).map_err(zmq_err)?;
        socket.connect(endpoint).map_err(zmq_err)?;
        info!(endpoint, io_threads, "connected to detector stream");
        Ok(ZmqSource {
            socket,
            _context: context,
        })
    }
}

impl MessageSource for ZmqSource {
    fn poll(&mut self, timeout: Duration) -> Result<bool> {
        let timeout = i64::try_from(timeout.as_millis()).unwrap_or(i64::MAX);
        match self.socket.poll(zmq::POLLIN, timeout) {
            Ok(n) => Ok(n > 0),
            Err(zmq::Error::EINTR) => Ok(false),
            Err(err) => Err(zmq_err(err)),
        }
    }

    fn recv(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self.socket.recv_into(buf, 0) {
            Ok(n) => Ok(n),
            Err(zmq::Error::EINTR) => Err(Error::Shutdown),
            Err(err) => Err(zmq_err(err)),
        }
    }
}

fn zmq_err(err: zmq::Error) -> Error {
    Error::Io(std::io::Error::other(err))
}
