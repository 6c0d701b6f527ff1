//! Receive-loop behavior over an in-memory channel transport.

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError};

use common::*;
use eigerstream::codec::Compressor;
use eigerstream::stream::{CbfConverter, MessageSource, StreamReceiver};
use eigerstream::{Error, Result};

/// A [`MessageSource`] fed from a crossbeam channel, standing in for the
/// detector's push socket. Once the sending side hangs up and the queue is
/// drained, it trips the shutdown flag so the receive loop exits.
struct ChannelSource {
    rx: Receiver<Vec<u8>>,
    pending: Option<Vec<u8>>,
    shutdown: Arc<AtomicBool>,
}

impl ChannelSource {
    fn new(rx: Receiver<Vec<u8>>, shutdown: Arc<AtomicBool>) -> Self {
        ChannelSource {
            rx,
            pending: None,
            shutdown,
        }
    }
}

impl MessageSource for ChannelSource {
    fn poll(&mut self, timeout: Duration) -> Result<bool> {
        if self.pending.is_some() {
            return Ok(true);
        }
        match self.rx.recv_timeout(timeout) {
            Ok(msg) => {
                self.pending = Some(msg);
                Ok(true)
            }
            Err(RecvTimeoutError::Timeout) => Ok(false),
            Err(RecvTimeoutError::Disconnected) => {
                self.shutdown.store(true, Ordering::Relaxed);
                Ok(false)
            }
        }
    }

    fn recv(&mut self, buf: &mut [u8]) -> Result<usize> {
        let msg = match self.pending.take() {
            Some(msg) => msg,
            None => self
                .rx
                .recv()
                .map_err(|_| Error::Io(std::io::Error::other("stream disconnected")))?,
        };
        let n = msg.len();
        let copy_len = n.min(buf.len());
        buf[..copy_len].copy_from_slice(&msg[..copy_len]);
        Ok(n)
    }
}

#[test]
fn receives_and_commits_series_until_source_hangs_up() {
    let mut params = TestParams::default();
    params.config.compression = Compressor::Lz4;
    let dir = tempfile::tempdir().unwrap();

    let converter = CbfConverter::new(false, false).with_output_dir(dir.path());
    let mut receiver = StreamReceiver::new(converter)
        .with_poll_interval(Duration::from_millis(20))
        .with_recv_buffer_len(1024 * 1024);

    let (tx, rx) = unbounded();
    let mut source = ChannelSource::new(rx, receiver.shutdown_flag());

    let feeder_params = TestParams {
        config: params.config.clone(),
        ..TestParams::default()
    };
    let feeder = thread::spawn(move || {
        for series in 1..=2 {
            for msg in series_messages(&feeder_params, series, 2) {
                tx.send(msg).expect("receiver alive");
            }
        }
        // Hanging up ends the run once everything queued is consumed.
    });

    receiver.run(&mut source).unwrap();
    feeder.join().unwrap();

    for series in 1..=2 {
        for frame in 1..=2 {
            let path = dir.path().join(format!("{series}-{frame}.cbf"));
            assert!(path.exists(), "expected {path:?}");
            assert_eq!(read_cbf_pixels(&path), pixel_values(&params, frame));
        }
    }
}

#[test]
fn malformed_series_is_abandoned_and_the_next_one_lands() {
    let params = TestParams::default();
    let dir = tempfile::tempdir().unwrap();

    let converter = CbfConverter::new(false, false).with_output_dir(dir.path());
    let mut receiver = StreamReceiver::new(converter)
        .with_poll_interval(Duration::from_millis(20))
        .with_recv_buffer_len(1024 * 1024);

    let (tx, rx) = unbounded();
    let mut source = ChannelSource::new(rx, receiver.shutdown_flag());

    // Series 1 goes bad at its first frame (wrong series id); series 2 is
    // clean and must still be converted.
    tx.send(global_part1(&params, 1)).unwrap();
    tx.send(global_part2(&params)).unwrap();
    tx.send(frame_part1(99, 1)).unwrap();
    for msg in series_messages(&params, 2, 1) {
        tx.send(msg).unwrap();
    }
    drop(tx);

    receiver.run(&mut source).unwrap();

    assert!(!dir.path().join("1-1.cbf").exists());
    assert!(dir.path().join("2-1.cbf").exists());
}

#[test]
fn shutdown_flag_stops_an_idle_loop() {
    let dir = tempfile::tempdir().unwrap();
    let converter = CbfConverter::new(false, false).with_output_dir(dir.path());
    let mut receiver = StreamReceiver::new(converter)
        .with_poll_interval(Duration::from_millis(5))
        .with_recv_buffer_len(4096);

    let (tx, rx) = unbounded::<Vec<u8>>();
    let shutdown = receiver.shutdown_flag();
    let mut source = ChannelSource::new(rx, Arc::clone(&shutdown));

    // Nothing is ever sent; request shutdown from outside after a moment.
    let stopper = thread::spawn(move || {
        thread::sleep(Duration::from_millis(30));
        shutdown.store(true, Ordering::Relaxed);
        drop(tx);
    });

    receiver.run(&mut source).unwrap();
    stopper.join().unwrap();
}
