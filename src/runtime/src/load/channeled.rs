//! Bounded byte pipe between an archive producer and the engine.
//!
//! The writer blocks once the buffer fills, so a slow engine read
//! back-pressures the producer and no data is dropped. An atomic counter
//! tracks bytes consumed so progress can be reported.

use std::io::{Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, SyncSender};
use std::sync::Arc;

/// Total buffered capacity of the pipe.
const PIPE_CAPACITY: usize = 8 * 1024 * 1024;

/// Granularity of the chunks moved through the pipe.
const CHUNK_SIZE: usize = 64 * 1024;

/// Writing half of the pipe. Dropping it marks the stream complete.
pub struct ChanneledWriter {
    tx: SyncSender<Vec<u8>>,
}

/// Reading half of the pipe. Returns EOF once the writer is dropped and
/// the buffer drained.
pub struct ChanneledReader {
    rx: Receiver<Vec<u8>>,
    pending: Vec<u8>,
    offset: usize,
    count: Arc<AtomicU64>,
}

/// Create a connected reader/writer pair plus the read-count cell.
pub fn channeled_pipe() -> (ChanneledWriter, ChanneledReader, Arc<AtomicU64>) {
    let (tx, rx) = std::sync::mpsc::sync_channel(PIPE_CAPACITY / CHUNK_SIZE);
    let count = Arc::new(AtomicU64::new(0));
    (
        ChanneledWriter { tx },
        ChanneledReader {
            rx,
            pending: Vec::new(),
            offset: 0,
            count: Arc::clone(&count),
        },
        count,
    )
}

impl Write for ChanneledWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        for chunk in buf.chunks(CHUNK_SIZE) {
            self.tx.send(chunk.to_vec()).map_err(|_| {
                std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe reader is gone")
            })?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Read for ChanneledReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.offset == self.pending.len() {
            match self.rx.recv() {
                Ok(chunk) => {
                    self.pending = chunk;
                    self.offset = 0;
                }
                // Writer dropped: end of stream.
                Err(_) => return Ok(0),
            }
        }

        let n = (self.pending.len() - self.offset).min(buf.len());
        buf[..n].copy_from_slice(&self.pending[self.offset..self.offset + n]);
        self.offset += n;
        self.count.fetch_add(n as u64, Ordering::Relaxed);
        Ok(n)
    }
}
