//! Dedicated writer task for chunked frame sending.
//!
//! BLE writes are limited to a few bytes and the platform gives no ordering
//! guarantee between outstanding writes, so every frame is cut into fixed-size
//! chunks and chunk *i+1* is only issued once the transport has confirmed chunk *i*.
//! The chunk cursor lives inside the task; nothing else touches it.
//!
//! # Architecture
//!
//! ```text
//! execute() ─► mpsc::Sender<WriteJob> ─► Writer Task ─► Transport::write (chunk 0)
//!                                             │          Transport::write (chunk 1)
//!     ◄──────── oneshot (frame result) ───────┘          ...
//! ```

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::{LinkError, Result};
use crate::transport::Transport;

/// Peripheral write limit per chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 18;

/// Frames queued ahead of the writer. The session keeps at most one in flight.
const CHANNEL_CAPACITY: usize = 4;

/// A frame waiting to be written, with its completion sink.
#[derive(Debug)]
struct WriteJob {
    frame: Bytes,
    done: oneshot::Sender<Result<()>>,
}

/// Handle for sending frames to the writer task.
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<WriteJob>,
}

impl WriterHandle {
    /// Write a whole frame, chunk by chunk.
    ///
    /// Resolves when the last chunk is confirmed, or with the first failure.
    /// Returns `Disconnected` if the writer task is gone.
    pub async fn send(&self, frame: Bytes) -> Result<()> {
        let (done, rx) = oneshot::channel();
        self.tx
            .send(WriteJob { frame, done })
            .await
            .map_err(|_| LinkError::Disconnected)?;
        rx.await.map_err(|_| LinkError::Disconnected)?
    }
}

/// Spawn the writer task and return a handle for sending frames.
pub fn spawn_writer_task<T: Transport>(
    transport: Arc<T>,
    chunk_size: usize,
) -> (WriterHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    let task = tokio::spawn(writer_loop(rx, transport, chunk_size.max(1)));
    (WriterHandle { tx }, task)
}

async fn writer_loop<T: Transport>(
    mut rx: mpsc::Receiver<WriteJob>,
    transport: Arc<T>,
    chunk_size: usize,
) {
    while let Some(job) = rx.recv().await {
        let result = write_chunked(transport.as_ref(), &job.frame, chunk_size).await;
        let _ = job.done.send(result);
    }
    tracing::debug!("Writer task stopped");
}

/// Write `frame` in `chunk_size` pieces, strictly one after another.
pub(crate) async fn write_chunked<T: Transport>(
    transport: &T,
    frame: &Bytes,
    chunk_size: usize,
) -> Result<()> {
    let total = frame.len();
    let mut offset = 0;

    while offset < total {
        let end = (offset + chunk_size).min(total);
        transport
            .write(frame.slice(offset..end))
            .await
            .map_err(|e| {
                tracing::warn!("Chunk write at offset {} of {} failed: {}", offset, total, e);
                LinkError::TransportWriteFailed(e)
            })?;
        offset = end;
    }

    tracing::trace!("Wrote {} bytes in {} chunks", total, total.div_ceil(chunk_size));
    Ok(())
}
