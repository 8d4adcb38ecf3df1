//! Dedicated writer task for a connection's outbound frames.
//!
//! Every sender pushes encoded frames into one mpsc queue; a single writer task
//! drains it and owns the write half of the socket.
//!
//! # Architecture
//!
//! ```text
//! send() task 1 ─┐
//! send() task 2 ─┼─► mpsc::Sender<WriterCommand> ─► Writer Task ─► Socket
//! handler ctx   ─┘
//! ```
//!
//! # Guarantees
//!
//! - **Ordering**: one consumer, so frames hit the socket in enqueue order
//! - **Full writes**: partial vectored writes are resumed until the batch is out
//! - **Backpressure**: with a queue capacity of 0, `send` returns only once the
//!   writer task has taken the frame; otherwise it waits for a free slot

use std::io::IoSlice;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::codec::PayloadCodec;
use crate::error::{Result, TagwireError};
use crate::protocol::{payload_length, Header, Message, Tag, HEADER_SIZE};

/// Default outbound queue capacity (unbuffered).
pub const DEFAULT_QUEUE_CAPACITY: usize = 0;

/// Maximum frames to batch in a single write operation.
const MAX_BATCH_SIZE: usize = 64;

/// A frame ready to be written to the socket.
#[derive(Debug)]
pub struct OutboundFrame {
    /// Pre-encoded header (8 bytes).
    pub header: [u8; HEADER_SIZE],
    /// Payload bytes.
    pub payload: Bytes,
    /// Signalled when the writer task dequeues the frame (unbuffered queues).
    taken: Option<oneshot::Sender<()>>,
}

impl OutboundFrame {
    /// Create a new outbound frame.
    #[inline]
    pub fn new(header: &Header, payload: Bytes) -> Self {
        Self {
            header: header.encode(),
            payload,
            taken: None,
        }
    }

    /// Create a frame for `tag`, deriving the length from the payload.
    pub fn with_payload(tag: Tag, payload: Bytes) -> Result<Self> {
        let header = Header::new(tag, payload_length(payload.len())?);
        Ok(Self::new(&header, payload))
    }

    /// Encode a message with codec `C`.
    pub fn encode<C, M>(message: &M) -> Result<Self>
    where
        C: PayloadCodec,
        M: Message + ?Sized,
    {
        let payload = C::encode(message)?;
        Self::with_payload(message.tag(), Bytes::from(payload))
    }

    /// Total size of this frame (header + payload).
    #[inline]
    pub fn size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// Tell a waiting sender that the writer owns this frame now.
    fn dequeued(mut self) -> Self {
        if let Some(taken) = self.taken.take() {
            let _ = taken.send(());
        }
        self
    }
}

/// Commands consumed by the writer task.
#[derive(Debug)]
pub(crate) enum WriterCommand {
    /// Write a frame.
    Frame(OutboundFrame),
    /// Acknowledge once everything queued before it is written and flushed.
    Flush(oneshot::Sender<()>),
}

/// Configuration for the writer queue.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Outbound queue capacity. 0 means unbuffered (rendezvous).
    pub queue_capacity: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// Handle for sending frames to the writer task.
///
/// Cheaply cloneable; every clone feeds the same FIFO queue.
#[derive(Clone, Debug)]
pub struct WriterHandle {
    /// Channel sender for commands.
    tx: mpsc::Sender<WriterCommand>,
    /// Wait for the writer to take each frame before returning.
    rendezvous: bool,
}

impl WriterHandle {
    /// Send a frame to the writer task.
    ///
    /// Suspends while the queue is full, and with an unbuffered queue until
    /// the writer task has dequeued this frame. Fails with
    /// `ConnectionClosed` once the writer task is gone, including when it
    /// goes away while this call is suspended.
    pub async fn send(&self, mut frame: OutboundFrame) -> Result<()> {
        if !self.rendezvous {
            return self
                .tx
                .send(WriterCommand::Frame(frame))
                .await
                .map_err(|_| TagwireError::ConnectionClosed);
        }

        let (taken_tx, taken_rx) = oneshot::channel();
        frame.taken = Some(taken_tx);
        self.tx
            .send(WriterCommand::Frame(frame))
            .await
            .map_err(|_| TagwireError::ConnectionClosed)?;

        // Dropped unsignalled when the writer exits with the frame still queued
        taken_rx.await.map_err(|_| TagwireError::ConnectionClosed)
    }

    /// Wait until every frame queued before this call has been written and
    /// flushed.
    pub async fn flush(&self) -> Result<()> {
        let (done_tx, done_rx) = oneshot::channel();
        self.tx
            .send(WriterCommand::Flush(done_tx))
            .await
            .map_err(|_| TagwireError::ConnectionClosed)?;
        done_rx.await.map_err(|_| TagwireError::ConnectionClosed)
    }
}

/// Create the outbound queue.
///
/// tokio channels need at least one slot; the unbuffered behaviour comes from
/// the rendezvous acknowledgement instead.
pub(crate) fn writer_channel(config: &WriterConfig) -> (WriterHandle, mpsc::Receiver<WriterCommand>) {
    let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
    let handle = WriterHandle {
        tx,
        rendezvous: config.queue_capacity == 0,
    };
    (handle, rx)
}

/// Writer task body.
///
/// Runs until `shutdown` fires, the queue has no senders left, or a write
/// fails. On exit the queue is closed (waking blocked senders) and the write
/// half is shut down.
pub(crate) async fn writer_loop<W>(
    mut rx: mpsc::Receiver<WriterCommand>,
    mut writer: W,
    shutdown: CancellationToken,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let result = tokio::select! {
        biased;
        _ = shutdown.cancelled() => Ok(()),
        res = pump(&mut rx, &mut writer) => res,
    };

    rx.close();
    let _ = writer.shutdown().await;
    result
}

/// Receive commands and write them out in batches.
async fn pump<W>(rx: &mut mpsc::Receiver<WriterCommand>, writer: &mut W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);

    loop {
        // Wait for first command
        let mut flush_waiter = match rx.recv().await {
            Some(WriterCommand::Frame(frame)) => {
                batch.push(frame.dequeued());
                None
            }
            Some(WriterCommand::Flush(done)) => Some(done),
            None => return Ok(()),
        };

        // Collect additional ready frames, stopping at a flush barrier
        while flush_waiter.is_none() && batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(WriterCommand::Frame(frame)) => batch.push(frame.dequeued()),
                Ok(WriterCommand::Flush(done)) => flush_waiter = Some(done),
                Err(_) => break,
            }
        }

        write_batch(writer, &batch).await?;
        batch.clear();

        if let Some(done) = flush_waiter {
            let _ = done.send(());
        }
    }
}

/// Write a batch of frames using scatter/gather I/O (write_vectored), then
/// flush.
async fn write_batch<W>(writer: &mut W, batch: &[OutboundFrame]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if batch.is_empty() {
        writer.flush().await?;
        return Ok(());
    }

    let total_size: usize = batch.iter().map(|f| f.size()).sum();
    let mut total_written = 0;

    while total_written < total_size {
        let slices = build_remaining_slices(batch, total_written);
        let written = writer.write_vectored(&slices).await?;
        if written == 0 {
            return Err(TagwireError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )));
        }
        total_written += written;
    }

    writer.flush().await?;
    Ok(())
}

/// Build IoSlice array for the data left after `skip_bytes` were written.
fn build_remaining_slices(batch: &[OutboundFrame], skip_bytes: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len() * 2);
    let mut offset = 0;

    for frame in batch {
        let header_end = offset + HEADER_SIZE;
        if skip_bytes < header_end {
            let start = skip_bytes.saturating_sub(offset);
            slices.push(IoSlice::new(&frame.header[start..]));
        }
        offset = header_end;

        if !frame.payload.is_empty() {
            let payload_end = offset + frame.payload.len();
            if skip_bytes < payload_end {
                let start = skip_bytes.saturating_sub(offset);
                slices.push(IoSlice::new(&frame.payload[start..]));
            }
            offset = payload_end;
        }
    }

    slices
}
