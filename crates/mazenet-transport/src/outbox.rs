//! Per-connection outbound queues and the writer task that drains them.
//!
//! Every connection gets one [`Outbox`] (cheap to clone, sync to push into)
//! and one writer task. Producers never touch the socket directly: the
//! session handler pushes control frames, the simulation pushes replication
//! frames, and the writer serializes them onto the wire. Control frames
//! always win a race against replication frames.
//!
//! The replication lane is bounded by [`REPLICATION_BACKLOG`]. A peer that
//! stops reading fills it and further pushes fail with
//! [`TransportError::Backlogged`] instead of growing the queue.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;

use crate::{
    ConnectionId, Delivery, Frame, Lane, TransportError, WebSocketConnection,
};

/// Replication frames a connection may have queued before pushes fail.
pub const REPLICATION_BACKLOG: usize = 256;

/// Producer side of a connection's two outbound lanes.
#[derive(Debug, Clone)]
pub struct Outbox {
    conn_id: ConnectionId,
    control: mpsc::UnboundedSender<Frame>,
    replication: mpsc::Sender<Frame>,
}

impl Outbox {
    /// Creates an outbox and the matching receivers, without a writer.
    ///
    /// Used by [`spawn_writer`] and by tests that want to inspect frames.
    pub fn channel(
        conn_id: ConnectionId,
    ) -> (
        Self,
        mpsc::UnboundedReceiver<Frame>,
        mpsc::Receiver<Frame>,
    ) {
        let (control, control_rx) = mpsc::unbounded_channel();
        let (replication, replication_rx) = mpsc::channel(REPLICATION_BACKLOG);
        (
            Self {
                conn_id,
                control,
                replication,
            },
            control_rx,
            replication_rx,
        )
    }

    /// The connection this outbox feeds.
    pub fn conn_id(&self) -> ConnectionId {
        self.conn_id
    }

    /// Queues a frame on the lane it names.
    ///
    /// # Errors
    /// - [`TransportError::Shutdown`] once the writer is gone.
    /// - [`TransportError::Backlogged`] if the replication lane is full.
    ///
    /// Either way the frame is discarded.
    pub fn push(&self, frame: Frame) -> Result<(), TransportError> {
        match frame.lane {
            Lane::Control => self
                .control
                .send(frame)
                .map_err(|_| TransportError::Shutdown),
            Lane::Replication => {
                self.replication.try_send(frame).map_err(|e| match e {
                    TrySendError::Full(_) => TransportError::Backlogged,
                    TrySendError::Closed(_) => TransportError::Shutdown,
                })
            }
        }
    }

    /// Free slots left on the replication lane.
    pub fn replication_room(&self) -> usize {
        self.replication.capacity()
    }

    /// Returns `true` once the writer has stopped.
    pub fn is_closed(&self) -> bool {
        self.control.is_closed()
    }
}

/// Owns a connection's writer task.
///
/// Dropping the handle aborts the writer and discards everything still
/// queued.
#[derive(Debug)]
pub struct WriterHandle {
    task: JoinHandle<()>,
}

impl WriterHandle {
    /// Stops the writer now. Unflushed frames are dropped, not retried.
    pub fn abort(&self) {
        self.task.abort();
    }
}

impl Drop for WriterHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Spawns the writer task for `conn` and returns the outbox feeding it.
pub fn spawn_writer<S>(
    conn: Arc<WebSocketConnection<S>>,
    conn_id: ConnectionId,
) -> (Outbox, WriterHandle)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (outbox, mut control_rx, mut replication_rx) = Outbox::channel(conn_id);

    let task = tokio::spawn(async move {
        loop {
            let frame = tokio::select! {
                biased;
                Some(frame) = control_rx.recv() => frame,
                Some(frame) = replication_rx.recv() => frame,
                else => break,
            };

            let result = conn.send_bytes(&frame.bytes).await;
            match (result, frame.delivery) {
                (Ok(()), _) => {}
                (Err(e), Delivery::Unreliable) => {
                    tracing::trace!(%conn_id, error = %e, "dropped unreliable frame");
                }
                (Err(e), Delivery::Reliable) => {
                    tracing::debug!(%conn_id, error = %e, "writer stopped");
                    break;
                }
            }
        }
    });

    (outbox, WriterHandle { task })
}
