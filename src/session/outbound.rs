//! Serialised outbound write queue.
//!
//! Handlers post `{type, payload}` pairs onto an unbounded FIFO channel;
//! a dedicated drain task performs one framed write per message. The
//! channel is the only structure shared between the inbound and outbound
//! contexts, and wire order equals post order.

use std::io;

use bytes::Bytes;
use futures::SinkExt;
use log::warn;
use tokio::{io::AsyncWrite, sync::mpsc};
use tokio_util::codec::FramedWrite;

use crate::{framing::MessageEncoder, protocol::MessageType};

/// One message queued for the wire.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Outbound {
    pub kind: MessageType,
    pub payload: Bytes,
}

impl Outbound {
    #[must_use]
    pub fn new(kind: MessageType, payload: Bytes) -> Self { Self { kind, payload } }
}

/// Producer half held by the dispatcher.
///
/// Posting onto a closed queue (the connection already went away) drops
/// the message with a warning; in-flight responses are discarded on
/// channel error by design.
#[derive(Clone, Debug)]
pub struct PostHandle {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl PostHandle {
    pub fn post(&self, kind: MessageType, payload: Bytes) {
        if self.tx.send(Outbound::new(kind, payload)).is_err() {
            warn!("outbound queue closed: dropping response: kind={kind:?}");
        }
    }
}

/// Create the queue and its producer handle.
#[must_use]
pub fn channel() -> (PostHandle, mpsc::UnboundedReceiver<Outbound>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (PostHandle { tx }, rx)
}

/// Drain posted messages into the write half, one framed write each.
///
/// Runs until every producer handle is dropped and the queue is empty,
/// so responses posted before session teardown still reach the wire.
pub(crate) async fn drain<W>(
    mut rx: mpsc::UnboundedReceiver<Outbound>,
    writer: W,
) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut sink = FramedWrite::new(writer, MessageEncoder::default());
    while let Some(message) = rx.recv().await {
        sink.send(message).await?;
    }
    Ok(())
}
