//! Per-connection session: inbound dispatch plus outbound delivery.
//!
//! Each accepted connection gets one [`Session`] owning its backend and
//! resource tables. The inbound context reads framed messages and invokes
//! the dispatcher synchronously — backend calls, compression and response
//! construction all run here, serially per session. Responses are posted
//! onto the outbound queue and written by a separate drain task, so wire
//! order always equals post order.

use std::io;

use futures::StreamExt;
use log::{debug, warn};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_util::codec::FramedRead;

use crate::{
    backend::Backend,
    compress::CompressError,
    framing::{MessageDecoder, WireMessage},
    protocol::{CompressionFeatures, MessageType},
    resources::ResourceManager,
    wire::{Reader, WireError, Writer},
};

mod dispatch;
mod outbound;
mod render;

pub use outbound::{Outbound, PostHandle};

/// Errors that end a session.
///
/// Per-message trouble (unknown types, invalid handles) is logged and
/// recovered locally; only transport failures and fatal protocol errors
/// surface here.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The channel failed or delivered a truncated stream.
    #[error("transport error: {0}")]
    Io(#[from] io::Error),

    /// A message body ended before its declared fields.
    #[error("malformed message body: {0}")]
    Wire(#[from] WireError),

    /// Property queries for data-type lists are not part of the protocol.
    #[error("property query with a data-type-list payload is not supported")]
    UnsupportedPropertyType,

    /// A negotiated channel codec failed; continuing would desynchronise
    /// the peer's parser.
    #[error(transparent)]
    Compress(#[from] CompressError),
}

/// Dispatcher state for one connection.
pub struct Session<B> {
    backend: B,
    resources: ResourceManager,
    peer_features: CompressionFeatures,
    outbound: PostHandle,
}

impl<B: Backend> Session<B> {
    #[must_use]
    pub fn new(backend: B, outbound: PostHandle) -> Self {
        Self {
            backend,
            resources: ResourceManager::default(),
            peer_features: CompressionFeatures::none(),
            outbound,
        }
    }

    /// Dispatch one inbound message.
    ///
    /// Unknown message types are logged and dropped. Invalid handles drop
    /// the request without a response; the session stays open. Table
    /// mutations happen only after a successful parse and backend call,
    /// so a bad message cannot corrupt the resource tables.
    ///
    /// # Errors
    ///
    /// Returns a [`SessionError`] only for fatal conditions: a truncated
    /// body, an unsupported protocol variant, or a codec failure.
    pub fn handle_message(&mut self, message: &WireMessage) -> Result<(), SessionError> {
        let Some(kind) = MessageType::from_u32(message.kind) else {
            warn!(
                "unknown message type: tag={}, size={}",
                message.kind,
                message.payload.len()
            );
            return Ok(());
        };
        debug!(
            "message received: kind={kind:?}, size={}",
            message.payload.len()
        );

        let mut reader = Reader::new(&message.payload);
        match kind {
            MessageType::NewDevice => self.on_new_device(&mut reader),
            MessageType::NewObject => self.on_new_object(&mut reader),
            MessageType::NewArray => self.on_new_array(&mut reader),
            MessageType::SetParam => self.on_set_param(&mut reader),
            MessageType::UnsetParam => self.on_unset_param(&mut reader),
            MessageType::UnsetAllParams => self.on_unset_all_params(&mut reader),
            MessageType::CommitParams => self.on_commit_params(&mut reader),
            MessageType::Release => self.on_release(&mut reader),
            MessageType::Retain => self.on_retain(&mut reader),
            MessageType::MapArray => self.on_map_array(&mut reader),
            MessageType::UnmapArray => self.on_unmap_array(&mut reader),
            MessageType::RenderFrame => self.on_render_frame(&mut reader),
            MessageType::FrameReady => self.on_frame_ready(&mut reader),
            MessageType::GetProperty => self.on_get_property(&mut reader),
            MessageType::GetObjectSubtypes => self.on_get_object_subtypes(&mut reader),
            MessageType::GetObjectInfo => self.on_get_object_info(&mut reader),
            MessageType::GetParameterInfo => self.on_get_parameter_info(&mut reader),
            // Response tags never arrive from the peer on this side of
            // the bridge; treat them like unknown traffic.
            other => {
                warn!(
                    "unhandled message type: kind={other:?}, size={}",
                    message.payload.len()
                );
                Ok(())
            }
        }
    }

    fn post(&self, kind: MessageType, body: Writer) { self.outbound.post(kind, body.freeze()); }
}

/// Drive a session over an accepted connection until the peer closes or
/// a fatal error occurs.
///
/// Splits the stream, spawns the outbound drain task, and feeds inbound
/// frames to the dispatcher. On exit the post handle is dropped and the
/// drain task joined, so every posted response reaches the wire before
/// the socket closes.
///
/// # Errors
///
/// Returns the fatal [`SessionError`] that ended the session, if any.
pub async fn run_session<B: Backend>(stream: TcpStream, backend: B) -> Result<(), SessionError> {
    let (read_half, write_half) = stream.into_split();
    let (post, queue) = outbound::channel();
    let drain = tokio::spawn(outbound::drain(queue, write_half));

    let mut inbound = FramedRead::new(read_half, MessageDecoder::default());
    let mut session = Session::new(backend, post);

    let mut result = Ok(());
    while let Some(frame) = inbound.next().await {
        match frame {
            Ok(message) => {
                if let Err(error) = session.handle_message(&message) {
                    result = Err(error);
                    break;
                }
            }
            Err(error) => {
                result = Err(SessionError::Io(error));
                break;
            }
        }
    }

    // Dropping the session closes the queue; the drain task finishes
    // flushing what was already posted.
    drop(session);
    match drain.await {
        Ok(Ok(())) => {}
        Ok(Err(error)) => {
            if result.is_ok() {
                result = Err(SessionError::Io(error));
            } else {
                warn!("outbound drain failed after session error: error={error}");
            }
        }
        Err(error) => warn!("outbound drain task failed to join: error={error}"),
    }
    result
}
