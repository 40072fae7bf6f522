//! Frame delivery pipeline.
//!
//! `RenderFrame` triggers a backend render, blocks until the frame is
//! ready, then maps and ships the colour and depth channels in that
//! order. Compression is applied per channel when both peers advertised
//! the codec and the pixel type matches; compressed payloads carry a
//! `u32` size prefix. The peer parses each channel from the negotiated
//! features alone, so a codec failure is fatal rather than falling back
//! to raw bytes.

use log::debug;

use super::{Session, SessionError};
use crate::{
    backend::{Backend, MappedFrame},
    compress,
    protocol::{CompressionFeatures, DataType, Handle, MessageType, WaitMask},
    wire::{Reader, Writer},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Channel {
    Color,
    Depth,
}

impl Channel {
    fn message(self) -> MessageType {
        match self {
            Self::Color => MessageType::ChannelColor,
            Self::Depth => MessageType::ChannelDepth,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Color => "channel.color",
            Self::Depth => "channel.depth",
        }
    }
}

impl<B: Backend> Session<B> {
    pub(super) fn on_render_frame(&mut self, reader: &mut Reader<'_>) -> Result<(), SessionError> {
        let device_handle = Handle::read(reader)?;
        let object_handle = Handle::read(reader)?;
        let Some(device) = self.require_device("render frame", device_handle) else {
            return Ok(());
        };
        let frame = self.resources.server_object(device_handle, object_handle).object;

        self.backend.render_frame(device, frame);
        // Block until the backend reports completion, then ship the image
        // over the wire. Stalling the whole session here is intentional:
        // it preserves request-response ordering.
        self.backend.frame_ready(device, frame, WaitMask::WAIT);

        let negotiated = compress::local_features().intersect(self.peer_features);
        for channel in [Channel::Color, Channel::Depth] {
            let Some(mapped) = self.backend.map_frame(device, frame, channel.name()) else {
                continue;
            };
            self.deliver_channel(object_handle, channel, &mapped, negotiated)?;
        }

        debug!("frame delivered: device={device_handle}, frame={object_handle}");
        Ok(())
    }

    fn deliver_channel(
        &mut self,
        frame_handle: Handle,
        channel: Channel,
        mapped: &MappedFrame,
        negotiated: CompressionFeatures,
    ) -> Result<(), SessionError> {
        if mapped.element == DataType::Unknown || mapped.data.is_empty() {
            return Ok(());
        }

        let mut body = Writer::new();
        frame_handle.write(&mut body);
        body.write_u32(mapped.width);
        body.write_u32(mapped.height);
        mapped.element.write(&mut body);

        let compressed = match channel {
            Channel::Color
                if negotiated.lossy_color && mapped.element == DataType::UFixed8RgbaSrgb =>
            {
                Some(compress::compress_color(
                    mapped.width,
                    mapped.height,
                    &mapped.data,
                )?)
            }
            Channel::Depth if negotiated.lossless_depth && mapped.element == DataType::Float32 => {
                Some(compress::compress_depth(&mapped.data)?)
            }
            _ => None,
        };

        match compressed {
            Some(data) => {
                debug!(
                    "{} compressed: raw={}, compressed={}",
                    channel.name(),
                    mapped.data.len(),
                    data.len()
                );
                body.write_u32(data.len() as u32);
                body.write_bytes(&data);
            }
            None => body.write_bytes(&mapped.data),
        }
        self.post(channel.message(), body);
        Ok(())
    }
}
