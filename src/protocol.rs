//! Shared protocol vocabulary: handles, message tags, capability flags.
//!
//! The message and data-type numberings are closed enums shared with the
//! client; the wire format is not versioned, so both peers must be built
//! from the same definitions.

use std::fmt;

use crate::wire::{Reader, WireError, Writer};

mod array;
mod data_type;

pub use array::ArrayInfo;
pub use data_type::DataType;

/// A wire handle.
///
/// Device handles are server-assigned, monotonically increasing from 1.
/// Object handles are client-assigned per device and used as direct table
/// indices.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Handle(pub u64);

impl Handle {
    pub fn read(reader: &mut Reader<'_>) -> Result<Self, WireError> {
        reader.read_u64().map(Self)
    }

    pub fn write(self, writer: &mut Writer) { writer.write_u64(self.0); }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { self.0.fmt(f) }
}

/// Mask controlling whether a readiness query blocks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WaitMask(pub u32);

impl WaitMask {
    pub const NO_WAIT: Self = Self(0);
    pub const WAIT: Self = Self(1);

    #[must_use]
    pub fn is_wait(self) -> bool { self.0 & Self::WAIT.0 != 0 }

    pub fn read(reader: &mut Reader<'_>) -> Result<Self, WireError> {
        reader.read_u32().map(Self)
    }
}

/// Compression capability flags exchanged once at device creation.
///
/// Encoded on the wire as two `u8` flags, lossy colour first. The session
/// stores the peer's advertised features and intersects them with its own
/// before every frame delivery.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CompressionFeatures {
    /// Lossy image codec for 8-bit sRGB RGBA colour channels.
    pub lossy_color: bool,
    /// Lossless byte codec for 32-bit float depth channels.
    pub lossless_depth: bool,
}

impl CompressionFeatures {
    #[must_use]
    pub fn none() -> Self { Self::default() }

    /// Features usable on the wire: supported by both peers.
    #[must_use]
    pub fn intersect(self, other: Self) -> Self {
        Self {
            lossy_color: self.lossy_color && other.lossy_color,
            lossless_depth: self.lossless_depth && other.lossless_depth,
        }
    }

    pub fn read(reader: &mut Reader<'_>) -> Result<Self, WireError> {
        let lossy_color = reader.read_u8()? != 0;
        let lossless_depth = reader.read_u8()? != 0;
        Ok(Self {
            lossy_color,
            lossless_depth,
        })
    }

    pub fn write(self, writer: &mut Writer) {
        writer.write_u8(u8::from(self.lossy_color));
        writer.write_u8(u8::from(self.lossless_depth));
    }
}

/// One entry of a parameter-list payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParameterSpec {
    pub name: String,
    pub kind: DataType,
    pub description: String,
}

/// Message type tags carried in the transport frame header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum MessageType {
    NewDevice = 1,
    DeviceHandle = 2,
    NewObject = 3,
    NewArray = 4,
    SetParam = 5,
    UnsetParam = 6,
    UnsetAllParams = 7,
    CommitParams = 8,
    Release = 9,
    Retain = 10,
    MapArray = 11,
    ArrayMapped = 12,
    UnmapArray = 13,
    ArrayUnmapped = 14,
    RenderFrame = 15,
    ChannelColor = 16,
    ChannelDepth = 17,
    FrameReady = 18,
    FrameIsReady = 19,
    GetProperty = 20,
    Property = 21,
    GetObjectSubtypes = 22,
    ObjectSubtypes = 23,
    GetObjectInfo = 24,
    ObjectInfo = 25,
    GetParameterInfo = 26,
    ParameterInfo = 27,
}

impl MessageType {
    /// Map a raw frame tag to a known message type.
    ///
    /// Unknown tags return `None`; the dispatcher logs and drops them
    /// without ending the session.
    #[must_use]
    pub fn from_u32(value: u32) -> Option<Self> {
        Some(match value {
            1 => Self::NewDevice,
            2 => Self::DeviceHandle,
            3 => Self::NewObject,
            4 => Self::NewArray,
            5 => Self::SetParam,
            6 => Self::UnsetParam,
            7 => Self::UnsetAllParams,
            8 => Self::CommitParams,
            9 => Self::Release,
            10 => Self::Retain,
            11 => Self::MapArray,
            12 => Self::ArrayMapped,
            13 => Self::UnmapArray,
            14 => Self::ArrayUnmapped,
            15 => Self::RenderFrame,
            16 => Self::ChannelColor,
            17 => Self::ChannelDepth,
            18 => Self::FrameReady,
            19 => Self::FrameIsReady,
            20 => Self::GetProperty,
            21 => Self::Property,
            22 => Self::GetObjectSubtypes,
            23 => Self::ObjectSubtypes,
            24 => Self::GetObjectInfo,
            25 => Self::ObjectInfo,
            26 => Self::GetParameterInfo,
            27 => Self::ParameterInfo,
            _ => return None,
        })
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    fn message_tags_round_trip() {
        for tag in 1..=27u32 {
            let kind = MessageType::from_u32(tag).expect("known tag");
            assert_eq!(kind as u32, tag);
        }
        assert_eq!(MessageType::from_u32(0), None);
        assert_eq!(MessageType::from_u32(9999), None);
    }

    #[rstest]
    fn features_intersect_is_logical_and() {
        let server = CompressionFeatures {
            lossy_color: true,
            lossless_depth: false,
        };
        let client = CompressionFeatures {
            lossy_color: true,
            lossless_depth: true,
        };
        assert_eq!(
            server.intersect(client),
            CompressionFeatures {
                lossy_color: true,
                lossless_depth: false
            }
        );
    }

    #[rstest]
    fn features_wire_round_trip() {
        let features = CompressionFeatures {
            lossy_color: true,
            lossless_depth: true,
        };
        let mut w = Writer::new();
        features.write(&mut w);
        let body = w.freeze();
        assert_eq!(body.as_ref(), &[1, 1]);

        let mut r = Reader::new(&body);
        assert_eq!(CompressionFeatures::read(&mut r).unwrap(), features);
    }
}
