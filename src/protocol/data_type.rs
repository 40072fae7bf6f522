//! Closed data-type tag enum shared with the client.

use crate::wire::{Reader, WireError, Writer};

/// Type tags for objects, parameters and array elements.
///
/// Object tags identify backend-managed resources; their wire values are
/// 64-bit handles. POD tags describe inline parameter and array payloads.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum DataType {
    #[default]
    Unknown = 0,

    Device = 100,

    Array1D = 110,
    Array2D = 111,
    Array3D = 112,

    Light = 120,
    Camera = 121,
    Geometry = 122,
    SpatialField = 123,
    Surface = 124,
    Volume = 125,
    Material = 126,
    Sampler = 127,
    Group = 128,
    Instance = 129,
    World = 130,
    Frame = 131,
    Renderer = 132,

    String = 200,
    StringList = 201,
    DataTypeList = 202,
    ParameterList = 203,

    UInt8 = 300,
    Int32 = 301,
    UInt32 = 302,
    Int64 = 303,
    UInt64 = 304,
    Float32 = 305,
    Float64 = 306,
    Float32Vec2 = 310,
    Float32Vec3 = 311,
    Float32Vec4 = 312,
    UInt32Vec2 = 315,
    UFixed8RgbaSrgb = 320,
}

impl DataType {
    /// Map a raw tag to a data type, folding unknown values to
    /// [`DataType::Unknown`].
    #[must_use]
    pub fn from_u32(value: u32) -> Self {
        match value {
            100 => Self::Device,
            110 => Self::Array1D,
            111 => Self::Array2D,
            112 => Self::Array3D,
            120 => Self::Light,
            121 => Self::Camera,
            122 => Self::Geometry,
            123 => Self::SpatialField,
            124 => Self::Surface,
            125 => Self::Volume,
            126 => Self::Material,
            127 => Self::Sampler,
            128 => Self::Group,
            129 => Self::Instance,
            130 => Self::World,
            131 => Self::Frame,
            132 => Self::Renderer,
            200 => Self::String,
            201 => Self::StringList,
            202 => Self::DataTypeList,
            203 => Self::ParameterList,
            300 => Self::UInt8,
            301 => Self::Int32,
            302 => Self::UInt32,
            303 => Self::Int64,
            304 => Self::UInt64,
            305 => Self::Float32,
            306 => Self::Float64,
            310 => Self::Float32Vec2,
            311 => Self::Float32Vec3,
            312 => Self::Float32Vec4,
            315 => Self::UInt32Vec2,
            320 => Self::UFixed8RgbaSrgb,
            _ => Self::Unknown,
        }
    }

    pub fn read(reader: &mut Reader<'_>) -> Result<Self, WireError> {
        reader.read_u32().map(Self::from_u32)
    }

    pub fn write(self, writer: &mut Writer) { writer.write_u32(self as u32); }

    /// Whether values of this type are backend object references.
    ///
    /// Object-typed parameter values and array elements travel as 64-bit
    /// handles and are remapped before reaching the backend.
    #[must_use]
    pub fn is_object(self) -> bool {
        matches!(
            self,
            Self::Device
                | Self::Array1D
                | Self::Array2D
                | Self::Array3D
                | Self::Light
                | Self::Camera
                | Self::Geometry
                | Self::SpatialField
                | Self::Surface
                | Self::Volume
                | Self::Material
                | Self::Sampler
                | Self::Group
                | Self::Instance
                | Self::World
                | Self::Frame
                | Self::Renderer
        )
    }

    /// Whether this tag names one of the three array ranks.
    #[must_use]
    pub fn is_array(self) -> bool {
        matches!(self, Self::Array1D | Self::Array2D | Self::Array3D)
    }

    /// Size in bytes of one inline value of this type.
    ///
    /// Object references are handle-width. Types with no inline
    /// representation (strings, lists, unknown) are zero-sized.
    #[must_use]
    pub fn element_size(self) -> usize {
        match self {
            Self::UInt8 => 1,
            Self::Int32 | Self::UInt32 | Self::Float32 | Self::UFixed8RgbaSrgb => 4,
            Self::Int64 | Self::UInt64 | Self::Float64 | Self::Float32Vec2 | Self::UInt32Vec2 => 8,
            Self::Float32Vec3 => 12,
            Self::Float32Vec4 => 16,
            kind if kind.is_object() => 8,
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    fn known_tags_round_trip() {
        for kind in [
            DataType::Device,
            DataType::Array1D,
            DataType::Surface,
            DataType::Renderer,
            DataType::StringList,
            DataType::Float32,
            DataType::UFixed8RgbaSrgb,
        ] {
            assert_eq!(DataType::from_u32(kind as u32), kind);
        }
    }

    #[rstest]
    fn unknown_tags_fold_to_unknown() {
        assert_eq!(DataType::from_u32(7), DataType::Unknown);
        assert_eq!(DataType::from_u32(u32::MAX), DataType::Unknown);
    }

    #[rstest]
    #[case(DataType::UInt8, 1)]
    #[case(DataType::Float32, 4)]
    #[case(DataType::UFixed8RgbaSrgb, 4)]
    #[case(DataType::Float32Vec3, 12)]
    #[case(DataType::Surface, 8)]
    #[case(DataType::String, 0)]
    fn element_sizes(#[case] kind: DataType, #[case] size: usize) {
        assert_eq!(kind.element_size(), size);
    }

    #[rstest]
    fn object_tags_are_objects() {
        assert!(DataType::Camera.is_object());
        assert!(DataType::Array2D.is_object());
        assert!(!DataType::Float32.is_object());
        assert!(!DataType::Unknown.is_object());
    }
}
