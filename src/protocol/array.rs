//! Array descriptors retained to service later map operations.

use super::DataType;

/// Rank, element type and per-axis counts of an array object.
///
/// Stored for every array-typed server object so a later `MapArray` can
/// stream the correct number of bytes back. Absent axes carry a zero count.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ArrayInfo {
    /// One of the three array rank tags.
    pub kind: DataType,
    /// Element type of the array contents.
    pub element: DataType,
    pub items1: u64,
    pub items2: u64,
    pub items3: u64,
}

impl ArrayInfo {
    /// Total payload size of the array in bytes.
    #[must_use]
    pub fn size_in_bytes(&self) -> u64 {
        self.element.element_size() as u64
            * self.items1
            * self.items2.max(1)
            * self.items3.max(1)
    }

    /// Number of elements across all axes.
    #[must_use]
    pub fn element_count(&self) -> u64 {
        self.items1 * self.items2.max(1) * self.items3.max(1)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(DataType::Array1D, DataType::Float32, 8, 0, 0, 32)]
    #[case(DataType::Array2D, DataType::UFixed8RgbaSrgb, 640, 480, 0, 640 * 480 * 4)]
    #[case(DataType::Array3D, DataType::UInt8, 4, 4, 4, 64)]
    #[case(DataType::Array1D, DataType::Surface, 2, 0, 0, 16)]
    fn size_treats_absent_axes_as_one(
        #[case] kind: DataType,
        #[case] element: DataType,
        #[case] items1: u64,
        #[case] items2: u64,
        #[case] items3: u64,
        #[case] expected: u64,
    ) {
        let info = ArrayInfo {
            kind,
            element,
            items1,
            items2,
            items3,
        };
        assert_eq!(info.size_in_bytes(), expected);
    }

    #[rstest]
    fn default_info_is_zero_sized() {
        assert_eq!(ArrayInfo::default().size_in_bytes(), 0);
    }
}
