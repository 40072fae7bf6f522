//! Optional frame-channel compression codecs.
//!
//! The colour channel uses a lossy RGBA image codec (JPEG, quality 80) and
//! the depth channel a lossless byte codec (Snappy). Both sit behind cargo
//! features; [`local_features`] reports what this build carries so the
//! session can intersect it with the peer's advertised features.
//!
//! A compressed payload replaces the raw one entirely — the peer decides
//! how to parse each channel from the negotiated features alone, so a
//! failed encode cannot fall back to raw bytes and is fatal instead.

use thiserror::Error;

use crate::protocol::CompressionFeatures;

/// Fixed encoder quality for the lossy colour codec.
pub const COLOR_QUALITY: u8 = 80;

/// Errors raised by the channel codecs.
#[derive(Debug, Error)]
pub enum CompressError {
    /// Image dimensions exceed what the lossy codec can address.
    #[error("frame of {width}x{height} pixels exceeds the colour codec limit")]
    OversizedImage { width: u32, height: u32 },

    /// A codec was selected that this build does not carry.
    ///
    /// Negotiation only enables codecs reported by [`local_features`], so
    /// reaching this is a feature-negotiation bug, not a peer error.
    #[error("{codec} codec not compiled into this build")]
    CodecUnavailable { codec: &'static str },

    /// The lossy colour codec reported a failure.
    #[cfg(feature = "jpeg")]
    #[error("colour compression failed: {0}")]
    Color(#[from] jpeg_encoder::EncodingError),

    /// The lossless byte codec reported a failure.
    #[cfg(feature = "snappy")]
    #[error("depth compression failed: {0}")]
    Depth(#[from] snap::Error),
}

/// Compression features compiled into this build.
#[must_use]
pub fn local_features() -> CompressionFeatures {
    CompressionFeatures {
        lossy_color: cfg!(feature = "jpeg"),
        lossless_depth: cfg!(feature = "snappy"),
    }
}

/// Lossy-compress an 8-bit RGBA colour channel.
///
/// # Errors
///
/// Returns an error when the dimensions exceed the codec's addressable
/// range or the encoder fails.
#[cfg(feature = "jpeg")]
pub fn compress_color(width: u32, height: u32, rgba: &[u8]) -> Result<Vec<u8>, CompressError> {
    let (Ok(w), Ok(h)) = (u16::try_from(width), u16::try_from(height)) else {
        return Err(CompressError::OversizedImage { width, height });
    };
    let mut out = Vec::new();
    let encoder = jpeg_encoder::Encoder::new(&mut out, COLOR_QUALITY);
    encoder.encode(rgba, w, h, jpeg_encoder::ColorType::Rgba)?;
    Ok(out)
}

#[cfg(not(feature = "jpeg"))]
pub fn compress_color(width: u32, height: u32, _rgba: &[u8]) -> Result<Vec<u8>, CompressError> {
    let _ = (width, height);
    Err(CompressError::CodecUnavailable { codec: "colour" })
}

/// Losslessly compress a depth channel's raw bytes.
///
/// # Errors
///
/// Returns an error when the encoder fails.
#[cfg(feature = "snappy")]
pub fn compress_depth(data: &[u8]) -> Result<Vec<u8>, CompressError> {
    Ok(snap::raw::Encoder::new().compress_vec(data)?)
}

#[cfg(not(feature = "snappy"))]
pub fn compress_depth(_data: &[u8]) -> Result<Vec<u8>, CompressError> {
    Err(CompressError::CodecUnavailable { codec: "depth" })
}
