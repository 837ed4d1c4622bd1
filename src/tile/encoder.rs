//! Tile encoder.
//!
//! Turns fetched tile bytes into the payload stored in the cache, and stored
//! payloads back into displayable bytes.
//!
//! # Design Decisions
//!
//! - **Always decode/encode**: fetched tiles are decoded and re-encoded in the
//!   configured cache format, so every stored payload has a known format
//!   regardless of what the tile server sent.
//!
//! - **Data URLs**: payloads are `data:<mime>;base64,<bytes>` strings. A
//!   cached tile can be handed to anything that displays a URL without
//!   another conversion.
//!
//! - **Fallible**: a tile that cannot be decoded (truncated body, HTML error
//!   page, unsupported codec) is an [`EncodeError`]. The caller decides what
//!   that means; the controller still serves the fetched bytes.

use std::fmt;
use std::io::Cursor;
use std::str::FromStr;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat, ImageReader};

use crate::error::EncodeError;

/// Default JPEG quality (1-100) when caching as `image/jpeg`.
pub const DEFAULT_JPEG_QUALITY: u8 = 80;

/// A 1x1 transparent GIF, served when a tile is neither cached nor fetchable.
pub const EMPTY_IMAGE_DATA_URL: &str =
    "data:image/gif;base64,R0lGODlhAQABAAD/ACwAAAAAAQABAAACADs=";

// =============================================================================
// Tile Format
// =============================================================================

/// Image format used for stored tiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TileFormat {
    #[default]
    Png,
    Jpeg,
}

impl TileFormat {
    /// MIME type, as written into data URLs.
    pub fn mime_type(self) -> &'static str {
        match self {
            TileFormat::Png => "image/png",
            TileFormat::Jpeg => "image/jpeg",
        }
    }

    fn image_format(self) -> ImageFormat {
        match self {
            TileFormat::Png => ImageFormat::Png,
            TileFormat::Jpeg => ImageFormat::Jpeg,
        }
    }
}

impl fmt::Display for TileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mime_type())
    }
}

impl FromStr for TileFormat {
    type Err = EncodeError;

    /// Accepts MIME types (`image/png`) and bare names (`png`, `jpg`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        let name = lower.strip_prefix("image/").unwrap_or(&lower);
        match name {
            "png" => Ok(TileFormat::Png),
            "jpeg" | "jpg" => Ok(TileFormat::Jpeg),
            _ => Err(EncodeError::UnsupportedFormat(s.to_string())),
        }
    }
}

// =============================================================================
// Encoder Trait
// =============================================================================

/// Converts between fetched tile bytes and stored payloads.
pub trait TileEncoder: Send + Sync {
    /// Encode fetched tile bytes into a storable payload in `format`.
    fn encode(&self, source: &[u8], format: TileFormat) -> Result<String, EncodeError>;

    /// Turn a stored payload back into image bytes.
    fn decode(&self, encoded: &str) -> Result<Bytes, EncodeError>;
}

// =============================================================================
// Data URL Encoder
// =============================================================================

/// [`TileEncoder`] producing base64 data URLs.
///
/// # Example
///
/// ```ignore
/// use offline_tiles::tile::{DataUrlEncoder, TileEncoder, TileFormat};
///
/// let encoder = DataUrlEncoder::new();
/// let fetched: Bytes = /* tile body from the network */;
///
/// let payload = encoder.encode(&fetched, TileFormat::Png)?;
/// assert!(payload.starts_with("data:image/png;base64,"));
/// ```
#[derive(Debug, Clone)]
pub struct DataUrlEncoder {
    jpeg_quality: u8,
}

impl DataUrlEncoder {
    /// Create an encoder with the default JPEG quality.
    pub fn new() -> Self {
        Self {
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }

    /// Create an encoder with a custom JPEG quality (clamped to 1-100).
    pub fn with_jpeg_quality(quality: u8) -> Self {
        Self {
            jpeg_quality: quality.clamp(1, 100),
        }
    }

    pub fn jpeg_quality(&self) -> u8 {
        self.jpeg_quality
    }

    fn decode_source(source: &[u8]) -> Result<DynamicImage, EncodeError> {
        let reader = ImageReader::new(Cursor::new(source))
            .with_guessed_format()
            .map_err(|e| EncodeError::Decode {
                message: e.to_string(),
            })?;

        reader.decode().map_err(|e| EncodeError::Decode {
            message: e.to_string(),
        })
    }

    fn encode_image(&self, img: &DynamicImage, format: TileFormat) -> Result<Vec<u8>, EncodeError> {
        let mut output = Vec::new();
        let to_error = |e: image::ImageError| EncodeError::Encode {
            format: format.mime_type(),
            message: e.to_string(),
        };

        match format {
            TileFormat::Png => img
                .write_to(&mut Cursor::new(&mut output), format.image_format())
                .map_err(to_error)?,
            TileFormat::Jpeg => {
                // JPEG has no alpha channel
                let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
                JpegEncoder::new_with_quality(&mut output, self.jpeg_quality)
                    .encode_image(&rgb)
                    .map_err(to_error)?
            }
        }

        Ok(output)
    }
}

impl Default for DataUrlEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl TileEncoder for DataUrlEncoder {
    fn encode(&self, source: &[u8], format: TileFormat) -> Result<String, EncodeError> {
        let img = Self::decode_source(source)?;
        let encoded = self.encode_image(&img, format)?;
        Ok(to_data_url(format.mime_type(), &encoded))
    }

    fn decode(&self, encoded: &str) -> Result<Bytes, EncodeError> {
        from_data_url(encoded)
    }
}

// =============================================================================
// Utility Functions
// =============================================================================

/// Build a base64 data URL.
pub fn to_data_url(mime_type: &str, data: &[u8]) -> String {
    format!("data:{};base64,{}", mime_type, STANDARD.encode(data))
}

/// Extract the bytes from a base64 data URL.
pub fn from_data_url(url: &str) -> Result<Bytes, EncodeError> {
    let rest = url
        .strip_prefix("data:")
        .ok_or_else(|| EncodeError::MalformedDataUrl("missing 'data:' scheme".to_string()))?;

    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| EncodeError::MalformedDataUrl("missing ',' separator".to_string()))?;

    if !header.ends_with(";base64") {
        return Err(EncodeError::MalformedDataUrl(format!(
            "unsupported encoding in header '{}'",
            header
        )));
    }

    STANDARD
        .decode(payload)
        .map(Bytes::from)
        .map_err(|e| EncodeError::MalformedDataUrl(e.to_string()))
}

// =============================================================================
// Tests
// =============================================================================
