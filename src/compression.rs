//! Pluggable body compression.
//!
//! Only the body section is ever compressed; the class and key tables stay
//! raw so tools can read them without decompressing anything. Header flag
//! bit 0 says whether the body went through [`Lz4Compressor`].

use crate::error::{GraphcodeError, Result};
use std::borrow::Cow;

/// Interface for compression algorithms.
pub trait Compressor: Send + Sync + std::fmt::Debug {
    /// Short name for logs and error messages.
    fn name(&self) -> &'static str;

    /// Compresses the data.
    ///
    /// Returns a `Cow<[u8]>` which borrows the input when no compression is
    /// performed.
    fn compress<'a>(&self, data: &'a [u8]) -> Result<Cow<'a, [u8]>>;

    /// Decompresses the data.
    fn decompress<'a>(&self, data: &'a [u8]) -> Result<Cow<'a, [u8]>>;
}

/// Pass-through compressor, used when the header's compression bit is clear.
#[derive(Debug, Clone, Copy)]
pub struct NoCompression;

impl Compressor for NoCompression {
    fn name(&self) -> &'static str {
        "none"
    }

    fn compress<'a>(&self, data: &'a [u8]) -> Result<Cow<'a, [u8]>> {
        Ok(Cow::Borrowed(data))
    }

    fn decompress<'a>(&self, data: &'a [u8]) -> Result<Cow<'a, [u8]>> {
        // Zero-copy: borrows straight from the buffer or the mmap.
        Ok(Cow::Borrowed(data))
    }
}

#[cfg(feature = "lz4_flex")]
/// LZ4 block compression with the uncompressed size prepended.
///
/// Available when the `lz4_flex` feature is enabled.
#[derive(Debug, Clone, Copy)]
pub struct Lz4Compressor;

#[cfg(feature = "lz4_flex")]
impl Compressor for Lz4Compressor {
    fn name(&self) -> &'static str {
        "lz4"
    }

    fn compress<'a>(&self, data: &'a [u8]) -> Result<Cow<'a, [u8]>> {
        Ok(Cow::Owned(lz4_flex::compress_prepend_size(data)))
    }

    fn decompress<'a>(&self, data: &'a [u8]) -> Result<Cow<'a, [u8]>> {
        lz4_flex::decompress_size_prepended(data)
            .map(Cow::Owned)
            .map_err(|e| GraphcodeError::Compression(e.to_string()))
    }
}

/// Picks the compressor for the header's compression bit.
pub fn compressor_for(compressed: bool) -> Result<&'static dyn Compressor> {
    if !compressed {
        return Ok(&NoCompression);
    }
    #[cfg(feature = "lz4_flex")]
    {
        Ok(&Lz4Compressor)
    }
    #[cfg(not(feature = "lz4_flex"))]
    {
        Err(GraphcodeError::Compression(
            "LZ4 body compression requires the `lz4_flex` feature".to_owned(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passthrough_borrows() {
        let data = [1u8, 2, 3];
        let out = NoCompression.compress(&data).unwrap();
        assert!(matches!(out, Cow::Borrowed(_)));
        assert_eq!(compressor_for(false).unwrap().name(), "none");
    }

    #[cfg(feature = "lz4_flex")]
    #[test]
    fn lz4_round_trip() {
        let data = vec![7u8; 4096];
        let packed = Lz4Compressor.compress(&data).unwrap();
        assert!(packed.len() < data.len());
        assert_eq!(&*Lz4Compressor.decompress(&packed).unwrap(), &data[..]);
        assert!(Lz4Compressor.decompress(&[0xff, 0xff, 0xff, 0x7f, 1]).is_err());
    }

    #[cfg(not(feature = "lz4_flex"))]
    #[test]
    fn lz4_requires_the_feature() {
        assert!(matches!(
            compressor_for(true),
            Err(GraphcodeError::Compression(_))
        ));
    }
}
