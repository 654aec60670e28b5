//! High-level entry points.
//!
//! [`Graphcode`] wraps [`GraphcodeOptions`] with the default configuration for
//! one-line encode, decode, save and load calls.

use crate::codec::{Decode, Encode};
use crate::error::Result;
use crate::options::GraphcodeOptions;
use std::io::{Seek, Write};
use std::path::Path;

/// The main entry point.
///
/// Every method uses [`GraphcodeOptions::default`]; start from
/// [`Graphcode::builder`] to change the configuration.
#[derive(Debug)]
pub struct Graphcode;

impl Graphcode {
    /// Returns the default options, to be adjusted and then used to encode or decode.
    ///
    /// ```rust
    /// use graphcode::Graphcode;
    ///
    /// let bytes = Graphcode::builder().type_tags(false).encode("hello")?;
    /// assert_eq!(Graphcode::decode::<String>(&bytes)?, "hello");
    /// # Ok::<(), graphcode::GraphcodeError>(())
    /// ```
    pub fn builder() -> GraphcodeOptions {
        GraphcodeOptions::default()
    }

    /// Encodes a value graph into an in-memory container.
    pub fn encode<T: Encode + ?Sized>(value: &T) -> Result<Vec<u8>> {
        GraphcodeOptions::default().encode(value)
    }

    /// Decodes a container produced by [`Graphcode::encode`].
    pub fn decode<T: Decode>(bytes: &[u8]) -> Result<T> {
        GraphcodeOptions::default().decode(bytes)
    }

    /// Encodes a value graph into `path`.
    ///
    /// # Arguments
    /// * `path`: Destination file path.
    /// * `value`: The root of the graph.
    pub fn save<T, P>(path: P, value: &T) -> Result<()>
    where
        T: Encode + ?Sized,
        P: AsRef<Path>,
    {
        GraphcodeOptions::default().save(path, value)
    }

    /// Memory-maps `path` and decodes its root value.
    pub fn load<T: Decode, P: AsRef<Path>>(path: P) -> Result<T> {
        GraphcodeOptions::default().load(path)
    }

    /// Encodes a value graph into a seekable sink at its current position.
    pub fn write<T, W>(sink: &mut W, value: &T) -> Result<u64>
    where
        T: Encode + ?Sized,
        W: Write + Seek,
    {
        GraphcodeOptions::default().write(sink, value)
    }
}
