//! Container assembly.
//!
//! Writes `[FileHeader] [SectionMap] [Body] [Classes] [Keys]` into any
//! seekable sink. The section map is first written as zeros and patched once
//! the trailing sections are out; section offsets are relative to the position
//! the container starts at, so containers can be embedded in larger streams.

use crate::codec::Encode;
use crate::compression::compressor_for;
use crate::encoder::Encoder;
use crate::error::Result;
use crate::format::{FILE_HEADER_SIZE, FileHeader, HeaderFlags, SECTION_MAP_SIZE, Section, SectionMap};
use crate::io::ByteWriter;
use crate::options::GraphcodeOptions;
use std::io::{Seek, SeekFrom, Write};
use tracing::debug;

/// Encodes `value` and writes the complete container. Returns its length.
pub(crate) fn write_container<T, W>(sink: &mut W, value: &T, options: &GraphcodeOptions) -> Result<u64>
where
    T: Encode + ?Sized,
    W: Write + Seek,
{
    // Fail before encoding if the body cannot be compressed as asked.
    let compressor = compressor_for(options.compression)?;

    let mut encoder = Encoder::new(options);
    encoder.encode_root(value)?;
    let graph = encoder.finish();

    let start = sink.stream_position()?;
    let flags = HeaderFlags::new(options.compression, options.track_identity, options.type_tags);
    sink.write_all(&FileHeader::new(options.user_version, flags).to_bytes())?;
    sink.write_all(&[0u8; SECTION_MAP_SIZE])?;

    let body = compressor.compress(&graph.body)?;
    let mut cursor = (FILE_HEADER_SIZE + SECTION_MAP_SIZE) as u64;
    let mut section = |len: usize| {
        let s = Section {
            offset: cursor,
            length: len as u64,
        };
        cursor += len as u64;
        s
    };

    let mut classes = ByteWriter::new();
    graph.classes.write(&mut classes);
    let mut keys = ByteWriter::new();
    graph.keys.write(&mut keys);

    let map = SectionMap {
        body: section(body.len()),
        classes: section(classes.len()),
        keys: section(keys.len()),
    };
    sink.write_all(&body)?;
    sink.write_all(classes.as_slice())?;
    sink.write_all(keys.as_slice())?;
    let end = sink.stream_position()?;

    // The only seek-back in the format.
    sink.seek(SeekFrom::Start(start + FILE_HEADER_SIZE as u64))?;
    sink.write_all(&map.to_bytes())?;
    sink.seek(SeekFrom::Start(end))?;
    sink.flush()?;

    debug!(
        records = graph.records,
        objects = graph.objects,
        classes = graph.classes.len(),
        keys = graph.keys.len(),
        body = graph.body.len(),
        stored = body.len(),
        compressor = compressor.name(),
        total = end - start,
        "container written"
    );
    Ok(end - start)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::PREAMBLE_SIZE;
    use std::io::Cursor;

    #[test]
    fn sections_are_patched_relative_to_the_container_start() {
        let mut sink = Cursor::new(Vec::new());
        sink.write_all(b"prefix").unwrap();
        let len = write_container(&mut sink, &String::from("hi"), &GraphcodeOptions::default())
            .unwrap();
        let bytes = sink.into_inner();
        assert_eq!(bytes.len() as u64, len + 6);

        let container = &bytes[6..];
        let header = FileHeader::from_bytes(container).unwrap();
        assert!(header.flags.has_identity());
        let map = SectionMap::from_bytes(&container[FILE_HEADER_SIZE..]).unwrap();
        assert_eq!(map.body.offset, PREAMBLE_SIZE as u64);
        assert_eq!(map.classes.offset, map.body.offset + map.body.length);
        assert_eq!(map.keys.offset + map.keys.length, len);
    }
}
