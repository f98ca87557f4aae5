// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Iterator state shared by both format variants, and the detecting factory.

use std::io::SeekFrom;

use byteorder::{BigEndian, ByteOrder as _, LittleEndian};
use log::debug;

use crate::chunk::{Chunk, ChunkHeader, ChunkReader, Payload};
use crate::fourcc::FourCC;
use crate::iff85::Iff85Iterator;
use crate::riff::RiffIterator;
use crate::source::{ByteOrder, ByteSource};
use crate::{warning, Error, ParseOptions, Result};

/// One open container on the traversal stack.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Frame {
    pub(crate) id: FourCC,
    pub(crate) type_tag: Option<FourCC>,
    /// First byte past the last child's padding.
    pub(crate) end_offset: u64,
    pub(crate) depth: u32,
    /// For LIST frames: set once a PROP child has been traversed.
    pub(crate) has_props: bool,
}

/// State common to the IFF-85 and RIFF iterators: the cursor into the source,
/// the container stack, the current descriptor and the payload window.
pub(crate) struct IterCore<'s> {
    pub(crate) src: &'s mut (dyn ByteSource + 's),
    pub(crate) opts: ParseOptions,
    pub(crate) frames: Vec<Frame>,
    pub(crate) current: Chunk,
    pub(crate) payload: Option<Payload>,
    pub(crate) ended: bool,
}

impl<'s> IterCore<'s> {
    pub(crate) fn new(src: &'s mut (dyn ByteSource + 's), opts: ParseOptions) -> Self {
        IterCore {
            src,
            opts,
            frames: Vec::new(),
            current: Chunk::default(),
            payload: None,
            ended: false,
        }
    }

    pub(crate) fn tell(&mut self) -> Result<u64> {
        self.src.tell()
    }

    pub(crate) fn len(&mut self) -> Result<u64> {
        self.src.len()
    }

    pub(crate) fn warn(&self, offset: u64, category: &str, message: &str) {
        self.opts.emit_warning(offset, category, message);
    }

    pub(crate) fn child_depth(&self) -> u32 {
        self.frames.last().map_or(0, |f| f.depth + 1)
    }

    /// Closes every container whose end offset has been reached. Popping a
    /// PROP marks the LIST frame directly beneath it.
    pub(crate) fn pop_exited_frames(&mut self) -> Result<()> {
        let pos = self.tell()?;
        while self.frames.last().is_some_and(|top| pos >= top.end_offset) {
            if let Some(popped) = self.frames.pop() {
                if popped.id == FourCC::PROP {
                    if let Some(parent) = self.frames.last_mut() {
                        if parent.id == FourCC::LIST {
                            parent.has_props = true;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Reads the next 8-byte chunk header, or reports a clean end.
    ///
    /// A short read with containers still open means the source ended before
    /// a container did. Strict parses fail; lenient parses emit a `truncated`
    /// warning, close the innermost container and retry, ending cleanly once
    /// the stack empties.
    pub(crate) fn try_read_header(
        &mut self,
        order: ByteOrder,
    ) -> Result<Option<(u64, FourCC, u32)>> {
        loop {
            let start = self.tell()?;
            let mut buf = [0u8; 8];
            match self.src.read_exact_buf(&mut buf) {
                Ok(()) => {
                    let id = FourCC::new([buf[0], buf[1], buf[2], buf[3]]);
                    let size = match order {
                        ByteOrder::Little => LittleEndian::read_u32(&buf[4..8]),
                        ByteOrder::Big => BigEndian::read_u32(&buf[4..8]),
                    };
                    return Ok(Some((start, id, size)));
                }
                Err(_) => match self.frames.last().copied() {
                    None => return Ok(None),
                    Some(top) if self.opts.strict => {
                        return Err(Error::Parse(format!(
                            "container '{}' truncated: content declared up to offset {}, \
                             but the source ended at offset {start}",
                            top.id, top.end_offset
                        )));
                    }
                    Some(top) => {
                        self.warn(
                            start,
                            warning::TRUNCATED,
                            &format!(
                                "container '{}' truncated at offset {start}, closing it",
                                top.id
                            ),
                        );
                        self.frames.pop();
                    }
                },
            }
        }
    }

    /// Enforces `max_chunk_size`: strict parses fail, lenient parses clamp.
    pub(crate) fn enforce_size_limit(
        &mut self,
        id: FourCC,
        offset: u64,
        size: u64,
    ) -> Result<u64> {
        if size <= self.opts.max_chunk_size {
            return Ok(size);
        }
        if self.opts.strict {
            return Err(Error::Parse(format!(
                "chunk '{id}' at offset {offset} has size {size} bytes, which exceeds \
                 the maximum allowed size of {} bytes",
                self.opts.max_chunk_size
            )));
        }
        self.warn(
            offset,
            warning::SIZE_LIMIT,
            &format!(
                "chunk '{id}' size {size} exceeds maximum {}, clamping to the limit",
                self.opts.max_chunk_size
            ),
        );
        Ok(self.opts.max_chunk_size)
    }

    /// Enforces `max_depth` for a container about to be entered. `Ok(false)`
    /// means the container must be skipped instead (lenient mode).
    pub(crate) fn check_depth(&mut self, id: FourCC, offset: u64, depth: u32) -> Result<bool> {
        if depth < self.opts.max_depth {
            return Ok(true);
        }
        if self.opts.strict {
            return Err(Error::Parse(format!(
                "container '{id}' at offset {offset} would exceed the maximum nesting \
                 depth of {} (depth {depth})",
                self.opts.max_depth
            )));
        }
        self.warn(
            offset,
            warning::DEPTH_LIMIT,
            &format!(
                "container '{id}' exceeds the maximum nesting depth of {}, skipping it",
                self.opts.max_depth
            ),
        );
        Ok(false)
    }

    /// Validates a container's end offset against the source length. Strict
    /// parses fail on containers that outrun the source; lenient parses warn
    /// and clamp.
    pub(crate) fn clamp_container_end(
        &mut self,
        id: FourCC,
        offset: u64,
        end: u64,
    ) -> Result<u64> {
        let len = self.len()?;
        if end <= len {
            return Ok(end);
        }
        if self.opts.strict {
            return Err(Error::Parse(format!(
                "container '{id}' at offset {offset} declares content up to offset {end}, \
                 but the source is only {len} bytes"
            )));
        }
        self.warn(
            offset,
            warning::TRUNCATED,
            &format!("container '{id}' declares content up to offset {end}, clamping to {len}"),
        );
        Ok(len)
    }

    /// Makes a container the current chunk and opens its frame. The caller
    /// has already read the type tag, so the cursor sits on the first child.
    pub(crate) fn begin_container(
        &mut self,
        id: FourCC,
        size: u64,
        start: u64,
        depth: u32,
        type_tag: Option<FourCC>,
        content_end: u64,
    ) -> Result<bool> {
        let end = self.clamp_container_end(id, start, content_end)?;
        self.current.header =
            ChunkHeader { id, size, file_offset: start, is_container: true, type_tag };
        self.current.depth = depth;
        self.current.padded_size = size.saturating_add(size & 1);
        self.frames.push(Frame { id, type_tag, end_offset: end, depth, has_props: false });
        self.refresh_context();
        self.payload = None;
        debug!("container '{id}' ({size} bytes) at offset {start}, depth {depth}");
        Ok(true)
    }

    /// Makes a data chunk the current chunk and records its payload window.
    pub(crate) fn begin_data_chunk(
        &mut self,
        id: FourCC,
        size: u64,
        start: u64,
        depth: u32,
    ) -> Result<bool> {
        let data_start = self.tell()?;
        self.current.header =
            ChunkHeader { id, size, file_offset: start, is_container: false, type_tag: None };
        self.current.depth = depth;
        self.current.padded_size = size.saturating_add(size & 1);
        self.refresh_context();
        self.payload = Some(Payload { start: data_start, size, consumed: 0 });
        debug!("chunk '{id}' ({size} bytes) at offset {start}, depth {depth}");
        Ok(true)
    }

    /// Recomputes the descriptor context from the container stack.
    pub(crate) fn refresh_context(&mut self) {
        self.current.form_type = None;
        self.current.container = None;
        for f in self.frames.iter().rev() {
            if self.current.form_type.is_none() && f.id.is_form_family() {
                self.current.form_type = f.type_tag;
            }
            if self.current.container.is_none() && f.id.is_grouping() {
                self.current.container = Some(f.id);
            }
        }
        self.current.in_list_with_props =
            self.frames.iter().any(|f| f.id == FourCC::LIST && f.has_props);
        self.current.is_prop = self.current.header.id == FourCC::PROP;
    }

    /// Releases the payload window of the current chunk and positions the
    /// cursor past its padding. `Ok(false)` means the source ended instead.
    pub(crate) fn finalize_current(&mut self) -> Result<bool> {
        if self.payload.take().is_some() {
            let next = self
                .current
                .header
                .file_offset
                .checked_add(8)
                .and_then(|p| p.checked_add(self.current.padded_size))
                .ok_or_else(|| {
                    Error::Parse(format!(
                        "chunk '{}' at offset {} extends beyond the addressable range",
                        self.current.header.id, self.current.header.file_offset
                    ))
                })?;
            if self.src.seek(SeekFrom::Start(next)).is_err() {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Skips a container without entering it. `Ok(false)` means the source
    /// ended before the skip target.
    pub(crate) fn skip_container(&mut self, start: u64, size: u64) -> Result<bool> {
        let next = start
            .saturating_add(8)
            .saturating_add(size.saturating_add(size & 1));
        Ok(self.src.seek(SeekFrom::Start(next)).is_ok())
    }

    pub(crate) fn reader(&mut self) -> Option<ChunkReader<'_>> {
        let id = self.current.header.id;
        let src: &mut dyn ByteSource = &mut *self.src;
        self.payload.as_mut().map(move |p| ChunkReader::new(src, p, id))
    }
}

enum Inner<'s> {
    Iff85(Iff85Iterator<'s>),
    Riff(RiffIterator<'s>),
}

/// Streaming, depth-first chunk iterator over an IFF or RIFF family source.
///
/// Built by [`get_iterator`], which detects the format from the first four
/// bytes. The iterator starts positioned on the outermost chunk:
///
/// ```no_run
/// use std::fs::File;
/// use iff_parse::{get_iterator, Result};
///
/// # fn main() -> Result<()> {
/// let mut file = File::open("audio.wav")?;
/// let mut it = get_iterator(&mut file)?;
/// while it.has_next() {
///     let chunk = it.current();
///     println!("{} ({} bytes)", chunk.header.id, chunk.header.size);
///     it.advance()?;
/// }
/// # Ok(())
/// # }
/// ```
///
/// Construction peeks four bytes and rewinds, the only backward movement the
/// parser ever performs. After that, traversal is strictly forward: the
/// iterator owns the cursor, and every descriptor and reader it vends is
/// valid only until the next [`advance`](Self::advance).
pub struct ChunkIterator<'s> {
    inner: Inner<'s>,
}

impl<'s> std::fmt::Debug for ChunkIterator<'s> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkIterator").finish_non_exhaustive()
    }
}

impl<'s> ChunkIterator<'s> {
    fn core(&self) -> &IterCore<'s> {
        match &self.inner {
            Inner::Iff85(it) => it.core(),
            Inner::Riff(it) => it.core(),
        }
    }

    fn core_mut(&mut self) -> &mut IterCore<'s> {
        match &mut self.inner {
            Inner::Iff85(it) => it.core_mut(),
            Inner::Riff(it) => it.core_mut(),
        }
    }

    /// The chunk the iterator is positioned on. Meaningful while
    /// [`has_next`](Self::has_next) is true.
    pub fn current(&self) -> &Chunk {
        &self.core().current
    }

    /// A bounded reader over the current data chunk's payload, or `None` for
    /// containers. May be acquired repeatedly; the payload offset carries
    /// over between acquisitions.
    pub fn reader(&mut self) -> Option<ChunkReader<'_>> {
        self.core_mut().reader()
    }

    /// Moves to the next chunk in depth-first source order, finalizing the
    /// current payload (consumed or not) and closing exited containers. At
    /// the end of the outermost chunk the iterator enters its terminal ended
    /// state, where further calls are no-ops.
    pub fn advance(&mut self) -> Result<()> {
        match &mut self.inner {
            Inner::Iff85(it) => it.advance(),
            Inner::Riff(it) => it.advance(),
        }
    }

    pub fn has_next(&self) -> bool {
        !self.core().ended
    }

    pub fn at_end(&self) -> bool {
        self.core().ended
    }
}

/// Creates an iterator for the detected format with default options.
///
/// The first four bytes select the variant: FORM, LIST or CAT for IFF-85;
/// RIFF, RIFX, RF64 or BW64 for the RIFF family. Anything else is a parse
/// error naming the observed identifier.
pub fn get_iterator<'s>(source: &'s mut (dyn ByteSource + 's)) -> Result<ChunkIterator<'s>> {
    get_iterator_with_options(source, ParseOptions::default())
}

/// Creates an iterator for the detected format.
///
/// Peeks four bytes and seeks back to the starting offset before handing the
/// source to the format-specific iterator. Sources that cannot seek backward
/// must be wrapped so this one-time rewind succeeds.
pub fn get_iterator_with_options<'s>(
    source: &'s mut (dyn ByteSource + 's),
    options: ParseOptions,
) -> Result<ChunkIterator<'s>> {
    let start = source.tell()?;
    let mut magic = [0u8; 4];
    source
        .read_exact_buf(&mut magic)
        .map_err(|_| Error::Parse(format!("could not read the 4-byte format magic at offset {start}")))?;
    source.seek(SeekFrom::Start(start))?;

    let id = FourCC::new(magic);
    let inner = if id.is_iff85_root() {
        Inner::Iff85(Iff85Iterator::new(source, options)?)
    } else if id.is_riff_root() {
        Inner::Riff(RiffIterator::new(source, options, id)?)
    } else {
        return Err(Error::Parse(format!(
            "unknown container format '{id}' at offset {start}"
        )));
    };
    Ok(ChunkIterator { inner })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn unknown_magic_is_a_parse_error() {
        let mut cur = Cursor::new(b"XXXX\x00\x00\x00\x00".to_vec());
        let err = get_iterator(&mut cur).unwrap_err();
        match err {
            Error::Parse(msg) => assert!(msg.contains("XXXX"), "{msg}"),
            other => panic!("expected a parse error, got {other:?}"),
        }
    }

    #[test]
    fn empty_source_is_a_parse_error() {
        let mut cur = Cursor::new(Vec::new());
        assert!(matches!(get_iterator(&mut cur), Err(Error::Parse(_))));
    }

    #[test]
    fn prop_cannot_open_a_stream() {
        let mut data = b"PROP".to_vec();
        data.extend_from_slice(&12u32.to_be_bytes());
        data.extend_from_slice(b"ILBMDATA\x00\x00\x00\x00");
        let mut cur = Cursor::new(data);
        assert!(matches!(get_iterator(&mut cur), Err(Error::Parse(_))));
    }

    #[test]
    fn detection_rewinds_to_the_starting_offset() {
        // A valid FORM not at offset zero: detection must peek and rewind
        // relative to where the caller positioned the source.
        let mut data = vec![0u8; 6];
        data.extend_from_slice(b"FORM");
        data.extend_from_slice(&4u32.to_be_bytes());
        data.extend_from_slice(b"TEST");
        let mut cur = Cursor::new(data);
        {
            let src: &mut dyn ByteSource = &mut cur;
            src.seek(SeekFrom::Start(6)).unwrap();
        }
        let it = get_iterator(&mut cur).unwrap();
        assert_eq!(it.current().header.id, FourCC::FORM);
        assert_eq!(it.current().header.file_offset, 6);
    }
}
