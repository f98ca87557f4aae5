// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Chunk headers, the per-step chunk descriptor, and the scoped payload reader.

use log::debug;

use crate::fourcc::FourCC;
use crate::source::{ByteSource, SubReader};
use crate::{Error, Result, ToU64, TryVec};

/// Header of a single chunk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChunkHeader {
    /// Chunk identifier.
    pub id: FourCC,
    /// Payload size in bytes, excluding the alignment pad byte.
    pub size: u64,
    /// Absolute offset of the 8-byte header in the source.
    pub file_offset: u64,
    /// Whether the payload is a sequence of child chunks.
    pub is_container: bool,
    /// Type tag for containers that carry one (FORM, LIST, PROP and the
    /// RIFF-family roots). CAT containers and data chunks have none.
    pub type_tag: Option<FourCC>,
}

/// The value an iterator exposes at each step.
///
/// A descriptor is valid until the iterator advances. Data chunk payloads are
/// accessed through [`ChunkIterator::reader`](crate::ChunkIterator::reader)
/// while the descriptor is current.
#[derive(Debug, Clone, Default)]
pub struct Chunk {
    pub header: ChunkHeader,
    /// Nesting depth, zero for the outermost chunk.
    pub depth: u32,
    /// Type of the innermost enclosing FORM-family container, if any.
    pub form_type: Option<FourCC>,
    /// Identifier of the innermost enclosing LIST, CAT or PROP, if any.
    pub container: Option<FourCC>,
    /// Payload size plus the alignment pad byte for odd sizes.
    pub padded_size: u64,
    /// True when an enclosing LIST has carried a PROP child.
    pub in_list_with_props: bool,
    /// True when this chunk is itself a PROP container.
    pub is_prop: bool,
}

/// Cursor state for the current data chunk's payload, owned by the iterator
/// so a re-acquired reader resumes where the previous one stopped.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Payload {
    pub(crate) start: u64,
    pub(crate) size: u64,
    pub(crate) consumed: u64,
}

/// Scoped view over one data chunk's payload.
///
/// All I/O is bounded to the chunk's declared size: reads past the end return
/// zero, and the trailing alignment byte for odd-sized chunks is never
/// visible (the iterator consumes it when advancing). The invariant
/// `offset() + remaining() == size()` holds after every operation.
///
/// `ChunkReader` also implements [`std::io::Read`], so payload bytes can be
/// handed to any reader-based decoder.
pub struct ChunkReader<'a> {
    id: FourCC,
    sub: SubReader<'a>,
    consumed: &'a mut u64,
}

impl<'a> ChunkReader<'a> {
    pub(crate) fn new(
        src: &'a mut (dyn ByteSource + 'a),
        payload: &'a mut Payload,
        id: FourCC,
    ) -> Self {
        let mut sub = SubReader::new(src, payload.start, payload.size);
        sub.set_position(payload.consumed);
        ChunkReader { id, sub, consumed: &mut payload.consumed }
    }

    /// Reads up to `dst.len()` bytes, never more than `remaining()`. Returns
    /// zero only when the payload is exhausted.
    pub fn read(&mut self, dst: &mut [u8]) -> Result<usize> {
        self.sub.read(dst)
    }

    /// Advances the offset by `n` without touching the source. Returns false
    /// and leaves the offset unchanged when fewer than `n` bytes remain.
    pub fn skip(&mut self, n: u64) -> bool {
        if n > self.remaining() {
            return false;
        }
        let pos = self.sub.position();
        self.sub.set_position(pos + n);
        true
    }

    pub fn remaining(&self) -> u64 {
        self.sub.remaining()
    }

    /// Current offset from the start of the payload.
    pub fn offset(&self) -> u64 {
        self.sub.position()
    }

    /// Declared payload size.
    pub fn size(&self) -> u64 {
        self.sub.position() + self.sub.remaining()
    }

    /// Reads exactly `n` bytes and decodes them as UTF-8, truncating at the
    /// first NUL. A payload with fewer than `n` bytes left is an I/O error.
    pub fn read_string(&mut self, n: usize) -> Result<String> {
        let mut buf = alloc_buf(n)?;
        let got = self.read_full(&mut buf)?;
        if got != n {
            return Err(Error::Io(format!(
                "short read in '{}': wanted {n} string bytes, got {got}",
                self.id
            )));
        }
        if let Some(nul) = buf.iter().position(|&b| b == 0) {
            buf.truncate(nul);
        }
        Ok(String::from_utf8(buf)?)
    }

    pub fn read_fourcc(&mut self) -> Result<FourCC> {
        let mut b = [0u8; 4];
        let got = self.read_full(&mut b)?;
        if got != 4 {
            return Err(Error::Io(format!(
                "short read in '{}': wanted a FourCC, got {got} bytes",
                self.id
            )));
        }
        Ok(FourCC::new(b))
    }

    /// Reads everything left in the payload.
    pub fn read_all(&mut self) -> Result<TryVec<u8>> {
        let want = self.remaining();
        self.take_buf(want)
    }

    /// Reads up to `n` bytes, fewer when less remains.
    pub fn read_bytes(&mut self, n: usize) -> Result<TryVec<u8>> {
        let want = n.to_u64().min(self.remaining());
        self.take_buf(want)
    }

    fn take_buf(&mut self, want: u64) -> Result<TryVec<u8>> {
        let want = usize::try_from(want).map_err(|_| Error::OutOfMemory)?;
        let mut buf = alloc_buf(want)?;
        let got = self.read_full(&mut buf)?;
        buf.truncate(got);
        Ok(buf.into())
    }

    fn read_full(&mut self, dst: &mut [u8]) -> Result<usize> {
        let mut filled = 0;
        while filled < dst.len() {
            let got = self.read(&mut dst[filled..])?;
            if got == 0 {
                break;
            }
            filled += got;
        }
        Ok(filled)
    }
}

/// A zeroed buffer of `n` bytes, allocated fallibly.
fn alloc_buf(n: usize) -> Result<std::vec::Vec<u8>> {
    let mut buf = std::vec::Vec::new();
    buf.try_reserve_exact(n).map_err(|_| Error::OutOfMemory)?;
    buf.resize(n, 0);
    Ok(buf)
}

impl std::io::Read for ChunkReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        ChunkReader::read(self, buf).map_err(std::io::Error::from)
    }
}

impl Drop for ChunkReader<'_> {
    fn drop(&mut self) {
        *self.consumed = self.sub.position();
        let left = self.sub.remaining();
        if left > 0 {
            debug!("leaving {left} unread bytes in '{}'", self.id);
        }
    }
}
