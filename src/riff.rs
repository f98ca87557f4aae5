// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The RIFF iterator: RIFF, big-endian RIFX, and the 64-bit RF64/BW64
//! extensions driven by the hidden ds64 chunk.

use std::io::SeekFrom;

use byteorder::{BigEndian, ByteOrder as _, LittleEndian};
use log::debug;

use crate::fourcc::FourCC;
use crate::iter::IterCore;
use crate::source::{ByteOrder, ByteSource};
use crate::{Error, ParseOptions, Result, TryVec};

/// The 32-bit size value that defers to a 64-bit override from ds64.
const SIZE_SENTINEL: u32 = 0xFFFF_FFFF;

/// One per-identifier size override from the ds64 table. Entries for the
/// same identifier are consumed in order of occurrence.
#[derive(Debug)]
struct OverrideEntry {
    id: FourCC,
    size: u64,
    used: bool,
}

/// Sizes recovered from a ds64 chunk.
#[derive(Debug, Default)]
struct Rf64State {
    riff_size: u64,
    data_size: u64,
    #[allow(unused)]
    sample_count: u64,
    table: TryVec<OverrideEntry>,
}

impl Rf64State {
    fn take_override(&mut self, id: FourCC) -> Option<u64> {
        let entry = self.table.iter_mut().find(|e| !e.used && e.id == id)?;
        entry.used = true;
        Some(entry.size)
    }
}

/// Iterator over a RIFF-family stream.
///
/// Sizes are little-endian, or big-endian when the root is RIFX. Only the
/// root and LIST are containers, and both carry a type tag. In RF64/BW64
/// files the first chunk of the root must be ds64; it is consumed while the
/// root is processed, never surfaces as a descriptor, and supplies the
/// 64-bit sizes substituted wherever a 32-bit size field holds 0xFFFFFFFF.
pub(crate) struct RiffIterator<'s> {
    core: IterCore<'s>,
    order: ByteOrder,
    root_id: FourCC,
    /// True for RF64/BW64 roots, which require the ds64 protocol.
    is_rf64: bool,
    rf64: Rf64State,
    ds64_parsed: bool,
    /// A header already consumed from the source, to be processed before
    /// reading the next one.
    pending: Option<(u64, FourCC, u32)>,
}

impl<'s> RiffIterator<'s> {
    /// The factory has already detected `root` as the first identifier and
    /// rewound to the starting offset.
    pub(crate) fn new(
        src: &'s mut (dyn ByteSource + 's),
        opts: ParseOptions,
        root: FourCC,
    ) -> Result<Self> {
        let mut it = RiffIterator {
            core: IterCore::new(src, opts),
            order: if root == FourCC::RIFX { ByteOrder::Big } else { ByteOrder::Little },
            root_id: root,
            is_rf64: root == FourCC::RF64 || root == FourCC::BW64,
            rf64: Rf64State::default(),
            ds64_parsed: false,
            pending: None,
        };
        if it.is_rf64 && !it.core.opts.allow_rf64 {
            let offset = it.core.tell()?;
            return Err(Error::Parse(format!(
                "'{root}' root at offset {offset} rejected: 64-bit RIFF support is disabled"
            )));
        }
        if !it.read_next_chunk()? {
            it.core.ended = true;
        }
        Ok(it)
    }

    pub(crate) fn core(&self) -> &IterCore<'s> {
        &self.core
    }

    pub(crate) fn core_mut(&mut self) -> &mut IterCore<'s> {
        &mut self.core
    }

    pub(crate) fn advance(&mut self) -> Result<()> {
        if self.core.ended {
            return Ok(());
        }
        if !self.core.finalize_current()? {
            self.core.ended = true;
            return Ok(());
        }
        if !self.read_next_chunk()? {
            self.core.ended = true;
        }
        Ok(())
    }

    fn read_next_chunk(&mut self) -> Result<bool> {
        loop {
            let (start, id, size32) = match self.pending.take() {
                Some(header) => header,
                None => {
                    self.core.pop_exited_frames()?;
                    match self.core.try_read_header(self.order)? {
                        Some(header) => header,
                        None => return Ok(false),
                    }
                }
            };

            // ds64 is metadata, not a chunk the caller gets to see.
            if id == FourCC::DS64 {
                self.consume_ds64(start, size32)?;
                continue;
            }

            let size = if self.is_rf64
                && id == self.root_id
                && size32 == SIZE_SENTINEL
                && !self.ds64_parsed
            {
                // Unbounded until ds64 supplies the real size.
                let len = self.core.len()?;
                len.saturating_sub(start.saturating_add(8))
            } else {
                self.resolve_override(id, size32)
            };
            let size = self.core.enforce_size_limit(id, start, size)?;
            let depth = self.core.child_depth();

            if !(id.is_riff_root() || id == FourCC::LIST) {
                return self.core.begin_data_chunk(id, size, start, depth);
            }

            if !self.core.check_depth(id, start, depth)? {
                if !self.core.skip_container(start, size)? {
                    return Ok(false);
                }
                continue;
            }

            if size < 4 {
                return Err(Error::Parse(format!(
                    "container '{id}' at offset {start} declares {size} bytes, \
                     too small for its type tag"
                )));
            }
            let tag = self.core.src.read_fourcc()?;
            let content_end = start.saturating_add(8).saturating_add(size);
            self.core.begin_container(id, size, start, depth, Some(tag), content_end)?;

            if self.is_rf64 && id == self.root_id && !self.ds64_parsed {
                self.expect_ds64(size32 == SIZE_SENTINEL)?;
            }
            return Ok(true);
        }
    }

    /// Reads the first chunk header inside an RF64/BW64 root, which must be
    /// ds64 whenever the root size is deferred. Consuming it here lets the
    /// root descriptor carry the authoritative size straight away.
    fn expect_ds64(&mut self, root_deferred: bool) -> Result<()> {
        let pos = self.core.tell()?;
        let mut buf = [0u8; 8];
        if self.core.src.read_exact_buf(&mut buf).is_err() {
            if root_deferred {
                return Err(Error::Parse(format!(
                    "'{}' root requires a ds64 chunk as its first child, but the \
                     source ended at offset {pos}",
                    self.root_id
                )));
            }
            // An empty root; the next header read will report the end.
            return Ok(());
        }
        let id = FourCC::new([buf[0], buf[1], buf[2], buf[3]]);
        let size32 = match self.order {
            ByteOrder::Little => LittleEndian::read_u32(&buf[4..8]),
            ByteOrder::Big => BigEndian::read_u32(&buf[4..8]),
        };

        if id != FourCC::DS64 {
            if root_deferred {
                return Err(Error::Parse(format!(
                    "the first chunk inside '{}' must be 'ds64', found '{id}' at offset {pos}",
                    self.root_id
                )));
            }
            self.pending = Some((pos, id, size32));
            return Ok(());
        }

        self.consume_ds64(pos, size32)?;

        // The root size from ds64 is now authoritative.
        let root_start = self.core.current.header.file_offset;
        if root_deferred {
            let size = self.rf64.riff_size;
            self.core.current.header.size = size;
            self.core.current.padded_size = size.saturating_add(size & 1);
        }
        let len = self.core.len()?;
        let end = root_start
            .saturating_add(8)
            .saturating_add(self.rf64.riff_size)
            .min(len);
        if let Some(frame) = self.core.frames.last_mut() {
            frame.end_offset = end;
        }
        Ok(())
    }

    /// Parses a ds64 chunk whose header has already been read, then seeks
    /// past its payload and padding. The fixed fields and the override table
    /// are little-endian even in big-endian RIFX files.
    fn consume_ds64(&mut self, start: u64, size32: u32) -> Result<()> {
        let size = u64::from(size32);
        if size < 24 {
            return Err(Error::Parse(format!(
                "ds64 chunk at offset {start} is {size} bytes, smaller than the \
                 24-byte fixed fields"
            )));
        }
        self.rf64.riff_size = self.core.src.read_u64(ByteOrder::Little)?;
        self.rf64.data_size = self.core.src.read_u64(ByteOrder::Little)?;
        self.rf64.sample_count = self.core.src.read_u64(ByteOrder::Little)?;

        if size >= 28 {
            let count = self.core.src.read_u32(ByteOrder::Little)?;
            let needed = 28u64.saturating_add(u64::from(count).saturating_mul(12));
            if size < needed {
                return Err(Error::Parse(format!(
                    "ds64 chunk at offset {start} declares {count} table entries \
                     needing {needed} bytes, but the chunk is only {size} bytes"
                )));
            }
            for _ in 0..count {
                let id = self.core.src.read_fourcc()?;
                let entry_size = self.core.src.read_u64(ByteOrder::Little)?;
                if id == FourCC::DATA && self.rf64.data_size == 0 {
                    self.rf64.data_size = entry_size;
                }
                self.rf64.table.push(OverrideEntry { id, size: entry_size, used: false })?;
            }
        }

        self.ds64_parsed = true;
        debug!(
            "ds64 at offset {start}: riff size {}, data size {}, {} table entries",
            self.rf64.riff_size,
            self.rf64.data_size,
            self.rf64.table.len()
        );

        // Whatever we did not parse is skipped along with the pad byte.
        let next = start
            .saturating_add(8)
            .saturating_add(size)
            .saturating_add(size & 1);
        self.core.src.seek(SeekFrom::Start(next))?;
        Ok(())
    }

    /// Substitutes the 64-bit size for a chunk whose 32-bit size field holds
    /// the sentinel: the root uses the authoritative riff size, `data`
    /// prefers the authoritative data size, everything else consumes its
    /// per-identifier override queue in source order. Without a match the
    /// sentinel stands.
    fn resolve_override(&mut self, id: FourCC, size32: u32) -> u64 {
        if !self.ds64_parsed || size32 != SIZE_SENTINEL {
            return u64::from(size32);
        }
        if id == self.root_id {
            return self.rf64.riff_size;
        }
        if id == FourCC::DATA && self.rf64.data_size > 0 {
            return self.rf64.data_size;
        }
        match self.rf64.take_override(id) {
            Some(size) => size,
            None => {
                debug!("no ds64 override for '{id}', keeping the 32-bit sentinel");
                u64::from(size32)
            }
        }
    }
}
