// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The IFF-85 (EA 85) iterator: big-endian FORM/LIST/CAT/PROP traversal.

use crate::fourcc::FourCC;
use crate::iter::IterCore;
use crate::source::{ByteOrder, ByteSource};
use crate::{Error, ParseOptions, Result};

/// Iterator over an IFF-85 stream.
///
/// Sizes are big-endian. FORM, LIST, CAT and PROP are the grouping chunks;
/// all carry a 4-byte type tag except CAT, whose payload is a bare
/// concatenation of children. PROP placement is not validated; a LIST frame
/// is merely marked once a PROP child has been traversed, and default
/// inheritance is left to payload-level consumers.
pub(crate) struct Iff85Iterator<'s> {
    core: IterCore<'s>,
}

impl<'s> Iff85Iterator<'s> {
    /// The factory has already checked that the stream opens with FORM, LIST
    /// or CAT and rewound to the starting offset.
    pub(crate) fn new(src: &'s mut (dyn ByteSource + 's), opts: ParseOptions) -> Result<Self> {
        let mut it = Iff85Iterator { core: IterCore::new(src, opts) };
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
            self.core.pop_exited_frames()?;
            let Some((start, id, size32)) = self.core.try_read_header(ByteOrder::Big)? else {
                return Ok(false);
            };
            let size = self.core.enforce_size_limit(id, start, u64::from(size32))?;
            let depth = self.core.child_depth();

            if !id.is_iff85_group() {
                return self.core.begin_data_chunk(id, size, start, depth);
            }

            if !self.core.check_depth(id, start, depth)? {
                if !self.core.skip_container(start, size)? {
                    return Ok(false);
                }
                continue;
            }

            let (type_tag, content_end) = if id == FourCC::CAT {
                (None, self.core.tell()?.saturating_add(size))
            } else {
                if size < 4 {
                    return Err(Error::Parse(format!(
                        "container '{id}' at offset {start} declares {size} bytes, \
                         too small for its type tag"
                    )));
                }
                let tag = self.core.src.read_fourcc()?;
                (Some(tag), self.core.tell()?.saturating_add(size - 4))
            };
            return self.core.begin_container(id, size, start, depth, type_tag, content_end);
        }
    }
}
