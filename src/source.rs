// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Byte sources, byte order, and the bounded subreader.

use std::io::{Read, Seek, SeekFrom};

use byteorder::{BigEndian, ByteOrder as _, LittleEndian};

use crate::fourcc::FourCC;
use crate::{Error, Result, ToU64};

/// Byte order used when decoding multi-byte scalars.
///
/// RIFF, RF64 and BW64 store sizes little-endian; IFF-85 and RIFX store them
/// big-endian. Scalar reads take the order explicitly so one source can serve
/// either family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Little,
    Big,
}

impl ByteOrder {
    /// Whether this order matches the machine the parser runs on.
    pub fn is_native(self) -> bool {
        match self {
            ByteOrder::Little => cfg!(target_endian = "little"),
            ByteOrder::Big => cfg!(target_endian = "big"),
        }
    }
}

/// A positionable, readable byte source.
///
/// This is the only contract the parser assumes about its input: read at the
/// cursor, seek to an absolute or relative position, and report the cursor and
/// total length. Anything `Read + Seek` qualifies through the blanket
/// implementation. Seeking past the end is an error and leaves the position
/// unchanged.
pub trait ByteSource {
    /// Reads up to `dst.len()` bytes, returning how many were read. Zero
    /// means end of data.
    fn read(&mut self, dst: &mut [u8]) -> Result<usize>;

    /// Moves the cursor. Fails without moving if the target lies past the end.
    fn seek(&mut self, pos: SeekFrom) -> Result<u64>;

    /// Current cursor position.
    fn tell(&mut self) -> Result<u64>;

    /// Total length of the source in bytes.
    fn len(&mut self) -> Result<u64>;

    /// Fills `dst` completely, failing with an I/O error naming the offset if
    /// the source ends first.
    fn read_exact_buf(&mut self, dst: &mut [u8]) -> Result<()> {
        let offset = self.tell()?;
        let mut filled = 0;
        while filled < dst.len() {
            let got = self.read(&mut dst[filled..])?;
            if got == 0 {
                return Err(Error::Io(format!(
                    "short read at offset {offset}: wanted {} bytes, got {filled}",
                    dst.len()
                )));
            }
            filled += got;
        }
        Ok(())
    }

    fn read_fourcc(&mut self) -> Result<FourCC> {
        let mut b = [0u8; 4];
        self.read_exact_buf(&mut b)?;
        Ok(FourCC::new(b))
    }

    fn read_u16(&mut self, order: ByteOrder) -> Result<u16> {
        let mut b = [0u8; 2];
        self.read_exact_buf(&mut b)?;
        Ok(match order {
            ByteOrder::Little => LittleEndian::read_u16(&b),
            ByteOrder::Big => BigEndian::read_u16(&b),
        })
    }

    fn read_u32(&mut self, order: ByteOrder) -> Result<u32> {
        let mut b = [0u8; 4];
        self.read_exact_buf(&mut b)?;
        Ok(match order {
            ByteOrder::Little => LittleEndian::read_u32(&b),
            ByteOrder::Big => BigEndian::read_u32(&b),
        })
    }

    fn read_u64(&mut self, order: ByteOrder) -> Result<u64> {
        let mut b = [0u8; 8];
        self.read_exact_buf(&mut b)?;
        Ok(match order {
            ByteOrder::Little => LittleEndian::read_u64(&b),
            ByteOrder::Big => BigEndian::read_u64(&b),
        })
    }

    fn read_f32(&mut self, order: ByteOrder) -> Result<f32> {
        let mut b = [0u8; 4];
        self.read_exact_buf(&mut b)?;
        Ok(match order {
            ByteOrder::Little => LittleEndian::read_f32(&b),
            ByteOrder::Big => BigEndian::read_f32(&b),
        })
    }

    fn read_f64(&mut self, order: ByteOrder) -> Result<f64> {
        let mut b = [0u8; 8];
        self.read_exact_buf(&mut b)?;
        Ok(match order {
            ByteOrder::Little => LittleEndian::read_f64(&b),
            ByteOrder::Big => BigEndian::read_f64(&b),
        })
    }
}

fn apply_delta(base: u64, delta: i64) -> Result<u64> {
    let target = if delta >= 0 {
        base.checked_add(delta as u64)
    } else {
        base.checked_sub(delta.unsigned_abs())
    };
    target.ok_or_else(|| Error::Io(format!("seek offset out of range: base {base}, delta {delta}")))
}

impl<T: Read + Seek> ByteSource for T {
    fn read(&mut self, dst: &mut [u8]) -> Result<usize> {
        Read::read(self, dst).map_err(|e| Error::Io(format!("read failed: {e}")))
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let len = ByteSource::len(self)?;
        let target = match pos {
            SeekFrom::Start(n) => n,
            SeekFrom::Current(delta) => apply_delta(ByteSource::tell(self)?, delta)?,
            SeekFrom::End(delta) => apply_delta(len, delta)?,
        };
        if target > len {
            return Err(Error::Io(format!(
                "cannot seek to offset {target}: the source is only {len} bytes"
            )));
        }
        Seek::seek(self, SeekFrom::Start(target))
            .map_err(|e| Error::Io(format!("seek to offset {target} failed: {e}")))
    }

    fn tell(&mut self) -> Result<u64> {
        self.stream_position().map_err(|e| Error::Io(format!("tell failed: {e}")))
    }

    fn len(&mut self) -> Result<u64> {
        let cur = self
            .stream_position()
            .map_err(|e| Error::Io(format!("tell failed: {e}")))?;
        let end = Seek::seek(self, SeekFrom::End(0))
            .map_err(|e| Error::Io(format!("seek to end failed: {e}")))?;
        Seek::seek(self, SeekFrom::Start(cur))
            .map_err(|e| Error::Io(format!("seek to offset {cur} failed: {e}")))?;
        Ok(end)
    }
}

/// A bounded window `[start, start + size)` over a parent source.
///
/// Positions are window-relative. Reading at the window end returns zero
/// instead of an error, so a payload parser can treat the window end like end
/// of file. Subreaders implement [`ByteSource`] themselves and therefore
/// compose.
///
/// The parent cursor is repositioned lazily on each read, never on seek.
pub struct SubReader<'a> {
    parent: &'a mut (dyn ByteSource + 'a),
    start: u64,
    size: u64,
    pos: u64,
}

impl<'a> SubReader<'a> {
    /// A window of `size` bytes beginning at absolute offset `start`.
    pub fn new(parent: &'a mut (dyn ByteSource + 'a), start: u64, size: u64) -> Self {
        SubReader { parent, start, size, pos: 0 }
    }

    /// A window of `size` bytes beginning at the parent's current position.
    pub fn at_current(parent: &'a mut (dyn ByteSource + 'a), size: u64) -> Result<Self> {
        let start = parent.tell()?;
        Ok(SubReader { parent, start, size, pos: 0 })
    }

    pub fn start_offset(&self) -> u64 {
        self.start
    }

    pub fn position(&self) -> u64 {
        self.pos
    }

    pub fn remaining(&self) -> u64 {
        self.size - self.pos
    }

    pub(crate) fn set_position(&mut self, pos: u64) {
        self.pos = pos.min(self.size);
    }
}

impl ByteSource for SubReader<'_> {
    fn read(&mut self, dst: &mut [u8]) -> Result<usize> {
        let avail = self.remaining();
        if avail == 0 || dst.is_empty() {
            return Ok(0);
        }
        let want = dst.len().to_u64().min(avail) as usize;
        self.parent.seek(SeekFrom::Start(self.start + self.pos))?;
        let got = self.parent.read(&mut dst[..want])?;
        self.pos += got.to_u64();
        Ok(got)
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let target = match pos {
            SeekFrom::Start(n) => n,
            SeekFrom::Current(delta) => apply_delta(self.pos, delta)?,
            SeekFrom::End(delta) => apply_delta(self.size, delta)?,
        };
        if target > self.size {
            return Err(Error::Io(format!(
                "cannot seek to offset {target} in a {}-byte window",
                self.size
            )));
        }
        self.pos = target;
        Ok(target)
    }

    fn tell(&mut self) -> Result<u64> {
        Ok(self.pos)
    }

    fn len(&mut self) -> Result<u64> {
        Ok(self.size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn scalar_reads_honor_the_requested_order() {
        let mut cur = Cursor::new(vec![0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08]);
        let src: &mut dyn ByteSource = &mut cur;
        assert_eq!(src.read_u32(ByteOrder::Big).unwrap(), 0x0102_0304);
        assert_eq!(src.read_u32(ByteOrder::Little).unwrap(), 0x0807_0605);

        let mut cur = Cursor::new(vec![0x34, 0x12]);
        let src: &mut dyn ByteSource = &mut cur;
        assert_eq!(src.read_u16(ByteOrder::Little).unwrap(), 0x1234);
    }

    #[test]
    fn float_reads_decode_ieee_bits() {
        let mut bytes = 1.5f32.to_be_bytes().to_vec();
        bytes.extend_from_slice(&2.25f64.to_le_bytes());
        let mut cur = Cursor::new(bytes);
        let src: &mut dyn ByteSource = &mut cur;
        assert_eq!(src.read_f32(ByteOrder::Big).unwrap(), 1.5);
        assert_eq!(src.read_f64(ByteOrder::Little).unwrap(), 2.25);
    }

    #[test]
    fn exactly_one_order_is_native() {
        assert_ne!(ByteOrder::Little.is_native(), ByteOrder::Big.is_native());
    }

    #[test]
    fn short_scalar_read_is_an_io_error() {
        let mut cur = Cursor::new(vec![0x01, 0x02]);
        let src: &mut dyn ByteSource = &mut cur;
        assert!(matches!(src.read_u32(ByteOrder::Big), Err(Error::Io(_))));
    }

    #[test]
    fn seek_past_end_fails_and_preserves_position() {
        let mut cur = Cursor::new(vec![0u8; 10]);
        let src: &mut dyn ByteSource = &mut cur;
        src.seek(SeekFrom::Start(4)).unwrap();
        assert!(src.seek(SeekFrom::Start(11)).is_err());
        assert_eq!(src.tell().unwrap(), 4);
        assert_eq!(src.seek(SeekFrom::End(-2)).unwrap(), 8);
        assert_eq!(src.len().unwrap(), 10);
    }

    #[test]
    fn subreader_clamps_reads_to_its_window() {
        let mut cur = Cursor::new(b"abcdefghij".to_vec());
        let mut sub = SubReader::new(&mut cur, 2, 5);
        let mut buf = [0u8; 8];
        assert_eq!(sub.read(&mut buf).unwrap(), 5);
        assert_eq!(&buf[..5], b"cdefg");
        assert_eq!(sub.read(&mut buf).unwrap(), 0);
        assert_eq!(sub.position(), 5);
        assert_eq!(sub.remaining(), 0);
    }

    #[test]
    fn subreader_positions_are_window_relative() {
        let mut cur = Cursor::new(b"abcdefghij".to_vec());
        let mut sub = SubReader::new(&mut cur, 3, 4);
        sub.seek(SeekFrom::Start(2)).unwrap();
        assert_eq!(sub.tell().unwrap(), 2);
        let mut b = [0u8; 1];
        assert_eq!(sub.read(&mut b).unwrap(), 1);
        assert_eq!(b[0], b'f');
        assert!(sub.seek(SeekFrom::Start(5)).is_err());
        assert_eq!(sub.position(), 3);
        assert_eq!(sub.seek(SeekFrom::End(-4)).unwrap(), 0);
    }

    #[test]
    fn subreaders_compose() {
        let mut cur = Cursor::new(b"abcdefghij".to_vec());
        let mut outer = SubReader::new(&mut cur, 2, 6);
        let mut inner = SubReader::new(&mut outer, 1, 3);
        let mut buf = [0u8; 10];
        assert_eq!(inner.read(&mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], b"def");
        assert_eq!(inner.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn subreader_at_current_starts_at_the_parent_cursor() {
        let mut cur = Cursor::new(b"abcdefghij".to_vec());
        {
            let src: &mut dyn ByteSource = &mut cur;
            src.seek(SeekFrom::Start(4)).unwrap();
            let mut sub = SubReader::at_current(src, 3).unwrap();
            assert_eq!(sub.start_offset(), 4);
            let mut b = [0u8; 1];
            sub.read(&mut b).unwrap();
            assert_eq!(b[0], b'e');
        }
    }
}
