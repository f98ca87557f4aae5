// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Four-character codes, the identifiers used throughout the IFF/RIFF family.

use std::fmt;

/// A four-byte chunk or type identifier.
///
/// FourCC codes identify chunks (`"fmt "`, `"data"`) and container types
/// (`"WAVE"`, `"ILBM"`) in IFF and RIFF files. They are compared, ordered and
/// hashed as raw bytes, so identifiers built from printable strings behave the
/// way callers expect.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FourCC([u8; 4]);

impl FourCC {
    pub const FORM: FourCC = FourCC(*b"FORM");
    pub const LIST: FourCC = FourCC(*b"LIST");
    pub const CAT: FourCC = FourCC(*b"CAT ");
    pub const PROP: FourCC = FourCC(*b"PROP");
    pub const RIFF: FourCC = FourCC(*b"RIFF");
    pub const RIFX: FourCC = FourCC(*b"RIFX");
    pub const RF64: FourCC = FourCC(*b"RF64");
    pub const BW64: FourCC = FourCC(*b"BW64");
    pub const DS64: FourCC = FourCC(*b"ds64");
    pub const DATA: FourCC = FourCC(*b"data");

    pub const fn new(bytes: [u8; 4]) -> Self {
        FourCC(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }

    /// The identifier as a native-order `u32`, suitable for external tables.
    pub fn to_u32(self) -> u32 {
        u32::from_ne_bytes(self.0)
    }

    /// True for the IFF-85 grouping identifiers FORM, LIST, CAT and PROP.
    pub fn is_iff85_group(self) -> bool {
        matches!(self, Self::FORM | Self::LIST | Self::CAT | Self::PROP)
    }

    /// True for identifiers that may open an IFF-85 stream. PROP is a group
    /// but is not a valid outermost chunk.
    pub fn is_iff85_root(self) -> bool {
        matches!(self, Self::FORM | Self::LIST | Self::CAT)
    }

    /// True for the RIFF-family root identifiers.
    pub fn is_riff_root(self) -> bool {
        matches!(self, Self::RIFF | Self::RIFX | Self::RF64 | Self::BW64)
    }

    /// True for containers that establish a FORM type for their children:
    /// FORM itself and every RIFF-family root.
    pub fn is_form_family(self) -> bool {
        self == Self::FORM || self.is_riff_root()
    }

    /// True for the grouping identifiers reported as the container context.
    pub fn is_grouping(self) -> bool {
        matches!(self, Self::LIST | Self::CAT | Self::PROP)
    }
}

/// Four spaces, the identifier of nothing in particular.
impl Default for FourCC {
    fn default() -> Self {
        FourCC(*b"    ")
    }
}

/// Builds an identifier from up to four characters. Shorter strings are
/// right-padded with ASCII spaces, longer ones silently truncated.
impl From<&str> for FourCC {
    fn from(s: &str) -> Self {
        let mut bytes = *b"    ";
        for (dst, src) in bytes.iter_mut().zip(s.bytes()) {
            *dst = src;
        }
        FourCC(bytes)
    }
}

impl From<[u8; 4]> for FourCC {
    fn from(bytes: [u8; 4]) -> Self {
        FourCC(bytes)
    }
}

impl From<&[u8; 4]> for FourCC {
    fn from(bytes: &[u8; 4]) -> Self {
        FourCC(*bytes)
    }
}

/// Reinterprets a native-order `u32` as four bytes.
impl From<u32> for FourCC {
    fn from(v: u32) -> Self {
        FourCC(v.to_ne_bytes())
    }
}

impl PartialEq<[u8; 4]> for FourCC {
    fn eq(&self, other: &[u8; 4]) -> bool {
        &self.0 == other
    }
}

impl PartialEq<&[u8; 4]> for FourCC {
    fn eq(&self, other: &&[u8; 4]) -> bool {
        &self.0 == *other
    }
}

impl fmt::Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &b in &self.0 {
            let c = if (0x20..=0x7e).contains(&b) { b as char } else { '.' };
            write!(f, "{c}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FourCC(\"{self}\")")
    }
}
