#![deny(unsafe_code)]
//! Parser for the IFF/RIFF family of chunk-structured container formats.
//!
//! Covered formats: the original big-endian IFF-85 (FORM, LIST, CAT, PROP),
//! little-endian RIFF and its 64-bit RF64/BW64 extensions, and the
//! big-endian RIFX variant. WAV, AIFF, AVI, ILBM and many other media
//! formats are applications of these containers; this crate parses the
//! container layer and hands each chunk's payload to the caller untouched.
//!
//! The entry points are:
//!
//! - [`get_iterator`] for a streaming, depth-first [`ChunkIterator`] that
//!   exposes every chunk with its nesting context,
//! - [`for_each_chunk`] to visit every data chunk with a closure,
//! - [`parse`] to dispatch begin/end events to a [`HandlerRegistry`].
//!
//! ```no_run
//! use std::fs::File;
//! use iff_parse::{for_each_chunk, FourCC};
//!
//! # fn main() -> iff_parse::Result<()> {
//! let mut file = File::open("audio.wav")?;
//! for_each_chunk(&mut file, |chunk, reader| {
//!     if chunk.header.id == FourCC::DATA {
//!         println!("{} bytes of samples", reader.remaining());
//!     }
//!     Ok(())
//! })?;
//! # Ok(())
//! # }
//! ```
//!
//! Parsing is synchronous and single-threaded. The iterator owns the only
//! cursor into the byte source; construction peeks four bytes to detect the
//! format and rewinds, and everything after that moves strictly forward.
//! Hardening limits and the strict/lenient recovery policy live in
//! [`ParseOptions`].

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::fmt;

mod chunk;
mod fourcc;
mod handler;
mod iff85;
mod iter;
mod riff;
mod source;

pub use chunk::{Chunk, ChunkHeader, ChunkReader};
pub use fourcc::FourCC;
pub use handler::{ChunkEvent, ChunkEventKind, ChunkHandler, HandlerRegistry};
pub use iter::{get_iterator, get_iterator_with_options, ChunkIterator};
pub use source::{ByteOrder, ByteSource, SubReader};

#[doc(hidden)]
pub type TryVec<T> = fallible_collections::TryVec<T>;

/// A trait to indicate a type can be infallibly converted to `u64`.
/// This should only be implemented for infallible conversions, so only
/// unsigned types are valid.
pub(crate) trait ToU64 {
    fn to_u64(self) -> u64;
}

/// Statically verify that the platform `usize` can fit within a `u64`.
impl ToU64 for usize {
    fn to_u64(self) -> u64 {
        const _: () = assert!(std::mem::size_of::<usize>() <= std::mem::size_of::<u64>());
        self.try_into().ok().unwrap()
    }
}

/// Describes parser failures.
///
/// Messages name the offending chunk identifier, the byte offset where the
/// condition was detected, and the limit or expectation that was violated.
/// Reaching the end of the source is not an error.
#[derive(Debug)]
pub enum Error {
    /// The byte source failed a read or seek, or returned a short read where
    /// complete data was required.
    Io(String),
    /// Malformed container structure, or a hardening limit was breached in
    /// strict mode.
    Parse(String),
    /// An allocation could not be reserved.
    OutOfMemory,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(msg) => write!(f, "I/O error: {msg}"),
            Self::Parse(msg) => write!(f, "parse error: {msg}"),
            Self::OutOfMemory => f.write_str("out of memory"),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<fallible_collections::TryReserveError> for Error {
    fn from(_: fallible_collections::TryReserveError) -> Self {
        Self::OutOfMemory
    }
}

impl From<std::string::FromUtf8Error> for Error {
    fn from(_: std::string::FromUtf8Error) -> Self {
        Self::Parse("invalid utf-8 in string payload".into())
    }
}

impl From<Error> for std::io::Error {
    fn from(err: Error) -> Self {
        let kind = match &err {
            Error::Io(_) => std::io::ErrorKind::Other,
            Error::Parse(_) => std::io::ErrorKind::InvalidData,
            Error::OutOfMemory => std::io::ErrorKind::OutOfMemory,
        };
        Self::new(kind, err.to_string())
    }
}

/// Result shorthand using our Error enum.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The closed set of warning categories passed to
/// [`ParseOptions::with_warning_handler`] callbacks.
///
/// Category strings are stable identifiers; tests may pin them. New
/// categories may be added, existing ones never change meaning.
pub mod warning {
    /// A chunk declared a size above `max_chunk_size` and was clamped.
    pub const SIZE_LIMIT: &str = "size_limit";
    /// A container would exceed `max_depth` and was skipped.
    pub const DEPTH_LIMIT: &str = "depth_limit";
    /// The source ended before a container did, or a container was clamped
    /// to the source length.
    pub const TRUNCATED: &str = "truncated";
}

/// Callback invoked for recoverable conditions in lenient mode, with the
/// byte offset, a [`warning`] category, and a human-readable message.
pub type WarningHandler = Box<dyn Fn(u64, &str, &str)>;

/// Options controlling hardening limits and malformed-input recovery.
///
/// The default is strict: the first limit breach or structural violation
/// fails the parse. With `strict` off, recoverable conditions instead reach
/// the warning callback and parsing continues conservatively: oversize
/// chunks are clamped, over-deep containers are skipped, and truncated
/// containers are closed where the source ends.
///
/// ```
/// use iff_parse::ParseOptions;
///
/// let options = ParseOptions::default()
///     .strict(false)
///     .with_max_chunk_size(64 * 1024 * 1024)
///     .with_warning_handler(|offset, category, message| {
///         eprintln!("{category} at {offset}: {message}");
///     });
/// ```
pub struct ParseOptions {
    /// Fail on any violation instead of recovering. Default: true.
    pub strict: bool,
    /// Upper bound on a single chunk's payload size. Default: 2^32 bytes.
    pub max_chunk_size: u64,
    /// Maximum container nesting depth. Default: 64.
    pub max_depth: u32,
    /// Accept RF64/BW64 roots. When false they are parse errors.
    /// Default: true.
    pub allow_rf64: bool,
    /// Optional callback for warnings. Warnings are also logged at `warn`
    /// level regardless.
    pub on_warning: Option<WarningHandler>,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            strict: true,
            max_chunk_size: 1 << 32,
            max_depth: 64,
            allow_rf64: true,
            on_warning: None,
        }
    }
}

impl ParseOptions {
    /// Set strict mode.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Set the maximum payload size for a single chunk.
    pub fn with_max_chunk_size(mut self, bytes: u64) -> Self {
        self.max_chunk_size = bytes;
        self
    }

    /// Set the maximum container nesting depth.
    pub fn with_max_depth(mut self, depth: u32) -> Self {
        self.max_depth = depth;
        self
    }

    /// Allow or reject RF64/BW64 roots.
    pub fn allow_rf64(mut self, allow: bool) -> Self {
        self.allow_rf64 = allow;
        self
    }

    /// Install a warning callback.
    pub fn with_warning_handler(mut self, handler: impl Fn(u64, &str, &str) + 'static) -> Self {
        self.on_warning = Some(Box::new(handler));
        self
    }

    pub(crate) fn emit_warning(&self, offset: u64, category: &str, message: &str) {
        log::warn!("{category} at offset {offset}: {message}");
        if let Some(handler) = &self.on_warning {
            handler(offset, category, message);
        }
    }
}

impl fmt::Debug for ParseOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParseOptions")
            .field("strict", &self.strict)
            .field("max_chunk_size", &self.max_chunk_size)
            .field("max_depth", &self.max_depth)
            .field("allow_rf64", &self.allow_rf64)
            .field("on_warning", &self.on_warning.is_some())
            .finish()
    }
}

/// Visits every data chunk with default options.
///
/// Containers are traversed but not passed to `f`. See
/// [`for_each_chunk_with_options`].
pub fn for_each_chunk<F>(source: &mut dyn ByteSource, f: F) -> Result<()>
where
    F: FnMut(&Chunk, &mut ChunkReader<'_>) -> Result<()>,
{
    for_each_chunk_with_options(source, ParseOptions::default(), f)
}

/// Visits every data chunk in depth-first source order.
///
/// `f` receives the chunk descriptor and a reader scoped to its payload; an
/// error return aborts the walk. Payload bytes the closure leaves unread are
/// skipped automatically.
pub fn for_each_chunk_with_options<F>(
    source: &mut dyn ByteSource,
    options: ParseOptions,
    mut f: F,
) -> Result<()>
where
    F: FnMut(&Chunk, &mut ChunkReader<'_>) -> Result<()>,
{
    let mut it = get_iterator_with_options(source, options)?;
    while it.has_next() {
        if !it.current().header.is_container {
            let chunk = it.current().clone();
            if let Some(mut reader) = it.reader() {
                f(&chunk, &mut reader)?;
            }
        }
        it.advance()?;
    }
    Ok(())
}

/// Event-driven parse with default options. See [`parse_with_options`].
pub fn parse(source: &mut dyn ByteSource, handlers: &mut HandlerRegistry) -> Result<()> {
    parse_with_options(source, handlers, ParseOptions::default())
}

/// Iterates the source and dispatches begin/end events to the registry.
///
/// Every data chunk produces a `Begin` event carrying a payload reader,
/// followed by an `End` event without one, both before the next chunk's
/// events. Containers emit nothing; they only shape the context their
/// children are delivered with.
pub fn parse_with_options(
    source: &mut dyn ByteSource,
    handlers: &mut HandlerRegistry,
    options: ParseOptions,
) -> Result<()> {
    let mut it = get_iterator_with_options(source, options)?;
    while it.has_next() {
        let (is_container, header, form_type, container, depth) = {
            let c = it.current();
            (c.header.is_container, c.header, c.form_type, c.container, c.depth)
        };
        if !is_container {
            let begin = ChunkEvent {
                kind: ChunkEventKind::Begin,
                header: &header,
                form_type,
                container,
                depth,
            };
            match it.reader() {
                Some(mut reader) => handlers.emit(&begin, Some(&mut reader)),
                None => handlers.emit(&begin, None),
            }
            let end = ChunkEvent {
                kind: ChunkEventKind::End,
                header: &header,
                form_type,
                container,
                depth,
            };
            handlers.emit(&end, None);
        }
        it.advance()?;
    }
    Ok(())
}
