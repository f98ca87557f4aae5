// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Chunk event dispatch with three-tier handler precedence.

use std::collections::HashMap;

use crate::chunk::{ChunkHeader, ChunkReader};
use crate::fourcc::FourCC;

/// Phase of a chunk event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkEventKind {
    /// Fired before any payload consumption; a reader is available.
    Begin,
    /// Fired after the chunk has been processed; no reader.
    End,
}

/// A chunk event together with its hierarchical context.
///
/// Container chunks never produce events; they only shape the `form_type`
/// and `container` context their children are delivered with.
#[derive(Debug)]
pub struct ChunkEvent<'a> {
    pub kind: ChunkEventKind,
    pub header: &'a ChunkHeader,
    /// Type of the innermost enclosing FORM-family container.
    pub form_type: Option<FourCC>,
    /// Identifier of the innermost enclosing LIST, CAT or PROP.
    pub container: Option<FourCC>,
    pub depth: u32,
}

/// A registered chunk handler. `Begin` events carry a reader over the
/// payload, `End` events do not.
pub type ChunkHandler = Box<dyn FnMut(&ChunkEvent<'_>, Option<&mut ChunkReader<'_>>)>;

/// Routes chunk events to handlers with three levels of specificity.
///
/// A handler can be bound to a chunk identifier inside a particular FORM
/// type, inside a particular grouping container, or globally. For each event
/// every matching handler runs: FORM-scoped first, then container-scoped,
/// then global, each tier in registration order.
///
/// ```
/// use iff_parse::{FourCC, HandlerRegistry};
///
/// let mut handlers = HandlerRegistry::new();
/// handlers
///     .on_chunk_in_form(FourCC::from("WAVE"), FourCC::from("fmt "), |event, _reader| {
///         println!("wave format chunk at offset {}", event.header.file_offset);
///     })
///     .on_chunk(FourCC::DATA, |event, _reader| {
///         println!("{} bytes of samples", event.header.size);
///     });
/// ```
#[derive(Default)]
pub struct HandlerRegistry {
    form: HashMap<(FourCC, FourCC), Vec<ChunkHandler>>,
    container: HashMap<(FourCC, FourCC), Vec<ChunkHandler>>,
    global: HashMap<FourCC, Vec<ChunkHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds a handler to `chunk_id` inside FORM-family containers of type
    /// `form_type` (for example `fmt ` chunks inside `WAVE`).
    pub fn on_chunk_in_form(
        &mut self,
        form_type: FourCC,
        chunk_id: FourCC,
        handler: impl FnMut(&ChunkEvent<'_>, Option<&mut ChunkReader<'_>>) + 'static,
    ) -> &mut Self {
        self.form
            .entry((form_type, chunk_id))
            .or_default()
            .push(Box::new(handler));
        self
    }

    /// Binds a handler to `chunk_id` inside the grouping container
    /// `container_id` (LIST, CAT or PROP).
    pub fn on_chunk_in_container(
        &mut self,
        container_id: FourCC,
        chunk_id: FourCC,
        handler: impl FnMut(&ChunkEvent<'_>, Option<&mut ChunkReader<'_>>) + 'static,
    ) -> &mut Self {
        self.container
            .entry((container_id, chunk_id))
            .or_default()
            .push(Box::new(handler));
        self
    }

    /// Binds a handler to every occurrence of `chunk_id`.
    pub fn on_chunk(
        &mut self,
        chunk_id: FourCC,
        handler: impl FnMut(&ChunkEvent<'_>, Option<&mut ChunkReader<'_>>) + 'static,
    ) -> &mut Self {
        self.global.entry(chunk_id).or_default().push(Box::new(handler));
        self
    }

    /// Delivers an event to every matching handler in precedence order.
    pub fn emit(&mut self, event: &ChunkEvent<'_>, mut reader: Option<&mut ChunkReader<'_>>) {
        if let Some(form) = event.form_type {
            if let Some(handlers) = self.form.get_mut(&(form, event.header.id)) {
                for h in handlers {
                    h(event, reader.as_mut().map(|r| &mut **r));
                }
            }
        }
        if let Some(container) = event.container {
            if let Some(handlers) = self.container.get_mut(&(container, event.header.id)) {
                for h in handlers {
                    h(event, reader.as_mut().map(|r| &mut **r));
                }
            }
        }
        if let Some(handlers) = self.global.get_mut(&event.header.id) {
            for h in handlers {
                h(event, reader.as_mut().map(|r| &mut **r));
            }
        }
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("form_keys", &self.form.len())
            .field("container_keys", &self.container.len())
            .field("global_keys", &self.global.len())
            .finish()
    }
}
