// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! End-to-end walks over synthetic files, exercising only the public API.

use std::cell::RefCell;
use std::io::{Cursor, Seek};
use std::rc::Rc;

use iff_parse::{
    for_each_chunk, for_each_chunk_with_options, get_iterator, get_iterator_with_options, parse,
    warning, ChunkEventKind, Error, FourCC, HandlerRegistry, ParseOptions,
};

// ---- builders ----------------------------------------------------------

fn chunk(id: &[u8; 4], size: u32, payload: &[u8], big_endian: bool) -> Vec<u8> {
    let mut out = id.to_vec();
    let size_bytes = if big_endian { size.to_be_bytes() } else { size.to_le_bytes() };
    out.extend_from_slice(&size_bytes);
    out.extend_from_slice(payload);
    if payload.len() % 2 == 1 {
        out.push(0);
    }
    out
}

fn chunk_be(id: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    chunk(id, payload.len() as u32, payload, true)
}

fn chunk_le(id: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    chunk(id, payload.len() as u32, payload, false)
}

fn group_be(id: &[u8; 4], type_tag: &[u8; 4], children: &[Vec<u8>]) -> Vec<u8> {
    let mut payload = type_tag.to_vec();
    for c in children {
        payload.extend_from_slice(c);
    }
    chunk_be(id, &payload)
}

fn riff_le(root: &[u8; 4], type_tag: &[u8; 4], children: &[Vec<u8>]) -> Vec<u8> {
    let mut payload = type_tag.to_vec();
    for c in children {
        payload.extend_from_slice(c);
    }
    chunk_le(root, &payload)
}

// ---- scenario 1: minimal WAV ------------------------------------------

#[test]
fn minimal_wav() {
    // The classic hand-written layout, root size field 36.
    let mut data = Vec::new();
    data.extend_from_slice(b"RIFF");
    data.extend_from_slice(&36u32.to_le_bytes());
    data.extend_from_slice(b"WAVE");
    data.extend_from_slice(b"fmt ");
    data.extend_from_slice(&16u32.to_le_bytes());
    data.extend_from_slice(&[0u8; 16]);
    data.extend_from_slice(b"data");
    data.extend_from_slice(&4u32.to_le_bytes());
    data.extend_from_slice(&[0u8; 4]);

    let mut cur = Cursor::new(data);
    let mut it = get_iterator(&mut cur).expect("format detection failed");

    let mut ids = Vec::new();
    let mut depths = Vec::new();
    let mut forms = Vec::new();
    while it.has_next() {
        let c = it.current();
        ids.push(c.header.id);
        depths.push(c.depth);
        forms.push(c.form_type);
        it.advance().unwrap();
    }
    assert_eq!(ids, vec![FourCC::RIFF, FourCC::from("fmt "), FourCC::DATA]);
    assert_eq!(depths, vec![0, 1, 1]);
    assert_eq!(forms[1], Some(FourCC::from("WAVE")));
    assert_eq!(forms[2], Some(FourCC::from("WAVE")));
}

#[test]
fn minimal_wav_reader_invariants() {
    let data = riff_le(
        b"RIFF",
        b"WAVE",
        &[chunk_le(b"fmt ", &[1u8; 16]), chunk_le(b"data", &[2u8; 4])],
    );
    let mut cur = Cursor::new(data);
    let mut it = get_iterator(&mut cur).unwrap();
    while it.has_next() {
        let header = it.current().header;
        if let Some(mut r) = it.reader() {
            assert_eq!(r.size(), header.size);
            assert_eq!(r.offset(), 0);
            assert_eq!(r.remaining(), header.size);
            let mut buf = [0u8; 3];
            let got = r.read(&mut buf).unwrap();
            assert_eq!(r.offset(), got as u64);
            assert_eq!(r.offset() + r.remaining(), r.size());
            assert!(!r.skip(r.remaining() + 1));
            assert_eq!(r.offset(), got as u64);
        }
        it.advance().unwrap();
    }
}

// ---- scenario 2: deeply nested IFF-85 ---------------------------------

#[test]
fn deeply_nested_iff85() {
    // Nine alternating FORM/LIST levels around a single DATA chunk.
    let mut data = chunk_be(b"DATA", &[0u8; 4]);
    for level in (2..=9).rev() {
        let tag = [b'T', b'S', b'T', b'0' + level as u8];
        let id = if level % 2 == 0 { b"LIST" } else { b"FORM" };
        data = group_be(id, &tag, &[data]);
    }
    data = group_be(b"FORM", b"TST1", &[data]);

    let mut cur = Cursor::new(data);
    let mut it = get_iterator(&mut cur).unwrap();
    let mut seen = Vec::new();
    while it.has_next() {
        let c = it.current();
        seen.push((c.header.id, c.depth, c.header.is_container, c.header.type_tag));
        it.advance().unwrap();
    }
    assert_eq!(seen.len(), 10);
    for (i, &(_, depth, is_container, type_tag)) in seen.iter().enumerate().take(9) {
        assert_eq!(depth, i as u32);
        assert!(is_container);
        assert!(type_tag.is_some());
    }
    let (id, depth, is_container, _) = seen[9];
    assert_eq!(id, FourCC::from("DATA"));
    assert_eq!(depth, 9);
    assert!(!is_container);
}

// ---- scenario 3: CAT of three FORMs -----------------------------------

#[test]
fn cat_of_three_forms() {
    let forms: Vec<Vec<u8>> = (1..=3)
        .map(|n| {
            let tag = [b'T', b'S', b'T', b'0' + n];
            let dat = [b'D', b'A', b'T', b'0' + n];
            group_be(b"FORM", &tag, &[chunk_be(&dat, &[n; 2])])
        })
        .collect();
    let mut payload = Vec::new();
    for f in &forms {
        payload.extend_from_slice(f);
    }
    let data = chunk_be(b"CAT ", &payload);

    let mut cur = Cursor::new(data);
    let mut it = get_iterator(&mut cur).unwrap();
    let mut seen = Vec::new();
    while it.has_next() {
        let c = it.current();
        seen.push((c.header.id, c.depth, c.header.type_tag));
        it.advance().unwrap();
    }
    assert_eq!(
        seen,
        vec![
            (FourCC::CAT, 0, None),
            (FourCC::FORM, 1, Some(FourCC::from("TST1"))),
            (FourCC::from("DAT1"), 2, None),
            (FourCC::FORM, 1, Some(FourCC::from("TST2"))),
            (FourCC::from("DAT2"), 2, None),
            (FourCC::FORM, 1, Some(FourCC::from("TST3"))),
            (FourCC::from("DAT3"), 2, None),
        ]
    );
}

// ---- scenario 4: RF64 with an override table --------------------------

#[test]
fn rf64_with_override_table() {
    let mut ds64_payload = Vec::new();
    ds64_payload.extend_from_slice(&72u64.to_le_bytes()); // riff size
    ds64_payload.extend_from_slice(&0u64.to_le_bytes()); // data size
    ds64_payload.extend_from_slice(&0u64.to_le_bytes()); // sample count
    ds64_payload.extend_from_slice(&1u32.to_le_bytes()); // table count
    ds64_payload.extend_from_slice(b"data");
    ds64_payload.extend_from_slice(&1000u64.to_le_bytes());

    let mut data = Vec::new();
    data.extend_from_slice(b"RF64");
    data.extend_from_slice(&0xFFFF_FFFFu32.to_le_bytes());
    data.extend_from_slice(b"WAVE");
    data.extend_from_slice(&chunk_le(b"ds64", &ds64_payload));
    data.extend_from_slice(&chunk_le(b"fmt ", &[0u8; 16]));
    data.extend_from_slice(b"data");
    data.extend_from_slice(&0xFFFF_FFFFu32.to_le_bytes());

    let mut cur = Cursor::new(data);
    let mut it = get_iterator(&mut cur).unwrap();

    // ds64 never surfaces; the root already carries its authoritative size.
    let mut seen = Vec::new();
    while it.has_next() {
        let c = it.current();
        seen.push((c.header.id, c.header.size, c.header.type_tag));
        it.advance().unwrap();
    }
    assert_eq!(
        seen,
        vec![
            (FourCC::RF64, 72, Some(FourCC::from("WAVE"))),
            (FourCC::from("fmt "), 16, None),
            (FourCC::DATA, 1000, None),
        ]
    );
}

// ---- scenario 5: odd-size chunk with padding --------------------------

#[test]
fn odd_size_chunk_padding() {
    let data = group_be(b"FORM", b"TEST", &[chunk_be(b"ODD1", b"ABC")]);
    let total = data.len() as u64;
    let mut cur = Cursor::new(data);
    {
        let mut it = get_iterator(&mut cur).unwrap();
        it.advance().unwrap();
        let c = it.current();
        assert_eq!(c.header.id, FourCC::from("ODD1"));
        assert_eq!(c.header.size, 3);
        assert_eq!(c.padded_size, 4);
        {
            let mut r = it.reader().unwrap();
            let all = r.read_all().unwrap();
            assert_eq!(all.len(), 3);
            assert_eq!(all, b"ABC".as_ref());
        }
        it.advance().unwrap();
        assert!(it.at_end());
    }
    // The iterator consumed the pad byte: the cursor sits one past it, at
    // the end of the container.
    assert_eq!(cur.stream_position().unwrap(), total);
    assert_eq!(total, 12 + 8 + 3 + 1);
}

// ---- scenario 6: lenient clamping -------------------------------------

#[test]
fn lenient_clamping_of_oversize_chunks() {
    // A chunk declaring ten megabytes where one kilobyte actually follows.
    // The root keeps a size within the limit so only the liar is flagged.
    let mut data = b"RIFF".to_vec();
    data.extend_from_slice(&1024u32.to_le_bytes());
    data.extend_from_slice(b"WAVE");
    data.extend_from_slice(&chunk(b"big ", 10_000_000, &[7u8; 1024], false));
    data.extend_from_slice(&chunk_le(b"tail", &[1u8; 4]));

    let warnings = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&warnings);
    let options = ParseOptions::default()
        .strict(false)
        .with_max_chunk_size(1024)
        .with_warning_handler(move |offset, category, message| {
            sink.borrow_mut().push((offset, category.to_string(), message.to_string()));
        });

    let mut cur = Cursor::new(data);
    let mut seen = Vec::new();
    for_each_chunk_with_options(&mut cur, options, |chunk, reader| {
        seen.push((chunk.header.id, chunk.header.size, reader.remaining()));
        Ok(())
    })
    .unwrap();

    assert_eq!(
        seen,
        vec![
            (FourCC::from("big "), 1024, 1024),
            (FourCC::from("tail"), 4, 4),
        ]
    );
    let recorded = warnings.borrow();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].0, 12);
    assert_eq!(recorded[0].1, warning::SIZE_LIMIT);
    assert!(recorded[0].2.contains("big "), "{}", recorded[0].2);
}

// ---- structural properties --------------------------------------------

#[test]
fn children_account_for_the_container_size() {
    let children = [
        chunk_be(b"AAAA", &[0u8; 7]), // padded to 8
        chunk_be(b"BBBB", &[0u8; 10]),
        chunk_be(b"CCCC", &[0u8; 1]), // padded to 2
    ];
    let data = group_be(b"FORM", b"TEST", &children);
    let mut cur = Cursor::new(data);
    let mut it = get_iterator(&mut cur).unwrap();

    let declared = it.current().header.size;
    let mut sum = 4u64; // the type tag consumed from the payload
    it.advance().unwrap();
    while it.has_next() {
        sum += 8 + it.current().padded_size;
        it.advance().unwrap();
    }
    assert_eq!(sum, declared);
}

#[test]
fn depth_first_is_source_order() {
    let inner = group_be(b"FORM", b"INNR", &[chunk_be(b"DAT1", &[0u8; 2])]);
    let data = group_be(
        b"FORM",
        b"OUTR",
        &[inner, chunk_be(b"DAT2", &[0u8; 2]), chunk_be(b"DAT3", &[0u8; 2])],
    );
    let mut cur = Cursor::new(data);
    let mut it = get_iterator(&mut cur).unwrap();
    let mut offsets = Vec::new();
    while it.has_next() {
        offsets.push(it.current().header.file_offset);
        it.advance().unwrap();
    }
    let mut sorted = offsets.clone();
    sorted.sort_unstable();
    assert_eq!(offsets, sorted);
}

#[test]
fn fourcc_string_roundtrip() {
    for name in ["FORM", "fmt ", "ds64", "ABCD"] {
        let id = FourCC::from(name);
        assert_eq!(id.to_string(), name);
        assert_eq!(FourCC::from(id.to_string().as_str()), id);
    }
}

#[test]
fn scalar_decoding_roundtrips_through_both_orders() {
    use iff_parse::{ByteOrder, ByteSource};

    let value = 0x0123_4567_89AB_CDEFu64;
    let mut bytes = value.to_be_bytes().to_vec();
    bytes.extend_from_slice(&value.to_be_bytes());
    let mut cur = Cursor::new(bytes);
    let src: &mut dyn ByteSource = &mut cur;
    // Matching order recovers the value, the opposite order is a full swap.
    assert_eq!(src.read_u64(ByteOrder::Big).unwrap(), value);
    assert_eq!(src.read_u64(ByteOrder::Little).unwrap(), value.swap_bytes());

    let mut cur = Cursor::new(1234.5f32.to_le_bytes().to_vec());
    let src: &mut dyn ByteSource = &mut cur;
    assert_eq!(src.read_f32(ByteOrder::Little).unwrap(), 1234.5);
}

// ---- event-driven parsing ---------------------------------------------

#[test]
fn handler_precedence_across_a_real_walk() {
    let info = {
        let mut payload = b"INFO".to_vec();
        payload.extend_from_slice(&chunk_le(b"IART", b"artist\0\0"));
        chunk_le(b"LIST", &payload)
    };
    let data = riff_le(
        b"RIFF",
        b"WAVE",
        &[chunk_le(b"fmt ", &[0u8; 16]), info, chunk_le(b"data", &[0u8; 4])],
    );

    let calls = Rc::new(RefCell::new(Vec::new()));
    let mut handlers = HandlerRegistry::new();

    let sink = Rc::clone(&calls);
    handlers.on_chunk(FourCC::from("IART"), move |event, _| {
        if event.kind == ChunkEventKind::Begin {
            sink.borrow_mut().push("global");
        }
    });
    let sink = Rc::clone(&calls);
    handlers.on_chunk_in_container(FourCC::LIST, FourCC::from("IART"), move |event, _| {
        if event.kind == ChunkEventKind::Begin {
            sink.borrow_mut().push("in-list");
        }
    });
    let sink = Rc::clone(&calls);
    handlers.on_chunk_in_form(FourCC::from("WAVE"), FourCC::from("IART"), move |event, reader| {
        if event.kind == ChunkEventKind::Begin {
            let text = reader.expect("begin carries a reader").read_string(8).unwrap();
            assert_eq!(text, "artist");
            sink.borrow_mut().push("in-form");
        }
    });

    let mut cur = Cursor::new(data);
    parse(&mut cur, &mut handlers).unwrap();
    assert_eq!(*calls.borrow(), vec!["in-form", "in-list", "global"]);
}

#[test]
fn events_arrive_in_traversal_order() {
    let data = riff_le(
        b"RIFF",
        b"WAVE",
        &[chunk_le(b"one ", &[0u8; 2]), chunk_le(b"two ", &[0u8; 2])],
    );
    let log = Rc::new(RefCell::new(Vec::new()));
    let mut handlers = HandlerRegistry::new();
    for id in [FourCC::from("one "), FourCC::from("two ")] {
        let sink = Rc::clone(&log);
        handlers.on_chunk(id, move |event, _| {
            sink.borrow_mut().push((event.header.id, event.kind));
        });
    }
    let mut cur = Cursor::new(data);
    parse(&mut cur, &mut handlers).unwrap();
    assert_eq!(
        *log.borrow(),
        vec![
            (FourCC::from("one "), ChunkEventKind::Begin),
            (FourCC::from("one "), ChunkEventKind::End),
            (FourCC::from("two "), ChunkEventKind::Begin),
            (FourCC::from("two "), ChunkEventKind::End),
        ]
    );
}

// ---- error surfaces ----------------------------------------------------

#[test]
fn unknown_root_names_the_identifier() {
    let mut cur = Cursor::new(b"MIDI\x00\x00\x00\x00".to_vec());
    match get_iterator(&mut cur) {
        Err(Error::Parse(msg)) => assert!(msg.contains("MIDI"), "{msg}"),
        other => panic!("expected a parse error, got {other:?}"),
    }
}

#[test]
fn strict_size_limit_breach_names_chunk_and_offset() {
    // A chunk lying about its size inside an otherwise consistent root.
    let mut data = Vec::new();
    data.extend_from_slice(b"RIFF");
    data.extend_from_slice(&32u32.to_le_bytes());
    data.extend_from_slice(b"WAVE");
    data.extend_from_slice(b"data");
    data.extend_from_slice(&9_999_999u32.to_le_bytes());
    data.extend_from_slice(&[0u8; 20]);

    let options = ParseOptions::default().with_max_chunk_size(1024);
    let mut cur = Cursor::new(data);
    let mut it = get_iterator_with_options(&mut cur, options).unwrap();
    let err = it.advance().unwrap_err();
    match err {
        Error::Parse(msg) => {
            assert!(msg.contains("data"), "{msg}");
            assert!(msg.contains("12"), "{msg}");
            assert!(msg.contains("1024"), "{msg}");
        }
        other => panic!("expected a parse error, got {other:?}"),
    }
}

#[test]
fn unconsumed_payloads_are_skipped() {
    // The walk never touches the readers; the iterator still lands each
    // chunk boundary correctly.
    let data = riff_le(
        b"RIFF",
        b"WAVE",
        &[
            chunk_le(b"aaaa", &[0u8; 11]),
            chunk_le(b"bbbb", &[0u8; 7]),
            chunk_le(b"cccc", &[0u8; 2]),
        ],
    );
    let mut cur = Cursor::new(data);
    let mut seen = Vec::new();
    for_each_chunk(&mut cur, |chunk, _| {
        seen.push(chunk.header.id);
        Ok(())
    })
    .unwrap();
    assert_eq!(
        seen,
        vec![FourCC::from("aaaa"), FourCC::from("bbbb"), FourCC::from("cccc")]
    );
}
