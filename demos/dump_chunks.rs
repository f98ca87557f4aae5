//! Dump the chunk tree of an IFF/RIFF family file.
//!
//! ```text
//! cargo run --example dump_chunks -- audio.wav
//! ```

use std::env;
use std::fs::File;
use std::process::ExitCode;

use iff_parse::{get_iterator_with_options, ParseOptions};

fn main() -> ExitCode {
    env_logger::init();

    let Some(path) = env::args().nth(1) else {
        eprintln!("usage: dump_chunks <file>");
        return ExitCode::FAILURE;
    };

    let mut file = match File::open(&path) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("{path}: {e}");
            return ExitCode::FAILURE;
        }
    };

    let options = ParseOptions::default()
        .strict(false)
        .with_warning_handler(|offset, category, message| {
            eprintln!("warning [{category}] at {offset}: {message}");
        });

    let mut it = match get_iterator_with_options(&mut file, options) {
        Ok(it) => it,
        Err(e) => {
            eprintln!("{path}: {e}");
            return ExitCode::FAILURE;
        }
    };

    while it.has_next() {
        let chunk = it.current();
        let indent = "  ".repeat(chunk.depth as usize);
        let kind = match chunk.header.type_tag {
            Some(tag) => format!("{}:{tag}", chunk.header.id),
            None => chunk.header.id.to_string(),
        };
        let mut context = String::new();
        if let Some(form) = chunk.form_type {
            context.push_str(&format!("  form={form}"));
        }
        if let Some(container) = chunk.container {
            context.push_str(&format!("  in={container}"));
        }
        println!(
            "{indent}[{:>8}] {kind}  {} bytes{context}",
            chunk.header.file_offset, chunk.header.size
        );

        if let Err(e) = it.advance() {
            eprintln!("{path}: {e}");
            return ExitCode::FAILURE;
        }
    }
    ExitCode::SUCCESS
}
