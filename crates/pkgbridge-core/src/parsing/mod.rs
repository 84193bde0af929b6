//! Reusable line-parsing strategies shared by the backend parsers.
//!
//! Backends describe their output (header columns, delimiter, noise tokens)
//! and feed lines through these helpers instead of carrying their own copies
//! of the same scanning loops.

pub mod key_value;
pub mod naming;
pub mod table;

pub use key_value::{KeyValues, key_value_lines};
pub use naming::{ELLIPSIS, format_as_name, strip_ellipsis, truncated};
pub use table::{
    HeaderTable, NoiseFilter, TableRow, is_dashes, split_delimited, split_runs, split_whitespace,
};

/// Incremental parser fed one stdout line at a time.
pub trait LineParser: Send {
    type Output;

    fn push(&mut self, line: &str);

    fn finish(self) -> Self::Output;
}

/// Runs a parser over already captured text.
pub fn parse_text<P: LineParser>(mut parser: P, text: &str) -> P::Output {
    for line in text.lines() {
        parser.push(line);
    }
    parser.finish()
}
