//! Extraction of game metadata, board encodings and engine candidates.

#[macro_use]
mod macros;

pub mod fields;
pub mod report;
pub mod sfen;

use thiserror::Error;

pub use fields::{extract_field, extract_field_strict, extract_fields, ExtractedFields};
pub use report::{parse_candidate_line, parse_report};
pub use sfen::decode_sfen;

pub const CRATE_NAME: &str = "shogi-extract";

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("field `{0}` not found in document")]
    MissingField(String),
    #[error("malformed candidate line{}: missing `{marker}` in {line:?}", at_line(.line_no))]
    MalformedCandidateLine {
        line_no: Option<usize>,
        marker: &'static str,
        line: String,
    },
    #[error("url has no `sfen` parameter: {url}")]
    MissingSfen { url: String },
}

fn at_line(line_no: &Option<usize>) -> String {
    match line_no {
        Some(n) => format!(" at line {n}"),
        None => String::new(),
    }
}
