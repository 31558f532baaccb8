//! Engine candidate lines in analysis reports.
//!
//! A candidate line looks like
//! `検討 候補1 時間 00:01 深さ 10 ノード数 12345 評価値 -50 読み筋 7g7f 8c8d`.

use std::str::FromStr;

use regex::Regex;
use shogi_core::Candidate;

use crate::ExtractError;

const REVIEW_MARKER: &str = "検討";
const CANDIDATE_MARKER: &str = "候補";

pub fn is_candidate_line(line: &str) -> bool {
    line.contains(REVIEW_MARKER) && line.contains(CANDIDATE_MARKER)
}

/// Returns `Ok(None)` for lines that are not candidate lines. A candidate
/// line missing any of its fields is an error.
pub fn parse_candidate_line(line: &str) -> Result<Option<Candidate>, ExtractError> {
    if !is_candidate_line(line) {
        return Ok(None);
    }

    let number = capture(line, regex!(r"候補([0-9０-９]+)"), "候補")?;
    let time = capture(line, regex!(r"時間 (\S+)"), "時間")?;
    let depth = capture(line, regex!(r"深さ (\S+)"), "深さ")?;
    let nodes = capture(line, regex!(r"ノード数 ([0-9０-９]+)"), "ノード数")?;
    let evaluation = capture(line, regex!(r"評価値 (-?[0-9０-９]+)"), "評価値")?;
    let best_line = capture(line, regex!(r"読み筋 (.+)$"), "読み筋")?;

    Ok(Some(Candidate {
        number: parse_int(number, "候補", line)?,
        time: time.to_string(),
        depth: depth.to_string(),
        nodes: parse_int(nodes, "ノード数", line)?,
        evaluation: parse_int(evaluation, "評価値", line)?,
        best_line: best_line.replace(' ', ","),
    }))
}

/// Parses every line of a report in order, keeping only candidate lines.
pub fn parse_report(text: &str) -> Result<Vec<Candidate>, ExtractError> {
    let mut candidates = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        match parse_candidate_line(line) {
            Ok(Some(candidate)) => candidates.push(candidate),
            Ok(None) => {}
            Err(ExtractError::MalformedCandidateLine { marker, line, .. }) => {
                return Err(ExtractError::MalformedCandidateLine {
                    line_no: Some(idx + 1),
                    marker,
                    line,
                });
            }
            Err(other) => return Err(other),
        }
    }
    Ok(candidates)
}

fn capture<'a>(
    line: &'a str,
    pattern: &Regex,
    marker: &'static str,
) -> Result<&'a str, ExtractError> {
    pattern
        .captures(line)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .ok_or_else(|| malformed(marker, line))
}

fn parse_int<T: FromStr>(value: &str, marker: &'static str, line: &str) -> Result<T, ExtractError> {
    ascii_digits(value)
        .parse()
        .map_err(|_| malformed(marker, line))
}

/// Folds full-width digits (U+FF10..U+FF19) onto ASCII.
fn ascii_digits(value: &str) -> String {
    value
        .chars()
        .map(|c| match c {
            '０'..='９' => char::from(b'0' + (c as u32 - '０' as u32) as u8),
            other => other,
        })
        .collect()
}

fn malformed(marker: &'static str, line: &str) -> ExtractError {
    ExtractError::MalformedCandidateLine {
        line_no: None,
        marker,
        line: line.to_string(),
    }
}
