//! Label/value table lookups on the game page.
//!
//! The game page lays metadata out as `<tr><th>Label</th><td>value</td></tr>`
//! rows. Some values sit inside a link in the cell, and the two players share
//! the same `Players` label, so they are picked by position.

use scraper::{ElementRef, Html};
use shogi_core::Metadata;
use tracing::debug;

use crate::ExtractError;

/// How a field name is resolved against the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldQuery<'a> {
    /// Exact text of the row's `th` cell.
    pub header: &'a str,
    /// Restrict to rows that are the n-th matching row (0-based) among their
    /// siblings. `None` searches all of them.
    pub row: Option<usize>,
    /// Read the text of an `a` element inside the value cell instead of the cell itself.
    pub through_link: bool,
}

impl<'a> FieldQuery<'a> {
    fn text(header: &'a str) -> Self {
        Self {
            header,
            row: None,
            through_link: false,
        }
    }

    fn link(header: &'a str) -> Self {
        Self {
            header,
            row: None,
            through_link: true,
        }
    }

    fn nth_row(mut self, row: usize) -> Self {
        self.row = Some(row);
        self
    }
}

pub fn query_for(field_name: &str) -> FieldQuery<'_> {
    match field_name {
        "tournament" => FieldQuery::link("Tournaments"),
        "player1" => FieldQuery::link("Players").nth_row(0),
        "player2" => FieldQuery::link("Players").nth_row(1),
        "handicap" => FieldQuery::text("Handicap"),
        "strategy" => FieldQuery::link("Strategy"),
        other => FieldQuery::text(other),
    }
}

pub fn parse_document(html: &str) -> Html {
    Html::parse_document(html)
}

/// Runs `query` and returns the first matching text node, trimmed.
pub fn select_field(document: &Html, query: FieldQuery<'_>) -> Option<String> {
    document
        .select(selector!("tr"))
        .filter(|row| has_header(*row, query.header))
        .filter(|row| match query.row {
            Some(n) => matching_rows_before(*row, query.header) == n,
            None => true,
        })
        .flat_map(|row| child_elements(row, "td"))
        .flat_map(|cell| {
            if query.through_link {
                child_elements(cell, "a")
            } else {
                vec![cell]
            }
        })
        .find_map(first_text_child)
        .map(|text| text.trim().to_string())
}

/// Lenient lookup: a field the page does not carry comes back as `""`.
pub fn extract_field(document: &Html, field_name: &str) -> String {
    let value = select_field(document, query_for(field_name)).unwrap_or_default();
    debug!(field = field_name, value = %value, "extracted field");
    value
}

pub fn extract_field_strict(document: &Html, field_name: &str) -> Result<String, ExtractError> {
    let value = select_field(document, query_for(field_name))
        .ok_or_else(|| ExtractError::MissingField(field_name.to_string()))?;
    debug!(field = field_name, value = %value, "extracted field");
    Ok(value)
}

/// Everything the record builder reads off the game page.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExtractedFields {
    pub strategy: String,
    pub metadata: Metadata,
}

pub fn extract_fields(document: &Html, strict: bool) -> Result<ExtractedFields, ExtractError> {
    let get = |name: &str| -> Result<String, ExtractError> {
        if strict {
            extract_field_strict(document, name)
        } else {
            Ok(extract_field(document, name))
        }
    };

    Ok(ExtractedFields {
        strategy: get("strategy")?,
        metadata: Metadata {
            tournament: get("tournament")?,
            tournament_detail: get("tournament_detail")?,
            player1: get("player1")?,
            player2: get("player2")?,
            handicap: get("handicap")?,
            place: get("place")?,
            time: get("time")?,
        },
    })
}

fn has_header(row: ElementRef<'_>, header: &str) -> bool {
    child_elements(row, "th")
        .into_iter()
        .any(|th| th.text().collect::<String>() == header)
}

/// Matching header rows among the preceding siblings of `row`.
fn matching_rows_before(row: ElementRef<'_>, header: &str) -> usize {
    row.prev_siblings()
        .filter_map(ElementRef::wrap)
        .filter(|sibling| sibling.value().name() == "tr" && has_header(*sibling, header))
        .count()
}

fn child_elements<'a>(parent: ElementRef<'a>, name: &str) -> Vec<ElementRef<'a>> {
    parent
        .children()
        .filter_map(ElementRef::wrap)
        .filter(|el| el.value().name() == name)
        .collect()
}

fn first_text_child(element: ElementRef<'_>) -> Option<String> {
    element.children().find_map(|node| {
        node.value().as_text().map(|text| {
            let text: &str = text;
            text.to_string()
        })
    })
}
