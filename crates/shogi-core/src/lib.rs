//! Core record model for the shogi problem archive.

use std::str::FromStr;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "shogi-core";

/// Value of the `type` tag carried by every archived record.
pub const RECORD_TYPE: &str = "shogi_problem";

/// One archived game-analysis entry built from a single input report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub strategy: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub position: Position,
    pub analysis: Analysis,
    pub metadata: Metadata,
}

impl Record {
    pub fn new(
        id: impl Into<String>,
        strategy: impl Into<String>,
        position: Position,
        analysis: Analysis,
        metadata: Metadata,
    ) -> Self {
        Self {
            id: id.into(),
            strategy: strategy.into(),
            kind: RECORD_TYPE.to_string(),
            position,
            analysis,
            metadata,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    /// Decoded board state taken from the source URL's `sfen` parameter.
    #[serde(rename = "sfen")]
    pub board_encoding: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Analysis {
    pub url: String,
    pub candidates: Vec<Candidate>,
}

/// One engine line reported for the position under review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub number: u32,
    pub time: String,
    pub depth: String,
    pub nodes: u64,
    pub evaluation: i64,
    /// Move tokens joined by commas.
    pub best_line: String,
}

/// Game metadata scraped from the source page. Absent values are empty strings.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Metadata {
    pub tournament: String,
    pub tournament_detail: String,
    pub player1: String,
    pub player2: String,
    pub handicap: String,
    pub place: String,
    pub time: String,
}

/// Granularity of wall-clock record ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdResolution {
    /// `%Y%m%d%H%M%S`. Two records built within the same second share an id.
    #[default]
    Seconds,
    /// `%Y%m%d%H%M%S%3f`.
    Millis,
}

impl IdResolution {
    pub fn format_id(self, at: DateTime<Local>) -> String {
        match self {
            IdResolution::Seconds => at.format("%Y%m%d%H%M%S").to_string(),
            IdResolution::Millis => at.format("%Y%m%d%H%M%S%3f").to_string(),
        }
    }
}

impl FromStr for IdResolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "seconds" | "s" => Ok(IdResolution::Seconds),
            "millis" | "ms" => Ok(IdResolution::Millis),
            other => Err(format!("unknown id resolution `{other}`")),
        }
    }
}

/// Source of local wall-clock time used for record ids.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Local>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_record() -> Record {
        Record::new(
            "20240102030405",
            "Ranging Rook",
            Position {
                board_encoding: "lnsgkgsnl/9/9/9/9/9/9/9/LNSGKGSNL b - 1".to_string(),
            },
            Analysis {
                url: "https://example.test/game?sfen=x".to_string(),
                candidates: vec![Candidate {
                    number: 1,
                    time: "00:01".to_string(),
                    depth: "10".to_string(),
                    nodes: 12345,
                    evaluation: -50,
                    best_line: "7g7f,8c8d".to_string(),
                }],
            },
            Metadata::default(),
        )
    }

    #[test]
    fn second_resolution_ids_are_fourteen_digits() {
        let at = Local.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).single().unwrap();
        let id = IdResolution::Seconds.format_id(at);
        assert_eq!(id, "20240102030405");
    }

    #[test]
    fn millisecond_ids_append_three_digits() {
        let at = Local.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).single().unwrap()
            + chrono::Duration::milliseconds(42);
        assert_eq!(IdResolution::Millis.format_id(at), "20240102030405042");
    }

    #[test]
    fn id_resolution_parses_from_config_strings() {
        assert_eq!("seconds".parse::<IdResolution>(), Ok(IdResolution::Seconds));
        assert_eq!(" Millis ".parse::<IdResolution>(), Ok(IdResolution::Millis));
        assert!("hours".parse::<IdResolution>().is_err());
    }

    #[test]
    fn record_serializes_with_archive_key_names() {
        let value = serde_json::to_value(sample_record()).unwrap();
        assert_eq!(value["type"], "shogi_problem");
        assert_eq!(
            value["position"]["sfen"],
            "lnsgkgsnl/9/9/9/9/9/9/9/LNSGKGSNL b - 1"
        );
        assert_eq!(value["analysis"]["candidates"][0]["best_line"], "7g7f,8c8d");
        assert_eq!(value["analysis"]["candidates"][0]["evaluation"], -50);
        assert_eq!(value["metadata"]["player2"], "");
    }
}
