//! Fixed review-dataset schema and positional CSV record decoding.
//!
//! Every row has exactly [`SCHEMA_FIELDS`]`.len()` comma-delimited fields:
//!
//! | Position | Field        | Type    | Default |
//! |----------|--------------|---------|---------|
//! | 0        | `content`    | string  | `""`    |
//! | 1        | `id`         | integer | `0`     |
//! | 2..=21   | aspect label | integer | `-2`    |
//! | 22       | `content_ws` | string  | `""`    |
//!
//! Rows are decoded by position; the header names are never consulted.

use crate::{AspectError, Result};
use serde::{Deserialize, Serialize};

/// Number of aspect label columns.
pub const ASPECT_COUNT: usize = 20;

/// Default for a blank `id` field.
pub const DEFAULT_ID: i64 = 0;

/// Default for a blank aspect label ("not mentioned").
pub const DEFAULT_LABEL: i64 = -2;

/// Field names in schema order.
pub const SCHEMA_FIELDS: [&str; ASPECT_COUNT + 3] = [
    "content",
    "id",
    "location_traffic_convenience",
    "location_distance_from_business_district",
    "location_easy_to_find",
    "service_wait_time",
    "service_waiters_attitude",
    "service_parking_convenience",
    "service_serving_speed",
    "price_level",
    "price_cost_effective",
    "price_discount",
    "environment_decoration",
    "environment_noise",
    "environment_space",
    "environment_cleaness",
    "dish_portion",
    "dish_taste",
    "dish_look",
    "dish_recommendation",
    "others_overall_experience",
    "others_willing_to_consume_again",
    "content_ws",
];

const CONTENT_POS: usize = 0;
const ID_POS: usize = 1;
const FIRST_ASPECT_POS: usize = 2;
const CONTENT_WS_POS: usize = FIRST_ASPECT_POS + ASPECT_COUNT;

/// One labeled aspect column, i.e. one classifier target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AspectColumn {
    LocationTrafficConvenience,
    LocationDistanceFromBusinessDistrict,
    LocationEasyToFind,
    ServiceWaitTime,
    ServiceWaitersAttitude,
    ServiceParkingConvenience,
    ServiceServingSpeed,
    PriceLevel,
    PriceCostEffective,
    PriceDiscount,
    EnvironmentDecoration,
    EnvironmentNoise,
    EnvironmentSpace,
    EnvironmentCleaness,
    DishPortion,
    DishTaste,
    DishLook,
    DishRecommendation,
    OthersOverallExperience,
    OthersWillingToConsumeAgain,
}

impl AspectColumn {
    /// All targets, in schema order.
    pub const ALL: [AspectColumn; ASPECT_COUNT] = [
        Self::LocationTrafficConvenience,
        Self::LocationDistanceFromBusinessDistrict,
        Self::LocationEasyToFind,
        Self::ServiceWaitTime,
        Self::ServiceWaitersAttitude,
        Self::ServiceParkingConvenience,
        Self::ServiceServingSpeed,
        Self::PriceLevel,
        Self::PriceCostEffective,
        Self::PriceDiscount,
        Self::EnvironmentDecoration,
        Self::EnvironmentNoise,
        Self::EnvironmentSpace,
        Self::EnvironmentCleaness,
        Self::DishPortion,
        Self::DishTaste,
        Self::DishLook,
        Self::DishRecommendation,
        Self::OthersOverallExperience,
        Self::OthersWillingToConsumeAgain,
    ];

    /// Index among the aspect columns (0-based).
    #[must_use]
    pub fn index(self) -> usize {
        self as usize
    }

    /// Position of this column in the CSV row.
    #[must_use]
    pub fn position(self) -> usize {
        FIRST_ASPECT_POS + self.index()
    }

    /// Column name as it appears in the CSV header.
    #[must_use]
    pub fn name(self) -> &'static str {
        SCHEMA_FIELDS[self.position()]
    }
}

impl std::fmt::Display for AspectColumn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for AspectColumn {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.name() == s)
            .ok_or_else(|| format!("unknown aspect column: {s}"))
    }
}

/// A decoded CSV row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AspectRecord {
    /// Raw review text.
    pub content: String,
    /// Review identifier.
    pub id: i64,
    /// Aspect labels, indexed by [`AspectColumn::index`].
    pub aspects: [i64; ASPECT_COUNT],
    /// Whitespace-split tokens of the segmented review text.
    pub tokens: Vec<String>,
}

impl AspectRecord {
    /// Raw label for `target`.
    #[must_use]
    pub fn label(&self, target: AspectColumn) -> i64 {
        self.aspects[target.index()]
    }
}

/// Decodes single CSV lines into [`AspectRecord`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordParser;

impl RecordParser {
    /// Parse one CSV line that is not tied to a file position.
    ///
    /// # Errors
    ///
    /// Returns [`AspectError::Schema`] if the line does not have exactly the schema's
    /// field count or an integer field does not parse.
    pub fn parse(line: &str) -> Result<AspectRecord> {
        Self::parse_at(line, 0)
    }

    /// Parse one CSV line, reporting `line_no` in any schema error.
    ///
    /// # Errors
    ///
    /// See [`RecordParser::parse`].
    pub fn parse_at(line: &str, line_no: usize) -> Result<AspectRecord> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .delimiter(b',')
            .flexible(true)
            .from_reader(line.as_bytes());

        let mut row = csv::StringRecord::new();
        if !reader.read_record(&mut row)? {
            return Err(schema_error(line_no, "empty line".to_string()));
        }
        if row.len() != SCHEMA_FIELDS.len() {
            return Err(schema_error(
                line_no,
                format!(
                    "expected {} fields, found {}",
                    SCHEMA_FIELDS.len(),
                    row.len()
                ),
            ));
        }

        let mut aspects = [DEFAULT_LABEL; ASPECT_COUNT];
        for column in AspectColumn::ALL {
            aspects[column.index()] = int_field(&row, column.position(), DEFAULT_LABEL, line_no)?;
        }

        Ok(AspectRecord {
            content: row[CONTENT_POS].to_string(),
            id: int_field(&row, ID_POS, DEFAULT_ID, line_no)?,
            aspects,
            tokens: row[CONTENT_WS_POS]
                .split_whitespace()
                .map(str::to_string)
                .collect(),
        })
    }
}

fn int_field(row: &csv::StringRecord, pos: usize, default: i64, line_no: usize) -> Result<i64> {
    let raw = row[pos].trim();
    if raw.is_empty() {
        return Ok(default);
    }
    raw.parse::<i64>().map_err(|e| {
        schema_error(
            line_no,
            format!("field {} is not an integer ({raw:?}): {e}", SCHEMA_FIELDS[pos]),
        )
    })
}

fn schema_error(line: usize, message: String) -> AspectError {
    AspectError::Schema { line, message }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a row with every aspect set to `fill`, overriding `content_ws`.
    fn row(fill: &str, content_ws: &str) -> String {
        let mut fields = vec!["\"great, cheap\"".to_string(), "7".to_string()];
        fields.extend(std::iter::repeat(fill.to_string()).take(ASPECT_COUNT));
        fields.push(content_ws.to_string());
        fields.join(",")
    }

    #[test]
    fn test_schema_shape() {
        assert_eq!(SCHEMA_FIELDS.len(), 23);
        assert_eq!(AspectColumn::ALL.len(), 20);
        assert_eq!(SCHEMA_FIELDS[0], "content");
        assert_eq!(SCHEMA_FIELDS[22], "content_ws");
    }

    #[test]
    fn test_column_names_follow_schema_order() {
        for (i, column) in AspectColumn::ALL.into_iter().enumerate() {
            assert_eq!(column.index(), i);
            assert_eq!(column.name(), SCHEMA_FIELDS[i + 2]);
        }
        assert_eq!(
            AspectColumn::ServiceWaitTime.name(),
            "service_wait_time"
        );
    }

    #[test]
    fn test_column_from_str() {
        assert_eq!(
            "dish_look".parse::<AspectColumn>().unwrap(),
            AspectColumn::DishLook
        );
        assert!("content".parse::<AspectColumn>().is_err());
        assert!("content_ws".parse::<AspectColumn>().is_err());
    }

    #[test]
    fn test_parse_full_row() {
        let record = RecordParser::parse(&row("1", "好吃 便宜 good")).unwrap();
        assert_eq!(record.content, "great, cheap");
        assert_eq!(record.id, 7);
        assert!(record.aspects.iter().all(|&l| l == 1));
        assert_eq!(record.tokens, vec!["好吃", "便宜", "good"]);
    }

    #[test]
    fn test_blank_integers_take_defaults() {
        let mut fields = vec![String::new(), String::new()];
        fields.extend(std::iter::repeat(String::new()).take(ASPECT_COUNT));
        fields.push("a b".to_string());
        let record = RecordParser::parse(&fields.join(",")).unwrap();
        assert_eq!(record.id, DEFAULT_ID);
        assert!(record.aspects.iter().all(|&l| l == DEFAULT_LABEL));
    }

    #[test]
    fn test_label_by_column() {
        let mut fields = vec!["c".to_string(), "1".to_string()];
        let mut labels = vec!["-2".to_string(); ASPECT_COUNT];
        labels[AspectColumn::PriceLevel.index()] = "-1".to_string();
        fields.extend(labels);
        fields.push("x".to_string());
        let record = RecordParser::parse(&fields.join(",")).unwrap();
        assert_eq!(record.label(AspectColumn::PriceLevel), -1);
        assert_eq!(record.label(AspectColumn::PriceDiscount), -2);
    }

    #[test]
    fn test_wrong_field_count_is_error() {
        let err = RecordParser::parse_at("a,1,2", 5).unwrap_err();
        match err {
            AspectError::Schema { line, message } => {
                assert_eq!(line, 5);
                assert!(message.contains("expected 23 fields, found 3"));
            }
            other => panic!("expected Schema error, got {other:?}"),
        }
    }

    #[test]
    fn test_non_integer_label_is_error() {
        let err = RecordParser::parse(&row("yes", "a")).unwrap_err();
        assert!(err.to_string().contains("location_traffic_convenience"));
    }

    #[test]
    fn test_empty_content_ws_has_no_tokens() {
        let record = RecordParser::parse(&row("0", "   ")).unwrap();
        assert!(record.tokens.is_empty());
    }
}
