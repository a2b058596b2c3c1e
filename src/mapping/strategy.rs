//! Ordered column-name match strategies.

use std::collections::BTreeMap;
use std::fmt;

use inflector::Inflector;
use serde::{Deserialize, Serialize};

use crate::model::Confidence;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStrategy {
    Exact,
    CaseInsensitive,
    SnakeCase,
    CamelCase,
}

impl MatchStrategy {
    /// Strategies in the order they are tried by default.
    pub const DEFAULT_ORDER: [MatchStrategy; 4] = [
        MatchStrategy::Exact,
        MatchStrategy::CaseInsensitive,
        MatchStrategy::SnakeCase,
        MatchStrategy::CamelCase,
    ];

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "exact" => Some(MatchStrategy::Exact),
            "case_insensitive" => Some(MatchStrategy::CaseInsensitive),
            "snake_case" | "snake" => Some(MatchStrategy::SnakeCase),
            "camel_case" | "camel" => Some(MatchStrategy::CamelCase),
            _ => None,
        }
    }

    /// Only an exact match is HIGH; normalised matches are MEDIUM.
    pub fn confidence(&self) -> Confidence {
        match self {
            MatchStrategy::Exact => Confidence::High,
            _ => Confidence::Medium,
        }
    }

    pub fn matches(&self, column: &str, key: &str) -> bool {
        match self {
            MatchStrategy::Exact => column == key,
            MatchStrategy::CaseInsensitive => column.eq_ignore_ascii_case(key),
            MatchStrategy::SnakeCase => column.to_snake_case() == key.to_snake_case(),
            MatchStrategy::CamelCase => column.to_camel_case() == key.to_camel_case(),
        }
    }
}

impl fmt::Display for MatchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MatchStrategy::Exact => "exact",
            MatchStrategy::CaseInsensitive => "case_insensitive",
            MatchStrategy::SnakeCase => "snake_case",
            MatchStrategy::CamelCase => "camel_case",
        };
        write!(f, "{}", s)
    }
}

/// A column matched against a mapping's column → property table.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnMatch<'a> {
    pub strategy: MatchStrategy,
    /// Column name as written in the mapping.
    pub column: &'a str,
    pub property: &'a str,
}

/// First match of `column` in `columns`, trying each strategy in turn over
/// every mapped column before moving to the next strategy.
pub fn match_column<'a>(
    strategies: &[MatchStrategy],
    column: &str,
    columns: &'a BTreeMap<String, String>,
) -> Option<ColumnMatch<'a>> {
    strategies.iter().find_map(|strategy| {
        columns
            .iter()
            .find(|(key, _)| strategy.matches(column, key))
            .map(|(key, property)| ColumnMatch {
                strategy: *strategy,
                column: key.as_str(),
                property: property.as_str(),
            })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn columns(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_exact_beats_normalised() {
        let map = columns(&[("Amount", "amountValue"), ("amount", "amount")]);
        let hit = match_column(&MatchStrategy::DEFAULT_ORDER, "amount", &map).unwrap();
        assert_eq!(hit.strategy, MatchStrategy::Exact);
        assert_eq!(hit.property, "amount");
        assert_eq!(hit.strategy.confidence(), Confidence::High);
    }

    #[test]
    fn test_snake_matches_camel_key() {
        let map = columns(&[("userId", "user")]);
        let hit = match_column(&MatchStrategy::DEFAULT_ORDER, "user_id", &map).unwrap();
        assert_eq!(hit.strategy, MatchStrategy::SnakeCase);
        assert_eq!(hit.strategy.confidence(), Confidence::Medium);
    }

    #[test]
    fn test_strategy_order_is_configurable() {
        let map = columns(&[("userId", "user")]);
        assert!(match_column(&[MatchStrategy::Exact], "user_id", &map).is_none());
        assert_eq!(MatchStrategy::from_str("camel-case"), Some(MatchStrategy::CamelCase));
        assert_eq!(MatchStrategy::from_str("fuzzy"), None);
    }
}
