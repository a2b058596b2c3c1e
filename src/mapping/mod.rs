//! Ontology alignment.
//!
//! Field references collected from a plan are matched against the table
//! mappings of the ontology. Each column is tried against the configured
//! [`MatchStrategy`] list in order; the first strategy that hits decides the
//! confidence of the mapping.

pub mod resolver;
pub mod strategy;

pub use resolver::{
    collect_field_references, strip_time_function, FieldMapping, FieldReference, FieldRole,
    MappingResolver, MappingResult, ObjectJoinPath, TableMappings, UnmappedField,
};
pub use strategy::{match_column, ColumnMatch, MatchStrategy};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MappingError {
    #[error("Unknown match strategy '{0}'")]
    UnknownStrategy(String),
}

/// Parse a configured strategy list, keeping its order.
pub fn parse_strategies<S: AsRef<str>>(names: &[S]) -> Result<Vec<MatchStrategy>, MappingError> {
    names
        .iter()
        .map(|name| {
            let name = name.as_ref();
            MatchStrategy::from_str(name).ok_or_else(|| MappingError::UnknownStrategy(name.to_string()))
        })
        .collect()
}
