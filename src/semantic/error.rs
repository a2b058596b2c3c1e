//! Error types for metric classification and dependency analysis.

use std::fmt;

/// Result type for semantic operations.
pub type SemanticResult<T> = Result<T, SemanticError>;

/// Error returned when metric dependencies form a cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct DependencyCycleError {
    /// Cycles found, each as the metric names involved.
    pub cycles: Vec<Vec<String>>,
}

impl fmt::Display for DependencyCycleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Circular dependencies detected between metrics:")?;
        for (i, cycle) in self.cycles.iter().enumerate() {
            writeln!(f, "  Cycle {}: {} → (back to start)", i + 1, cycle.join(" → "))?;
        }
        Ok(())
    }
}

impl std::error::Error for DependencyCycleError {}

#[derive(Debug, Clone, PartialEq)]
pub enum SemanticError {
    /// A dependency edge points at an id that is not in the graph.
    UnknownMetric(String),

    /// A derived or composite metric references itself.
    SelfReference(String),

    /// Dependencies between metrics form one or more cycles.
    DependencyCycle(DependencyCycleError),
}

impl fmt::Display for SemanticError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SemanticError::UnknownMetric(id) => {
                write!(f, "Unknown metric: '{}'", id)
            }
            SemanticError::SelfReference(name) => {
                write!(f, "Metric '{}' references itself", name)
            }
            SemanticError::DependencyCycle(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for SemanticError {}

impl From<DependencyCycleError> for SemanticError {
    fn from(err: DependencyCycleError) -> Self {
        SemanticError::DependencyCycle(err)
    }
}
