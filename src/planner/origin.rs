//! Column-origin oracle.
//!
//! Answers "which base-table column(s) does output field *i* of this
//! operator come from", together with the chain of expression texts the
//! value passed through on the way up (outermost first).
//!
//! # Derivability
//!
//! Origins cannot be derived across a `Correlate`: the right side may read
//! correlation variables from the left row, so `origins_of` returns `None`
//! there. Callers that need an answer anyway trace manually (see
//! `lineage::extractor`).

use serde::{Deserialize, Serialize};

use super::rel::RelOperator;
use super::rex::RexNode;

/// A base-table column a value originates from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnOrigin {
    pub table: String,
    pub column: String,
    /// Position of the column in the scan's row.
    pub ordinal: usize,
    /// Expression texts applied on the way up, outermost first.
    pub transformations: Vec<String>,
}

impl ColumnOrigin {
    pub fn new(table: impl Into<String>, column: impl Into<String>, ordinal: usize) -> Self {
        Self {
            table: table.into(),
            column: column.into(),
            ordinal,
            transformations: Vec::new(),
        }
    }

    /// Record an enclosing transformation (becomes the new chain head).
    pub fn wrapped_in(mut self, expression: impl Into<String>) -> Self {
        self.transformations.insert(0, expression.into());
        self
    }

    /// Append a tag after the existing chain.
    pub fn tagged(mut self, tag: impl Into<String>) -> Self {
        self.transformations.push(tag.into());
        self
    }
}

/// Origins of output field `index` of `node`.
///
/// Returns `None` when origin metadata is not derivable for the subtree and
/// `Some(vec![])` when the field has no base-table origin (a literal, a
/// `COUNT(*)`, an out-of-range index).
pub fn origins_of(node: &RelOperator, index: usize) -> Option<Vec<ColumnOrigin>> {
    match node {
        RelOperator::Scan(scan) => Some(
            scan.columns
                .get(index)
                .map(|column| vec![ColumnOrigin::new(&scan.table, column, index)])
                .unwrap_or_default(),
        ),
        RelOperator::Filter(filter) => origins_of(&filter.input, index),
        RelOperator::Project(project) => {
            let Some(expr) = project.exprs.get(index) else {
                return Some(Vec::new());
            };
            origins_through_expr(&project.input, expr)
        }
        RelOperator::Aggregate(agg) => {
            let group_count = agg.group_keys.len();
            if index < group_count {
                return origins_of(&agg.input, agg.group_keys[index]);
            }
            let Some(call) = agg.agg_calls.get(index - group_count) else {
                return Some(Vec::new());
            };
            let text = call.render(&agg.input.row_type());
            let mut origins = Vec::new();
            for &arg in &call.args {
                for origin in origins_of(&agg.input, arg)? {
                    push_unique(&mut origins, origin.wrapped_in(text.clone()));
                }
            }
            Some(origins)
        }
        RelOperator::Join(join) => {
            let left_arity = join.left.arity();
            if index < left_arity {
                origins_of(&join.left, index)
            } else {
                origins_of(&join.right, index - left_arity)
            }
        }
        RelOperator::Union(union) => {
            let mut origins = Vec::new();
            for (k, input) in union.inputs.iter().enumerate() {
                for origin in origins_of(input, index)? {
                    push_unique(&mut origins, origin.tagged(format!("UNION input#{}", k)));
                }
            }
            Some(origins)
        }
        RelOperator::Correlate(_) => None,
    }
}

/// Origins of every input field referenced by `expr`, with the expression
/// text pushed onto each chain when it is more than a bare reference.
pub fn origins_through_expr(input: &RelOperator, expr: &RexNode) -> Option<Vec<ColumnOrigin>> {
    let wrap = (!expr.is_input_ref()).then(|| expr.to_string());
    let mut origins = Vec::new();
    for index in expr.input_refs() {
        for origin in origins_of(input, index)? {
            let origin = match &wrap {
                Some(text) => origin.wrapped_in(text.clone()),
                None => origin,
            };
            push_unique(&mut origins, origin);
        }
    }
    Some(origins)
}

pub(crate) fn push_unique(origins: &mut Vec<ColumnOrigin>, origin: ColumnOrigin) {
    if !origins.contains(&origin) {
        origins.push(origin);
    }
}
