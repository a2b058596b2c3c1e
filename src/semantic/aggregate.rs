//! Aggregate metadata collected from a plan ahead of classification.

use serde::Serialize;

use crate::lineage::clean_column_name;
use crate::planner::{Literal, RelOperator, RexNode, SqlKind};

/// Granularity implied by a time-bucketing function, e.g. `MONTH` → `month`.
pub fn time_function_granularity(function: &str) -> Option<&'static str> {
    match function.to_uppercase().as_str() {
        "DATE" | "DAY" | "TO_DATE" => Some("day"),
        "YEAR" => Some("year"),
        "QUARTER" => Some("quarter"),
        "MONTH" => Some("month"),
        "WEEK" | "WEEKOFYEAR" => Some("week"),
        "HOUR" => Some("hour"),
        "MINUTE" => Some("minute"),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupKey {
    /// Node id of the aggregate this key belongs to.
    pub node_id: usize,
    /// Field name in the aggregate's output.
    pub name: String,
    /// Underlying column, without any time function around it.
    pub column: String,
    pub time_granularity: Option<&'static str>,
}

impl GroupKey {
    pub fn is_time(&self) -> bool {
        self.time_granularity.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateCallInfo {
    pub node_id: usize,
    pub name: String,
    pub function: String,
    pub distinct: bool,
}

/// Group keys and aggregate calls of every `Aggregate` in a plan.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AggregateMetadata {
    pub group_keys: Vec<GroupKey>,
    pub calls: Vec<AggregateCallInfo>,
    /// For each node id, the aggregate reached by following single-input
    /// operators down from it.
    #[serde(skip)]
    scopes: Vec<Option<usize>>,
}

impl AggregateMetadata {
    pub fn from_plan(plan: &RelOperator) -> Self {
        let nodes = plan.preorder();
        let mut metadata = Self::default();

        for (id, node) in nodes.iter().enumerate() {
            metadata.scopes.push(scope_of(node, id));
            let RelOperator::Aggregate(agg) = node else {
                continue;
            };
            let input_fields = agg.input.row_type();
            for &key in &agg.group_keys {
                let name = input_fields.get(key).cloned().unwrap_or_default();
                let (column, time_granularity) = match agg.input.as_ref() {
                    RelOperator::Project(project) => match project.exprs.get(key) {
                        Some(expr) => time_bucket(expr).unwrap_or_else(|| (name.clone(), None)),
                        None => (name.clone(), None),
                    },
                    _ => (name.clone(), None),
                };
                metadata.group_keys.push(GroupKey {
                    node_id: id,
                    name,
                    column: clean_column_name(&column).to_string(),
                    time_granularity,
                });
            }
            for call in &agg.agg_calls {
                metadata.calls.push(AggregateCallInfo {
                    node_id: id,
                    name: call.name.clone(),
                    function: call.function.clone(),
                    distinct: call.distinct,
                });
            }
        }
        metadata
    }

    /// Aggregate governing the output of node `node_id`.
    pub fn scope(&self, node_id: usize) -> Option<usize> {
        self.scopes.get(node_id).copied().flatten()
    }

    /// Group keys of the aggregate governing node `node_id`.
    pub fn group_keys_for(&self, node_id: usize) -> Vec<&GroupKey> {
        match self.scope(node_id) {
            Some(agg) => self.group_keys.iter().filter(|k| k.node_id == agg).collect(),
            None => Vec::new(),
        }
    }

    pub fn is_group_key(&self, name: &str) -> bool {
        self.group_keys.iter().any(|k| k.name.eq_ignore_ascii_case(name))
    }
}

/// Follow Project and Filter inputs from `node` until an Aggregate. The
/// first input of node `id` has id `id + 1` in pre-order.
fn scope_of(node: &RelOperator, id: usize) -> Option<usize> {
    let mut node = node;
    let mut id = id;
    loop {
        match node {
            RelOperator::Aggregate(_) => return Some(id),
            RelOperator::Project(project) => node = project.input.as_ref(),
            RelOperator::Filter(filter) => node = filter.input.as_ref(),
            _ => return None,
        }
        id += 1;
    }
}

/// `MONTH(order_date)` → (`order_date`, `month`).
/// `DATE_TRUNC('month', order_date)` is read the same way.
fn time_bucket(expr: &RexNode) -> Option<(String, Option<&'static str>)> {
    let call = expr.as_call()?;
    if call.kind != SqlKind::Function {
        return None;
    }
    let column = call.operands.iter().find_map(|op| match op {
        RexNode::InputRef(r) => Some(r.name.clone()),
        _ => None,
    })?;
    let granularity = match call.name.as_str() {
        "DATE_TRUNC" | "TRUNC" => call.operands.iter().find_map(|op| match op {
            RexNode::Literal(Literal::String(unit)) => {
                time_function_granularity(unit)
            }
            _ => None,
        }),
        name => time_function_granularity(name),
    };
    granularity.map(|g| (column, Some(g)))
}
