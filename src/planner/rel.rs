//! Relational operator tree.

use std::fmt::{self, Write};

use serde::{Deserialize, Serialize};

use super::rex::RexNode;

/// Relational plan - a closed set of operators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum RelOperator {
    Scan(ScanNode),
    Filter(FilterNode),
    Project(ProjectNode),
    Aggregate(AggregateNode),
    Join(JoinNode),
    Union(UnionNode),
    Correlate(CorrelateNode),
}

/// Operator kind, recorded on every lineage produced by that operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelKind {
    Scan,
    Filter,
    Project,
    Aggregate,
    Join,
    Union,
    Correlate,
}

/// Scan a base table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanNode {
    pub table: String,
    pub columns: Vec<String>,
}

/// Filter rows by a predicate over the input row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterNode {
    pub input: Box<RelOperator>,
    pub condition: RexNode,
}

/// Compute one output field per expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectNode {
    pub input: Box<RelOperator>,
    pub exprs: Vec<RexNode>,
    pub names: Vec<String>,
}

/// Aggregate call over input fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateCall {
    /// Upper-cased function name, e.g. `SUM`.
    pub function: String,
    pub distinct: bool,
    /// Input field indices of the arguments.
    pub args: Vec<usize>,
    /// Input field holding a `FILTER (WHERE ...)` condition.
    pub filter_arg: Option<usize>,
    /// Output field name.
    pub name: String,
}

/// Group by `group_keys` and compute `agg_calls`.
///
/// The output row is the group keys followed by one field per call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateNode {
    pub input: Box<RelOperator>,
    pub group_keys: Vec<usize>,
    pub agg_calls: Vec<AggregateCall>,
}

/// Join type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JoinKind {
    Inner,
    Left,
    Right,
    Full,
    Cross,
}

/// Join two inputs. The condition is evaluated over the concatenated row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinNode {
    pub left: Box<RelOperator>,
    pub right: Box<RelOperator>,
    pub condition: Option<RexNode>,
    pub kind: JoinKind,
}

/// Union of inputs with the same arity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnionNode {
    pub inputs: Vec<RelOperator>,
    pub all: bool,
}

/// Correlated (lateral) join: the right side is evaluated per left row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelateNode {
    pub left: Box<RelOperator>,
    pub right: Box<RelOperator>,
    pub kind: JoinKind,
}

impl AggregateCall {
    /// Render the call against the input field names, e.g. `SUM(amount)`.
    pub fn render(&self, input_fields: &[String]) -> String {
        let args: Vec<&str> = self
            .args
            .iter()
            .map(|&i| input_fields.get(i).map(String::as_str).unwrap_or("?"))
            .collect();
        let body = if args.is_empty() {
            "*".to_string()
        } else {
            args.join(", ")
        };
        let distinct = if self.distinct { "DISTINCT " } else { "" };
        match self.filter_arg.and_then(|i| input_fields.get(i)) {
            Some(filter) => format!("{}({}{}) FILTER (WHERE {})", self.function, distinct, body, filter),
            None => format!("{}({}{})", self.function, distinct, body),
        }
    }
}

impl RelOperator {
    pub fn kind(&self) -> RelKind {
        match self {
            RelOperator::Scan(_) => RelKind::Scan,
            RelOperator::Filter(_) => RelKind::Filter,
            RelOperator::Project(_) => RelKind::Project,
            RelOperator::Aggregate(_) => RelKind::Aggregate,
            RelOperator::Join(_) => RelKind::Join,
            RelOperator::Union(_) => RelKind::Union,
            RelOperator::Correlate(_) => RelKind::Correlate,
        }
    }

    /// Output field names.
    pub fn row_type(&self) -> Vec<String> {
        match self {
            RelOperator::Scan(scan) => scan.columns.clone(),
            RelOperator::Filter(filter) => filter.input.row_type(),
            RelOperator::Project(project) => project.names.clone(),
            RelOperator::Aggregate(agg) => {
                let input = agg.input.row_type();
                let mut fields: Vec<String> = agg
                    .group_keys
                    .iter()
                    .map(|&k| input.get(k).cloned().unwrap_or_else(|| format!("${}", k)))
                    .collect();
                fields.extend(agg.agg_calls.iter().map(|c| c.name.clone()));
                fields
            }
            RelOperator::Join(join) => {
                let mut fields = join.left.row_type();
                fields.extend(join.right.row_type());
                fields
            }
            RelOperator::Correlate(correlate) => {
                let mut fields = correlate.left.row_type();
                fields.extend(correlate.right.row_type());
                fields
            }
            RelOperator::Union(union) => union
                .inputs
                .first()
                .map(|input| input.row_type())
                .unwrap_or_default(),
        }
    }

    /// Number of output fields.
    pub fn arity(&self) -> usize {
        match self {
            RelOperator::Scan(scan) => scan.columns.len(),
            RelOperator::Filter(filter) => filter.input.arity(),
            RelOperator::Project(project) => project.exprs.len(),
            RelOperator::Aggregate(agg) => agg.group_keys.len() + agg.agg_calls.len(),
            RelOperator::Join(join) => join.left.arity() + join.right.arity(),
            RelOperator::Correlate(correlate) => correlate.left.arity() + correlate.right.arity(),
            RelOperator::Union(union) => union.inputs.first().map(|i| i.arity()).unwrap_or(0),
        }
    }

    /// Direct inputs, left to right.
    pub fn inputs(&self) -> Vec<&RelOperator> {
        match self {
            RelOperator::Scan(_) => Vec::new(),
            RelOperator::Filter(filter) => vec![filter.input.as_ref()],
            RelOperator::Project(project) => vec![project.input.as_ref()],
            RelOperator::Aggregate(agg) => vec![agg.input.as_ref()],
            RelOperator::Join(join) => vec![join.left.as_ref(), join.right.as_ref()],
            RelOperator::Correlate(correlate) => {
                vec![correlate.left.as_ref(), correlate.right.as_ref()]
            }
            RelOperator::Union(union) => union.inputs.iter().collect(),
        }
    }

    /// All operators in pre-order (node, then inputs left to right).
    ///
    /// The position in this list is the operator's node id; lineage
    /// extraction and alias numbering both use it.
    pub fn preorder(&self) -> Vec<&RelOperator> {
        let mut nodes = Vec::new();
        fn walk<'a>(node: &'a RelOperator, nodes: &mut Vec<&'a RelOperator>) {
            nodes.push(node);
            for input in node.inputs() {
                walk(input, nodes);
            }
        }
        walk(self, &mut nodes);
        nodes
    }

    /// Table names of every scan in the tree, first-seen order.
    pub fn scanned_tables(&self) -> Vec<String> {
        let mut tables: Vec<String> = Vec::new();
        for node in self.preorder() {
            if let RelOperator::Scan(scan) = node {
                if !tables.contains(&scan.table) {
                    tables.push(scan.table.clone());
                }
            }
        }
        tables
    }

    /// Indented plan tree, one operator per line.
    pub fn explain(&self) -> String {
        let mut out = String::new();
        self.explain_into(&mut out, 0);
        out
    }

    fn explain_into(&self, out: &mut String, depth: usize) {
        let indent = "  ".repeat(depth);
        let _ = writeln!(out, "{}{}", indent, self.describe());
        for input in self.inputs() {
            input.explain_into(out, depth + 1);
        }
    }

    fn describe(&self) -> String {
        match self {
            RelOperator::Scan(scan) => {
                format!("Scan(table=[{}], columns=[{}])", scan.table, scan.columns.join(", "))
            }
            RelOperator::Filter(filter) => format!("Filter(condition=[{}])", filter.condition),
            RelOperator::Project(project) => {
                let fields: Vec<String> = project
                    .names
                    .iter()
                    .zip(&project.exprs)
                    .map(|(name, expr)| format!("{}=[{}]", name, expr))
                    .collect();
                format!("Project({})", fields.join(", "))
            }
            RelOperator::Aggregate(agg) => {
                let input = agg.input.row_type();
                let keys: Vec<String> = agg.group_keys.iter().map(|k| k.to_string()).collect();
                let calls: Vec<String> = agg
                    .agg_calls
                    .iter()
                    .map(|c| format!("{}=[{}]", c.name, c.render(&input)))
                    .collect();
                if calls.is_empty() {
                    format!("Aggregate(group=[{{{}}}])", keys.join(", "))
                } else {
                    format!("Aggregate(group=[{{{}}}], {})", keys.join(", "), calls.join(", "))
                }
            }
            RelOperator::Join(join) => match &join.condition {
                Some(condition) => format!("Join(kind=[{}], condition=[{}])", join.kind, condition),
                None => format!("Join(kind=[{}])", join.kind),
            },
            RelOperator::Union(union) => format!("Union(all=[{}])", union.all),
            RelOperator::Correlate(correlate) => format!("Correlate(kind=[{}])", correlate.kind),
        }
    }
}

impl fmt::Display for JoinKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JoinKind::Inner => "INNER",
            JoinKind::Left => "LEFT",
            JoinKind::Right => "RIGHT",
            JoinKind::Full => "FULL",
            JoinKind::Cross => "CROSS",
        };
        write!(f, "{}", s)
    }
}

impl fmt::Display for RelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RelKind::Scan => "Scan",
            RelKind::Filter => "Filter",
            RelKind::Project => "Project",
            RelKind::Aggregate => "Aggregate",
            RelKind::Join => "Join",
            RelKind::Union => "Union",
            RelKind::Correlate => "Correlate",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn orders_scan() -> RelOperator {
        RelOperator::Scan(ScanNode {
            table: "orders".to_string(),
            columns: vec!["customer_id".to_string(), "amount".to_string()],
        })
    }

    fn sum_by_customer() -> RelOperator {
        RelOperator::Aggregate(AggregateNode {
            input: Box::new(orders_scan()),
            group_keys: vec![0],
            agg_calls: vec![AggregateCall {
                function: "SUM".to_string(),
                distinct: false,
                args: vec![1],
                filter_arg: None,
                name: "total".to_string(),
            }],
        })
    }

    #[test]
    fn test_aggregate_row_type() {
        let agg = sum_by_customer();
        assert_eq!(agg.row_type(), vec!["customer_id", "total"]);
        assert_eq!(agg.arity(), 2);
    }

    #[test]
    fn test_join_row_type_concatenates_sides() {
        let join = RelOperator::Join(JoinNode {
            left: Box::new(orders_scan()),
            right: Box::new(RelOperator::Scan(ScanNode {
                table: "customers".to_string(),
                columns: vec!["id".to_string()],
            })),
            condition: None,
            kind: JoinKind::Inner,
        });
        assert_eq!(join.arity(), 3);
        assert_eq!(join.row_type()[2], "id");
        assert_eq!(join.scanned_tables(), vec!["orders", "customers"]);
    }

    #[test]
    fn test_preorder_visits_node_before_inputs() {
        let agg = sum_by_customer();
        let kinds: Vec<RelKind> = agg.preorder().iter().map(|n| n.kind()).collect();
        assert_eq!(kinds, vec![RelKind::Aggregate, RelKind::Scan]);
    }

    #[test]
    fn test_render_aggregate_call() {
        let call = AggregateCall {
            function: "COUNT".to_string(),
            distinct: true,
            args: vec![0],
            filter_arg: None,
            name: "customers".to_string(),
        };
        assert_eq!(call.render(&["customer_id".to_string()]), "COUNT(DISTINCT customer_id)");
    }

    #[test]
    fn test_explain() {
        insta::assert_snapshot!(sum_by_customer().explain().trim_end(), @r"
        Aggregate(group=[{0}], total=[SUM(amount)])
          Scan(table=[orders], columns=[customer_id, amount])
        ");
    }
}
