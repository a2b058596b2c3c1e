//! Transform detection and the filter conditions transforms attach.

use serde_json::{json, Value};

use crate::planner::{Literal, RexCall, RexNode, SqlKind};

use super::column_lineage::{FilterCondition, TransformType};

/// First null-handling or conditional call in `expr`, outermost first.
///
/// One pre-order pass over the whole tree: the result does not depend on
/// which input reference is being traced.
pub fn detect(expr: &RexNode) -> Option<(TransformType, &RexCall)> {
    let mut found = None;
    visit_calls(expr, &mut |call| {
        if found.is_some() {
            return;
        }
        let kind = match call.kind {
            SqlKind::Case => Some(TransformType::Case),
            SqlKind::Function => match call.name.as_str() {
                "IFNULL" | "NVL" | "ISNULL" => Some(TransformType::Ifnull),
                "COALESCE" => Some(TransformType::Coalesce),
                _ => None,
            },
            _ => None,
        };
        if let Some(kind) = kind {
            found = Some((kind, call));
        }
    });
    found
}

fn visit_calls<'a, F: FnMut(&'a RexCall)>(expr: &'a RexNode, f: &mut F) {
    if let RexNode::Call(call) = expr {
        f(call);
        for operand in &call.operands {
            visit_calls(operand, f);
        }
    }
}

/// Filter condition for a detected transform.
pub fn transform_condition(kind: TransformType, call: &RexCall) -> Option<FilterCondition> {
    match kind {
        TransformType::Ifnull => Some(ifnull_condition(call)),
        TransformType::Coalesce => Some(coalesce_condition(call)),
        TransformType::Case => Some(case_condition(call, "CASE_WHEN")),
        _ => None,
    }
}

fn ifnull_condition(call: &RexCall) -> FilterCondition {
    let mut condition = FilterCondition::new();
    condition.insert("_is_null_filled".to_string(), Value::Bool(true));
    if let Some(default) = call.operands.get(1) {
        condition.insert("_null_default_value".to_string(), Value::String(literal_text(default)));
    }
    if let Some(inner) = call.operands.first() {
        condition.insert("_inner_expression".to_string(), Value::String(inner.to_string()));
    }
    condition
}

fn coalesce_condition(call: &RexCall) -> FilterCondition {
    let mut condition = FilterCondition::new();
    condition.insert("_is_null_filled".to_string(), Value::Bool(true));
    let operands: Vec<Value> = call
        .operands
        .iter()
        .map(|o| Value::String(o.to_string()))
        .collect();
    condition.insert("_coalesce_operands".to_string(), Value::Array(operands));
    if let Some(last) = call.operands.last() {
        condition.insert("_null_default_value".to_string(), Value::String(literal_text(last)));
    }
    condition
}

/// CASE condition. `_aggregation_field` is the first column referenced by a
/// THEN branch, which is the measured value rather than a WHEN predicate.
fn case_condition(call: &RexCall, case_type: &str) -> FilterCondition {
    let mut condition = FilterCondition::new();
    condition.insert("_case_type".to_string(), Value::String(case_type.to_string()));
    let branches: Vec<Value> = call
        .case_branches()
        .into_iter()
        .map(|(when, then)| json!({ "condition": when.to_string(), "result": then.to_string() }))
        .collect();
    condition.insert("case_branches".to_string(), Value::Array(branches));
    if let Some(else_result) = call.case_else() {
        condition.insert("_else_result".to_string(), Value::String(else_result.to_string()));
    }
    let field = call
        .case_branches()
        .into_iter()
        .find_map(|(_, then)| then.input_names().into_iter().next());
    if let Some(field) = field {
        condition.insert("_aggregation_field".to_string(), Value::String(field));
    }
    condition
}

/// Condition for an aggregate whose argument is (or wraps) a CASE, e.g.
/// `SUM(CASE WHEN status = 'paid' THEN amount ELSE 0 END)`.
pub fn aggregation_case_condition(arg: &RexNode) -> Option<FilterCondition> {
    let (TransformType::Case, call) = detect(arg)? else {
        return None;
    };
    Some(case_condition(call, "AGGREGATION_WITH_CASE"))
}

/// Condition recorded on lineages emitted at a Filter boundary.
pub fn filter_expression_condition(predicate: &RexNode) -> FilterCondition {
    let mut condition = FilterCondition::new();
    condition.insert("_filter_expression".to_string(), Value::String(predicate.to_string()));
    condition
}

/// Unquoted text of a literal; other expressions render as SQL.
fn literal_text(node: &RexNode) -> String {
    match node {
        RexNode::Literal(Literal::String(s)) | RexNode::Literal(Literal::Number(s)) => s.clone(),
        other => other.to_string(),
    }
}
