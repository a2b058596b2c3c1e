//! Converts sqlparser expressions into `RexNode`s.
//!
//! Column resolution is delegated to a [`ColumnScope`], so the same walker
//! serves plain row scopes (FROM/WHERE/JOIN ON) and the post-aggregate
//! scope, where group expressions and aggregate calls map to fields of the
//! aggregate's output.

use sqlparser::ast::{
    DuplicateTreatment, Expr, Function, FunctionArg, FunctionArgExpr, FunctionArguments, Value,
};

use super::rex::{Literal, RexCall, RexNode, SqlKind};
use super::{PlanError, PlanResult};

/// Aggregate functions recognised when they appear without an OVER clause.
const AGGREGATE_FUNCTIONS: &[&str] = &[
    "SUM",
    "COUNT",
    "AVG",
    "MIN",
    "MAX",
    "STDDEV",
    "STDDEV_POP",
    "STDDEV_SAMP",
    "VARIANCE",
    "VAR_POP",
    "VAR_SAMP",
    "ANY_VALUE",
    "APPROX_COUNT_DISTINCT",
];

/// Resolves column references for [`convert_expr`].
pub trait ColumnScope {
    /// Resolve `qualifier.name` (or bare `name`).
    fn column(&mut self, qualifier: Option<&str>, name: &str) -> PlanResult<RexNode>;

    /// Give the scope a chance to replace a whole sub-expression before it
    /// is converted structurally.
    fn intercept(&mut self, _expr: &Expr) -> PlanResult<Option<RexNode>> {
        Ok(None)
    }

    /// Resolve an aggregate call. Plain row scopes reject them.
    fn aggregate(&mut self, func: &Function) -> PlanResult<RexNode> {
        Err(PlanError::Unsupported(format!(
            "aggregate {} is not allowed here",
            func.name
        )))
    }
}

/// Convert `expr` against `scope`.
pub fn convert_expr<S: ColumnScope>(expr: &Expr, scope: &mut S) -> PlanResult<RexNode> {
    if let Some(node) = scope.intercept(expr)? {
        return Ok(node);
    }

    match expr {
        Expr::Identifier(ident) => scope.column(None, &ident.value),
        Expr::CompoundIdentifier(parts) => match parts.as_slice() {
            [] => Err(PlanError::Unsupported("empty identifier".to_string())),
            [column] => scope.column(None, &column.value),
            [.., qualifier, column] => scope.column(Some(&qualifier.value), &column.value),
        },
        Expr::Value(value) => Ok(RexNode::Literal(convert_value(value))),
        Expr::Nested(inner) => convert_expr(inner, scope),
        Expr::BinaryOp { left, op, right } => Ok(RexNode::binary(
            op.to_string(),
            convert_expr(left, scope)?,
            convert_expr(right, scope)?,
        )),
        Expr::UnaryOp { op, expr } => Ok(RexNode::Call(RexCall {
            kind: SqlKind::Unary,
            name: op.to_string(),
            operands: vec![convert_expr(expr, scope)?],
        })),
        Expr::IsNull(inner) => Ok(RexNode::Call(RexCall {
            kind: SqlKind::IsNull,
            name: "IS NULL".to_string(),
            operands: vec![convert_expr(inner, scope)?],
        })),
        Expr::IsNotNull(inner) => Ok(RexNode::Call(RexCall {
            kind: SqlKind::IsNotNull,
            name: "IS NOT NULL".to_string(),
            operands: vec![convert_expr(inner, scope)?],
        })),
        Expr::Cast { expr, data_type, .. } => Ok(RexNode::Call(RexCall {
            kind: SqlKind::Cast,
            name: data_type.to_string(),
            operands: vec![convert_expr(expr, scope)?],
        })),
        Expr::Case {
            operand,
            conditions,
            results,
            else_result,
        } => {
            let operand = operand
                .as_ref()
                .map(|o| convert_expr(o, scope))
                .transpose()?;
            let mut branches = Vec::with_capacity(conditions.len());
            for (condition, result) in conditions.iter().zip(results) {
                let condition = convert_expr(condition, scope)?;
                // Simple CASE compares the operand against each WHEN value.
                let condition = match &operand {
                    Some(operand) => RexNode::binary("=", operand.clone(), condition),
                    None => condition,
                };
                branches.push((condition, convert_expr(result, scope)?));
            }
            let else_result = else_result
                .as_ref()
                .map(|e| convert_expr(e, scope))
                .transpose()?;
            Ok(RexNode::case(branches, else_result))
        }
        Expr::Function(func) => {
            if is_aggregate_call(func) {
                return scope.aggregate(func);
            }
            let mut operands = Vec::new();
            for arg in function_args(func) {
                if let Some(arg) = arg {
                    operands.push(convert_expr(arg, scope)?);
                }
            }
            Ok(RexNode::function(function_name(func), operands))
        }
        Expr::Extract { field, expr, .. } => Ok(RexNode::function(
            field.to_string(),
            vec![convert_expr(expr, scope)?],
        )),
        Expr::Between {
            expr,
            negated,
            low,
            high,
        } => {
            let value = convert_expr(expr, scope)?;
            let range = RexNode::binary(
                "AND",
                RexNode::binary(">=", value.clone(), convert_expr(low, scope)?),
                RexNode::binary("<=", value, convert_expr(high, scope)?),
            );
            Ok(negate_if(range, *negated))
        }
        Expr::InList {
            expr,
            list,
            negated,
        } => {
            let mut operands = vec![convert_expr(expr, scope)?];
            for item in list {
                operands.push(convert_expr(item, scope)?);
            }
            let name = if *negated { "NOT IN" } else { "IN" };
            Ok(RexNode::function(name, operands))
        }
        Expr::Like {
            negated,
            expr,
            pattern,
            ..
        } => {
            let op = if *negated { "NOT LIKE" } else { "LIKE" };
            Ok(RexNode::binary(
                op,
                convert_expr(expr, scope)?,
                convert_expr(pattern, scope)?,
            ))
        }
        Expr::Subquery(_) | Expr::Exists { .. } | Expr::InSubquery { .. } => Err(
            PlanError::Unsupported(format!("subquery expression `{}`", expr)),
        ),
        other => Err(PlanError::Unsupported(format!("expression `{}`", other))),
    }
}

fn negate_if(node: RexNode, negated: bool) -> RexNode {
    if !negated {
        return node;
    }
    RexNode::Call(RexCall {
        kind: SqlKind::Unary,
        name: "NOT".to_string(),
        operands: vec![node],
    })
}

pub(crate) fn convert_value(value: &Value) -> Literal {
    match value {
        Value::Number(n, _) => Literal::Number(n.to_string()),
        Value::SingleQuotedString(s) | Value::DoubleQuotedString(s) => Literal::String(s.clone()),
        Value::Boolean(b) => Literal::Boolean(*b),
        Value::Null => Literal::Null,
        other => Literal::String(other.to_string()),
    }
}

/// Upper-cased function name without schema qualification.
pub fn function_name(func: &Function) -> String {
    func.name
        .0
        .last()
        .map(|ident| ident.value.to_uppercase())
        .unwrap_or_default()
}

/// True for an aggregate function used as an aggregate (no OVER clause).
pub fn is_aggregate_call(func: &Function) -> bool {
    func.over.is_none() && AGGREGATE_FUNCTIONS.contains(&function_name(func).as_str())
}

/// True for `COUNT(DISTINCT ...)` style calls.
pub fn is_distinct_call(func: &Function) -> bool {
    match &func.args {
        FunctionArguments::List(list) => {
            matches!(list.duplicate_treatment, Some(DuplicateTreatment::Distinct))
        }
        _ => false,
    }
}

/// Argument expressions of a call. `None` marks a `*` argument.
pub fn function_args(func: &Function) -> Vec<Option<&Expr>> {
    match &func.args {
        FunctionArguments::List(list) => list
            .args
            .iter()
            .map(|arg| match arg {
                FunctionArg::Unnamed(FunctionArgExpr::Expr(e))
                | FunctionArg::Named {
                    arg: FunctionArgExpr::Expr(e),
                    ..
                } => Some(e),
                _ => None,
            })
            .collect(),
        FunctionArguments::None | FunctionArguments::Subquery(_) => Vec::new(),
    }
}

/// True when `expr` contains an aggregate call outside any window.
pub fn contains_aggregate(expr: &Expr) -> bool {
    !aggregate_calls(expr).is_empty()
}

/// Aggregate calls inside `expr`, outermost first, left to right.
///
/// Arguments of an aggregate are not searched: nested aggregates are
/// rejected when the arguments are converted.
pub fn aggregate_calls(expr: &Expr) -> Vec<&Function> {
    let mut calls = Vec::new();
    collect_aggregate_calls(expr, &mut calls);
    calls
}

fn collect_aggregate_calls<'a>(expr: &'a Expr, calls: &mut Vec<&'a Function>) {
    match expr {
        Expr::Function(func) if is_aggregate_call(func) => calls.push(func),
        Expr::Function(func) => {
            for arg in function_args(func).into_iter().flatten() {
                collect_aggregate_calls(arg, calls);
            }
        }
        Expr::Nested(inner)
        | Expr::UnaryOp { expr: inner, .. }
        | Expr::IsNull(inner)
        | Expr::IsNotNull(inner)
        | Expr::Cast { expr: inner, .. }
        | Expr::Extract { expr: inner, .. } => collect_aggregate_calls(inner, calls),
        Expr::BinaryOp { left, right, .. } => {
            collect_aggregate_calls(left, calls);
            collect_aggregate_calls(right, calls);
        }
        Expr::Case {
            operand,
            conditions,
            results,
            else_result,
        } => {
            if let Some(operand) = operand {
                collect_aggregate_calls(operand, calls);
            }
            for e in conditions.iter().chain(results) {
                collect_aggregate_calls(e, calls);
            }
            if let Some(e) = else_result {
                collect_aggregate_calls(e, calls);
            }
        }
        Expr::Between { expr, low, high, .. } => {
            collect_aggregate_calls(expr, calls);
            collect_aggregate_calls(low, calls);
            collect_aggregate_calls(high, calls);
        }
        Expr::InList { expr, list, .. } => {
            collect_aggregate_calls(expr, calls);
            for e in list {
                collect_aggregate_calls(e, calls);
            }
        }
        Expr::Like { expr, pattern, .. } => {
            collect_aggregate_calls(expr, calls);
            collect_aggregate_calls(pattern, calls);
        }
        _ => {}
    }
}
