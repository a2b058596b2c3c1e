//! Scalar expressions carried by plan operators.
//!
//! A `RexNode` is either a reference to an input field, a literal, or a call
//! over other expressions. Input references keep the name of the field they
//! point at so expressions render readably (`IFNULL(total, 0)` rather than
//! `IFNULL($0, 0)`).

use std::fmt;

use serde::{Deserialize, Serialize};

/// Function name marking a correlation variable: a value read from the
/// enclosing row of a lateral join, e.g. `$COR('o.amount')`.
pub const CORRELATION_FN: &str = "$COR";

/// Scalar expression tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RexNode {
    InputRef(InputRef),
    Literal(Literal),
    Call(RexCall),
}

/// Reference to field `index` of the operator's input row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InputRef {
    pub index: usize,
    pub name: String,
}

/// Literal value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Literal {
    Null,
    Boolean(bool),
    Number(String),
    String(String),
}

/// Operator kind of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SqlKind {
    /// Named function, e.g. `IFNULL`, `DATE`, `UPPER`.
    Function,
    /// `CASE WHEN c1 THEN r1 ... ELSE e END`, operands `[c1, r1, ..., e]`.
    Case,
    /// Infix operator, e.g. `+`, `=`, `AND`.
    Binary,
    /// Prefix operator, e.g. `-`, `NOT`.
    Unary,
    /// `CAST(x AS type)`, the target type is the call name.
    Cast,
    /// `x IS NULL`.
    IsNull,
    /// `x IS NOT NULL`.
    IsNotNull,
}

/// Call of an operator over operand expressions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RexCall {
    pub kind: SqlKind,
    pub name: String,
    pub operands: Vec<RexNode>,
}

impl RexNode {
    pub fn input_ref(index: usize, name: impl Into<String>) -> Self {
        RexNode::InputRef(InputRef {
            index,
            name: name.into(),
        })
    }

    pub fn number(value: impl Into<String>) -> Self {
        RexNode::Literal(Literal::Number(value.into()))
    }

    pub fn string(value: impl Into<String>) -> Self {
        RexNode::Literal(Literal::String(value.into()))
    }

    /// Named function call. The name is upper-cased.
    pub fn function(name: impl AsRef<str>, operands: Vec<RexNode>) -> Self {
        RexNode::Call(RexCall {
            kind: SqlKind::Function,
            name: name.as_ref().to_uppercase(),
            operands,
        })
    }

    pub fn binary(op: impl Into<String>, left: RexNode, right: RexNode) -> Self {
        RexNode::Call(RexCall {
            kind: SqlKind::Binary,
            name: op.into(),
            operands: vec![left, right],
        })
    }

    /// Searched CASE. `branches` are `(condition, result)` pairs.
    pub fn case(branches: Vec<(RexNode, RexNode)>, else_result: Option<RexNode>) -> Self {
        let mut operands = Vec::with_capacity(branches.len() * 2 + 1);
        for (condition, result) in branches {
            operands.push(condition);
            operands.push(result);
        }
        operands.push(else_result.unwrap_or(RexNode::Literal(Literal::Null)));
        RexNode::Call(RexCall {
            kind: SqlKind::Case,
            name: "CASE".to_string(),
            operands,
        })
    }

    /// Correlation variable `qualifier.column`.
    pub fn correlation(variable: impl Into<String>) -> Self {
        RexNode::function(CORRELATION_FN, vec![RexNode::string(variable)])
    }

    /// `qualifier.column` names of the correlation variables referenced.
    pub fn correlation_variables(&self) -> Vec<String> {
        let mut variables = Vec::new();
        self.visit(&mut |node| {
            if let RexNode::Call(call) = node {
                if call.kind == SqlKind::Function && call.name == CORRELATION_FN {
                    if let Some(RexNode::Literal(Literal::String(v))) = call.operands.first() {
                        variables.push(v.clone());
                    }
                }
            }
        });
        variables
    }

    /// True for a bare input reference.
    pub fn is_input_ref(&self) -> bool {
        matches!(self, RexNode::InputRef(_))
    }

    pub fn as_call(&self) -> Option<&RexCall> {
        match self {
            RexNode::Call(call) => Some(call),
            _ => None,
        }
    }

    /// Input field indices referenced by this expression, first-seen order,
    /// without duplicates.
    pub fn input_refs(&self) -> Vec<usize> {
        let mut refs = Vec::new();
        self.collect_input_refs(&mut refs);
        refs
    }

    fn collect_input_refs(&self, refs: &mut Vec<usize>) {
        match self {
            RexNode::InputRef(r) => {
                if !refs.contains(&r.index) {
                    refs.push(r.index);
                }
            }
            RexNode::Literal(_) => {}
            RexNode::Call(call) => {
                for operand in &call.operands {
                    operand.collect_input_refs(refs);
                }
            }
        }
    }

    /// Names of the input fields referenced, first-seen order.
    pub fn input_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        self.visit(&mut |node| {
            if let RexNode::InputRef(r) = node {
                if !names.contains(&r.name) {
                    names.push(r.name.clone());
                }
            }
        });
        names
    }

    /// Pre-order visit of every node in the tree.
    pub fn visit<F: FnMut(&RexNode)>(&self, f: &mut F) {
        f(self);
        if let RexNode::Call(call) = self {
            for operand in &call.operands {
                operand.visit(f);
            }
        }
    }

    /// Rewrite every input reference through `f`.
    pub fn map_input_refs<F>(&self, f: &F) -> RexNode
    where
        F: Fn(&InputRef) -> RexNode,
    {
        match self {
            RexNode::InputRef(r) => f(r),
            RexNode::Literal(l) => RexNode::Literal(l.clone()),
            RexNode::Call(call) => RexNode::Call(RexCall {
                kind: call.kind,
                name: call.name.clone(),
                operands: call.operands.iter().map(|o| o.map_input_refs(f)).collect(),
            }),
        }
    }

    /// Structural equality that ignores the display names of input refs.
    pub fn same_shape(&self, other: &RexNode) -> bool {
        match (self, other) {
            (RexNode::InputRef(a), RexNode::InputRef(b)) => a.index == b.index,
            (RexNode::Literal(a), RexNode::Literal(b)) => a == b,
            (RexNode::Call(a), RexNode::Call(b)) => {
                a.kind == b.kind
                    && a.name == b.name
                    && a.operands.len() == b.operands.len()
                    && a
                        .operands
                        .iter()
                        .zip(&b.operands)
                        .all(|(x, y)| x.same_shape(y))
            }
            _ => false,
        }
    }
}

impl RexCall {
    /// `(condition, result)` pairs of a CASE call.
    pub fn case_branches(&self) -> Vec<(&RexNode, &RexNode)> {
        if self.kind != SqlKind::Case {
            return Vec::new();
        }
        let pairs = self.operands.len().saturating_sub(1) / 2;
        (0..pairs)
            .map(|i| (&self.operands[2 * i], &self.operands[2 * i + 1]))
            .collect()
    }

    /// ELSE operand of a CASE call.
    pub fn case_else(&self) -> Option<&RexNode> {
        if self.kind != SqlKind::Case {
            return None;
        }
        self.operands.last()
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Null => write!(f, "NULL"),
            Literal::Boolean(true) => write!(f, "TRUE"),
            Literal::Boolean(false) => write!(f, "FALSE"),
            Literal::Number(n) => write!(f, "{}", n),
            Literal::String(s) => write!(f, "'{}'", s.replace('\'', "''")),
        }
    }
}

impl fmt::Display for RexNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RexNode::InputRef(r) if r.name.is_empty() => write!(f, "${}", r.index),
            RexNode::InputRef(r) => write!(f, "{}", r.name),
            RexNode::Literal(l) => write!(f, "{}", l),
            RexNode::Call(call) => write!(f, "{}", call),
        }
    }
}

impl fmt::Display for RexCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            SqlKind::Function => {
                write!(f, "{}(", self.name)?;
                for (i, operand) in self.operands.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", operand)?;
                }
                write!(f, ")")
            }
            SqlKind::Case => {
                write!(f, "CASE")?;
                for (condition, result) in self.case_branches() {
                    write!(f, " WHEN {} THEN {}", condition, result)?;
                }
                if let Some(else_result) = self.case_else() {
                    write!(f, " ELSE {}", else_result)?;
                }
                write!(f, " END")
            }
            SqlKind::Binary => {
                let left = self.operands.first();
                let right = self.operands.get(1);
                if let (Some(left), Some(right)) = (left, right) {
                    write_operand(f, left)?;
                    write!(f, " {} ", self.name)?;
                    write_operand(f, right)
                } else {
                    write!(f, "{}", self.name)
                }
            }
            SqlKind::Unary => match self.operands.first() {
                Some(operand) if self.name.chars().all(|c| c.is_alphabetic()) => {
                    write!(f, "{} ", self.name)?;
                    write_operand(f, operand)
                }
                Some(operand) => {
                    write!(f, "{}", self.name)?;
                    write_operand(f, operand)
                }
                None => write!(f, "{}", self.name),
            },
            SqlKind::Cast => match self.operands.first() {
                Some(operand) => write!(f, "CAST({} AS {})", operand, self.name),
                None => write!(f, "CAST(NULL AS {})", self.name),
            },
            SqlKind::IsNull | SqlKind::IsNotNull => {
                let suffix = if self.kind == SqlKind::IsNull {
                    "IS NULL"
                } else {
                    "IS NOT NULL"
                };
                match self.operands.first() {
                    Some(operand) => {
                        write_operand(f, operand)?;
                        write!(f, " {}", suffix)
                    }
                    None => write!(f, "NULL {}", suffix),
                }
            }
        }
    }
}

/// Nested infix expressions are parenthesised so the rendered text keeps
/// the tree's precedence.
fn write_operand(f: &mut fmt::Formatter<'_>, operand: &RexNode) -> fmt::Result {
    match operand {
        RexNode::Call(call) if call.kind == SqlKind::Binary => write!(f, "({})", call),
        other => write!(f, "{}", other),
    }
}
