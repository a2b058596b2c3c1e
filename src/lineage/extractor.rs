//! Column lineage extraction.
//!
//! Walks the plan in pre-order and, for every operator, resolves the
//! origins of each output field independently through the column-origin
//! oracle. Where the oracle cannot answer (across a `Correlate`), a manual
//! trace follows the operator structure instead, resolving correlation
//! variables against the enclosing left input.

use tracing::{debug, warn};

use crate::planner::origin::{origins_of, origins_through_expr, push_unique};
use crate::planner::{
    AggregateNode, ColumnOrigin, FilterNode, JoinNode, ProjectNode, RelKind,
    RelOperator, RexNode, SqlKind,
};

use super::alias::AliasContext;
use super::column_lineage::{ColumnLineage, ColumnSource, JoinPath, LineageReport, TransformType};
use super::transform;
use super::LineageError;

/// Extract lineages for every operator output in `plan`.
pub fn extract_all(plan: &RelOperator) -> Vec<ColumnLineage> {
    LineageExtractor::new().extract(plan).lineages
}

/// Stateless entry point; each call builds its own alias context.
#[derive(Debug, Default, Clone, Copy)]
pub struct LineageExtractor;

impl LineageExtractor {
    pub fn new() -> Self {
        Self
    }

    pub fn extract(&self, plan: &RelOperator) -> LineageReport {
        let mut run = Run {
            ctx: AliasContext::build(plan),
            report: LineageReport::default(),
            next_id: 0,
        };
        run.visit(plan, true, None);
        debug!(
            lineages = run.report.lineages.len(),
            join_paths = run.report.join_paths.len(),
            warnings = run.report.warnings.len(),
            "lineage extraction finished"
        );
        run.report
    }
}

struct Run<'a> {
    ctx: AliasContext<'a>,
    report: LineageReport,
    next_id: usize,
}

impl<'a> Run<'a> {
    /// `outer` is the left input of the nearest enclosing `Correlate` when
    /// `node` sits on its right side.
    fn visit(&mut self, node: &'a RelOperator, is_root: bool, outer: Option<&'a RelOperator>) {
        let id = self.next_id;
        self.next_id += 1;

        let lineages = match node {
            RelOperator::Scan(_) => Vec::new(),
            RelOperator::Project(project) => self.project(project, id, outer),
            RelOperator::Aggregate(agg) => self.aggregate(node, agg, id, outer),
            RelOperator::Join(join) => {
                if let Some(condition) = &join.condition {
                    self.join_paths(node, join, condition, outer);
                }
                self.routed(node, RelKind::Join, id, outer)
            }
            RelOperator::Correlate(_) => self.routed(node, RelKind::Correlate, id, outer),
            RelOperator::Union(_) => self.union(node, id, outer),
            RelOperator::Filter(filter) => self.filter(filter, id, outer),
        };
        for mut lineage in lineages {
            lineage.is_root = is_root;
            self.report.lineages.push(lineage);
        }

        match node {
            RelOperator::Correlate(correlate) => {
                self.visit(&correlate.left, false, outer);
                self.visit(&correlate.right, false, Some(correlate.left.as_ref()));
            }
            _ => {
                for input in node.inputs() {
                    self.visit(input, false, outer);
                }
            }
        }
    }

    // ------------------------------------------------------------------------
    // Per-operator rules
    // ------------------------------------------------------------------------

    fn project(&mut self, project: &'a ProjectNode, id: usize, outer: Option<&'a RelOperator>) -> Vec<ColumnLineage> {
        let input_fields = project.input.row_type();
        let mut lineages = Vec::with_capacity(project.exprs.len());
        for (i, (expr, name)) in project.exprs.iter().zip(&project.names).enumerate() {
            let mut lineage = ColumnLineage::new(name, i, id, RelKind::Project);
            lineage.expression = expr.to_string();
            lineage.input_fields = expr
                .input_refs()
                .into_iter()
                .filter_map(|r| input_fields.get(r).cloned())
                .collect();

            if let Some((kind, call)) = transform::detect(expr) {
                lineage.transform_type = kind;
                lineage.filter_condition = transform::transform_condition(kind, call);
            }
            if !expr.is_input_ref() {
                if let Some((function, distinct)) = referenced_aggregate(&project.input, expr) {
                    lineage.aggregation_function = Some(function);
                    lineage.distinct = distinct;
                }
            }

            let oracle = match outer {
                None => origins_through_expr(&project.input, expr),
                Some(_) => None,
            };
            let origins = match oracle {
                Some(origins) if !origins.is_empty() => origins,
                _ => self.trace_expr(&project.input, expr, outer),
            };
            lineage.sources = self.sources(origins, &lineage);
            lineages.push(lineage);
        }
        lineages
    }

    fn aggregate(
        &mut self,
        node: &'a RelOperator,
        agg: &'a AggregateNode,
        id: usize,
        outer: Option<&'a RelOperator>,
    ) -> Vec<ColumnLineage> {
        let input_fields = agg.input.row_type();
        let group_count = agg.group_keys.len();
        let mut lineages = Vec::with_capacity(group_count + agg.agg_calls.len());

        for (i, &key) in agg.group_keys.iter().enumerate() {
            let name = input_fields.get(key).cloned().unwrap_or_default();
            let mut lineage = ColumnLineage::new(&name, i, id, RelKind::Aggregate);
            lineage.expression = name.clone();
            lineage.input_fields = vec![name];
            lineage.transform_type = TransformType::GroupKey;
            let origins = self.resolve_origins(node, i, outer);
            lineage.sources = self.sources(origins, &lineage);
            lineages.push(lineage);
        }

        for (j, call) in agg.agg_calls.iter().enumerate() {
            let index = group_count + j;
            let mut lineage = ColumnLineage::new(&call.name, index, id, RelKind::Aggregate);
            lineage.expression = call.render(&input_fields);
            lineage.input_fields = call
                .args
                .iter()
                .filter_map(|&a| input_fields.get(a).cloned())
                .collect();
            lineage.transform_type = TransformType::Aggregation;
            lineage.aggregation_function = Some(call.function.clone());
            lineage.distinct = call.distinct;
            lineage.filter_arg_index = call.filter_arg;

            let mut condition = call
                .args
                .iter()
                .find_map(|&a| input_expr(&agg.input, a).and_then(transform::aggregation_case_condition));
            if let Some(filter) = call.filter_arg.and_then(|f| input_fields.get(f)) {
                condition
                    .get_or_insert_with(Default::default)
                    .insert("_filter_expression".to_string(), filter.clone().into());
            }
            lineage.filter_condition = condition;

            let origins = self.resolve_origins(node, index, outer);
            lineage.sources = self.sources(origins, &lineage);
            lineages.push(lineage);
        }
        lineages
    }

    fn union(&mut self, node: &'a RelOperator, id: usize, outer: Option<&'a RelOperator>) -> Vec<ColumnLineage> {
        let fields = node.row_type();
        let mut lineages = Vec::with_capacity(fields.len());
        for (i, name) in fields.iter().enumerate() {
            let mut lineage = ColumnLineage::new(name, i, id, RelKind::Union);
            lineage.expression = name.clone();
            lineage.input_fields = vec![name.clone()];
            lineage.transform_type = TransformType::UnionAll;
            let origins = self.resolve_origins(node, i, outer);
            lineage.sources = self.sources(origins, &lineage);
            lineages.push(lineage);
        }
        lineages
    }

    /// Filters pass origins through unchanged, but every input column that
    /// has an origin is surfaced with the predicate attached.
    fn filter(&mut self, filter: &'a FilterNode, id: usize, outer: Option<&'a RelOperator>) -> Vec<ColumnLineage> {
        let condition = transform::filter_expression_condition(&filter.condition);
        let mut lineages = Vec::new();
        for (i, name) in filter.input.row_type().iter().enumerate() {
            let origins = self.resolve_origins(&filter.input, i, outer);
            if origins.is_empty() {
                continue;
            }
            let mut lineage = ColumnLineage::new(name, i, id, RelKind::Filter);
            lineage.expression = name.clone();
            lineage.input_fields = vec![name.clone()];
            lineage.filter_condition = Some(condition.clone());
            lineage.sources = self.sources(origins, &lineage);
            lineages.push(lineage);
        }
        lineages
    }

    /// Join and correlate outputs: index < left arity routes left, the rest
    /// routes right at `index - left_arity`.
    fn routed(&mut self, node: &'a RelOperator, kind: RelKind, id: usize, outer: Option<&'a RelOperator>) -> Vec<ColumnLineage> {
        let fields = node.row_type();
        let mut lineages = Vec::with_capacity(fields.len());
        for (i, name) in fields.iter().enumerate() {
            let mut lineage = ColumnLineage::new(name, i, id, kind);
            lineage.expression = name.clone();
            lineage.input_fields = vec![name.clone()];
            let origins = self.resolve_origins(node, i, outer);
            lineage.sources = self.sources(origins, &lineage);
            lineages.push(lineage);
        }
        lineages
    }

    fn join_paths(&mut self, node: &'a RelOperator, join: &'a JoinNode, condition: &RexNode, outer: Option<&'a RelOperator>) {
        let mut pairs = Vec::new();
        equi_pairs(condition, &mut pairs);
        let left_arity = join.left.arity();
        for (a, b) in pairs {
            let (left, right) = if a < left_arity { (a, b) } else { (b, a) };
            let left_origin = self.resolve_origins(node, left, outer).into_iter().next();
            let right_origin = self.resolve_origins(node, right, outer).into_iter().next();
            if let (Some(l), Some(r)) = (left_origin, right_origin) {
                self.report.join_paths.push(JoinPath {
                    left_table: self.ctx.resolve(&l.table),
                    left_column: l.column,
                    right_table: self.ctx.resolve(&r.table),
                    right_column: r.column,
                    join_kind: join.kind,
                    condition: condition.to_string(),
                });
            }
        }
    }

    // ------------------------------------------------------------------------
    // Origin resolution
    // ------------------------------------------------------------------------

    /// Oracle first; manual tracing when it has no answer.
    ///
    /// Inside a correlated subtree the oracle is skipped: it cannot see
    /// correlation variables and would return partial origins.
    fn resolve_origins(&mut self, node: &'a RelOperator, index: usize, outer: Option<&'a RelOperator>) -> Vec<ColumnOrigin> {
        if outer.is_none() {
            if let Some(origins) = origins_of(node, index) {
                if !origins.is_empty() {
                    return origins;
                }
            }
        }
        self.trace(node, index, outer)
    }

    /// Origins of field `index` of `node`, following the operator structure.
    fn trace(&mut self, node: &'a RelOperator, index: usize, outer: Option<&'a RelOperator>) -> Vec<ColumnOrigin> {
        match node {
            RelOperator::Scan(_) => origins_of(node, index).unwrap_or_default(),
            RelOperator::Filter(filter) => self.resolve_origins(&filter.input, index, outer),
            RelOperator::Project(project) => match project.exprs.get(index) {
                Some(expr) => self.trace_expr(&project.input, expr, outer),
                None => Vec::new(),
            },
            RelOperator::Aggregate(agg) => {
                let group_count = agg.group_keys.len();
                if index < group_count {
                    return self.resolve_origins(&agg.input, agg.group_keys[index], outer);
                }
                let Some(call) = agg.agg_calls.get(index - group_count) else {
                    return Vec::new();
                };
                let text = call.render(&agg.input.row_type());
                let mut origins = Vec::new();
                for &arg in &call.args {
                    for origin in self.resolve_origins(&agg.input, arg, outer) {
                        push_unique(&mut origins, origin.wrapped_in(text.clone()));
                    }
                }
                origins
            }
            RelOperator::Join(join) => {
                let left_arity = join.left.arity();
                if index < left_arity {
                    self.resolve_origins(&join.left, index, outer)
                } else {
                    self.resolve_origins(&join.right, index - left_arity, outer)
                }
            }
            RelOperator::Correlate(correlate) => {
                let left_arity = correlate.left.arity();
                if index < left_arity {
                    self.resolve_origins(&correlate.left, index, outer)
                } else {
                    self.resolve_origins(&correlate.right, index - left_arity, Some(correlate.left.as_ref()))
                }
            }
            RelOperator::Union(union) => {
                let mut origins = Vec::new();
                for (k, input) in union.inputs.iter().enumerate() {
                    for origin in self.resolve_origins(input, index, outer) {
                        push_unique(&mut origins, origin.tagged(format!("UNION input#{}", k)));
                    }
                }
                origins
            }
        }
    }

    fn trace_expr(&mut self, input: &'a RelOperator, expr: &RexNode, outer: Option<&'a RelOperator>) -> Vec<ColumnOrigin> {
        let wrap = (!expr.is_input_ref()).then(|| expr.to_string());
        let wrapped = |origin: ColumnOrigin| match &wrap {
            Some(text) => origin.wrapped_in(text.clone()),
            None => origin,
        };

        let mut origins = Vec::new();
        for index in expr.input_refs() {
            for origin in self.resolve_origins(input, index, outer) {
                push_unique(&mut origins, wrapped(origin));
            }
        }
        for variable in expr.correlation_variables() {
            for origin in self.trace_correlated(&variable, outer) {
                push_unique(&mut origins, wrapped(origin));
            }
        }
        origins
    }

    /// Resolve a `qualifier.column` correlation variable against the left
    /// input of the enclosing correlate.
    fn trace_correlated(&mut self, variable: &str, outer: Option<&'a RelOperator>) -> Vec<ColumnOrigin> {
        let (qualifier, column) = variable.rsplit_once('.').unwrap_or(("", variable));
        let Some(outer) = outer else {
            let error = LineageError::UnsupportedOperator {
                kind: RelKind::Correlate,
                reason: format!("correlation variable `{}` outside a correlate", variable),
            };
            warn!(%error, "skipping correlation variable");
            self.report.warnings.push(error);
            return Vec::new();
        };
        let position = outer
            .row_type()
            .iter()
            .position(|f| f.eq_ignore_ascii_case(column));
        match position {
            Some(index) => self.resolve_origins(outer, index, None),
            None => {
                // Not in the left row: attribute it to the left subtree as a
                // whole and let alias resolution find the table.
                let table = self
                    .ctx
                    .name_for(outer)
                    .unwrap_or_else(|| qualifier.to_string());
                let error = LineageError::UnsupportedOperator {
                    kind: RelKind::Correlate,
                    reason: format!("correlation variable `{}` not found in left input", variable),
                };
                warn!(%error, "tracing correlation variable through alias");
                self.report.warnings.push(error);
                vec![ColumnOrigin::new(table, column, 0)]
            }
        }
    }

    /// Convert origins to sources, resolving synthetic table names and
    /// recording an OriginNotFound warning when nothing was found for an
    /// expression that does reference input fields.
    fn sources(&mut self, origins: Vec<ColumnOrigin>, lineage: &ColumnLineage) -> Vec<ColumnSource> {
        if origins.is_empty() && !lineage.input_fields.is_empty() {
            let error = LineageError::OriginNotFound {
                output: lineage.output_name.clone(),
                node_id: lineage.node_id,
            };
            warn!(%error, "lineage recorded without sources");
            self.report.warnings.push(error);
        }
        origins
            .into_iter()
            .map(|mut origin| {
                origin.table = self.ctx.resolve(&origin.table);
                ColumnSource::from(origin)
            })
            .collect()
    }
}

/// Aggregate call behind the first aggregate-output field `expr` reads from
/// `input`, looking through filters.
fn referenced_aggregate(input: &RelOperator, expr: &RexNode) -> Option<(String, bool)> {
    let mut node = input;
    while let RelOperator::Filter(filter) = node {
        node = filter.input.as_ref();
    }
    let RelOperator::Aggregate(agg) = node else {
        return None;
    };
    let group_count = agg.group_keys.len();
    expr.input_refs()
        .into_iter()
        .filter(|&r| r >= group_count)
        .find_map(|r| agg.agg_calls.get(r - group_count))
        .map(|call| (call.function.clone(), call.distinct))
}

/// Expression computing field `index` of `node`, when `node` is a Project.
fn input_expr(node: &RelOperator, index: usize) -> Option<&RexNode> {
    match node {
        RelOperator::Project(project) => project.exprs.get(index),
        _ => None,
    }
}

/// `a = b` pairs of input refs inside a conjunctive join condition.
fn equi_pairs(condition: &RexNode, pairs: &mut Vec<(usize, usize)>) {
    let Some(call) = condition.as_call() else {
        return;
    };
    if call.kind != SqlKind::Binary {
        return;
    }
    match (call.name.as_str(), call.operands.as_slice()) {
        ("AND", [left, right]) => {
            equi_pairs(left, pairs);
            equi_pairs(right, pairs);
        }
        ("=", [RexNode::InputRef(a), RexNode::InputRef(b)]) => pairs.push((a.index, b.index)),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::build_plan;

    #[test]
    fn test_single_aggregate_lineage() {
        let plan = build_plan("SELECT SUM(t.amount) AS total FROM orders t").unwrap();
        let lineages = extract_all(&plan);
        assert_eq!(lineages.len(), 1);
        let total = &lineages[0];
        assert_eq!(total.output_name, "total");
        assert_eq!(total.aggregation_function.as_deref(), Some("SUM"));
        assert_eq!(total.sources[0].source_table, "orders");
        assert_eq!(total.sources[0].source_column, "amount");
        assert_eq!(total.sources[0].transformations, vec!["SUM(amount)".to_string()]);
    }

    #[test]
    fn test_project_over_aggregate_infers_function() {
        let plan = build_plan("SELECT IFNULL(SUM(amount), 0) AS total FROM orders").unwrap();
        let report = LineageExtractor::new().extract(&plan);
        let root = report.root_lineages();
        assert_eq!(root.len(), 1);
        assert_eq!(root[0].transform_type, TransformType::Ifnull);
        assert_eq!(root[0].aggregation_function.as_deref(), Some("SUM"));
        assert_eq!(
            root[0].sources[0].full_lineage(),
            "orders.amount -> SUM(amount) -> IFNULL(SUM(amount), 0)"
        );
    }

    #[test]
    fn test_join_paths() {
        let plan = build_plan(
            "SELECT o.amount, c.region FROM orders o JOIN customers c ON o.customer_id = c.id",
        )
        .unwrap();
        let report = LineageExtractor::new().extract(&plan);
        assert_eq!(report.join_paths.len(), 1);
        let path = &report.join_paths[0];
        assert_eq!((path.left_table.as_str(), path.left_column.as_str()), ("orders", "customer_id"));
        assert_eq!((path.right_table.as_str(), path.right_column.as_str()), ("customers", "id"));
    }

    #[test]
    fn test_correlated_apply_traces_through_left_input() {
        let plan = build_plan(
            "SELECT o.id, x.doubled FROM orders o \
             CROSS APPLY (SELECT o.amount * 2 AS doubled FROM dual) x",
        )
        .unwrap();
        let report = LineageExtractor::new().extract(&plan);
        let doubled = report
            .root_lineages()
            .into_iter()
            .find(|l| l.output_name == "doubled")
            .unwrap();
        assert_eq!(doubled.sources.len(), 1);
        assert_eq!(doubled.sources[0].source_table, "orders");
        assert_eq!(doubled.sources[0].source_column, "amount");
    }
}
