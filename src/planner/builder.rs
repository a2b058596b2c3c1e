//! SQL text → `RelOperator`.
//!
//! Lowers one `SELECT` statement into a relational plan:
//!
//! ```text
//! SELECT c, SUM(x) AS total          Project(c, total)
//! FROM t JOIN u ON ...        →        Aggregate(group={0}, total=SUM(x))
//! WHERE p                                Project(c, x)
//! GROUP BY c                               Filter(p)
//!                                            Join(...)
//!                                              Scan(t)  Scan(u)
//! ```
//!
//! Base-table schemas are not known, so a scan's columns are the columns the
//! query references on that table, in first-reference order. Column
//! references are first resolved to *slots* (relation, column) while the
//! FROM scope is still growing, then remapped to positions in the joined row
//! once every scan's column list is final.

use std::collections::HashMap;

use sqlparser::ast::{
    BinaryOperator, Expr, Function, GroupByExpr, JoinConstraint, JoinOperator, ObjectName, Query,
    Select, SelectItem, SetExpr, SetOperator, SetQuantifier, Statement, TableFactor,
    TableWithJoins, Value,
};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use tracing::{debug, warn};

use super::expr_converter::{
    aggregate_calls, contains_aggregate, convert_expr, function_args, function_name,
    is_aggregate_call, is_distinct_call, ColumnScope,
};
use super::rel::{
    AggregateCall, AggregateNode, CorrelateNode, FilterNode, JoinKind, JoinNode, ProjectNode,
    RelOperator, ScanNode, UnionNode,
};
use super::rex::RexNode;
use super::{PlanError, PlanResult};

/// Lower `sql` with a default [`PlanBuilder`].
pub fn build_plan(sql: &str) -> PlanResult<RelOperator> {
    PlanBuilder::new().build(sql)
}

/// Lowers SQL queries into relational plans.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlanBuilder;

/// CTEs visible to a query, lower-cased name → lowered plan.
type CteScope = HashMap<String, RelOperator>;

impl PlanBuilder {
    pub fn new() -> Self {
        Self
    }

    /// Parse and lower a single SQL statement.
    pub fn build(&self, sql: &str) -> PlanResult<RelOperator> {
        let statements = Parser::parse_sql(&GenericDialect {}, sql)?;
        let statement = match statements.as_slice() {
            [] => return Err(PlanError::EmptyQuery),
            [statement] => statement,
            many => return Err(PlanError::MultipleStatements(many.len())),
        };

        match statement {
            Statement::Query(query) => self.build_query(query),
            other => Err(PlanError::UnsupportedStatement(statement_keyword(other))),
        }
    }

    /// Lower an already-parsed query.
    pub fn build_query(&self, query: &Query) -> PlanResult<RelOperator> {
        let plan = self.lower_query(query, &CteScope::new(), &[])?;
        debug!(tables = ?plan.scanned_tables(), "built plan");
        Ok(plan)
    }

    fn lower_query(&self, query: &Query, ctes: &CteScope, outer: &[String]) -> PlanResult<RelOperator> {
        let mut scope = ctes.clone();
        if let Some(with) = &query.with {
            for cte in &with.cte_tables {
                let plan = self.lower_query(&cte.query, &scope, outer)?;
                scope.insert(cte.alias.name.value.to_lowercase(), plan);
            }
        }

        if query.order_by.is_some() {
            debug!("ORDER BY does not change column provenance, dropped");
        }
        if query.limit.is_some() || query.offset.is_some() {
            debug!("LIMIT/OFFSET does not change column provenance, dropped");
        }

        self.lower_set_expr(&query.body, &scope, outer)
    }

    fn lower_set_expr(&self, body: &SetExpr, ctes: &CteScope, outer: &[String]) -> PlanResult<RelOperator> {
        match body {
            SetExpr::Select(select) => self.lower_select(select, ctes, outer),
            SetExpr::Query(query) => self.lower_query(query, ctes, outer),
            SetExpr::SetOperation {
                op: SetOperator::Union,
                set_quantifier,
                left,
                right,
            } => {
                let all = matches!(set_quantifier, SetQuantifier::All | SetQuantifier::AllByName);
                let mut inputs = Vec::new();
                for side in [left, right] {
                    match self.lower_set_expr(side, ctes, outer)? {
                        RelOperator::Union(union) if union.all == all => inputs.extend(union.inputs),
                        other => inputs.push(other),
                    }
                }
                let arity = inputs.first().map(RelOperator::arity).unwrap_or(0);
                if let Some(mismatch) = inputs.iter().find(|input| input.arity() != arity) {
                    return Err(PlanError::Unsupported(format!(
                        "UNION branches have {} and {} columns",
                        arity,
                        mismatch.arity()
                    )));
                }
                Ok(RelOperator::Union(UnionNode { inputs, all }))
            }
            SetExpr::SetOperation { op, .. } => Err(PlanError::Unsupported(format!("{} queries", op))),
            SetExpr::Values(_) => Err(PlanError::Unsupported("VALUES lists".to_string())),
            other => Err(PlanError::Unsupported(format!("query body `{}`", other))),
        }
    }

    fn lower_select(&self, select: &Select, ctes: &CteScope, outer: &[String]) -> PlanResult<RelOperator> {
        let mut scope = FromScope {
            outer: outer.to_vec(),
            ..FromScope::default()
        };
        let mut steps = Vec::new();
        for (i, from) in select.from.iter().enumerate() {
            let lead = (i > 0).then(JoinStep::comma);
            self.add_table_with_joins(from, &mut scope, &mut steps, ctes, lead)?;
        }
        if scope.relations.is_empty() {
            return Err(PlanError::Unsupported("SELECT without FROM".to_string()));
        }
        if select.distinct.is_some() {
            debug!("DISTINCT does not change column provenance, dropped");
        }

        let mut predicates = Vec::new();
        if let Some(selection) = &select.selection {
            for conjunct in conjuncts(selection) {
                match convert_expr(conjunct, &mut scope) {
                    Ok(predicate) => predicates.push(predicate),
                    Err(PlanError::Unsupported(reason)) => {
                        warn!(%reason, predicate = %conjunct, "dropping WHERE predicate");
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        let group_by = group_by_exprs(select)?;
        let aggregated = !group_by.is_empty()
            || select.projection.iter().filter_map(item_expr).any(contains_aggregate)
            || select.having.as_ref().is_some_and(contains_aggregate);

        if aggregated {
            lower_aggregate(select, scope, steps, predicates, &group_by)
        } else {
            lower_plain(select, scope, steps, predicates)
        }
    }

    fn add_table_with_joins(
        &self,
        from: &TableWithJoins,
        scope: &mut FromScope,
        steps: &mut Vec<JoinStep>,
        ctes: &CteScope,
        lead: Option<JoinStep>,
    ) -> PlanResult<()> {
        self.add_factor(&from.relation, scope, steps, ctes, lead)?;
        for join in &from.joins {
            let (kind, correlated, on) = join_shape(&join.join_operator)?;
            let step = JoinStep {
                kind,
                correlated,
                condition: None,
            };
            self.add_factor(&join.relation, scope, steps, ctes, Some(step))?;
            if let Some(on) = on {
                let condition = convert_expr(on, scope)?;
                if let Some(last) = steps.last_mut() {
                    last.condition = Some(condition);
                }
            }
        }
        Ok(())
    }

    fn add_factor(
        &self,
        factor: &TableFactor,
        scope: &mut FromScope,
        steps: &mut Vec<JoinStep>,
        ctes: &CteScope,
        lead: Option<JoinStep>,
    ) -> PlanResult<()> {
        let relation = match factor {
            TableFactor::Table { name, alias, .. } => {
                let table = object_name(name);
                let alias = alias.as_ref().map(|a| a.name.value.clone());
                let source = match ctes.get(&table.to_lowercase()) {
                    Some(plan) => Source::Derived {
                        fields: plan.row_type(),
                        plan: plan.clone(),
                    },
                    None => Source::Table {
                        columns: Vec::new(),
                    },
                };
                Relation {
                    name: table,
                    alias,
                    source,
                }
            }
            TableFactor::Derived {
                lateral,
                subquery,
                alias,
            } => {
                let correlated = *lateral || lead.as_ref().is_some_and(|step| step.correlated);
                let outer = if correlated {
                    scope.visible_names()
                } else {
                    Vec::new()
                };
                let plan = self.lower_query(subquery, ctes, &outer)?;
                if correlated {
                    // Columns read through correlation variables belong to
                    // the left side's row.
                    for variable in plan_correlation_variables(&plan) {
                        if let Some((qualifier, column)) = variable.rsplit_once('.') {
                            if scope.column(Some(qualifier), column).is_err() {
                                debug!(%variable, "correlation variable refers past the enclosing query");
                            }
                        }
                    }
                }
                let lead = lead.map(|mut step| {
                    step.correlated |= *lateral;
                    step
                });
                let name = alias
                    .as_ref()
                    .map(|a| a.name.value.clone())
                    .unwrap_or_else(|| format!("derived#{}", scope.relations.len()));
                scope.relations.push(Relation {
                    name,
                    alias: None,
                    source: Source::Derived {
                        fields: plan.row_type(),
                        plan,
                    },
                });
                steps.extend(lead);
                return Ok(());
            }
            TableFactor::NestedJoin {
                table_with_joins, ..
            } => return self.add_table_with_joins(table_with_joins, scope, steps, ctes, lead),
            other => return Err(PlanError::Unsupported(format!("FROM item `{}`", other))),
        };

        scope.relations.push(relation);
        steps.extend(lead);
        Ok(())
    }
}

// ============================================================================
// FROM scope
// ============================================================================

#[derive(Debug)]
enum Source {
    /// Base table; columns grow as the query references them.
    Table { columns: Vec<String> },
    /// Inlined subquery or CTE with a fixed row type.
    Derived { fields: Vec<String>, plan: RelOperator },
}

#[derive(Debug)]
struct Relation {
    name: String,
    alias: Option<String>,
    source: Source,
}

impl Relation {
    fn answers_to(&self, qualifier: &str) -> bool {
        if let Some(alias) = &self.alias {
            return alias.eq_ignore_ascii_case(qualifier);
        }
        self.name.eq_ignore_ascii_case(qualifier)
            || self
                .name
                .rsplit('.')
                .next()
                .is_some_and(|last| last.eq_ignore_ascii_case(qualifier))
    }

    fn fields(&self) -> &[String] {
        match &self.source {
            Source::Table { columns } => columns,
            Source::Derived { fields, .. } => fields,
        }
    }

    fn position(&self, column: &str) -> Option<usize> {
        self.fields()
            .iter()
            .position(|field| field.eq_ignore_ascii_case(column))
    }

    fn into_plan(self) -> RelOperator {
        match self.source {
            Source::Table { columns } => RelOperator::Scan(ScanNode {
                table: self.name,
                columns,
            }),
            Source::Derived { plan, .. } => plan,
        }
    }
}

/// One entry per relation after the first: how it joins onto the left.
#[derive(Debug)]
struct JoinStep {
    kind: JoinKind,
    correlated: bool,
    /// ON condition in slot space.
    condition: Option<RexNode>,
}

impl JoinStep {
    fn comma() -> Self {
        Self {
            kind: JoinKind::Inner,
            correlated: false,
            condition: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Slot {
    relation: usize,
    column: usize,
}

#[derive(Debug, Default)]
struct FromScope {
    relations: Vec<Relation>,
    slots: Vec<Slot>,
    /// Relations of the enclosing query visible to a lateral subquery.
    outer: Vec<String>,
}

impl FromScope {
    fn slot(&mut self, relation: usize, column: usize) -> RexNode {
        let name = self.relations[relation].fields()[column].clone();
        let slot = Slot { relation, column };
        let index = match self.slots.iter().position(|s| *s == slot) {
            Some(i) => i,
            None => {
                self.slots.push(slot);
                self.slots.len() - 1
            }
        };
        RexNode::input_ref(index, name)
    }

    /// Column position within `relation`, adding it to a base table's
    /// column list on first reference.
    fn column_of(&mut self, relation: usize, name: &str) -> Option<usize> {
        if let Some(position) = self.relations[relation].position(name) {
            return Some(position);
        }
        match &mut self.relations[relation].source {
            Source::Table { columns } => {
                columns.push(name.to_string());
                Some(columns.len() - 1)
            }
            Source::Derived { .. } => None,
        }
    }

    fn visible_names(&self) -> Vec<String> {
        let mut names = self.outer.clone();
        for relation in &self.relations {
            names.push(relation.alias.clone().unwrap_or_else(|| relation.name.clone()));
        }
        names
    }

    fn offsets(&self) -> Vec<usize> {
        let mut offsets = Vec::with_capacity(self.relations.len());
        let mut next = 0;
        for relation in &self.relations {
            offsets.push(next);
            next += relation.fields().len();
        }
        offsets
    }

    /// Rewrite slot references to positions in the joined row.
    fn remap(&self, expr: &RexNode, offsets: &[usize]) -> RexNode {
        expr.map_input_refs(&|r| {
            let slot = self.slots[r.index];
            RexNode::input_ref(offsets[slot.relation] + slot.column, r.name.clone())
        })
    }

    /// Every field of `relation` as a reference into the joined row.
    fn expand(&self, relation: usize, offsets: &[usize]) -> Vec<(RexNode, String)> {
        let rel = &self.relations[relation];
        if rel.fields().is_empty() {
            warn!(table = %rel.name, "wildcard over a table with no referenced columns expands to nothing");
        }
        rel.fields()
            .iter()
            .enumerate()
            .map(|(i, field)| (RexNode::input_ref(offsets[relation] + i, field), field.clone()))
            .collect()
    }

    /// Left-deep join of every relation with the WHERE predicates on top.
    fn into_input(self, steps: Vec<JoinStep>, offsets: &[usize], predicates: Vec<RexNode>) -> PlanResult<RelOperator> {
        let conditions: Vec<Option<RexNode>> = steps
            .iter()
            .map(|step| step.condition.as_ref().map(|c| self.remap(c, offsets)))
            .collect();
        let predicates: Vec<RexNode> = predicates.iter().map(|p| self.remap(p, offsets)).collect();

        let mut relations = self.relations.into_iter();
        let mut plan = relations
            .next()
            .map(Relation::into_plan)
            .ok_or_else(|| PlanError::Unsupported("SELECT without FROM".to_string()))?;
        for ((relation, step), condition) in relations.zip(steps).zip(conditions) {
            let right = Box::new(relation.into_plan());
            plan = if step.correlated {
                if condition.is_some() {
                    debug!("lateral join condition does not change column provenance, dropped");
                }
                RelOperator::Correlate(CorrelateNode {
                    left: Box::new(plan),
                    right,
                    kind: step.kind,
                })
            } else {
                RelOperator::Join(JoinNode {
                    left: Box::new(plan),
                    right,
                    condition,
                    kind: step.kind,
                })
            };
        }

        if let Some(condition) = and_all(predicates) {
            plan = RelOperator::Filter(FilterNode {
                input: Box::new(plan),
                condition,
            });
        }
        Ok(plan)
    }
}

impl ColumnScope for FromScope {
    fn column(&mut self, qualifier: Option<&str>, name: &str) -> PlanResult<RexNode> {
        match qualifier {
            Some(qualifier) => {
                let Some(relation) = self.relations.iter().position(|r| r.answers_to(qualifier)) else {
                    if self.outer.iter().any(|o| o.eq_ignore_ascii_case(qualifier)) {
                        // Correlation variable: a value of the enclosing row.
                        return Ok(RexNode::correlation(format!("{}.{}", qualifier, name)));
                    }
                    return Err(PlanError::UnknownTable(qualifier.to_string()));
                };
                let column = self
                    .column_of(relation, name)
                    .ok_or_else(|| PlanError::UnknownColumn(format!("{}.{}", qualifier, name)))?;
                Ok(self.slot(relation, column))
            }
            None => {
                let known = self
                    .relations
                    .iter()
                    .enumerate()
                    .find_map(|(i, r)| r.position(name).map(|c| (i, c)));
                if let Some((relation, column)) = known {
                    return Ok(self.slot(relation, column));
                }
                // Unknown schema: attribute the column to the first base table.
                let table = self
                    .relations
                    .iter()
                    .position(|r| matches!(r.source, Source::Table { .. }))
                    .ok_or_else(|| PlanError::UnknownColumn(name.to_string()))?;
                let column = self
                    .column_of(table, name)
                    .ok_or_else(|| PlanError::UnknownColumn(name.to_string()))?;
                Ok(self.slot(table, column))
            }
        }
    }
}

// ============================================================================
// Plain and aggregate SELECT lowering
// ============================================================================

enum Output {
    Expr { node: RexNode, name: String },
    Wildcard(Option<usize>),
}

fn lower_plain(
    select: &Select,
    mut scope: FromScope,
    steps: Vec<JoinStep>,
    predicates: Vec<RexNode>,
) -> PlanResult<RelOperator> {
    let mut outputs = Vec::with_capacity(select.projection.len());
    for (i, item) in select.projection.iter().enumerate() {
        let output = match item {
            SelectItem::UnnamedExpr(expr) => Output::Expr {
                node: convert_expr(expr, &mut scope)?,
                name: output_name(expr, None, i),
            },
            SelectItem::ExprWithAlias { expr, alias } => Output::Expr {
                node: convert_expr(expr, &mut scope)?,
                name: alias.value.clone(),
            },
            SelectItem::Wildcard(_) => Output::Wildcard(None),
            SelectItem::QualifiedWildcard(name, _) => {
                let qualifier = object_name(name);
                let relation = scope
                    .relations
                    .iter()
                    .position(|r| r.answers_to(&qualifier))
                    .ok_or(PlanError::UnknownTable(qualifier))?;
                Output::Wildcard(Some(relation))
            }
        };
        outputs.push(output);
    }

    let offsets = scope.offsets();
    let mut exprs = Vec::new();
    let mut names = Vec::new();
    for output in outputs {
        match output {
            Output::Expr { node, name } => {
                exprs.push(scope.remap(&node, &offsets));
                names.push(name);
            }
            Output::Wildcard(relation) => {
                let relations: Vec<usize> = match relation {
                    Some(r) => vec![r],
                    None => (0..scope.relations.len()).collect(),
                };
                for r in relations {
                    for (node, name) in scope.expand(r, &offsets) {
                        exprs.push(node);
                        names.push(name);
                    }
                }
            }
        }
    }

    let input = scope.into_input(steps, &offsets, predicates)?;
    Ok(project(input, exprs, names))
}

/// An aggregate call in slot space.
#[derive(Debug)]
struct AggSpec {
    function: String,
    distinct: bool,
    args: Vec<RexNode>,
    filter: Option<RexNode>,
    alias: Option<String>,
}

impl AggSpec {
    fn convert<S: ColumnScope>(func: &Function, scope: &mut S) -> PlanResult<Self> {
        let mut args = Vec::new();
        for arg in function_args(func).into_iter().flatten() {
            args.push(convert_expr(arg, scope)?);
        }
        let filter = func
            .filter
            .as_deref()
            .map(|f| convert_expr(f, scope))
            .transpose()?;
        Ok(Self {
            function: function_name(func),
            distinct: is_distinct_call(func),
            args,
            filter,
            alias: None,
        })
    }

    fn same_call(&self, other: &AggSpec) -> bool {
        self.function == other.function
            && self.distinct == other.distinct
            && self.args.len() == other.args.len()
            && self.args.iter().zip(&other.args).all(|(a, b)| a.same_shape(b))
            && match (&self.filter, &other.filter) {
                (Some(a), Some(b)) => a.same_shape(b),
                (None, None) => true,
                _ => false,
            }
    }
}

fn register_call(calls: &mut Vec<AggSpec>, spec: AggSpec) {
    match calls.iter_mut().find(|existing| existing.same_call(&spec)) {
        Some(existing) => {
            if existing.alias.is_none() {
                existing.alias = spec.alias;
            }
        }
        None => calls.push(spec),
    }
}

/// Resolves select items and HAVING above the aggregate: group expressions
/// and aggregate calls become references to the aggregate's output.
struct AggScope<'a> {
    rows: &'a mut FromScope,
    groups: &'a [RexNode],
    group_names: &'a [String],
    calls: &'a [AggSpec],
    call_names: &'a [String],
}

impl AggScope<'_> {
    fn group_ref(&self, node: &RexNode) -> Option<RexNode> {
        self.groups
            .iter()
            .position(|g| g.same_shape(node))
            .map(|j| RexNode::input_ref(j, self.group_names[j].clone()))
    }
}

impl ColumnScope for AggScope<'_> {
    fn column(&mut self, qualifier: Option<&str>, name: &str) -> PlanResult<RexNode> {
        let node = self.rows.column(qualifier, name)?;
        self.group_ref(&node).ok_or_else(|| {
            PlanError::NotGrouped(match qualifier {
                Some(q) => format!("{}.{}", q, name),
                None => name.to_string(),
            })
        })
    }

    fn intercept(&mut self, expr: &Expr) -> PlanResult<Option<RexNode>> {
        if matches!(
            expr,
            Expr::Identifier(_) | Expr::CompoundIdentifier(_) | Expr::Value(_)
        ) || contains_aggregate(expr)
        {
            return Ok(None);
        }
        // `DATE(created_at)` grouped as a whole matches as a whole.
        match convert_expr(expr, &mut *self.rows) {
            Ok(node) => Ok(self.group_ref(&node)),
            Err(_) => Ok(None),
        }
    }

    fn aggregate(&mut self, func: &Function) -> PlanResult<RexNode> {
        let spec = AggSpec::convert(func, &mut *self.rows)?;
        let i = self
            .calls
            .iter()
            .position(|call| call.same_call(&spec))
            .ok_or_else(|| PlanError::Unsupported(format!("aggregate `{}`", func)))?;
        Ok(RexNode::input_ref(
            self.groups.len() + i,
            self.call_names[i].clone(),
        ))
    }
}

fn lower_aggregate(
    select: &Select,
    mut scope: FromScope,
    steps: Vec<JoinStep>,
    predicates: Vec<RexNode>,
    group_by: &[&Expr],
) -> PlanResult<RelOperator> {
    let mut groups: Vec<RexNode> = Vec::new();
    for expr in group_by {
        let node = convert_expr(expr, &mut scope)?;
        if !groups.iter().any(|g| g.same_shape(&node)) {
            groups.push(node);
        }
    }

    let mut calls: Vec<AggSpec> = Vec::new();
    let mut items = Vec::with_capacity(select.projection.len());
    for item in &select.projection {
        let (expr, alias) = match item {
            SelectItem::UnnamedExpr(expr) => (expr, None),
            SelectItem::ExprWithAlias { expr, alias } => (expr, Some(alias.value.clone())),
            SelectItem::Wildcard(_) | SelectItem::QualifiedWildcard(..) => {
                return Err(PlanError::Unsupported(
                    "wildcard in an aggregate query".to_string(),
                ))
            }
        };
        let exact = matches!(strip_parens(expr), Expr::Function(f) if is_aggregate_call(f));
        for func in aggregate_calls(expr) {
            let mut spec = AggSpec::convert(func, &mut scope)?;
            if exact {
                spec.alias = alias.clone();
            }
            register_call(&mut calls, spec);
        }
        items.push((expr, alias));
    }
    if let Some(having) = &select.having {
        for func in aggregate_calls(having) {
            let spec = AggSpec::convert(func, &mut scope)?;
            register_call(&mut calls, spec);
        }
    }

    // Pre-aggregate projection: group expressions, then call arguments and
    // FILTER conditions, each computed once.
    let mut pre: Vec<RexNode> = groups.clone();
    let mut agg_calls = Vec::with_capacity(calls.len());
    for spec in &calls {
        let args = spec.args.iter().map(|a| field_for(&mut pre, a)).collect();
        let filter_arg = spec.filter.as_ref().map(|f| field_for(&mut pre, f));
        agg_calls.push(AggregateCall {
            function: spec.function.clone(),
            distinct: spec.distinct,
            args,
            filter_arg,
            name: String::new(),
        });
    }
    let pre_names: Vec<String> = pre.iter().map(field_name).collect();
    for (call, spec) in agg_calls.iter_mut().zip(&calls) {
        call.name = spec
            .alias
            .clone()
            .unwrap_or_else(|| call.render(&pre_names));
    }
    let group_names: Vec<String> = pre_names[..groups.len()].to_vec();
    let call_names: Vec<String> = agg_calls.iter().map(|c| c.name.clone()).collect();

    let mut exprs = Vec::with_capacity(items.len());
    let mut names = Vec::with_capacity(items.len());
    let having;
    {
        let mut agg_scope = AggScope {
            rows: &mut scope,
            groups: &groups,
            group_names: &group_names,
            calls: &calls,
            call_names: &call_names,
        };
        for (i, (expr, alias)) in items.iter().enumerate() {
            exprs.push(convert_expr(expr, &mut agg_scope)?);
            names.push(output_name(expr, alias.as_deref(), i));
        }
        having = select
            .having
            .as_ref()
            .map(|h| convert_expr(h, &mut agg_scope))
            .transpose()?;
    }

    let offsets = scope.offsets();
    let pre_exprs: Vec<RexNode> = pre.iter().map(|e| scope.remap(e, &offsets)).collect();
    let input = scope.into_input(steps, &offsets, predicates)?;
    let input = project(input, pre_exprs, pre_names);

    let mut plan = RelOperator::Aggregate(AggregateNode {
        input: Box::new(input),
        group_keys: (0..groups.len()).collect(),
        agg_calls,
    });
    if let Some(condition) = having {
        plan = RelOperator::Filter(FilterNode {
            input: Box::new(plan),
            condition,
        });
    }
    Ok(project(plan, exprs, names))
}

/// Index of `expr` in `fields`, appending it when not yet present.
fn field_for(fields: &mut Vec<RexNode>, expr: &RexNode) -> usize {
    match fields.iter().position(|f| f.same_shape(expr)) {
        Some(i) => i,
        None => {
            fields.push(expr.clone());
            fields.len() - 1
        }
    }
}

fn field_name(expr: &RexNode) -> String {
    match expr {
        RexNode::InputRef(r) => r.name.clone(),
        other => other.to_string(),
    }
}

/// Project `exprs` over `input`, or `input` itself when the projection
/// would be an identity.
fn project(input: RelOperator, exprs: Vec<RexNode>, names: Vec<String>) -> RelOperator {
    let identity = exprs.len() == input.arity()
        && exprs
            .iter()
            .enumerate()
            .all(|(i, e)| matches!(e, RexNode::InputRef(r) if r.index == i))
        && names == input.row_type();
    if identity {
        return input;
    }
    RelOperator::Project(ProjectNode {
        input: Box::new(input),
        exprs,
        names,
    })
}

// ============================================================================
// AST helpers
// ============================================================================

fn statement_keyword(statement: &Statement) -> String {
    statement
        .to_string()
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_uppercase()
}

fn object_name(name: &ObjectName) -> String {
    name.0
        .iter()
        .map(|ident| ident.value.as_str())
        .collect::<Vec<_>>()
        .join(".")
}

fn plan_correlation_variables(plan: &RelOperator) -> Vec<String> {
    let mut variables = Vec::new();
    for node in plan.preorder() {
        let exprs: Vec<&RexNode> = match node {
            RelOperator::Project(p) => p.exprs.iter().collect(),
            RelOperator::Filter(f) => vec![&f.condition],
            RelOperator::Join(j) => j.condition.iter().collect(),
            _ => Vec::new(),
        };
        for expr in exprs {
            for variable in expr.correlation_variables() {
                if !variables.contains(&variable) {
                    variables.push(variable);
                }
            }
        }
    }
    variables
}

fn item_expr(item: &SelectItem) -> Option<&Expr> {
    match item {
        SelectItem::UnnamedExpr(expr) | SelectItem::ExprWithAlias { expr, .. } => Some(expr),
        _ => None,
    }
}

fn strip_parens(expr: &Expr) -> &Expr {
    match expr {
        Expr::Nested(inner) => strip_parens(inner),
        other => other,
    }
}

/// Output name: alias, bare column name, or `EXPR$i`.
fn output_name(expr: &Expr, alias: Option<&str>, position: usize) -> String {
    if let Some(alias) = alias {
        return alias.to_string();
    }
    match strip_parens(expr) {
        Expr::Identifier(ident) => ident.value.clone(),
        Expr::CompoundIdentifier(parts) => parts
            .last()
            .map(|ident| ident.value.clone())
            .unwrap_or_else(|| format!("EXPR${}", position)),
        _ => format!("EXPR${}", position),
    }
}

/// Split a predicate on top-level AND.
fn conjuncts(expr: &Expr) -> Vec<&Expr> {
    match expr {
        Expr::BinaryOp {
            left,
            op: BinaryOperator::And,
            right,
        } => {
            let mut parts = conjuncts(left);
            parts.extend(conjuncts(right));
            parts
        }
        other => vec![other],
    }
}

fn and_all(predicates: Vec<RexNode>) -> Option<RexNode> {
    predicates
        .into_iter()
        .reduce(|acc, next| RexNode::binary("AND", acc, next))
}

/// GROUP BY expressions with ordinals (`GROUP BY 1`) resolved to the
/// select item they point at.
fn group_by_exprs(select: &Select) -> PlanResult<Vec<&Expr>> {
    let exprs = match &select.group_by {
        GroupByExpr::Expressions(exprs, _) => exprs,
        GroupByExpr::All(_) => return Err(PlanError::Unsupported("GROUP BY ALL".to_string())),
    };
    exprs
        .iter()
        .map(|expr| match expr {
            Expr::Value(Value::Number(n, _)) => {
                let item = n
                    .parse::<usize>()
                    .ok()
                    .and_then(|k| k.checked_sub(1))
                    .and_then(|k| select.projection.get(k))
                    .and_then(item_expr);
                item.ok_or_else(|| PlanError::Unsupported(format!("GROUP BY position {}", n)))
            }
            other => Ok(other),
        })
        .collect()
}

fn join_shape(op: &JoinOperator) -> PlanResult<(JoinKind, bool, Option<&Expr>)> {
    Ok(match op {
        JoinOperator::Inner(c) => (JoinKind::Inner, false, constraint_expr(c)),
        JoinOperator::LeftOuter(c) => (JoinKind::Left, false, constraint_expr(c)),
        JoinOperator::RightOuter(c) => (JoinKind::Right, false, constraint_expr(c)),
        JoinOperator::FullOuter(c) => (JoinKind::Full, false, constraint_expr(c)),
        JoinOperator::CrossJoin => (JoinKind::Cross, false, None),
        JoinOperator::CrossApply => (JoinKind::Inner, true, None),
        JoinOperator::OuterApply => (JoinKind::Left, true, None),
        other => return Err(PlanError::Unsupported(format!("join operator {:?}", other))),
    })
}

fn constraint_expr(constraint: &JoinConstraint) -> Option<&Expr> {
    match constraint {
        JoinConstraint::On(expr) => Some(expr),
        JoinConstraint::None => None,
        other => {
            debug!(constraint = ?other, "join constraint not tracked");
            None
        }
    }
}
