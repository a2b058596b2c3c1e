//! Per-run alias table for compound plan nodes.
//!
//! Every Project, Aggregate or Filter whose input is not a bare scan is a
//! subquery boundary and gets a synthetic name (`subquery_0`, `subquery_1`,
//! ...) in pre-order. Sources traced manually may carry such a name as their
//! table; [`AliasContext::resolve`] maps it back to the base table underneath.
//!
//! A context is built fresh for each extraction run and borrowed by that run
//! only, so concurrent extractions never share alias numbering.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::planner::RelOperator;

/// Prefix of synthetic subquery names.
pub const SYNTHETIC_PREFIX: &str = "subquery_";

/// Catalog-style base table names.
static CATALOG_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z][A-Z0-9_]*$").unwrap());

#[derive(Debug)]
pub struct AliasContext<'a> {
    /// Operators in pre-order; the position is the node id.
    nodes: Vec<&'a RelOperator>,
    by_node: HashMap<usize, String>,
    by_alias: HashMap<String, usize>,
    tables: HashSet<String>,
}

impl<'a> AliasContext<'a> {
    /// Pre-pass over `plan` assigning synthetic names.
    pub fn build(plan: &'a RelOperator) -> Self {
        let nodes = plan.preorder();
        let mut by_node = HashMap::new();
        let mut by_alias = HashMap::new();
        let mut tables = HashSet::new();

        for (id, node) in nodes.iter().enumerate() {
            let input = match node {
                RelOperator::Scan(scan) => {
                    tables.insert(scan.table.clone());
                    continue;
                }
                RelOperator::Project(p) => &p.input,
                RelOperator::Aggregate(a) => &a.input,
                RelOperator::Filter(f) => &f.input,
                _ => continue,
            };
            if matches!(input.as_ref(), RelOperator::Scan(_)) {
                continue;
            }
            let alias = format!("{}{}", SYNTHETIC_PREFIX, by_node.len());
            by_alias.insert(alias.clone(), id);
            by_node.insert(id, alias);
        }

        debug!(aliases = by_node.len(), tables = tables.len(), "built alias context");
        Self {
            nodes,
            by_node,
            by_alias,
            tables,
        }
    }

    pub fn node(&self, id: usize) -> Option<&'a RelOperator> {
        self.nodes.get(id).copied()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Synthetic name of node `id`, if it is a subquery boundary.
    pub fn alias_of(&self, id: usize) -> Option<&str> {
        self.by_node.get(&id).map(String::as_str)
    }

    /// Node id of `node` (identity, not structural equality).
    pub fn id_of(&self, node: &RelOperator) -> Option<usize> {
        self.nodes.iter().position(|n| std::ptr::eq(*n, node))
    }

    /// Name to use for `node` as a source table: its synthetic alias for a
    /// subquery boundary, the table for a scan.
    pub fn name_for(&self, node: &RelOperator) -> Option<String> {
        if let RelOperator::Scan(scan) = node {
            return Some(scan.table.clone());
        }
        self.id_of(node)
            .and_then(|id| self.alias_of(id))
            .map(str::to_string)
    }

    /// Map a source table name to a real base table.
    ///
    /// Real tables come back unchanged. A synthetic name follows the first
    /// input of its node down to a scan. Anything unresolvable is returned
    /// as given.
    pub fn resolve(&self, name: &str) -> String {
        if CATALOG_NAME.is_match(name) || self.tables.contains(name) {
            return name.to_string();
        }
        if !name.starts_with(SYNTHETIC_PREFIX) {
            return name.to_string();
        }

        let Some(mut node) = self.by_alias.get(name).and_then(|&id| self.node(id)) else {
            debug!(alias = name, "unknown synthetic alias");
            return name.to_string();
        };
        loop {
            if let RelOperator::Scan(scan) = node {
                return scan.table.clone();
            }
            match node.inputs().first() {
                Some(input) => node = *input,
                None => break,
            }
        }
        debug!(alias = name, "no scan below synthetic alias");
        name.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::build_plan;

    #[test]
    fn test_subquery_boundaries_get_aliases() {
        let plan = build_plan(
            "SELECT x + 1 AS y FROM (SELECT amount * 2 AS x FROM orders WHERE amount > 0) a",
        )
        .unwrap();
        let ctx = AliasContext::build(&plan);
        // Project(y) → Project(x) → Filter → Scan
        assert_eq!(ctx.alias_of(0), Some("subquery_0"));
        assert_eq!(ctx.alias_of(1), Some("subquery_1"));
        assert_eq!(ctx.alias_of(2), None);
        assert_eq!(ctx.resolve("subquery_0"), "orders");
    }

    #[test]
    fn test_real_tables_pass_through() {
        let plan = build_plan("SELECT amount FROM orders WHERE amount > 0").unwrap();
        let ctx = AliasContext::build(&plan);
        assert_eq!(ctx.resolve("orders"), "orders");
        assert_eq!(ctx.resolve("DW_SALES"), "DW_SALES");
        assert_eq!(ctx.resolve("subquery_9"), "subquery_9");
        assert_eq!(ctx.resolve("a"), "a");
    }

    #[test]
    fn test_contexts_are_independent() {
        let first = build_plan("SELECT x * 2 AS z FROM (SELECT amount + 1 AS x FROM orders) a").unwrap();
        let second = build_plan("SELECT y * 2 AS z FROM (SELECT qty + 1 AS y FROM items) b").unwrap();
        let a = AliasContext::build(&first);
        let b = AliasContext::build(&second);
        assert_eq!(a.resolve("subquery_0"), "orders");
        assert_eq!(b.resolve("subquery_0"), "items");
    }
}
