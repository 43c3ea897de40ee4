//! The query model: the state a builder accumulates before execution.
//!
//! [`QueryState`] holds everything a chained query description can express (selected columns,
//! the where-tree, grouping, ordering, paging, projections, distinct, custom options). It is
//! plain data, owned by exactly one [`Builder`](crate::builder::Builder) and read by the
//! compilers in [`filter`](crate::filter) and [`pipeline`](crate::pipeline).
//!
//! # Where-tree
//!
//! Conditions form a tree of [`WhereNode`]s. A leaf is a single `field <op> value` test; a
//! group holds an ordered list of child nodes produced by a nested where. Every node carries
//! the [`Connective`] that joins it to the conditions before it.
//!
//! ```ignore
//! use docquery::query::{WhereNode, Connective};
//!
//! let tree = vec![
//!     WhereNode::leaf("age", ">=", 18, Connective::And, false),
//!     WhereNode::group(
//!         Connective::Or,
//!         vec![WhereNode::leaf("role", "=", "admin", Connective::And, false)],
//!     ),
//! ];
//! ```

use bson::{Bson, Document};
use std::fmt;

use crate::error::DatabaseError;

/// The primary key field of every collection.
pub const PRIMARY_KEY: &str = "_id";

/// The column marker meaning "no explicit columns".
pub const WILDCARD: &str = "*";

/// How a where node combines with the conditions accumulated before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Connective {
    #[default]
    And,
    Or,
}

impl Connective {
    /// The native logical operator for this connective.
    pub fn native_key(self) -> &'static str {
        match self {
            Connective::And => "$and",
            Connective::Or => "$or",
        }
    }
}

/// A node of the where-tree.
#[derive(Debug, Clone, PartialEq)]
pub enum WhereNode {
    /// A single `field <operator> value` condition.
    Leaf {
        field: String,
        /// The operator symbol as written by the caller; resolved at compile time.
        operator: String,
        value: Bson,
        connective: Connective,
        negated: bool,
    },
    /// A parenthesized group of conditions.
    Group {
        connective: Connective,
        children: Vec<WhereNode>,
    },
}

impl WhereNode {
    /// Creates a leaf condition.
    pub fn leaf(
        field: impl Into<String>,
        operator: impl Into<String>,
        value: impl Into<Bson>,
        connective: Connective,
        negated: bool,
    ) -> Self {
        WhereNode::Leaf {
            field: field.into(),
            operator: operator.into(),
            value: value.into(),
            connective,
            negated,
        }
    }

    /// Creates a group of conditions.
    pub fn group(connective: Connective, children: Vec<WhereNode>) -> Self {
        WhereNode::Group { connective, children }
    }

    /// The connective joining this node to the preceding ones.
    pub fn connective(&self) -> Connective {
        match self {
            WhereNode::Leaf { connective, .. } | WhereNode::Group { connective, .. } => *connective,
        }
    }
}

/// Visitor over the where-tree.
///
/// Implementors produce some output per leaf and per group; [`WhereVisitor::visit_node`]
/// dispatches on the node kind.
pub trait WhereVisitor {
    type Output;
    type Error: Into<DatabaseError>;

    fn visit_leaf(
        &mut self,
        field: &str,
        operator: &str,
        value: &Bson,
        negated: bool,
    ) -> Result<Self::Output, Self::Error>;

    fn visit_group(&mut self, children: &[WhereNode]) -> Result<Self::Output, Self::Error>;

    fn visit_node(&mut self, node: &WhereNode) -> Result<Self::Output, Self::Error> {
        match node {
            WhereNode::Leaf { field, operator, value, negated, .. } => {
                self.visit_leaf(field, operator, value, *negated)
            }
            WhereNode::Group { children, .. } => self.visit_group(children),
        }
    }
}

/// Sort direction for ordered reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    /// Parses a direction the relational way: `asc` (any case) is ascending, anything else
    /// is descending.
    pub fn parse(direction: &str) -> Self {
        if direction.trim().eq_ignore_ascii_case("asc") {
            SortDirection::Asc
        } else {
            SortDirection::Desc
        }
    }

    /// The native sort value (`1` or `-1`).
    pub fn native_value(self) -> i32 {
        match self {
            SortDirection::Asc => 1,
            SortDirection::Desc => -1,
        }
    }
}

/// One `ORDER BY` entry.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderSpec {
    pub field: String,
    pub direction: SortDirection,
}

/// The aggregate functions a query can compute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunction {
    Count,
    Min,
    Max,
    Sum,
    Avg,
}

impl AggregateFunction {
    pub fn name(self) -> &'static str {
        match self {
            AggregateFunction::Count => "count",
            AggregateFunction::Min => "min",
            AggregateFunction::Max => "max",
            AggregateFunction::Sum => "sum",
            AggregateFunction::Avg => "avg",
        }
    }
}

impl fmt::Display for AggregateFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The aggregate currently being computed, with its target columns.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateSpec {
    pub function: AggregateFunction,
    pub columns: Vec<String>,
}

/// The full state of a not-yet-executed query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryState {
    /// Name of the target collection.
    pub collection: String,
    /// Explicit projection document, appended as a `$project` stage or merged into find options.
    pub projections: Option<Document>,
    /// Selected columns. `None` until the caller selects or a read resolves defaults.
    pub columns: Option<Vec<String>>,
    /// Top-level where nodes, combined left to right.
    pub wheres: Vec<WhereNode>,
    /// Group-by columns, accumulated across calls.
    pub groups: Vec<String>,
    /// The aggregate being computed, set only for the duration of one aggregate call.
    pub aggregate: Option<AggregateSpec>,
    pub orders: Vec<OrderSpec>,
    pub limit: Option<u64>,
    pub offset: u64,
    pub distinct: bool,
    /// Free-form execution options, merged last over every computed option.
    pub options: Document,
}

impl QueryState {
    /// Creates an empty state targeting `collection`.
    pub fn new(collection: impl Into<String>) -> Self {
        QueryState {
            collection: collection.into(),
            ..Default::default()
        }
    }

    /// Whether the read must run through the aggregation pipeline.
    pub fn needs_pipeline(&self) -> bool {
        !self.groups.is_empty() || self.aggregate.is_some()
    }

    /// The columns a read should use: the selected ones, or `requested` when nothing is
    /// selected, with the wildcard marker dropped (no projection means "all fields").
    pub fn effective_columns(&self, requested: &[&str]) -> Vec<String> {
        match &self.columns {
            Some(columns) => columns.clone(),
            None => requested.iter().map(|column| column.to_string()).collect(),
        }
        .into_iter()
        .filter(|column| column != WILDCARD)
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_parsing_defaults_to_desc() {
        assert_eq!(SortDirection::parse("ASC"), SortDirection::Asc);
        assert_eq!(SortDirection::parse("asc"), SortDirection::Asc);
        assert_eq!(SortDirection::parse("desc"), SortDirection::Desc);
        assert_eq!(SortDirection::parse("sideways"), SortDirection::Desc);
    }

    #[test]
    fn effective_columns_drop_wildcard() {
        let mut state = QueryState::new("users");
        assert!(state.effective_columns(&["*"]).is_empty());
        assert_eq!(state.effective_columns(&["name"]), vec!["name".to_string()]);

        state.columns = Some(vec!["*".into(), "age".into()]);
        assert_eq!(state.effective_columns(&["name"]), vec!["age".to_string()]);
    }

    #[test]
    fn pipeline_only_for_groups_or_aggregates() {
        let mut state = QueryState::new("users");
        assert!(!state.needs_pipeline());

        state.groups.push("city".into());
        assert!(state.needs_pipeline());

        state.groups.clear();
        state.aggregate = Some(AggregateSpec {
            function: AggregateFunction::Count,
            columns: vec!["*".into()],
        });
        assert!(state.needs_pipeline());
    }
}
