//! Fluent query construction.
//!
//! A [`Builder`] pairs a collection handle with a [`QueryState`]. Chaining methods take the
//! builder by value and return it, so a query is always owned by exactly one caller; the
//! execution methods live in [`runner`](crate::runner).
//!
//! ```ignore
//! let adults = db
//!     .collection("users")
//!     .await?
//!     .and_where("age", ">=", 18)
//!     .or_where_nested(|q| q.and_where("role", "=", "admin"))
//!     .order_by("name", "asc")
//!     .limit(20)
//!     .get(&["*"])
//!     .await?;
//! ```

use bson::{Bson, Document};
use std::{fmt, sync::Arc};

use crate::{
    backend::CollectionHandle,
    query::{Connective, OrderSpec, QueryState, SortDirection, WhereNode},
};

/// A chainable query against one collection.
#[derive(Clone)]
pub struct Builder {
    pub(crate) collection: Arc<dyn CollectionHandle>,
    pub(crate) state: QueryState,
}

impl fmt::Debug for Builder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Builder")
            .field("collection", &self.collection.name())
            .field("state", &self.state)
            .finish()
    }
}

impl Builder {
    /// Creates an empty query against `collection`.
    pub fn new(collection: Arc<dyn CollectionHandle>) -> Self {
        let state = QueryState::new(collection.name());

        Self { collection, state }
    }

    /// The accumulated query state.
    pub fn state(&self) -> &QueryState {
        &self.state
    }

    /// Name of the target collection.
    pub fn collection_name(&self) -> &str {
        &self.state.collection
    }

    /// Returns a fresh, empty query on the same collection. The receiver is left untouched.
    pub fn new_query(&self) -> Builder {
        Builder::new(Arc::clone(&self.collection))
    }

    /// Returns a fresh query for building a nested where group.
    pub fn for_nested_where(&self) -> Builder {
        self.new_query()
    }

    /// Sets the projection document.
    pub fn project(mut self, projection: Document) -> Self {
        self.state.projections = Some(projection);
        self
    }

    /// Sets the columns to return.
    pub fn select<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.state.columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    /// Adds a condition joined with AND.
    pub fn and_where(
        self,
        field: impl Into<String>,
        operator: impl Into<String>,
        value: impl Into<Bson>,
    ) -> Self {
        self.push_where(field, operator, value, Connective::And, false)
    }

    /// Adds a condition joined with OR.
    pub fn or_where(
        self,
        field: impl Into<String>,
        operator: impl Into<String>,
        value: impl Into<Bson>,
    ) -> Self {
        self.push_where(field, operator, value, Connective::Or, false)
    }

    /// Adds a negated condition joined with AND.
    pub fn and_where_not(
        self,
        field: impl Into<String>,
        operator: impl Into<String>,
        value: impl Into<Bson>,
    ) -> Self {
        self.push_where(field, operator, value, Connective::And, true)
    }

    /// Adds a negated condition joined with OR.
    pub fn or_where_not(
        self,
        field: impl Into<String>,
        operator: impl Into<String>,
        value: impl Into<Bson>,
    ) -> Self {
        self.push_where(field, operator, value, Connective::Or, true)
    }

    /// Adds `low <= field <= high`.
    pub fn where_between(
        self,
        field: impl Into<String>,
        low: impl Into<Bson>,
        high: impl Into<Bson>,
    ) -> Self {
        let bounds = Bson::Array(vec![low.into(), high.into()]);
        self.push_where(field, "between", bounds, Connective::And, false)
    }

    /// Adds `low <= field <= high`, joined with OR.
    pub fn or_where_between(
        self,
        field: impl Into<String>,
        low: impl Into<Bson>,
        high: impl Into<Bson>,
    ) -> Self {
        let bounds = Bson::Array(vec![low.into(), high.into()]);
        self.push_where(field, "between", bounds, Connective::Or, false)
    }

    /// Adds a SQL `LIKE` pattern match.
    pub fn where_like(self, field: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.push_where(field, "like", pattern.into(), Connective::And, false)
    }

    /// Adds a SQL `NOT LIKE` pattern match.
    pub fn where_not_like(self, field: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.push_where(field, "not like", pattern.into(), Connective::And, false)
    }

    /// Requires `field` to be present (`true`) or absent (`false`).
    pub fn where_exists(self, field: impl Into<String>, exists: bool) -> Self {
        self.push_where(field, "exists", exists, Connective::And, false)
    }

    /// Adds a parenthesized group of conditions joined with AND.
    pub fn where_nested<F>(self, build: F) -> Self
    where
        F: FnOnce(Builder) -> Builder,
    {
        let nested = build(self.for_nested_where());
        self.add_nested_where(nested, Connective::And)
    }

    /// Adds a parenthesized group of conditions joined with OR.
    pub fn or_where_nested<F>(self, build: F) -> Self
    where
        F: FnOnce(Builder) -> Builder,
    {
        let nested = build(self.for_nested_where());
        self.add_nested_where(nested, Connective::Or)
    }

    /// Appends the conditions of another query as one group. Queries without conditions add
    /// nothing.
    pub fn add_nested_where(mut self, nested: Builder, connective: Connective) -> Self {
        if !nested.state.wheres.is_empty() {
            self.state
                .wheres
                .push(WhereNode::group(connective, nested.state.wheres));
        }
        self
    }

    /// Adds group-by columns. Repeated calls accumulate.
    pub fn group_by<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.state
            .groups
            .extend(columns.into_iter().map(Into::into));
        self
    }

    /// Adds an ordering. `"asc"` in any case sorts ascending, everything else descending.
    pub fn order_by(mut self, field: impl Into<String>, direction: &str) -> Self {
        self.state.orders.push(OrderSpec {
            field: field.into(),
            direction: SortDirection::parse(direction),
        });
        self
    }

    /// Adds a descending ordering.
    pub fn order_by_desc(self, field: impl Into<String>) -> Self {
        self.order_by(field, "desc")
    }

    /// Sets the maximum number of records to return. Negative values are ignored.
    pub fn limit(mut self, value: i64) -> Self {
        if let Ok(limit) = u64::try_from(value) {
            self.state.limit = Some(limit);
        }
        self
    }

    /// Sets the number of records to skip, clamped to zero.
    pub fn offset(mut self, value: i64) -> Self {
        self.state.offset = u64::try_from(value).unwrap_or(0);
        self
    }

    /// Sets offset and limit for a 1-based page.
    pub fn for_page(self, page: i64, per_page: i64) -> Self {
        self.offset(page.saturating_sub(1).saturating_mul(per_page))
            .limit(per_page)
    }

    /// Replaces the custom execution options, which override computed options key by key.
    pub fn options(mut self, options: Document) -> Self {
        self.state.options = options;
        self
    }

    /// Returns distinct values. A given column also becomes the only selected column.
    pub fn distinct(mut self, column: Option<&str>) -> Self {
        self.state.distinct = true;
        if let Some(column) = column {
            self.state.columns = Some(vec![column.to_string()]);
        }
        self
    }

    pub(crate) fn push_where(
        mut self,
        field: impl Into<String>,
        operator: impl Into<String>,
        value: impl Into<Bson>,
        connective: Connective,
        negated: bool,
    ) -> Self {
        self.state
            .wheres
            .push(WhereNode::leaf(field, operator, value, connective, negated));
        self
    }
}
