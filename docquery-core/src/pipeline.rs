//! Aggregation pipeline construction for grouped and aggregate reads.
//!
//! The pipeline is only used when a query groups or computes an aggregate. Stages are always
//! emitted in the same order, each one omitted when it would be a no-op:
//!
//! 1. `$match` from the compiled filter
//! 2. `$unwind` for every array wildcard in an aggregate column (`items.*.price`)
//! 3. `$group` keyed by the group columns, with `$last` for grouped and selected columns and
//!    the aggregate function written to the `aggregate` key
//! 4. `$sort`, 5. `$skip`, 6. `$limit`, 7. `$project`

use bson::{Bson, Document, doc};

use crate::query::{AggregateFunction, OrderSpec, QueryState};

/// Output key that receives the aggregate function result.
pub const AGGREGATE_KEY: &str = "aggregate";

/// Marks an array level to unwind inside an aggregate column path.
pub const ARRAY_WILDCARD: &str = ".*.";

/// Builds aggregation pipelines from query state.
#[derive(Debug, Default)]
pub struct PipelineCompiler;

impl PipelineCompiler {
    /// Compiles the pipeline for `state`.
    ///
    /// `filter` is the already compiled where-tree and `columns` the resolved selected columns
    /// (wildcard removed).
    pub fn compile(state: &QueryState, filter: &Document, columns: &[String]) -> Vec<Document> {
        let mut pipeline = Vec::new();
        let mut unwinds: Vec<String> = Vec::new();
        let mut group = Document::new();

        if !state.groups.is_empty() {
            let mut key = Document::new();
            for column in &state.groups {
                key.insert(output_key(column), field_path(column));
            }
            group.insert("_id", key);

            // Keep one representative value per group, the way a relational GROUP BY does.
            for column in &state.groups {
                group.insert(output_key(column), doc! { "$last": field_path(column) });
            }
            for column in columns.iter().filter(|column| !state.groups.contains(column)) {
                group.insert(output_key(column), doc! { "$last": field_path(column) });
            }
        } else if state.aggregate.is_some() {
            group.insert("_id", Bson::Null);
        }

        if let Some(aggregate) = &state.aggregate {
            for column in &aggregate.columns {
                let column = match column.split_once(ARRAY_WILDCARD) {
                    Some((array, rest)) if !rest.contains(ARRAY_WILDCARD) => {
                        if !unwinds.iter().any(|unwind| unwind == array) {
                            unwinds.push(array.to_string());
                        }
                        format!("{array}.{rest}")
                    }
                    _ => column.clone(),
                };

                let accumulator = match aggregate.function {
                    AggregateFunction::Count => doc! { "$sum": 1 },
                    function => doc! { format!("${}", function.name()): field_path(&column) },
                };
                group.insert(AGGREGATE_KEY, accumulator);
            }
        }

        if !filter.is_empty() {
            pipeline.push(doc! { "$match": filter.clone() });
        }
        for unwind in unwinds {
            pipeline.push(doc! { "$unwind": field_path(&unwind) });
        }
        if !group.is_empty() {
            pipeline.push(doc! { "$group": group });
        }
        if !state.orders.is_empty() {
            pipeline.push(doc! { "$sort": compile_orders(&state.orders) });
        }
        if state.offset > 0 {
            pipeline.push(doc! { "$skip": native_count(state.offset) });
        }
        if let Some(limit) = state.limit.filter(|limit| *limit > 0) {
            pipeline.push(doc! { "$limit": native_count(limit) });
        }
        if let Some(projections) = state.projections.as_ref().filter(|p| !p.is_empty()) {
            pipeline.push(doc! { "$project": projections.clone() });
        }

        pipeline
    }
}

/// Compiles order specs into a native sort document. A repeated field keeps its first
/// position and takes the last direction.
pub fn compile_orders(orders: &[OrderSpec]) -> Document {
    let mut sort = Document::new();
    for order in orders {
        sort.insert(order.field.clone(), order.direction.native_value());
    }
    sort
}

/// Converts a skip or limit count to the native integer type, saturating at `i64::MAX`.
pub fn native_count(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn field_path(column: &str) -> String {
    format!("${column}")
}

// Group output names may not contain dots.
fn output_key(column: &str) -> String {
    column.replace('.', "_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{AggregateSpec, SortDirection};

    fn state() -> QueryState {
        QueryState::new("orders")
    }

    fn with_aggregate(mut state: QueryState, function: AggregateFunction, columns: &[&str]) -> QueryState {
        state.aggregate = Some(AggregateSpec {
            function,
            columns: columns.iter().map(|c| c.to_string()).collect(),
        });
        state
    }

    #[test]
    fn count_without_filter_is_a_single_group() {
        let state = with_aggregate(state(), AggregateFunction::Count, &["*"]);
        let pipeline = PipelineCompiler::compile(&state, &doc! {}, &[]);

        assert_eq!(
            pipeline,
            vec![doc! { "$group": { "_id": Bson::Null, "aggregate": { "$sum": 1 } } }]
        );
    }

    #[test]
    fn match_precedes_group() {
        let state = with_aggregate(state(), AggregateFunction::Sum, &["total"]);
        let filter = doc! { "status": "paid" };
        let pipeline = PipelineCompiler::compile(&state, &filter, &[]);

        assert_eq!(
            pipeline,
            vec![
                doc! { "$match": { "status": "paid" } },
                doc! { "$group": { "_id": Bson::Null, "aggregate": { "$sum": "$total" } } },
            ]
        );
    }

    #[test]
    fn group_by_keeps_last_values() {
        let mut state = state();
        state.groups = vec!["city".into()];
        let columns = vec!["city".to_string(), "name".to_string(), "address.zip".to_string()];
        let pipeline = PipelineCompiler::compile(&state, &doc! {}, &columns);

        assert_eq!(
            pipeline,
            vec![doc! { "$group": {
                "_id": { "city": "$city" },
                "city": { "$last": "$city" },
                "name": { "$last": "$name" },
                "address_zip": { "$last": "$address.zip" },
            } }]
        );
    }

    #[test]
    fn array_wildcards_unwind_once_each() {
        let state = with_aggregate(
            state(),
            AggregateFunction::Max,
            &["items.*.price", "items.*.price"],
        );
        let pipeline = PipelineCompiler::compile(&state, &doc! {}, &[]);

        assert_eq!(
            pipeline,
            vec![
                doc! { "$unwind": "$items" },
                doc! { "$group": { "_id": Bson::Null, "aggregate": { "$max": "$items.price" } } },
            ]
        );
    }

    #[test]
    fn trailing_stages_follow_fixed_order() {
        let mut state = state();
        state.groups = vec!["city".into()];
        state.orders = vec![
            OrderSpec { field: "city".into(), direction: SortDirection::Desc },
        ];
        state.offset = 10;
        state.limit = Some(5);
        state.projections = Some(doc! { "city": 1 });

        let pipeline = PipelineCompiler::compile(&state, &doc! { "active": true }, &[]);
        let names: Vec<&str> = pipeline
            .iter()
            .map(|stage| stage.keys().next().unwrap().as_str())
            .collect();

        assert_eq!(names, vec!["$match", "$group", "$sort", "$skip", "$limit", "$project"]);
        assert_eq!(pipeline[2], doc! { "$sort": { "city": -1 } });
        assert_eq!(pipeline[3], doc! { "$skip": 10_i64 });
        assert_eq!(pipeline[4], doc! { "$limit": 5_i64 });
    }

    #[test]
    fn zero_limit_and_offset_are_omitted() {
        let mut state = with_aggregate(state(), AggregateFunction::Count, &["*"]);
        state.limit = Some(0);

        let pipeline = PipelineCompiler::compile(&state, &doc! {}, &[]);
        assert_eq!(pipeline.len(), 1);
    }

    #[test]
    fn grouping_with_aggregate_shares_the_group_stage() {
        let mut state = with_aggregate(state(), AggregateFunction::Avg, &["score"]);
        state.groups = vec!["team".into()];

        let pipeline = PipelineCompiler::compile(&state, &doc! {}, &[]);
        assert_eq!(
            pipeline,
            vec![doc! { "$group": {
                "_id": { "team": "$team" },
                "team": { "$last": "$team" },
                "aggregate": { "$avg": "$score" },
            } }]
        );
    }

    #[test]
    fn orders_compile_to_sort_document() {
        let orders = vec![
            OrderSpec { field: "a".into(), direction: SortDirection::Asc },
            OrderSpec { field: "b".into(), direction: SortDirection::Desc },
        ];
        assert_eq!(compile_orders(&orders), doc! { "a": 1, "b": -1 });
    }

    #[test]
    fn skip_and_limit_saturate() {
        let mut state = state();
        state.groups.push("city".into());
        state.offset = u64::MAX;
        state.limit = Some(u64::MAX - 1);

        let pipeline = PipelineCompiler::compile(&state, &doc! {}, &[]);
        assert_eq!(pipeline[1], doc! { "$skip": i64::MAX });
        assert_eq!(pipeline[2], doc! { "$limit": i64::MAX });
    }
}
