//! Query execution.
//!
//! Every read compiles the where-tree first (so malformed conditions fail before the store is
//! contacted) and then takes one of three paths:
//!
//! - **pipeline**: the query groups or aggregates, so the state is compiled by
//!   [`PipelineCompiler`] and sent through `aggregate`
//! - **distinct**: the first selected column (default `_id`) is sent to `distinct`
//! - **find**: a filtered read with projection, sort, skip and limit options
//!
//! Results always come back as a `Vec<Document>` in cursor order. Writes report the store's
//! acknowledgment: a write the store did not acknowledge yields `false` or `0`, while transport
//! and protocol errors are returned unchanged.

use bson::{Bson, Document, doc};

use crate::{
    backend::UpdateOutcome,
    builder::Builder,
    error::{DatabaseError, DatabaseResult},
    filter::FilterCompiler,
    page::{Page, PaginationParams},
    pipeline::{AGGREGATE_KEY, PipelineCompiler, compile_orders, native_count},
    query::{AggregateFunction, AggregateSpec, Connective, PRIMARY_KEY, QueryState, WILDCARD},
    record::RecordExt,
};

impl Builder {
    /// Executes the query and returns every matching record.
    ///
    /// `columns` is used only when no columns were selected; `"*"` means all fields.
    pub async fn get(&mut self, columns: &[&str]) -> DatabaseResult<Vec<Document>> {
        self.run(&self.state, columns).await
    }

    /// Executes the query with a limit of one and returns the first record, if any.
    pub async fn first(&mut self, columns: &[&str]) -> DatabaseResult<Option<Document>> {
        let mut state = self.state.clone();
        state.limit = Some(1);

        Ok(self.run(&state, columns).await?.into_iter().next())
    }

    /// Looks up a record by primary key.
    pub async fn find(
        &mut self,
        id: impl Into<Bson>,
        columns: &[&str],
    ) -> DatabaseResult<Option<Document>> {
        self.state.wheres.push(crate::query::WhereNode::leaf(
            PRIMARY_KEY,
            "=",
            id,
            Connective::And,
            false,
        ));

        self.first(columns).await
    }

    /// Deserializes every matching record into `T`.
    pub async fn get_as<T: RecordExt>(&mut self, columns: &[&str]) -> DatabaseResult<Vec<T>> {
        self.get(columns)
            .await?
            .into_iter()
            .map(T::from_record)
            .collect()
    }

    /// Deserializes the first matching record into `T`.
    pub async fn first_as<T: RecordExt>(&mut self, columns: &[&str]) -> DatabaseResult<Option<T>> {
        self.first(columns)
            .await?
            .map(T::from_record)
            .transpose()
    }

    /// Runs an aggregate function over the matched records.
    ///
    /// The selected columns are cleared for the duration of the call and restored afterwards,
    /// and the aggregate spec is always removed again, whether the read succeeds or not.
    /// Returns `None` when nothing matched.
    pub async fn aggregate(
        &mut self,
        function: AggregateFunction,
        columns: &[&str],
    ) -> DatabaseResult<Option<Bson>> {
        let scope = AggregateScope::enter(self, function, columns);
        let rows = scope
            .builder
            .run(&scope.builder.state, &[WILDCARD])
            .await?;

        Ok(rows
            .into_iter()
            .next()
            .and_then(|mut row| row.remove(AGGREGATE_KEY))
            .filter(|value| !matches!(value, Bson::Null)))
    }

    /// Counts the matched records.
    pub async fn count(&mut self) -> DatabaseResult<u64> {
        Ok(self
            .aggregate(AggregateFunction::Count, &[WILDCARD])
            .await?
            .as_ref()
            .and_then(bson_to_u64)
            .unwrap_or(0))
    }

    /// Smallest value of `column`, or `None` when nothing matched.
    pub async fn min(&mut self, column: &str) -> DatabaseResult<Option<Bson>> {
        self.aggregate(AggregateFunction::Min, &[column]).await
    }

    /// Largest value of `column`, or `None` when nothing matched.
    pub async fn max(&mut self, column: &str) -> DatabaseResult<Option<Bson>> {
        self.aggregate(AggregateFunction::Max, &[column]).await
    }

    /// Sum of `column`; zero when nothing matched.
    pub async fn sum(&mut self, column: &str) -> DatabaseResult<Bson> {
        Ok(self
            .aggregate(AggregateFunction::Sum, &[column])
            .await?
            .unwrap_or(Bson::Int32(0)))
    }

    /// Average of `column`, or `None` when nothing matched.
    pub async fn avg(&mut self, column: &str) -> DatabaseResult<Option<Bson>> {
        self.aggregate(AggregateFunction::Avg, &[column]).await
    }

    /// Alias for [`Builder::avg`].
    pub async fn average(&mut self, column: &str) -> DatabaseResult<Option<Bson>> {
        self.avg(column).await
    }

    /// Reads one page of results together with the total number of matched records.
    ///
    /// A page size of zero reads no records and only reports the total.
    pub async fn paginate(&mut self, params: &PaginationParams) -> DatabaseResult<Page<Document>> {
        let mut counter = self.clone();
        counter.state.groups.clear();
        counter.state.orders.clear();
        counter.state.projections = None;
        counter.state.columns = None;
        counter.state.limit = None;
        counter.state.offset = 0;
        let total = counter.count().await?;

        let items = if params.per_page == 0 {
            Vec::new()
        } else {
            let mut state = self.state.clone();
            state.offset = params.offset();
            state.limit = Some(params.per_page);
            self.run(&state, &[WILDCARD]).await?
        };

        Ok(Page::builder(items)
            .with_total(total)
            .with_params(params)
            .build())
    }

    /// Inserts one document or a batch.
    ///
    /// An array of documents, or a document whose every value is itself a document, is
    /// treated as a batch. Anything else is a single document and is sent as a batch of one.
    /// Returns the store's acknowledgment flag.
    pub async fn insert(&self, values: impl Into<Bson>) -> DatabaseResult<bool> {
        let documents = batch_documents(values.into())?;
        let outcome = self.collection.insert_many(documents).await?;

        Ok(outcome.acknowledged)
    }

    /// Serializes and inserts typed records as one batch.
    pub async fn insert_records<T: RecordExt>(&self, records: &[T]) -> DatabaseResult<bool> {
        let documents = records
            .iter()
            .map(RecordExt::to_record)
            .collect::<DatabaseResult<Vec<Document>>>()?;

        self.insert(documents).await
    }

    /// Inserts a single document and returns its primary key, or the value of `key` when a
    /// different key is named. Returns `None` when the store did not acknowledge the write.
    pub async fn insert_get_id(
        &self,
        values: Document,
        key: Option<&str>,
    ) -> DatabaseResult<Option<Bson>> {
        let named = key
            .filter(|key| *key != PRIMARY_KEY)
            .map(|key| values.get(key).cloned());
        let outcome = self.collection.insert_one(values).await?;

        if !outcome.acknowledged {
            return Ok(None);
        }

        Ok(match named {
            Some(value) => value,
            None => Some(outcome.inserted_id),
        })
    }

    /// Updates every matched record (unless `options` sets `multiple: false`).
    ///
    /// Plain field maps are wrapped in `$set`. Returns the modified count, or the upserted
    /// count when nothing was modified.
    pub async fn update(&self, values: Document, options: Document) -> DatabaseResult<u64> {
        let outcome = self.update_outcome(values, options).await?;

        if !outcome.acknowledged {
            return Ok(0);
        }

        Ok(if outcome.modified_count > 0 {
            outcome.modified_count
        } else {
            outcome.upserted_count
        })
    }

    /// Runs the same update as [`Builder::update`] and returns the store's raw outcome.
    pub async fn update_outcome(
        &self,
        values: Document,
        options: Document,
    ) -> DatabaseResult<UpdateOutcome> {
        let update = compile_update(values)?;
        let mut options = options;
        if !options.contains_key("multiple") {
            options.insert("multiple", true);
        }

        let filter = FilterCompiler::compile(&self.state.wheres)?;
        log::debug!(
            "update on {}: filter {filter}, update {update}",
            self.state.collection,
        );

        self.collection
            .update_many(filter, update, options)
            .await
    }

    /// Deletes every matched record, optionally narrowed to one primary key first.
    pub async fn delete(&mut self, id: Option<Bson>) -> DatabaseResult<u64> {
        if let Some(id) = id {
            self.state.wheres.push(crate::query::WhereNode::leaf(
                PRIMARY_KEY,
                "=",
                id,
                Connective::And,
                false,
            ));
        }

        let filter = FilterCompiler::compile(&self.state.wheres)?;
        log::debug!("delete on {}: filter {filter}", self.state.collection);

        let outcome = self.collection.delete_many(filter).await?;

        Ok(if outcome.acknowledged { outcome.deleted_count } else { 0 })
    }

    async fn run(&self, state: &QueryState, requested: &[&str]) -> DatabaseResult<Vec<Document>> {
        let columns = state.effective_columns(requested);
        let filter = FilterCompiler::compile(&state.wheres)?;

        if state.needs_pipeline() {
            let pipeline = PipelineCompiler::compile(state, &filter, &columns);
            log::debug!(
                "aggregate on {}: {}",
                state.collection,
                Bson::from(pipeline.clone()),
            );

            return self
                .collection
                .aggregate(pipeline, state.options.clone())
                .await;
        }

        if state.distinct {
            let column = columns
                .first()
                .map(String::as_str)
                .unwrap_or(PRIMARY_KEY);
            log::debug!("distinct {column} on {}: filter {filter}", state.collection);

            let scope = (!filter.is_empty()).then_some(filter);
            let values = self.collection.distinct(column, scope).await?;

            return Ok(values
                .into_iter()
                .map(|value| doc! { column: value })
                .collect());
        }

        let options = find_options(state, &columns);
        log::debug!(
            "find on {}: filter {filter}, options {options}",
            state.collection,
        );

        self.collection.find(filter, options).await
    }
}

/// Restores the selected columns and clears the aggregate spec when dropped.
struct AggregateScope<'a> {
    builder: &'a mut Builder,
    previous_columns: Option<Vec<String>>,
}

impl<'a> AggregateScope<'a> {
    fn enter(builder: &'a mut Builder, function: AggregateFunction, columns: &[&str]) -> Self {
        builder.state.aggregate = Some(AggregateSpec {
            function,
            columns: columns.iter().map(|column| column.to_string()).collect(),
        });
        let previous_columns = builder.state.columns.replace(Vec::new());

        Self { builder, previous_columns }
    }
}

impl Drop for AggregateScope<'_> {
    fn drop(&mut self) {
        self.builder.state.aggregate = None;
        self.builder.state.columns = self.previous_columns.take();
    }
}

/// Assembles find options from query state. Custom options are merged last and win.
pub fn find_options(state: &QueryState, columns: &[String]) -> Document {
    let mut options = Document::new();

    if !state.orders.is_empty() {
        options.insert("sort", compile_orders(&state.orders));
    }
    if state.offset > 0 {
        options.insert("skip", native_count(state.offset));
    }
    if let Some(limit) = state.limit.filter(|limit| *limit > 0) {
        options.insert("limit", native_count(limit));
    }

    let mut projection = Document::new();
    for column in columns {
        projection.insert(column.clone(), 1);
    }
    if let Some(projections) = &state.projections {
        projection.extend(projections.clone());
    }
    if !projection.is_empty() {
        options.insert("projection", projection);
    }

    options.extend(state.options.clone());
    options
}

/// Wraps plain field maps in `$set`. Operator documents pass through; mixing both is rejected.
pub fn compile_update(values: Document) -> DatabaseResult<Document> {
    if values.is_empty() {
        return Err(DatabaseError::InvalidDocument("update document is empty".to_string()));
    }

    let operators = values.keys().filter(|key| key.starts_with('$')).count();

    if operators == values.len() {
        Ok(values)
    } else if operators == 0 {
        Ok(doc! { "$set": values })
    } else {
        Err(DatabaseError::InvalidDocument(
            "update mixes operator and plain field keys".to_string(),
        ))
    }
}

fn batch_documents(values: Bson) -> DatabaseResult<Vec<Document>> {
    let documents = match values {
        Bson::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Bson::Document(document) => Ok(document),
                other => Err(DatabaseError::InvalidDocument(format!(
                    "batch insert expects documents, found {:?}",
                    other.element_type(),
                ))),
            })
            .collect::<DatabaseResult<Vec<_>>>()?,
        Bson::Document(document) => {
            let is_batch = !document.is_empty()
                && document
                    .values()
                    .all(|value| matches!(value, Bson::Document(_)));

            if is_batch {
                document
                    .into_iter()
                    .filter_map(|(_, value)| match value {
                        Bson::Document(document) => Some(document),
                        _ => None,
                    })
                    .collect()
            } else {
                vec![document]
            }
        }
        other => {
            return Err(DatabaseError::InvalidDocument(format!(
                "insert expects a document or an array of documents, found {:?}",
                other.element_type(),
            )));
        }
    };

    if documents.is_empty() {
        return Err(DatabaseError::InvalidDocument("nothing to insert".to_string()));
    }

    Ok(documents)
}

fn bson_to_u64(value: &Bson) -> Option<u64> {
    match value {
        Bson::Int32(count) => u64::try_from(*count).ok(),
        Bson::Int64(count) => u64::try_from(*count).ok(),
        Bson::Double(count) if *count >= 0.0 => Some(*count as u64),
        _ => None,
    }
}
