//! Conversion of option documents into driver option structs.
//!
//! The query runner passes options as documents so that caller-supplied options can override
//! computed ones key by key. This module maps the recognised keys onto the driver's typed
//! options; unrecognised keys are reported by the caller.

use bson::{Bson, Document};
use mongodb::options::{
    AggregateOptions, CreateCollectionOptions, FindOptions, Hint, IndexOptions, UpdateOptions,
};
use std::time::Duration;

use docquery_core::backend::{option_u64, option_bool};

pub(crate) fn find_options(options: &Document) -> FindOptions {
    let mut find = FindOptions::default();

    find.projection = options.get_document("projection").ok().cloned();
    find.sort = options.get_document("sort").ok().cloned();
    find.skip = option_u64(options, "skip").filter(|skip| *skip > 0);
    find.limit = option_u64(options, "limit")
        .filter(|limit| *limit > 0)
        .and_then(|limit| i64::try_from(limit).ok());
    find.max_time = max_time(options);
    find.batch_size = batch_size(options);
    find.allow_disk_use = options.get_bool("allowDiskUse").ok();
    find.hint = hint(options);

    find
}

pub(crate) fn aggregate_options(options: &Document) -> AggregateOptions {
    let mut aggregate = AggregateOptions::default();

    aggregate.max_time = max_time(options);
    aggregate.batch_size = batch_size(options);
    aggregate.allow_disk_use = options.get_bool("allowDiskUse").ok();
    aggregate.hint = hint(options);

    aggregate
}

pub(crate) fn update_options(options: &Document) -> UpdateOptions {
    let mut update = UpdateOptions::default();
    update.upsert = Some(option_bool(options, "upsert", false));
    update
}

pub(crate) fn index_options(options: &Document) -> IndexOptions {
    let mut index = IndexOptions::default();
    index.name = options.get_str("name").ok().map(str::to_string);
    index.unique = options.get_bool("unique").ok();
    index
}

pub(crate) fn create_collection_options(options: &Document) -> CreateCollectionOptions {
    let mut create = CreateCollectionOptions::default();
    create.capped = options.get_bool("capped").ok();
    create.size = option_u64(options, "size");
    create.max = option_u64(options, "max");
    create
}

fn max_time(options: &Document) -> Option<Duration> {
    option_u64(options, "maxTimeMS").map(Duration::from_millis)
}

fn batch_size(options: &Document) -> Option<u32> {
    option_u64(options, "batchSize").and_then(|size| u32::try_from(size).ok())
}

fn hint(options: &Document) -> Option<Hint> {
    match options.get("hint")? {
        Bson::String(name) => Some(Hint::Name(name.clone())),
        Bson::Document(keys) => Some(Hint::Keys(keys.clone())),
        _ => None,
    }
}
