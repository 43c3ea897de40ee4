//! Update document application for in-memory writes.

use bson::{Bson, Document};

use docquery_core::{
    error::{DatabaseError, DatabaseResult},
    query::PRIMARY_KEY,
};

use crate::evaluator::{get_path, remove_path, set_path};

/// Applies `update` to `document` in place.
///
/// Operator documents support `$set`, `$unset`, `$inc` and `$push`. A document without
/// operators replaces every field except the primary key.
pub(crate) fn apply_update(document: &mut Document, update: &Document) -> DatabaseResult<()> {
    if !update.keys().any(|key| key.starts_with('$')) {
        let mut replacement = Document::new();
        if let Some(id) = document.get(PRIMARY_KEY) {
            replacement.insert(PRIMARY_KEY, id.clone());
        }
        replacement.extend(
            update
                .iter()
                .filter(|(key, _)| *key != PRIMARY_KEY)
                .map(|(key, value)| (key.clone(), value.clone())),
        );
        *document = replacement;
        return Ok(());
    }

    for (operator, fields) in update {
        let Bson::Document(fields) = fields else {
            return Err(DatabaseError::InvalidDocument(format!(
                "{operator} expects a document of fields"
            )));
        };

        for (path, value) in fields {
            match operator.as_str() {
                "$set" => set_path(document, path, value.clone()),
                "$unset" => {
                    remove_path(document, path);
                }
                "$inc" => {
                    let incremented = add(path, get_path(document, path), value)?;
                    set_path(document, path, incremented);
                }
                "$push" => {
                    let mut items = match get_path(document, path) {
                        None => Vec::new(),
                        Some(Bson::Array(items)) => items.clone(),
                        Some(_) => {
                            return Err(DatabaseError::InvalidDocument(format!(
                                "cannot push to non-array field '{path}'"
                            )));
                        }
                    };
                    items.push(value.clone());
                    set_path(document, path, Bson::Array(items));
                }
                other => {
                    return Err(DatabaseError::UnsupportedOperator {
                        field: path.clone(),
                        operator: other.to_string(),
                    });
                }
            }
        }
    }

    Ok(())
}

fn add(path: &str, current: Option<&Bson>, amount: &Bson) -> DatabaseResult<Bson> {
    let sum = match (current, amount) {
        (None, amount @ (Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_))) => Some(amount.clone()),
        (Some(Bson::Int32(left)), Bson::Int32(right)) => Some(
            left.checked_add(*right)
                .map(Bson::Int32)
                .unwrap_or(Bson::Int64(*left as i64 + *right as i64)),
        ),
        (Some(Bson::Int32(left)), Bson::Int64(right)) => left_i64(*left as i64, *right),
        (Some(Bson::Int64(left)), Bson::Int32(right)) => left_i64(*left, *right as i64),
        (Some(Bson::Int64(left)), Bson::Int64(right)) => left_i64(*left, *right),
        (Some(Bson::Double(left)), right) => number(right).map(|right| Bson::Double(left + right)),
        (Some(left), Bson::Double(right)) => number(left).map(|left| Bson::Double(left + right)),
        _ => None,
    };

    sum.ok_or_else(|| {
        DatabaseError::InvalidDocument(format!("cannot increment non-numeric field '{path}'"))
    })
}

fn left_i64(left: i64, right: i64) -> Option<Bson> {
    left.checked_add(right).map(Bson::Int64)
}

fn number(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(value) => Some(*value as f64),
        Bson::Int64(value) => Some(*value as f64),
        Bson::Double(value) => Some(*value),
        _ => None,
    }
}

/// Builds the document an upsert starts from: the filter's plain equality conditions.
pub(crate) fn upsert_seed(filter: &Document) -> Document {
    let mut seed = Document::new();

    for (field, condition) in filter.iter().filter(|(field, _)| !field.starts_with('$')) {
        match condition {
            Bson::Document(operators) if operators.keys().any(|key| key.starts_with('$')) => {
                if let Some(value) = operators.get("$eq") {
                    set_path(&mut seed, field, value.clone());
                }
            }
            value => set_path(&mut seed, field, value.clone()),
        }
    }

    seed
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn set_unset_and_inc() {
        let mut document = doc! { "_id": 1, "name": "Ann", "visits": 1, "old": true };

        apply_update(
            &mut document,
            &doc! {
                "$set": { "name": "Bea", "address.city": "Oslo" },
                "$unset": { "old": "" },
                "$inc": { "visits": 2, "score": 1.5 },
            },
        )
        .unwrap();

        assert_eq!(
            document,
            doc! { "_id": 1, "name": "Bea", "visits": 3, "address": { "city": "Oslo" }, "score": 1.5 }
        );
    }

    #[test]
    fn push_appends() {
        let mut document = doc! { "tags": ["a"] };
        apply_update(&mut document, &doc! { "$push": { "tags": "b", "new": 1 } }).unwrap();

        assert_eq!(document, doc! { "tags": ["a", "b"], "new": [1] });
    }

    #[test]
    fn replacement_keeps_primary_key() {
        let mut document = doc! { "_id": 7, "a": 1 };
        apply_update(&mut document, &doc! { "b": 2 }).unwrap();

        assert_eq!(document, doc! { "_id": 7, "b": 2 });
    }

    #[test]
    fn invalid_updates_fail() {
        let mut document = doc! { "name": "Ann" };

        assert!(apply_update(&mut document, &doc! { "$inc": { "name": 1 } }).is_err());
        assert!(apply_update(&mut document, &doc! { "$rename": { "name": "n" } }).is_err());
        assert!(apply_update(&mut document, &doc! { "$set": 1 }).is_err());
    }

    #[test]
    fn increments_widen_on_overflow() {
        let mut document = doc! { "n": i32::MAX };
        apply_update(&mut document, &doc! { "$inc": { "n": 1 } }).unwrap();

        assert_eq!(document, doc! { "n": i32::MAX as i64 + 1 });
    }

    #[test]
    fn upsert_seed_uses_equality_conditions() {
        let seed = upsert_seed(&doc! {
            "email": "a@b.c",
            "age": { "$gt": 3 },
            "role": { "$eq": "admin" },
            "$or": [{ "x": 1 }],
        });

        assert_eq!(seed, doc! { "email": "a@b.c", "role": "admin" });
    }
}
