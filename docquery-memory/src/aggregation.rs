//! Aggregation pipeline execution over in-memory documents.
//!
//! Supports the stages the core pipeline compiler emits (`$match`, `$unwind`, `$group`,
//! `$sort`, `$skip`, `$limit`, `$project`) plus `$count`. `$group` understands the `$sum`,
//! `$avg`, `$min`, `$max`, `$first`, `$last` and `$push` accumulators.

use bson::{Bson, Document, doc};

use docquery_core::{
    error::{DatabaseError, DatabaseResult},
    query::PRIMARY_KEY,
};

use crate::evaluator::{
    as_f64, compare_for_sort, get_path, project, select_matching, set_path, sort_documents,
    values_equal,
};

/// Runs `pipeline` over `documents`, stage by stage.
pub(crate) fn run_pipeline(documents: Vec<Document>, pipeline: &[Document]) -> DatabaseResult<Vec<Document>> {
    let mut documents = documents;

    for stage in pipeline {
        let (name, body) = match stage.iter().next() {
            Some(entry) if stage.len() == 1 => entry,
            _ => {
                return Err(DatabaseError::Backend(format!(
                    "a pipeline stage must have exactly one key, found {stage}"
                )));
            }
        };

        documents = match name.as_str() {
            "$match" => select_matching(documents.iter(), stage_document(name, body)?)?,
            "$unwind" => unwind(documents, unwind_path(body)?),
            "$group" => group(documents, stage_document(name, body)?)?,
            "$sort" => {
                sort_documents(&mut documents, stage_document(name, body)?);
                documents
            }
            "$skip" => documents
                .into_iter()
                .skip(stage_count(name, body)?)
                .collect(),
            "$limit" => documents
                .into_iter()
                .take(stage_count(name, body)?)
                .collect(),
            "$project" => {
                let projection = stage_document(name, body)?;
                documents
                    .iter()
                    .map(|document| project(document, projection))
                    .collect()
            }
            "$count" => {
                let Bson::String(field) = body else {
                    return Err(invalid_stage(name, "expected an output field name"));
                };
                vec![doc! { field: documents.len() as i64 }]
            }
            other => {
                return Err(DatabaseError::UnsupportedOperator {
                    field: String::new(),
                    operator: other.to_string(),
                });
            }
        };
    }

    Ok(documents)
}

fn invalid_stage(stage: &str, reason: &str) -> DatabaseError {
    DatabaseError::InvalidOperand {
        field: String::new(),
        operator: stage.to_string(),
        reason: reason.to_string(),
    }
}

fn stage_document<'a>(stage: &str, body: &'a Bson) -> DatabaseResult<&'a Document> {
    body.as_document()
        .ok_or_else(|| invalid_stage(stage, "expected a document"))
}

fn stage_count(stage: &str, body: &Bson) -> DatabaseResult<usize> {
    as_f64(body)
        .filter(|count| *count >= 0.0)
        .map(|count| count as usize)
        .ok_or_else(|| invalid_stage(stage, "expected a non-negative number"))
}

fn unwind_path(body: &Bson) -> DatabaseResult<&str> {
    let reference = match body {
        Bson::String(reference) => reference.as_str(),
        Bson::Document(options) => options
            .get_str("path")
            .map_err(|_| invalid_stage("$unwind", "expected a path"))?,
        _ => return Err(invalid_stage("$unwind", "expected a field path")),
    };

    reference
        .strip_prefix('$')
        .ok_or_else(|| invalid_stage("$unwind", "field paths must start with '$'"))
}

// Missing, null and empty arrays drop the document; scalars pass through.
fn unwind(documents: Vec<Document>, path: &str) -> Vec<Document> {
    let mut unwound = Vec::with_capacity(documents.len());

    for document in documents {
        let items = match get_path(&document, path) {
            Some(Bson::Array(items)) => items.clone(),
            None | Some(Bson::Null) => continue,
            Some(_) => {
                unwound.push(document);
                continue;
            }
        };

        for item in items {
            let mut copy = document.clone();
            set_path(&mut copy, path, item);
            unwound.push(copy);
        }
    }

    unwound
}

/// Resolves `$field` references and nested key documents against `document`.
fn evaluate(document: &Document, expression: &Bson) -> Option<Bson> {
    match expression {
        Bson::String(reference) if reference.starts_with('$') => {
            get_path(document, &reference[1..]).cloned()
        }
        Bson::Document(fields) => {
            let mut resolved = Document::new();
            for (key, value) in fields {
                resolved.insert(key.clone(), evaluate(document, value).unwrap_or(Bson::Null));
            }
            Some(Bson::Document(resolved))
        }
        literal => Some(literal.clone()),
    }
}

fn group(documents: Vec<Document>, spec: &Document) -> DatabaseResult<Vec<Document>> {
    let key_spec = spec
        .get(PRIMARY_KEY)
        .ok_or_else(|| invalid_stage("$group", "missing the _id group key"))?;

    let mut groups: Vec<(Bson, Vec<Document>)> = Vec::new();
    for document in documents {
        let key = evaluate(&document, key_spec).unwrap_or(Bson::Null);
        match groups.iter_mut().find(|(existing, _)| values_equal(existing, &key)) {
            Some((_, members)) => members.push(document),
            None => groups.push((key, vec![document])),
        }
    }

    groups
        .into_iter()
        .map(|(key, members)| {
            let mut row = doc! { PRIMARY_KEY: key };
            for (name, accumulator) in spec.iter().filter(|(name, _)| *name != PRIMARY_KEY) {
                row.insert(name.clone(), accumulate(name, accumulator, &members)?);
            }
            Ok(row)
        })
        .collect()
}

fn accumulate(name: &str, accumulator: &Bson, members: &[Document]) -> DatabaseResult<Bson> {
    let (operator, operand) = match accumulator.as_document().and_then(|spec| spec.iter().next()) {
        Some(entry) => entry,
        None => {
            return Err(DatabaseError::InvalidOperand {
                field: name.to_string(),
                operator: "$group".to_string(),
                reason: "expected an accumulator document".to_string(),
            });
        }
    };

    let values = || {
        members
            .iter()
            .filter_map(|member| evaluate(member, operand))
    };

    Ok(match operator.as_str() {
        "$sum" => sum(values()),
        "$avg" => average(values()),
        "$min" => values()
            .filter(|value| !matches!(value, Bson::Null))
            .min_by(|left, right| compare_for_sort(Some(left), Some(right)))
            .unwrap_or(Bson::Null),
        "$max" => values()
            .filter(|value| !matches!(value, Bson::Null))
            .max_by(|left, right| compare_for_sort(Some(left), Some(right)))
            .unwrap_or(Bson::Null),
        "$first" => members
            .first()
            .and_then(|member| evaluate(member, operand))
            .unwrap_or(Bson::Null),
        "$last" => members
            .last()
            .and_then(|member| evaluate(member, operand))
            .unwrap_or(Bson::Null),
        "$push" => Bson::Array(values().collect()),
        other => {
            return Err(DatabaseError::UnsupportedOperator {
                field: name.to_string(),
                operator: other.to_string(),
            });
        }
    })
}

// Integers stay integers unless a double is involved; Int32 widens to Int64 on overflow.
fn sum(values: impl Iterator<Item = Bson>) -> Bson {
    let mut integer: i64 = 0;
    let mut float = 0.0;
    let mut has_double = false;
    let mut has_long = false;

    for value in values {
        match value {
            Bson::Int32(value) => integer = integer.saturating_add(value as i64),
            Bson::Int64(value) => {
                integer = integer.saturating_add(value);
                has_long = true;
            }
            Bson::Double(value) => {
                float += value;
                has_double = true;
            }
            _ => {}
        }
    }

    if has_double {
        Bson::Double(float + integer as f64)
    } else if has_long {
        Bson::Int64(integer)
    } else {
        i32::try_from(integer)
            .map(Bson::Int32)
            .unwrap_or(Bson::Int64(integer))
    }
}

fn average(values: impl Iterator<Item = Bson>) -> Bson {
    let (total, count) = values
        .filter_map(|value| as_f64(&value))
        .fold((0.0, 0_u32), |(total, count), value| (total + value, count + 1));

    if count > 0 {
        Bson::Double(total / count as f64)
    } else {
        Bson::Null
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn orders() -> Vec<Document> {
        vec![
            doc! { "_id": 1, "city": "Oslo", "name": "a", "total": 10, "items": [{ "price": 3 }, { "price": 7 }] },
            doc! { "_id": 2, "city": "Rome", "name": "b", "total": 5, "items": [{ "price": 1 }] },
            doc! { "_id": 3, "city": "Oslo", "name": "c", "total": 2.5, "items": [] },
        ]
    }

    #[test]
    fn group_null_sums_everything() {
        let result = run_pipeline(
            orders(),
            &[doc! { "$group": { "_id": Bson::Null, "aggregate": { "$sum": "$total" } } }],
        )
        .unwrap();

        assert_eq!(result, vec![doc! { "_id": Bson::Null, "aggregate": 17.5 }]);
    }

    #[test]
    fn group_by_field_keeps_last_value() {
        let result = run_pipeline(
            orders(),
            &[doc! { "$group": {
                "_id": { "city": "$city" },
                "city": { "$last": "$city" },
                "name": { "$last": "$name" },
            } }],
        )
        .unwrap();

        assert_eq!(
            result,
            vec![
                doc! { "_id": { "city": "Oslo" }, "city": "Oslo", "name": "c" },
                doc! { "_id": { "city": "Rome" }, "city": "Rome", "name": "b" },
            ]
        );
    }

    #[test]
    fn count_via_literal_sum() {
        let result = run_pipeline(
            orders(),
            &[
                doc! { "$match": { "city": "Oslo" } },
                doc! { "$group": { "_id": Bson::Null, "aggregate": { "$sum": 1 } } },
            ],
        )
        .unwrap();

        assert_eq!(result, vec![doc! { "_id": Bson::Null, "aggregate": 2 }]);
    }

    #[test]
    fn empty_input_produces_no_groups() {
        let result = run_pipeline(
            vec![],
            &[doc! { "$group": { "_id": Bson::Null, "aggregate": { "$avg": "$total" } } }],
        )
        .unwrap();

        assert!(result.is_empty());
    }

    #[test]
    fn unwind_then_max() {
        let result = run_pipeline(
            orders(),
            &[
                doc! { "$unwind": "$items" },
                doc! { "$group": { "_id": Bson::Null, "aggregate": { "$max": "$items.price" } } },
            ],
        )
        .unwrap();

        assert_eq!(result, vec![doc! { "_id": Bson::Null, "aggregate": 7 }]);
    }

    #[test]
    fn min_and_avg() {
        let min = run_pipeline(
            orders(),
            &[doc! { "$group": { "_id": Bson::Null, "aggregate": { "$min": "$total" } } }],
        )
        .unwrap();
        assert_eq!(min[0].get("aggregate"), Some(&Bson::Double(2.5)));

        let avg = run_pipeline(
            orders(),
            &[doc! { "$group": { "_id": Bson::Null, "aggregate": { "$avg": "$total" } } }],
        )
        .unwrap();
        assert_eq!(avg[0].get("aggregate"), Some(&Bson::Double(17.5 / 3.0)));
    }

    #[test]
    fn sort_skip_limit_project() {
        let result = run_pipeline(
            orders(),
            &[
                doc! { "$sort": { "total": -1 } },
                doc! { "$skip": 1_i64 },
                doc! { "$limit": 1_i64 },
                doc! { "$project": { "name": 1, "_id": 0 } },
            ],
        )
        .unwrap();

        assert_eq!(result, vec![doc! { "name": "b" }]);
    }

    #[test]
    fn unknown_stages_fail() {
        let err = run_pipeline(orders(), &[doc! { "$lookup": {} }]).unwrap_err();
        assert!(matches!(err, DatabaseError::UnsupportedOperator { .. }));
    }

    #[test]
    fn sums_widen_on_overflow() {
        let result = sum(vec![Bson::Int32(i32::MAX), Bson::Int32(1)].into_iter());
        assert_eq!(result, Bson::Int64(i32::MAX as i64 + 1));
    }
}
