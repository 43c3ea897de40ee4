//! Native filter evaluation for in-memory documents.
//!
//! [`DocumentEvaluator`] answers whether a document matches a native filter document, the
//! same documents the core's filter compiler produces. The supported operators are the
//! logical `$and`, `$or`, `$nor`, the field operators `$eq`, `$ne`, `$gt`, `$gte`, `$lt`,
//! `$lte`, `$in`, `$nin`, `$exists`, `$regex` (with `$options`), `$not`, `$all`,
//! `$elemMatch` and `$size`, and bare equality. As in a document store, equality against an
//! array field matches when any element is equal.

use bson::{Bson, Document};
use regex::RegexBuilder;
use std::cmp::Ordering;

use docquery_core::{
    error::{DatabaseError, DatabaseResult},
    query::PRIMARY_KEY,
};

/// Resolves a dotted path. Numeric segments index into arrays.
pub(crate) fn get_path<'a>(document: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut segments = path.split('.');
    let mut current = document.get(segments.next()?)?;

    for segment in segments {
        current = match current {
            Bson::Document(inner) => inner.get(segment)?,
            Bson::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }

    Some(current)
}

/// Writes `value` at a dotted path, creating intermediate documents.
pub(crate) fn set_path(document: &mut Document, path: &str, value: Bson) {
    match path.split_once('.') {
        None => {
            document.insert(path, value);
        }
        Some((head, rest)) => {
            if !matches!(document.get(head), Some(Bson::Document(_))) {
                document.insert(head, Document::new());
            }
            if let Some(Bson::Document(inner)) = document.get_mut(head) {
                set_path(inner, rest, value);
            }
        }
    }
}

pub(crate) fn remove_path(document: &mut Document, path: &str) -> Option<Bson> {
    match path.split_once('.') {
        None => document.remove(path),
        Some((head, rest)) => match document.get_mut(head) {
            Some(Bson::Document(inner)) => remove_path(inner, rest),
            _ => None,
        },
    }
}

pub(crate) fn as_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(value) => Some(*value as f64),
        Bson::Int64(value) => Some(*value as f64),
        Bson::Double(value) => Some(*value),
        _ => None,
    }
}

pub(crate) fn truthy(value: &Bson) -> bool {
    match value {
        Bson::Boolean(value) => *value,
        Bson::Null => false,
        other => as_f64(other).is_none_or(|number| number != 0.0),
    }
}

/// Equality with numeric types compared by value.
pub(crate) fn values_equal(left: &Bson, right: &Bson) -> bool {
    match (left, right) {
        (Bson::Array(left), Bson::Array(right)) => {
            left.len() == right.len()
                && left
                    .iter()
                    .zip(right)
                    .all(|(left, right)| values_equal(left, right))
        }
        (Bson::Document(left), Bson::Document(right)) => {
            left.len() == right.len()
                && left
                    .iter()
                    .zip(right.iter())
                    .all(|((lk, lv), (rk, rv))| lk == rk && values_equal(lv, rv))
        }
        _ => match (as_f64(left), as_f64(right)) {
            (Some(left), Some(right)) => left == right,
            _ => left == right,
        },
    }
}

/// Orders two values of the same type class; `None` when they cannot be compared.
pub(crate) fn compare_values(left: &Bson, right: &Bson) -> Option<Ordering> {
    if let (Some(left), Some(right)) = (as_f64(left), as_f64(right)) {
        return left.partial_cmp(&right);
    }

    match (left, right) {
        (Bson::Null, Bson::Null) => Some(Ordering::Equal),
        (Bson::String(left), Bson::String(right)) => Some(left.cmp(right)),
        (Bson::Boolean(left), Bson::Boolean(right)) => Some(left.cmp(right)),
        (Bson::DateTime(left), Bson::DateTime(right)) => {
            Some(left.timestamp_millis().cmp(&right.timestamp_millis()))
        }
        (Bson::ObjectId(left), Bson::ObjectId(right)) => Some(left.bytes().cmp(&right.bytes())),
        (Bson::Timestamp(left), Bson::Timestamp(right)) => {
            Some((left.time, left.increment).cmp(&(right.time, right.increment)))
        }
        _ => None,
    }
}

// Cross-type sort order of a document store: null, numbers, strings, documents, arrays,
// binary, object ids, booleans, dates.
fn type_rank(value: &Bson) -> u8 {
    match value {
        Bson::MinKey => 0,
        Bson::Null | Bson::Undefined => 1,
        Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) | Bson::Decimal128(_) => 2,
        Bson::String(_) | Bson::Symbol(_) => 3,
        Bson::Document(_) => 4,
        Bson::Array(_) => 5,
        Bson::Binary(_) => 6,
        Bson::ObjectId(_) => 7,
        Bson::Boolean(_) => 8,
        Bson::DateTime(_) => 9,
        Bson::Timestamp(_) => 10,
        Bson::RegularExpression(_) => 11,
        Bson::MaxKey => u8::MAX,
        _ => 12,
    }
}

/// Total order used for sorting. Missing values sort first.
pub(crate) fn compare_for_sort(left: Option<&Bson>, right: Option<&Bson>) -> Ordering {
    match (left, right) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(left), Some(right)) => compare_values(left, right)
            .unwrap_or_else(|| type_rank(left).cmp(&type_rank(right))),
    }
}

/// Stable sort by a native sort document (`{ field: 1 | -1, ... }`).
pub(crate) fn sort_documents(documents: &mut [Document], sort: &Document) {
    documents.sort_by(|left, right| {
        for (field, direction) in sort {
            let ordering = compare_for_sort(get_path(left, field), get_path(right, field));
            let ordering = if as_f64(direction).is_some_and(|direction| direction < 0.0) {
                ordering.reverse()
            } else {
                ordering
            };

            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}

/// Applies an inclusion or exclusion projection. String values starting with `$` copy the
/// referenced field under a new name.
pub(crate) fn project(document: &Document, projection: &Document) -> Document {
    let inclusive = projection.iter().any(|(field, spec)| {
        field != PRIMARY_KEY && (truthy(spec) || matches!(spec, Bson::String(_)))
    });

    if !inclusive {
        let mut projected = document.clone();
        for (field, spec) in projection {
            if !truthy(spec) {
                remove_path(&mut projected, field);
            }
        }
        return projected;
    }

    let mut projected = Document::new();
    if projection.get(PRIMARY_KEY).is_none_or(truthy) {
        if let Some(id) = document.get(PRIMARY_KEY) {
            projected.insert(PRIMARY_KEY, id.clone());
        }
    }

    for (field, spec) in projection.iter().filter(|(field, _)| *field != PRIMARY_KEY) {
        let source = match spec {
            Bson::String(reference) => reference.strip_prefix('$'),
            spec if truthy(spec) => Some(field.as_str()),
            _ => None,
        };

        if let Some(value) = source.and_then(|source| get_path(document, source)) {
            set_path(&mut projected, field, value.clone());
        }
    }

    projected
}

/// Clones every document matching `filter`, preserving order.
pub(crate) fn select_matching<'d>(
    documents: impl IntoIterator<Item = &'d Document>,
    filter: &Document,
) -> DatabaseResult<Vec<Document>> {
    let mut matched = Vec::new();
    for document in documents {
        if DocumentEvaluator::new(document).matches(filter)? {
            matched.push(document.clone());
        }
    }
    Ok(matched)
}

fn is_operator_document(document: &Document) -> bool {
    document
        .keys()
        .next()
        .is_some_and(|key| key.starts_with('$'))
}

fn invalid_operand(field: &str, operator: &str, reason: &str) -> DatabaseError {
    DatabaseError::InvalidOperand {
        field: field.to_string(),
        operator: operator.to_string(),
        reason: reason.to_string(),
    }
}

/// Evaluates native filter documents against one document.
pub(crate) struct DocumentEvaluator<'a> {
    document: &'a Document,
}

impl<'a> DocumentEvaluator<'a> {
    pub fn new(document: &'a Document) -> Self {
        Self { document }
    }

    /// Returns whether the document satisfies every top-level condition of `filter`.
    pub fn matches(&self, filter: &Document) -> DatabaseResult<bool> {
        for (key, condition) in filter {
            let matched = match key.as_str() {
                "$and" => {
                    let mut all = true;
                    for clause in clauses(key, condition)? {
                        if !self.matches(clause)? {
                            all = false;
                            break;
                        }
                    }
                    all
                }
                "$or" => self.any(key, condition)?,
                "$nor" => !self.any(key, condition)?,
                operator if operator.starts_with('$') => {
                    return Err(DatabaseError::UnsupportedOperator {
                        field: String::new(),
                        operator: operator.to_string(),
                    });
                }
                field => self.field_matches(field, condition)?,
            };

            if !matched {
                return Ok(false);
            }
        }

        Ok(true)
    }

    fn any(&self, key: &str, condition: &Bson) -> DatabaseResult<bool> {
        for clause in clauses(key, condition)? {
            if self.matches(clause)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn field_matches(&self, field: &str, condition: &Bson) -> DatabaseResult<bool> {
        let value = get_path(self.document, field);

        match condition {
            Bson::Document(operators) if is_operator_document(operators) => {
                operators_match(field, value, operators)
            }
            expected => Ok(equals_match(value, expected)),
        }
    }
}

fn clauses<'f>(key: &str, condition: &'f Bson) -> DatabaseResult<Vec<&'f Document>> {
    let Bson::Array(items) = condition else {
        return Err(invalid_operand(key, key, "expected an array of filter documents"));
    };

    items
        .iter()
        .map(|item| match item {
            Bson::Document(clause) => Ok(clause),
            _ => Err(invalid_operand(key, key, "expected an array of filter documents")),
        })
        .collect()
}

fn equals_match(value: Option<&Bson>, expected: &Bson) -> bool {
    match value {
        None => matches!(expected, Bson::Null),
        Some(actual) => {
            values_equal(actual, expected)
                || matches!(actual, Bson::Array(items) if items.iter().any(|item| values_equal(item, expected)))
        }
    }
}

fn compare_match(value: Option<&Bson>, argument: &Bson, accept: impl Fn(Ordering) -> bool) -> bool {
    match value {
        None => false,
        Some(Bson::Array(items)) => items
            .iter()
            .any(|item| compare_values(item, argument).is_some_and(&accept)),
        Some(actual) => compare_values(actual, argument).is_some_and(accept),
    }
}

fn operators_match(field: &str, value: Option<&Bson>, operators: &Document) -> DatabaseResult<bool> {
    for (operator, argument) in operators {
        let matched = match operator.as_str() {
            "$eq" => equals_match(value, argument),
            "$ne" => !equals_match(value, argument),
            "$gt" => compare_match(value, argument, |ordering| ordering == Ordering::Greater),
            "$gte" => compare_match(value, argument, |ordering| ordering != Ordering::Less),
            "$lt" => compare_match(value, argument, |ordering| ordering == Ordering::Less),
            "$lte" => compare_match(value, argument, |ordering| ordering != Ordering::Greater),
            "$in" => in_match(field, operator, value, argument)?,
            "$nin" => !in_match(field, operator, value, argument)?,
            "$exists" => value.is_some() == truthy(argument),
            "$regex" => {
                let options = operators.get_str("$options").unwrap_or("");
                regex_match(field, value, argument, options)?
            }
            "$options" => true,
            "$not" => match argument {
                Bson::Document(inner) => !operators_match(field, value, inner)?,
                Bson::String(_) => !regex_match(field, value, argument, "")?,
                _ => return Err(invalid_operand(field, operator, "expected an operator document")),
            },
            "$all" => {
                let Bson::Array(items) = argument else {
                    return Err(invalid_operand(field, operator, "expected an array"));
                };
                !items.is_empty() && items.iter().all(|item| equals_match(value, item))
            }
            "$elemMatch" => elem_match(field, value, argument)?,
            "$size" => matches!(
                value,
                Some(Bson::Array(items)) if as_f64(argument) == Some(items.len() as f64)
            ),
            other => {
                return Err(DatabaseError::UnsupportedOperator {
                    field: field.to_string(),
                    operator: other.to_string(),
                });
            }
        };

        if !matched {
            return Ok(false);
        }
    }

    Ok(true)
}

fn in_match(field: &str, operator: &str, value: Option<&Bson>, argument: &Bson) -> DatabaseResult<bool> {
    let Bson::Array(items) = argument else {
        return Err(invalid_operand(field, operator, "expected an array"));
    };

    Ok(items.iter().any(|item| equals_match(value, item)))
}

fn regex_match(field: &str, value: Option<&Bson>, pattern: &Bson, options: &str) -> DatabaseResult<bool> {
    let Bson::String(pattern) = pattern else {
        return Err(invalid_operand(field, "$regex", "expected a string pattern"));
    };

    let regex = RegexBuilder::new(pattern)
        .case_insensitive(options.contains('i'))
        .multi_line(options.contains('m'))
        .dot_matches_new_line(options.contains('s'))
        .ignore_whitespace(options.contains('x'))
        .build()
        .map_err(|err| invalid_operand(field, "$regex", &err.to_string()))?;

    Ok(match value {
        Some(Bson::String(text)) => regex.is_match(text),
        Some(Bson::Array(items)) => items
            .iter()
            .any(|item| matches!(item, Bson::String(text) if regex.is_match(text))),
        _ => false,
    })
}

fn elem_match(field: &str, value: Option<&Bson>, argument: &Bson) -> DatabaseResult<bool> {
    let Bson::Document(condition) = argument else {
        return Err(invalid_operand(field, "$elemMatch", "expected a filter document"));
    };
    let Some(Bson::Array(items)) = value else {
        return Ok(false);
    };

    for item in items {
        let matched = if is_operator_document(condition) {
            operators_match(field, Some(item), condition)?
        } else if let Bson::Document(element) = item {
            DocumentEvaluator::new(element).matches(condition)?
        } else {
            false
        };

        if matched {
            return Ok(true);
        }
    }

    Ok(false)
}
