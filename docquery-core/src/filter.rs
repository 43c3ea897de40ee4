//! Where-tree to native filter document translation.
//!
//! [`FilterCompiler`] walks the where-tree with the [`WhereVisitor`] trait and produces exactly
//! one filter document. Nodes are combined strictly left to right: each node's connective
//! decides how it joins everything accumulated before it, so
//! `a AND b OR c` compiles to `{$or: [{$and: [a, b]}, c]}`. Runs of the same connective are
//! flattened into one `$and` / `$or` array. An empty tree compiles to `{}`.

use bson::{Bson, Document, doc, oid::ObjectId};

use crate::{
    error::{DatabaseError, DatabaseResult},
    operator::Operator,
    query::{Connective, PRIMARY_KEY, WhereNode, WhereVisitor},
};

/// Translates where-trees into native filter documents.
#[derive(Debug, Default)]
pub struct FilterCompiler;

impl FilterCompiler {
    /// Compiles a list of top-level where nodes into one filter document.
    pub fn compile(wheres: &[WhereNode]) -> DatabaseResult<Document> {
        FilterCompiler.combine(wheres)
    }

    fn combine(&mut self, nodes: &[WhereNode]) -> DatabaseResult<Document> {
        let mut accumulated: Option<Accumulated> = None;

        for node in nodes {
            let compiled = self.visit_node(node)?;

            // Empty nested groups contribute nothing.
            if compiled.is_empty() {
                continue;
            }

            accumulated = Some(match accumulated {
                None => Accumulated::Single(compiled),
                Some(previous) => previous.push(node.connective(), compiled),
            });
        }

        Ok(accumulated
            .map(Accumulated::into_document)
            .unwrap_or_default())
    }
}

/// Running result of a left-to-right combination.
enum Accumulated {
    Single(Document),
    Chain(Connective, Vec<Document>),
}

impl Accumulated {
    fn push(self, connective: Connective, next: Document) -> Self {
        match self {
            Accumulated::Single(first) => Accumulated::Chain(connective, vec![first, next]),
            Accumulated::Chain(current, mut items) if current == connective => {
                items.push(next);
                Accumulated::Chain(current, items)
            }
            chain => Accumulated::Chain(connective, vec![chain.into_document(), next]),
        }
    }

    fn into_document(self) -> Document {
        match self {
            Accumulated::Single(document) => document,
            Accumulated::Chain(connective, items) => doc! { connective.native_key(): items },
        }
    }
}

impl WhereVisitor for FilterCompiler {
    type Output = Document;
    type Error = DatabaseError;

    fn visit_leaf(
        &mut self,
        field: &str,
        operator: &str,
        value: &Bson,
        negated: bool,
    ) -> Result<Self::Output, Self::Error> {
        let op = Operator::lookup(operator).ok_or_else(|| DatabaseError::UnsupportedOperator {
            field: field.to_string(),
            operator: operator.to_string(),
        })?;
        let invalid = |reason: &str| DatabaseError::InvalidOperand {
            field: field.to_string(),
            operator: operator.to_string(),
            reason: reason.to_string(),
        };
        let value = if field == PRIMARY_KEY {
            convert_key(value)
        } else {
            value.clone()
        };

        let condition: Bson = match op {
            Operator::Eq if negated => doc! { "$ne": value }.into(),
            Operator::Eq => value,
            Operator::Like | Operator::NotLike => {
                let pattern = value
                    .as_str()
                    .ok_or_else(|| invalid("expected a string pattern"))?;
                let regex = doc! { "$regex": like_to_regex(pattern), "$options": "" };

                // `not like` is itself a negation, so a negated `not like` matches.
                if (op == Operator::Like) != negated {
                    regex.into()
                } else {
                    doc! { "$not": regex }.into()
                }
            }
            Operator::Exists => {
                let should_exist = value
                    .as_bool()
                    .ok_or_else(|| invalid("expected a boolean"))?;

                doc! { "$exists": should_exist != negated }.into()
            }
            Operator::Between => {
                let bounds = match &value {
                    Bson::Array(bounds) if bounds.len() == 2 => bounds,
                    _ => return Err(invalid("expected an array of exactly two bounds")),
                };

                negate(doc! { "$gte": bounds[0].clone(), "$lte": bounds[1].clone() }, negated)
            }
            Operator::All => {
                if !matches!(value, Bson::Array(_)) {
                    return Err(invalid("expected an array of values"));
                }

                negate(doc! { "$all": value }, negated)
            }
            Operator::ElemMatch => {
                if !matches!(value, Bson::Document(_)) {
                    return Err(invalid("expected a sub-filter document"));
                }

                negate(doc! { "$elemMatch": value }, negated)
            }
            Operator::Lt | Operator::Gt | Operator::Lte | Operator::Gte | Operator::Ne => {
                let key = op
                    .native_key()
                    .ok_or_else(|| invalid("operator has no native form"))?;

                negate(doc! { key: value }, negated)
            }
        };

        Ok(doc! { field: condition })
    }

    fn visit_group(&mut self, children: &[WhereNode]) -> Result<Self::Output, Self::Error> {
        self.combine(children)
    }
}

fn negate(expression: Document, negated: bool) -> Bson {
    if negated {
        doc! { "$not": expression }.into()
    } else {
        expression.into()
    }
}

/// Converts 24-character hexadecimal strings to object ids, descending into arrays.
///
/// Every other value is returned unchanged.
pub fn convert_key(value: &Bson) -> Bson {
    match value {
        Bson::String(s) if s.len() == 24 && s.chars().all(|c| c.is_ascii_hexdigit()) => {
            ObjectId::parse_str(s)
                .map(Bson::ObjectId)
                .unwrap_or_else(|_| value.clone())
        }
        Bson::Array(items) => Bson::Array(items.iter().map(convert_key).collect()),
        _ => value.clone(),
    }
}

/// Translates a SQL `LIKE` pattern into an anchored, case-sensitive regular expression.
///
/// `%` matches any run of characters, `_` matches exactly one, and a backslash makes the
/// next character literal. Everything else is matched literally.
pub fn like_to_regex(pattern: &str) -> String {
    let mut regex = String::with_capacity(pattern.len() + 8);
    let mut chars = pattern.chars();

    regex.push('^');
    while let Some(c) = chars.next() {
        match c {
            '%' => regex.push_str(".*"),
            '_' => regex.push('.'),
            '\\' => {
                let literal = chars.next().unwrap_or('\\');
                regex.push_str(&regex::escape(literal.encode_utf8(&mut [0; 4])));
            }
            _ => regex.push_str(&regex::escape(c.encode_utf8(&mut [0; 4]))),
        }
    }
    regex.push('$');

    regex
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Connective::{And, Or};

    fn leaf(field: &str, op: &str, value: impl Into<Bson>, connective: Connective) -> WhereNode {
        WhereNode::leaf(field, op, value, connective, false)
    }

    fn not_leaf(field: &str, op: &str, value: impl Into<Bson>) -> WhereNode {
        WhereNode::leaf(field, op, value, And, true)
    }

    #[test]
    fn empty_tree_matches_everything() {
        assert_eq!(FilterCompiler::compile(&[]).unwrap(), doc! {});
    }

    #[test]
    fn single_equality_is_a_bare_pair() {
        let filter = FilterCompiler::compile(&[leaf("status", "=", "active", And)]).unwrap();
        assert_eq!(filter, doc! { "status": "active" });
    }

    #[test]
    fn comparisons_map_to_native_operators() {
        let cases = [
            ("<", "$lt"),
            (">", "$gt"),
            ("<=", "$lte"),
            (">=", "$gte"),
            ("<>", "$ne"),
            ("!=", "$ne"),
        ];

        for (symbol, native) in cases {
            let filter = FilterCompiler::compile(&[leaf("age", symbol, 18, And)]).unwrap();
            assert_eq!(filter, doc! { "age": { native: 18 } }, "symbol {symbol}");
        }
    }

    #[test]
    fn and_chain_is_flattened() {
        let filter = FilterCompiler::compile(&[
            leaf("age", ">=", 18, And),
            leaf("status", "=", "active", And),
            leaf("city", "=", "Oslo", And),
        ])
        .unwrap();

        assert_eq!(
            filter,
            doc! { "$and": [
                { "age": { "$gte": 18 } },
                { "status": "active" },
                { "city": "Oslo" },
            ] }
        );
    }

    #[test]
    fn connectives_apply_left_to_right() {
        let filter = FilterCompiler::compile(&[
            leaf("a", "=", 1, And),
            leaf("b", "=", 2, And),
            leaf("c", "=", 3, Or),
            leaf("d", "=", 4, And),
        ])
        .unwrap();

        assert_eq!(
            filter,
            doc! { "$and": [
                { "$or": [ { "$and": [ { "a": 1 }, { "b": 2 } ] }, { "c": 3 } ] },
                { "d": 4 },
            ] }
        );
    }

    #[test]
    fn first_connective_is_ignored() {
        let filter = FilterCompiler::compile(&[leaf("a", "=", 1, Or), leaf("b", "=", 2, Or)]).unwrap();
        assert_eq!(filter, doc! { "$or": [ { "a": 1 }, { "b": 2 } ] });
    }

    #[test]
    fn groups_compile_recursively() {
        let filter = FilterCompiler::compile(&[
            leaf("active", "=", true, And),
            WhereNode::group(And, vec![leaf("role", "=", "admin", And), leaf("role", "=", "owner", Or)]),
        ])
        .unwrap();

        assert_eq!(
            filter,
            doc! { "$and": [
                { "active": true },
                { "$or": [ { "role": "admin" }, { "role": "owner" } ] },
            ] }
        );
    }

    #[test]
    fn empty_groups_are_skipped() {
        let filter = FilterCompiler::compile(&[
            WhereNode::group(And, vec![]),
            leaf("a", "=", 1, And),
        ])
        .unwrap();

        assert_eq!(filter, doc! { "a": 1 });
    }

    #[test]
    fn between_is_a_two_sided_range() {
        let filter = FilterCompiler::compile(&[leaf("age", "between", vec![18, 30], And)]).unwrap();
        assert_eq!(filter, doc! { "age": { "$gte": 18, "$lte": 30 } });
    }

    #[test]
    fn between_requires_two_bounds() {
        let err = FilterCompiler::compile(&[leaf("age", "between", vec![18], And)]).unwrap_err();
        assert!(matches!(
            err,
            DatabaseError::InvalidOperand { ref field, ref operator, .. }
                if field == "age" && operator == "between"
        ));
    }

    #[test]
    fn exists_all_and_elem_match() {
        assert_eq!(
            FilterCompiler::compile(&[leaf("email", "exists", true, And)]).unwrap(),
            doc! { "email": { "$exists": true } }
        );
        assert_eq!(
            FilterCompiler::compile(&[leaf("tags", "all", vec!["a", "b"], And)]).unwrap(),
            doc! { "tags": { "$all": ["a", "b"] } }
        );
        assert_eq!(
            FilterCompiler::compile(&[leaf("items", "elemmatch", doc! { "qty": { "$gt": 2 } }, And)]).unwrap(),
            doc! { "items": { "$elemMatch": { "qty": { "$gt": 2 } } } }
        );
    }

    #[test]
    fn operand_shapes_are_checked() {
        assert!(FilterCompiler::compile(&[leaf("email", "exists", "yes", And)]).is_err());
        assert!(FilterCompiler::compile(&[leaf("tags", "all", "a", And)]).is_err());
        assert!(FilterCompiler::compile(&[leaf("items", "elemmatch", 3, And)]).is_err());
        assert!(FilterCompiler::compile(&[leaf("name", "like", 3, And)]).is_err());
    }

    #[test]
    fn unknown_operator_names_the_leaf() {
        let err = FilterCompiler::compile(&[
            leaf("age", ">", 1, And),
            leaf("name", "~=", "x", And),
        ])
        .unwrap_err();

        assert!(err.is_compilation());
        assert_eq!(
            err.to_string(),
            "Unsupported operator '~=' in where clause on field 'name'"
        );
    }

    #[test]
    fn negation() {
        assert_eq!(
            FilterCompiler::compile(&[not_leaf("status", "=", "x")]).unwrap(),
            doc! { "status": { "$ne": "x" } }
        );
        assert_eq!(
            FilterCompiler::compile(&[not_leaf("age", ">", 3)]).unwrap(),
            doc! { "age": { "$not": { "$gt": 3 } } }
        );
        assert_eq!(
            FilterCompiler::compile(&[not_leaf("email", "exists", true)]).unwrap(),
            doc! { "email": { "$exists": false } }
        );
        assert_eq!(
            FilterCompiler::compile(&[not_leaf("age", "between", vec![1, 2])]).unwrap(),
            doc! { "age": { "$not": { "$gte": 1, "$lte": 2 } } }
        );
    }

    #[test]
    fn like_and_not_like() {
        assert_eq!(
            FilterCompiler::compile(&[leaf("name", "like", "Al%", And)]).unwrap(),
            doc! { "name": { "$regex": "^Al.*$", "$options": "" } }
        );
        assert_eq!(
            FilterCompiler::compile(&[leaf("name", "not like", "Al%", And)]).unwrap(),
            doc! { "name": { "$not": { "$regex": "^Al.*$", "$options": "" } } }
        );
        assert_eq!(
            FilterCompiler::compile(&[not_leaf("name", "not like", "Al%")]).unwrap(),
            doc! { "name": { "$regex": "^Al.*$", "$options": "" } }
        );
    }

    #[test]
    fn like_patterns() {
        assert_eq!(like_to_regex("%son"), "^.*son$");
        assert_eq!(like_to_regex("J_n"), "^J.n$");
        assert_eq!(like_to_regex("a.b"), r"^a\.b$");
        assert_eq!(like_to_regex(r"100\%"), "^100%$");
        assert_eq!(like_to_regex("(x)"), r"^\(x\)$");
    }

    #[test]
    fn primary_key_hex_strings_become_object_ids() {
        let hex = "507f1f77bcf86cd799439011";
        let filter = FilterCompiler::compile(&[leaf("_id", "=", hex, And)]).unwrap();
        assert_eq!(filter, doc! { "_id": ObjectId::parse_str(hex).unwrap() });

        // Other fields and other strings pass through.
        let filter = FilterCompiler::compile(&[leaf("ref", "=", hex, And)]).unwrap();
        assert_eq!(filter, doc! { "ref": hex });
        let filter = FilterCompiler::compile(&[leaf("_id", "=", "user-1", And)]).unwrap();
        assert_eq!(filter, doc! { "_id": "user-1" });
    }
}
