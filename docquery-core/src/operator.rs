//! The fixed table of where-clause operators.
//!
//! Callers write operators as relational symbols (`"="`, `">="`, `"like"`, ...). The table maps
//! each of the 13 accepted symbols to an [`Operator`], which in turn knows its native operator
//! name. Lookup happens at compile time, so an unknown symbol surfaces as a compilation error
//! that names the offending clause.

use std::{fmt, str::FromStr};

/// A where-clause operator with a known native translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    /// `=`
    Eq,
    /// `<`
    Lt,
    /// `>`
    Gt,
    /// `<=`
    Lte,
    /// `>=`
    Gte,
    /// `<>` and `!=`
    Ne,
    /// `like`
    Like,
    /// `not like`
    NotLike,
    /// `between`
    Between,
    /// `exists`
    Exists,
    /// `all`
    All,
    /// `elemmatch`
    ElemMatch,
}

/// Relational symbol to operator. `<>` and `!=` both map to [`Operator::Ne`].
pub const OPERATOR_TABLE: [(&str, Operator); 13] = [
    ("=", Operator::Eq),
    ("<", Operator::Lt),
    (">", Operator::Gt),
    ("<=", Operator::Lte),
    (">=", Operator::Gte),
    ("<>", Operator::Ne),
    ("!=", Operator::Ne),
    ("like", Operator::Like),
    ("not like", Operator::NotLike),
    ("between", Operator::Between),
    ("exists", Operator::Exists),
    ("all", Operator::All),
    ("elemmatch", Operator::ElemMatch),
];

impl Operator {
    /// Looks up a relational symbol. Matching ignores case and surrounding whitespace.
    pub fn lookup(symbol: &str) -> Option<Operator> {
        let symbol = symbol.trim().to_ascii_lowercase();

        OPERATOR_TABLE
            .iter()
            .find(|(candidate, _)| *candidate == symbol)
            .map(|(_, op)| *op)
    }

    /// The native operator name, without the `$` prefix.
    ///
    /// `=` has no operator of its own (it compiles to a bare field/value pair) and `like`,
    /// `not like` and `between` expand into several native operators, so they report the
    /// name the table assigns them rather than a single native key.
    pub fn native_name(self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Lt => "lt",
            Operator::Gt => "gt",
            Operator::Lte => "lte",
            Operator::Gte => "gte",
            Operator::Ne => "ne",
            Operator::Like => "like",
            Operator::NotLike => "not like",
            Operator::Between => "between",
            Operator::Exists => "exists",
            Operator::All => "all",
            Operator::ElemMatch => "elemMatch",
        }
    }

    /// The `$`-prefixed native key for operators that translate to exactly one native operator.
    pub fn native_key(self) -> Option<String> {
        match self {
            Operator::Lt
            | Operator::Gt
            | Operator::Lte
            | Operator::Gte
            | Operator::Ne
            | Operator::Exists
            | Operator::All
            | Operator::ElemMatch => Some(format!("${}", self.native_name())),
            _ => None,
        }
    }
}

impl FromStr for Operator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Operator::lookup(s).ok_or_else(|| s.to_string())
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.native_name())
    }
}
