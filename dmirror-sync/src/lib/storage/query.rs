//! Typed construction of Drive search queries.
//!
//! User supplied strings only reach a query through [`Literal`], which escapes
//! them, so a name such as `O'Brien` can't terminate the quoted literal early.

use std::fmt;

use super::id::Id;

/// Escapes `name` for embedding in a single-quoted query literal.
///
/// Every `'` is prefixed with a backslash. Nothing else needs escaping in the
/// Drive query dialect.
pub fn escape(name: &str) -> String {
    let mut escaped = String::with_capacity(name.len());
    for c in name.chars() {
        if c == '\'' {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Literal {
    Str(String),
    Bool(bool),
}

impl From<&str> for Literal {
    fn from(value: &str) -> Self {
        Literal::Str(value.to_string())
    }
}

impl From<String> for Literal {
    fn from(value: String) -> Self {
        Literal::Str(value)
    }
}

impl From<bool> for Literal {
    fn from(value: bool) -> Self {
        Literal::Bool(value)
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Str(s) => write!(f, "'{}'", escape(s)),
            Literal::Bool(b) => write!(f, "{b}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Predicate {
    FieldEq(&'static str, Literal),
    InParents(Literal),
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::FieldEq(field, value) => write!(f, "{field} = {value}"),
            Predicate::InParents(id) => write!(f, "{id} in parents"),
        }
    }
}

/// A conjunction of predicates, rendered with [`fmt::Display`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    preds: Vec<Predicate>,
}

impl Query {
    pub fn name_eq(name: &str) -> Self {
        Self::field_eq("name", name)
    }

    pub fn in_parents(parent_id: &Id) -> Self {
        Query {
            preds: vec![Predicate::InParents(parent_id.as_str().into())],
        }
    }

    pub fn field_eq<L: Into<Literal>>(field: &'static str, value: L) -> Self {
        Query {
            preds: vec![Predicate::FieldEq(field, value.into())],
        }
    }

    pub fn and(mut self, other: Query) -> Self {
        self.preds.extend(other.preds);
        self
    }

    /// `name = '<name>'`, further restricted to children of `parent_id` if any.
    pub fn name_under(name: &str, parent_id: Option<&Id>) -> Self {
        let q = Self::name_eq(name);
        match parent_id {
            Some(parent_id) => q.and(Self::in_parents(parent_id)),
            None => q,
        }
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, pred) in self.preds.iter().enumerate() {
            if i > 0 {
                f.write_str(" and ")?;
            }
            pred.fmt(f)?;
        }
        Ok(())
    }
}
