//! A labeled tree container mirroring the shape of a formula
//!
//! One-sided formulas are a [`Structured::Root`], two-sided formulas are
//! [`Structured::Named`] with `lhs` and `rhs` parts, and a list of formulas is
//! a [`Structured::Sequence`]. Every stage downstream of the parser (terms,
//! matrices, model specs) reuses the same shape via [`Structured::map`].

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::formula::error::{FormulaError, FormulaResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Structured<T> {
    Root(T),
    Sequence(Vec<Structured<T>>),
    Named(IndexMap<String, Structured<T>>),
}

impl<T> Structured<T> {
    /// Two-sided structure with `lhs` and `rhs` leaves
    pub fn two_sided(lhs: T, rhs: T) -> Self {
        let mut parts = IndexMap::new();
        parts.insert("lhs".to_string(), Structured::Root(lhs));
        parts.insert("rhs".to_string(), Structured::Root(rhs));
        Structured::Named(parts)
    }

    /// Apply `f` to every leaf, keeping the shape
    pub fn map<U, F>(self, mut f: F) -> Structured<U>
    where
        F: FnMut(T) -> U,
    {
        self.map_inner(&mut f)
    }

    fn map_inner<U, F>(self, f: &mut F) -> Structured<U>
    where
        F: FnMut(T) -> U,
    {
        match self {
            Structured::Root(value) => Structured::Root(f(value)),
            Structured::Sequence(items) => {
                Structured::Sequence(items.into_iter().map(|item| item.map_inner(f)).collect())
            }
            Structured::Named(parts) => Structured::Named(
                parts
                    .into_iter()
                    .map(|(key, item)| (key, item.map_inner(f)))
                    .collect(),
            ),
        }
    }

    /// Fallible [`Structured::map`]; stops at the first error
    pub fn try_map<U, E, F>(self, mut f: F) -> Result<Structured<U>, E>
    where
        F: FnMut(T) -> Result<U, E>,
    {
        self.try_map_inner(&mut f)
    }

    fn try_map_inner<U, E, F>(self, f: &mut F) -> Result<Structured<U>, E>
    where
        F: FnMut(T) -> Result<U, E>,
    {
        Ok(match self {
            Structured::Root(value) => Structured::Root(f(value)?),
            Structured::Sequence(items) => Structured::Sequence(
                items
                    .into_iter()
                    .map(|item| item.try_map_inner(f))
                    .collect::<Result<_, E>>()?,
            ),
            Structured::Named(parts) => Structured::Named(
                parts
                    .into_iter()
                    .map(|(key, item)| item.try_map_inner(f).map(|v| (key, v)))
                    .collect::<Result<_, E>>()?,
            ),
        })
    }

    /// Borrowing view with the same shape
    pub fn as_ref(&self) -> Structured<&T> {
        match self {
            Structured::Root(value) => Structured::Root(value),
            Structured::Sequence(items) => {
                Structured::Sequence(items.iter().map(Structured::as_ref).collect())
            }
            Structured::Named(parts) => Structured::Named(
                parts
                    .iter()
                    .map(|(key, item)| (key.clone(), item.as_ref()))
                    .collect(),
            ),
        }
    }

    /// Leaves in depth-first order
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        let mut leaves = Vec::new();
        self.collect_leaves(&mut leaves);
        leaves.into_iter()
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a T>) {
        match self {
            Structured::Root(value) => out.push(value),
            Structured::Sequence(items) => items.iter().for_each(|i| i.collect_leaves(out)),
            Structured::Named(parts) => parts.values().for_each(|i| i.collect_leaves(out)),
        }
    }

    /// Number of leaves
    pub fn len(&self) -> usize {
        match self {
            Structured::Root(_) => 1,
            Structured::Sequence(items) => items.iter().map(Structured::len).sum(),
            Structured::Named(parts) => parts.values().map(Structured::len).sum(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Part names of a named structure
    pub fn keys(&self) -> Vec<&str> {
        match self {
            Structured::Named(parts) => parts.keys().map(String::as_str).collect(),
            _ => Vec::new(),
        }
    }

    /// Named part, or `None` for other shapes
    pub fn get(&self, key: &str) -> Option<&Structured<T>> {
        match self {
            Structured::Named(parts) => parts.get(key),
            _ => None,
        }
    }

    /// Named part, failing with the available names
    pub fn part(&self, key: &str) -> FormulaResult<&Structured<T>> {
        self.get(key).ok_or_else(|| FormulaError::MissingPart {
            key: key.to_string(),
            available: self.keys().into_iter().map(String::from).collect(),
        })
    }

    /// Positional element of a sequence
    pub fn at(&self, index: usize) -> Option<&Structured<T>> {
        match self {
            Structured::Sequence(items) => items.get(index),
            _ => None,
        }
    }

    pub fn root(&self) -> Option<&T> {
        match self {
            Structured::Root(value) => Some(value),
            _ => None,
        }
    }

    pub fn into_root(self) -> Option<T> {
        match self {
            Structured::Root(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_root(&self) -> bool {
        matches!(self, Structured::Root(_))
    }
}

impl<T: fmt::Display> fmt::Display for Structured<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Structured::Root(value) => write!(f, "{}", value),
            Structured::Sequence(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
            Structured::Named(parts) => {
                f.write_str("{")?;
                for (i, (key, item)) in parts.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: {}", key, item)?;
                }
                f.write_str("}")
            }
        }
    }
}
