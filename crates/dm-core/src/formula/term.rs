//! Scoped factors and terms
//!
//! A term is a product of factors. Terms carry two views of their factors:
//! the positional one (the order the factors were written in, which drives
//! column naming) and a canonical one (sorted expressions) that defines
//! identity.

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::formula::factor::Factor;

/// A factor as it appears inside one particular term
///
/// `reduced` requests reduced-rank encoding for this occurrence only.
/// Equality and hashing ignore it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScopedFactor {
    pub factor: Factor,
    #[serde(default)]
    pub reduced: bool,
}

impl ScopedFactor {
    pub fn new(factor: Factor, reduced: bool) -> Self {
        Self { factor, reduced }
    }

    pub fn expr(&self) -> &str {
        &self.factor.expr
    }

    /// Identity including the rank flag
    pub fn rank_key(&self) -> (&str, bool) {
        (&self.factor.expr, self.reduced)
    }

    pub fn to_full_rank(&self) -> Self {
        Self::new(self.factor.clone(), false)
    }

    pub fn to_reduced(&self) -> Self {
        Self::new(self.factor.clone(), true)
    }
}

impl From<Factor> for ScopedFactor {
    fn from(factor: Factor) -> Self {
        Self::new(factor, false)
    }
}

impl PartialEq for ScopedFactor {
    fn eq(&self, other: &Self) -> bool {
        self.factor == other.factor
    }
}

impl Eq for ScopedFactor {}

impl Hash for ScopedFactor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.factor.hash(state);
    }
}

impl fmt::Display for ScopedFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.factor, if self.reduced { "-" } else { "" })
    }
}

/// A product of scoped factors with a multiplier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScopedTerm {
    pub factors: Vec<ScopedFactor>,
    #[serde(default = "default_scale")]
    pub scale: f64,
}

fn default_scale() -> f64 {
    1.0
}

impl ScopedTerm {
    /// Build a term, dropping repeated factors (first occurrence wins)
    pub fn new<I>(factors: I) -> Self
    where
        I: IntoIterator<Item = ScopedFactor>,
    {
        Self::with_scale(factors, 1.0)
    }

    pub fn with_scale<I>(factors: I, scale: f64) -> Self
    where
        I: IntoIterator<Item = ScopedFactor>,
    {
        let mut unique: Vec<ScopedFactor> = Vec::new();
        for factor in factors {
            if !unique.contains(&factor) {
                unique.push(factor);
            }
        }
        Self {
            factors: unique,
            scale,
        }
    }

    /// Term made of unscoped factors
    pub fn from_factors<I>(factors: I) -> Self
    where
        I: IntoIterator<Item = Factor>,
    {
        Self::new(factors.into_iter().map(ScopedFactor::from))
    }

    /// The intercept term, `1`
    pub fn intercept() -> Self {
        Self::from_factors([Factor::literal("1")])
    }

    /// Whether the term consists of the single literal `value`
    pub fn is_literal(&self, value: &str) -> bool {
        self.factors.len() == 1 && self.factors[0].factor.is_literal(value)
    }

    pub fn is_intercept(&self) -> bool {
        self.is_literal("1")
    }

    /// Number of factors
    pub fn degree(&self) -> usize {
        self.factors.len()
    }

    /// Sorted factor expressions; the identity of the term
    pub fn canonical_key(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.factors.iter().map(|f| f.expr()).collect();
        keys.sort_unstable();
        keys
    }

    /// Name of the term without scale or rank markers, e.g. `a:b`
    pub fn label(&self) -> String {
        if self.factors.is_empty() {
            return "1".to_string();
        }
        self.factors
            .iter()
            .map(|f| f.expr())
            .collect::<Vec<_>>()
            .join(":")
    }

    /// Iterate over the unscoped factors
    pub fn iter_factors(&self) -> impl Iterator<Item = &Factor> {
        self.factors.iter().map(|f| &f.factor)
    }

    /// Whether the term contains `factor`
    pub fn contains(&self, factor: &Factor) -> bool {
        self.iter_factors().any(|f| f == factor)
    }
}

impl PartialEq for ScopedTerm {
    fn eq(&self, other: &Self) -> bool {
        self.canonical_key() == other.canonical_key()
    }
}

impl Eq for ScopedTerm {}

impl Hash for ScopedTerm {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.canonical_key().hash(state);
    }
}

impl fmt::Display for ScopedTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.scale != 1.0 {
            write!(f, "{}*", self.scale)?;
        }
        if self.factors.is_empty() {
            return f.write_str("1");
        }
        for (i, factor) in self.factors.iter().enumerate() {
            if i > 0 {
                f.write_str(":")?;
            }
            write!(f, "{}", factor)?;
        }
        Ok(())
    }
}
