//! Rank planning: which factors of which terms are encoded at reduced rank
//!
//! A factor whose columns sum to a constant (a categorical, for example)
//! "spans the intercept". Encoding every such factor at full rank yields
//! linearly dependent columns, so before anything is encoded the whole term
//! list is analysed once:
//!
//! 1. Each term is expanded into the subspaces it spans. A spanning factor
//!    `X` contributes either its contrasts (`X-`) or nothing; any other
//!    factor is always present. Constant factors fold into the scale.
//! 2. Subspaces already spanned by earlier terms are removed.
//! 3. What remains is simplified: a candidate that extends an existing
//!    scoped term by a single reduced factor is merged into it, with that
//!    factor promoted to full rank.
//!
//! The result, a [`RankPlan`], is consumed read-only by encoding and
//! recorded in the model spec so that replays skip this analysis.

use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;
use log::debug;

use dm_core::formula::{FactorKind, ScopedFactor, ScopedTerm};

use super::values::{EvaluatedFactor, Value};
use crate::config::ClusterBy;
use crate::error::{MaterializeError, Result};

/// Factor position within its term, and whether it is reduced
type Slot = (usize, bool);

/// A scoped term whose factors carry their evaluated values
#[derive(Debug, Clone)]
pub struct EvaluatedScopedTerm<'f> {
    pub factors: Vec<(&'f EvaluatedFactor, bool)>,
    pub scale: f64,
}

impl<'f> EvaluatedScopedTerm<'f> {
    /// Attach evaluated values to the factors of `term`
    pub fn resolve(term: &ScopedTerm, factors: &'f HashMap<String, EvaluatedFactor>) -> Result<Self> {
        let factors = term
            .factors
            .iter()
            .map(|sf| lookup(factors, sf.expr()).map(|ef| (ef, sf.reduced)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            factors,
            scale: term.scale,
        })
    }

    /// The scoped term without values; factor kinds are those declared in
    /// the formula
    pub fn copy_without_values(&self) -> ScopedTerm {
        ScopedTerm::with_scale(
            self.factors
                .iter()
                .map(|(ef, reduced)| ScopedFactor::new(ef.factor.clone(), *reduced)),
            self.scale,
        )
    }
}

/// For each term, the scoped terms it is encoded as
#[derive(Debug, Clone, Default)]
pub struct RankPlan {
    entries: Vec<(ScopedTerm, Vec<ScopedTerm>)>,
}

impl RankPlan {
    /// Analyse `terms` in order
    pub fn build(
        terms: &[ScopedTerm],
        factors: &HashMap<String, EvaluatedFactor>,
        ensure_full_rank: bool,
    ) -> Result<Self> {
        let mut spanned: HashSet<Vec<(String, bool)>> = HashSet::new();
        let mut entries = Vec::with_capacity(terms.len());

        for term in terms {
            let evaluated = term
                .factors
                .iter()
                .map(|sf| lookup(factors, sf.expr()))
                .collect::<Result<Vec<_>>>()?;

            let mut scale = term.scale;
            let mut options: Vec<Vec<Option<Slot>>> = Vec::new();
            for (pos, ef) in evaluated.iter().enumerate() {
                if ef.kind() == FactorKind::Constant {
                    scale *= constant_value(ef)?;
                } else if ensure_full_rank && ef.values.metadata.spans_intercept {
                    options.push(vec![Some((pos, true)), None]);
                } else {
                    options.push(vec![Some((pos, false))]);
                }
            }

            let mut candidates = product(&options);
            if ensure_full_rank {
                let key = |slots: &[Slot]| -> Vec<(String, bool)> {
                    let mut key: Vec<(String, bool)> = slots
                        .iter()
                        .map(|&(pos, reduced)| (evaluated[pos].expr().to_string(), reduced))
                        .collect();
                    key.sort_unstable();
                    key
                };
                candidates.retain(|slots| !spanned.contains(&key(slots.as_slice())));
                spanned.extend(candidates.iter().map(|slots| key(slots.as_slice())));
                candidates = simplify(candidates);
            }

            let scoped_terms: Vec<ScopedTerm> = candidates
                .into_iter()
                .map(|mut slots| {
                    slots.sort_by_key(|&(pos, _)| pos);
                    EvaluatedScopedTerm {
                        factors: slots
                            .into_iter()
                            .map(|(pos, reduced)| (evaluated[pos], reduced || term.factors[pos].reduced))
                            .collect(),
                        scale,
                    }
                    .copy_without_values()
                })
                .collect();

            debug!(
                "rank plan for `{}`: [{}]",
                term.label(),
                scoped_terms
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            entries.push((term.clone(), scoped_terms));
        }

        Ok(Self { entries })
    }

    /// A plan recorded earlier
    pub fn from_entries(entries: Vec<(ScopedTerm, Vec<ScopedTerm>)>) -> Self {
        Self { entries }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ScopedTerm, &[ScopedTerm])> {
        self.entries
            .iter()
            .map(|(term, scoped)| (term, scoped.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether `factor` is encoded at reduced rank in any scoped term of `term`
    pub fn is_reduced(&self, term: &ScopedTerm, factor: &str) -> Option<bool> {
        let (_, scoped) = self.entries.iter().find(|(t, _)| t == term)?;
        let flags: Vec<bool> = scoped
            .iter()
            .flat_map(|st| st.factors.iter())
            .filter(|sf| sf.expr() == factor)
            .map(|sf| sf.reduced)
            .collect();
        (!flags.is_empty()).then(|| flags.into_iter().any(|reduced| reduced))
    }
}

/// Group terms by their numerical factors, keeping first-seen group order
pub fn cluster_terms(
    terms: &[ScopedTerm],
    cluster_by: ClusterBy,
    factors: &HashMap<String, EvaluatedFactor>,
) -> Vec<ScopedTerm> {
    if cluster_by == ClusterBy::None {
        return terms.to_vec();
    }

    let mut clusters: IndexMap<Vec<&str>, Vec<ScopedTerm>> = IndexMap::new();
    for term in terms {
        let key: Vec<&str> = term
            .factors
            .iter()
            .map(|sf| sf.expr())
            .filter(|expr| {
                factors
                    .get(*expr)
                    .is_some_and(|ef| ef.kind() == FactorKind::Numerical)
            })
            .collect();
        clusters.entry(key).or_default().push(term.clone());
    }
    clusters.into_values().flatten().collect()
}

fn lookup<'f>(factors: &'f HashMap<String, EvaluatedFactor>, expr: &str) -> Result<&'f EvaluatedFactor> {
    factors.get(expr).ok_or_else(|| {
        MaterializeError::materialization(format!(
            "Factor `{}` must be evaluated before its rank can be planned.",
            expr
        ))
    })
}

fn constant_value(factor: &EvaluatedFactor) -> Result<f64> {
    match factor.values.value {
        Value::Scalar(v) => Ok(v),
        _ => Err(MaterializeError::encoding(
            factor.expr(),
            format!("Constant factor `{}` did not evaluate to a single number.", factor.expr()),
        )),
    }
}

/// Cartesian product of the options, last factor varying fastest
fn product(options: &[Vec<Option<Slot>>]) -> Vec<Vec<Slot>> {
    let mut combinations: Vec<Vec<Slot>> = vec![Vec::new()];
    for choices in options {
        combinations = combinations
            .iter()
            .flat_map(|prefix| {
                choices.iter().map(move |choice| {
                    let mut combination = prefix.clone();
                    combination.extend(choice);
                    combination
                })
            })
            .collect();
    }
    combinations
}

fn simplify(mut candidates: Vec<Vec<Slot>>) -> Vec<Vec<Slot>> {
    candidates.sort_by_key(Vec::len);

    let mut terms: Vec<Vec<Slot>> = Vec::with_capacity(candidates.len());
    'candidates: for candidate in candidates {
        for existing in terms.iter_mut() {
            if candidate.len() != existing.len() + 1 {
                continue;
            }
            let extra: Vec<Slot> = candidate
                .iter()
                .filter(|slot| !existing.contains(slot))
                .copied()
                .collect();
            if let [(pos, true)] = extra[..] {
                existing.push((pos, false));
                continue 'candidates;
            }
        }
        terms.push(candidate);
    }

    terms.sort_by_key(Vec::len);
    terms
}
