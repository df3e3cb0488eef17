//! Batch selection mixing uncertainty sampling with a class-balance pass.

use std::cmp::Reverse;

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use crate::ml::argmax;

/// What to do with candidates predicted as the rarest class in the second pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RareClassHandling {
    /// Set them aside; the pass looks for rows of other classes leaning towards it.
    #[default]
    Exclude,
    /// Keep them, so confident members of the rarest class rank first.
    Include,
}

/// Picks the next rows to show the human.
///
/// Half the batch (rounded up) is the globally least confident rows. The rest are
/// the rows with the highest probability for the class predicted least often
/// across all candidates, counting classes up to the highest one predicted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionPolicy {
    pub rare_class: RareClassHandling,
}

struct Candidate<'a> {
    confidence: f64,
    predicted: usize,
    identifier: &'a str,
    probabilities: &'a [f64],
}

impl Candidate<'_> {
    fn probability_of(&self, class: usize) -> f64 {
        self.probabilities.get(class).copied().unwrap_or(0.0)
    }
}

/// Number of rows taken purely by uncertainty for a batch.
pub fn uncertain_count(batch_size: usize) -> usize {
    batch_size.div_ceil(2)
}

impl SelectionPolicy {
    pub fn new(rare_class: RareClassHandling) -> Self {
        Self { rare_class }
    }

    /// Select up to `batch_size` distinct identifiers, uncertain rows first.
    ///
    /// `probabilities[i]` belongs to `identifiers[i]`; extra entries in the longer
    /// slice are ignored. Returns every candidate when fewer than `batch_size` exist.
    pub fn select<P, S>(&self, probabilities: &[P], identifiers: &[S], batch_size: usize) -> Vec<String>
    where
        P: AsRef<[f64]>,
        S: AsRef<str>,
    {
        let mut candidates: Vec<Candidate<'_>> = probabilities
            .iter()
            .zip(identifiers)
            .map(|(probs, identifier)| {
                let probs = probs.as_ref();
                let predicted = argmax(probs);
                Candidate {
                    confidence: probs.get(predicted).copied().unwrap_or(0.0),
                    predicted,
                    identifier: identifier.as_ref(),
                    probabilities: probs,
                }
            })
            .collect();
        let target = batch_size.min(candidates.len());
        if target == 0 {
            return Vec::new();
        }
        candidates.sort_by_key(|c| (OrderedFloat(c.confidence), c.predicted, c.identifier));

        let num_uncertain = uncertain_count(batch_size).min(candidates.len());
        let num_balanced = batch_size - uncertain_count(batch_size);
        let rarest = rarest_predicted_class(&candidates);
        let (uncertain, rest) = candidates.split_at(num_uncertain);
        let (mut kept, set_aside): (Vec<&Candidate<'_>>, Vec<&Candidate<'_>>) =
            rest.iter().partition(|c| {
                self.rare_class == RareClassHandling::Include || c.predicted != rarest
            });
        kept.sort_by_key(|c| Reverse(OrderedFloat(c.probability_of(rarest))));

        let mut selected: Vec<String> = uncertain
            .iter()
            .map(|c| c.identifier.to_string())
            .collect();
        selected.extend(kept.iter().take(num_balanced).map(|c| c.identifier.to_string()));
        // Exclusion can leave too few rows; top up with the least confident of the rest.
        if selected.len() < target {
            let missing = target - selected.len();
            selected.extend(set_aside.iter().take(missing).map(|c| c.identifier.to_string()));
        }
        selected
    }
}

/// Lowest class index with the fewest predictions.
///
/// Counts span classes `0..=max(predicted)`: a gap below the highest predicted class
/// counts 0, classes above it are not counted at all.
fn rarest_predicted_class(candidates: &[Candidate<'_>]) -> usize {
    let width = candidates.iter().map(|c| c.predicted + 1).max().unwrap_or(0);
    let mut counts = vec![0usize; width];
    for candidate in candidates {
        counts[candidate.predicted] += 1;
    }
    counts
        .iter()
        .enumerate()
        .min_by_key(|&(_, &count)| count)
        .map(|(class, _)| class)
        .unwrap_or(0)
}
