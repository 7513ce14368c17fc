//! Top-k sampling across beams.
//!
//! Beam 0 is always greedy. Other beams take the greedy choice for their first token and
//! sample from the truncated distribution afterwards. All draws come from one seeded stream,
//! consumed in ascending beam order, so a run is reproducible from its seed.

use std::cmp::Ordering;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::inference::logits::LogitsBatch;

/// The `k` best (token id, raw score) pairs of one row, best first.
#[derive(Debug, Clone, PartialEq)]
pub struct TopKResult {
    pub token_ids: Vec<u32>,
    pub scores: Vec<f32>,
}

/// Token chosen for one beam at one step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleOutcome {
    pub token_id: u32,
    /// Natural-log probability under the truncated distribution
    pub log_prob: f32,
}

/// Select the `k` highest-scoring entries of a row.
///
/// Uses a stable sort, so equal scores keep ascending token-id order. NaN sorts last.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn top_k(row: &[f32], k: usize) -> TopKResult {
    let mut indexed = row.iter().copied().enumerate().collect::<Vec<_>>();
    indexed.sort_by(|a, b| descending(a.1, b.1));
    indexed.truncate(k.min(row.len()));
    let (token_ids, scores) = indexed
        .into_iter()
        .map(|(idx, score)| (idx as u32, score))
        .unzip();
    TopKResult { token_ids, scores }
}

fn descending(a: f32, b: f32) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => b.partial_cmp(&a).unwrap_or(Ordering::Equal),
    }
}

/// Probabilities over a truncated candidate row, such as [`TopKResult::scores`].
///
/// Scores are shifted by the best finite candidate before exponentiation. `+inf`
/// candidates split the whole mass between them, while `-inf` and NaN candidates get none.
/// Returns all zeros when no candidate is selectable.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn softmax(scores: &[f32]) -> Vec<f32> {
    let saturated = scores.iter().filter(|v| is_pos_inf(**v)).count();
    if saturated > 0 {
        let share = 1.0 / saturated as f32;
        return scores
            .iter()
            .map(|&v| if is_pos_inf(v) { share } else { 0.0 })
            .collect();
    }

    let Some(best) = scores
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .reduce(f32::max)
    else {
        return vec![0.0; scores.len()];
    };

    // The best candidate contributes exp(0) = 1, so the total is never zero.
    let weights = scores
        .iter()
        .map(|&v| if v.is_finite() { (v - best).exp() } else { 0.0 })
        .collect::<Vec<_>>();
    let total: f32 = weights.iter().sum();
    weights.into_iter().map(|w| w / total).collect()
}

fn is_pos_inf(v: f32) -> bool {
    v.is_infinite() && v.is_sign_positive()
}

/// First index whose running cumulative probability exceeds `draw`, else 0.
#[must_use]
pub fn select_cumulative(probs: &[f32], draw: f32) -> usize {
    let mut cum = 0.0_f32;
    for (idx, &p) in probs.iter().enumerate() {
        cum += p;
        if cum > draw {
            return idx;
        }
    }
    tracing::warn!(draw, "cumulative probability never exceeded draw; using top candidate");
    0
}

/// Seeded top-k sampler owned by a single generation run.
#[derive(Debug, Clone)]
pub struct TopKSampler {
    top_k: usize,
    rng: StdRng,
}

impl TopKSampler {
    /// `top_k == 0` keeps the whole vocabulary.
    #[must_use]
    pub fn new(top_k: usize, seed: u64) -> Self {
        Self {
            top_k,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Truncation size for a vocabulary of `vocab_size`.
    #[must_use]
    pub fn k_for(&self, vocab_size: usize) -> usize {
        if self.top_k == 0 {
            vocab_size
        } else {
            self.top_k.min(vocab_size)
        }
    }

    /// Choose one token per beam.
    ///
    /// `histories[i]` is beam `i`'s token history before this step. Callers must pass at
    /// least one beam and a non-empty vocabulary.
    pub fn sample<H: AsRef<[u32]>>(
        &mut self,
        logits: &LogitsBatch,
        histories: &[H],
    ) -> Vec<SampleOutcome> {
        let k = self.k_for(logits.vocab_size());
        let mut outcomes = Vec::with_capacity(logits.num_beams());

        for (beam, row) in logits.rows().enumerate() {
            let candidates = top_k(row, k);
            let probs = softmax(&candidates.scores);
            if probs.iter().all(|p| *p == 0.0) {
                tracing::warn!(beam, "no finite score in truncated row; falling back to top candidate");
            }

            let greedy = beam == 0
                || histories
                    .get(beam)
                    .is_none_or(|history| history.as_ref().is_empty());
            let choice = if greedy {
                0
            } else {
                let draw: f32 = self.rng.r#gen();
                select_cumulative(&probs, draw)
            };

            outcomes.push(SampleOutcome {
                token_id: candidates.token_ids[choice],
                log_prob: probs[choice].ln(),
            });
        }

        outcomes
    }
}
