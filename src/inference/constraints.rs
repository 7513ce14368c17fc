//! Logits constraint pipeline.
//!
//! Each rule rewrites one beam's score row given that beam's token history. Rules run in
//! the order the caller lists them, in place, beam by beam.

use crate::inference::config::GenerationConfig;
use crate::inference::logits::LogitsBatch;

/// A single score-mutating rule.
#[derive(Debug, Clone, PartialEq)]
pub enum LogitsConstraint {
    /// On an empty history, only `token_id` is allowed (and scored 0.0).
    StartToken { token_id: u32 },
    /// On a history of length 1, only `token_id` is allowed.
    ForcedBos { token_id: u32 },
    /// Suppress `eos_token_id` while the history is shorter than `min_length`.
    MinLength { min_length: usize, eos_token_id: u32 },
    /// Suppress tokens that would complete an n-gram already in the history.
    NoRepeatNgram { size: usize },
    /// Only `eos_token_id` is allowed once the history reaches `max_length - 1`.
    ForcedEos { max_length: usize, eos_token_id: u32 },
    /// Divide every score by `temperature`.
    Temperature { temperature: f32 },
}

impl LogitsConstraint {
    /// Apply the rule to one row.
    #[allow(clippy::float_cmp)]
    pub fn apply(&self, history: &[u32], row: &mut [f32]) {
        match *self {
            Self::StartToken { token_id } => {
                if history.is_empty() {
                    force_single(row, token_id);
                }
            }
            Self::ForcedBos { token_id } => {
                if history.len() == 1 {
                    force_single(row, token_id);
                }
            }
            Self::MinLength {
                min_length,
                eos_token_id,
            } => {
                if history.len() < min_length {
                    suppress(row, eos_token_id);
                }
            }
            Self::NoRepeatNgram { size } => {
                for token in banned_ngram_tokens(history, size) {
                    suppress(row, token);
                }
            }
            Self::ForcedEos {
                max_length,
                eos_token_id,
            } => {
                if max_length > 0 && history.len() + 1 == max_length {
                    force_single(row, eos_token_id);
                }
            }
            Self::Temperature { temperature } => {
                if temperature > 0.0 && temperature != 1.0 {
                    for v in row.iter_mut() {
                        *v /= temperature;
                    }
                }
            }
        }
    }
}

/// Ordered list of rules applied to every beam.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConstraintPipeline {
    rules: Vec<LogitsConstraint>,
}

impl ConstraintPipeline {
    #[must_use]
    pub fn new(rules: Vec<LogitsConstraint>) -> Self {
        Self { rules }
    }

    /// Standard rule order for a generation config.
    ///
    /// Score-shaping rules run first and the forced-token rules last, so a forced position
    /// is never emptied by a later suppression (the decoder start token is usually EOS).
    /// Rules whose parameters disable them (n-gram size 0, temperature 1.0, ...) are left out.
    #[must_use]
    pub fn from_config(cfg: &GenerationConfig) -> Self {
        let mut rules = Vec::new();
        #[allow(clippy::float_cmp)]
        if cfg.temperature > 0.0 && cfg.temperature != 1.0 {
            rules.push(LogitsConstraint::Temperature {
                temperature: cfg.temperature,
            });
        }
        if cfg.min_length > 0 {
            rules.push(LogitsConstraint::MinLength {
                min_length: cfg.min_length,
                eos_token_id: cfg.eos_token_id,
            });
        }
        if cfg.no_repeat_ngram_size > 0 {
            rules.push(LogitsConstraint::NoRepeatNgram {
                size: cfg.no_repeat_ngram_size,
            });
        }
        rules.push(LogitsConstraint::StartToken {
            token_id: cfg.decoder_start_token_id,
        });
        if let Some(token_id) = cfg.forced_bos_token_id {
            rules.push(LogitsConstraint::ForcedBos { token_id });
        }
        // Forced EOS lands at position max_length - 1 and must not undercut min_length.
        if cfg.forced_eos && cfg.max_length > cfg.min_length {
            rules.push(LogitsConstraint::ForcedEos {
                max_length: cfg.max_length,
                eos_token_id: cfg.eos_token_id,
            });
        }
        Self { rules }
    }

    #[must_use]
    pub fn rules(&self) -> &[LogitsConstraint] {
        &self.rules
    }

    pub fn push(&mut self, rule: LogitsConstraint) {
        self.rules.push(rule);
    }

    /// Apply every rule, in order, to every beam's row.
    ///
    /// `histories[i]` is the token history of beam `i`; extra rows or histories are ignored.
    pub fn apply<H: AsRef<[u32]>>(&self, histories: &[H], logits: &mut LogitsBatch) {
        for (history, row) in histories.iter().zip(logits.rows_mut()) {
            for rule in &self.rules {
                rule.apply(history.as_ref(), row);
            }
        }
    }
}

fn suppress(row: &mut [f32], token_id: u32) {
    if let Some(v) = row.get_mut(token_id as usize) {
        *v = f32::NEG_INFINITY;
    }
}

#[allow(clippy::cast_possible_truncation)]
fn force_single(row: &mut [f32], token_id: u32) {
    for (idx, v) in row.iter_mut().enumerate() {
        *v = if idx as u32 == token_id {
            0.0
        } else {
            f32::NEG_INFINITY
        };
    }
}

/// Tokens that would repeat an existing `size`-gram if appended to `history`.
#[must_use]
pub fn banned_ngram_tokens(history: &[u32], size: usize) -> Vec<u32> {
    if size == 0 || history.len() + 1 < size {
        return Vec::new();
    }
    let prefix = &history[history.len() + 1 - size..];
    let mut banned = history
        .windows(size)
        .filter(|w| &w[..size - 1] == prefix)
        .map(|w| w[size - 1])
        .collect::<Vec<_>>();
    banned.sort_unstable();
    banned.dedup();
    banned
}
