use serde::{Deserialize, Serialize};

use crate::error::{DecodeError, Result};

/// When a beam-search run may end before `max_length`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EarlyStopping {
    /// Ignore completion and always run to `max_length`.
    None,
    /// Stop once the best finished beam can no longer be beaten.
    #[default]
    BestBeam,
    /// Stop once this many beams have finished.
    BeamCount(usize),
}

/// Per-run generation settings.
///
/// Defaults match the grounding model's published generation config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// EOS is suppressed while a beam is shorter than this
    pub min_length: usize,
    /// Hard cap on tokens per beam, forced prefix included
    pub max_length: usize,
    /// Number of beams decoded in lock-step
    pub num_beams: usize,
    /// Truncation size for sampling (0 = whole vocabulary)
    pub top_k: usize,
    /// Nucleus threshold, carried but not used by the sampler
    pub top_p: f32,
    /// Logit temperature (<= 0 or 1.0 disables scaling)
    pub temperature: f32,
    /// Size of n-grams that may not repeat (0 = disabled)
    pub no_repeat_ngram_size: usize,
    /// Exponent of the length normalisation
    pub length_penalty: f32,
    pub early_stopping: EarlyStopping,
    /// Diversity window, carried but not used by the sampler
    pub diversity_length: usize,
    pub seed: u64,

    /// Token every beam starts with
    pub decoder_start_token_id: u32,
    /// Token forced at position 1, if any
    pub forced_bos_token_id: Option<u32>,
    pub eos_token_id: u32,
    /// Token appended to finished beams to keep lock-step lengths
    pub pad_token_id: u32,
    /// Force EOS as the last token when `max_length` is reached
    pub forced_eos: bool,
    /// Leading structural tokens ignored by EOS detection
    pub prefix_length: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            min_length: 1,
            max_length: 1024,
            num_beams: 3,
            top_k: 50,
            top_p: 0.9,
            temperature: 1.0,
            no_repeat_ngram_size: 3,
            length_penalty: 1.0,
            early_stopping: EarlyStopping::BestBeam,
            diversity_length: 20,
            seed: 42,
            decoder_start_token_id: 2,
            forced_bos_token_id: Some(0),
            eos_token_id: 2,
            pad_token_id: 1,
            forced_eos: true,
            prefix_length: 2,
        }
    }
}

impl GenerationConfig {
    /// Reject configurations that cannot drive a run.
    ///
    /// # Errors
    /// Returns [`DecodeError::InvalidConfig`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.num_beams == 0 {
            return Err(DecodeError::InvalidConfig(
                "num_beams must be at least 1".into(),
            ));
        }
        if self.max_length == 0 {
            return Err(DecodeError::InvalidConfig(
                "max_length must be positive".into(),
            ));
        }
        if self.min_length > self.max_length {
            return Err(DecodeError::InvalidConfig(format!(
                "min_length ({}) exceeds max_length ({})",
                self.min_length, self.max_length
            )));
        }
        if !self.length_penalty.is_finite() {
            return Err(DecodeError::InvalidConfig(
                "length_penalty must be finite".into(),
            ));
        }
        if self.temperature.is_nan() {
            return Err(DecodeError::InvalidConfig("temperature is NaN".into()));
        }
        if let EarlyStopping::BeamCount(count) = self.early_stopping
            && (count == 0 || count > self.num_beams)
        {
            return Err(DecodeError::InvalidConfig(format!(
                "early stopping beam count {count} must be in 1..={}",
                self.num_beams
            )));
        }
        Ok(())
    }

    /// Validate `top_k` against a concrete vocabulary size.
    ///
    /// # Errors
    /// Returns [`DecodeError::EmptyVocabulary`] for an empty vocabulary.
    pub fn effective_top_k(&self, vocab_size: usize) -> Result<usize> {
        if vocab_size == 0 {
            return Err(DecodeError::EmptyVocabulary);
        }
        Ok(if self.top_k == 0 {
            vocab_size
        } else {
            self.top_k.min(vocab_size)
        })
    }
}
