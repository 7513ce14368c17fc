//! Beam bookkeeping and stopping policy.

use serde::Serialize;

use crate::inference::config::{EarlyStopping, GenerationConfig};
use crate::inference::sampling::SampleOutcome;

/// Decides whether a beam's history marks it finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoppingCriterion {
    /// EOS anywhere after the first `skip` tokens.
    EndOfSequence { eos_token_id: u32, skip: usize },
    /// History ends with this token sequence.
    StopSequence(Vec<u32>),
}

impl StoppingCriterion {
    #[must_use]
    pub fn is_complete(&self, history: &[u32]) -> bool {
        match self {
            Self::EndOfSequence { eos_token_id, skip } => history
                .iter()
                .skip(*skip)
                .any(|token| token == eos_token_id),
            Self::StopSequence(sequence) => !sequence.is_empty() && history.ends_with(sequence),
        }
    }
}

/// One candidate sequence.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Beam {
    pub index: usize,
    tokens: Vec<u32>,
    /// Cumulative natural-log probability
    pub log_prob: f32,
    completed: bool,
    /// Token count at completion; later tokens are padding.
    length: usize,
}

impl Beam {
    #[must_use]
    pub fn new(index: usize) -> Self {
        Self {
            index,
            tokens: Vec::new(),
            log_prob: 0.0,
            completed: false,
            length: 0,
        }
    }

    /// Full history including padding added after completion.
    #[must_use]
    pub fn tokens(&self) -> &[u32] {
        &self.tokens
    }

    /// History up to and including the token that completed the beam.
    #[must_use]
    pub fn output_tokens(&self) -> &[u32] {
        &self.tokens[..self.length]
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// Tokens generated before completion (all tokens while active).
    #[must_use]
    pub fn len(&self) -> usize {
        self.length
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// `log_prob / len^length_penalty`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn normalized_score(&self, length_penalty: f32) -> f32 {
        length_normalize(self.log_prob, self.length.max(1), length_penalty)
    }
}

#[allow(clippy::cast_precision_loss)]
fn length_normalize(log_prob: f32, length: usize, length_penalty: f32) -> f32 {
    log_prob / (length as f32).powf(length_penalty)
}

/// Why a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    MaxLength,
    BestBeamFound,
    BeamCountReached,
    AllCompleted,
}

/// Result of feeding one step into the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Continue,
    Stop(StopReason),
}

/// Owns every beam for one run and advances them in lock-step.
#[derive(Debug, Clone)]
pub struct BeamTracker {
    beams: Vec<Beam>,
    criteria: Vec<StoppingCriterion>,
    early_stopping: EarlyStopping,
    length_penalty: f32,
    max_length: usize,
    pad_token_id: u32,
    step: usize,
    stop_reason: Option<StopReason>,
}

impl BeamTracker {
    /// Tracker with the standard EOS criterion from `cfg`.
    #[must_use]
    pub fn new(cfg: &GenerationConfig) -> Self {
        Self::with_criteria(
            cfg,
            vec![StoppingCriterion::EndOfSequence {
                eos_token_id: cfg.eos_token_id,
                skip: cfg.prefix_length,
            }],
        )
    }

    #[must_use]
    pub fn with_criteria(cfg: &GenerationConfig, criteria: Vec<StoppingCriterion>) -> Self {
        Self {
            beams: (0..cfg.num_beams).map(Beam::new).collect(),
            criteria,
            early_stopping: cfg.early_stopping,
            length_penalty: cfg.length_penalty,
            max_length: cfg.max_length,
            pad_token_id: cfg.pad_token_id,
            step: 0,
            stop_reason: None,
        }
    }

    #[must_use]
    pub fn beams(&self) -> &[Beam] {
        &self.beams
    }

    /// Token histories to feed back to the evaluator.
    #[must_use]
    pub fn histories(&self) -> Vec<&[u32]> {
        self.beams.iter().map(Beam::tokens).collect()
    }

    #[must_use]
    pub fn step(&self) -> usize {
        self.step
    }

    #[must_use]
    pub fn num_completed(&self) -> usize {
        self.beams.iter().filter(|b| b.completed).count()
    }

    #[must_use]
    pub fn stop_reason(&self) -> Option<StopReason> {
        self.stop_reason
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.stop_reason.is_some()
    }

    /// Append one outcome per beam and evaluate the stopping policy.
    ///
    /// Finished beams receive the pad token and keep their score. Calls after the run
    /// has stopped are ignored.
    ///
    /// # Panics
    /// Panics if `outcomes.len()` differs from the beam count.
    pub fn advance(&mut self, outcomes: &[SampleOutcome]) -> StepStatus {
        if let Some(reason) = self.stop_reason {
            return StepStatus::Stop(reason);
        }
        assert_eq!(
            outcomes.len(),
            self.beams.len(),
            "one sample outcome per beam"
        );

        for (beam, outcome) in self.beams.iter_mut().zip(outcomes) {
            if beam.completed {
                beam.tokens.push(self.pad_token_id);
                continue;
            }
            beam.tokens.push(outcome.token_id);
            beam.log_prob += outcome.log_prob;
            beam.length = beam.tokens.len();
            if self.criteria.iter().any(|c| c.is_complete(&beam.tokens)) {
                beam.completed = true;
                tracing::debug!(
                    beam = beam.index,
                    step = self.step,
                    log_prob = beam.log_prob,
                    "beam completed"
                );
            }
        }
        self.step += 1;

        match self.check_stop() {
            Some(reason) => {
                self.stop_reason = Some(reason);
                tracing::info!(
                    step = self.step,
                    completed = self.num_completed(),
                    ?reason,
                    "beam search finished"
                );
                StepStatus::Stop(reason)
            }
            None => StepStatus::Continue,
        }
    }

    fn check_stop(&self) -> Option<StopReason> {
        let completed = self.num_completed();
        match self.early_stopping {
            EarlyStopping::None => {}
            EarlyStopping::BeamCount(count) => {
                if completed >= count {
                    return Some(StopReason::BeamCountReached);
                }
            }
            EarlyStopping::BestBeam => {
                if completed == self.beams.len() {
                    return Some(StopReason::AllCompleted);
                }
                if completed > 0 && !self.best_can_be_beaten() {
                    return Some(StopReason::BestBeamFound);
                }
            }
        }
        if self.step >= self.max_length {
            return Some(StopReason::MaxLength);
        }
        None
    }

    /// Whether any active beam could still overtake the best finished one.
    fn best_can_be_beaten(&self) -> bool {
        let best = self
            .beams
            .iter()
            .filter(|b| b.completed)
            .map(|b| b.normalized_score(self.length_penalty))
            .fold(f32::NEG_INFINITY, f32::max);

        self.beams
            .iter()
            .filter(|b| !b.completed)
            .any(|b| self.best_achievable(b) > best)
    }

    /// Upper bound on an active beam's final normalised score.
    ///
    /// Further tokens can only lower the cumulative log-probability, so the bound keeps the
    /// current value and picks the most favourable remaining length.
    fn best_achievable(&self, beam: &Beam) -> f32 {
        let current = beam.len().max(1);
        let longest = self.max_length.max(current);
        let length = if self.length_penalty > 0.0 && beam.log_prob < 0.0 {
            longest
        } else {
            current
        };
        length_normalize(beam.log_prob, length, self.length_penalty)
    }

    /// Beams the run returns: every beam under [`EarlyStopping::None`], else the completed ones.
    ///
    /// If no beam completed before `max_length`, all beams are returned.
    #[must_use]
    pub fn finished_beams(&self) -> Vec<Beam> {
        if self.early_stopping == EarlyStopping::None || self.num_completed() == 0 {
            return self.beams.clone();
        }
        self.beams.iter().filter(|b| b.completed).cloned().collect()
    }

    /// [`Self::finished_beams`] ordered best-first by normalised score.
    #[must_use]
    pub fn ranked_beams(&self) -> Vec<Beam> {
        let mut beams = self.finished_beams();
        let penalty = self.length_penalty;
        beams.sort_by(|a, b| {
            b.normalized_score(penalty)
                .total_cmp(&a.normalized_score(penalty))
        });
        beams
    }
}
