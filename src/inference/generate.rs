//! Beam-search generation loop.
//!
//! [`Generator`] owns the constraint pipeline, sampler and beam tracker for one run. Callers
//! that drive their own evaluator loop feed it one logits tensor per step via
//! [`Generator::step`]; [`Generator::run`] drives an [`Evaluator`] to completion.

use std::sync::atomic::{AtomicBool, Ordering};

use candle_core::Tensor;

use crate::error::{DecodeError, Result};
use crate::inference::beam::{Beam, BeamTracker, StepStatus, StopReason, StoppingCriterion};
use crate::inference::config::GenerationConfig;
use crate::inference::constraints::ConstraintPipeline;
use crate::inference::logits::LogitsBatch;
use crate::inference::sampling::{SampleOutcome, TopKSampler};

/// External forward pass: token histories in, `[num_beams, vocab_size]` logits out.
pub trait Evaluator {
    /// # Errors
    /// Returns an error if inference fails.
    fn forward(&mut self, histories: &[&[u32]]) -> Result<Tensor>;
}

/// Progress report sent to the observer after each step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepProgress {
    pub step: usize,
    pub max_length: usize,
    pub completed: usize,
}

/// Finished run.
#[derive(Debug, Clone)]
pub struct GenerationOutput {
    /// Returned beams, best first
    pub beams: Vec<Beam>,
    pub steps: usize,
    pub stop_reason: StopReason,
}

impl GenerationOutput {
    #[must_use]
    pub fn best(&self) -> Option<&Beam> {
        self.beams.first()
    }
}

/// One beam-search run.
#[derive(Debug, Clone)]
pub struct Generator {
    config: GenerationConfig,
    pipeline: ConstraintPipeline,
    sampler: TopKSampler,
    tracker: BeamTracker,
}

impl Generator {
    /// Generator with the standard rule set and EOS criterion for `config`.
    ///
    /// # Errors
    /// Returns an error if the config is invalid.
    pub fn new(config: GenerationConfig) -> Result<Self> {
        let pipeline = ConstraintPipeline::from_config(&config);
        Self::with_pipeline(config, pipeline)
    }

    /// Generator with a caller-ordered rule list.
    ///
    /// # Errors
    /// Returns an error if the config is invalid.
    pub fn with_pipeline(config: GenerationConfig, pipeline: ConstraintPipeline) -> Result<Self> {
        config.validate()?;
        tracing::debug!(
            num_beams = config.num_beams,
            top_k = config.top_k,
            max_length = config.max_length,
            early_stopping = ?config.early_stopping,
            seed = config.seed,
            "starting beam search"
        );
        Ok(Self {
            sampler: TopKSampler::new(config.top_k, config.seed),
            tracker: BeamTracker::new(&config),
            pipeline,
            config,
        })
    }

    /// Replace the stopping criteria (default: EOS after the structural prefix).
    #[must_use]
    pub fn with_criteria(mut self, criteria: Vec<StoppingCriterion>) -> Self {
        self.tracker = BeamTracker::with_criteria(&self.config, criteria);
        self
    }

    #[must_use]
    pub fn config(&self) -> &GenerationConfig {
        &self.config
    }

    #[must_use]
    pub fn tracker(&self) -> &BeamTracker {
        &self.tracker
    }

    /// Histories for the next forward pass.
    #[must_use]
    pub fn histories(&self) -> Vec<&[u32]> {
        self.tracker.histories()
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.tracker.is_finished()
    }

    /// Consume one step's evaluator output.
    ///
    /// The tensor is validated and copied before any beam is touched, so a failed step
    /// leaves the run unchanged.
    ///
    /// # Errors
    /// Returns an error if the logits shape does not match the beam count or is empty.
    pub fn step(&mut self, logits: &Tensor) -> Result<StepStatus> {
        let batch = LogitsBatch::from_tensor(logits, self.config.num_beams)?;
        self.step_batch(batch)
    }

    /// [`Self::step`] for an already host-side batch.
    ///
    /// # Errors
    /// Returns an error if the batch does not have one row per beam.
    pub fn step_batch(&mut self, mut batch: LogitsBatch) -> Result<StepStatus> {
        if let Some(reason) = self.tracker.stop_reason() {
            return Ok(StepStatus::Stop(reason));
        }
        if batch.num_beams() != self.config.num_beams {
            return Err(DecodeError::LogitsShape {
                expected_beams: self.config.num_beams,
                got: vec![batch.num_beams(), batch.vocab_size()],
            });
        }

        let outcomes: Vec<SampleOutcome> = {
            let histories = self.tracker.histories();
            self.pipeline.apply(&histories, &mut batch);
            self.sampler.sample(&batch, &histories)
        };
        tracing::debug!(
            step = self.tracker.step(),
            tokens = ?outcomes.iter().map(|o| o.token_id).collect::<Vec<_>>(),
            "sampled step"
        );
        Ok(self.tracker.advance(&outcomes))
    }

    /// Returned beams, best first. `None` until the run has stopped.
    #[must_use]
    pub fn output(&self) -> Option<GenerationOutput> {
        let stop_reason = self.tracker.stop_reason()?;
        Some(GenerationOutput {
            beams: self.tracker.ranked_beams(),
            steps: self.tracker.step(),
            stop_reason,
        })
    }

    /// Drive `evaluator` until the run stops.
    ///
    /// `observer` is called after every completed step. `cancel` is checked before each
    /// step; a cancelled run keeps every beam at the last completed step.
    ///
    /// # Errors
    /// Returns [`DecodeError::Cancelled`] if cancellation was requested, or any evaluator or
    /// shape error.
    pub fn run<E, F>(
        &mut self,
        evaluator: &mut E,
        mut observer: F,
        cancel: Option<&AtomicBool>,
    ) -> Result<GenerationOutput>
    where
        E: Evaluator + ?Sized,
        F: FnMut(StepProgress),
    {
        loop {
            if let Some(output) = self.output() {
                return Ok(output);
            }
            if cancel.is_some_and(|flag| flag.load(Ordering::Relaxed)) {
                tracing::info!(step = self.tracker.step(), "generation cancelled");
                return Err(DecodeError::Cancelled {
                    step: self.tracker.step(),
                });
            }

            let logits = evaluator.forward(&self.tracker.histories())?;
            self.step(&logits)?;

            observer(StepProgress {
                step: self.tracker.step(),
                max_length: self.config.max_length,
                completed: self.tracker.num_completed(),
            });
        }
    }
}

/// Run a fresh generator over `evaluator` with no observer or cancellation.
///
/// # Errors
/// Returns an error if the config is invalid or a step fails.
pub fn generate<E: Evaluator + ?Sized>(
    evaluator: &mut E,
    config: GenerationConfig,
) -> Result<GenerationOutput> {
    Generator::new(config)?.run(evaluator, |_| {}, None)
}
