//! Recorded logits traces.
//!
//! A trace is a safetensors file holding one `[steps, num_beams, vocab_size]` tensor named
//! `logits`. Replaying it through [`Generator`](crate::inference::Generator) reproduces a
//! run without the model that produced it.

use std::path::Path;

use candle_core::{DType, Device, Tensor};
use safetensors::{Dtype as SafeDtype, SafeTensors};

use crate::error::{DecodeError, Result};
use crate::inference::generate::Evaluator;

/// Tensor name a trace file must contain.
pub const TRACE_TENSOR_NAME: &str = "logits";

/// Per-step logits read from a trace file.
#[derive(Debug, Clone)]
pub struct LogitsTrace {
    logits: Tensor,
}

impl LogitsTrace {
    /// Wrap an in-memory `[steps, num_beams, vocab_size]` tensor.
    ///
    /// # Errors
    /// Returns an error if the tensor is not rank 3.
    pub fn new(logits: Tensor) -> Result<Self> {
        if logits.rank() != 3 {
            return Err(DecodeError::Trace(format!(
                "expected [steps, beams, vocab], got {:?}",
                logits.dims()
            )));
        }
        Ok(Self { logits })
    }

    /// Parse safetensors bytes.
    ///
    /// # Errors
    /// Returns an error if the bytes are not safetensors, the `logits` tensor is missing,
    /// or it has an unsupported dtype or rank.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let st = SafeTensors::deserialize(data)
            .map_err(|e| DecodeError::Trace(format!("parse safetensors: {e}")))?;
        let view = st
            .tensor(TRACE_TENSOR_NAME)
            .map_err(|e| DecodeError::Trace(format!("read tensor {TRACE_TENSOR_NAME:?}: {e}")))?;
        let dtype = match view.dtype() {
            SafeDtype::F32 => DType::F32,
            SafeDtype::F16 => DType::F16,
            SafeDtype::BF16 => DType::BF16,
            other => {
                return Err(DecodeError::Trace(format!(
                    "unsupported dtype {other:?} for tensor {TRACE_TENSOR_NAME:?}"
                )));
            }
        };
        let logits = Tensor::from_raw_buffer(view.data(), dtype, view.shape(), &Device::Cpu)?;
        Self::new(logits)
    }

    /// Read a trace file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)?;
        Self::from_bytes(&data)
    }

    #[must_use]
    pub fn steps(&self) -> usize {
        self.logits.dims()[0]
    }

    #[must_use]
    pub fn num_beams(&self) -> usize {
        self.logits.dims()[1]
    }

    #[must_use]
    pub fn vocab_size(&self) -> usize {
        self.logits.dims()[2]
    }

    /// `[num_beams, vocab_size]` logits of one step.
    ///
    /// # Errors
    /// Returns an error if `step` is past the end of the trace.
    pub fn step(&self, step: usize) -> Result<Tensor> {
        if step >= self.steps() {
            return Err(DecodeError::Trace(format!(
                "trace has {} steps, step {step} requested",
                self.steps()
            )));
        }
        Ok(self.logits.get(step)?)
    }
}

impl Evaluator for LogitsTrace {
    /// Serves the step matching the current history length; histories are otherwise ignored.
    fn forward(&mut self, histories: &[&[u32]]) -> Result<Tensor> {
        let step = histories.first().map_or(0, |h| h.len());
        self.step(step)
    }
}
