//! Per-step logits buffer.
//!
//! The evaluator hands back a `[num_beams, vocab_size]` tensor each step. It is copied to
//! host once, mutated in place by the constraint pipeline, then read by the sampler.

use candle_core::{DType, Tensor};

use crate::error::{DecodeError, Result};

/// Row-major `[num_beams, vocab_size]` f32 scores for the next token.
#[derive(Debug, Clone, PartialEq)]
pub struct LogitsBatch {
    data: Vec<f32>,
    num_beams: usize,
    vocab_size: usize,
}

impl LogitsBatch {
    /// Wrap a flat row-major buffer.
    ///
    /// # Errors
    /// Returns an error if the buffer length does not equal `num_beams * vocab_size`, or if
    /// either dimension is zero.
    pub fn from_vec(data: Vec<f32>, num_beams: usize, vocab_size: usize) -> Result<Self> {
        if vocab_size == 0 {
            return Err(DecodeError::EmptyVocabulary);
        }
        if num_beams == 0 || data.len() != num_beams * vocab_size {
            return Err(DecodeError::LogitsShape {
                expected_beams: num_beams,
                got: vec![data.len()],
            });
        }
        Ok(Self {
            data,
            num_beams,
            vocab_size,
        })
    }

    /// Build from one row per beam.
    ///
    /// # Errors
    /// Returns an error if rows are empty or have different lengths.
    pub fn from_rows(rows: &[Vec<f32>]) -> Result<Self> {
        let vocab_size = rows.first().map_or(0, Vec::len);
        if rows.iter().any(|r| r.len() != vocab_size) {
            return Err(DecodeError::LogitsShape {
                expected_beams: rows.len(),
                got: rows.iter().map(Vec::len).collect(),
            });
        }
        Self::from_vec(rows.concat(), rows.len(), vocab_size)
    }

    /// Copy a rank-2 evaluator output to host memory.
    ///
    /// # Errors
    /// Returns an error if the tensor is not `[expected_beams, vocab]` or conversion fails.
    pub fn from_tensor(logits: &Tensor, expected_beams: usize) -> Result<Self> {
        let dims = logits.dims().to_vec();
        let (beams, vocab) = match dims.as_slice() {
            [beams, vocab] => (*beams, *vocab),
            // A single-beam run may get a bare vocabulary vector.
            [vocab] if expected_beams == 1 => (1, *vocab),
            _ => {
                return Err(DecodeError::LogitsShape {
                    expected_beams,
                    got: dims,
                });
            }
        };
        if beams != expected_beams {
            return Err(DecodeError::LogitsShape {
                expected_beams,
                got: dims,
            });
        }
        let data = logits
            .to_dtype(DType::F32)?
            .flatten_all()?
            .to_vec1::<f32>()?;
        Self::from_vec(data, beams, vocab)
    }

    #[must_use]
    pub fn num_beams(&self) -> usize {
        self.num_beams
    }

    #[must_use]
    pub fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    /// Scores of one beam.
    ///
    /// # Panics
    /// Panics if `beam >= num_beams`.
    #[must_use]
    pub fn row(&self, beam: usize) -> &[f32] {
        let start = beam * self.vocab_size;
        &self.data[start..start + self.vocab_size]
    }

    /// Mutable scores of one beam.
    ///
    /// # Panics
    /// Panics if `beam >= num_beams`.
    pub fn row_mut(&mut self, beam: usize) -> &mut [f32] {
        let start = beam * self.vocab_size;
        &mut self.data[start..start + self.vocab_size]
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f32]> {
        self.data.chunks_exact(self.vocab_size)
    }

    pub fn rows_mut(&mut self) -> impl Iterator<Item = &mut [f32]> {
        self.data.chunks_exact_mut(self.vocab_size)
    }
}

#[cfg(test)]
mod tests {
    use candle_core::Device;

    use super::*;

    #[test]
    fn test_from_tensor_rank2() {
        let t = Tensor::new(&[[0.0_f32, 1.0, 2.0], [3.0, 4.0, 5.0]], &Device::Cpu).unwrap();
        let batch = LogitsBatch::from_tensor(&t, 2).unwrap();
        assert_eq!(batch.num_beams(), 2);
        assert_eq!(batch.vocab_size(), 3);
        assert_eq!(batch.row(1), &[3.0, 4.0, 5.0]);
    }

    #[test]
    fn test_from_tensor_converts_dtype() {
        let t = Tensor::new(&[[0.5_f64, 1.5]], &Device::Cpu).unwrap();
        let batch = LogitsBatch::from_tensor(&t, 1).unwrap();
        assert_eq!(batch.row(0), &[0.5, 1.5]);
    }

    #[test]
    fn test_from_tensor_beam_mismatch() {
        let t = Tensor::zeros((3, 4), DType::F32, &Device::Cpu).unwrap();
        let err = LogitsBatch::from_tensor(&t, 2).unwrap_err();
        assert!(matches!(err, DecodeError::LogitsShape { .. }));
    }

    #[test]
    fn test_empty_vocab_rejected() {
        let err = LogitsBatch::from_vec(Vec::new(), 2, 0).unwrap_err();
        assert!(matches!(err, DecodeError::EmptyVocabulary));
    }

    #[test]
    fn test_ragged_rows_rejected() {
        let rows = vec![vec![0.0, 1.0], vec![0.0]];
        assert!(LogitsBatch::from_rows(&rows).is_err());
    }
}
