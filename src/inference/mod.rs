pub mod beam;
pub mod config;
pub mod constraints;
pub mod generate;
pub mod logits;
pub mod sampling;

pub use beam::{Beam, BeamTracker, StepStatus, StopReason, StoppingCriterion};
pub use config::{EarlyStopping, GenerationConfig};
pub use constraints::{ConstraintPipeline, LogitsConstraint};
pub use generate::{Evaluator, GenerationOutput, Generator, StepProgress, generate};
pub use logits::LogitsBatch;
pub use sampling::{SampleOutcome, TopKResult, TopKSampler};
