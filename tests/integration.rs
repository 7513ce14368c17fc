use std::collections::HashSet;
use std::hash::{DefaultHasher, Hash, Hasher};

use beam_decode::inference::{
    ConstraintPipeline, EarlyStopping, Evaluator, GenerationConfig, Generator, LogitsBatch,
    StepStatus, StopReason, generate,
};
use beam_decode::inference::sampling::top_k;
use candle_core::{Device, Tensor};
use rand::{Rng, SeedableRng};

const VOCAB: usize = 32;

/// Deterministic stand-in for a model: logits are a pure function of the history.
struct HashedModel {
    eos_token_id: u32,
    eos_bias: f32,
}

impl HashedModel {
    fn row(&self, history: &[u32]) -> Vec<f32> {
        let mut hasher = DefaultHasher::new();
        history.hash(&mut hasher);
        let mut rng = rand::rngs::StdRng::seed_from_u64(hasher.finish());
        let mut row = (0..VOCAB)
            .map(|_| rng.r#gen::<f32>() * 4.0)
            .collect::<Vec<_>>();
        row[self.eos_token_id as usize] += self.eos_bias;
        row
    }
}

impl Evaluator for HashedModel {
    fn forward(&mut self, histories: &[&[u32]]) -> beam_decode::Result<Tensor> {
        let data = histories
            .iter()
            .flat_map(|h| self.row(h))
            .collect::<Vec<_>>();
        Ok(Tensor::from_vec(data, (histories.len(), VOCAB), &Device::Cpu)?)
    }
}

fn config() -> GenerationConfig {
    GenerationConfig {
        num_beams: 4,
        max_length: 24,
        min_length: 6,
        top_k: 8,
        no_repeat_ngram_size: 2,
        early_stopping: EarlyStopping::None,
        eos_token_id: 3,
        decoder_start_token_id: 2,
        forced_bos_token_id: Some(0),
        pad_token_id: 1,
        forced_eos: false,
        seed: 1234,
        ..GenerationConfig::default()
    }
}

fn model() -> HashedModel {
    HashedModel {
        eos_token_id: 3,
        eos_bias: 0.5,
    }
}

#[test]
fn leader_beam_is_argmax_of_constrained_distribution() -> anyhow::Result<()> {
    let cfg = config();
    let out = generate(&mut model(), cfg.clone())?;
    let leader = out
        .beams
        .iter()
        .find(|b| b.index == 0)
        .expect("leader beam returned under EarlyStopping::None");

    let pipeline = ConstraintPipeline::from_config(&cfg);
    let tokens = leader.output_tokens();
    for pos in 0..tokens.len() {
        let history = &tokens[..pos];
        let mut batch = LogitsBatch::from_rows(&[model().row(history)])?;
        pipeline.apply(&[history], &mut batch);
        let best = top_k(batch.row(0), cfg.top_k).token_ids[0];
        assert_eq!(tokens[pos], best, "leader diverged from argmax at {pos}");
    }
    Ok(())
}

#[test]
fn every_beam_starts_with_the_forced_prefix() -> anyhow::Result<()> {
    let out = generate(&mut model(), config())?;
    for beam in &out.beams {
        assert_eq!(&beam.tokens()[..2], &[2, 0]);
    }
    Ok(())
}

#[test]
fn first_step_is_greedy_for_every_beam_without_forced_tokens() -> anyhow::Result<()> {
    let expected = top_k(&model().row(&[]), 1).token_ids[0];
    for seed in 0..10 {
        let cfg = GenerationConfig {
            seed,
            top_k: 0,
            ..config()
        };
        let mut generator = Generator::with_pipeline(cfg, ConstraintPipeline::new(Vec::new()))?;
        let mut evaluator = model();
        let logits = evaluator.forward(&generator.histories())?;
        generator.step(&logits)?;
        for history in generator.histories() {
            assert_eq!(history, &[expected], "seed {seed}");
        }
    }
    Ok(())
}

#[test]
fn same_seed_same_output() -> anyhow::Result<()> {
    let a = generate(&mut model(), config())?;
    let b = generate(&mut model(), config())?;
    let tokens = |o: &beam_decode::inference::GenerationOutput| {
        o.beams
            .iter()
            .map(|b| (b.index, b.tokens().to_vec()))
            .collect::<Vec<_>>()
    };
    assert_eq!(tokens(&a), tokens(&b));

    let c = generate(
        &mut model(),
        GenerationConfig {
            seed: 99,
            ..config()
        },
    )?;
    // The leader never samples, so it is seed-independent.
    let leader = |o: &beam_decode::inference::GenerationOutput| {
        o.beams
            .iter()
            .find(|b| b.index == 0)
            .map(|b| b.tokens().to_vec())
    };
    assert_eq!(leader(&a), leader(&c));
    Ok(())
}

#[test]
fn histories_grow_in_lock_step() -> anyhow::Result<()> {
    let mut generator = Generator::new(config())?;
    let mut evaluator = model();
    let mut previous = 0;
    loop {
        let logits = evaluator.forward(&generator.histories())?;
        let status = generator.step(&logits)?;
        let lengths = generator
            .histories()
            .iter()
            .map(|h| h.len())
            .collect::<HashSet<_>>();
        assert_eq!(lengths.len(), 1, "beams out of lock-step: {lengths:?}");
        let len = *lengths.iter().next().unwrap_or(&0);
        assert_eq!(len, previous + 1);
        previous = len;
        if status != StepStatus::Continue {
            break;
        }
    }
    assert_eq!(previous, config().max_length);
    Ok(())
}

#[test]
fn no_bigram_repeats() -> anyhow::Result<()> {
    for seed in 0..5 {
        let out = generate(
            &mut model(),
            GenerationConfig {
                seed,
                ..config()
            },
        )?;
        for beam in &out.beams {
            let mut seen = HashSet::new();
            for pair in beam.output_tokens().windows(2) {
                assert!(seen.insert(pair.to_vec()), "repeated bigram {pair:?}");
            }
        }
    }
    Ok(())
}

#[test]
fn eos_respects_min_length() -> anyhow::Result<()> {
    let eos_happy = || HashedModel {
        eos_token_id: 3,
        eos_bias: 50.0,
    };
    for seed in 0..5 {
        let cfg = GenerationConfig {
            seed,
            ..config()
        };
        let out = generate(&mut eos_happy(), cfg.clone())?;
        for beam in &out.beams {
            let tokens = beam.output_tokens();
            assert!(!tokens[..cfg.min_length].contains(&3));
            // Strong EOS preference ends the beam right at the minimum length.
            assert_eq!(tokens.len(), cfg.min_length + 1);
        }
    }
    Ok(())
}

#[test]
fn min_length_equal_to_max_length_never_emits_eos() -> anyhow::Result<()> {
    let cfg = GenerationConfig {
        num_beams: 1,
        min_length: 6,
        max_length: 6,
        forced_eos: true,
        ..config()
    };
    let mut eos_happy = HashedModel {
        eos_token_id: 3,
        eos_bias: 50.0,
    };
    let out = generate(&mut eos_happy, cfg)?;
    assert_eq!(out.stop_reason, StopReason::MaxLength);
    let beam = out.best().expect("single beam");
    assert_eq!(beam.tokens().len(), 6);
    assert!(!beam.tokens().contains(&3), "{:?}", beam.tokens());
    Ok(())
}

#[test]
fn none_policy_runs_to_max_length() -> anyhow::Result<()> {
    let mut eos_happy = HashedModel {
        eos_token_id: 3,
        eos_bias: 50.0,
    };
    let out = generate(&mut eos_happy, config())?;
    assert_eq!(out.stop_reason, StopReason::MaxLength);
    assert_eq!(out.steps, config().max_length);
    assert_eq!(out.beams.len(), 4);
    assert!(out.beams.iter().all(|b| b.is_completed()));
    assert!(out.beams.iter().all(|b| b.tokens().len() == 24));
    Ok(())
}

#[test]
fn beam_count_halts_on_second_completion() -> anyhow::Result<()> {
    for seed in 0..10 {
        let cfg = GenerationConfig {
            seed,
            min_length: 3,
            early_stopping: EarlyStopping::BeamCount(2),
            ..config()
        };
        let mut generator = Generator::new(cfg)?;
        let mut evaluator = HashedModel {
            eos_token_id: 3,
            eos_bias: 2.0,
        };
        loop {
            let logits = evaluator.forward(&generator.histories())?;
            let status = generator.step(&logits)?;
            let completed = generator.tracker().num_completed();
            match status {
                StepStatus::Continue => assert!(completed < 2),
                StepStatus::Stop(StopReason::BeamCountReached) => {
                    assert!(completed >= 2);
                    break;
                }
                StepStatus::Stop(other) => {
                    assert_eq!(other, StopReason::MaxLength);
                    assert!(completed < 2);
                    break;
                }
            }
        }
        let output = generator.output().expect("stopped run has output");
        if output.stop_reason == StopReason::BeamCountReached {
            assert!(output.beams.iter().all(|b| b.is_completed()));
        }
    }
    Ok(())
}

#[test]
fn best_beam_returns_ranked_completed_beams() -> anyhow::Result<()> {
    let cfg = GenerationConfig {
        early_stopping: EarlyStopping::BestBeam,
        ..config()
    };
    let out = generate(
        &mut HashedModel {
            eos_token_id: 3,
            eos_bias: 3.0,
        },
        cfg.clone(),
    )?;
    assert!(out.steps <= cfg.max_length);
    let scores = out
        .beams
        .iter()
        .map(|b| b.normalized_score(cfg.length_penalty))
        .collect::<Vec<_>>();
    assert!(scores.windows(2).all(|w| w[0] >= w[1]), "not ranked: {scores:?}");
    if out.stop_reason != StopReason::MaxLength {
        assert!(out.beams.iter().all(|b| b.is_completed()));
    }
    Ok(())
}
