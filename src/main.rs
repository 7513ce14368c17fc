//! Beam-search decoding CLI
//!
//! Replays a recorded logits trace through constrained beam search and post-processes the
//! best beam for a vision-grounding task.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use beam_decode::inference::{Beam, EarlyStopping, GenerationConfig, Generator, StopReason};
use beam_decode::tokenizer::VocabDecoder;
use beam_decode::trace::LogitsTrace;
use beam_decode::vision::{
    DEFAULT_LOCATION_BINS, DecodeOutput, LinearScaler, LocationTokens, StructuredDecoder,
    TaskType,
};

/// Early-stopping policy selectable on the command line.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum StopPolicy {
    /// Always run to max length
    None,
    /// Stop once the best finished beam cannot be beaten
    BestBeam,
    /// Stop once --stop-count beams have finished
    BeamCount,
}

/// Output format for decoded results.
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum OutputFormat {
    /// Plain text output
    #[default]
    Plain,
    /// JSON with run metadata
    Json,
}

/// Beam-search decoder - replay a logits trace and decode text or grounded regions.
#[derive(Debug, Parser)]
#[command(
    name = "beam-decode",
    version,
    about = "Replay a logits trace through constrained beam search",
    long_about = "Runs top-k beam search over a recorded [steps, beams, vocab] logits trace \
                  (safetensors, tensor `logits`) and decodes the best beam as text, boxes, \
                  quadrangles or polygons depending on the task."
)]
struct Cli {
    /// Logits trace (safetensors)
    #[arg(index = 1)]
    trace: PathBuf,

    /// tokenizer.json of the model that produced the trace
    #[arg(long, required_unless_present = "vocab", conflicts_with = "vocab")]
    tokenizer: Option<PathBuf>,

    /// Bare vocab.json token map, decoded as byte-level BPE
    #[arg(long)]
    vocab: Option<PathBuf>,

    /// Task the trace was generated for (snake_case name or prompt token, e.g. `<OD>`)
    #[arg(long, default_value = "caption")]
    task: TaskType,

    /// Generation config JSON; flags below override its fields
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of beams (defaults to the trace's beam count)
    #[arg(long)]
    beams: Option<usize>,

    /// Top-k truncation (0 = disabled)
    #[arg(long)]
    top_k: Option<usize>,

    /// Minimum sequence length before EOS is allowed
    #[arg(long)]
    min_length: Option<usize>,

    /// Maximum sequence length (defaults to the trace's step count)
    #[arg(long)]
    max_length: Option<usize>,

    /// Block repeated n-grams of this size (0 = disabled)
    #[arg(long)]
    no_repeat_ngram: Option<usize>,

    /// Length penalty exponent
    #[arg(long)]
    length_penalty: Option<f32>,

    /// Early-stopping policy
    #[arg(long, value_enum)]
    early_stopping: Option<StopPolicy>,

    /// Finished-beam threshold for --early-stopping beam-count
    #[arg(long, default_value = "1")]
    stop_count: usize,

    /// Random seed for reproducible sampling
    #[arg(long)]
    seed: Option<u64>,

    /// Source image width in pixels
    #[arg(long, default_value = "768")]
    image_width: f32,

    /// Source image height in pixels
    #[arg(long, default_value = "768")]
    image_height: f32,

    /// Coordinate bins per axis when the vocabulary has no `<loc_N>` tokens
    #[arg(long, default_value_t = DEFAULT_LOCATION_BINS)]
    location_bins: u32,

    /// First coordinate token id when the vocabulary has no `<loc_N>` tokens
    #[arg(long)]
    location_start: Option<u32>,

    /// Output format
    #[arg(long, value_enum, default_value = "plain")]
    format: OutputFormat,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, Serialize)]
struct JsonOutput<'a> {
    task: TaskType,
    output: &'a DecodeOutput,
    tokens: &'a [u32],
    log_prob: f32,
    score: f32,
    steps: usize,
    stop_reason: StopReason,
    generation_time_ms: u64,
    config: &'a GenerationConfig,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let trace = LogitsTrace::from_file(&cli.trace)
        .with_context(|| format!("load trace {}", cli.trace.display()))?;
    let vocab = load_decoder(&cli)?;
    let config = build_config(&cli, &trace)?;

    tracing::info!(
        steps = trace.steps(),
        beams = trace.num_beams(),
        vocab = trace.vocab_size(),
        task = %cli.task,
        "replaying trace"
    );

    let start = Instant::now();
    let mut evaluator = trace;
    let output = Generator::new(config.clone())
        .context("invalid generation config")?
        .run(
            &mut evaluator,
            |progress| {
                tracing::debug!(
                    step = progress.step,
                    max = progress.max_length,
                    completed = progress.completed,
                    "step"
                );
            },
            None,
        )
        .context("beam search failed")?;
    let generation_time_ms = start.elapsed().as_millis().try_into().unwrap_or(u64::MAX);

    let best = output.best().context("beam search returned no beams")?;
    let decoded = decode_beam(&cli, &vocab, best)?;

    match cli.format {
        OutputFormat::Plain => print_plain(&decoded),
        OutputFormat::Json => {
            let payload = JsonOutput {
                task: cli.task,
                output: &decoded,
                tokens: best.output_tokens(),
                log_prob: best.log_prob,
                score: best.normalized_score(config.length_penalty),
                steps: output.steps,
                stop_reason: output.stop_reason,
                generation_time_ms,
                config: &config,
            };
            println!("{}", serde_json::to_string_pretty(&payload)?);
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_decoder(cli: &Cli) -> Result<VocabDecoder> {
    match (&cli.tokenizer, &cli.vocab) {
        (Some(path), _) => VocabDecoder::from_file(path)
            .with_context(|| format!("load tokenizer {}", path.display())),
        (None, Some(path)) => VocabDecoder::from_vocab_file(path)
            .with_context(|| format!("load vocabulary {}", path.display())),
        (None, None) => anyhow::bail!("pass --tokenizer or --vocab"),
    }
}

fn build_config(cli: &Cli, trace: &LogitsTrace) -> Result<GenerationConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("read config {}", path.display()))?;
            serde_json::from_str::<GenerationConfig>(&raw)
                .with_context(|| format!("parse {}", path.display()))?
        }
        None => GenerationConfig {
            num_beams: trace.num_beams(),
            max_length: trace.steps(),
            ..GenerationConfig::default()
        },
    };

    if let Some(beams) = cli.beams {
        config.num_beams = beams;
    }
    if let Some(top_k) = cli.top_k {
        config.top_k = top_k;
    }
    if let Some(min_length) = cli.min_length {
        config.min_length = min_length;
    }
    if let Some(max_length) = cli.max_length {
        config.max_length = max_length;
    }
    if let Some(size) = cli.no_repeat_ngram {
        config.no_repeat_ngram_size = size;
    }
    if let Some(penalty) = cli.length_penalty {
        config.length_penalty = penalty;
    }
    if let Some(policy) = cli.early_stopping {
        config.early_stopping = match policy {
            StopPolicy::None => EarlyStopping::None,
            StopPolicy::BestBeam => EarlyStopping::BestBeam,
            StopPolicy::BeamCount => EarlyStopping::BeamCount(cli.stop_count),
        };
    }
    if let Some(seed) = cli.seed {
        config.seed = seed;
    }

    if config.num_beams != trace.num_beams() {
        anyhow::bail!(
            "config asks for {} beams but the trace has {}",
            config.num_beams,
            trace.num_beams()
        );
    }
    if config.max_length > trace.steps() {
        tracing::warn!(
            max_length = config.max_length,
            steps = trace.steps(),
            "max_length exceeds trace length; clamping"
        );
        config.max_length = trace.steps();
        config.min_length = config.min_length.min(config.max_length);
    }
    config.validate().context("invalid generation config")?;
    Ok(config)
}

fn decode_beam(cli: &Cli, vocab: &VocabDecoder, beam: &Beam) -> Result<DecodeOutput> {
    let locations = match (LocationTokens::from_vocab(vocab), cli.task.coordinate_shape()) {
        (Some(locations), _) => locations,
        (None, None) => LocationTokens::new(0, 0),
        (None, Some(_)) => {
            let first_id = cli.location_start.context(
                "vocabulary has no <loc_N> tokens; pass --location-start for coordinate tasks",
            )?;
            LocationTokens::new(first_id, cli.location_bins)
        }
    };
    let scaler = LinearScaler::new(locations.bins, cli.image_width, cli.image_height);
    let decoder = StructuredDecoder::new(vocab, &locations, &scaler);
    decoder
        .decode(cli.task, beam.output_tokens())
        .context("post-process best beam")
}

fn print_plain(output: &DecodeOutput) {
    match output {
        DecodeOutput::Text(text) => println!("{}", text.trim()),
        DecodeOutput::Coordinates(results) => {
            if results.is_empty() {
                println!("(no regions)");
            }
            for r in results {
                let b = r.bounding_box;
                println!(
                    "{:?}\t{}\t[{:.1}, {:.1}, {:.1}, {:.1}]\t{} vertices",
                    r.shape,
                    r.label,
                    b.x_min,
                    b.y_min,
                    b.x_max,
                    b.y_max,
                    r.vertices.len()
                );
            }
        }
    }
}
