// ============================================================
// Layer 1 — CLI Commands and Arguments
// ============================================================
// The five modes and their flags. clap's derive macros generate
// help text, error messages, and type conversion.
//
// Every enumerated pipeline option is a --flag with a default
// that matches PipelineConfig::default(); the conversion at the
// bottom is the boundary between Layer 1 and Layer 2 — the
// application layer never sees clap types.

use clap::{Args, Subcommand};

use crate::application::config::PipelineConfig;

/// The five top-level modes.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Extract a cleaned corpus and style profile from a chat export
    Clone(CloneArgs),

    /// Fine-tune the personalized model on a cloned corpus
    Train(TrainArgs),

    /// One-shot reply from the trained model
    Demo(DemoArgs),

    /// Serve conversations for a messaging-bot surface
    Bot(ServeArgs),

    /// Serve conversations for a web surface
    Web(ServeArgs),
}

/// Options shared by every mode. Each field is one of the
/// pipeline's enumerated tunables.
#[derive(Args, Debug, Clone)]
pub struct ConfigArgs {
    /// Root directory for per-user working data and artifacts
    #[arg(long, default_value = "data")]
    pub work_dir: String,

    /// Name of the base conversational model being personalized
    #[arg(long, default_value = "style-lm-base")]
    pub base_model: String,

    /// Minimum authored utterances required to clone or train
    #[arg(long, default_value_t = 50)]
    pub min_corpus_size: usize,

    /// Conversation turns kept as context, for training examples
    /// and live sessions alike
    #[arg(long, default_value_t = 6)]
    pub max_context_turns: usize,

    /// Optimizer steps between durable checkpoints
    #[arg(long, default_value_t = 50)]
    pub checkpoint_cadence: usize,

    /// Training loss above this bound counts as divergence
    #[arg(long, default_value_t = 12.0)]
    pub divergence_bound: f64,

    /// Evaluations without improvement before early stopping
    #[arg(long, default_value_t = 3)]
    pub early_stop_patience: usize,

    /// Style similarity below this records a drift warning
    #[arg(long, default_value_t = 0.55)]
    pub style_drift_threshold: f32,

    /// Seconds each generation attempt gets before the retry
    #[arg(long, default_value_t = 30)]
    pub generation_timeout: u64,

    /// Seed for shuffles and splits
    #[arg(long, default_value_t = 42)]
    pub seed: u64,
}

impl From<&ConfigArgs> for PipelineConfig {
    fn from(a: &ConfigArgs) -> Self {
        PipelineConfig {
            work_dir:                a.work_dir.clone(),
            base_model_ref:          a.base_model.clone(),
            min_corpus_size:         a.min_corpus_size,
            max_context_turns:       a.max_context_turns,
            checkpoint_cadence:      a.checkpoint_cadence,
            divergence_bound:        a.divergence_bound,
            early_stop_patience:     a.early_stop_patience,
            style_drift_threshold:   a.style_drift_threshold,
            generation_timeout_secs: a.generation_timeout,
            seed:                    a.seed,
            ..PipelineConfig::default()
        }
    }
}

/// Arguments for the `clone` mode.
#[derive(Args, Debug)]
pub struct CloneArgs {
    /// Chat export: one JSON file or a directory of dialog files
    #[arg(long)]
    pub export_path: String,

    /// User whose personalized model this corpus feeds
    #[arg(long)]
    pub user: String,

    /// Sender id inside the export whose messages are cloned
    /// (defaults to the user id)
    #[arg(long)]
    pub sender: Option<String>,

    #[command(flatten)]
    pub config: ConfigArgs,
}

/// Arguments for the `train` mode.
#[derive(Args, Debug)]
pub struct TrainArgs {
    /// User to train a personalized model for
    #[arg(long)]
    pub user: String,

    #[command(flatten)]
    pub config: ConfigArgs,
}

/// Arguments for the `demo` mode.
#[derive(Args, Debug)]
pub struct DemoArgs {
    /// User whose model answers
    #[arg(long)]
    pub user: String,

    /// The message to reply to
    #[arg(long)]
    pub message: String,

    #[command(flatten)]
    pub config: ConfigArgs,
}

/// Arguments for the `bot` and `web` serve modes.
#[derive(Args, Debug)]
pub struct ServeArgs {
    /// User whose model answers
    #[arg(long)]
    pub user: String,

    #[command(flatten)]
    pub config: ConfigArgs,
}
