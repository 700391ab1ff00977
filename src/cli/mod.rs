use crate::data::align::MergePolicy;
use crate::data::dataset::DatasetOptions;
use crate::data::imaging::ImageTransform;
use crate::data::{DatasetConfig, SplitConfig};
use crate::model::Modality;
use crate::training::SchedulerConfig;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// octfuse: multimodal OCT + clinical table diagnosis classifier
#[derive(Parser, Debug)]
#[command(name = "octfuse")]
#[command(about = "Train and evaluate multimodal OCT diagnosis classifiers")]
#[command(version)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Train a model and evaluate it on the held-out test partition
    Train(TrainArgs),

    /// Evaluate a saved model on the test partition
    Evaluate(EvaluateArgs),

    /// Report expected, loaded and missing image volumes
    Volumes(DataArgs),
}

/// Input data options shared by all subcommands
#[derive(Args, Debug, Clone)]
pub struct DataArgs {
    /// Clinical table (CSV or TSV, optionally gzipped)
    #[arg(short, long, required = true)]
    pub tabular: PathBuf,

    /// Root of the per-patient OCT image tree
    #[arg(short, long)]
    pub images: Option<PathBuf>,

    /// Column schema JSON (label, categorical, continuous and key columns)
    #[arg(short, long)]
    pub schema: Option<PathBuf>,

    /// How table rows are paired with image slices
    #[arg(long, value_enum, default_value_t = MergePolicy::VolumeKey)]
    pub merge_policy: MergePolicy,

    /// Side length images are resized to
    #[arg(long, default_value = "224")]
    pub image_size: u32,
}

impl DataArgs {
    /// Column schema from `--schema`, or the clinical defaults
    pub fn dataset_config(&self) -> anyhow::Result<DatasetConfig> {
        match &self.schema {
            Some(path) => DatasetConfig::from_json_file(path),
            None => Ok(DatasetConfig::default()),
        }
    }

    /// Image options; rejects an image size outside `1..=MAX_IMAGE_SIZE`
    pub fn dataset_options(&self) -> anyhow::Result<DatasetOptions> {
        let transform = ImageTransform::new(self.image_size);
        transform.validate()?;
        Ok(DatasetOptions {
            image_root: self.images.clone(),
            merge_policy: self.merge_policy,
            transform,
        })
    }
}

/// Partition options; evaluation must repeat the values used for training
#[derive(Args, Debug, Clone)]
pub struct SplitArgs {
    /// Validation ratio
    #[arg(long, default_value = "0.1")]
    pub val_ratio: f32,

    /// Test ratio
    #[arg(long, default_value = "0.2")]
    pub test_ratio: f32,

    /// Random seed for the split, initialization and shuffling
    #[arg(long, default_value = "2026")]
    pub seed: u64,
}

impl SplitArgs {
    pub fn split_config(&self) -> SplitConfig {
        SplitConfig {
            train_ratio: 1.0 - self.val_ratio - self.test_ratio,
            val_ratio: self.val_ratio,
            test_ratio: self.test_ratio,
            seed: self.seed,
        }
    }
}

/// Training arguments
#[derive(Parser, Debug)]
pub struct TrainArgs {
    #[command(flatten)]
    pub data: DataArgs,

    #[command(flatten)]
    pub split: SplitArgs,

    /// Output directory for checkpoints and reports
    #[arg(short, long, default_value = "./output")]
    pub output: PathBuf,

    /// Model inputs
    #[arg(short, long, value_enum, default_value_t = Modality::Multimodal)]
    pub modality: Modality,

    /// Number of training epochs
    #[arg(short, long, default_value = "10")]
    pub epochs: usize,

    /// Batch size
    #[arg(short, long, default_value = "16")]
    pub batch_size: usize,

    /// Learning rate
    #[arg(long, default_value = "0.0001")]
    pub learning_rate: f64,

    /// Weight decay
    #[arg(long, default_value = "0.00001")]
    pub weight_decay: f64,

    /// Epochs without validation loss improvement before the rate decays
    #[arg(long, default_value = "3")]
    pub patience: usize,

    /// Learning rate decay factor
    #[arg(long, default_value = "0.5")]
    pub factor: f64,

    /// Learning rate floor
    #[arg(long, default_value = "0.0")]
    pub min_lr: f64,

    /// Abort on a NaN or infinite batch loss
    #[arg(long)]
    pub fail_on_non_finite: bool,

    /// Quick test mode (fewer epochs)
    #[arg(long)]
    pub quick: bool,
}

impl TrainArgs {
    pub fn scheduler(&self) -> SchedulerConfig {
        SchedulerConfig::ReduceOnPlateau {
            factor: self.factor,
            patience: self.patience,
            min_lr: self.min_lr,
        }
    }
}

/// Evaluation arguments
#[derive(Parser, Debug)]
pub struct EvaluateArgs {
    #[command(flatten)]
    pub data: DataArgs,

    #[command(flatten)]
    pub split: SplitArgs,

    /// Directory holding the saved model
    #[arg(short, long, required = true)]
    pub checkpoint_dir: PathBuf,

    /// Modality of the saved model
    #[arg(short, long, value_enum, default_value_t = Modality::Multimodal)]
    pub modality: Modality,

    /// Output directory for reports
    #[arg(short, long, default_value = "./output")]
    pub output: PathBuf,

    /// Batch size for evaluation
    #[arg(short, long, default_value = "16")]
    pub batch_size: usize,
}

/// Parse CLI arguments
pub fn parse_args() -> Cli {
    Cli::parse()
}

/// Setup logging based on verbosity
///
/// `RUST_LOG` takes precedence over the verbosity flag.
pub fn setup_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
