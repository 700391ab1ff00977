use anyhow::{Context, Result};
use octfuse::cli::{parse_args, setup_logging, Commands, DataArgs, EvaluateArgs, TrainArgs};
use octfuse::data::batcher::MultimodalBatcher;
use octfuse::data::dataset::MultimodalDataset;
use octfuse::data::encoding::FittedEncoders;
use octfuse::data::loader::TabularLoader;
use octfuse::data::volumes::VolumeIndex;
use octfuse::eval::report::{FileReportSink, ReportSink};
use octfuse::eval::{evaluate, TestReport};
use octfuse::model::architecture::FusionModel;
use octfuse::model::checkpoint::CheckpointManager;
use octfuse::model::{FusionModelConfig, Modality};
use octfuse::training::callbacks::{MetricsLoggerCallback, ProgressLoggerCallback, TimerCallback};
use octfuse::training::trainer::Trainer;
use octfuse::training::TrainingConfig;
use octfuse::{DefaultBackend, TrainBackend};
use tracing::{error, info};

fn main() {
    let cli = parse_args();

    setup_logging(cli.verbose);

    info!("{}", octfuse::info());

    let result = match cli.command {
        Commands::Train(args) => run_train(args),
        Commands::Evaluate(args) => run_evaluate(args),
        Commands::Volumes(args) => run_volumes(args),
    };

    if let Err(e) = result {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}

/// Load the table; `encoders` from a saved model replace fitting new ones
fn load_dataset(data: &DataArgs, encoders: Option<FittedEncoders>) -> Result<MultimodalDataset> {
    info!("Loading data...");
    info!("Tabular file: {:?}", data.tabular);
    if let Some(images) = &data.images {
        info!("Image root: {:?}", images);
    }

    let config = data.dataset_config()?;
    let options = data.dataset_options()?;
    let dataset = match encoders {
        Some(encoders) => MultimodalDataset::from_file_with_encoders(&data.tabular, &config, &options, encoders),
        None => MultimodalDataset::from_file(&data.tabular, &config, &options),
    }
    .with_context(|| format!("Failed to load data from {:?}", data.tabular))?;

    info!("Loaded {} records, images available: {}", dataset.len(), dataset.has_images());
    info!("Class distribution: {:?}", dataset.class_distribution());
    if dataset.has_images() {
        dataset.report_missing_volumes();
    }
    Ok(dataset)
}

/// Evaluate on the test partition and hand the breakdown to the sink
fn run_test_pass(
    model: &FusionModel<DefaultBackend>,
    modality: Modality,
    dataset: &MultimodalDataset,
    test_indices: &[usize],
    batch_size: usize,
    sink: &mut dyn ReportSink,
) -> Result<()> {
    let batcher = MultimodalBatcher::<DefaultBackend>::new(dataset, modality.requires_image(), Default::default());
    let test_set = dataset.partition(test_indices);

    info!("Evaluating on {} test samples...", test_set.len());
    let outcome = evaluate(model, modality, &batcher, &test_set, batch_size)
        .context("Test evaluation failed")?;

    let report = TestReport::from_outcome(&outcome, dataset.label_map());
    sink.write_test_report(modality, &report)
}

fn run_train(args: TrainArgs) -> Result<()> {
    info!("Starting training...");
    info!("Output directory: {:?}", args.output);

    octfuse::utils::ensure_dir(&args.output)?;

    let dataset = load_dataset(&args.data, None)?;
    let split = dataset.split(&args.split.split_config())?;

    let base = if args.quick { TrainingConfig::quick_test() } else { TrainingConfig::default() };
    let training_config = TrainingConfig {
        modality: args.modality,
        epochs: if args.quick { base.epochs } else { args.epochs },
        batch_size: args.batch_size,
        learning_rate: args.learning_rate,
        weight_decay: args.weight_decay,
        scheduler: args.scheduler(),
        seed: args.split.seed,
        fail_on_non_finite: args.fail_on_non_finite,
        ..base
    };
    let model_config = FusionModelConfig::for_dataset(args.modality, &dataset);

    let checkpoint_dir = args.output.join("checkpoints");
    let metrics_file = args.output.join(format!("{}_training_metrics.json", args.modality));

    let mut trainer = Trainer::<TrainBackend>::new(training_config, model_config, Default::default())
        .with_checkpoint_dir(&checkpoint_dir)?
        .with_callback(ProgressLoggerCallback::new())
        .with_callback(TimerCallback::new())
        .with_callback(MetricsLoggerCallback::new(&metrics_file));

    info!("Starting model training...");
    let result = trainer.train(&dataset, &split)
        .context("Training failed")?;

    info!("=== Training Results ===");
    info!("Total epochs: {}", result.history.len());
    info!("Training time: {}", octfuse::utils::format_duration(result.duration_secs));
    if let Some(ref checkpoint) = result.checkpoint {
        info!("Final model saved to: {:?}", checkpoint);
    }

    let mut sink = FileReportSink::new(&args.output)?;
    sink.write_history(args.modality, &result.history)?;

    let model = burn::module::AutodiffModule::valid(&result.model);
    run_test_pass(&model, args.modality, &dataset, &split.test, args.batch_size, &mut sink)
}

fn run_evaluate(args: EvaluateArgs) -> Result<()> {
    info!("Starting evaluation...");
    info!("Checkpoint directory: {:?}", args.checkpoint_dir);

    let manager = CheckpointManager::new(&args.checkpoint_dir)?;
    let (model, metadata) = manager
        .load_final::<DefaultBackend>(args.modality, &Default::default())
        .with_context(|| format!("Failed to load {} model from {:?}", args.modality, args.checkpoint_dir))?;

    let dataset = load_dataset(&args.data, Some(metadata.encoders.clone()))?;
    metadata.check_dataset(&dataset)
        .context("Dataset does not match the saved model")?;
    let split = dataset.split(&args.split.split_config())?;

    let mut sink = FileReportSink::new(&args.output)?;
    run_test_pass(&model, args.modality, &dataset, &split.test, args.batch_size, &mut sink)
}

fn run_volumes(args: DataArgs) -> Result<()> {
    let root = args.images.as_ref()
        .context("--images is required to report volumes")?;

    let config = args.dataset_config()?;
    let table = TabularLoader::new(config).load(&args.tabular)
        .with_context(|| format!("Failed to load data from {:?}", args.tabular))?;
    info!("Loaded {} labelled rows ({} unlabelled dropped)", table.len(), table.dropped_unlabeled);

    let index = VolumeIndex::build(&table, root)?;
    index.report_missing();
    info!("Rows with unparseable volume keys: {}", index.unparseable_keys());
    info!("Slices discovered: {}", index.images().len());

    Ok(())
}
