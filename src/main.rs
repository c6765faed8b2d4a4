//! Histopathologic Cancer Detection CLI
//!
//! Entry point for running the pipeline steps individually or end to end.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use tracing::info;

use histo_cnn::backend::{backend_name, default_device, DefaultBackend, TrainingBackend};
use histo_cnn::checkpoint::ModelArtifacts;
use histo_cnn::config::PipelineConfig;
use histo_cnn::inference::Predictor;
use histo_cnn::model::CnnVariant;
use histo_cnn::pipeline::{
    prepare_data, run_eda, run_evaluation, run_final_training, run_pipeline, run_prediction,
    run_search, select_model, SelectedModel,
};
use histo_cnn::utils::logging::{init_logging, LogConfig, LogLevel};

/// Histopathologic Cancer Detection
///
/// Classifies tissue patches as benign or malignant with CNNs trained
/// using the Burn framework.
#[derive(Parser, Debug)]
#[command(name = "histo_cnn")]
#[command(version = histo_cnn::VERSION)]
#[command(about = "Histopathologic cancer detection with Burn", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true, default_value = "false")]
    verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true, default_value = "false", conflicts_with = "verbose")]
    quiet: bool,

    /// Explicit log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<LogLevel>,

    /// Pipeline configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory for every artifact
    #[arg(long, global = true)]
    output_dir: Option<PathBuf>,

    /// Random seed for splits, shuffling and augmentation
    #[arg(long, global = true)]
    seed: Option<u64>,

    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

/// Flags shared by every command that reads the labeled patches
#[derive(Args, Debug, Default)]
struct DataArgs {
    /// Directory containing the labels CSV and the train/test folders
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Use at most this many labeled patches
    #[arg(long)]
    max_samples: Option<usize>,

    /// Patch side length in pixels
    #[arg(long)]
    image_size: Option<usize>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Class balance, channel statistics and sample patches
    Eda {
        #[command(flatten)]
        data: DataArgs,

        /// Patches decoded per class for the statistics
        #[arg(long)]
        samples: Option<usize>,
    },

    /// Random hyperparameter search over both CNN variants
    Search {
        #[command(flatten)]
        data: DataArgs,

        /// Number of configurations to try
        #[arg(short, long)]
        trials: Option<usize>,

        /// Training runs per configuration
        #[arg(long)]
        executions: Option<usize>,

        /// Epochs per training run
        #[arg(short, long)]
        epochs: Option<usize>,

        /// Restrict the search to one variant (baseline or deep)
        #[arg(long)]
        variant: Option<CnnVariant>,
    },

    /// Train the best configuration with LR decay and early stopping
    Train {
        #[command(flatten)]
        data: DataArgs,

        /// Number of training epochs
        #[arg(short, long)]
        epochs: Option<usize>,

        /// Batch size for training
        #[arg(short, long)]
        batch_size: Option<usize>,

        /// Ignore search results and train this variant with the configured hyperparameters
        #[arg(long)]
        variant: Option<CnnVariant>,

        /// Disable data augmentation
        #[arg(long, default_value = "false")]
        no_augmentation: bool,

        /// Disable early stopping
        #[arg(long, default_value = "false")]
        no_early_stop: bool,
    },

    /// ROC curve and AUC of the trained model on the holdout slice
    Evaluate {
        #[command(flatten)]
        data: DataArgs,

        /// Directory of the trained model (defaults to <output_dir>/model)
        #[arg(short, long)]
        model_dir: Option<PathBuf>,
    },

    /// Predict test patches and write the submission CSV
    Predict {
        /// Test image or directory (defaults to <data_dir>/test)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Directory containing the labels CSV and the train/test folders
        #[arg(short, long)]
        data_dir: Option<PathBuf>,

        /// Directory of the trained model (defaults to <output_dir>/model)
        #[arg(short, long)]
        model_dir: Option<PathBuf>,

        /// Submission file name inside the output directory
        #[arg(long)]
        submission: Option<String>,
    },

    /// EDA, search, training, evaluation and submission in one go
    Run {
        #[command(flatten)]
        data: DataArgs,

        /// Number of search configurations
        #[arg(short, long)]
        trials: Option<usize>,

        /// Final training epochs
        #[arg(short, long)]
        epochs: Option<usize>,

        /// Quick test mode: 500 patches, 3 trials, 1 search epoch, 3 final epochs
        #[arg(long, default_value = "false")]
        quick: bool,
    },

    /// Write a configuration file with every default filled in
    InitConfig {
        /// Destination path
        #[arg(default_value = "histo.toml")]
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(long, default_value = "false")]
        force: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut log_config = if cli.verbose {
        LogConfig::verbose()
    } else if cli.quiet {
        LogConfig::quiet()
    } else {
        LogConfig::default()
    };
    if let Some(level) = cli.log_level {
        log_config.level = level;
    }

    let _ = init_logging(&log_config);

    print_banner();

    let mut config = match &cli.config {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    if let Some(dir) = cli.output_dir {
        config.output.output_dir = dir;
    }
    if let Some(seed) = cli.seed {
        config.seed = seed;
    }

    match cli.command {
        Commands::Eda { data, samples } => {
            apply_data_args(&mut config, data);
            if let Some(samples) = samples {
                config.data.eda_samples = samples;
            }
            validate(&config)?;
            run_eda(&config)?;
            println!();
            println!(
                "{} EDA written to {}",
                "Done:".green().bold(),
                config.output.eda_dir().display()
            );
        }

        Commands::Search {
            data,
            trials,
            executions,
            epochs,
            variant,
        } => {
            apply_data_args(&mut config, data);
            if let Some(trials) = trials {
                config.search.max_trials = trials;
            }
            if let Some(executions) = executions {
                config.search.executions_per_trial = executions;
            }
            if let Some(epochs) = epochs {
                config.search.epochs = epochs;
            }
            if let Some(variant) = variant {
                config.search.variants = vec![variant];
            }
            validate(&config)?;
            print_config(&config);

            let device = default_device();
            let data = prepare_data(&config)?;
            let results = run_search::<TrainingBackend>(&config, &data, &device)?;
            if let Some(best) = results.best() {
                println!(
                    "{} trial {} ({}) reached {:.2}% validation accuracy",
                    "Best:".green().bold(),
                    best.id,
                    best.variant,
                    best.val_accuracy * 100.0
                );
            }
        }

        Commands::Train {
            data,
            epochs,
            batch_size,
            variant,
            no_augmentation,
            no_early_stop,
        } => {
            apply_data_args(&mut config, data);
            if let Some(epochs) = epochs {
                config.training.epochs = epochs;
            }
            if let Some(batch_size) = batch_size {
                config.training.batch_size = batch_size;
            }
            if no_augmentation {
                config.data.augmentation = false;
            }
            validate(&config)?;
            print_config(&config);

            let selected = match variant {
                Some(variant) => {
                    config.training.variant = variant;
                    SelectedModel::from_config(&config)
                }
                None => select_model(&config)?,
            };

            let device = default_device();
            let data = prepare_data(&config)?;
            let mut train_config = config.clone();
            if no_early_stop {
                // patience past the last epoch never fires
                train_config.training.early_stopping.patience = config.training.epochs + 1;
            }
            let trained = run_final_training::<TrainingBackend>(&train_config, &data, &selected, &device)?;

            println!();
            println!("{}", "Training Complete:".green().bold());
            println!("  📅 Epochs run:    {}", trained.history.len());
            if let Some(acc) = trained.history.best_val_accuracy() {
                println!("  ✅ Best val acc:  {:.2}%", acc * 100.0);
            }
            if trained.history.stopped_early {
                println!("  ⏹️  Stopped early");
            }
            println!("  💾 Model:         {}", config.output.artifacts_dir().display());
        }

        Commands::Evaluate { data, model_dir } => {
            apply_data_args(&mut config, data);
            let artifacts = artifacts_for(&config, model_dir.as_deref())?;

            let device = default_device();
            let (model, model_config) = artifacts.load::<DefaultBackend>(&device)?;
            config.data.image_size = model_config.image_size;
            validate(&config)?;
            artifacts
                .check_split(&config.split_record())
                .context("Pass the --seed and --max-samples used for training")?;

            let data = prepare_data(&config)?;
            if data.splits.holdout.is_empty() {
                bail!("holdout split is empty, raise holdout_fraction or add data");
            }
            run_evaluation(&config, &model, &data, &device)?;
        }

        Commands::Predict {
            input,
            data_dir,
            model_dir,
            submission,
        } => {
            if let Some(dir) = data_dir {
                config.data.data_dir = dir;
            }
            if let Some(name) = submission {
                config.output.submission_file = name;
            }
            let artifacts = artifacts_for(&config, model_dir.as_deref())?;
            let predictor = Predictor::<DefaultBackend>::from_artifacts(&artifacts, default_device())?
                .with_batch_size(config.training.batch_size);

            match input {
                Some(path) if path.is_file() => {
                    let prediction = predictor.predict_file(&path)?;
                    println!(
                        "📷 {}: {:.4} ({})",
                        prediction.id,
                        prediction.probability,
                        prediction
                            .diagnosis(histo_cnn::evaluation::DEFAULT_THRESHOLD)
                            .name()
                    );
                }
                input => {
                    let dir = config.prediction_dir(input.as_deref());
                    if !dir.is_dir() {
                        bail!("test directory {} not found", dir.display());
                    }
                    run_prediction(&config, &predictor, &dir)?;
                }
            }
        }

        Commands::Run {
            data,
            trials,
            epochs,
            quick,
        } => {
            if quick {
                println!("{}", "🚀 Quick test mode".yellow().bold());
                config.data.max_samples = Some(500);
                config.search.max_trials = 3;
                config.search.epochs = 1;
                config.training.epochs = 3;
            }
            apply_data_args(&mut config, data);
            if let Some(trials) = trials {
                config.search.max_trials = trials;
            }
            if let Some(epochs) = epochs {
                config.training.epochs = epochs;
            }
            validate(&config)?;
            print_config(&config);

            let summary = run_pipeline::<TrainingBackend>(&config, &default_device())?;
            summary.print();
        }

        Commands::InitConfig { path, force } => {
            if path.exists() && !force {
                bail!("{} already exists, pass --force to overwrite", path.display());
            }
            config.save(&path)?;
            println!("{} wrote {}", "Done:".green().bold(), path.display());
        }
    }

    Ok(())
}

fn apply_data_args(config: &mut PipelineConfig, args: DataArgs) {
    if let Some(dir) = args.data_dir {
        config.data.data_dir = dir;
    }
    if let Some(max) = args.max_samples {
        config.data.max_samples = Some(max);
    }
    if let Some(size) = args.image_size {
        config.data.image_size = size;
    }
}

fn validate(config: &PipelineConfig) -> Result<()> {
    config.validate().context("Invalid configuration")?;
    if !config.data.data_dir.exists() {
        bail!(
            "data directory {} not found; expected {}/{} and {}/{}/",
            config.data.data_dir.display(),
            config.data.data_dir.display(),
            config.data.labels_file,
            config.data.data_dir.display(),
            config.data.train_dir
        );
    }
    Ok(())
}

fn artifacts_for(config: &PipelineConfig, model_dir: Option<&Path>) -> Result<ModelArtifacts> {
    let artifacts = ModelArtifacts::new(
        model_dir
            .map(Path::to_path_buf)
            .unwrap_or_else(|| config.output.artifacts_dir()),
    );
    if !artifacts.exists() {
        bail!(
            "no trained model in {}, run `histo_cnn train` first",
            artifacts.dir().display()
        );
    }
    Ok(artifacts)
}

fn print_config(config: &PipelineConfig) {
    info!("Configuration: {:?}", config);

    println!("{}", "Configuration:".cyan().bold());
    println!("  📁 Data directory:   {}", config.data.data_dir.display());
    println!("  🖼️  Image size:       {}px", config.data.image_size);
    if let Some(max) = config.data.max_samples {
        println!("  ✂️  Max samples:      {}", max);
    }
    println!(
        "  🔎 Search:           {} trials x {} executions, {} epochs",
        config.search.max_trials, config.search.executions_per_trial, config.search.epochs
    );
    println!(
        "  📅 Final training:   {} epochs, batch {}, {}",
        config.training.epochs,
        config.training.batch_size,
        config.training.lr_decay.description()
    );
    println!("  💾 Output directory: {}", config.output.output_dir.display());
    println!("  🖥️  Backend:          {}", backend_name());
    println!();
}

fn print_banner() {
    println!(
        "{}",
        r#"
 +----------------------------------------------------------------+
 |   🔬 Histopathologic Cancer Detection                           |
 |   Tissue Patch Classification with Burn + Rust                  |
 +----------------------------------------------------------------+
  "#
        .green()
    );
}
