use std::path::PathBuf;

use anyhow::Context;
use burn::backend::{Autodiff, NdArray};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use hyperclf::model::Architecture;
use hyperclf::search::{RandomSearch, SearchSpace, TrainingObjective};
use hyperclf::training::{self, Datasets, TrainMode, TrainingConfig};

type TrainBackend = Autodiff<NdArray<f32>>;

#[derive(Parser, Debug)]
#[command(name = "hyperclf", version, about = "Train CIFAR-10 classifiers and search their hyperparameters")]
struct Cli {
    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Train a single model
    Train(TrainArgs),
    /// Random search over learning rate, L2, momentum, slack and patience
    Search(SearchArgs),
}

#[derive(clap::Args, Debug)]
struct TrainArgs {
    /// JSON training config; flags given on the command line override it
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    batch_size: Option<usize>,

    #[arg(long)]
    valid_batch_size: Option<usize>,

    #[arg(long)]
    epochs: Option<usize>,

    #[arg(long)]
    lr: Option<f64>,

    /// L2 weight decay coefficient
    #[arg(long)]
    l2: Option<f64>,

    #[arg(long)]
    momentum: Option<f64>,

    /// Epochs to wait before halving the learning rate
    #[arg(long)]
    patience: Option<usize>,

    /// Nadir point multiplier, must be greater than 1
    #[arg(long)]
    slack: Option<f64>,

    #[arg(long, value_enum)]
    train_mode: Option<TrainMode>,

    #[arg(long, value_enum)]
    model: Option<Architecture>,

    /// Completed-epoch count of the checkpoint to resume from
    #[arg(long)]
    checkpoint_epoch: Option<usize>,

    /// Directory for checkpoints
    #[arg(long)]
    checkpoint_path: Option<PathBuf>,

    #[arg(long)]
    save_every: Option<usize>,

    /// Disable checkpointing
    #[arg(long)]
    no_cp: bool,

    /// Directory with the CIFAR-10 binary batches
    #[arg(long)]
    data_path: Option<PathBuf>,

    #[arg(long)]
    n_workers: Option<usize>,

    #[arg(long)]
    seed: Option<u64>,
}

impl TrainArgs {
    fn into_config(self) -> anyhow::Result<TrainingConfig> {
        let mut config = match &self.config {
            Some(path) => TrainingConfig::load(path)
                .with_context(|| format!("reading config {}", path.display()))?,
            None => TrainingConfig::default(),
        };

        if let Some(v) = self.batch_size {
            config.batch_size = v;
        }
        if let Some(v) = self.valid_batch_size {
            config.valid_batch_size = v;
        }
        if let Some(v) = self.epochs {
            config.num_epochs = v;
        }
        if let Some(v) = self.lr {
            config.learning_rate = v;
        }
        if let Some(v) = self.l2 {
            config.weight_decay = v;
        }
        if let Some(v) = self.momentum {
            config.momentum = v;
        }
        if let Some(v) = self.patience {
            config.patience = v;
        }
        if let Some(v) = self.slack {
            config.slack = v;
        }
        if let Some(v) = self.train_mode {
            config.train_mode = v;
        }
        if let Some(v) = self.model {
            config.architecture = v;
        }
        if self.checkpoint_epoch.is_some() {
            config.checkpoint_epoch = self.checkpoint_epoch;
        }
        if let Some(v) = self.checkpoint_path {
            config.checkpoint_dir = v;
        }
        if let Some(v) = self.save_every {
            config.save_every = v;
        }
        if self.no_cp {
            config.checkpointing = false;
        }
        if let Some(v) = self.data_path {
            config.data_path = v;
        }
        if let Some(v) = self.n_workers {
            config.num_workers = v;
        }
        if let Some(v) = self.seed {
            config.seed = v;
        }

        config.validate()?;
        Ok(config)
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ModelChoice {
    Vgg,
    Resnet,
    Densenet,
    All,
}

impl ModelChoice {
    fn choices(self) -> Vec<Architecture> {
        match self {
            ModelChoice::Vgg => vec![Architecture::Vgg],
            ModelChoice::Resnet => vec![Architecture::Resnet],
            ModelChoice::Densenet => vec![Architecture::Densenet],
            ModelChoice::All => Architecture::ALL.to_vec(),
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ModeChoice {
    Vanilla,
    Hyper,
    All,
}

impl ModeChoice {
    fn choices(self) -> Vec<TrainMode> {
        match self {
            ModeChoice::Vanilla => vec![TrainMode::Vanilla],
            ModeChoice::Hyper => vec![TrainMode::Hyper],
            ModeChoice::All => TrainMode::ALL.to_vec(),
        }
    }
}

#[derive(clap::Args, Debug)]
struct SearchArgs {
    /// Maximum number of training runs
    #[arg(long, default_value_t = 100)]
    budget: usize,

    #[arg(long, value_enum, default_value = "resnet")]
    model: ModelChoice,

    #[arg(long, value_enum, default_value = "all")]
    train_mode: ModeChoice,

    #[arg(long, default_value_t = 200)]
    epochs: usize,

    #[arg(long, default_value_t = 24)]
    batch_size: usize,

    #[arg(long, default_value_t = 16)]
    valid_batch_size: usize,

    #[arg(long, default_value_t = 4)]
    n_workers: usize,

    #[arg(long, default_value = "data")]
    data_path: PathBuf,

    #[arg(long, default_value = "checkpoints")]
    checkpoint_path: PathBuf,

    #[arg(long, default_value_t = 42)]
    seed: u64,
}

fn run_train(args: TrainArgs) -> anyhow::Result<()> {
    let config = args.into_config()?;
    let device = Default::default();
    let datasets = Datasets::cifar10(&config).context("loading CIFAR-10")?;

    let outcome = training::run::<TrainBackend>(&config, &datasets, &device)?;

    std::fs::create_dir_all(&config.checkpoint_dir)?;
    let csv_path = config.checkpoint_dir.join("training_history.csv");
    outcome.history.save_csv(&csv_path)?;
    info!(path = %csv_path.display(), "History written");

    if let Some((epoch, err)) = outcome.history.best_error_rate() {
        info!(epoch, error_rate = err, "Best validation error rate");
    }
    if let Some((epoch, eer)) = outcome.history.best_eer() {
        info!(epoch, eer, "Best validation EER");
    }
    Ok(())
}

fn run_search(args: SearchArgs) -> anyhow::Result<()> {
    let base = TrainingConfig {
        num_epochs: args.epochs,
        batch_size: args.batch_size,
        valid_batch_size: args.valid_batch_size,
        num_workers: args.n_workers,
        data_path: args.data_path,
        checkpoint_dir: args.checkpoint_path,
        seed: args.seed,
        ..TrainingConfig::default()
    };
    std::fs::create_dir_all(&base.checkpoint_dir)?;

    let space = SearchSpace::new(args.model.choices(), args.train_mode.choices())?;
    let datasets = Datasets::cifar10(&base).context("loading CIFAR-10")?;
    let mut objective = TrainingObjective::<TrainBackend>::new(base, datasets, Default::default());

    let mut search = RandomSearch::new(space, args.budget, args.seed);
    match search.optimize(&mut objective) {
        Some(outcome) => {
            info!(cost = outcome.best.cost, trials = outcome.trials.len(), "Best parameters found");
            println!("{}", outcome.best.params);
            println!("error rate: {:.4}", outcome.best.cost);
        }
        None => info!("Budget is zero, nothing evaluated"),
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    match cli.command {
        Commands::Train(args) => run_train(args),
        Commands::Search(args) => run_search(args),
    }
}
