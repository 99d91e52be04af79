mod cmd;
mod output;

use clap::{Parser, Subcommand};
use cmd::config::ConfigSubcommand;
use cmd::run::{RunArgs, RunExit};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "pipemend",
    about = "Generate CI pipelines for GitHub repositories and heal them when they fail",
    version,
    propagate_version = true
)]
struct Cli {
    /// Config file (default: $PIPEMEND_CONFIG, ./pipemend.yaml, ~/.config/pipemend/config.yaml)
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_file: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    /// Verbose logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect, generate, commit, monitor, and heal a repository's CI workflow
    Run(RunArgs),

    /// Classify a failure message offline
    Classify {
        /// Name of the step that failed
        #[arg(long, default_value = "")]
        step: String,
        /// Error text or log excerpt
        text: String,
    },

    /// Validate a workflow file offline and score its risk
    Validate {
        /// Workflow YAML file
        file: PathBuf,
        /// Generation confidence used in the risk score
        #[arg(long, default_value_t = 0.9, value_parser = cmd::validate::parse_confidence)]
        confidence: f64,
    },

    /// Inspect and check configuration
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.debug {
        tracing::Level::DEBUG
    } else {
        match &cli.command {
            Commands::Run(_) => tracing::Level::INFO,
            _ => tracing::Level::WARN,
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config_path = cli.config_file.as_deref();

    let result = match cli.command {
        Commands::Run(args) => cmd::run::run(config_path, args, cli.json),
        Commands::Classify { step, text } => cmd::classify::run(&step, &text, cli.json),
        Commands::Validate { file, confidence } => {
            cmd::validate::run(config_path, &file, confidence, cli.json)
        }
        Commands::Config { subcommand } => cmd::config::run(config_path, subcommand, cli.json),
    };

    if let Err(e) = result {
        if let Some(exit) = e.downcast_ref::<RunExit>() {
            if !matches!(exit, RunExit::Interrupted) {
                eprintln!("error: {exit}");
            }
            std::process::exit(exit.exit_code());
        }
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
