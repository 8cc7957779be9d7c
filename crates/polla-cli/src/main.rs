// Copyright 2026 Polla Transparency Contributors
// SPDX-License-Identifier: MIT

//! `polla` command-line entry point.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use polla_ingest::config::parse_override;
use polla_ingest::{
    ArtifactStore, ConfigurationError, Ledger, Pipeline, PipelineConfig, PipelineError,
};

#[derive(Parser)]
#[command(
    name = "polla",
    about = "Polla: cross-checked ingestion of Chilean Loto jackpot data",
    version
)]
struct Cli {
    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines on stderr.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch, reconcile and publish (or quarantine) the current draw.
    Run(RunArgs),

    /// Print the latest ledger entry for a draw.
    Ledger {
        draw_id: u32,

        /// Artifact directory.
        #[arg(long, default_value = "artifacts")]
        output_dir: PathBuf,
    },

    /// Generate shell completion scripts.
    ///
    /// Examples:
    ///   polla completions bash > ~/.local/share/bash-completion/completions/polla
    ///   polla completions zsh > ~/.zfunc/_polla
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish).
        shell: Shell,
    },
}

#[derive(Args)]
struct RunArgs {
    /// JSON configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Artifact directory.
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Maximum tolerated relative deviation between sources.
    #[arg(long)]
    threshold: Option<f64>,

    /// Extra fetch attempts per source.
    #[arg(long)]
    retries: Option<u32>,

    /// Per-request timeout in seconds.
    #[arg(long)]
    timeout: Option<u64>,

    /// Abort on the first source failure.
    #[arg(long)]
    fail_fast: bool,

    /// Publish even when sources disagree.
    #[arg(long)]
    force_publish: bool,

    #[arg(long)]
    user_agent: Option<String>,

    /// Requests per second per host.
    #[arg(long)]
    rps: Option<f64>,

    /// Replace a source URL, as `source=url`. Repeatable.
    #[arg(long = "override", value_name = "SOURCE=URL")]
    overrides: Vec<String>,
}

impl RunArgs {
    /// Defaults, then file, then `POLLA_*` environment, then flags.
    fn into_config(self) -> Result<PipelineConfig, ConfigurationError> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::from_file(path)?,
            None => PipelineConfig::default(),
        };
        config.apply_env()?;

        if let Some(dir) = self.output_dir {
            config.output_dir = dir;
        }
        if let Some(t) = self.threshold {
            config.mismatch_threshold = t;
        }
        if let Some(r) = self.retries {
            config.retries = r;
        }
        if let Some(t) = self.timeout {
            config.timeout_secs = t;
        }
        if let Some(ua) = self.user_agent {
            config.user_agent = ua;
        }
        if self.rps.is_some() {
            config.requests_per_second = self.rps;
        }
        config.fail_fast |= self.fail_fast;
        config.force_publish |= self.force_publish;
        for raw in &self.overrides {
            let (source, url) = parse_override(raw)?;
            config.source_overrides.insert(source, url);
        }
        Ok(config)
    }
}

fn init_tracing(level: &str, json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.log_json);

    match cli.command {
        Commands::Run(args) => {
            tracing::info!(version = env!("CARGO_PKG_VERSION"), "polla run starting");
            let pipeline = match args
                .into_config()
                .map_err(PipelineError::from)
                .and_then(Pipeline::from_config)
            {
                Ok(p) => p,
                Err(e) => {
                    eprintln!("Error: {e}");
                    std::process::exit(e.exit_code());
                }
            };

            match pipeline.run().await {
                Ok(summary) => {
                    println!("{}", serde_json::to_string_pretty(&summary)?);
                }
                Err(e) => {
                    eprintln!("Error: {e}");
                    std::process::exit(e.exit_code());
                }
            }
        }

        Commands::Ledger {
            draw_id,
            output_dir,
        } => {
            let store = ArtifactStore::new(output_dir);
            let ledger = Ledger::open(store.ledger_path())
                .with_context(|| format!("cannot open ledger under {}", store.root().display()))?;
            match ledger.lookup(draw_id) {
                Some(entry) => println!("{}", serde_json::to_string_pretty(entry)?),
                None => {
                    eprintln!("No ledger entry for draw {draw_id}");
                    std::process::exit(1);
                }
            }
        }

        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "polla", &mut std::io::stdout());
        }
    }

    Ok(())
}
