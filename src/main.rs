use std::io;

use anyhow::{bail, Result};
use camino::{Utf8Path, Utf8PathBuf};
use clap::Parser;
use clap_verbosity_flag::{Verbosity, WarnLevel};
use tracing::{debug, trace_span};
use tracing_futures::Instrument;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod auth;
mod config;
mod drive;
mod extract;
mod search;
mod session;
mod shell;
mod summary;
mod types;

use config::{validate_config, Config};
use shell::{Command, Shell};
use types::Category;

#[derive(Debug, Parser)]
#[clap(
    name = "drive-copilot",
    about = "Search the contents of your Google Drive from the terminal."
)]
enum DriveCopilot {
    /// Start an interactive session.
    Shell {
        #[clap(short, long)]
        config_path: Utf8PathBuf,

        #[clap(flatten)]
        verbose: Verbosity<WarnLevel>,
    },

    /// Log in, run a single search, and print the summary.
    Search {
        #[clap(short, long)]
        config_path: Utf8PathBuf,

        /// Restrict the search to all, images, documents or spreadsheets.
        #[clap(long, default_value = "all")]
        category: Category,

        /// Words to search for.
        #[clap(required = true)]
        query: Vec<String>,

        #[clap(flatten)]
        verbose: Verbosity<WarnLevel>,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = DriveCopilot::parse();

    match args {
        DriveCopilot::Shell {
            config_path,
            verbose,
        } => {
            init_logging(&verbose);
            let cfg = load_config(&config_path)?;
            Shell::new(cfg, io::stdout()).run().await?;
        }
        DriveCopilot::Search {
            config_path,
            category,
            query,
            verbose,
        } => {
            init_logging(&verbose);
            let cfg = load_config(&config_path)?;
            let query = query.join(" ");
            let span = trace_span!("search_once", query = query.as_str());
            search_once(cfg, category, &query).instrument(span).await?;
        }
    }

    Ok(())
}

/// RUST_LOG wins when set; otherwise the -v/-q flags pick this crate's level.
fn init_logging(verbose: &Verbosity<WarnLevel>) {
    if let Some(log_level) = verbose.log_level() {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "drive_copilot={}",
                log_level.to_string().to_lowercase()
            ))
        });
        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(io::stderr))
            .with(filter)
            .init();
    }
}

fn load_config(config_path: &Utf8Path) -> Result<Config> {
    let cfg = Config::load(config_path)?;
    debug!("loaded config from {config_path}");

    if !validate_config(&cfg) {
        bail!("Config didn't validate.");
    }
    Ok(cfg)
}

async fn search_once(cfg: Config, category: Category, query: &str) -> Result<()> {
    if !cfg.google.listen_for_callback {
        bail!("A one-shot search needs google.listen_for_callback enabled; use the shell instead.");
    }

    let mut shell = Shell::new(cfg, io::stdout());
    shell.handle(Command::Filter(category)).await?;
    shell.handle(Command::Login).await?;
    if !shell.session().is_authenticated() {
        bail!("Not connected to Google Drive.");
    }
    shell.handle(Command::Search(query.to_owned())).await?;

    Ok(())
}
