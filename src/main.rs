//! Chatsumma CLI - organise pasted AI chats into a CSV
//!
//! The application logic is contained in lib.rs, and this file is responsible
//! for parsing arguments and handling top-level errors.

use anyhow::{bail, Context};
use chatsumma::{
    agent, export, splitter, ui, BatchError, BatchOptions, BatchProcessor, Config, Credentials,
    ProgressObserver,
};
use clap::{ArgAction, CommandFactory, Parser, Subcommand};
use colored::Colorize;
use std::future::Future;
use std::io::Read;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

const HOW_TO: &str = "\
Paste a chat, get a title, summary, tags, bullets and action items. Export as CSV.

1) Put your OpenAI API key in OPENAI_API_KEY (or chatsumma.toml), or paste it when asked.
2) Save one chat to a file, or many chats separated by a line with exactly five dashes:
       -----
3) Run `chatsumma process chats.txt`. Each chat becomes one CSV row.
4) Open organized_chats.csv in a spreadsheet. Use --append to keep adding to it.";

#[derive(Parser)]
#[command(name = "chatsumma")]
#[command(author, version, about = "Organise pasted AI chat transcripts into CSV", long_about = HOW_TO)]
struct Cli {
    /// Config file (defaults to chatsumma.toml in cwd or ~/.config/chatsumma)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// More log output (-v info, -vv debug); RUST_LOG overrides
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Summarise pasted chats and export them as CSV
    Process {
        /// File with the pasted chats, `-` for stdin; opens $EDITOR when omitted
        input: Option<String>,
        /// CSV destination (defaults to export.path from config)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Treat the whole input as one chat, without splitting on `-----`
        #[arg(long)]
        single: bool,
        /// Append rows to an existing CSV instead of replacing it
        #[arg(long)]
        append: bool,
        /// Print the records as JSON instead of formatted text
        #[arg(long)]
        json: bool,
    },
    /// Show how a paste splits into chats without calling the model
    Split {
        /// File with the pasted chats, `-` for stdin; opens $EDITOR when omitted
        input: Option<String>,
    },
    /// Generate shell completions
    Completions {
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Process {
            input,
            output,
            single,
            append,
            json,
        } => {
            let config = load_config(cli.config.as_deref())?;
            let raw = read_input(input.as_deref())?;
            if raw.trim().is_empty() {
                bail!(if single {
                    "Please paste a chat first."
                } else {
                    "Please paste something."
                });
            }

            let credentials = resolve_credentials(&config)?;
            let extractor = agent::build_extractor(&config)?;
            let processor = BatchProcessor::new(extractor, BatchOptions::from(&config.batch));

            let cancel = CancellationToken::new();
            let watcher = cancel.clone();
            tokio::spawn(async move {
                if second_interrupt(tokio::signal::ctrl_c, watcher).await {
                    eprintln!("{}", "Interrupted. No CSV was written.".red());
                    std::process::exit(130);
                }
            });

            let progress: &dyn ProgressObserver = &ui::TerminalProgress;
            let outcome = if single {
                processor
                    .process_single(&raw, &credentials, &cancel, Some(progress))
                    .await
            } else {
                processor
                    .process_batch(&raw, &credentials, &cancel, Some(progress))
                    .await
            };

            let result = match outcome {
                Ok(result) => result,
                Err(BatchError::Auth(err)) => {
                    bail!("{} No CSV was written.", err)
                }
                Err(err) => return Err(err.into()),
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                for record in &result {
                    println!("{}", ui::render_record(record));
                }
            }

            let path = output.unwrap_or_else(|| config.export.path.clone());
            if append {
                export::append_file(&path, &result, &config.export.separator)?;
            } else {
                export::write_file(&path, &result, &config.export.separator)?;
            }
            eprintln!(
                "{} {}",
                "⬇️  CSV written to".green(),
                path.display().to_string().bold()
            );
        }
        Commands::Split { input } => {
            let raw = read_input(input.as_deref())?;
            let chats = splitter::split(&raw);
            println!("Found {} chats.", chats.len());
            for (i, chat) in chats.iter().enumerate() {
                println!(
                    "  {} {}",
                    format!("{}.", i + 1).dimmed(),
                    chat.snippet(80).replace('\n', " ")
                );
            }
        }
        Commands::Completions { shell } => {
            clap_complete::generate(
                shell,
                &mut Cli::command(),
                "chatsumma",
                &mut std::io::stdout(),
            );
        }
    }

    Ok(())
}

fn init_tracing(verbose: u8) {
    use tracing_subscriber::prelude::*;

    let level = match verbose {
        0 => "warn",
        1 => "chatsumma=info,warn",
        _ => "chatsumma=debug,info",
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .init();
}

/// Cancel the batch on the first interrupt, then resolve `true` on a second one.
///
/// The signal handler owns SIGINT once installed, so quitting mid-call has to
/// be done by the caller.
async fn second_interrupt<F, Fut>(mut interrupt: F, cancel: CancellationToken) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::io::Result<()>>,
{
    if interrupt().await.is_err() {
        return false;
    }
    eprintln!(
        "{}",
        "Cancelling after the chats in flight finish (Ctrl-C again to quit now)...".yellow()
    );
    cancel.cancel();
    interrupt().await.is_ok()
}

fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    let config = match path {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::load()?,
    };
    Ok(config)
}

/// Read pasted chats from a file, stdin, or the user's editor.
fn read_input(input: Option<&str>) -> anyhow::Result<String> {
    match input {
        Some("-") => read_stdin(),
        Some(path) => {
            std::fs::read_to_string(path).with_context(|| format!("reading {}", path))
        }
        None if atty::is(atty::Stream::Stdin) => {
            edit::edit("").context("opening editor to paste chats")
        }
        None => read_stdin(),
    }
}

fn read_stdin() -> anyhow::Result<String> {
    let mut raw = String::new();
    std::io::stdin()
        .read_to_string(&mut raw)
        .context("reading chats from stdin")?;
    Ok(raw)
}

/// Use the configured API key, or ask for it once when running interactively.
fn resolve_credentials(config: &Config) -> anyhow::Result<Credentials> {
    match config.api_key() {
        Ok(key) => Ok(Credentials::new(key)),
        Err(err) if atty::is(atty::Stream::Stdin) => {
            tracing::debug!(error = %err, "No API key configured, prompting");
            let key = dialoguer::Password::new()
                .with_prompt(format!("{} API key", config.agent.provider))
                .interact()?;
            Ok(Credentials::new(key))
        }
        Err(err) => Err(err.into()),
    }
}
