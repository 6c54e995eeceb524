//! webshelf CLI - download a web novel as an EPUB.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use webshelf::config::{Config, ScrapeOptions};
use webshelf::console::{Console, Style};
use webshelf::epub::read_manifest;
use webshelf::pipeline::{RunSummary, Session};
use webshelf::scrapers::ScraperRegistry;

/// Web novel downloader producing EPUB books.
///
/// `webshelf <URL>` builds a new book; the subcommands work on books it
/// already wrote.
#[derive(Parser, Debug)]
#[command(name = "webshelf")]
#[command(author, version, about, long_about = None)]
#[command(subcommand_negates_reqs = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    create: CreateArgs,

    /// Config file to use instead of the default location.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log per-request detail to stderr.
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Args, Debug)]
struct CreateArgs {
    /// URL of the novel's landing page.
    #[arg(required = true)]
    novel_url: Option<String>,

    /// Where to write the EPUB (default: <output_directory>/<title>.epub).
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Only fetch the first N chapters.
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    chapter_limit: Option<u32>,

    /// Use this image as the cover instead of the site's.
    #[arg(long)]
    cover_url: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Add newly published chapters to a book and retry its placeholders.
    Update {
        /// A book written by webshelf.
        epub: PathBuf,

        /// Add at most N new chapters.
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
        limit: Option<u32>,
    },

    /// Replace the cover image of a book.
    SetCover {
        /// A book written by webshelf.
        epub: PathBuf,

        /// Image URL or path to a local image file.
        cover: String,
    },

    /// Print what a book contains.
    Info {
        /// A book written by webshelf.
        epub: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let console = Arc::new(Console::new());

    console.section("webshelf - Web Novel Downloader");

    console.step("Loading configuration...");
    let config = match &cli.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
    .context("Failed to load configuration")?;

    init_logging(cli.verbose || config.scraping.debug);

    let mut options = ScrapeOptions::from_config(&config).context("Invalid configuration")?;
    console.success("Configuration loaded");

    let registry = ScraperRegistry::with_default_scrapers().context("Failed to register scrapers")?;

    match cli.command {
        None => {
            let url = cli.create.novel_url.context("A novel URL is required")?;
            options.chapter_limit = cli.create.chapter_limit.map(|n| n as usize);
            options.cover_url = cli.create.cover_url;

            let session = open_session(&registry, options, &console)?;
            console.step(&format!("Fetching {}", url));
            let summary = session
                .run(&url, cli.create.output.as_deref())
                .await
                .with_context(|| format!("Failed to download {}", url))?;
            print_summary(&console, &summary);
        }
        Some(Command::Update { epub, limit }) => {
            let session = open_session(&registry, options, &console)?;
            console.step(&format!("Updating {}", epub.display()));
            let update = session
                .update(&epub, limit.map(|n| n as usize))
                .await
                .with_context(|| format!("Failed to update {}", epub.display()))?;

            match update.run {
                Some(summary) => {
                    console.info(&format!(
                        "{} new chapters, {} placeholders retried",
                        update.added, update.retried
                    ));
                    print_summary(&console, &summary);
                }
                None => console.success("Already up to date"),
            }
        }
        Some(Command::SetCover { epub, cover }) => {
            let session = open_session(&registry, options, &console)?;
            console.step(&format!("Setting cover of {}", epub.display()));
            let summary = session
                .set_cover(&epub, &cover)
                .await
                .with_context(|| format!("Failed to set cover of {}", epub.display()))?;
            console.success(&format!("Wrote {}", summary.path.display()));
        }
        Some(Command::Info { epub }) => print_info(&console, &epub)?,
    }
    Ok(())
}

/// Creates the session and lets Ctrl-C cancel it.
fn open_session<'r>(
    registry: &'r ScraperRegistry,
    options: ScrapeOptions,
    console: &Arc<Console>,
) -> Result<Session<'r>> {
    let session = Session::new(registry, options)
        .context("Failed to set up HTTP session")?
        .with_sink(console.clone());

    let token = session.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            token.cancel();
        }
    });
    Ok(session)
}

fn print_summary(console: &Console, summary: &RunSummary) {
    console.report(&summary.report);
    console.section("Done!");
    console.info(&format!(
        "{} sections, {} images",
        summary.document.sections.len(),
        summary.document.assets.len()
    ));
}

fn print_info(console: &Console, epub: &Path) -> Result<()> {
    let document =
        read_manifest(epub).with_context(|| format!("Failed to read {}", epub.display()))?;
    let meta = &document.metadata;

    let rows = [
        ("Title", meta.title.clone()),
        ("Author", meta.author.clone().unwrap_or_else(|| "-".to_string())),
        ("Site", meta.site.clone()),
        ("Source", meta.source_url.clone()),
        ("Status", meta.status.as_str().to_string()),
        ("Chapters", document.sections.len().to_string()),
        ("Placeholders", document.placeholders().count().to_string()),
        ("Images", document.assets.len().to_string()),
        ("Cover", (if document.cover().is_some() { "yes" } else { "no" }).to_string()),
        ("Modified", meta.modified.clone()),
    ];
    let width = rows.iter().map(|(key, _)| key.len()).max().unwrap_or(0);

    console.section(&format!("Info for {}", epub.display()));
    for (key, value) in rows {
        let key = format!("{:width$}", key, width = width);
        println!("  {}  {}", console.style(&key, &[Style::Bold]), value);
    }
    Ok(())
}

/// Installs the stderr subscriber. `RUST_LOG` wins over the defaults.
fn init_logging(verbose: bool) {
    let default = if verbose { "webshelf=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
