use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

use bookmarker::protocol::Dispatcher;
use bookmarker::rules::{CompiledEntry, EntryPath};
use bookmarker::store::BookmarkStore;
use bookmarker::{validator, Bookmarker, FileOptions, MemoryStore, Options};

#[derive(Parser)]
#[command(name = "bookmarker")]
#[command(about = "File bookmarks into folders by URL rules", long_about = None)]
#[command(version)]
struct Cli {
    /// Options file (JSON)
    #[arg(short, long, global = true, default_value = "bookmarker.json")]
    config: PathBuf,

    /// Bookmark tree file (JSON), created on first save
    #[arg(short, long, global = true, default_value = "bookmarks.json")]
    bookmarks: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the entry that governs a URL
    Match {
        url: String,
    },

    /// Show the indicator state and title for a URL
    State {
        url: String,
    },

    /// Bookmark a URL under one of its entry's paths
    Add {
        url: String,

        /// Bookmark title (defaults to the URL)
        #[arg(short, long)]
        title: Option<String>,

        /// Path title to file under (defaults to the entry's default path)
        #[arg(short, long)]
        path: Option<String>,
    },

    /// Move a bookmark to another path of its entry
    Move {
        id: String,

        /// Path title to move to
        #[arg(short, long)]
        path: String,
    },

    /// Remove a bookmark
    Remove {
        id: String,
    },

    /// List compiled entries with their resolved paths
    ListRules,

    /// Check options for invalid patterns, parameters and steps
    Validate {
        /// Show the reason for every finding
        #[arg(short, long)]
        detailed: bool,
    },

    /// Answer JSON requests read line by line from stdin
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Stdout carries command output, so logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Match { url } => {
            let (_store, bookmarker) = open(&cli.config, &cli.bookmarks).await?;
            match bookmarker.get_entry_matching(&url)? {
                Some(entry) => println!("{}", serde_json::to_string_pretty(&entry.summary())?),
                None => println!("No entry matches {}", url),
            }
        }

        Commands::State { url } => {
            let (_store, bookmarker) = open(&cli.config, &cli.bookmarks).await?;
            let state = bookmarker.get_state_and_title_for(&url).await?;
            println!("{}", serde_json::to_string_pretty(&state)?);
        }

        Commands::Add { url, title, path } => {
            let (store, bookmarker) = open(&cli.config, &cli.bookmarks).await?;
            let entry = bookmarker
                .get_entry_matching(&url)?
                .with_context(|| format!("no entry matches {}", url))?;
            let path = pick_path(&entry, path.as_deref())?;
            let title = title.unwrap_or_else(|| url.clone());

            let created = bookmarker.add(&url, &title, &entry, &path, None).await?;
            save(&store, &cli.bookmarks).await?;
            info!("✅ Bookmark {} added", created.id);
            println!("{}", serde_json::to_string_pretty(&created)?);
        }

        Commands::Move { id, path } => {
            let (store, bookmarker) = open(&cli.config, &cli.bookmarks).await?;
            let bookmark = store.get(&id).await?;
            let url = bookmark
                .url
                .with_context(|| format!("node {} is not a bookmark", id))?;
            let entry = bookmarker
                .get_entry_matching(&url)?
                .with_context(|| format!("no entry matches {}", url))?;
            let path = pick_path(&entry, Some(&path))?;

            let moved = bookmarker.move_bookmark(&id, &path).await?;
            save(&store, &cli.bookmarks).await?;
            info!("✅ Bookmark {} moved", moved.id);
            println!("{}", serde_json::to_string_pretty(&moved)?);
        }

        Commands::Remove { id } => {
            let (store, bookmarker) = open(&cli.config, &cli.bookmarks).await?;
            bookmarker.remove(&id).await?;
            save(&store, &cli.bookmarks).await?;
            info!("✅ Bookmark {} removed", id);
        }

        Commands::ListRules => {
            let (_store, bookmarker) = open(&cli.config, &cli.bookmarks).await?;
            print_rules(&bookmarker);
        }

        Commands::Validate { detailed } => {
            info!("🔍 Validating options in {:?}", cli.config);
            let options = Options::load(&cli.config)
                .await
                .with_context(|| format!("Failed to read options from {:?}", cli.config))?;
            let report = validator::validate(&options);
            println!("{}", report.format(detailed));
            if !report.is_valid() {
                bail!("{} invalid option(s)", report.errors().len());
            }
        }

        Commands::Serve => {
            let (store, bookmarker) = open(&cli.config, &cli.bookmarks).await?;
            serve(store, bookmarker, &cli.bookmarks).await?;
        }
    }

    Ok(())
}

async fn open(config: &Path, bookmarks: &Path) -> Result<(Arc<MemoryStore>, Arc<Bookmarker>)> {
    let store = Arc::new(
        MemoryStore::load(bookmarks)
            .await
            .with_context(|| format!("Failed to read bookmarks from {:?}", bookmarks))?,
    );
    let options = Arc::new(FileOptions::new(config));
    let bookmarker = Bookmarker::init(store.clone(), options)
        .await
        .with_context(|| format!("Failed to compile options from {:?}", config))?;
    Ok((store, Arc::new(bookmarker)))
}

async fn save(store: &MemoryStore, bookmarks: &Path) -> Result<()> {
    store
        .save(bookmarks)
        .await
        .with_context(|| format!("Failed to write bookmarks to {:?}", bookmarks))
}

fn pick_path(entry: &CompiledEntry, title: Option<&str>) -> Result<EntryPath> {
    match title {
        Some(title) => entry
            .paths
            .iter()
            .find(|p| p.title == title)
            .cloned()
            .with_context(|| format!("entry {} has no path titled '{}'", entry.key, title)),
        None => entry
            .default_path()
            .or_else(|| entry.paths.first())
            .cloned()
            .with_context(|| format!("entry {} has no paths", entry.key)),
    }
}

fn print_rules(bookmarker: &Bookmarker) {
    let rules = bookmarker.rules();
    println!("\n📋 Bookmarker Entries (version {})", rules.version());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n");

    for entry in rules.entries() {
        let area = if entry.area.is_empty() { "(unnamed)" } else { entry.area.as_str() };
        println!("{} [{}] {}", entry.key, area, entry.regex.as_str());
        if !entry.parameters.is_empty() {
            let params: Vec<String> = entry.parameters.iter().map(|p| p.to_string()).collect();
            println!("    Parameters: {}", params.join(", "));
        }
        for path in &entry.paths {
            let marker = if path.is_default { "⭐" } else { "•" };
            println!("    {} {} -> {}", marker, path.title, path.display_path());
        }
        for step in &entry.and_then {
            println!("    ↪ {}", step.kind().name);
        }
    }

    println!("\n📊 Total: {} entries\n", rules.len());
}

const MUTATING_ACTIONS: [&str; 3] = ["bookmarks--add", "bookmarks--move", "bookmarks--remove"];

async fn serve(store: Arc<MemoryStore>, bookmarker: Arc<Bookmarker>, bookmarks: &Path) -> Result<()> {
    info!("🚀 Serving requests on stdin");
    let dispatcher = Dispatcher::new(bookmarker);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let response = dispatcher.dispatch_json(&line).await;
        if response.is_ok() && MUTATING_ACTIONS.contains(&response.response.as_str()) {
            save(&store, bookmarks).await?;
        }
        println!("{}", serde_json::to_string(&response)?);
    }

    info!("✅ Input closed, stopping");
    Ok(())
}
