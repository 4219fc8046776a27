//! nasdex - media indexing and search for a personal NAS.
//!
//! Usage:
//!   nasdex scan [PATH]        Walk the library (or PATH) into the index
//!   nasdex add PATH           Index one file or directory now
//!   nasdex rm PATH            Forget a file or directory
//!   nasdex search QUERY       Search names and paths
//!   nasdex list               Sorted listing by type
//!   nasdex rebuild            Rebuild the search index
//!   nasdex --help             Show help

use std::path::PathBuf;

use chrono::{Local, TimeZone};
use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::eyre::{Context, Result, bail};
use tracing_subscriber::EnvFilter;

use nasdex::{
    IndexKind, LibraryConfig, MediaLibrary, MediaRecord, MediaType, ScanState, SearchFilters,
    resolve_path,
};

#[derive(Parser)]
#[command(
    name = "nasdex",
    version,
    about = "Media indexing and search for a personal NAS",
    long_about = "nasdex keeps a searchable index of the media on your NAS.\n\n\
                  Run `nasdex scan` to index the library, `nasdex rebuild` to \
                  refresh the search index, then `nasdex search QUERY`."
)]
struct Cli {
    /// Config file (defaults to <config dir>/nasdex/config.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Override the library root
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Walk a directory tree into the index
    Scan {
        /// Directory to scan (defaults to the library root)
        path: Option<PathBuf>,

        /// Rebuild the search index once the scan completes
        #[arg(short, long)]
        rebuild: bool,

        /// Suppress per-second progress lines
        #[arg(short, long)]
        quiet: bool,
    },

    /// Index one file or directory immediately
    Add {
        path: PathBuf,
    },

    /// Remove a file, or everything under a directory, from the index
    Rm {
        path: PathBuf,
    },

    /// Search file names and paths (`ids:a,b` looks up ids directly)
    Search {
        /// Query text (empty lists everything)
        #[arg(default_value = "")]
        query: String,

        /// Only this media type (audio, video, image, other)
        #[arg(short = 't', long = "type")]
        media_type: Option<MediaType>,

        /// Only trashed (`true`) or only live (`false`) files
        #[arg(long)]
        trash: Option<bool>,

        /// Only files under this directory (repeatable)
        #[arg(short, long = "under")]
        under: Vec<String>,

        #[arg(long, default_value = "0")]
        offset: usize,

        /// Maximum results (0 = unlimited)
        #[arg(short = 'n', long, default_value = "50")]
        limit: usize,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// List one media type in index order
    List {
        #[arg(short = 't', long = "type", default_value = "video")]
        media_type: MediaType,

        /// List trashed files instead of live ones
        #[arg(long)]
        trash: bool,

        #[arg(short, long, default_value = "name")]
        sort: SortOrder,

        #[arg(long, default_value = "0")]
        offset: usize,

        #[arg(short = 'n', long, default_value = "50")]
        limit: usize,

        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Show one record by id, or by path with --path
    Get {
        target: String,

        /// Treat TARGET as a path
        #[arg(short, long)]
        path: bool,
    },

    /// Rebuild the on-disk search index
    Rebuild,

    /// Delete every record and the search index
    Reset {
        /// Skip the confirmation guard
        #[arg(long)]
        yes: bool,
    },

    /// Show record and index counts
    Stats,
}

#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SortOrder {
    Id,
    Newest,
    Oldest,
    Name,
    NameDesc,
    Largest,
    Smallest,
}

impl From<SortOrder> for IndexKind {
    fn from(order: SortOrder) -> Self {
        match order {
            SortOrder::Id => IndexKind::Uuid,
            SortOrder::Newest => IndexKind::ModDesc,
            SortOrder::Oldest => IndexKind::Mod,
            SortOrder::Name => IndexKind::Name,
            SortOrder::NameDesc => IndexKind::NameDesc,
            SortOrder::Largest => IndexKind::SizeDesc,
            SortOrder::Smallest => IndexKind::Size,
        }
    }
}

fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("nasdex=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    let library = MediaLibrary::open(config).context("Failed to open media library")?;

    match cli.command {
        Command::Scan {
            path,
            rebuild,
            quiet,
        } => runtime.block_on(run_scan(&library, path, rebuild, quiet))?,
        Command::Add { path } => {
            let indexed = library
                .scan_file(&path)
                .with_context(|| format!("Failed to index {}", path.display()))?;
            println!("Indexed {indexed} file(s)");
        }
        Command::Rm { path } => {
            let removed = library.remove_path(&path)?;
            println!("Removed {} record(s)", removed.len());
        }
        Command::Search {
            query,
            media_type,
            trash,
            under,
            offset,
            limit,
            format,
        } => {
            let mut filters = SearchFilters {
                media_type,
                trash,
                ..SearchFilters::default()
            };
            for prefix in &under {
                let resolved = resolve_path(prefix)
                    .with_context(|| format!("Cannot resolve {prefix}"))?;
                filters = filters.under(&resolved);
            }
            let records = library.search(&query, &filters, offset, limit)?;
            print_records(&records, format)?;
        }
        Command::List {
            media_type,
            trash,
            sort,
            offset,
            limit,
            format,
        } => {
            let records = library.list(media_type, trash, sort.into(), offset, limit)?;
            print_records(&records, format)?;
        }
        Command::Get { target, path } => {
            let record = if path {
                library.get_by_path(&target)?
            } else {
                library.get_by_id(&target)?
            };
            match record {
                Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
                None => bail!("No record for {target}"),
            }
        }
        Command::Rebuild => {
            let stats = library.rebuild_index().context("Index rebuild failed")?;
            println!(
                "Indexed {} documents, {} terms in {:.2}s",
                stats.documents,
                stats.total_terms(),
                stats.elapsed.as_secs_f64()
            );
            for (artifact, terms) in &stats.terms {
                println!("  {artifact:<12} {terms:>10} terms");
            }
        }
        Command::Reset { yes } => {
            if !yes {
                bail!("Refusing to delete all records without --yes");
            }
            let removed = library.reset_data()?;
            println!("Removed {removed} keys");
        }
        Command::Stats => run_stats(&library)?,
    }

    Ok(())
}

/// Config file, then command-line overrides.
fn load_config(cli: &Cli) -> Result<LibraryConfig> {
    let mut config = match &cli.config {
        Some(path) => LibraryConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => match LibraryConfig::default_path().filter(|path| path.exists()) {
            Some(path) => LibraryConfig::load(&path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => {
                let root = std::env::current_dir().context("Invalid working directory")?;
                LibraryConfig::new(LibraryConfig::default_data_dir(), root)
            }
        },
    };

    if let Some(data_dir) = &cli.data_dir {
        config.data_dir = data_dir.clone();
    }
    if let Some(root) = &cli.root {
        config.library_root = root.clone();
    }
    Ok(config)
}

async fn run_scan(
    library: &MediaLibrary,
    path: Option<PathBuf>,
    rebuild: bool,
    quiet: bool,
) -> Result<()> {
    let root = path.unwrap_or_else(|| library.config().library_root.clone());
    eprintln!("Scanning {}...", root.display());

    let mut progress_rx = library.subscribe();
    let reporter = tokio::spawn(async move {
        while let Ok(progress) = progress_rx.recv().await {
            if !quiet && progress.state == ScanState::Running {
                eprintln!(
                    "  {:>8} / {:<8} {:>5.1}%  {:>8.0} files/s",
                    progress.indexed,
                    progress.total,
                    progress.percent(),
                    progress.files_per_second()
                );
            }
        }
    });

    let handle = library
        .start_scan(&root)
        .with_context(|| format!("Cannot scan {}", root.display()))?;
    let result = handle.await?;
    reporter.abort();

    let summary = match result {
        Ok(summary) => summary,
        Err(err) if err.is_cancelled() => {
            eprintln!("Scan stopped");
            return Ok(());
        }
        Err(err) => return Err(err).context("Scan failed"),
    };

    println!();
    println!("{}", "─".repeat(60));
    println!(" {}", summary.root.display());
    println!(
        " {} files indexed ({} discovered)",
        summary.indexed, summary.discovered
    );
    println!(" Scanned in {:.2}s", summary.elapsed.as_secs_f64());
    println!("{}", "─".repeat(60));

    if let Some(report) = library.wait_for_cleanup().await? {
        println!(
            " Cleanup removed {} stale record(s), {} tag(s)",
            report.removed, report.tags_pruned
        );
    }

    if rebuild {
        let stats = library.rebuild_index().context("Index rebuild failed")?;
        println!(
            " Search index: {} documents, {} terms",
            stats.documents,
            stats.total_terms()
        );
    }

    Ok(())
}

fn run_stats(library: &MediaLibrary) -> Result<()> {
    // (live files, live bytes, trashed files) per media type
    let mut totals = [(0u64, 0u64, 0u64); MediaType::ALL.len()];
    for record in library.store().records() {
        let record = record?;
        let Some(slot) = MediaType::ALL.iter().position(|mt| *mt == record.media_type) else {
            continue;
        };
        if record.is_trash {
            totals[slot].2 += 1;
        } else {
            totals[slot].0 += 1;
            totals[slot].1 += record.size;
        }
    }

    println!("{}", "─".repeat(60));
    println!(" Data directory: {}", library.config().data_dir.display());
    println!(" Library root:   {}", library.config().library_root.display());
    println!(" Records:        {}", library.count_records()?);
    for (media_type, (live, bytes, trashed)) in MediaType::ALL.iter().zip(totals) {
        println!(
            "   {:<6} {:>8} files {:>10}  ({} in trash)",
            media_type.to_string(),
            live,
            format_size(bytes),
            trashed
        );
    }
    println!(" Scan state:     {}", library.progress().state);
    println!("{}", "─".repeat(60));
    Ok(())
}

fn print_records(records: &[MediaRecord], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => {
            if records.is_empty() {
                println!(" No matches.");
            }
            for record in records {
                println!(
                    " {:<6} {:>10}  {}  {}{}",
                    record.media_type.to_string(),
                    format_size(record.size),
                    format_time(record.modified_at),
                    record.path,
                    if record.is_trash { "  (trash)" } else { "" }
                );
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(records)?);
        }
    }
    Ok(())
}

/// Format size in human-readable form.
fn format_size(bytes: u64) -> String {
    humansize::format_size(bytes, humansize::BINARY)
}

/// Local date and time for a Unix timestamp.
fn format_time(seconds: i64) -> String {
    match Local.timestamp_opt(seconds, 0).single() {
        Some(time) => time.format("%Y-%m-%d %H:%M").to_string(),
        None => "-".to_string(),
    }
}
