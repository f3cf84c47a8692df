use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use managedb::tutorial::{self, Listing};
use managedb::{CascadeSet, InMemoryRowStore, PersistenceConfig, RowStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "managedb-tutorial")]
#[command(about = "Runs the entity manager listings against an in-memory row store")]
struct Cli {
    /// Snapshot file: loaded when present, written after the run
    #[arg(long, global = true)]
    data: Option<PathBuf>,

    /// JSON persistence configuration
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Cascade set for Customer.address, e.g. `PERSIST,REMOVE` (defaults per listing)
    #[arg(long, global = true)]
    cascade: Option<CascadeSet>,

    /// Log at debug level unless RUST_LOG is set
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one listing, or `all` of them
    Run { listing: String },
    /// Print the available listings
    List,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "managedb=debug" } else { "managedb=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<PersistenceConfig> {
    match path {
        Some(path) => PersistenceConfig::from_json_file(path)
            .with_context(|| format!("Failed to read configuration '{}'", path.display())),
        None => Ok(PersistenceConfig::default()),
    }
}

fn open_store(path: Option<&Path>) -> Result<Arc<InMemoryRowStore>> {
    match path {
        Some(path) if path.exists() => {
            let store = InMemoryRowStore::load_snapshot(path)
                .with_context(|| format!("Failed to load snapshot '{}'", path.display()))?;
            Ok(Arc::new(store))
        }
        _ => Ok(Arc::new(InMemoryRowStore::new())),
    }
}

fn selected(listing: &str) -> Result<Vec<Listing>> {
    if listing.eq_ignore_ascii_case("all") {
        return Ok(Listing::ALL.to_vec());
    }
    let listing = listing
        .parse::<Listing>()
        .map_err(|e| anyhow!("{} (try `list`)", e))?;
    Ok(vec![listing])
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::List => {
            for listing in Listing::ALL {
                println!("{}", listing);
            }
            Ok(())
        }
        Command::Run { listing } => {
            let listings = selected(&listing)?;
            let config = load_config(cli.config.as_deref())?;
            let store = open_store(cli.data.as_deref())?;

            for listing in listings {
                let shared: Arc<dyn RowStore> = store.clone();
                let cascade = cli.cascade.unwrap_or(listing.address_cascade());
                let report = tutorial::run_with_cascade(listing, cascade, shared, &config)
                    .with_context(|| format!("Listing '{}' failed", listing))?;
                println!("== {}", listing);
                for line in report {
                    println!("   {}", line);
                }
            }

            if let Some(path) = cli.data.as_deref() {
                store
                    .save_snapshot(path)
                    .with_context(|| format!("Failed to write snapshot '{}'", path.display()))?;
                println!("Snapshot written to {}", path.display());
            }
            Ok(())
        }
    }
}
