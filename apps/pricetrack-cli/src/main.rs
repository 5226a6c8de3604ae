use anyhow::Context;
use clap::{Parser, Subcommand};
use pricetrack_core::driver::chrome::{ChromeLauncher, ChromeOptions};
use pricetrack_core::{
    DriverLauncher, ProfileSet, Reporter, SessionState, TrackOutcome, TrackerConfig,
    TrackingSession,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_SITE: &str = "noon.com";

#[derive(Parser)]
#[command(author, version, about = "Track product prices on e-commerce sites", long_about = None)]
struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Search a product on each site and write a price report
    Track(TrackArgs),
}

#[derive(clap::Args)]
struct TrackArgs {
    /// Product name to search for
    product_name: String,

    /// Comma-separated e-commerce sites to check
    #[arg(short, long, value_delimiter = ',', default_value = DEFAULT_SITE)]
    sites: Vec<String>,

    /// Directory for the report and screenshots
    #[arg(short, long, default_value = "reports")]
    output_dir: PathBuf,

    /// JSON file with additional site profiles
    #[arg(long, value_name = "FILE")]
    profiles: Option<PathBuf>,

    /// Show the browser window
    #[arg(long)]
    headed: bool,

    /// Skip page screenshots
    #[arg(long)]
    no_screenshots: bool,

    /// Also print the tracking outcomes as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv(Path::new(".env"));
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Command::Track(args) => track(args).await,
    };
    if let Err(e) = &result {
        error!("{:#}", e);
    }
    result
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose {
        "pricetrack=debug,pricetrack_core=debug"
    } else {
        "pricetrack=info,pricetrack_core=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Sets variables from a local `.env` file without overriding the real environment.
fn load_dotenv(path: &Path) {
    let Ok(contents) = std::fs::read_to_string(path) else {
        return;
    };
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() || std::env::var_os(key).is_some() {
            continue;
        }
        let value = value.trim().trim_matches('"').trim_matches('\'');
        std::env::set_var(key, value);
    }
}

async fn track(args: TrackArgs) -> anyhow::Result<()> {
    let mut config = TrackerConfig::from_env().context("invalid environment configuration")?;
    if args.headed {
        config.headless = false;
    }
    if args.no_screenshots {
        config.screenshots = false;
    }

    let mut profiles = ProfileSet::builtin().context("invalid built-in site profile")?;
    if let Some(path) = &args.profiles {
        let count = profiles
            .load_file(path)
            .with_context(|| format!("failed to load profiles from {}", path.display()))?;
        info!("Loaded {} site profiles from {}", count, path.display());
    }

    let launcher: Arc<dyn DriverLauncher> =
        Arc::new(ChromeLauncher::new(ChromeOptions::from(&config)));

    let mut outcomes: Vec<TrackOutcome> = Vec::new();
    for site in args.sites.iter().map(|s| s.trim()).filter(|s| !s.is_empty()) {
        let profile = profiles
            .resolve(site)
            .with_context(|| format!("no usable profile for {}", site))?;
        let session = TrackingSession::new(launcher.clone(), profile, config.clone());

        let outcome = session
            .track(&args.product_name)
            .await
            .with_context(|| format!("tracking on {} could not start", site))?;
        if outcome.state == SessionState::Failed {
            warn!(
                "{}: {}; reporting defaults",
                site,
                outcome.failure.as_deref().unwrap_or("tracking failed")
            );
        }
        outcomes.push(outcome);
    }

    let records: Vec<_> = outcomes.iter().map(|o| o.record.clone()).collect();
    let reporter = Reporter::new(&args.output_dir);
    let files = reporter.write(&args.product_name, &records, chrono::Local::now())?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&outcomes)?);
    }
    println!("Report generated: {}", files.report.display());
    Ok(())
}
