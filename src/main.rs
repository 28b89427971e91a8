use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use std::path::Path;
use std::sync::Arc;
use url::Url;

use tidings::app::{parse_since, App, ConfigUpdate, FeedOptions, Paths};
use tidings::clock::SystemClock;
use tidings::config::{Config, Styling};
use tidings::feed::OpmlSubscriptions;
use tidings::ui::Printer;

#[derive(Parser, Debug)]
#[command(
    name = "tidings",
    version,
    about = "Merge your RSS, Atom and JSON feeds into one stream"
)]
struct Cli {
    #[command(flatten)]
    feed: FeedArgs,

    /// Proxy for all requests (http, https or socks5 URL)
    #[arg(long, value_name = "URL")]
    proxy: Option<Url>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Args, Debug)]
struct FeedArgs {
    /// Only show feeds from this list
    #[arg(short = 'L', long)]
    list: Option<String>,

    /// Show at most this many items
    #[arg(short, long)]
    limit: Option<usize>,

    /// Hide items published before this date (YYYY-MM-DD or RFC 3339)
    #[arg(short, long, value_parser = since_arg)]
    since: Option<DateTime<Utc>>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Search cached feeds without fetching
    Search {
        query: String,

        #[command(flatten)]
        feed: FeedArgs,
    },

    /// Show list names, or the feeds in one list
    Lists { name: Option<String> },

    /// Inspect or prune the feed cache
    Cache {
        /// Print the cache directory
        #[arg(long, conflicts_with = "prune")]
        path: bool,

        /// Remove cached feeds that are no longer subscribed
        #[arg(long)]
        prune: bool,
    },

    /// Show or change configuration
    Config(ConfigArgs),
}

#[derive(Args, Debug)]
struct ConfigArgs {
    /// Print the config directory
    #[arg(long)]
    path: bool,

    /// Print the 256-color palette
    #[arg(long)]
    color_range: bool,

    /// User-Agent header ("-" sends none)
    #[arg(long, value_name = "AGENT")]
    user_agent: Option<String>,

    /// Request timeout in seconds
    #[arg(long, value_name = "SECONDS")]
    timeout: Option<u64>,

    /// Maximum concurrent fetches
    #[arg(long, value_name = "N")]
    batch_size: Option<usize>,

    #[arg(long, value_enum)]
    future_items: Option<FutureItems>,

    #[arg(long, value_enum)]
    summary: Option<Toggle>,

    #[arg(long, value_enum)]
    styling: Option<Styling>,

    /// Palette remaps, e.g. "0:230,1:213"; "0:" drops one, "" drops all
    #[arg(long, value_name = "MAPPINGS")]
    map_colors: Option<String>,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum FutureItems {
    Show,
    Hide,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum Toggle {
    On,
    Off,
}

fn since_arg(raw: &str) -> Result<DateTime<Utc>, String> {
    parse_since(raw).map_err(|e| e.to_string())
}

impl FeedArgs {
    fn into_options(self, proxy: Option<Url>) -> FeedOptions {
        FeedOptions {
            list: self.list,
            limit: self.limit,
            since: self.since,
            proxy,
        }
    }
}

impl From<ConfigArgs> for ConfigUpdate {
    fn from(args: ConfigArgs) -> Self {
        Self {
            user_agent: args.user_agent,
            timeout_seconds: args.timeout,
            batch_size: args.batch_size,
            hide_future_items: args.future_items.map(|f| matches!(f, FutureItems::Hide)),
            summary: args.summary.map(|t| matches!(t, Toggle::On)),
            styling: args.styling,
            map_colors: args.map_colors,
        }
    }
}

/// Restrict the config directory to the current user.
fn secure_dir(dir: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        match std::fs::metadata(dir) {
            Ok(metadata) => {
                let mut perms = metadata.permissions();
                perms.set_mode(0o700);
                if let Err(e) = std::fs::set_permissions(dir, perms) {
                    tracing::warn!(
                        path = %dir.display(),
                        error = %e,
                        "Failed to set config directory permissions to 0700"
                    );
                }
            }
            Err(e) => {
                tracing::warn!(
                    path = %dir.display(),
                    error = %e,
                    "Failed to read config directory metadata"
                );
            }
        }
    }
    #[cfg(not(unix))]
    let _ = dir;
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so they never mix with the item list
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let paths = Paths::from_env()?;
    std::fs::create_dir_all(&paths.config_dir).with_context(|| {
        format!(
            "Failed to create config directory '{}'",
            paths.config_dir.display()
        )
    })?;
    secure_dir(&paths.config_dir);

    let config = Config::load(&paths.config_file()).context("Failed to load config")?;
    let printer = Printer::stdio(config.styling);
    let subscriptions = OpmlSubscriptions::new(paths.subscriptions_file());
    let mut app = App::new(
        paths,
        config,
        Box::new(subscriptions),
        Arc::new(SystemClock),
        printer,
    );

    match cli.command {
        None => app.feed(&cli.feed.into_options(cli.proxy)).await?,
        Some(Command::Search { query, feed }) => {
            app.search(&query, &feed.into_options(cli.proxy)).await?
        }
        Some(Command::Lists { name }) => app.lists(name.as_deref())?,
        Some(Command::Cache { path: true, .. }) => app.cache_path()?,
        Some(Command::Cache { prune: true, .. }) => app.cache_prune()?,
        Some(Command::Cache { .. }) => app.cache_info()?,
        Some(Command::Config(args)) => {
            if args.path {
                app.config_path()?;
            } else if args.color_range {
                app.color_range()?;
            } else {
                let update = ConfigUpdate::from(args);
                if update.is_empty() {
                    app.config_show()?;
                } else {
                    app.config_update(update)?;
                }
            }
        }
    }

    Ok(())
}
