//! flyover: predicts aircraft passing near each user and pushes an alert
//! before they arrive.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use clap::{Parser, Subcommand};
use comfy_table::{Cell, Table};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use flyover_core::approach::Encounter;
use flyover_core::config::{self, Config};
use flyover_core::dedup::DedupGate;
use flyover_core::feed::sanitize;
use flyover_core::geometry::compass_label;
use flyover_core::rules::Condition;
use flyover_core::types::Position3D;

mod cycle;
mod db;
mod feed;
mod notification;
mod web;

use cycle::{CycleOrchestrator, CycleSettings};
use db::{Database, SqliteStore};
use feed::{AdsbFiFeed, AircraftFeed};
use notification::NtfyDispatcher;

#[derive(Parser)]
#[command(name = "flyover", version, about = "Overhead aircraft alerts")]
struct Cli {
    /// Config file (default: ~/.flyover/config.yaml)
    #[arg(long, global = true, env = "FLYOVER_CONFIG")]
    config: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll the feed on a fixed interval and serve location ingest
    Run {
        /// SQLite database path
        #[arg(long, env = "FLYOVER_DB")]
        db_path: Option<String>,

        /// Seconds between polling cycles
        #[arg(long)]
        interval: Option<f64>,

        /// Ingest server bind address
        #[arg(long)]
        host: Option<String>,

        /// Ingest server port
        #[arg(long)]
        port: Option<u16>,

        /// Poll only, without the ingest server
        #[arg(long)]
        no_server: bool,
    },

    /// Run exactly one polling cycle and exit
    Once {
        /// SQLite database path
        #[arg(long, env = "FLYOVER_DB")]
        db_path: Option<String>,
    },

    /// Fetch aircraft around a point and print predicted closest approaches
    Scan {
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,

        #[arg(long, allow_hyphen_values = true)]
        lon: f64,

        /// Observer altitude in feet
        #[arg(long, default_value = "0")]
        alt: f64,

        /// Search radius in nautical miles
        #[arg(long, default_value = "10")]
        radius: f64,
    },

    /// Manage users
    User {
        #[command(subcommand)]
        action: UserAction,

        /// SQLite database path
        #[arg(long, env = "FLYOVER_DB")]
        db_path: Option<String>,
    },

    /// Manage a user's alert filters
    Filter {
        #[command(subcommand)]
        action: FilterAction,

        /// SQLite database path
        #[arg(long, env = "FLYOVER_DB")]
        db_path: Option<String>,
    },

    /// Show database statistics
    Stats {
        /// SQLite database path
        #[arg(long, env = "FLYOVER_DB")]
        db_path: Option<String>,
    },

    /// Manage the config file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum UserAction {
    /// Register a user by email
    Add {
        email: String,

        /// ntfy topic for alerts
        #[arg(long)]
        topic: Option<String>,
    },
    /// List users
    List,
}

#[derive(Subcommand)]
enum FilterAction {
    /// Add a filter, e.g. `--condition 3d_distance=5 --condition angle_above_horizon=10`
    Add {
        email: String,
        name: String,

        /// Evaluation order; lower ranks are checked first
        #[arg(long, default_value = "0")]
        rank: i32,

        /// Condition as kind=threshold (repeatable)
        #[arg(short, long = "condition", required = true)]
        conditions: Vec<Condition>,
    },
    /// List a user's filters in evaluation order
    List { email: String },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Write a config file with default values
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Print the effective configuration
    Show,
}

/// Current time as Unix epoch seconds.
pub(crate) fn now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn load_config(path: Option<&Path>) -> Config {
    let loaded = match path {
        Some(p) => config::load_config_from(p),
        None => config::load_config(),
    };
    loaded.unwrap_or_else(|e| {
        eprintln!("Error loading config: {e}");
        std::process::exit(1);
    })
}

fn open_database(db_path: &str) -> Database {
    Database::open(db_path).unwrap_or_else(|e| {
        eprintln!("Error opening database {db_path}: {e}");
        std::process::exit(1);
    })
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = load_config(cli.config.as_deref());

    match cli.command {
        Commands::Run {
            db_path,
            interval,
            host,
            port,
            no_server,
        } => {
            if let Some(p) = db_path {
                config.database.path = p;
            }
            if let Some(i) = interval {
                config.poll.interval_secs = i;
            }
            if let Some(h) = host {
                config.server.host = h;
            }
            if let Some(p) = port {
                config.server.port = p;
            }
            if let Err(e) = config.validate() {
                eprintln!("Error: {e}");
                std::process::exit(1);
            }
            cmd_run(&config, !no_server).await;
        }
        Commands::Once { db_path } => {
            if let Some(p) = db_path {
                config.database.path = p;
            }
            cmd_once(&config).await;
        }
        Commands::Scan {
            lat,
            lon,
            alt,
            radius,
        } => cmd_scan(&config, Position3D::new(lat, lon, alt), radius).await,
        Commands::User { action, db_path } => {
            let path = db_path.unwrap_or(config.database.path);
            cmd_user(&path, action);
        }
        Commands::Filter { action, db_path } => {
            let path = db_path.unwrap_or(config.database.path);
            cmd_filter(&path, action);
        }
        Commands::Stats { db_path } => {
            cmd_stats(&db_path.unwrap_or(config.database.path));
        }
        Commands::Config { action } => cmd_config(cli.config.as_deref(), &config, action),
    }
}

// ---------------------------------------------------------------------------
// Polling
// ---------------------------------------------------------------------------

fn build_orchestrator(config: &Config, store: Arc<SqliteStore>) -> CycleOrchestrator {
    let settings = CycleSettings::from_config(config);
    let feed = AdsbFiFeed::new(&config.feed.base_url, settings.fetch_timeout()).unwrap_or_else(|e| {
        eprintln!("Error creating feed client: {e}");
        std::process::exit(1);
    });
    CycleOrchestrator::new(
        store.clone(),
        store,
        Arc::new(feed),
        Arc::new(NtfyDispatcher::new(&config.notify.base_url)),
        Arc::new(DedupGate::new()),
        settings,
    )
}

async fn seed(orch: &CycleOrchestrator) {
    match orch.seed_history(now()).await {
        Ok(n) => info!(alerts = n, "loaded recent alert history"),
        Err(e) => warn!("alert history unavailable, dedup starts empty: {e}"),
    }
}

async fn cmd_run(config: &Config, with_server: bool) {
    let store = Arc::new(SqliteStore::new(open_database(&config.database.path)));
    let orch = Arc::new(build_orchestrator(config, store.clone()));
    seed(&orch).await;

    let (stop_tx, stop_rx) = watch::channel(false);

    let server = with_server.then(|| {
        let mut stop = stop_tx.subscribe();
        let host = config.server.host.clone();
        let port = config.server.port;
        let store = store.clone();
        tokio::spawn(async move {
            let shutdown = async move {
                let _ = stop.wait_for(|s| *s).await;
            };
            if let Err(e) = web::serve(store, &host, port, shutdown).await {
                warn!("ingest server stopped: {e}");
            }
        })
    });

    info!(
        interval_secs = config.poll.interval_secs,
        horizon_minutes = config.prediction.horizon_minutes,
        "polling started"
    );
    let poller = tokio::spawn({
        let orch = orch.clone();
        async move { orch.run(stop_rx).await }
    });

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("cannot listen for ctrl-c: {e}");
    }
    info!("shutting down");
    let _ = stop_tx.send(true);

    let _ = poller.await;
    if let Some(server) = server {
        let _ = tokio::time::timeout(Duration::from_secs(5), server).await;
    }
}

async fn cmd_once(config: &Config) {
    let store = Arc::new(SqliteStore::new(open_database(&config.database.path)));
    let orch = build_orchestrator(config, store);
    seed(&orch).await;

    let r = orch.run_cycle(now()).await;

    println!();
    println!("Users:       {} processed, {} skipped", r.users, r.users_skipped);
    println!(
        "Aircraft:    {} seen, {} dropped, {} screened out",
        r.aircraft_seen, r.aircraft_dropped, r.aircraft_screened_out
    );
    println!("Matches:     {} ({} suppressed)", r.matches, r.suppressed);
    println!(
        "Alerts:      {} delivered, {} failed",
        r.delivered, r.delivery_failures
    );
    println!();
}

// ---------------------------------------------------------------------------
// Scan
// ---------------------------------------------------------------------------

async fn cmd_scan(config: &Config, observer: Position3D, radius: f64) {
    let settings = CycleSettings::from_config(config);
    let feed = AdsbFiFeed::new(&config.feed.base_url, Duration::from_secs(15)).unwrap_or_else(|e| {
        eprintln!("Error creating feed client: {e}");
        std::process::exit(1);
    });
    let records = feed
        .fetch(observer.lat, observer.lon, radius)
        .await
        .unwrap_or_else(|e| {
            eprintln!("Error fetching aircraft: {e}");
            std::process::exit(1);
        });

    let snapshots: Vec<_> = records.iter().filter_map(|r| sanitize(r).ok()).collect();
    let mut encounters: Vec<Encounter<'_>> = snapshots
        .iter()
        .map(|a| Encounter::compute(observer, a, settings.horizon_minutes))
        .collect();
    encounters.sort_by(|a, b| a.approach.distance_nm.total_cmp(&b.approach.distance_nm));

    println!();
    println!(
        "{} aircraft within {radius} nm, {} airborne with geometric altitude",
        records.len(),
        snapshots.len()
    );
    println!();

    if encounters.is_empty() {
        return;
    }

    let mut table = Table::new();
    table.set_header(vec![
        "Hex", "Type", "Alt (ft)", "Speed", "Trk", "Closest (nm)", "In (s)", "Bearing", "Elev",
    ]);
    for enc in &encounters {
        let ac = enc.aircraft;
        let bearing = enc.bearing_deg();
        table.add_row(vec![
            Cell::new(&ac.hex),
            Cell::new(&ac.description),
            Cell::new(format!("{:.0}", ac.position.altitude_ft)),
            Cell::new(format!("{:.0}", ac.ground_speed_kts)),
            Cell::new(format!("{:.0}", ac.track_deg)),
            Cell::new(format!("{:.2}", enc.approach.distance_nm)),
            Cell::new(format!("{:.0}", enc.seconds_to_closest)),
            Cell::new(format!("{bearing:.0} {}", compass_label(bearing))),
            Cell::new(format!("{:.1}", enc.angle_above_horizon())),
        ]);
    }

    println!("{table}");
}

// ---------------------------------------------------------------------------
// Users and filters
// ---------------------------------------------------------------------------

fn cmd_user(db_path: &str, action: UserAction) {
    let mut database = open_database(db_path);
    match action {
        UserAction::Add { email, topic } => match database.add_user(&email, topic.as_deref()) {
            Ok(id) => println!("Added user {id}: {email}"),
            Err(e) => {
                eprintln!("Error adding user {email}: {e}");
                std::process::exit(1);
            }
        },
        UserAction::List => {
            let users = database.list_users().unwrap_or_else(|e| {
                eprintln!("Error listing users: {e}");
                std::process::exit(1);
            });
            let mut table = Table::new();
            table.set_header(vec!["ID", "Email", "Topic"]);
            for (id, email, topic) in users {
                table.add_row(vec![
                    Cell::new(id),
                    Cell::new(email),
                    Cell::new(topic.as_deref().unwrap_or("-")),
                ]);
            }
            println!("{table}");
        }
    }
}

fn user_id_or_exit(database: &Database, email: &str) -> i64 {
    match database.user_id_by_email(email) {
        Ok(Some(id)) => id,
        Ok(None) => {
            eprintln!("No user with email {email}");
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("Error looking up {email}: {e}");
            std::process::exit(1);
        }
    }
}

fn cmd_filter(db_path: &str, action: FilterAction) {
    let mut database = open_database(db_path);
    match action {
        FilterAction::Add {
            email,
            name,
            rank,
            conditions,
        } => {
            let user_id = user_id_or_exit(&database, &email);
            if !conditions.iter().any(|c| c.distance_limit().is_some()) {
                eprintln!("Filter needs a 2d_distance or 3d_distance condition");
                std::process::exit(1);
            }
            match database.add_filter(user_id, &name, rank, &conditions) {
                Ok(id) => println!("Added filter {id} '{name}' for {email}"),
                Err(e) => {
                    eprintln!("Error adding filter: {e}");
                    std::process::exit(1);
                }
            }
        }
        FilterAction::List { email } => {
            let user_id = user_id_or_exit(&database, &email);
            let filters = database.filters_for_user(user_id).unwrap_or_else(|e| {
                eprintln!("Error loading filters: {e}");
                std::process::exit(1);
            });
            let mut table = Table::new();
            table.set_header(vec!["ID", "Rank", "Name", "Conditions"]);
            for f in &filters {
                let conditions: Vec<String> = f
                    .conditions
                    .iter()
                    .map(|c| match Condition::parse(&c.kind, &c.params) {
                        Ok(cond) => cond.to_string(),
                        Err(e) => format!("invalid: {e}"),
                    })
                    .collect();
                table.add_row(vec![
                    Cell::new(f.id),
                    Cell::new(f.rank),
                    Cell::new(&f.name),
                    Cell::new(conditions.join(" AND ")),
                ]);
            }
            println!("{table}");
        }
    }
}

// ---------------------------------------------------------------------------
// Stats and config
// ---------------------------------------------------------------------------

fn cmd_stats(db_path: &str) {
    let database = open_database(db_path);
    let stats = database.stats();

    println!();
    println!("Database: {db_path}");
    println!();
    println!("  Users:       {} ({} located)", stats.users, stats.located_users);
    println!("  Filters:     {}", stats.filters);
    println!("  Conditions:  {}", stats.conditions);
    println!("  Alerts:      {}", stats.alerts);
    println!();
}

fn cmd_config(path: Option<&Path>, config: &Config, action: ConfigAction) {
    match action {
        ConfigAction::Init { force } => {
            let target = path.map(Path::to_path_buf).unwrap_or_else(config::config_file);
            if target.exists() && !force {
                eprintln!("{} already exists (use --force to overwrite)", target.display());
                std::process::exit(1);
            }
            let written = match path {
                Some(p) => config::save_config_to(&Config::default(), p).map(|_| p.to_path_buf()),
                None => config::save_config(&Config::default()),
            };
            match written {
                Ok(p) => println!("Wrote {}", p.display()),
                Err(e) => {
                    eprintln!("Error writing {}: {e}", target.display());
                    std::process::exit(1);
                }
            }
        }
        ConfigAction::Show => {
            println!();
            println!("Feed:        {} (max {} kt)", config.feed.base_url, config.feed.max_speed_kts);
            println!("Horizon:     {} min", config.prediction.horizon_minutes);
            println!("Interval:    {} s", config.poll.interval_secs);
            println!("Database:    {}", config.database.path);
            println!("Notify:      {}", config.notify.base_url);
            println!("Server:      {}:{}", config.server.host, config.server.port);
            println!();
        }
    }
}
