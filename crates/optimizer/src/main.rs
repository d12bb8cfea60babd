//! Coin-Optimizer: genetic strategy search with a significance gate
//!
//! Usage:
//!   coin-optimizer run --symbols BTCUSDT,ETHUSDT   One optimization pass
//!   coin-optimizer schedule --every-hours 72       Repeat passes until Ctrl+C
//!   coin-optimizer coins list                      Registry maintenance

use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use engine::{BinanceClient, OptimizationRun, OptimizerConfig, RunSummary, SqliteRegistry, SymbolStatus};
use persistence::repository::{CoinRepository, RunRepository};
use persistence::Database;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

const APP_VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), "-", env!("GIT_HASH"));

#[derive(Parser)]
#[command(name = "coin-optimizer")]
#[command(about = "Genetic search for per-coin trading strategies", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one optimization pass
    Run {
        #[command(flatten)]
        opts: RunOptions,
        /// Optional JSON export path
        #[arg(long)]
        export: Option<String>,
    },
    /// Repeat optimization passes until Ctrl+C
    Schedule {
        /// Hours between the start of consecutive passes
        #[arg(long, default_value_t = 72)]
        every_hours: u64,
        #[command(flatten)]
        opts: RunOptions,
    },
    /// Manage the coins the optimizer works on
    Coins {
        #[command(subcommand)]
        action: CoinAction,
    },
    /// Show recent optimization runs
    History {
        /// Restrict to one symbol
        #[arg(long)]
        symbol: Option<String>,
        /// Number of rows to show
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
}

#[derive(Subcommand)]
enum CoinAction {
    /// Register coins (comma-separated)
    Add {
        #[arg(value_delimiter = ',', required = true)]
        symbols: Vec<String>,
    },
    /// Remove a coin and its strategy
    Remove { symbol: String },
    /// Include a coin in scheduled passes
    Enable { symbol: String },
    /// Exclude a coin from scheduled passes
    Disable { symbol: String },
    /// List registered coins with their strategies
    List,
}

/// Overrides applied on top of the environment configuration
#[derive(Args, Clone)]
struct RunOptions {
    /// Symbols to optimize (comma-separated); defaults to enabled coins
    #[arg(long, value_delimiter = ',')]
    symbols: Vec<String>,
    /// Run seed for reproducible passes
    #[arg(long)]
    seed: Option<u64>,
    #[arg(long)]
    population: Option<usize>,
    #[arg(long)]
    generations: Option<usize>,
    #[arg(long)]
    mutation_rate: Option<f64>,
    #[arg(long)]
    elite: Option<usize>,
    /// Candles per symbol
    #[arg(long)]
    lookback: Option<usize>,
    /// Candle interval, e.g. 15m
    #[arg(long)]
    interval: Option<String>,
    /// Symbols optimized at the same time
    #[arg(long)]
    concurrency: Option<usize>,
    /// Per-symbol budget in seconds (0 disables it)
    #[arg(long)]
    timeout_secs: Option<u64>,
    /// Significance level of the adoption gate
    #[arg(long)]
    alpha: Option<f64>,
    /// Trailing share of candles held out for the gate
    #[arg(long)]
    holdout: Option<f64>,
}

impl RunOptions {
    fn apply(&self, cfg: &mut OptimizerConfig) {
        if let Some(v) = self.seed {
            cfg.seed = Some(v);
        }
        if let Some(v) = self.population {
            cfg.ga.population_size = v;
        }
        if let Some(v) = self.generations {
            cfg.ga.generations = v;
        }
        if let Some(v) = self.mutation_rate {
            cfg.ga.mutation_rate = v;
        }
        if let Some(v) = self.elite {
            cfg.ga.elite_size = v;
        }
        if let Some(v) = self.lookback {
            cfg.lookback = v;
        }
        if let Some(v) = &self.interval {
            cfg.interval = v.clone();
        }
        if let Some(v) = self.concurrency {
            cfg.concurrency = v;
        }
        if let Some(v) = self.timeout_secs {
            cfg.symbol_timeout_secs = (v > 0).then_some(v);
        }
        if let Some(v) = self.alpha {
            cfg.alpha = v;
        }
        if let Some(v) = self.holdout {
            cfg.holdout_fraction = v;
        }
    }

    fn config(&self) -> anyhow::Result<OptimizerConfig> {
        let mut cfg = OptimizerConfig::from_env();
        self.apply(&mut cfg);
        cfg.validate()?;
        Ok(cfg)
    }

    fn symbols(&self) -> Option<Vec<String>> {
        let symbols: Vec<String> = self
            .symbols
            .iter()
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();
        (!symbols.is_empty()).then_some(symbols)
    }
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("debug,engine=debug,coin_optimizer=debug,sqlx=warn")
    } else {
        EnvFilter::new("info,engine=info,coin_optimizer=info,sqlx=warn")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).compact())
        .with(filter)
        .init();
}

async fn open_database() -> anyhow::Result<Database> {
    let db_path =
        std::env::var("COIN_OPTIMIZER_DB_PATH").unwrap_or_else(|_| "data/coins.db".to_string());
    Database::new(&db_path)
        .await
        .map_err(|e| anyhow::anyhow!("Database initialization failed: {}", e))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    dotenvy::dotenv().ok();

    let result = match cli.command {
        Commands::Run { opts, export } => cmd_run(opts, export).await,
        Commands::Schedule { every_hours, opts } => cmd_schedule(every_hours, opts).await,
        Commands::Coins { action } => cmd_coins(action).await,
        Commands::History { symbol, limit } => cmd_history(symbol, limit).await,
    };

    if let Err(e) = &result {
        error!(error = %e, "Command failed");
    }
    result
}

// ============================================================================
// Run command: one optimization pass
// ============================================================================

async fn run_pass(db: &Database, opts: &RunOptions) -> anyhow::Result<RunSummary> {
    let config = opts.config()?;
    let symbols = opts.symbols();

    if let Some(symbols) = &symbols {
        let coins = CoinRepository::new(db.pool());
        for symbol in symbols {
            if coins.add_coin(symbol).await? {
                info!(symbol = %symbol, "Registered new coin");
            }
        }
    }

    let source = Arc::new(BinanceClient::new()?);
    let registry = Arc::new(SqliteRegistry::new(db.pool_clone()));
    let run = OptimizationRun::new(config, source, registry)?;
    Ok(run.run_all(symbols).await?)
}

async fn cmd_run(opts: RunOptions, export: Option<String>) -> anyhow::Result<()> {
    println!("\n=== Coin-Optimizer v{} ===", APP_VERSION);
    let db = open_database().await?;

    let summary = run_pass(&db, &opts).await?;
    print_summary(&summary);

    if let Some(export_path) = export {
        let json = serde_json::to_string_pretty(&summary)?;
        std::fs::write(&export_path, &json)?;
        println!("\nSummary exported to {}", export_path);
    }

    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!(
        "\nRun {} (seed {}): {} adopted, {} rejected, {} skipped, {} failed",
        summary.run_id,
        summary.seed,
        summary.adopted(),
        summary.rejected(),
        summary.skipped(),
        summary.failed()
    );
    println!(
        "  {:<12} {:<10} {:<15} {:>8} {:>9} {:>8} {:>6}",
        "Symbol", "Status", "Strategy", "Fitness", "Return", "p", "Trades"
    );
    println!("  {}", "-".repeat(74));
    for r in &summary.results {
        let status = match &r.status {
            SymbolStatus::Adopted => "adopted",
            SymbolStatus::Rejected => "rejected",
            SymbolStatus::Skipped(_) => "skipped",
            SymbolStatus::Failed(_) => "failed",
        };
        println!(
            "  {:<12} {:<10} {:<15} {:>8} {:>9} {:>8} {:>6}",
            r.symbol,
            status,
            r.strategy_type.map(|t| t.to_string()).unwrap_or_else(|| "-".into()),
            fmt_opt(r.fitness, |v| format!("{:.3}", v)),
            fmt_opt(r.total_return, |v| format!("{:+.2}%", v * 100.0)),
            fmt_opt(r.p_value, |v| format!("{:.4}", v)),
            r.trades,
        );
        if let SymbolStatus::Skipped(reason) | SymbolStatus::Failed(reason) = &r.status {
            println!("      {}", reason);
        }
    }
}

fn fmt_opt(value: Option<f64>, f: impl Fn(f64) -> String) -> String {
    value.map(f).unwrap_or_else(|| "-".to_string())
}

// ============================================================================
// Schedule command: repeated passes
// ============================================================================

async fn cmd_schedule(every_hours: u64, opts: RunOptions) -> anyhow::Result<()> {
    if every_hours == 0 {
        anyhow::bail!("--every-hours must be at least 1");
    }
    println!("\n=== Coin-Optimizer v{} ===", APP_VERSION);
    println!("Pass every {}h. Press Ctrl+C to stop\n", every_hours);

    // Reject bad overrides before the first pass
    opts.config()?;
    let db = open_database().await?;
    let period = Duration::from_secs(every_hours * 3600);

    let mut pass = 0u64;
    loop {
        pass += 1;
        let started = tokio::time::Instant::now();
        info!(pass, "Starting scheduled pass");
        match run_pass(&db, &opts).await {
            Ok(summary) => print_summary(&summary),
            Err(e) => warn!(pass, error = %e, "Scheduled pass failed"),
        }

        let next = started + period;
        tokio::select! {
            _ = tokio::time::sleep_until(next) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl+C received, stopping scheduler");
                break;
            }
        }
    }

    Ok(())
}

// ============================================================================
// Coins and history commands
// ============================================================================

async fn cmd_coins(action: CoinAction) -> anyhow::Result<()> {
    let db = open_database().await?;
    let coins = CoinRepository::new(db.pool());

    match action {
        CoinAction::Add { symbols } => {
            for symbol in symbols.iter().map(|s| s.trim().to_uppercase()) {
                if symbol.is_empty() {
                    continue;
                }
                if coins.add_coin(&symbol).await? {
                    println!("Added {}", symbol);
                } else {
                    println!("{} already registered", symbol);
                }
            }
        }
        CoinAction::Remove { symbol } => {
            report_change(coins.remove_coin(&symbol.to_uppercase()).await?, "Removed", &symbol)
        }
        CoinAction::Enable { symbol } => report_change(
            coins.set_enabled(&symbol.to_uppercase(), true).await?,
            "Enabled",
            &symbol,
        ),
        CoinAction::Disable { symbol } => report_change(
            coins.set_enabled(&symbol.to_uppercase(), false).await?,
            "Disabled",
            &symbol,
        ),
        CoinAction::List => {
            let all = coins.get_all().await?;
            if all.is_empty() {
                println!("No coins registered.");
                return Ok(());
            }
            println!(
                "  {:<12} {:<8} {:<7} {:<15} {:>9}  {}",
                "Symbol", "Enabled", "Active", "Strategy", "Return", "Params"
            );
            println!("  {}", "-".repeat(80));
            for coin in all {
                println!(
                    "  {:<12} {:<8} {:<7} {:<15} {:>9}  {}",
                    coin.symbol,
                    coin.enabled,
                    coin.is_active,
                    coin.strategy.as_deref().unwrap_or("-"),
                    fmt_opt(coin.prev_return, |v| format!("{:+.2}%", v * 100.0)),
                    coin.best_params.as_deref().unwrap_or("-"),
                );
            }
        }
    }

    Ok(())
}

fn report_change(changed: bool, verb: &str, symbol: &str) {
    if changed {
        println!("{} {}", verb, symbol.to_uppercase());
    } else {
        println!("{} is not registered", symbol.to_uppercase());
    }
}

async fn cmd_history(symbol: Option<String>, limit: i64) -> anyhow::Result<()> {
    let db = open_database().await?;
    let symbol = symbol.map(|s| s.to_uppercase());
    let runs = RunRepository::new(db.pool())
        .recent(symbol.as_deref(), limit)
        .await?;

    if runs.is_empty() {
        println!("No optimization runs recorded.");
        return Ok(());
    }

    println!(
        "  {:<17} {:<12} {:<15} {:>8} {:>9} {:>8} {:>6} {:<7}",
        "When", "Symbol", "Strategy", "Fitness", "Return", "p", "Trades", "Adopted"
    );
    println!("  {}", "-".repeat(92));
    for run in runs {
        let when = run
            .created_at
            .and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0))
            .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {:<17} {:<12} {:<15} {:>8} {:>9} {:>8} {:>6} {:<7}",
            when,
            run.symbol,
            run.strategy.as_deref().unwrap_or("-"),
            fmt_opt(run.fitness, |v| format!("{:.3}", v)),
            fmt_opt(run.total_return, |v| format!("{:+.2}%", v * 100.0)),
            fmt_opt(run.p_value, |v| format!("{:.4}", v)),
            run.trades,
            run.adopted,
        );
    }

    Ok(())
}
