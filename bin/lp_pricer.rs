//! # LP Pricer
//!
//! Command-line front end for the LP Pricing SDK.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin lp_pricer -- --config Config.toml run
//! cargo run --bin lp_pricer -- aggregate --strategy primary_a_overrides
//! cargo run --bin lp_pricer -- resolve weth
//! cargo run --bin lp_pricer -- lp-values
//! cargo run --bin lp_pricer -- stats
//! ```
//!
//! Token metadata and pool reserves are read from the JSON files named in the `data`
//! section of the config (or `LP_PRICING_TOKENS_FILE` / `LP_PRICING_POOLS_FILE`).

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use lp_pricing_sdk::{
    errors::PricingError,
    level_processor::LpBatchResult,
    price_aggregator::MergeStrategy,
    settings::Settings,
    PricingService,
};
use std::collections::BTreeMap;

#[derive(Parser, Debug)]
#[command(name = "lp_pricer", version, about = "Resolve USD prices for base, mirror and LP tokens")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "Config.toml")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch and merge the configured price sources
    Aggregate {
        /// Merge strategy override (primary_a_overrides, primary_b_overrides, average, fallback)
        #[arg(long, value_parser = parse_strategy)]
        strategy: Option<MergeStrategy>,
    },
    /// Resolve one token's price through the liquidity graph
    Resolve { token: String },
    /// Value every LP token from the aggregated prices
    LpValues,
    /// Print LP dependency statistics
    Stats,
    /// Run one full pricing cycle
    Run,
}

fn parse_strategy(raw: &str) -> Result<MergeStrategy, String> {
    serde_json::from_value(serde_json::Value::String(raw.to_string())).map_err(|e| e.to_string())
}

fn init_logging(settings: &Settings) {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(settings.log.level.as_str()))
        .init();

    #[cfg(feature = "observability")]
    {
        if let Err(e) = tracing_subscriber::fmt().json().with_target(true).try_init() {
            eprintln!("tracing subscriber not installed: {}", e);
        }
    }
}

#[cfg(feature = "observability")]
fn init_metrics(settings: &Settings) -> Result<()> {
    if settings.metrics.enabled {
        lp_pricing_sdk::metrics::install_prometheus_exporter(settings.metrics.port)?;
        println!("{} Prometheus exporter on :{}", "✅".green(), settings.metrics.port);
    }
    Ok(())
}

#[cfg(not(feature = "observability"))]
fn init_metrics(settings: &Settings) -> Result<()> {
    if settings.metrics.enabled {
        log::warn!("metrics.enabled is set but the binary was built without the observability feature");
    }
    Ok(())
}

fn print_error_line(token: &str, error: &PricingError) {
    println!("  {:<24} {} {}", token, format!("[{}]", error.kind()).red(), error);
}

fn print_lp_result(result: &LpBatchResult) {
    let sorted: BTreeMap<_, _> = result.valuations.iter().collect();
    for (token, v) in sorted {
        let mut line = format!(
            "  {:<24} ${:<16.6} conf={:.3} method={:?}",
            token, v.usd_price, v.confidence, v.method
        );
        if let Some(ratio) = v.numeraire_ratio {
            line.push_str(&format!(" ratio={:.6}", ratio));
        }
        if let Some(div) = v.method_divergence {
            line.push_str(&format!(" divergence={:.2}bps", div * 10_000.0));
        }
        if v.divergence_flagged {
            println!("{}", line.yellow());
        } else {
            println!("{}", line);
        }
    }
    let failures: BTreeMap<_, _> = result.failures.iter().collect();
    for (token, e) in failures {
        print_error_line(token, e);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let cli = Cli::parse();
    let settings = Settings::from_path(&cli.config)
        .with_context(|| format!("loading settings from {}", cli.config))?;
    init_logging(&settings);
    init_metrics(&settings)?;

    let service = PricingService::from_settings(settings)?;
    let tokens = service.refresh_tokens().await?;
    println!("{} {} tokens loaded", "✅".green(), tokens);

    match cli.command {
        Command::Aggregate { strategy } => {
            let strategy = strategy.unwrap_or(service.settings().aggregation.strategy);
            let outcome = service.aggregate_prices_with(strategy).await;
            println!("{}", format!("Aggregated prices ({})", strategy).bold());
            let sorted: BTreeMap<_, _> = outcome.prices.iter().collect();
            for (token, price) in sorted {
                println!("  {:<24} ${:.6}", token, price);
            }
            for (source, count) in &outcome.source_counts {
                println!("  source {:<17} {} quotes", source, count);
            }
            for failure in &outcome.source_failures {
                println!("  {}", failure.to_string().red());
            }
            for mirror in &outcome.unresolved_mirrors {
                println!("  {} {}", "unresolved mirror".yellow(), mirror);
            }
        }
        Command::Resolve { token } => {
            service.aggregate_prices().await;
            let report = service.refresh_liquidity_graph().await?;
            println!("Liquidity graph: {}", report);
            match service.resolve_token_price(&token) {
                Ok(quote) => println!(
                    "  {:<24} {} conf={:.3} via {}",
                    quote.token,
                    format!("${:.6}", quote.usd_price).green(),
                    quote.confidence,
                    quote.origin
                ),
                Err(e) => print_error_line(&token, &e),
            }
        }
        Command::LpValues => {
            let outcome = service.aggregate_prices().await;
            let result = service.calculate_all_lp_values(&outcome.prices).await;
            println!("{}", "LP valuations".bold());
            print_lp_result(&result);
        }
        Command::Stats => {
            let stats = service.get_dependency_stats();
            println!("{}", "LP dependency graph".bold());
            println!("  {}", stats);
            for (level, count) in &stats.tokens_per_level {
                println!("  level {:<3} {} tokens", level, count);
            }
        }
        Command::Run => {
            let report = service.run_cycle().await?;
            println!("{}", format!("Pricing cycle ({:?})", report.elapsed).bold());
            println!("  aggregated: {}", report.aggregation.prices.len());
            println!("  graph:      {}", report.graph);
            let resolved: BTreeMap<_, _> = report.graph_resolved.iter().collect();
            for (token, quote) in resolved {
                println!(
                    "  {:<24} ${:.6} conf={:.3} via {}",
                    token, quote.usd_price, quote.confidence, quote.origin
                );
            }
            let unresolved: BTreeMap<_, _> = report.unresolved.iter().collect();
            for (token, e) in unresolved {
                print_error_line(token, e);
            }
            print_lp_result(&report.lp);
        }
    }

    Ok(())
}
