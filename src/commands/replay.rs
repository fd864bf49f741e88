//! Replay command implementation

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;
use tracing::info;

use trend_trader::exchange::{PaperExecutor, ReplayFeed};
use trend_trader::store::MemoryStore;
use trend_trader::{Config, Money, PriceSample, Session};

pub fn run(config_path: String, data_path: String) -> Result<()> {
    info!("Starting replay");

    let config = Config::from_file(&config_path)?;
    config.validate().context("Invalid configuration")?;
    info!("Loaded configuration from: {}", config_path);

    let feed = ReplayFeed::from_csv(&data_path)?;
    info!("Loaded {} ticks from {}", feed.len(), data_path);

    let pairs = &config.trading.pairs;
    let mut session = Session::new(
        config.strategy.clone(),
        PaperExecutor::new(config.exchange.fees()),
        MemoryStore::new(),
    )
    .with_id("replay")
    .with_pairs(pairs)
    .with_process_budget(Duration::from_millis(config.trading.process_budget_ms));

    let pb = ProgressBar::new(feed.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{percent:>3}%|{bar:40}| {pos}/{len} [{elapsed}<{eta}] {msg}")
            .context("Invalid progress bar template")?
            .progress_chars("█░ "),
    );

    let mut last_ts = 0;
    for (ts, samples) in feed.ticks() {
        let samples: Vec<PriceSample> = samples
            .iter()
            .filter(|s| pairs.contains(&s.pair))
            .cloned()
            .collect();
        session.tick(&samples, ts)?;
        last_ts = ts;

        pb.inc(1);
        pb.set_message(format!(
            "{} open, {} closed",
            session.open_trades().count(),
            session.closed_trades().count()
        ));
    }
    pb.finish();

    let closed: Vec<_> = session.closed_trades().collect();
    let winners = closed
        .iter()
        .filter(|t| t.profit_percentage(true).is_some_and(|p| p > 0.0))
        .count();
    let unrealized = session
        .open_trades()
        .filter_map(|t| {
            let price = session.series(&t.asset_pair)?.newest()?.price;
            t.current_profit_amount(price, true)
        })
        .fold(Money::ZERO, |acc, p| acc + p);

    println!("\n{}", "=".repeat(60));
    println!("REPLAY RESULTS");
    println!("{}", "=".repeat(60));
    println!("Ticks:              {}", feed.len());
    println!("Closed Trades:      {}", closed.len());
    println!("Winning Trades:     {}", winners);
    println!("Losing Trades:      {}", closed.len() - winners);
    println!("Realized Profit:    {} {}", session.realized_profit(), config.exchange.quote);
    println!("Open Trades:        {}", session.open_trades().count());
    println!("Unrealized Profit:  {} {}", unrealized, config.exchange.quote);
    println!("{}", "-".repeat(60));
    for trade in &closed {
        println!(
            "{:<28} {:<10} {:>+8.2}%  {}",
            trade.id,
            trade.asset_pair.to_string(),
            trade.profit_percentage(true).unwrap_or_default(),
            trade.sell_reason.map(|r| r.to_string()).unwrap_or_default()
        );
    }
    for line in session.status_lines(last_ts) {
        println!("{}", line);
    }
    println!("{}", "=".repeat(60));

    info!("Replay completed successfully");
    Ok(())
}
