//! Live Trading Command
//!
//! Polls the CoinDCX ticker on a fixed interval and runs one session tick per
//! poll, with paper fills and the session persisted to a JSON snapshot so a
//! restart picks up open trades.

use anyhow::{Context, Result};
use chrono::Utc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use trend_trader::exchange::{PaperExecutor, TickerClient};
use trend_trader::store::JsonFileStore;
use trend_trader::{Config, EngineError, Session};

/// Live trader state
struct LiveTrader {
    session: Session<PaperExecutor, JsonFileStore>,
    client: TickerClient,
    cycle_count: u64,
}

impl LiveTrader {
    fn new(config: &Config, fresh: bool) -> Result<Self> {
        let client = TickerClient::new(&config.exchange, &config.trading.pairs)
            .context("Failed to build ticker client")?;
        let store = JsonFileStore::new(&config.state.path);
        let executor = PaperExecutor::new(config.exchange.fees());

        let session = Session::new(config.strategy.clone(), executor, store)
            .with_pairs(&config.trading.pairs)
            .with_process_budget(Duration::from_millis(config.trading.process_budget_ms));
        let session = if fresh {
            info!("Starting a fresh session {}", session.id());
            session
        } else {
            session
                .resume()
                .context(format!("Failed to resume from {}", config.state.path.display()))?
        };

        Ok(LiveTrader {
            session,
            client,
            cycle_count: 0,
        })
    }

    async fn run_cycle(&mut self) -> Result<()> {
        self.cycle_count += 1;
        let samples = self.client.fetch_samples().await?;
        let now = Utc::now().timestamp_millis();
        debug!("Cycle {}: {} samples", self.cycle_count, samples.len());

        let report = self.session.tick(&samples, now)?;
        for id in &report.sold {
            info!("Sold {}", id);
        }
        for id in &report.bought {
            info!("Bought {}", id);
        }
        for line in self.session.status_lines(now) {
            info!("{}", line);
        }
        Ok(())
    }

    fn shutdown(&self) {
        info!("Initiating graceful shutdown...");
        self.session.persist();

        let open = self.session.open_trades().count();
        if open > 0 {
            warn!("{} trades still open, they resume on next start", open);
        }
        info!(
            "Shutdown complete. Realized profit: {} ({} closed trades)",
            self.session.realized_profit(),
            self.session.closed_trades().count()
        );
    }
}

pub fn run(config_path: String, interval: Option<u64>, fresh: bool) -> Result<()> {
    dotenv::dotenv().ok();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    runtime.block_on(run_async(config_path, interval, fresh))
}

async fn run_async(config_path: String, interval_override: Option<u64>, fresh: bool) -> Result<()> {
    let config = Config::from_file(&config_path)
        .context(format!("Failed to load config from {}", config_path))?;
    config.validate().context("Invalid configuration")?;

    let interval_secs = interval_override.unwrap_or(config.trading.tick_interval_secs);
    let pairs: Vec<String> = config.trading.pairs.iter().map(|p| p.to_string()).collect();

    info!("{}", "=".repeat(60));
    info!("TREND TRADER - PAPER MODE");
    info!("Pairs:          {}", pairs.join(", "));
    info!("Trade amount:   {} {}", config.strategy.trade_amount, config.exchange.quote);
    info!("Tick interval:  {} seconds", interval_secs);
    info!("State file:     {}", config.state.path.display());
    info!("{}", "=".repeat(60));

    let mut trader = LiveTrader::new(&config, fresh)?;

    let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C, initiating shutdown...");
                let _ = shutdown_tx.send(()).await;
            }
            Err(e) => {
                error!("Error setting up signal handler: {}", e);
            }
        }
    });

    let mut cycle_interval = interval(Duration::from_secs(interval_secs));

    info!("Starting trading loop...");

    loop {
        tokio::select! {
            _ = cycle_interval.tick() => {
                if let Err(e) = trader.run_cycle().await {
                    match e.downcast_ref::<EngineError>() {
                        Some(engine) if engine.is_fatal() => {
                            error!("Engine state error, skipping tick: {}", engine)
                        }
                        _ => error!("Trading cycle error: {}", e),
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    trader.shutdown();
    info!("Live trading session ended.");
    Ok(())
}
