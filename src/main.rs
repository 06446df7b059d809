//! Entry point. One scheduled invocation: Config -> Calendar -> State -> Scheduler -> Binance.

mod calendar;
mod config;
mod error;
mod exchange;
mod runner;
mod scheduler;
mod state;
mod types;

use dotenvy::dotenv;
use std::process::ExitCode;
use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;

use crate::calendar::TzCalendar;
use crate::error::DcaError;
use crate::types::RunOutcome;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    // Config path: first argument, else ./config.yaml
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.yaml".to_string());

    match run(&config_path).await {
        Ok(RunOutcome::NotDue {
            period_key,
            executed,
            chunk_count,
        }) => {
            info!(
                "Nothing to do: {} has {}/{} tranches executed, next one not due yet.",
                period_key, executed, chunk_count
            );
            ExitCode::SUCCESS
        }
        Ok(RunOutcome::Purchased {
            period_key,
            tranche,
            amount,
            order_id,
        }) => {
            info!(
                "Recorded purchase #{} for {}: spent {} (order id={})",
                tranche, period_key, amount, order_id
            );
            ExitCode::SUCCESS
        }
        Err(e @ DcaError::ConcurrentInvocation(_)) => {
            warn!("Skipped: {}", e);
            ExitCode::from(e.exit_code())
        }
        Err(e) => {
            error!("Run failed: {}", e);
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run(config_path: &str) -> error::Result<RunOutcome> {
    let cfg = config::AppConfig::load(config_path)?;
    let calendar = TzCalendar::new(&cfg.schedule.timezone)?;
    info!(
        "DCA run: pair={}, mode={:?}, budget={} per {}, smart_interval={}, min_tx={}, \
         tz={}, state={}",
        cfg.exchange.pair,
        cfg.exchange.mode,
        cfg.schedule.invest_total,
        cfg.schedule.period,
        cfg.schedule.smart_interval,
        cfg.schedule.min_tx,
        calendar.name(),
        cfg.state.path.display()
    );

    let store = state::StateStore::new(&cfg.state.path);
    let exchange = exchange::BinanceClient::new(&cfg.exchange)?;
    runner::run_once(&cfg, &calendar, &store, &exchange, chrono::Utc::now()).await
}
