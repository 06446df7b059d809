//! One invocation: resolve period -> load history -> decide -> buy -> record.

use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::calendar::{resolve, Calendar};
use crate::config::AppConfig;
use crate::error::{DcaError, Result};
use crate::exchange::Exchange;
use crate::scheduler::evaluate;
use crate::state::StateStore;
use crate::types::{OrderRequest, RunOutcome};

/// Older locks belong to a run that was killed; well above any request timeout.
const LOCK_STALE_AFTER: Duration = Duration::from_secs(600);
const RECORD_ATTEMPTS: u32 = 5;
const RECORD_BACKOFF: Duration = Duration::from_millis(250);

pub async fn run_once<C, E>(
    cfg: &AppConfig,
    calendar: &C,
    store: &StateStore,
    exchange: &E,
    now: DateTime<Utc>,
) -> Result<RunOutcome>
where
    C: Calendar + ?Sized,
    E: Exchange + ?Sized,
{
    cfg.schedule.validate()?;
    let window = resolve(calendar, now, cfg.schedule.period)?;
    let local_now = calendar.localize(now);

    // Held until this function returns, across the order and the record.
    let _lock = store.lock(LOCK_STALE_AFTER)?;
    let state = store.load()?;
    let executed = state.executed_in(&window.key);

    let decision = evaluate(window.start, local_now, executed, &cfg.schedule)?;
    debug!(
        "{}: start={}, executed={}, decision={:?}",
        window.key,
        window.start.to_rfc3339(),
        executed.len(),
        decision
    );
    if !decision.due {
        if decision.is_complete() {
            debug!("{}: all {} tranches executed", window.key, decision.chunk_count);
        }
        return Ok(RunOutcome::NotDue {
            period_key: window.key,
            executed: decision.chunk_index,
            chunk_count: decision.chunk_count,
        });
    }

    let req = OrderRequest::market_buy(&cfg.exchange.pair, decision.tranche_amount);
    info!(
        "{} tranche {}/{} due: buying {} quote of {} ({:?})",
        window.key,
        decision.chunk_index + 1,
        decision.chunk_count,
        req.quote_amount,
        req.pair,
        cfg.exchange.mode
    );
    // The HTTP client carries its own timeout; this bounds any Exchange impl.
    let bound = cfg.exchange.timeout.saturating_mul(2);
    let ack = match tokio::time::timeout(bound, exchange.place_order(&req)).await {
        Ok(res) => res?,
        Err(_) => {
            warn!(
                "no exchange answer within {}ms; order treated as unconfirmed",
                bound.as_millis()
            );
            return Err(DcaError::Exchange(format!(
                "no answer within {}ms",
                bound.as_millis()
            )));
        }
    };

    let key = window.key.clone();
    persist_with_retry(RECORD_ATTEMPTS, RECORD_BACKOFF, || store.record(&key, local_now))
        .await
        .map_err(|e| {
            error!(
                "ORDER {} WAS PLACED BUT NOT RECORDED for {} at {}: {}. \
                 Add it to {} by hand before the next run.",
                ack.order_id,
                key,
                local_now.to_rfc3339(),
                e,
                store.path().display()
            );
            e
        })?;

    Ok(RunOutcome::Purchased {
        period_key: window.key,
        tranche: decision.chunk_index + 1,
        amount: decision.tranche_amount,
        order_id: ack.order_id,
    })
}

async fn persist_with_retry<F>(attempts: u32, backoff: Duration, mut write: F) -> Result<()>
where
    F: FnMut() -> Result<()>,
{
    let mut attempt = 1;
    loop {
        match write() {
            Ok(()) => return Ok(()),
            Err(e) if attempt < attempts => {
                warn!("state write attempt {}/{} failed: {}", attempt, attempts, e);
                tokio::time::sleep(backoff * attempt).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
