//! Tranche scheduling: is a purchase due now, and for how much.

use chrono::{DateTime, Duration, FixedOffset};
use rust_decimal::{prelude::ToPrimitive, Decimal, RoundingStrategy};

use crate::config::ScheduleCfg;
use crate::error::Result;
use crate::types::ScheduleDecision;

/// Number of tranches the period budget is split into.
pub fn chunk_count(cfg: &ScheduleCfg) -> u32 {
    if !cfg.smart_interval {
        return 1;
    }
    let days = cfg.period.days();
    // Huge ratios overflow u32; they are clamped to one chunk per day anyway.
    (cfg.invest_total / cfg.min_tx)
        .ceil()
        .to_u32()
        .unwrap_or(days)
        .clamp(1, days)
}

/// Amount of tranche `index` (0-based) out of `count`.
///
/// Every tranche but the last is the per-chunk share truncated to cents; the
/// last one takes the remainder so the period total lands on `invest_total`.
pub fn tranche_amount(invest_total: Decimal, count: u32, index: u32) -> Decimal {
    let count = count.max(1);
    let share = (invest_total / Decimal::from(count))
        .round_dp_with_strategy(2, RoundingStrategy::ToZero);
    if index + 1 == count {
        invest_total - share * Decimal::from(count - 1)
    } else {
        share
    }
}

/// Offset from period start at which tranche `index` becomes due.
pub fn due_offset(period_length: Duration, count: u32, index: u32) -> Duration {
    let count = i64::from(count.max(1));
    Duration::milliseconds(period_length.num_milliseconds() * i64::from(index) / count)
}

/// Decide whether a tranche is due at `now`. Pure; never touches state.
///
/// More executed entries than tranches (manual edits, a changed budget) just
/// means the period is done.
pub fn evaluate(
    period_start: DateTime<FixedOffset>,
    now: DateTime<FixedOffset>,
    executed: &[DateTime<FixedOffset>],
    cfg: &ScheduleCfg,
) -> Result<ScheduleDecision> {
    cfg.validate()?;

    let count = chunk_count(cfg);
    let index = u32::try_from(executed.len()).unwrap_or(u32::MAX);

    if !cfg.smart_interval {
        return Ok(ScheduleDecision {
            due: index == 0,
            tranche_amount: cfg.invest_total,
            chunk_count: 1,
            chunk_index: index,
        });
    }

    let due = if index < count {
        now >= period_start + due_offset(cfg.period.length(), count, index)
    } else {
        false
    };
    Ok(ScheduleDecision {
        due,
        tranche_amount: tranche_amount(cfg.invest_total, count, index.min(count - 1)),
        chunk_count: count,
        chunk_index: index,
    })
}
