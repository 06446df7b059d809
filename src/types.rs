//! Core domain types for periods, schedule decisions and orders.

use std::{fmt, str::FromStr};

use chrono::Duration;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::DcaError;

/// Recurring budget window length.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Week,
}

impl Period {
    pub fn days(self) -> u32 {
        match self {
            Period::Week => 7,
        }
    }

    pub fn length(self) -> Duration {
        Duration::days(i64::from(self.days()))
    }
}

impl FromStr for Period {
    type Err = DcaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "week" => Ok(Period::Week),
            other => Err(DcaError::UnsupportedPeriod(other.to_string())),
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Period::Week => f.write_str("week"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Orders are validated by the exchange but never executed.
    Simulation,
    Live,
}

impl FromStr for RunMode {
    type Err = DcaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "simulation" => Ok(RunMode::Simulation),
            "live" => Ok(RunMode::Live),
            other => Err(DcaError::InvalidConfiguration(format!(
                "mode must be 'simulation' or 'live', got '{other}'"
            ))),
        }
    }
}

/// Result of one scheduler evaluation. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleDecision {
    pub due: bool,
    pub tranche_amount: Decimal,
    pub chunk_count: u32,
    /// 0-based; equals the number of tranches already executed this period.
    pub chunk_index: u32,
}

impl ScheduleDecision {
    pub fn is_complete(&self) -> bool {
        self.chunk_index >= self.chunk_count
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Side {
    Buy,
}

impl Side {
    pub fn as_str(self) -> &'static str {
        match self {
            Side::Buy => "BUY",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OrderType {
    Market,
}

impl OrderType {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderType::Market => "MARKET",
        }
    }
}

/// A market order sized by quote-currency spend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderRequest {
    pub pair: String,
    pub side: Side,
    pub order_type: OrderType,
    pub quote_amount: Decimal,
}

impl OrderRequest {
    pub fn market_buy(pair: &str, quote_amount: Decimal) -> Self {
        Self {
            pair: pair.to_string(),
            side: Side::Buy,
            order_type: OrderType::Market,
            quote_amount,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderAck {
    pub order_id: String,
}

/// What a successful invocation did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    NotDue {
        period_key: String,
        executed: u32,
        chunk_count: u32,
    },
    Purchased {
        period_key: String,
        /// 1-based tranche number within the period.
        tranche: u32,
        amount: Decimal,
        order_id: String,
    },
}
