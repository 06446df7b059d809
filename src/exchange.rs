//! Exchange boundary plus a thin Binance Spot REST client for quote-sized market buys.

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::StatusCode;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Deserialize;
use sha2::Sha256;
use tracing::{debug, info, warn};

use crate::config::{mask, Credentials, ExchangeCfg};
use crate::error::{DcaError, Result};
use crate::types::{OrderAck, OrderRequest, RunMode};

type HmacSha256 = Hmac<Sha256>;

/// Places one order and reports whether the exchange accepted it.
#[async_trait]
pub trait Exchange: Send + Sync {
    async fn place_order(&self, req: &OrderRequest) -> Result<OrderAck>;
}

pub struct BinanceClient {
    base_url: String,
    credentials: Credentials,
    mode: RunMode,
    recv_window_ms: u64,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct BinanceOrderResponse {
    #[serde(rename = "orderId")]
    order_id: Option<u64>,
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BinanceApiError {
    code: i64,
    msg: String,
}

impl BinanceClient {
    pub fn new(cfg: &ExchangeCfg) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(cfg.timeout)
            .connect_timeout(cfg.timeout)
            .build()
            .map_err(|e| DcaError::InvalidConfiguration(format!("http client: {e}")))?;
        info!(
            "Binance client: base={}, mode={:?}, key={}",
            cfg.base_url,
            cfg.mode,
            mask(&cfg.credentials.api_key)
        );
        Ok(Self {
            base_url: cfg.base_url.clone(),
            credentials: cfg.credentials.clone(),
            mode: cfg.mode,
            recv_window_ms: cfg.recv_window_ms,
            http,
        })
    }

    fn endpoint(&self) -> &'static str {
        match self.mode {
            RunMode::Simulation => "/api/v3/order/test",
            RunMode::Live => "/api/v3/order",
        }
    }

    fn sign(&self, query: &str) -> Result<String> {
        sign_query(&self.credentials.api_secret, query)
    }
}

#[async_trait]
impl Exchange for BinanceClient {
    async fn place_order(&self, req: &OrderRequest) -> Result<OrderAck> {
        let query = order_query(req, self.recv_window_ms, chrono::Utc::now().timestamp_millis());
        let signature = self.sign(&query)?;
        let url = format!("{}{}?{}&signature={}", self.base_url, self.endpoint(), query, signature);
        debug!("POST {}{} {}", self.base_url, self.endpoint(), query);

        let resp = self
            .http
            .post(url)
            .header("X-MBX-APIKEY", &self.credentials.api_key)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() && self.mode == RunMode::Live {
                    warn!("order request timed out; execution status unknown, check the account");
                }
                DcaError::from(e)
            })?;
        let status = resp.status();
        let body = match resp.text().await {
            Ok(body) => body,
            Err(e) if status.is_success() && self.mode == RunMode::Live => {
                return Err(unconfirmed_live_order(format!("unreadable order response: {e}")));
            }
            Err(e) => return Err(DcaError::from(e)),
        };
        interpret_response(status, &body, self.mode)
    }
}

/// Signed-parameter query for a quote-sized order, without the signature.
pub fn order_query(req: &OrderRequest, recv_window_ms: u64, timestamp_ms: i64) -> String {
    let params = [
        format!("symbol={}", req.pair),
        format!("side={}", req.side.as_str()),
        format!("type={}", req.order_type.as_str()),
        format!("quoteOrderQty={}", quote_qty(req.quote_amount)),
        format!("recvWindow={}", recv_window_ms),
        format!("timestamp={}", timestamp_ms),
    ];
    params.join("&")
}

/// Quote amounts go out with at most two decimals, never rounded up.
fn quote_qty(amount: Decimal) -> Decimal {
    amount
        .round_dp_with_strategy(2, RoundingStrategy::ToZero)
        .normalize()
}

pub fn sign_query(secret: &str, query: &str) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| DcaError::InvalidConfiguration(format!("HMAC key: {e}")))?;
    mac.update(query.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

fn interpret_response(status: StatusCode, body: &str, mode: RunMode) -> Result<OrderAck> {
    if !status.is_success() {
        if status.is_server_error() && mode == RunMode::Live {
            warn!("Binance returned {}; execution status unknown, check the account", status);
        }
        let reason = match serde_json::from_str::<BinanceApiError>(body) {
            Ok(e) => format!("HTTP {}: code {} {}", status.as_u16(), e.code, e.msg),
            Err(_) => format!("HTTP {}: {}", status.as_u16(), body.trim()),
        };
        return Err(DcaError::Exchange(reason));
    }
    match mode {
        // The test endpoint answers `{}` on success.
        RunMode::Simulation => Ok(OrderAck {
            order_id: "simulated".into(),
        }),
        RunMode::Live => {
            let parsed: BinanceOrderResponse = serde_json::from_str(body)
                .map_err(|e| unconfirmed_live_order(format!("unexpected order response: {e}")))?;
            let order_id = parsed
                .order_id
                .ok_or_else(|| unconfirmed_live_order("order response without orderId".into()))?;
            if let Some(s) = parsed.status.as_deref() {
                debug!("order {} status {}", order_id, s);
            }
            Ok(OrderAck {
                order_id: order_id.to_string(),
            })
        }
    }
}

/// A live order Binance answered 200 for but that cannot be confirmed from the
/// body. It may have executed; nothing gets recorded either way.
fn unconfirmed_live_order(reason: String) -> DcaError {
    warn!("{}; execution status unknown, check the account", reason);
    DcaError::Exchange(format!("{reason} (execution status unknown)"))
}
