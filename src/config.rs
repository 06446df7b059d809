//! Load and validate runtime configuration.
//!
//! Values come from `config.yaml` (all keys optional), then `DCA_*`
//! environment overrides. API credentials are read from the environment only.

use anyhow::Context;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::{fmt, fs, path::Path, path::PathBuf, str::FromStr, time::Duration};

use crate::error::{DcaError, Result};
use crate::types::{Period, RunMode};

const DEFAULT_STATE_FILE: &str = ".binance_dca_state.json";
/// Twice this must stay below the runner's stale-lock age.
pub const MAX_TIMEOUT_SEC: u64 = 120;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
struct ExchangeFile {
    pair: String,
    mode: String, // "simulation" or "live"
    base_url: String,
    timeout_sec: u64,
    recv_window_ms: u64,
}

impl Default for ExchangeFile {
    fn default() -> Self {
        Self {
            pair: "BTCEUR".into(),
            mode: "simulation".into(),
            base_url: "https://api.binance.com".into(),
            timeout_sec: 15,
            recv_window_ms: 5000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
struct ScheduleFile {
    invest_total: Decimal,
    period: String,
    smart_interval: bool,
    min_tx: Decimal,
    timezone: String,
}

impl Default for ScheduleFile {
    fn default() -> Self {
        Self {
            invest_total: Decimal::new(25, 0),
            period: "week".into(),
            smart_interval: true,
            min_tx: Decimal::new(5, 0),
            timezone: "Europe/Stockholm".into(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
struct StateFile {
    path: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
struct FileConfig {
    exchange: ExchangeFile,
    schedule: ScheduleFile,
    state: StateFile,
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub api_key: String,
    pub api_secret: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &mask(&self.api_key))
            .field("api_secret", &"***")
            .finish()
    }
}

/// Show only the first four characters of a secret-ish value.
pub fn mask(s: &str) -> String {
    let head: String = s.chars().take(4).collect();
    format!("{head}***")
}

#[derive(Debug, Clone)]
pub struct ExchangeCfg {
    pub pair: String,
    pub mode: RunMode,
    pub base_url: String,
    pub timeout: Duration,
    pub recv_window_ms: u64,
    pub credentials: Credentials,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleCfg {
    pub invest_total: Decimal,
    pub period: Period,
    pub smart_interval: bool,
    pub min_tx: Decimal,
    pub timezone: String,
}

#[derive(Debug, Clone)]
pub struct StateCfg {
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub exchange: ExchangeCfg,
    pub schedule: ScheduleCfg,
    pub state: StateCfg,
}

impl AppConfig {
    /// Read `path` if it exists, then apply the process environment.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = if path.exists() {
            let s = fs::read_to_string(path)
                .with_context(|| format!("read config {}", path.display()))
                .map_err(|e| DcaError::InvalidConfiguration(format!("{e:#}")))?;
            Some(s)
        } else {
            None
        };
        Self::from_sources(yaml.as_deref(), |key| std::env::var(key).ok())
    }

    /// Build from optional YAML text and an environment lookup.
    pub fn from_sources(
        yaml: Option<&str>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let mut file: FileConfig = match yaml {
            Some(s) if !s.trim().is_empty() => serde_yaml::from_str(s)
                .context("parse config yaml")
                .map_err(|e| DcaError::InvalidConfiguration(format!("{e:#}")))?,
            _ => FileConfig::default(),
        };
        apply_env(&mut file, &env)?;

        let credentials = Credentials {
            api_key: required_env(&env, "BINANCE_API_KEY")?,
            api_secret: required_env(&env, "BINANCE_API_SECRET")?,
        };

        let pair = file.exchange.pair.trim().to_ascii_uppercase();
        if pair.is_empty() || !pair.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(DcaError::InvalidConfiguration(format!(
                "trading pair must be alphanumeric, got '{}'",
                file.exchange.pair
            )));
        }
        if file.exchange.timeout_sec == 0 || file.exchange.timeout_sec > MAX_TIMEOUT_SEC {
            return Err(DcaError::InvalidConfiguration(format!(
                "exchange.timeout_sec must be between 1 and {MAX_TIMEOUT_SEC}, got {}",
                file.exchange.timeout_sec
            )));
        }

        let schedule = ScheduleCfg {
            invest_total: file.schedule.invest_total,
            period: file.schedule.period.parse()?,
            smart_interval: file.schedule.smart_interval,
            min_tx: file.schedule.min_tx,
            timezone: file.schedule.timezone.trim().to_string(),
        };
        schedule.validate()?;
        crate::calendar::TzCalendar::new(&schedule.timezone)?;

        Ok(Self {
            exchange: ExchangeCfg {
                pair,
                mode: file.exchange.mode.parse()?,
                base_url: file.exchange.base_url.trim_end_matches('/').to_string(),
                timeout: Duration::from_secs(file.exchange.timeout_sec),
                recv_window_ms: file.exchange.recv_window_ms,
                credentials,
            },
            schedule,
            state: StateCfg {
                path: resolve_state_path(file.state.path.as_deref()),
            },
        })
    }
}

impl ScheduleCfg {
    pub fn validate(&self) -> Result<()> {
        if self.invest_total <= Decimal::ZERO {
            return Err(DcaError::InvalidConfiguration(format!(
                "invest_total must be positive, got {}",
                self.invest_total
            )));
        }
        if self.min_tx <= Decimal::ZERO {
            return Err(DcaError::InvalidConfiguration(format!(
                "min_tx must be positive, got {}",
                self.min_tx
            )));
        }
        Ok(())
    }
}

fn apply_env(file: &mut FileConfig, env: &impl Fn(&str) -> Option<String>) -> Result<()> {
    if let Some(v) = env("DCA_PAIR") {
        file.exchange.pair = v;
    }
    if let Some(v) = env("DCA_MODE") {
        file.exchange.mode = v;
    }
    if let Some(v) = env("DCA_INVEST_TOTAL") {
        file.schedule.invest_total = parse_decimal("DCA_INVEST_TOTAL", &v)?;
    }
    if let Some(v) = env("DCA_PERIOD") {
        file.schedule.period = v;
    }
    if let Some(v) = env("DCA_SMART_INTERVAL") {
        file.schedule.smart_interval = parse_bool("DCA_SMART_INTERVAL", &v)?;
    }
    if let Some(v) = env("DCA_MIN_TX") {
        file.schedule.min_tx = parse_decimal("DCA_MIN_TX", &v)?;
    }
    if let Some(v) = env("DCA_TIMEZONE") {
        file.schedule.timezone = v;
    }
    if let Some(v) = env("DCA_STATE_PATH") {
        file.state.path = Some(v);
    }
    Ok(())
}

fn required_env(env: &impl Fn(&str) -> Option<String>, key: &str) -> Result<String> {
    env(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| DcaError::InvalidConfiguration(format!("{key} is not set")))
}

fn parse_decimal(key: &str, v: &str) -> Result<Decimal> {
    Decimal::from_str(v.trim())
        .map_err(|e| DcaError::InvalidConfiguration(format!("{key}='{v}': {e}")))
}

fn parse_bool(key: &str, v: &str) -> Result<bool> {
    match v.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(DcaError::InvalidConfiguration(format!(
            "{key}='{v}' is not a boolean"
        ))),
    }
}

/// Expand a leading `~/` and default to a dotfile in the home directory.
fn resolve_state_path(configured: Option<&str>) -> PathBuf {
    let home = directories::BaseDirs::new().map(|b| b.home_dir().to_path_buf());
    match (configured.map(str::trim), home) {
        (Some(p), Some(home)) if p.starts_with("~/") => home.join(&p[2..]),
        (Some(p), _) if !p.is_empty() => PathBuf::from(p),
        (_, Some(home)) => home.join(DEFAULT_STATE_FILE),
        (_, None) => PathBuf::from(DEFAULT_STATE_FILE),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    const KEYS: &[(&str, &str)] = &[
        ("BINANCE_API_KEY", "abcdefgh"),
        ("BINANCE_API_SECRET", "s3cret"),
    ];

    #[test]
    fn defaults_match_weekly_smart_plan() {
        let cfg = AppConfig::from_sources(None, env_of(KEYS)).unwrap();
        assert_eq!(cfg.exchange.pair, "BTCEUR");
        assert_eq!(cfg.exchange.mode, RunMode::Simulation);
        assert_eq!(cfg.exchange.timeout, Duration::from_secs(15));
        assert_eq!(cfg.schedule.invest_total, dec!(25));
        assert_eq!(cfg.schedule.min_tx, dec!(5));
        assert!(cfg.schedule.smart_interval);
        assert_eq!(cfg.schedule.period, Period::Week);
        assert_eq!(cfg.schedule.timezone, "Europe/Stockholm");
        assert!(cfg.state.path.ends_with(DEFAULT_STATE_FILE));
    }

    #[test]
    fn yaml_values_then_env_overrides() {
        let yaml = r#"
exchange:
  pair: ethEur
  mode: live
  timeout_sec: 10
schedule:
  invest_total: "100.50"
  smart_interval: false
  min_tx: 10
  timezone: UTC
state:
  path: /tmp/dca/state.json
"#;
        let mut pairs = KEYS.to_vec();
        pairs.push(("DCA_MIN_TX", "20"));
        pairs.push(("DCA_SMART_INTERVAL", "yes"));
        let cfg = AppConfig::from_sources(Some(yaml), env_of(&pairs)).unwrap();
        assert_eq!(cfg.exchange.pair, "ETHEUR");
        assert_eq!(cfg.exchange.mode, RunMode::Live);
        assert_eq!(cfg.exchange.timeout, Duration::from_secs(10));
        assert_eq!(cfg.schedule.invest_total, dec!(100.50));
        assert_eq!(cfg.schedule.min_tx, dec!(20));
        assert!(cfg.schedule.smart_interval);
        assert_eq!(cfg.schedule.timezone, "UTC");
        assert_eq!(cfg.state.path, PathBuf::from("/tmp/dca/state.json"));
    }

    #[test]
    fn unsupported_period_is_its_own_error() {
        let mut pairs = KEYS.to_vec();
        pairs.push(("DCA_PERIOD", "month"));
        let err = AppConfig::from_sources(None, env_of(&pairs)).unwrap_err();
        assert!(matches!(err, DcaError::UnsupportedPeriod(_)));
    }

    #[test]
    fn rejects_non_positive_amounts_and_bad_timezone() {
        for (key, value) in [
            ("DCA_INVEST_TOTAL", "0"),
            ("DCA_MIN_TX", "-1"),
            ("DCA_TIMEZONE", "Nowhere/City"),
            ("DCA_MODE", "paper"),
            ("DCA_PAIR", "BTC/EUR"),
        ] {
            let mut pairs = KEYS.to_vec();
            pairs.push((key, value));
            let err = AppConfig::from_sources(None, env_of(&pairs)).unwrap_err();
            assert!(
                matches!(err, DcaError::InvalidConfiguration(_)),
                "{key}={value} gave {err:?}"
            );
        }
    }

    #[test]
    fn timeout_must_be_positive_and_bounded() {
        for secs in ["0", "121", "18446744073709551615"] {
            let yaml = format!("exchange:\n  timeout_sec: {secs}\n");
            let err = AppConfig::from_sources(Some(&yaml), env_of(KEYS)).unwrap_err();
            assert!(
                matches!(err, DcaError::InvalidConfiguration(ref m) if m.contains("timeout_sec")),
                "timeout_sec={secs} gave {err:?}"
            );
        }
        let yaml = format!("exchange:\n  timeout_sec: {MAX_TIMEOUT_SEC}\n");
        let cfg = AppConfig::from_sources(Some(&yaml), env_of(KEYS)).unwrap();
        assert_eq!(cfg.exchange.timeout, Duration::from_secs(MAX_TIMEOUT_SEC));
    }

    #[test]
    fn credentials_are_required_and_masked() {
        let err =
            AppConfig::from_sources(None, env_of(&[("BINANCE_API_KEY", "k")])).unwrap_err();
        assert!(err.to_string().contains("BINANCE_API_SECRET"));

        let cfg = AppConfig::from_sources(None, env_of(KEYS)).unwrap();
        let dbg = format!("{:?}", cfg.exchange.credentials);
        assert!(dbg.contains("abcd***"));
        assert!(!dbg.contains("s3cret"));
    }

    #[test]
    fn malformed_yaml_is_invalid_configuration() {
        let err = AppConfig::from_sources(Some("schedule: [oops"), env_of(KEYS)).unwrap_err();
        assert!(matches!(err, DcaError::InvalidConfiguration(_)));
    }
}
