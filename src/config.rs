//! Configuration loading and validation

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub social: SocialConfig,
    #[serde(default)]
    pub market: MarketConfig,
    #[serde(default)]
    pub safety: SafetyConfig,
    #[serde(default)]
    pub holders: HoldersConfig,
    #[serde(default)]
    pub t2: T2Config,
    #[serde(default)]
    pub t3: T3Config,
    #[serde(default)]
    pub vip: VipConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub rpc: RpcConfig,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub stats: StatsConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
    #[serde(default)]
    pub forwarding: ForwardingConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Mention windows and the T1 consensus threshold
#[derive(Debug, Clone, Deserialize)]
pub struct SocialConfig {
    /// Mentions older than this are dropped from the ledger
    #[serde(default = "default_retention_min")]
    pub retention_min: u64,
    /// Window for counting distinct mentioning channels
    #[serde(default = "default_overlap_window_min")]
    pub overlap_window_min: u64,
    #[serde(default = "default_min_unique_channels_t1")]
    pub min_unique_channels_t1: usize,
    /// Short windows used for velocity counts
    #[serde(default = "default_velocity_windows_min")]
    pub velocity_windows_min: Vec<u64>,
    #[serde(default = "default_decay_half_life_min")]
    pub decay_half_life_min: f64,
    /// Above this many tracked entities the ledger is trimmed
    #[serde(default = "default_max_tracked_entities")]
    pub max_tracked_entities: usize,
    #[serde(default = "default_retain_after_trim")]
    pub retain_after_trim: usize,
}

impl Default for SocialConfig {
    fn default() -> Self {
        Self {
            retention_min: default_retention_min(),
            overlap_window_min: default_overlap_window_min(),
            min_unique_channels_t1: default_min_unique_channels_t1(),
            velocity_windows_min: default_velocity_windows_min(),
            decay_half_life_min: default_decay_half_life_min(),
            max_tracked_entities: default_max_tracked_entities(),
            retain_after_trim: default_retain_after_trim(),
        }
    }
}

/// Market data source and global sanity floors
#[derive(Debug, Clone, Deserialize)]
pub struct MarketConfig {
    #[serde(default = "default_liquidity_min_usd")]
    pub liquidity_min_usd: f64,
    #[serde(default = "default_market_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_dexscreener_url")]
    pub dexscreener_url: String,
    #[serde(default = "default_preferred_chain")]
    pub preferred_chain: String,
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            liquidity_min_usd: default_liquidity_min_usd(),
            cache_ttl_secs: default_market_cache_ttl_secs(),
            dexscreener_url: default_dexscreener_url(),
            preferred_chain: default_preferred_chain(),
            cache_capacity: default_cache_capacity(),
        }
    }
}

/// What to do with a safety probe that failed
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SafetyFailurePolicy {
    /// Cache the conservative result for the regular safety TTL
    Memoize,
    /// Cache the conservative result only for `failure_retry_secs`
    RetryAfter,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SafetyConfig {
    /// Require both mint and freeze authority revoked
    #[serde(default = "default_true")]
    pub mint_safety_required: bool,
    /// Lifetime of a successful probe result; 0 keeps it for the process lifetime
    #[serde(default)]
    pub ttl_secs: u64,
    #[serde(default = "default_failure_policy")]
    pub failure_policy: SafetyFailurePolicy,
    #[serde(default = "default_failure_retry_secs")]
    pub failure_retry_secs: u64,
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            mint_safety_required: true,
            ttl_secs: 0,
            failure_policy: default_failure_policy(),
            failure_retry_secs: default_failure_retry_secs(),
            cache_capacity: default_cache_capacity(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HoldersConfig {
    #[serde(default = "default_holders_threshold")]
    pub threshold: usize,
    #[serde(default = "default_largest_wallet_max_pct")]
    pub largest_wallet_max_pct: f64,
}

impl Default for HoldersConfig {
    fn default() -> Self {
        Self {
            threshold: default_holders_threshold(),
            largest_wallet_max_pct: default_largest_wallet_max_pct(),
        }
    }
}

/// Tier 2 (confirmation) thresholds
#[derive(Debug, Clone, Deserialize)]
pub struct T2Config {
    #[serde(default = "default_t2_liquidity_min_usd")]
    pub liquidity_min_usd: f64,
    #[serde(default = "default_t2_drawdown_max_pct")]
    pub drawdown_max_pct: f64,
    #[serde(default = "default_t2_txns_h1_min")]
    pub txns_h1_min: u64,
    #[serde(default = "default_t2_buy_sell_ratio_min")]
    pub buy_sell_ratio_min: f64,
    #[serde(default = "default_t2_age_min_min")]
    pub age_min_min: f64,
    #[serde(default = "default_t2_age_max_min")]
    pub age_max_min: f64,
}

impl Default for T2Config {
    fn default() -> Self {
        Self {
            liquidity_min_usd: default_t2_liquidity_min_usd(),
            drawdown_max_pct: default_t2_drawdown_max_pct(),
            txns_h1_min: default_t2_txns_h1_min(),
            buy_sell_ratio_min: default_t2_buy_sell_ratio_min(),
            age_min_min: default_t2_age_min_min(),
            age_max_min: default_t2_age_max_min(),
        }
    }
}

/// Tier 3 (momentum) thresholds
#[derive(Debug, Clone, Deserialize)]
pub struct T3Config {
    #[serde(default = "default_t3_market_cap_min_usd")]
    pub market_cap_min_usd: f64,
    #[serde(default = "default_t3_volume24_min_usd")]
    pub volume24_min_usd: f64,
    /// Minimum current / tier-1 price multiple (inclusive)
    #[serde(default = "default_t3_price_min_x")]
    pub price_min_x: f64,
    /// Maximum current / tier-1 price multiple (exclusive)
    #[serde(default = "default_t3_price_max_x")]
    pub price_max_x: f64,
    #[serde(default = "default_true")]
    pub positive_trend_required: bool,
    #[serde(default = "default_t3_age_min_min")]
    pub age_min_min: f64,
    #[serde(default = "default_t3_age_max_min")]
    pub age_max_min: f64,
}

impl Default for T3Config {
    fn default() -> Self {
        Self {
            market_cap_min_usd: default_t3_market_cap_min_usd(),
            volume24_min_usd: default_t3_volume24_min_usd(),
            price_min_x: default_t3_price_min_x(),
            price_max_x: default_t3_price_max_x(),
            positive_trend_required: true,
            age_min_min: default_t3_age_min_min(),
            age_max_min: default_t3_age_max_min(),
        }
    }
}

/// Curated wallet watch list
#[derive(Debug, Clone, Deserialize)]
pub struct VipConfig {
    #[serde(default)]
    pub wallets: Vec<String>,
    /// JSON file with extra wallets (strings or objects with an address field)
    #[serde(default)]
    pub wallets_file: Option<PathBuf>,
    #[serde(default = "default_vip_max_wallets")]
    pub max_wallets: usize,
    #[serde(default = "default_vip_poll_secs")]
    pub poll_secs: u64,
    #[serde(default = "default_vip_wallets_per_chunk")]
    pub wallets_per_chunk: usize,
    #[serde(default = "default_vip_chunk_pause_ms")]
    pub chunk_pause_ms: u64,
}

impl Default for VipConfig {
    fn default() -> Self {
        Self {
            wallets: vec![],
            wallets_file: None,
            max_wallets: default_vip_max_wallets(),
            poll_secs: default_vip_poll_secs(),
            wallets_per_chunk: default_vip_wallets_per_chunk(),
            chunk_pause_ms: default_vip_chunk_pause_ms(),
        }
    }
}

/// Timeouts and retry policy shared by every probe
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_http_retries")]
    pub retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_http_timeout_secs(),
            retries: default_http_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcConfig {
    /// Endpoints are used round-robin
    #[serde(default = "default_rpc_endpoints")]
    pub endpoints: Vec<String>,
    #[serde(default = "default_rpc_max_rps")]
    pub max_rps: u32,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            endpoints: default_rpc_endpoints(),
            max_rps: default_rpc_max_rps(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StateConfig {
    #[serde(default = "default_state_path")]
    pub path: PathBuf,
    #[serde(default = "default_state_save_interval_secs")]
    pub save_interval_secs: u64,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            path: default_state_path(),
            save_interval_secs: default_state_save_interval_secs(),
        }
    }
}

/// Outcome analytics storage
#[derive(Debug, Clone, Deserialize)]
pub struct StatsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_stats_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_stats_db_path")]
    pub db_path: PathBuf,
    #[serde(default = "default_roi_horizons_min")]
    pub roi_horizons_min: Vec<u32>,
    #[serde(default = "default_snapshot_interval_secs")]
    pub snapshot_interval_secs: u64,
    #[serde(default = "default_jsonl_max_bytes")]
    pub jsonl_max_bytes: u64,
    #[serde(default = "default_max_jsonl_files")]
    pub max_jsonl_files: usize,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: default_stats_dir(),
            db_path: default_stats_db_path(),
            roi_horizons_min: default_roi_horizons_min(),
            snapshot_interval_secs: default_snapshot_interval_secs(),
            jsonl_max_bytes: default_jsonl_max_bytes(),
            max_jsonl_files: default_max_jsonl_files(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AlertsConfig {
    /// JSON webhook receiving formatted alerts; alerts are only logged when unset
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default)]
    pub dry_run: bool,
}

/// Optional forwarding of signals and outcomes to an analytics webhook
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ForwardingConfig {
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HealthConfig {
    #[serde(default = "default_health_log_secs")]
    pub log_secs: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            log_secs: default_health_log_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LoggingConfig {
    #[serde(default)]
    pub json: bool,
}

// Default value functions
fn default_retention_min() -> u64 {
    180
}

fn default_overlap_window_min() -> u64 {
    15
}

fn default_min_unique_channels_t1() -> usize {
    4
}

fn default_velocity_windows_min() -> Vec<u64> {
    vec![5, 10]
}

fn default_decay_half_life_min() -> f64 {
    60.0
}

fn default_max_tracked_entities() -> usize {
    5_000
}

fn default_retain_after_trim() -> usize {
    1_000
}

fn default_liquidity_min_usd() -> f64 {
    15_000.0
}

fn default_market_cache_ttl_secs() -> u64 {
    60
}

fn default_dexscreener_url() -> String {
    "https://api.dexscreener.com".to_string()
}

fn default_preferred_chain() -> String {
    "solana".to_string()
}

fn default_cache_capacity() -> usize {
    10_000
}

fn default_failure_policy() -> SafetyFailurePolicy {
    SafetyFailurePolicy::RetryAfter
}

fn default_failure_retry_secs() -> u64 {
    300
}

fn default_holders_threshold() -> usize {
    75
}

fn default_largest_wallet_max_pct() -> f64 {
    40.0
}

fn default_t2_liquidity_min_usd() -> f64 {
    50_000.0
}

fn default_t2_drawdown_max_pct() -> f64 {
    10.0
}

fn default_t2_txns_h1_min() -> u64 {
    500
}

fn default_t2_buy_sell_ratio_min() -> f64 {
    1.5
}

fn default_t2_age_min_min() -> f64 {
    30.0
}

fn default_t2_age_max_min() -> f64 {
    90.0
}

fn default_t3_market_cap_min_usd() -> f64 {
    500_000.0
}

fn default_t3_volume24_min_usd() -> f64 {
    2_000_000.0
}

fn default_t3_price_min_x() -> f64 {
    5.0
}

fn default_t3_price_max_x() -> f64 {
    20.0
}

fn default_t3_age_min_min() -> f64 {
    120.0
}

fn default_t3_age_max_min() -> f64 {
    240.0
}

fn default_vip_max_wallets() -> usize {
    50
}

fn default_vip_poll_secs() -> u64 {
    60
}

fn default_vip_wallets_per_chunk() -> usize {
    50
}

fn default_vip_chunk_pause_ms() -> u64 {
    1_000
}

fn default_http_timeout_secs() -> u64 {
    15
}

fn default_http_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    1_500
}

fn default_rpc_endpoints() -> Vec<String> {
    vec!["https://api.mainnet-beta.solana.com".to_string()]
}

fn default_rpc_max_rps() -> u32 {
    10
}

fn default_state_path() -> PathBuf {
    PathBuf::from("var/state.json")
}

fn default_state_save_interval_secs() -> u64 {
    60
}

fn default_stats_dir() -> PathBuf {
    PathBuf::from("var/stats")
}

fn default_stats_db_path() -> PathBuf {
    PathBuf::from("var/stats/stats.db")
}

fn default_roi_horizons_min() -> Vec<u32> {
    vec![15, 60, 240, 1440]
}

fn default_snapshot_interval_secs() -> u64 {
    60
}

fn default_jsonl_max_bytes() -> u64 {
    10 * 1024 * 1024
}

fn default_max_jsonl_files() -> usize {
    5
}

fn default_health_log_secs() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from file and environment variables
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let settings = config::Config::builder()
            // Load from file if exists
            .add_source(config::File::from(path).required(false))
            // Override with environment variables (prefix TIERS__)
            .add_source(
                config::Environment::with_prefix("TIERS")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("vip.wallets")
                    .with_list_parse_key("rpc.endpoints")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: Config = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        // Validate configuration
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let social = &self.social;
        if social.retention_min == 0 || social.overlap_window_min == 0 {
            anyhow::bail!("social windows must be positive");
        }
        if social.overlap_window_min > social.retention_min {
            anyhow::bail!(
                "overlap_window_min ({}) cannot exceed retention_min ({})",
                social.overlap_window_min,
                social.retention_min
            );
        }
        if social.velocity_windows_min.iter().any(|w| *w == 0) {
            anyhow::bail!("velocity windows must be positive");
        }
        if social.decay_half_life_min <= 0.0 {
            anyhow::bail!("decay_half_life_min must be positive");
        }
        if social.retain_after_trim > social.max_tracked_entities {
            anyhow::bail!("retain_after_trim cannot exceed max_tracked_entities");
        }

        if self.t2.age_min_min > self.t2.age_max_min {
            anyhow::bail!("t2 age range is inverted");
        }
        if self.t3.age_min_min > self.t3.age_max_min {
            anyhow::bail!("t3 age range is inverted");
        }
        if self.t3.price_min_x <= 0.0 || self.t3.price_min_x >= self.t3.price_max_x {
            anyhow::bail!(
                "t3 price multiple range [{}, {}) is empty",
                self.t3.price_min_x,
                self.t3.price_max_x
            );
        }
        if !(0.0..=100.0).contains(&self.holders.largest_wallet_max_pct) {
            anyhow::bail!("largest_wallet_max_pct must be between 0 and 100");
        }

        if self.market.cache_ttl_secs == 0 {
            anyhow::bail!("market cache_ttl_secs must be positive");
        }
        if self.rpc.endpoints.is_empty() {
            anyhow::bail!("at least one RPC endpoint is required");
        }
        if self.rpc.max_rps == 0 {
            anyhow::bail!("rpc max_rps must be positive");
        }
        if self.http.timeout_secs == 0 {
            anyhow::bail!("http timeout_secs must be positive");
        }
        if self.vip.wallets_per_chunk == 0 {
            anyhow::bail!("vip wallets_per_chunk must be positive");
        }
        if self.stats.roi_horizons_min.iter().any(|h| *h == 0) {
            anyhow::bail!("roi horizons must be positive");
        }
        if self.state.save_interval_secs == 0 || self.stats.snapshot_interval_secs == 0 {
            anyhow::bail!("loop intervals must be positive");
        }

        if self.safety.failure_policy == SafetyFailurePolicy::Memoize && self.safety.ttl_secs == 0 {
            tracing::warn!(
                "Safety failure_policy is 'memoize' with no TTL - one failed probe blocks an entity for the process lifetime"
            );
        }

        Ok(())
    }

    /// Get masked configuration for display (hide secrets)
    pub fn masked_display(&self) -> String {
        let endpoints: Vec<String> = self.rpc.endpoints.iter().map(|e| mask_url(e)).collect();
        format!(
            r#"Configuration:
  Social:
    retention: {}m
    overlap_window: {}m
    min_unique_channels_t1: {}
    velocity_windows: {:?}
  Market:
    source: {}
    cache_ttl: {}s
    liquidity_floor: ${}
  Safety:
    required: {}
    failure_policy: {:?}
  Tiers:
    t2: liquidity ${} drawdown {}% txns {} ratio {} age {}-{}m
    t3: mcap ${} volume24 ${} multiple {}x-{}x age {}-{}m
  VIP:
    inline_wallets: {}
    poll: {}s
  RPC:
    endpoints: {:?}
    max_rps: {}
  State:
    path: {}
  Stats:
    enabled: {}
    db: {}
    horizons: {:?}
  Alerts:
    webhook: {}
    dry_run: {}
  Forwarding:
    webhook: {}
    api_key: {}
"#,
            self.social.retention_min,
            self.social.overlap_window_min,
            self.social.min_unique_channels_t1,
            self.social.velocity_windows_min,
            self.market.dexscreener_url,
            self.market.cache_ttl_secs,
            self.market.liquidity_min_usd,
            self.safety.mint_safety_required,
            self.safety.failure_policy,
            self.t2.liquidity_min_usd,
            self.t2.drawdown_max_pct,
            self.t2.txns_h1_min,
            self.t2.buy_sell_ratio_min,
            self.t2.age_min_min,
            self.t2.age_max_min,
            self.t3.market_cap_min_usd,
            self.t3.volume24_min_usd,
            self.t3.price_min_x,
            self.t3.price_max_x,
            self.t3.age_min_min,
            self.t3.age_max_min,
            self.vip.wallets.len(),
            self.vip.poll_secs,
            endpoints,
            self.rpc.max_rps,
            self.state.path.display(),
            self.stats.enabled,
            self.stats.db_path.display(),
            self.stats.roi_horizons_min,
            self.alerts
                .webhook_url
                .as_deref()
                .map(mask_url)
                .unwrap_or_else(|| "(log only)".to_string()),
            self.alerts.dry_run,
            self.forwarding
                .webhook_url
                .as_deref()
                .map(mask_url)
                .unwrap_or_else(|| "(not set)".to_string()),
            if self.forwarding.api_key.is_some() {
                "***"
            } else {
                "(not set)"
            },
        )
    }
}

/// Mask URL for display (hide API keys in query params)
fn mask_url(url: &str) -> String {
    if let Some(idx) = url.find('?') {
        format!("{}?***", &url[..idx])
    } else {
        url.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.social.retention_min, 180);
        assert_eq!(config.social.min_unique_channels_t1, 4);
        assert_eq!(config.market.cache_ttl_secs, 60);
        assert_eq!(config.holders.threshold, 75);
        assert_eq!(config.t3.price_max_x, 20.0);
        assert_eq!(config.safety.failure_policy, SafetyFailurePolicy::RetryAfter);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_failure_policy_deserialize() {
        let policy: SafetyFailurePolicy = serde_json::from_str(r#""retry_after""#).unwrap();
        assert_eq!(policy, SafetyFailurePolicy::RetryAfter);
        let policy: SafetyFailurePolicy = serde_json::from_str(r#""memoize""#).unwrap();
        assert_eq!(policy, SafetyFailurePolicy::Memoize);
    }

    #[test]
    fn test_validate_rejects_inverted_ranges() {
        let mut config = Config::default();
        config.t2.age_min_min = 100.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.t3.price_min_x = 30.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.rpc.endpoints.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[social]
overlap_window_min = 20

[safety]
failure_policy = "memoize"

[stats]
roi_horizons_min = [15]
"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.social.overlap_window_min, 20);
        assert_eq!(config.social.retention_min, 180);
        assert_eq!(config.safety.failure_policy, SafetyFailurePolicy::Memoize);
        assert_eq!(config.stats.roi_horizons_min, vec![15]);
    }

    #[test]
    fn test_mask_url() {
        assert_eq!(
            mask_url("https://rpc.example.com?api-key=secret"),
            "https://rpc.example.com?***"
        );
        assert_eq!(mask_url("https://rpc.example.com"), "https://rpc.example.com");
    }
}
