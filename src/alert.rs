//! Alert text and delivery sinks

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;
use tracing::info;

use crate::error::{Error, Result};
use crate::ledger::MentionAggregates;
use crate::tier::Tier;
use crate::types::{MarketSnapshot, SafetyResult};

const CHANNEL_NAME_MAX: usize = 20;

/// Everything an alert shows, captured at acceptance time
#[derive(Debug, Clone)]
pub struct AlertView<'a> {
    pub entity_id: &'a str,
    pub tier: Tier,
    pub aggregates: &'a MentionAggregates,
    pub overlap_window_min: u64,
    pub vip_holders: usize,
    pub market: &'a MarketSnapshot,
    pub safety: SafetyResult,
}

fn header(tier: Tier) -> &'static str {
    match tier {
        Tier::T1 => "Consensus T1",
        Tier::T2 => "UPGRADE: T2",
        Tier::T3 => "UPGRADE: T3",
    }
}

/// `ABCD...WXYZ`; identifiers of eight characters or fewer are returned as is
pub fn short_id(id: &str) -> String {
    let chars: Vec<char> = id.chars().collect();
    if chars.len() <= 8 {
        return id.to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}...{}", head, tail)
}

fn channel_label(name: &str) -> String {
    if name.chars().count() <= CHANNEL_NAME_MAX {
        name.to_string()
    } else {
        let head: String = name.chars().take(CHANNEL_NAME_MAX - 3).collect();
        format!("{}...", head)
    }
}

/// Whole-dollar amount with thousands separators
fn usd(amount: f64) -> String {
    let digits = (amount.max(0.0) as u64).to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    format!("${}", out)
}

fn check(ok: bool) -> &'static str {
    if ok {
        "[x]"
    } else {
        "[ ]"
    }
}

pub fn format_alert(view: &AlertView<'_>) -> String {
    let id = view.entity_id;
    let symbol = view.market.symbol.as_deref().unwrap_or("?");
    let channels = view
        .aggregates
        .leading_channels
        .iter()
        .map(|c| channel_label(c))
        .collect::<Vec<_>>()
        .join(", ");
    let velocity = view
        .aggregates
        .velocity
        .iter()
        .map(|v| format!("{}/{}m", v.count, v.window_min))
        .collect::<Vec<_>>()
        .join(", ");

    let mut lines = vec![
        format!("{} - ${}", header(view.tier), symbol),
        format!("CA: {} ({})", id, short_id(id)),
        format!(
            "Mentions: {} | Unique {}m: {} ({})",
            view.aggregates.mentions_total, view.overlap_window_min, view.aggregates.unique_channels, channels
        ),
        format!("Velocity: {} | VIP: {}", velocity, view.vip_holders),
        format!(
            "Liquidity: {} | Volume: {}",
            usd(view.market.liquidity_usd),
            usd(view.market.volume24_usd)
        ),
        format!(
            "Safety: {} Mint revoked, {} Freeze revoked",
            check(view.safety.mint_authority_revoked),
            check(view.safety.freeze_authority_revoked)
        ),
    ];
    lines.push(format!(
        "Links: DexScreener https://dexscreener.com/solana/{id} | Birdeye https://birdeye.so/token/{id}?chain=solana | Jupiter https://jup.ag/swap/SOL-{id}"
    ));
    lines.join("\n")
}

/// Delivery channel for formatted alerts
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn send_alert(&self, entity_id: &str, tier: Tier, body: &str) -> Result<()>;
}

/// Writes alerts to the log only
pub struct LogAlertSink;

#[async_trait]
impl AlertSink for LogAlertSink {
    async fn send_alert(&self, entity_id: &str, tier: Tier, body: &str) -> Result<()> {
        info!(entity = %entity_id, tier = %tier, "ALERT\n{}", body);
        Ok(())
    }
}

/// Posts `{entity_id, tier, text}` as JSON to a webhook
pub struct WebhookAlertSink {
    client: Client,
    url: String,
}

impl WebhookAlertSink {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent("consensus-tiers/0.1")
            .build()
            .map_err(|e| Error::Config(format!("Failed to create alert client: {}", e)))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl AlertSink for WebhookAlertSink {
    async fn send_alert(&self, entity_id: &str, tier: Tier, body: &str) -> Result<()> {
        let payload = json!({
            "entity_id": entity_id,
            "tier": tier,
            "text": body,
        });
        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| Error::AlertDelivery(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::AlertDelivery(format!("HTTP {}: {}", status, text)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::Velocity;
    use chrono::Utc;

    const CA: &str = "7GCihgDB8fe6KNjn2MYtkzZcRjQy3t9GHdC8uHYmW2hr";

    fn aggregates() -> MentionAggregates {
        MentionAggregates {
            mentions_total: 6,
            unique_channels: 4,
            leading_channels: vec![
                "alpha".into(),
                "a-very-long-channel-name-here".into(),
                "gamma".into(),
            ],
            source_channels: vec![],
            velocity: vec![
                Velocity { window_min: 5, count: 3 },
                Velocity { window_min: 10, count: 5 },
            ],
            decayed_score: 5.5,
        }
    }

    #[test]
    fn test_format_t1() {
        let mut market = MarketSnapshot::empty(CA, Utc::now());
        market.symbol = Some("CAT".into());
        market.liquidity_usd = 1_234_567.9;
        market.volume24_usd = 999.0;
        let aggregates = aggregates();

        let text = format_alert(&AlertView {
            entity_id: CA,
            tier: Tier::T1,
            aggregates: &aggregates,
            overlap_window_min: 15,
            vip_holders: 2,
            market: &market,
            safety: SafetyResult {
                mint_authority_revoked: true,
                freeze_authority_revoked: false,
            },
        });
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines[0], "Consensus T1 - $CAT");
        assert_eq!(lines[1], format!("CA: {} (7GCi...W2hr)", CA));
        assert_eq!(
            lines[2],
            "Mentions: 6 | Unique 15m: 4 (alpha, a-very-long-chann..., gamma)"
        );
        assert_eq!(lines[3], "Velocity: 3/5m, 5/10m | VIP: 2");
        assert_eq!(lines[4], "Liquidity: $1,234,567 | Volume: $999");
        assert_eq!(lines[5], "Safety: [x] Mint revoked, [ ] Freeze revoked");
        assert!(lines[6].contains(&format!("https://jup.ag/swap/SOL-{}", CA)));
    }

    #[test]
    fn test_upgrade_header_without_symbol() {
        let market = MarketSnapshot::empty(CA, Utc::now());
        let aggregates = MentionAggregates::default();
        let text = format_alert(&AlertView {
            entity_id: CA,
            tier: Tier::T3,
            aggregates: &aggregates,
            overlap_window_min: 15,
            vip_holders: 0,
            market: &market,
            safety: SafetyResult::FAIL_CLOSED,
        });
        assert!(text.starts_with("UPGRADE: T3 - $?"));
    }

    #[test]
    fn test_short_id() {
        assert_eq!(short_id("abc"), "abc");
        assert_eq!(short_id("abcdefghij"), "abcd...ghij");
    }

    #[tokio::test]
    async fn test_log_sink_accepts() {
        assert!(LogAlertSink.send_alert("E", Tier::T1, "body").await.is_ok());
    }
}
