//! SQLite analytics store
//!
//! Every timestamp column holds unix seconds. Uniqueness constraints make the
//! snapshot, mention and outcome inserts idempotent.

use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::info;

use super::{OutcomeRecord, SignalEvent};
use crate::error::{Error, Result};
use crate::types::{HoldersSnapshot, MarketSnapshot};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS signals (
        id TEXT PRIMARY KEY,
        ts INTEGER NOT NULL,
        ca TEXT NOT NULL,
        symbol TEXT,
        classification TEXT NOT NULL,
        source_channels TEXT,
        unique_channels INTEGER,
        mentions_total INTEGER,
        liquidity_usd REAL,
        volume24_usd REAL,
        market_cap_usd REAL,
        txns_h1_total INTEGER,
        buy_sell_ratio_h1 REAL,
        price_change_m15 REAL,
        price_usd REAL
    );
    CREATE INDEX IF NOT EXISTS idx_signals_ca_ts ON signals(ca, ts);

    CREATE TABLE IF NOT EXISTS snapshots (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        ts INTEGER NOT NULL,
        ca TEXT NOT NULL,
        price_usd REAL,
        liquidity_usd REAL,
        volume24_usd REAL,
        volume1h_usd REAL,
        market_cap_usd REAL,
        txns_h1_total INTEGER,
        buy_sell_ratio_h1 REAL,
        price_change_m5 REAL,
        price_change_m15 REAL,
        price_change_h1 REAL,
        pair_created_ts INTEGER,
        trending INTEGER,
        UNIQUE(ts, ca)
    );
    CREATE INDEX IF NOT EXISTS idx_snapshots_ca_ts ON snapshots(ca, ts);

    CREATE TABLE IF NOT EXISTS mentions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        ts INTEGER NOT NULL,
        ca TEXT NOT NULL,
        channel TEXT NOT NULL,
        UNIQUE(ts, ca, channel)
    );
    CREATE INDEX IF NOT EXISTS idx_mentions_ca_ts ON mentions(ca, ts);

    CREATE TABLE IF NOT EXISTS coins (
        ca TEXT PRIMARY KEY,
        chain TEXT NOT NULL DEFAULT 'solana',
        first_seen_ts INTEGER,
        last_seen_ts INTEGER,
        symbol TEXT,
        pair_created_ts INTEGER
    );

    CREATE TABLE IF NOT EXISTS holders (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        ts INTEGER NOT NULL,
        ca TEXT NOT NULL,
        supply REAL,
        largest_wallet_pct REAL,
        approx_unique_holders INTEGER,
        UNIQUE(ts, ca) ON CONFLICT REPLACE
    );
    CREATE INDEX IF NOT EXISTS idx_holders_ca_ts ON holders(ca, ts);

    CREATE TABLE IF NOT EXISTS vip_holders (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        ts INTEGER NOT NULL,
        ca TEXT NOT NULL,
        wallet TEXT NOT NULL,
        UNIQUE(ca, wallet)
    );

    CREATE TABLE IF NOT EXISTS outcomes (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        ts INTEGER NOT NULL,
        ca TEXT NOT NULL,
        horizon_min INTEGER NOT NULL,
        roi_pct REAL NOT NULL,
        price_start_usd REAL NOT NULL,
        price_end_usd REAL NOT NULL,
        UNIQUE(ca, horizon_min)
    );
"#;

pub struct StatsStore {
    conn: Mutex<Connection>,
}

impl StatsStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::Storage(format!("Failed to create {}: {}", parent.display(), e))
            })?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        let store = Self::with_connection(conn)?;
        info!("Analytics store ready at {}", path.display());
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Storage("analytics connection poisoned".into()))
    }

    pub fn insert_signal(&self, s: &SignalEvent) -> Result<()> {
        let channels = serde_json::to_string(&s.source_channels)?;
        self.conn()?.execute(
            r#"
            INSERT OR IGNORE INTO signals (
                id, ts, ca, symbol, classification, source_channels, unique_channels,
                mentions_total, liquidity_usd, volume24_usd, market_cap_usd,
                txns_h1_total, buy_sell_ratio_h1, price_change_m15, price_usd
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
            "#,
            params![
                s.id.to_string(),
                s.ts.timestamp(),
                s.entity_id,
                s.symbol,
                s.classification.as_str(),
                channels,
                s.unique_channels as i64,
                s.mentions_total as i64,
                s.liquidity_usd,
                s.volume24_usd,
                s.market_cap_usd,
                s.txns_h1 as i64,
                s.buy_sell_ratio_h1,
                s.price_change_m15,
                s.price_usd,
            ],
        )?;
        Ok(())
    }

    /// Returns false when a snapshot for (ts, entity) already existed
    pub fn insert_snapshot(&self, snap: &MarketSnapshot, ts: i64) -> Result<bool> {
        let changed = self.conn()?.execute(
            r#"
            INSERT OR IGNORE INTO snapshots (
                ts, ca, price_usd, liquidity_usd, volume24_usd, volume1h_usd, market_cap_usd,
                txns_h1_total, buy_sell_ratio_h1, price_change_m5, price_change_m15,
                price_change_h1, pair_created_ts, trending
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            "#,
            params![
                ts,
                snap.entity_id,
                snap.price_usd,
                snap.liquidity_usd,
                snap.volume24_usd,
                snap.volume1h_usd,
                snap.market_cap_usd,
                snap.txns_h1() as i64,
                snap.buy_sell_ratio_h1,
                snap.price_change_m5,
                snap.price_change_m15,
                snap.price_change_h1,
                snap.pair_created_at.map(|t| t.timestamp()),
                snap.trending,
            ],
        )?;
        Ok(changed > 0)
    }

    pub fn upsert_coin(
        &self,
        entity_id: &str,
        symbol: Option<&str>,
        pair_created_ts: Option<i64>,
        seen_ts: i64,
    ) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR IGNORE INTO coins (ca, first_seen_ts, last_seen_ts, symbol, pair_created_ts) \
             VALUES (?1, ?2, ?2, ?3, ?4)",
            params![entity_id, seen_ts, symbol, pair_created_ts],
        )?;
        conn.execute(
            "UPDATE coins SET last_seen_ts = MAX(last_seen_ts, ?2), \
             symbol = COALESCE(?3, symbol), \
             pair_created_ts = COALESCE(?4, pair_created_ts) \
             WHERE ca = ?1",
            params![entity_id, seen_ts, symbol, pair_created_ts],
        )?;
        Ok(())
    }

    pub fn insert_mention(&self, ts: i64, entity_id: &str, channel: &str) -> Result<bool> {
        let changed = self.conn()?.execute(
            "INSERT OR IGNORE INTO mentions (ts, ca, channel) VALUES (?1, ?2, ?3)",
            params![ts, entity_id, channel],
        )?;
        Ok(changed > 0)
    }

    pub fn insert_holders(&self, ts: i64, holders: &HoldersSnapshot) -> Result<()> {
        self.conn()?.execute(
            "INSERT INTO holders (ts, ca, supply, largest_wallet_pct, approx_unique_holders) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                ts,
                holders.entity_id,
                holders.supply,
                holders.largest_holder_pct,
                holders.approx_unique_holders as i64,
            ],
        )?;
        Ok(())
    }

    pub fn insert_vip_holder(&self, ts: i64, entity_id: &str, wallet: &str) -> Result<bool> {
        let changed = self.conn()?.execute(
            "INSERT OR IGNORE INTO vip_holders (ts, ca, wallet) VALUES (?1, ?2, ?3)",
            params![ts, entity_id, wallet],
        )?;
        Ok(changed > 0)
    }

    pub fn earliest_signal_ts(&self, entity_id: &str) -> Result<Option<i64>> {
        let ts = self.conn()?.query_row(
            "SELECT MIN(ts) FROM signals WHERE ca = ?1",
            params![entity_id],
            |row| row.get::<_, Option<i64>>(0),
        )?;
        Ok(ts)
    }

    pub fn earliest_signal_price(&self, entity_id: &str) -> Result<Option<f64>> {
        let price = self
            .conn()?
            .query_row(
                "SELECT price_usd FROM signals WHERE ca = ?1 AND price_usd > 0 \
                 ORDER BY ts ASC LIMIT 1",
                params![entity_id],
                |row| row.get::<_, f64>(0),
            )
            .optional()?;
        Ok(price)
    }

    /// Latest positive snapshot price at or before `ts`
    pub fn snapshot_price_at_or_before(&self, entity_id: &str, ts: i64) -> Result<Option<f64>> {
        let price = self
            .conn()?
            .query_row(
                "SELECT price_usd FROM snapshots WHERE ca = ?1 AND ts <= ?2 AND price_usd > 0 \
                 ORDER BY ts DESC LIMIT 1",
                params![entity_id, ts],
                |row| row.get::<_, f64>(0),
            )
            .optional()?;
        Ok(price)
    }

    /// Earliest positive snapshot price at or after `ts`, with its timestamp
    pub fn first_snapshot_at_or_after(&self, entity_id: &str, ts: i64) -> Result<Option<(i64, f64)>> {
        let row = self
            .conn()?
            .query_row(
                "SELECT ts, price_usd FROM snapshots WHERE ca = ?1 AND ts >= ?2 AND price_usd > 0 \
                 ORDER BY ts ASC LIMIT 1",
                params![entity_id, ts],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, f64>(1)?)),
            )
            .optional()?;
        Ok(row)
    }

    pub fn outcome_exists(&self, entity_id: &str, horizon_min: u32) -> Result<bool> {
        let count: i64 = self.conn()?.query_row(
            "SELECT COUNT(1) FROM outcomes WHERE ca = ?1 AND horizon_min = ?2",
            params![entity_id, horizon_min],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Returns false when an outcome for (entity, horizon) already existed
    pub fn insert_outcome(&self, o: &OutcomeRecord) -> Result<bool> {
        let changed = self.conn()?.execute(
            "INSERT OR IGNORE INTO outcomes (ts, ca, horizon_min, roi_pct, price_start_usd, price_end_usd) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                o.ts.timestamp(),
                o.entity_id,
                o.horizon_min,
                o.roi_pct,
                o.start_price,
                o.end_price,
            ],
        )?;
        Ok(changed > 0)
    }

    pub fn count(&self, table: Table) -> Result<i64> {
        let sql = format!("SELECT COUNT(1) FROM {}", table.name());
        Ok(self.conn()?.query_row(&sql, [], |row| row.get(0))?)
    }
}

/// Tables exposed for counting in heartbeats and tests
#[derive(Debug, Clone, Copy)]
pub enum Table {
    Signals,
    Snapshots,
    Mentions,
    Coins,
    Holders,
    VipHolders,
    Outcomes,
}

impl Table {
    fn name(self) -> &'static str {
        match self {
            Table::Signals => "signals",
            Table::Snapshots => "snapshots",
            Table::Mentions => "mentions",
            Table::Coins => "coins",
            Table::Holders => "holders",
            Table::VipHolders => "vip_holders",
            Table::Outcomes => "outcomes",
        }
    }
}
