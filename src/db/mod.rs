//! Trade ledger: every mirror attempt and the positions it built.
//!
//! Stores:
//! - One row per execution attempt (executed, failed or simulated)
//! - Positions aggregated per market outcome, with realized P&L

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use sqlx::{sqlite::SqlitePoolOptions, Sqlite, SqlitePool, Transaction};
use tracing::debug;

use crate::models::{Outcome, Position, TradeSide, TradeSignal};

/// How an execution attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeStatus {
    Executed,
    Failed,
    Simulated,
}

impl TradeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeStatus::Executed => "executed",
            TradeStatus::Failed => "failed",
            TradeStatus::Simulated => "simulated",
        }
    }

    fn moves_position(&self) -> bool {
        !matches!(self, TradeStatus::Failed)
    }
}

impl std::fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persistence collaborator for the mirror pipeline.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Record one execution attempt. `executed_size` is in outcome tokens.
    async fn record_trade(
        &self,
        signal: &TradeSignal,
        executed_size: Decimal,
        executed_price: Decimal,
        status: TradeStatus,
        tx_hash: Option<&str>,
        error: Option<&str>,
    ) -> Result<i64>;

    async fn get_open_positions(&self) -> Result<Vec<Position>>;

    /// Most recent attempts first.
    async fn get_trade_history(&self, limit: i64) -> Result<Vec<TradeRecord>>;

    /// Realized P&L across all positions, open or closed.
    async fn get_total_pnl(&self) -> Result<Decimal>;
}

/// Stored mirror trade record.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TradeRecord {
    pub id: i64,
    pub trader_address: String,
    pub market_id: String,
    pub asset: String,
    pub outcome: String,
    pub side: String,
    pub source_size_usd: f64,
    pub source_price: f64,
    pub source_tx_hash: String,
    pub executed_size: f64,
    pub executed_price: f64,
    pub status: String,
    pub tx_hash: Option<String>,
    pub error_message: Option<String>,
    pub created_at: String,
}

/// Stored position record.
#[derive(Debug, Clone, sqlx::FromRow)]
struct StoredPosition {
    market_id: String,
    outcome: String,
    size: f64,
    average_price: f64,
    cost_basis: f64,
    realized_pnl: f64,
    source_trader: Option<String>,
    updated_at: String,
}

impl StoredPosition {
    fn into_position(self) -> Position {
        let outcome = if self.outcome.eq_ignore_ascii_case("YES") {
            Outcome::Yes
        } else {
            Outcome::No
        };
        Position {
            market_id: self.market_id,
            outcome,
            size: to_decimal(self.size),
            average_price: to_decimal(self.average_price),
            cost_basis: to_decimal(self.cost_basis),
            realized_pnl: to_decimal(self.realized_pnl),
            source_trader: self.source_trader,
            last_updated: DateTime::parse_from_rfc3339(&self.updated_at)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        }
    }
}

/// SQLite-backed ledger.
pub struct SqliteLedger {
    pool: SqlitePool,
}

impl SqliteLedger {
    /// Connect and run migrations. `sqlite::memory:` gets a single
    /// connection so every query sees the same database.
    pub async fn new(database_url: &str) -> Result<Self> {
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .context("Failed to connect to database")?;

        let ledger = Self { pool };
        ledger.run_migrations().await?;

        Ok(ledger)
    }

    /// Run all database migrations.
    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS mirror_trades (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                trader_address TEXT NOT NULL,
                market_id TEXT NOT NULL,
                asset TEXT NOT NULL DEFAULT '',
                outcome TEXT NOT NULL,
                side TEXT NOT NULL,
                source_size_usd REAL NOT NULL,
                source_price REAL NOT NULL,
                source_tx_hash TEXT NOT NULL DEFAULT '',
                executed_size REAL NOT NULL DEFAULT 0,
                executed_price REAL NOT NULL DEFAULT 0,
                status TEXT NOT NULL,
                tx_hash TEXT,
                error_message TEXT,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_mirror_trades_trader ON mirror_trades(trader_address)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS positions (
                market_id TEXT NOT NULL,
                outcome TEXT NOT NULL,
                size REAL NOT NULL DEFAULT 0,
                average_price REAL NOT NULL DEFAULT 0,
                cost_basis REAL NOT NULL DEFAULT 0,
                realized_pnl REAL NOT NULL DEFAULT 0,
                source_trader TEXT,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (market_id, outcome)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Apply a fill to the position for its market outcome.
    async fn apply_fill(
        tx: &mut Transaction<'_, Sqlite>,
        signal: &TradeSignal,
        size: Decimal,
        price: Decimal,
    ) -> Result<()> {
        let existing = sqlx::query_as::<_, StoredPosition>(
            "SELECT * FROM positions WHERE market_id = ? AND outcome = ?",
        )
        .bind(&signal.market_id)
        .bind(signal.outcome.as_str())
        .fetch_optional(&mut **tx)
        .await?;

        let mut position = match (existing, signal.side) {
            (Some(stored), _) => stored.into_position(),
            (None, TradeSide::Buy) => {
                let mut position =
                    Position::new(signal.market_id.clone(), signal.outcome, Decimal::ZERO, price);
                position.source_trader = Some(signal.trader_address.clone());
                position
            }
            (None, TradeSide::Sell) => {
                debug!(market = %signal.market_id, outcome = %signal.outcome, "Sell without a held position, nothing to reduce");
                return Ok(());
            }
        };

        match signal.side {
            TradeSide::Buy => position.add(size, price),
            TradeSide::Sell => {
                let pnl = position.reduce(size, price);
                if position.is_closed() {
                    debug!(market = %position.market_id, outcome = %position.outcome, pnl = %pnl, "Position closed");
                }
            }
        }

        sqlx::query(
            r#"
            INSERT INTO positions (market_id, outcome, size, average_price, cost_basis, realized_pnl, source_trader, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(market_id, outcome) DO UPDATE SET
                size = excluded.size,
                average_price = excluded.average_price,
                cost_basis = excluded.cost_basis,
                realized_pnl = excluded.realized_pnl,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&position.market_id)
        .bind(position.outcome.as_str())
        .bind(to_f64(position.size))
        .bind(to_f64(position.average_price))
        .bind(to_f64(position.cost_basis))
        .bind(to_f64(position.realized_pnl))
        .bind(&position.source_trader)
        .bind(position.last_updated.to_rfc3339())
        .execute(&mut **tx)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl Ledger for SqliteLedger {
    async fn record_trade(
        &self,
        signal: &TradeSignal,
        executed_size: Decimal,
        executed_price: Decimal,
        status: TradeStatus,
        tx_hash: Option<&str>,
        error: Option<&str>,
    ) -> Result<i64> {
        let mut tx = self.pool.begin().await?;

        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO mirror_trades (
                trader_address, market_id, asset, outcome, side,
                source_size_usd, source_price, source_tx_hash,
                executed_size, executed_price, status, tx_hash, error_message
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(&signal.trader_address)
        .bind(&signal.market_id)
        .bind(&signal.asset)
        .bind(signal.outcome.as_str())
        .bind(signal.side.as_str())
        .bind(to_f64(signal.size_usd))
        .bind(to_f64(signal.price))
        .bind(&signal.transaction_hash)
        .bind(to_f64(executed_size))
        .bind(to_f64(executed_price))
        .bind(status.as_str())
        .bind(tx_hash)
        .bind(error)
        .fetch_one(&mut *tx)
        .await
        .context("Failed to record trade")?;

        if status.moves_position() && executed_size > Decimal::ZERO {
            Self::apply_fill(&mut tx, signal, executed_size, executed_price).await?;
        }

        tx.commit().await?;
        Ok(id)
    }

    async fn get_open_positions(&self) -> Result<Vec<Position>> {
        let rows = sqlx::query_as::<_, StoredPosition>(
            "SELECT * FROM positions WHERE size > 0.000001 ORDER BY updated_at DESC",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch positions")?;

        Ok(rows.into_iter().map(StoredPosition::into_position).collect())
    }

    async fn get_trade_history(&self, limit: i64) -> Result<Vec<TradeRecord>> {
        sqlx::query_as::<_, TradeRecord>("SELECT * FROM mirror_trades ORDER BY id DESC LIMIT ?")
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .context("Failed to fetch trade history")
    }

    async fn get_total_pnl(&self) -> Result<Decimal> {
        let (pnl,): (f64,) =
            sqlx::query_as("SELECT COALESCE(SUM(realized_pnl), 0.0) FROM positions")
                .fetch_one(&self.pool)
                .await?;

        Ok(to_decimal(pnl))
    }
}

fn to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}

fn to_decimal(value: f64) -> Decimal {
    Decimal::from_f64(value)
        .map(|d| d.round_dp(8))
        .unwrap_or_default()
}
