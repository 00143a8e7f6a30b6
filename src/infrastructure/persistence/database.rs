use anyhow::{Context, Result};

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tokio::fs;
use tracing::info;

/// Singleton database wrapper
#[allow(dead_code)]
#[derive(Clone)]
pub struct Database {
    pub pool: SqlitePool,
}

impl Database {
    pub async fn new(db_url: &str) -> Result<Self> {
        // Ensure the directory exists if it's a file path
        if let Some(path_part) = db_url.strip_prefix("sqlite://") {
            let path = Path::new(path_part);
            if let Some(parent) = path.parent()
                && !parent.exists()
            {
                fs::create_dir_all(parent)
                    .await
                    .context("Failed to create database directory")?;
            }
        }

        let options = SqliteConnectOptions::from_str(db_url)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal); // Better for concurrency

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("Failed to connect to SQLite database")?;

        info!("Connected to database: {}", db_url);

        let db = Self { pool };
        db.init().await?;

        Ok(db)
    }

    /// Initialize database schema
    async fn init(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await?;

        // 1. OHLCV cache, keyed by symbol/timeframe/timestamp.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS candles (
                symbol TEXT NOT NULL,
                timeframe TEXT NOT NULL,
                timestamp_ms INTEGER NOT NULL,
                open TEXT NOT NULL,
                high TEXT NOT NULL,
                low TEXT NOT NULL,
                close TEXT NOT NULL,
                volume TEXT NOT NULL,
                PRIMARY KEY (symbol, timeframe, timestamp_ms)
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create candles table")?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_candles_symbol_tf_time
            ON candles (symbol, timeframe, timestamp_ms);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create candle index")?;

        // 2. Virtual position snapshot, for startup reconciliation against
        // the exchange's view (see PositionTracker::get_orphaned_positions).
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS positions (
                order_id TEXT PRIMARY KEY,
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                amount TEXT NOT NULL,
                entry_price TEXT NOT NULL,
                opened_at INTEGER NOT NULL,
                take_profit TEXT,
                stop_loss TEXT,
                tp_order_id TEXT,
                sl_order_id TEXT,
                sl_placed_at INTEGER,
                strategy_name TEXT NOT NULL
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create positions table")?;

        // 3. Margin ratio history, bounded ring buffer written by
        // BalanceMonitor (restart survives the in-memory window).
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS margin_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp INTEGER NOT NULL,
                balance TEXT NOT NULL,
                position_value TEXT NOT NULL,
                margin_ratio_pct TEXT NOT NULL,
                status TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_margin_history_time
            ON margin_history (timestamp);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create margin_history table")?;

        // 4. Daily trade count bookkeeping for PositionLimits gate 5.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS daily_trade_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL,
                opened_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_daily_trade_log_time
            ON daily_trade_log (opened_at);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create daily_trade_log table")?;

        info!("Database schema initialized.");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn initializes_schema_on_fresh_database() {
        let db = Database::new("sqlite::memory:").await.unwrap();
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM positions")
            .fetch_one(&db.pool)
            .await
            .unwrap();
        assert_eq!(row.0, 0);
    }
}
