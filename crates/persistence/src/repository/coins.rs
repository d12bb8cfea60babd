//! Coin registry repository: tracked symbols and their adopted strategy

use crate::repository::runs::{insert_run, RunRecord};
use crate::{DbError, DbResult};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteConnection;
use sqlx::{FromRow, SqlitePool};
use std::collections::BTreeMap;

/// A tracked coin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct CoinRecord {
    pub id: i64,
    pub symbol: String,
    pub enabled: bool,
    pub strategy: Option<String>,
    pub best_params: Option<String>,
    pub is_active: bool,
    pub prev_return: Option<f64>,
    pub updated_at: Option<i64>,
    pub created_at: Option<i64>,
}

impl CoinRecord {
    /// Decode the stored params object
    pub fn params(&self) -> DbResult<Option<BTreeMap<String, f64>>> {
        self.best_params
            .as_deref()
            .map(|json| {
                serde_json::from_str(json)
                    .map_err(|e| DbError::Query(format!("invalid params for {}: {e}", self.symbol)))
            })
            .transpose()
    }
}

/// Strategy state written after an optimization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyRecord {
    pub symbol: String,
    pub strategy: Option<String>,
    /// JSON object of name -> number
    pub best_params: Option<String>,
    pub is_active: bool,
    pub prev_return: Option<f64>,
}

async fn upsert_strategy(conn: &mut SqliteConnection, record: &StrategyRecord) -> DbResult<()> {
    sqlx::query(
        r#"INSERT INTO coins (symbol, strategy, best_params, is_active, prev_return, updated_at)
           VALUES (?1, ?2, ?3, ?4, ?5, strftime('%s', 'now'))
           ON CONFLICT(symbol) DO UPDATE SET
             strategy = excluded.strategy,
             best_params = excluded.best_params,
             is_active = excluded.is_active,
             prev_return = excluded.prev_return,
             updated_at = strftime('%s', 'now')
        "#,
    )
    .bind(&record.symbol)
    .bind(&record.strategy)
    .bind(&record.best_params)
    .bind(record.is_active)
    .bind(record.prev_return)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Repository for the coin registry
pub struct CoinRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> CoinRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Track a symbol. Returns false if it was already tracked.
    pub async fn add_coin(&self, symbol: &str) -> DbResult<bool> {
        let result = sqlx::query("INSERT OR IGNORE INTO coins (symbol) VALUES (?1)")
            .bind(symbol)
            .execute(self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn remove_coin(&self, symbol: &str) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM coins WHERE symbol = ?1")
            .bind(symbol)
            .execute(self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Include or exclude a symbol from optimization passes
    pub async fn set_enabled(&self, symbol: &str, enabled: bool) -> DbResult<bool> {
        let result = sqlx::query("UPDATE coins SET enabled = ?1 WHERE symbol = ?2")
            .bind(enabled)
            .bind(symbol)
            .execute(self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn list_enabled_symbols(&self) -> DbResult<Vec<String>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT symbol FROM coins WHERE enabled = 1 ORDER BY symbol")
                .fetch_all(self.pool)
                .await?;

        Ok(rows.into_iter().map(|(s,)| s).collect())
    }

    pub async fn get_all(&self) -> DbResult<Vec<CoinRecord>> {
        let records = sqlx::query_as::<_, CoinRecord>("SELECT * FROM coins ORDER BY symbol")
            .fetch_all(self.pool)
            .await?;

        Ok(records)
    }

    pub async fn get_by_symbol(&self, symbol: &str) -> DbResult<Option<CoinRecord>> {
        let record = sqlx::query_as::<_, CoinRecord>("SELECT * FROM coins WHERE symbol = ?1")
            .bind(symbol)
            .fetch_optional(self.pool)
            .await?;

        Ok(record)
    }

    /// Upsert the strategy state of a symbol
    pub async fn record_strategy(&self, record: &StrategyRecord) -> DbResult<()> {
        let mut conn = self.pool.acquire().await?;
        upsert_strategy(&mut conn, record).await
    }

    /// Upsert the strategy state and append the run to history atomically
    pub async fn record_strategy_with_run(
        &self,
        record: &StrategyRecord,
        run: &RunRecord,
    ) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;
        upsert_strategy(&mut tx, record).await?;
        insert_run(&mut tx, run).await?;
        tx.commit().await?;
        Ok(())
    }
}
