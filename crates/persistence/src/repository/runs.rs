//! Optimization history repository

use crate::DbResult;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteConnection;
use sqlx::{FromRow, SqlitePool};

/// Outcome of optimizing one symbol in one pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct RunRecord {
    pub id: Option<i64>,
    pub run_id: String,
    pub symbol: String,
    pub params_hash: Option<String>,
    pub strategy: Option<String>,
    /// Champion params as a JSON object
    pub params: Option<String>,
    pub fitness: Option<f64>,
    pub total_return: Option<f64>,
    pub t_stat: Option<f64>,
    pub p_value: Option<f64>,
    pub samples: i64,
    pub trades: i64,
    pub win_rate: Option<f64>,
    pub adopted: bool,
    pub seed: Option<i64>,
    pub created_at: Option<i64>,
}

/// Per-symbol adoption counts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct AdoptionStats {
    pub symbol: String,
    pub runs: i64,
    pub adopted: i64,
    pub last_run_at: Option<i64>,
}

/// Insert (or replace a rerun of) a run row on an open connection
pub(crate) async fn insert_run(conn: &mut SqliteConnection, run: &RunRecord) -> DbResult<i64> {
    let result = sqlx::query(
        r#"INSERT INTO optimization_runs
            (run_id, symbol, params_hash, strategy, params, fitness, total_return,
             t_stat, p_value, samples, trades, win_rate, adopted, seed)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
           ON CONFLICT(run_id, symbol) DO UPDATE SET
             params_hash = excluded.params_hash,
             strategy = excluded.strategy,
             params = excluded.params,
             fitness = excluded.fitness,
             total_return = excluded.total_return,
             t_stat = excluded.t_stat,
             p_value = excluded.p_value,
             samples = excluded.samples,
             trades = excluded.trades,
             win_rate = excluded.win_rate,
             adopted = excluded.adopted,
             seed = excluded.seed
        "#,
    )
    .bind(&run.run_id)
    .bind(&run.symbol)
    .bind(&run.params_hash)
    .bind(&run.strategy)
    .bind(&run.params)
    .bind(run.fitness)
    .bind(run.total_return)
    .bind(run.t_stat)
    .bind(run.p_value)
    .bind(run.samples)
    .bind(run.trades)
    .bind(run.win_rate)
    .bind(run.adopted)
    .bind(run.seed)
    .execute(&mut *conn)
    .await?;

    Ok(result.last_insert_rowid())
}

/// Repository for optimization run history
pub struct RunRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> RunRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, run: &RunRecord) -> DbResult<i64> {
        let mut conn = self.pool.acquire().await?;
        insert_run(&mut conn, run).await
    }

    /// Most recent runs first, optionally for one symbol
    pub async fn recent(&self, symbol: Option<&str>, limit: i64) -> DbResult<Vec<RunRecord>> {
        let records = match symbol {
            Some(symbol) => {
                sqlx::query_as::<_, RunRecord>(
                    "SELECT * FROM optimization_runs WHERE symbol = ?1 ORDER BY id DESC LIMIT ?2",
                )
                .bind(symbol)
                .bind(limit)
                .fetch_all(self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, RunRecord>(
                    "SELECT * FROM optimization_runs ORDER BY id DESC LIMIT ?1",
                )
                .bind(limit)
                .fetch_all(self.pool)
                .await?
            }
        };

        Ok(records)
    }

    /// How often each symbol's champion passed the significance gate
    pub async fn adoption_stats(&self) -> DbResult<Vec<AdoptionStats>> {
        let stats = sqlx::query_as::<_, AdoptionStats>(
            r#"SELECT symbol,
                      COUNT(*) AS runs,
                      COALESCE(SUM(adopted), 0) AS adopted,
                      MAX(created_at) AS last_run_at
               FROM optimization_runs
               GROUP BY symbol
               ORDER BY symbol"#,
        )
        .fetch_all(self.pool)
        .await?;

        Ok(stats)
    }
}
