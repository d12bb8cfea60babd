//! SQLite-backed strategy registry

use async_trait::async_trait;
use persistence::repository::{CoinRepository, RunRecord, StrategyRecord};
use persistence::SqlitePool;
use sha2::{Digest, Sha256};

use crate::error::{EngineError, EngineResult};
use crate::ports::{StrategyRegistry, StrategyUpdate};
use crate::types::{Params, StrategyType};

/// Deterministic identity of a parameter set, for deduplicating history
pub fn params_hash(strategy_type: StrategyType, params: &Params) -> String {
    let json = serde_json::to_string(params).unwrap_or_default();
    let input = format!("{}:{}", strategy_type.as_str(), json);
    let hash = Sha256::digest(input.as_bytes());
    format!("{:x}", hash)
}

fn params_json(params: &Params) -> EngineResult<String> {
    serde_json::to_string(params).map_err(|e| EngineError::Registry(e.to_string()))
}

fn finite(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite())
}

pub struct SqliteRegistry {
    pool: SqlitePool,
}

impl SqliteRegistry {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn strategy_record(update: &StrategyUpdate) -> EngineResult<StrategyRecord> {
        Ok(StrategyRecord {
            symbol: update.symbol.clone(),
            strategy: update.strategy_type.map(|t| t.as_str().to_string()),
            best_params: update.params.as_ref().map(params_json).transpose()?,
            is_active: update.active,
            prev_return: finite(update.total_return),
        })
    }
}

#[async_trait]
impl StrategyRegistry for SqliteRegistry {
    async fn list_active_symbols(&self) -> EngineResult<Vec<String>> {
        Ok(CoinRepository::new(&self.pool)
            .list_enabled_symbols()
            .await?)
    }

    async fn record_strategy(&self, update: &StrategyUpdate) -> EngineResult<()> {
        let repo = CoinRepository::new(&self.pool);
        let record = Self::strategy_record(update)?;

        let Some(diag) = &update.diagnostics else {
            return Ok(repo.record_strategy(&record).await?);
        };

        let hash = match (diag.strategy_type, &diag.params) {
            (Some(st), Some(params)) => Some(params_hash(st, params)),
            _ => None,
        };
        let run = RunRecord {
            id: None,
            run_id: diag.run_id.clone(),
            symbol: update.symbol.clone(),
            params_hash: hash,
            strategy: diag.strategy_type.map(|t| t.as_str().to_string()),
            params: diag.params.as_ref().map(params_json).transpose()?,
            fitness: finite(diag.fitness),
            total_return: finite(diag.total_return),
            t_stat: finite(diag.t_stat),
            p_value: finite(diag.p_value),
            samples: diag.samples as i64,
            trades: diag.trades as i64,
            win_rate: finite(diag.win_rate),
            adopted: update.active,
            // Stored bit-for-bit; read back with `as u64`
            seed: Some(diag.seed as i64),
            created_at: None,
        };

        Ok(repo.record_strategy_with_run(&record, &run).await?)
    }
}
