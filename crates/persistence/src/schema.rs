//! Database schema definitions

/// SQL to create all tables
/// NOTE: params are stored as a JSON object of name -> number
pub const CREATE_TABLES: &str = r#"
-- Coins under optimization and their currently adopted strategy
CREATE TABLE IF NOT EXISTS coins (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    symbol TEXT NOT NULL UNIQUE,
    enabled INTEGER NOT NULL DEFAULT 1,
    strategy TEXT,
    best_params TEXT,
    is_active INTEGER NOT NULL DEFAULT 0,
    prev_return REAL,
    updated_at INTEGER,
    created_at INTEGER DEFAULT (strftime('%s', 'now'))
);

-- One row per symbol per optimization pass
CREATE TABLE IF NOT EXISTS optimization_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id TEXT NOT NULL,
    symbol TEXT NOT NULL,
    params_hash TEXT,
    strategy TEXT,
    params TEXT,
    fitness REAL,
    total_return REAL,
    t_stat REAL,
    p_value REAL,
    samples INTEGER NOT NULL DEFAULT 0,
    trades INTEGER NOT NULL DEFAULT 0,
    win_rate REAL,
    adopted INTEGER NOT NULL DEFAULT 0,
    seed INTEGER,
    created_at INTEGER DEFAULT (strftime('%s', 'now')),
    UNIQUE(run_id, symbol)
);

-- ========== INDEXES ==========

CREATE INDEX IF NOT EXISTS idx_coins_enabled ON coins(enabled);
CREATE INDEX IF NOT EXISTS idx_runs_symbol ON optimization_runs(symbol, id DESC);
CREATE INDEX IF NOT EXISTS idx_runs_hash ON optimization_runs(params_hash)
"#;
