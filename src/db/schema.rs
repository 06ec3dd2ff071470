pub const CREATE_TABLES: &str = "
CREATE TABLE IF NOT EXISTS runs (
    id TEXT PRIMARY KEY,
    package TEXT NOT NULL,
    version TEXT,
    outcome TEXT NOT NULL,
    last_task TEXT,
    record_json TEXT NOT NULL,
    created_at TEXT NOT NULL,
    completed_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_runs_package ON runs(package);
CREATE INDEX IF NOT EXISTS idx_runs_outcome ON runs(outcome);
";
