use chrono::Utc;
use crate::errors::HoundError;
use crate::models::PackageData;
use crate::pipeline::RunOutcome;
use super::Database;

impl Database {
    /// Persist a finished run. The full package record goes in as JSON so the
    /// ledger and every discovered fact survive verbatim.
    pub fn save_run(
        &self,
        id: &str,
        package: &PackageData,
        outcome: &RunOutcome,
        created_at: &str,
    ) -> Result<(), HoundError> {
        let last_task = match outcome {
            RunOutcome::Completed => None,
            RunOutcome::Aborted { task } | RunOutcome::Halted { task } => Some(*task),
        };
        let record = serde_json::to_string(&package.to_record())?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO runs (id, package, version, outcome, last_task, record_json, created_at, completed_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                id,
                package.name(),
                package.version(),
                outcome.as_str(),
                last_task,
                record,
                created_at,
                Utc::now().to_rfc3339()
            ],
        ).map_err(|e| HoundError::Database(format!("Failed to save run: {}", e)))?;
        Ok(())
    }

    pub fn get_run(&self, id: &str) -> Result<Option<serde_json::Value>, HoundError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, package, version, outcome, last_task, record_json, created_at, completed_at FROM runs WHERE id = ?1"
        ).map_err(|e| HoundError::Database(format!("Query failed: {}", e)))?;

        let result = stmt.query_row(rusqlite::params![id], |row: &rusqlite::Row| {
            Ok(serde_json::json!({
                "id": row.get::<_, String>(0)?,
                "package": row.get::<_, String>(1)?,
                "version": row.get::<_, Option<String>>(2)?,
                "outcome": row.get::<_, String>(3)?,
                "last_task": row.get::<_, Option<String>>(4)?,
                "record_json": row.get::<_, String>(5)?,
                "created_at": row.get::<_, String>(6)?,
                "completed_at": row.get::<_, Option<String>>(7)?,
            }))
        });

        match result {
            Ok(mut v) => {
                // Inline the record so callers see structured JSON, not a string.
                let raw = v
                    .get("record_json")
                    .and_then(|r| r.as_str())
                    .map(str::to_string);
                if let (Some(raw), Some(obj)) = (raw, v.as_object_mut()) {
                    let record: serde_json::Value = serde_json::from_str(&raw)?;
                    obj.remove("record_json");
                    obj.insert("record".to_string(), record);
                }
                Ok(Some(v))
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(HoundError::Database(format!("Query error: {}", e))),
        }
    }

    pub fn list_runs(&self, limit: usize, offset: usize) -> Result<Vec<serde_json::Value>, HoundError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, package, version, outcome, last_task, created_at FROM runs ORDER BY created_at DESC LIMIT ?1 OFFSET ?2"
        ).map_err(|e| HoundError::Database(format!("Query failed: {}", e)))?;

        let rows = stmt.query_map(rusqlite::params![limit as i64, offset as i64], |row: &rusqlite::Row| {
            Ok(serde_json::json!({
                "id": row.get::<_, String>(0)?,
                "package": row.get::<_, String>(1)?,
                "version": row.get::<_, Option<String>>(2)?,
                "outcome": row.get::<_, String>(3)?,
                "last_task": row.get::<_, Option<String>>(4)?,
                "created_at": row.get::<_, String>(5)?,
            }))
        }).map_err(|e| HoundError::Database(format!("Query error: {}", e)))?;

        let mut results: Vec<serde_json::Value> = Vec::new();
        for row in rows {
            results.push(row.map_err(|e| HoundError::Database(format!("Row error: {}", e)))?);
        }
        Ok(results)
    }

    pub fn delete_run(&self, id: &str) -> Result<bool, HoundError> {
        let conn = self.conn.lock().unwrap();
        let affected = conn.execute("DELETE FROM runs WHERE id = ?1", rusqlite::params![id])
            .map_err(|e| HoundError::Database(format!("Delete failed: {}", e)))?;
        Ok(affected > 0)
    }
}
