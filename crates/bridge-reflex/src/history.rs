//! Execution history store: an append-only `execution_log` table backed by
//! `sqlx` + sqlite, recording one row per reflex firing.

use chrono::Utc;
use serde_json::Value;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;

#[derive(Debug, Clone)]
pub struct ExecutionRecord {
    pub id: i64,
    pub timestamp: String,
    pub reflex_id: String,
    pub reflex_name: String,
    pub trigger_type: String,
    pub trigger_context: Value,
    pub action_type: String,
    pub status: String,
    pub output: Option<String>,
    pub tool_calls: Value,
    pub error_message: Option<String>,
}

/// Append-only log of reflex firings. One row per completed reflex run.
pub struct HistoryStore {
    pool: SqlitePool,
}

impl HistoryStore {
    /// Opens (creating if absent) the sqlite database at `path` and ensures
    /// the `execution_log` table exists.
    pub async fn open(path: &str) -> Result<Self, sqlx::Error> {
        let url = format!("sqlite://{path}?mode=rwc");
        let pool = SqlitePoolOptions::new().max_connections(4).connect(&url).await?;
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS execution_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                reflex_id TEXT NOT NULL,
                reflex_name TEXT,
                trigger_type TEXT,
                trigger_context TEXT,
                action_type TEXT,
                status TEXT,
                output TEXT,
                tool_calls TEXT,
                error_message TEXT
            )
            "#,
        )
        .execute(&pool)
        .await?;
        Ok(Self { pool })
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn log_execution(
        &self,
        reflex_id: &str,
        reflex_name: &str,
        trigger_type: &str,
        trigger_context: &Value,
        action_type: &str,
        status: &str,
        output: Option<&str>,
        tool_calls: &Value,
        error_message: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        let timestamp = Utc::now().to_rfc3339();
        let trigger_context_json = trigger_context.to_string();
        let tool_calls_json = tool_calls.to_string();
        sqlx::query(
            r#"
            INSERT INTO execution_log
                (timestamp, reflex_id, reflex_name, trigger_type, trigger_context, action_type, status, output, tool_calls, error_message)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(timestamp)
        .bind(reflex_id)
        .bind(reflex_name)
        .bind(trigger_type)
        .bind(trigger_context_json)
        .bind(action_type)
        .bind(status)
        .bind(output)
        .bind(tool_calls_json)
        .bind(error_message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Most recent `limit` executions, newest first.
    pub async fn recent(&self, limit: i64) -> Result<Vec<ExecutionRecord>, sqlx::Error> {
        let rows = sqlx::query("SELECT * FROM execution_log ORDER BY id DESC LIMIT ?")
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| ExecutionRecord {
                id: row.get("id"),
                timestamp: row.get("timestamp"),
                reflex_id: row.get("reflex_id"),
                reflex_name: row.get::<Option<String>, _>("reflex_name").unwrap_or_default(),
                trigger_type: row.get::<Option<String>, _>("trigger_type").unwrap_or_default(),
                trigger_context: row
                    .get::<Option<String>, _>("trigger_context")
                    .and_then(|s| serde_json::from_str(&s).ok())
                    .unwrap_or(Value::Null),
                action_type: row.get::<Option<String>, _>("action_type").unwrap_or_default(),
                status: row.get::<Option<String>, _>("status").unwrap_or_default(),
                output: row.get("output"),
                tool_calls: row
                    .get::<Option<String>, _>("tool_calls")
                    .and_then(|s| serde_json::from_str(&s).ok())
                    .unwrap_or(Value::Null),
                error_message: row.get("error_message"),
            })
            .collect())
    }

    /// Executions for a single reflex, newest first.
    pub async fn for_reflex(&self, reflex_id: &str, limit: i64) -> Result<Vec<ExecutionRecord>, sqlx::Error> {
        let rows = sqlx::query("SELECT * FROM execution_log WHERE reflex_id = ? ORDER BY id DESC LIMIT ?")
            .bind(reflex_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| ExecutionRecord {
                id: row.get("id"),
                timestamp: row.get("timestamp"),
                reflex_id: row.get("reflex_id"),
                reflex_name: row.get::<Option<String>, _>("reflex_name").unwrap_or_default(),
                trigger_type: row.get::<Option<String>, _>("trigger_type").unwrap_or_default(),
                trigger_context: row
                    .get::<Option<String>, _>("trigger_context")
                    .and_then(|s| serde_json::from_str(&s).ok())
                    .unwrap_or(Value::Null),
                action_type: row.get::<Option<String>, _>("action_type").unwrap_or_default(),
                status: row.get::<Option<String>, _>("status").unwrap_or_default(),
                output: row.get("output"),
                tool_calls: row
                    .get::<Option<String>, _>("tool_calls")
                    .and_then(|s| serde_json::from_str(&s).ok())
                    .unwrap_or(Value::Null),
                error_message: row.get("error_message"),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn logs_and_reads_back_execution() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("history.db");
        let store = HistoryStore::open(db_path.to_str().unwrap()).await.unwrap();
        store
            .log_execution(
                "r1",
                "My Reflex",
                "schedule",
                &json!({"type": "schedule"}),
                "tool",
                "SUCCESS",
                Some("ok"),
                &json!([{"tool": "foo"}]),
                None,
            )
            .await
            .unwrap();
        let recent = store.recent(10).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].reflex_id, "r1");
        assert_eq!(recent[0].status, "SUCCESS");
    }

    #[tokio::test]
    async fn for_reflex_filters_by_id() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("history.db");
        let store = HistoryStore::open(db_path.to_str().unwrap()).await.unwrap();
        store.log_execution("r1", "A", "startup", &json!({}), "tool", "SUCCESS", None, &json!([]), None).await.unwrap();
        store.log_execution("r2", "B", "startup", &json!({}), "tool", "ERROR", None, &json!([]), Some("boom")).await.unwrap();
        let r1_only = store.for_reflex("r1", 10).await.unwrap();
        assert_eq!(r1_only.len(), 1);
        assert_eq!(r1_only[0].reflex_id, "r1");
    }
}
