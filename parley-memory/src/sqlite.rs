//! SQLite-backed conversation history.
//!
//! One row per remembered message. The unique constraint on
//! `(conversation_id, message_id)` rejects replays, so inserts are plain
//! `INSERT`s and never overwrite.

use crate::item::HistoryItem;
use crate::traits::HistoryBackend;
use async_trait::async_trait;
use parley_common::{Error, Result};
use rusqlite::{params, Connection, ErrorCode};
use std::path::{Path, PathBuf};
use std::time::Duration;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS history (
    conversation_id TEXT NOT NULL,
    timestamp REAL NOT NULL,
    message_id TEXT NOT NULL,
    speaker_name TEXT NOT NULL,
    content TEXT NOT NULL,
    created_at TEXT NOT NULL,
    PRIMARY KEY (conversation_id, timestamp, message_id),
    UNIQUE (conversation_id, message_id)
);

CREATE INDEX IF NOT EXISTS idx_history_conversation
    ON history (conversation_id, timestamp);
"#;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite history backend.
pub struct SqliteHistory {
    db_path: PathBuf,
}

fn store_err(e: rusqlite::Error) -> Error {
    Error::Store(e.to_string())
}

fn open(db_path: &Path) -> Result<Connection> {
    let conn = Connection::open(db_path).map_err(store_err)?;
    conn.busy_timeout(BUSY_TIMEOUT).map_err(store_err)?;
    Ok(conn)
}

impl SqliteHistory {
    /// Open (or create) the database at `db_path` and ensure the schema exists.
    pub fn new(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = open(db_path)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))
            .map_err(store_err)?;
        conn.execute_batch(SCHEMA).map_err(store_err)?;

        tracing::debug!(path = %db_path.display(), "History database ready");

        Ok(Self {
            db_path: db_path.to_path_buf(),
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Run `f` against a fresh connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = open(&db_path)?;
            f(&mut conn)
        })
        .await
        .map_err(|e| Error::Internal(format!("history task failed: {e}")))?
    }
}

#[async_trait]
impl HistoryBackend for SqliteHistory {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn load(&self, conversation_id: &str) -> Result<Vec<HistoryItem>> {
        let conversation_id = conversation_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT conversation_id, message_id, speaker_name, content, timestamp
                     FROM history WHERE conversation_id = ?1
                     ORDER BY timestamp ASC, rowid ASC",
                )
                .map_err(store_err)?;
            let rows = stmt
                .query_map(params![conversation_id], |row| {
                    Ok(HistoryItem {
                        conversation_id: row.get(0)?,
                        message_id: row.get(1)?,
                        speaker_name: row.get(2)?,
                        content: row.get(3)?,
                        timestamp: row.get(4)?,
                    })
                })
                .map_err(store_err)?;
            rows.collect::<std::result::Result<Vec<_>, _>>()
                .map_err(store_err)
        })
        .await
    }

    async fn insert(&self, item: &HistoryItem) -> Result<()> {
        let item = item.clone();
        self.with_conn(move |conn| {
            let created_at = chrono::Utc::now().to_rfc3339();
            let res = conn.execute(
                "INSERT INTO history
                     (conversation_id, timestamp, message_id, speaker_name, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    item.conversation_id,
                    item.timestamp,
                    item.message_id,
                    item.speaker_name,
                    item.content,
                    created_at
                ],
            );
            match res {
                Ok(_) => Ok(()),
                Err(rusqlite::Error::SqliteFailure(e, _))
                    if e.code == ErrorCode::ConstraintViolation =>
                {
                    Err(Error::DuplicateItem {
                        conversation_id: item.conversation_id,
                        message_id: item.message_id,
                    })
                }
                Err(e) => Err(store_err(e)),
            }
        })
        .await
    }

    async fn delete(&self, conversation_id: &str, items: &[HistoryItem]) -> Result<usize> {
        if items.is_empty() {
            return Ok(0);
        }
        let conversation_id = conversation_id.to_string();
        let ids: Vec<String> = items.iter().map(|i| i.message_id.clone()).collect();
        self.with_conn(move |conn| {
            let tx = conn.transaction().map_err(store_err)?;
            let mut removed = 0;
            {
                let mut stmt = tx
                    .prepare("DELETE FROM history WHERE conversation_id = ?1 AND message_id = ?2")
                    .map_err(store_err)?;
                for id in &ids {
                    removed += stmt
                        .execute(params![conversation_id, id])
                        .map_err(store_err)?;
                }
            }
            tx.commit().map_err(store_err)?;
            Ok(removed)
        })
        .await
    }

    async fn clear(&self, conversation_id: &str) -> Result<usize> {
        let conversation_id = conversation_id.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "DELETE FROM history WHERE conversation_id = ?1",
                params![conversation_id],
            )
            .map_err(store_err)
        })
        .await
    }

    async fn health_check(&self) -> bool {
        self.with_conn(|conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
                .map_err(store_err)
        })
        .await
        .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, SqliteHistory) {
        let tmp = TempDir::new().unwrap();
        let db = SqliteHistory::new(&tmp.path().join("history.db")).unwrap();
        (tmp, db)
    }

    fn item(conv: &str, id: &str, ts: f64) -> HistoryItem {
        HistoryItem::new(conv, id, "alice", format!("message {id}")).at(ts)
    }

    #[tokio::test]
    async fn insert_and_load_in_order() {
        let (_tmp, db) = setup();
        db.insert(&item("c1", "b", 2.0)).await.unwrap();
        db.insert(&item("c1", "a", 1.0)).await.unwrap();
        db.insert(&item("c2", "z", 0.5)).await.unwrap();

        let loaded = db.load("c1").await.unwrap();
        let ids: Vec<_> = loaded.iter().map(|i| i.message_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(loaded[0], item("c1", "a", 1.0));
    }

    #[tokio::test]
    async fn same_timestamp_keeps_insert_order() {
        let (_tmp, db) = setup();
        db.insert(&item("c1", "first", 5.0)).await.unwrap();
        db.insert(&item("c1", "second", 5.0)).await.unwrap();

        let ids: Vec<_> = db
            .load("c1")
            .await
            .unwrap()
            .into_iter()
            .map(|i| i.message_id)
            .collect();
        assert_eq!(ids, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn duplicate_message_id_rejected() {
        let (_tmp, db) = setup();
        db.insert(&item("c1", "m1", 1.0)).await.unwrap();

        let err = db.insert(&item("c1", "m1", 9.0)).await.unwrap_err();
        assert!(err.is_duplicate());
        assert_eq!(db.load("c1").await.unwrap().len(), 1);

        // same id in another conversation is fine
        db.insert(&item("c2", "m1", 1.0)).await.unwrap();
    }

    #[tokio::test]
    async fn delete_batch_and_clear() {
        let (_tmp, db) = setup();
        let items: Vec<_> = (0..4).map(|i| item("c1", &i.to_string(), i as f64)).collect();
        for it in &items {
            db.insert(it).await.unwrap();
        }

        assert_eq!(db.delete("c1", &items[..2]).await.unwrap(), 2);
        assert_eq!(db.delete("c1", &[]).await.unwrap(), 0);
        assert_eq!(db.load("c1").await.unwrap().len(), 2);

        assert_eq!(db.clear("c1").await.unwrap(), 2);
        assert!(db.load("c1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn health_check_ok() {
        let (_tmp, db) = setup();
        assert!(db.health_check().await);
        assert_eq!(db.name(), "sqlite");
    }
}
