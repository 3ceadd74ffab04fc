//! SQLite article store
//!
//! Runs are stored as one JSON body per row, with the phase copied into its
//! own column for inspection. Memos get a plain table indexed by article.

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use tracing::{debug, info};
use uuid::Uuid;

use super::{ArticleRun, ArticleStore, MemoRecord, StoreError};

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create the database at `path`
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let store = Self {
            conn: Mutex::new(Connection::open(path)?),
        };
        store.init_schema()?;

        info!("Article store opened: {}", path.display());
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        self.conn.lock().execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS article_runs (
                id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                body TEXT NOT NULL,
                updated_at REAL NOT NULL
            );

            CREATE TABLE IF NOT EXISTS memos (
                id TEXT PRIMARY KEY,
                article_id TEXT NOT NULL,
                agent_id TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at REAL NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_memos_article
                ON memos(article_id, created_at);
            "#,
        )?;
        Ok(())
    }

    fn write_run(conn: &Connection, run: &ArticleRun) -> Result<(), StoreError> {
        let body = serde_json::to_string(run)?;
        conn.execute(
            "INSERT INTO article_runs (id, status, body, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                body = excluded.body,
                updated_at = excluded.updated_at",
            params![run.id.to_string(), run.status.as_str(), body, run.updated_at],
        )?;
        Ok(())
    }

    fn load_memo(row: &Row<'_>) -> rusqlite::Result<(String, String, String, String, f64)> {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
    }

    fn parse_memo(
        (id, article_id, agent_id, content, created_at): (String, String, String, String, f64),
    ) -> Result<MemoRecord, StoreError> {
        let parse = |value: &str| {
            Uuid::parse_str(value).map_err(|e| StoreError::Corrupt(format!("memo {}", id), e.to_string()))
        };
        Ok(MemoRecord {
            id: parse(&id)?,
            article_id: parse(&article_id)?,
            agent_id,
            content,
            created_at,
        })
    }
}

#[async_trait]
impl ArticleStore for SqliteStore {
    async fn get_article_run(&self, id: Uuid) -> Result<ArticleRun, StoreError> {
        let conn = self.conn.lock();
        let body: Option<String> = conn
            .query_row(
                "SELECT body FROM article_runs WHERE id = ?1",
                params![id.to_string()],
                |row| row.get(0),
            )
            .optional()?;

        match body {
            Some(body) => Ok(serde_json::from_str(&body)?),
            None => {
                let run = ArticleRun::new(id);
                Self::write_run(&conn, &run)?;
                debug!("Created article run {}", id);
                Ok(run)
            }
        }
    }

    async fn save_article_run(&self, run: &ArticleRun) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        Self::write_run(&conn, run)
    }

    async fn get_memos_by_article(&self, article_id: Uuid) -> Result<Vec<MemoRecord>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, article_id, agent_id, content, created_at FROM memos
             WHERE article_id = ?1
             ORDER BY created_at ASC, rowid ASC",
        )?;

        let rows = stmt
            .query_map(params![article_id.to_string()], Self::load_memo)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter().map(Self::parse_memo).collect()
    }

    async fn get_memo_by_id(&self, memo_id: Uuid) -> Result<Option<MemoRecord>, StoreError> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT id, article_id, agent_id, content, created_at FROM memos WHERE id = ?1",
                params![memo_id.to_string()],
                Self::load_memo,
            )
            .optional()?;

        row.map(Self::parse_memo).transpose()
    }

    async fn save_memo(&self, memo: &MemoRecord) -> Result<(), StoreError> {
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO memos (id, article_id, agent_id, content, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                memo.id.to_string(),
                memo.article_id.to_string(),
                memo.agent_id,
                memo.content,
                memo.created_at
            ],
        )?;
        debug!("Saved memo {} from {}", memo.id, memo.agent_id);
        Ok(())
    }
}
