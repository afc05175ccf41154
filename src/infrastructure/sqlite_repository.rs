//! SQLite implementation of the crawl persistence interface
//!
//! Prices are stored as TEXT and parsed back through `rust_decimal`,
//! never round-tripped through floats. Checkpoints are stored as one
//! JSON blob per session so a partial page survives process death.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;

use crate::domain::book::BookRecord;
use crate::domain::change::{ChangeEvent, ChangeKind};
use crate::domain::checkpoint::Checkpoint;
use crate::domain::repositories::BookRepository;
use crate::domain::session::{CrawlScope, CrawlSession, SessionStatus};

#[derive(Clone)]
pub struct SqliteBookRepository {
    pool: SqlitePool,
}

impl SqliteBookRepository {
    /// Open (creating if necessary) the database file and run schema
    /// migration.
    pub async fn connect(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating database directory {}", parent.display()))?;
        }

        let options = SqliteConnectOptions::new().filename(path).create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .with_context(|| format!("opening database {}", path.display()))?;

        let repo = Self { pool };
        repo.migrate().await?;
        Ok(repo)
    }

    /// In-memory database for tests.
    pub async fn connect_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new().max_connections(1).connect_with(options).await?;
        let repo = Self { pool };
        repo.migrate().await?;
        Ok(repo)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS books (
                upc TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT,
                category TEXT NOT NULL,
                price_incl_tax TEXT,
                price_excl_tax TEXT,
                tax_amount TEXT,
                availability TEXT NOT NULL,
                availability_count INTEGER,
                number_of_reviews INTEGER NOT NULL DEFAULT 0,
                rating INTEGER NOT NULL DEFAULT 0,
                image_url TEXT,
                url TEXT NOT NULL,
                last_seen_at DATETIME NOT NULL,
                content_hash TEXT NOT NULL,
                raw_html TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS crawl_sessions (
                session_id TEXT PRIMARY KEY,
                scope TEXT NOT NULL DEFAULT 'full_catalog',
                started_at DATETIME NOT NULL,
                completed_at DATETIME,
                status TEXT NOT NULL,
                books_found INTEGER NOT NULL DEFAULT 0,
                books_crawled INTEGER NOT NULL DEFAULT 0,
                books_failed INTEGER NOT NULL DEFAULT 0,
                last_page_index INTEGER NOT NULL DEFAULT 0,
                error_message TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS change_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                book_upc TEXT NOT NULL,
                session_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                field_changes TEXT NOT NULL,
                detected_at DATETIME NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS checkpoints (
                session_id TEXT PRIMARY KEY,
                state TEXT NOT NULL,
                updated_at DATETIME NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        for index_sql in [
            "CREATE INDEX IF NOT EXISTS idx_change_events_upc ON change_events (book_upc)",
            "CREATE INDEX IF NOT EXISTS idx_change_events_detected ON change_events (detected_at)",
            "CREATE INDEX IF NOT EXISTS idx_sessions_started ON crawl_sessions (started_at)",
        ] {
            sqlx::query(index_sql).execute(&self.pool).await?;
        }

        Ok(())
    }

    fn row_to_book(row: &SqliteRow) -> Result<BookRecord> {
        let parse_decimal = |value: Option<String>| -> Option<Decimal> {
            value.and_then(|v| Decimal::from_str(&v).ok())
        };
        Ok(BookRecord {
            upc: row.get("upc"),
            name: row.get("name"),
            description: row.get("description"),
            category: row.get("category"),
            price_incl_tax: parse_decimal(row.get("price_incl_tax")),
            price_excl_tax: parse_decimal(row.get("price_excl_tax")),
            tax_amount: parse_decimal(row.get("tax_amount")),
            availability: row.get("availability"),
            availability_count: row.get::<Option<i64>, _>("availability_count").map(|c| c as u32),
            number_of_reviews: row.get::<i64, _>("number_of_reviews") as u32,
            rating: row.get::<i64, _>("rating") as u8,
            image_url: row.get("image_url"),
            url: row.get("url"),
            last_seen_at: row.get("last_seen_at"),
            content_hash: row.get("content_hash"),
            raw_html: row.get("raw_html"),
        })
    }

    fn row_to_session(row: &SqliteRow) -> CrawlSession {
        CrawlSession {
            session_id: row.get("session_id"),
            scope: row.get::<CrawlScope, _>("scope"),
            started_at: row.get("started_at"),
            completed_at: row.get("completed_at"),
            status: row.get::<SessionStatus, _>("status"),
            books_found: row.get::<i64, _>("books_found") as u32,
            books_crawled: row.get::<i64, _>("books_crawled") as u32,
            books_failed: row.get::<i64, _>("books_failed") as u32,
            last_page_index: row.get::<i64, _>("last_page_index") as u32,
            error_message: row.get("error_message"),
        }
    }
}

#[async_trait]
impl BookRepository for SqliteBookRepository {
    async fn find_by_upc(&self, upc: &str) -> Result<Option<BookRecord>> {
        let row = sqlx::query("SELECT * FROM books WHERE upc = ?")
            .bind(upc)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_book).transpose()
    }

    async fn upsert_book(&self, record: &BookRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO books
            (upc, name, description, category, price_incl_tax, price_excl_tax,
             tax_amount, availability, availability_count, number_of_reviews,
             rating, image_url, url, last_seen_at, content_hash, raw_html)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.upc)
        .bind(&record.name)
        .bind(&record.description)
        .bind(&record.category)
        .bind(record.price_incl_tax.map(|d| d.to_string()))
        .bind(record.price_excl_tax.map(|d| d.to_string()))
        .bind(record.tax_amount.map(|d| d.to_string()))
        .bind(&record.availability)
        .bind(record.availability_count.map(|c| c as i64))
        .bind(record.number_of_reviews as i64)
        .bind(record.rating as i64)
        .bind(&record.image_url)
        .bind(&record.url)
        .bind(record.last_seen_at)
        .bind(&record.content_hash)
        .bind(&record.raw_html)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn all_upcs(&self) -> Result<HashSet<String>> {
        let rows = sqlx::query("SELECT upc FROM books").fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(|row| row.get("upc")).collect())
    }

    async fn upcs_seen_since(&self, since: DateTime<Utc>) -> Result<HashSet<String>> {
        let rows = sqlx::query("SELECT upc FROM books WHERE last_seen_at >= ?")
            .bind(since)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|row| row.get("upc")).collect())
    }

    async fn count_books(&self) -> Result<u64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM books").fetch_one(&self.pool).await?;
        Ok(count as u64)
    }

    async fn append_change_event(&self, event: &ChangeEvent) -> Result<()> {
        let field_changes = serde_json::to_string(&event.field_changes)?;
        sqlx::query(
            r#"
            INSERT INTO change_events (book_upc, session_id, kind, field_changes, detected_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&event.book_upc)
        .bind(&event.session_id)
        .bind(event.kind)
        .bind(field_changes)
        .bind(event.detected_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn change_events_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ChangeEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT book_upc, session_id, kind, field_changes, detected_at
            FROM change_events
            WHERE detected_at >= ? AND detected_at < ?
            ORDER BY detected_at ASC
            "#,
        )
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let field_changes: String = row.get("field_changes");
                Ok(ChangeEvent {
                    book_upc: row.get("book_upc"),
                    session_id: row.get("session_id"),
                    kind: row.get::<ChangeKind, _>("kind"),
                    field_changes: serde_json::from_str(&field_changes)?,
                    detected_at: row.get("detected_at"),
                })
            })
            .collect()
    }

    async fn create_session(&self, session: &CrawlSession) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO crawl_sessions
            (session_id, scope, started_at, completed_at, status, books_found,
             books_crawled, books_failed, last_page_index, error_message)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&session.session_id)
        .bind(&session.scope)
        .bind(session.started_at)
        .bind(session.completed_at)
        .bind(&session.status)
        .bind(session.books_found as i64)
        .bind(session.books_crawled as i64)
        .bind(session.books_failed as i64)
        .bind(session.last_page_index as i64)
        .bind(&session.error_message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_session(&self, session: &CrawlSession) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE crawl_sessions
            SET completed_at = ?, status = ?, books_found = ?, books_crawled = ?,
                books_failed = ?, last_page_index = ?, error_message = ?
            WHERE session_id = ?
            "#,
        )
        .bind(session.completed_at)
        .bind(&session.status)
        .bind(session.books_found as i64)
        .bind(session.books_crawled as i64)
        .bind(session.books_failed as i64)
        .bind(session.last_page_index as i64)
        .bind(&session.error_message)
        .bind(&session.session_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_session(&self, session_id: &str) -> Result<Option<CrawlSession>> {
        let row = sqlx::query("SELECT * FROM crawl_sessions WHERE session_id = ?")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(Self::row_to_session))
    }

    async fn latest_session(&self) -> Result<Option<CrawlSession>> {
        let row = sqlx::query("SELECT * FROM crawl_sessions ORDER BY started_at DESC LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(Self::row_to_session))
    }

    async fn load_checkpoint(&self, session_id: &str) -> Result<Option<Checkpoint>> {
        let row = sqlx::query("SELECT state FROM checkpoints WHERE session_id = ?")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| {
            let state: String = row.get("state");
            serde_json::from_str(&state).context("corrupt checkpoint state")
        })
        .transpose()
    }

    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()> {
        let state = serde_json::to_string(checkpoint)?;
        sqlx::query(
            r#"
            INSERT INTO checkpoints (session_id, state, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(session_id) DO UPDATE SET state = excluded.state,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&checkpoint.session_id)
        .bind(state)
        .bind(checkpoint.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn clear_checkpoint(&self, session_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM checkpoints WHERE session_id = ?")
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
