//! Repository interface for crawl persistence
//!
//! The orchestrator and change detector only touch storage through this
//! trait; any write failure behind it is fatal to the running session.

use async_trait::async_trait;
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::HashSet;

use crate::domain::book::BookRecord;
use crate::domain::change::ChangeEvent;
use crate::domain::checkpoint::Checkpoint;
use crate::domain::session::CrawlSession;

#[async_trait]
pub trait BookRepository: Send + Sync {
    // Book records
    async fn find_by_upc(&self, upc: &str) -> Result<Option<BookRecord>>;
    async fn upsert_book(&self, record: &BookRecord) -> Result<()>;
    async fn all_upcs(&self) -> Result<HashSet<String>>;
    /// Identifiers of books persisted at or after the given instant;
    /// used to rebuild the observed set when a resumed session reaches
    /// the removal reconciliation pass.
    async fn upcs_seen_since(&self, since: DateTime<Utc>) -> Result<HashSet<String>>;
    async fn count_books(&self) -> Result<u64>;

    // Change events
    async fn append_change_event(&self, event: &ChangeEvent) -> Result<()>;
    /// Events with `start <= detected_at < end`, oldest first.
    async fn change_events_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ChangeEvent>>;

    // Sessions
    async fn create_session(&self, session: &CrawlSession) -> Result<()>;
    async fn update_session(&self, session: &CrawlSession) -> Result<()>;
    async fn find_session(&self, session_id: &str) -> Result<Option<CrawlSession>>;
    async fn latest_session(&self) -> Result<Option<CrawlSession>>;

    // Checkpoints
    async fn load_checkpoint(&self, session_id: &str) -> Result<Option<Checkpoint>>;
    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()>;
    async fn clear_checkpoint(&self, session_id: &str) -> Result<()>;
}
