//! Durable crawl progress marker
//!
//! The checkpoint tracks the listing page currently being processed and
//! the set of item URLs already committed on that page. The page index
//! only advances once every item on the page has reached a terminal
//! state, so resume re-fetches at most one listing page and never
//! re-persists an item that was already committed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Checkpoint {
    pub session_id: String,
    /// 1-based index of the listing page currently in flight.
    pub page_index: u32,
    /// Item URLs on the current page whose record and change event have
    /// been durably persisted.
    pub completed_urls: BTreeSet<String>,
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(session_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            page_index: 1,
            completed_urls: BTreeSet::new(),
            updated_at: Utc::now(),
        }
    }

    pub fn is_completed(&self, url: &str) -> bool {
        self.completed_urls.contains(url)
    }

    /// Record one committed item URL on the current page.
    pub fn mark_completed(&mut self, url: &str) {
        self.completed_urls.insert(url.to_string());
        self.updated_at = Utc::now();
    }

    /// All items on the current page are terminal; move to the next
    /// page and drop the per-page set.
    pub fn advance_page(&mut self) {
        self.page_index += 1;
        self.completed_urls.clear();
        self.updated_at = Utc::now();
    }
}
