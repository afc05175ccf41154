//! bookwatch - catalog crawler with change detection
//!
//! Crawls a paginated book catalog, normalizes each detail page into a
//! `BookRecord`, persists records to SQLite and classifies changes
//! (new / updated / removed) between crawl sessions by content hash.

pub mod application;
pub mod domain;
pub mod infrastructure;
