//! Daily change reporting
//!
//! Aggregates the change events recorded during one UTC day into a
//! small summary suitable for printing or JSON export.

use anyhow::Result;
use chrono::{Duration, NaiveDate, NaiveTime};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

use crate::domain::{BookRepository, ChangeKind};

/// Summary of the change events detected on one day.
#[derive(Debug, Clone, Serialize)]
pub struct ChangeReport {
    pub date: NaiveDate,
    pub total_changes: usize,
    pub new_books: usize,
    pub updated_books: usize,
    pub removed_books: usize,
    /// Events touching at least one price field. Counted per event, not
    /// per field: one update changing both prices counts once.
    pub price_changes: usize,
    /// Events touching the availability text or count, counted per
    /// event like `price_changes`.
    pub availability_changes: usize,
    /// Event counts per book category. Books no longer in storage are
    /// grouped under "unknown".
    pub changes_by_category: BTreeMap<String, usize>,
    /// Books with the most events that day, most active first.
    pub most_changed: Vec<BookActivity>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BookActivity {
    pub upc: String,
    pub events: usize,
}

const PRICE_FIELDS: [&str; 3] = ["price_incl_tax", "price_excl_tax", "tax_amount"];
const AVAILABILITY_FIELDS: [&str; 2] = ["availability", "availability_count"];
const MOST_CHANGED_LIMIT: usize = 5;

/// Build the change report for the given UTC day.
pub async fn daily_report(repo: &dyn BookRepository, date: NaiveDate) -> Result<ChangeReport> {
    let start = date.and_time(NaiveTime::MIN).and_utc();
    let end = start + Duration::days(1);
    let events = repo.change_events_between(start, end).await?;

    let mut report = ChangeReport {
        date,
        total_changes: events.len(),
        new_books: 0,
        updated_books: 0,
        removed_books: 0,
        price_changes: 0,
        availability_changes: 0,
        changes_by_category: BTreeMap::new(),
        most_changed: Vec::new(),
    };

    let mut per_book: BTreeMap<&str, usize> = BTreeMap::new();
    for event in &events {
        match event.kind {
            ChangeKind::New => report.new_books += 1,
            ChangeKind::Updated => report.updated_books += 1,
            ChangeKind::Removed => report.removed_books += 1,
        }
        if PRICE_FIELDS.iter().any(|f| event.field_changes.contains_key(*f)) {
            report.price_changes += 1;
        }
        if AVAILABILITY_FIELDS.iter().any(|f| event.field_changes.contains_key(*f)) {
            report.availability_changes += 1;
        }
        *per_book.entry(event.book_upc.as_str()).or_default() += 1;
    }

    for (upc, count) in &per_book {
        let category = repo
            .find_by_upc(upc)
            .await?
            .map(|book| book.category)
            .unwrap_or_else(|| "unknown".to_string());
        *report.changes_by_category.entry(category).or_default() += *count;
    }

    let mut ranked: Vec<BookActivity> = per_book
        .into_iter()
        .map(|(upc, events)| BookActivity { upc: upc.to_string(), events })
        .collect();
    ranked.sort_by(|a, b| b.events.cmp(&a.events).then_with(|| a.upc.cmp(&b.upc)));
    ranked.truncate(MOST_CHANGED_LIMIT);
    report.most_changed = ranked;

    Ok(report)
}

impl fmt::Display for ChangeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Change report for {}", self.date)?;
        writeln!(f, "  total changes:        {}", self.total_changes)?;
        writeln!(f, "  new books:            {}", self.new_books)?;
        writeln!(f, "  updated books:        {}", self.updated_books)?;
        writeln!(f, "  removed books:        {}", self.removed_books)?;
        writeln!(f, "  price changes:        {}", self.price_changes)?;
        writeln!(f, "  availability changes: {}", self.availability_changes)?;
        if !self.changes_by_category.is_empty() {
            writeln!(f, "  by category:")?;
            for (category, count) in &self.changes_by_category {
                writeln!(f, "    {category}: {count}")?;
            }
        }
        if !self.most_changed.is_empty() {
            writeln!(f, "  most changed:")?;
            for entry in &self.most_changed {
                writeln!(f, "    {} ({} events)", entry.upc, entry.events)?;
            }
        }
        Ok(())
    }
}
