//! Change classification
//!
//! `classify` is a pure function over a freshly extracted record and the
//! previously stored one, so it can be tested without any storage. The
//! removal pass is a plain set difference computed after a full-catalog
//! traversal; per-item crawling alone cannot observe removals.

use std::collections::{BTreeMap, HashSet};

use crate::domain::book::{BookRecord, COMPARED_FIELDS};
use crate::domain::change::{ChangeEvent, ChangeKind, FieldChange};

/// Outcome of comparing a fresh extraction against stored state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    New,
    Updated(BTreeMap<String, FieldChange>),
}

impl Classification {
    /// Materialize the classification as a persistable change event.
    pub fn into_event(self, book_upc: &str, session_id: &str) -> ChangeEvent {
        match self {
            Classification::New => ChangeEvent::new(book_upc, session_id, ChangeKind::New),
            Classification::Updated(field_changes) => {
                ChangeEvent::new(book_upc, session_id, ChangeKind::Updated)
                    .with_field_changes(field_changes)
            }
        }
    }
}

/// Classify a freshly extracted record against the stored one.
///
/// Returns `None` when the content hash is unchanged: re-crawling
/// unchanged content must produce no side effect.
pub fn classify(new: &BookRecord, previous: Option<&BookRecord>) -> Option<Classification> {
    match previous {
        None => Some(Classification::New),
        Some(previous) if previous.content_hash == new.content_hash => None,
        Some(previous) => {
            let changes = diff_fields(previous, new);
            if changes.is_empty() {
                // The stored hash predates the current canonicalization
                // rules; the fields agree, so treat as unchanged.
                None
            } else {
                Some(Classification::Updated(changes))
            }
        }
    }
}

/// Pairwise diff over the enumerated fields. Difference is decided on
/// canonical values (the same values the hash covers) while the
/// recorded old/new pair uses display form.
pub fn diff_fields(previous: &BookRecord, new: &BookRecord) -> BTreeMap<String, FieldChange> {
    let mut changes = BTreeMap::new();
    for field in COMPARED_FIELDS {
        if previous.canonical_value(field) != new.canonical_value(field) {
            changes.insert(
                field.to_string(),
                FieldChange {
                    old: previous.display_value(field),
                    new: new.display_value(field),
                },
            );
        }
    }
    changes
}

/// Post-traversal reconciliation: every previously known identifier not
/// observed in the current session gets exactly one `removed` event.
pub fn reconcile_removed(
    known: &HashSet<String>,
    observed: &HashSet<String>,
    session_id: &str,
) -> Vec<ChangeEvent> {
    let mut removed: Vec<&String> = known.difference(observed).collect();
    removed.sort();
    removed
        .into_iter()
        .map(|upc| ChangeEvent::new(upc, session_id, ChangeKind::Removed))
        .collect()
}
