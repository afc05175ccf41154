//! Change events emitted when a book's stored state differs from a
//! fresh extraction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Decode, Encode, Type};
use std::collections::BTreeMap;

/// Kind of detected change.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    New,
    Updated,
    Removed,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::New => "new",
            ChangeKind::Updated => "updated",
            ChangeKind::Removed => "removed",
        }
    }
}

impl Type<sqlx::Sqlite> for ChangeKind {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <String as Type<sqlx::Sqlite>>::type_info()
    }
}

impl<'q> Encode<'q, sqlx::Sqlite> for ChangeKind {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, sqlx::error::BoxDynError> {
        <String as Encode<sqlx::Sqlite>>::encode(self.as_str().to_string(), buf)
    }
}

impl<'r> Decode<'r, sqlx::Sqlite> for ChangeKind {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <String as Decode<sqlx::Sqlite>>::decode(value)?;
        match s.as_str() {
            "new" => Ok(ChangeKind::New),
            "updated" => Ok(ChangeKind::Updated),
            "removed" => Ok(ChangeKind::Removed),
            _ => Err(format!("Invalid ChangeKind: {s}").into()),
        }
    }
}

/// Old and new value of a single field. `None` means the field had no
/// value on that side.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FieldChange {
    pub old: Option<String>,
    pub new: Option<String>,
}

/// One change observed for one book in one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub book_upc: String,
    pub session_id: String,
    pub kind: ChangeKind,
    /// Per-field diff; empty for `New` and `Removed`.
    pub field_changes: BTreeMap<String, FieldChange>,
    pub detected_at: DateTime<Utc>,
}

impl ChangeEvent {
    pub fn new(book_upc: &str, session_id: &str, kind: ChangeKind) -> Self {
        Self {
            book_upc: book_upc.to_string(),
            session_id: session_id.to_string(),
            kind,
            field_changes: BTreeMap::new(),
            detected_at: Utc::now(),
        }
    }

    pub fn with_field_changes(mut self, field_changes: BTreeMap<String, FieldChange>) -> Self {
        self.field_changes = field_changes;
        self
    }
}
