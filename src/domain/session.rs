//! Crawl session tracking
//!
//! A session is created when a crawl starts, mutated incrementally while
//! pages are processed and finalized exactly once at the end.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Decode, Encode, Type};
use uuid::Uuid;

/// What part of the catalog a session covers. Recorded on the session
/// so a resume never continues under a different scope than the one
/// the checkpoint was written for.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum CrawlScope {
    /// The whole catalog, walked through the paginated index.
    FullCatalog,
    /// A single category listing, given by its first-page URL.
    Category(String),
}

impl CrawlScope {
    const FULL_CATALOG: &'static str = "full_catalog";
    const CATEGORY_PREFIX: &'static str = "category:";

    fn to_db_string(&self) -> String {
        match self {
            CrawlScope::FullCatalog => Self::FULL_CATALOG.to_string(),
            CrawlScope::Category(url) => format!("{}{url}", Self::CATEGORY_PREFIX),
        }
    }

    fn from_db_string(s: &str) -> Result<Self, String> {
        if s == Self::FULL_CATALOG {
            return Ok(CrawlScope::FullCatalog);
        }
        match s.strip_prefix(Self::CATEGORY_PREFIX) {
            Some(url) => Ok(CrawlScope::Category(url.to_string())),
            None => Err(format!("Invalid CrawlScope: {s}")),
        }
    }
}

impl Type<sqlx::Sqlite> for CrawlScope {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <String as Type<sqlx::Sqlite>>::type_info()
    }
}

impl<'q> Encode<'q, sqlx::Sqlite> for CrawlScope {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, sqlx::error::BoxDynError> {
        <String as Encode<sqlx::Sqlite>>::encode(self.to_db_string(), buf)
    }
}

impl<'r> Decode<'r, sqlx::Sqlite> for CrawlScope {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <String as Decode<sqlx::Sqlite>>::decode(value)?;
        Self::from_db_string(&s).map_err(Into::into)
    }
}

/// Terminal and non-terminal states of a crawl session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum SessionStatus {
    Running,
    Completed,
    CompletedWithErrors,
    Failed,
    Interrupted,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Running => "running",
            SessionStatus::Completed => "completed",
            SessionStatus::CompletedWithErrors => "completed_with_errors",
            SessionStatus::Failed => "failed",
            SessionStatus::Interrupted => "interrupted",
        }
    }
}

impl Type<sqlx::Sqlite> for SessionStatus {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <String as Type<sqlx::Sqlite>>::type_info()
    }
}

impl<'q> Encode<'q, sqlx::Sqlite> for SessionStatus {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, sqlx::error::BoxDynError> {
        <String as Encode<sqlx::Sqlite>>::encode(self.as_str().to_string(), buf)
    }
}

impl<'r> Decode<'r, sqlx::Sqlite> for SessionStatus {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <String as Decode<sqlx::Sqlite>>::decode(value)?;
        match s.as_str() {
            "running" => Ok(SessionStatus::Running),
            "completed" => Ok(SessionStatus::Completed),
            "completed_with_errors" => Ok(SessionStatus::CompletedWithErrors),
            "failed" => Ok(SessionStatus::Failed),
            "interrupted" => Ok(SessionStatus::Interrupted),
            _ => Err(format!("Invalid SessionStatus: {s}").into()),
        }
    }
}

/// One crawl run over the catalog (full or category-scoped).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlSession {
    pub session_id: String,
    pub scope: CrawlScope,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: SessionStatus,
    pub books_found: u32,
    pub books_crawled: u32,
    pub books_failed: u32,
    /// Index of the last listing page whose items all reached a
    /// terminal state.
    pub last_page_index: u32,
    pub error_message: Option<String>,
}

impl CrawlSession {
    /// Start a new session with a generated identifier.
    pub fn start(scope: CrawlScope) -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            scope,
            started_at: Utc::now(),
            completed_at: None,
            status: SessionStatus::Running,
            books_found: 0,
            books_crawled: 0,
            books_failed: 0,
            last_page_index: 0,
            error_message: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == SessionStatus::Running
    }

    /// Whether an unfinished crawl can pick this session back up.
    pub fn is_resumable(&self) -> bool {
        matches!(self.status, SessionStatus::Running | SessionStatus::Interrupted)
    }

    /// Reopen an interrupted session so a resumed crawl continues under
    /// the same identifier.
    pub fn resume(&mut self) {
        self.status = SessionStatus::Running;
        self.completed_at = None;
        self.error_message = None;
    }

    /// Move the session to a terminal state. The completion timestamp is
    /// set once and never overwritten.
    pub fn finalize(&mut self, status: SessionStatus, error_message: Option<String>) {
        debug_assert!(self.completed_at.is_none(), "session finalized twice");
        self.status = status;
        self.error_message = error_message;
        if self.completed_at.is_none() {
            self.completed_at = Some(Utc::now());
        }
    }
}
