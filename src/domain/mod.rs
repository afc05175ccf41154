//! Domain layer - entities, change events and repository seams

pub mod book;
pub mod change;
pub mod checkpoint;
pub mod repositories;
pub mod session;

pub use book::BookRecord;
pub use change::{ChangeEvent, ChangeKind, FieldChange};
pub use checkpoint::Checkpoint;
pub use repositories::BookRepository;
pub use session::{CrawlScope, CrawlSession, SessionStatus};
