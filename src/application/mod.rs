//! Application layer - crawl orchestration, change detection, reporting

pub mod change_detector;
pub mod orchestrator;
pub mod report;

pub use change_detector::{classify, diff_fields, reconcile_removed, Classification};
pub use orchestrator::{CrawlMode, CrawlOrchestrator, CrawlScope};
pub use report::{daily_report, ChangeReport};
