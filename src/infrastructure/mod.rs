//! Infrastructure layer - configuration, logging, HTTP, parsing, storage

pub mod config;
pub mod extractor;
pub mod http_client;
pub mod logging;
pub mod sqlite_repository;

pub use config::AppConfig;
pub use extractor::{BookExtractor, ExtractError, Listing};
pub use http_client::{FetchError, HttpClient};
pub use logging::init_logging;
pub use sqlite_repository::SqliteBookRepository;
