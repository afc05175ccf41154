//! Crawl orchestration
//!
//! Drives the page-by-page traversal of the catalog: listing pages are
//! walked sequentially, detail pages on each listing are fetched
//! concurrently, and every parsed record is classified and committed
//! before its URL enters the checkpoint. The checkpoint page index only
//! advances once a listing page is fully terminal, so a resumed crawl
//! re-fetches at most one listing page and never re-persists a record
//! that was already committed.

use anyhow::{Context, Result};
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::change_detector::{classify, reconcile_removed};
use crate::domain::{BookRepository, Checkpoint, CrawlSession, SessionStatus};

pub use crate::domain::CrawlScope;
use crate::infrastructure::config::CrawlerConfig;
use crate::infrastructure::extractor::BookExtractor;
use crate::infrastructure::http_client::{FetchError, HttpClient};

/// How the session is started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlMode {
    /// Start a new session from page one.
    Fresh,
    /// Continue the most recent unfinished session from its checkpoint.
    /// Falls back to a fresh session when none exists.
    Resume,
}

/// Why the page loop stopped.
enum TraversalEnd {
    /// Ran out of listing pages.
    Finished,
    /// A listing page failed after retries; every page before it was
    /// fully processed.
    ListingFailed(String),
    /// Cancellation was observed before the catalog was exhausted.
    Interrupted,
}

/// Outcome of fetching and parsing one detail page.
enum ItemOutcome {
    Parsed(Box<crate::domain::BookRecord>),
    Failed(String),
    Cancelled,
}

pub struct CrawlOrchestrator {
    config: CrawlerConfig,
    http: Arc<HttpClient>,
    extractor: Arc<BookExtractor>,
    repo: Arc<dyn BookRepository>,
    cancellation: CancellationToken,
}

impl CrawlOrchestrator {
    pub fn new(
        config: CrawlerConfig,
        repo: Arc<dyn BookRepository>,
        cancellation: CancellationToken,
    ) -> Result<Self> {
        let http = Arc::new(HttpClient::new(&config)?);
        let extractor = Arc::new(BookExtractor::new()?);
        Ok(Self { config, http, extractor, repo, cancellation })
    }

    /// Run one crawl session to a terminal state and return it.
    ///
    /// Only storage failures surface as `Err`; fetch and parse failures
    /// of individual pages are recorded on the session instead.
    pub async fn run(&self, mode: CrawlMode, scope: CrawlScope) -> Result<CrawlSession> {
        let (mut session, mut checkpoint) = self.initialize(mode, &scope).await?;
        info!(
            session_id = %session.session_id,
            start_page = checkpoint.page_index,
            scope = ?scope,
            "crawl session starting"
        );

        let mut observed: HashSet<String> = HashSet::new();
        let end = match self.traverse(&mut session, &mut checkpoint, &scope, &mut observed).await {
            Ok(end) => end,
            Err(fatal) => {
                warn!(session_id = %session.session_id, error = %fatal, "crawl aborted");
                session.finalize(SessionStatus::Failed, Some(format!("{fatal:#}")));
                // Best effort; the store is already failing.
                let _ = self.repo.update_session(&session).await;
                return Ok(session);
            }
        };

        // A book whose fetch failed was not observed, so reconciliation
        // only runs after a clean full-catalog pass.
        if matches!(end, TraversalEnd::Finished)
            && session.books_failed == 0
            && scope == CrawlScope::FullCatalog
        {
            self.reconcile(&session, &observed).await?;
        }

        let (status, error_message) = match end {
            TraversalEnd::Interrupted => {
                (SessionStatus::Interrupted, Some("crawl cancelled".to_string()))
            }
            TraversalEnd::ListingFailed(reason) => {
                (SessionStatus::CompletedWithErrors, Some(reason))
            }
            TraversalEnd::Finished if session.books_failed > 0 => {
                (SessionStatus::CompletedWithErrors, None)
            }
            TraversalEnd::Finished => (SessionStatus::Completed, None),
        };

        let resumable = status == SessionStatus::Interrupted;
        session.finalize(status, error_message);
        self.repo.update_session(&session).await?;
        if !resumable {
            self.repo.clear_checkpoint(&session.session_id).await?;
        }

        info!(
            session_id = %session.session_id,
            status = session.status.as_str(),
            found = session.books_found,
            crawled = session.books_crawled,
            failed = session.books_failed,
            "crawl session finished"
        );
        Ok(session)
    }

    async fn initialize(
        &self,
        mode: CrawlMode,
        scope: &CrawlScope,
    ) -> Result<(CrawlSession, Checkpoint)> {
        if mode == CrawlMode::Resume {
            if let Some(mut session) = self.repo.latest_session().await? {
                if session.is_resumable() && session.scope == *scope {
                    let checkpoint = match self.repo.load_checkpoint(&session.session_id).await? {
                        Some(checkpoint) => checkpoint,
                        None => Checkpoint::new(&session.session_id),
                    };
                    info!(
                        session_id = %session.session_id,
                        page = checkpoint.page_index,
                        done_on_page = checkpoint.completed_urls.len(),
                        "resuming interrupted session"
                    );
                    session.resume();
                    // Re-counted page by page as pending items are
                    // dispatched, so the discovered count stays one per
                    // distinct item across interrupt and resume.
                    session.books_found = session.books_crawled + session.books_failed;
                    self.repo.update_session(&session).await?;
                    return Ok((session, checkpoint));
                }
                if session.is_resumable() {
                    warn!(
                        session_id = %session.session_id,
                        "latest unfinished session covers a different scope, starting fresh"
                    );
                } else {
                    info!("latest session already finished, starting fresh");
                }
            }
        }

        let session = CrawlSession::start(scope.clone());
        self.repo.create_session(&session).await?;
        let checkpoint = Checkpoint::new(&session.session_id);
        self.repo.save_checkpoint(&checkpoint).await?;
        Ok((session, checkpoint))
    }

    /// Walk listing pages until the catalog is exhausted, a listing
    /// fetch fails permanently or cancellation is observed.
    async fn traverse(
        &self,
        session: &mut CrawlSession,
        checkpoint: &mut Checkpoint,
        scope: &CrawlScope,
        observed: &mut HashSet<String>,
    ) -> Result<TraversalEnd> {
        loop {
            if self.cancellation.is_cancelled() {
                return Ok(TraversalEnd::Interrupted);
            }

            let page_url = self.listing_url(scope, checkpoint.page_index);
            let html = match self.http.fetch_text(&page_url, &self.cancellation).await {
                Ok(html) => html,
                Err(FetchError::Cancelled { .. }) => return Ok(TraversalEnd::Interrupted),
                Err(err) if err.status() == Some(404) => {
                    // Past the last page.
                    debug!(page_url, "listing returned 404, catalog exhausted");
                    return Ok(TraversalEnd::Finished);
                }
                Err(err) => {
                    warn!(page_url, error = %err, "listing page failed");
                    return Ok(TraversalEnd::ListingFailed(format!(
                        "listing page {page_url} failed: {err}"
                    )));
                }
            };

            let listing = match self.extractor.parse_listing(&html, &page_url) {
                Ok(listing) => listing,
                Err(err) => {
                    warn!(page_url, error = %err, "listing page unparseable");
                    return Ok(TraversalEnd::ListingFailed(format!(
                        "listing page {page_url} unparseable: {err}"
                    )));
                }
            };
            let has_next = listing.next_page.is_some();

            let pending: Vec<String> = listing
                .book_urls
                .into_iter()
                .filter(|url| !checkpoint.is_completed(url))
                .collect();
            session.books_found += pending.len() as u32;
            debug!(
                page = checkpoint.page_index,
                pending = pending.len(),
                skipped = checkpoint.completed_urls.len(),
                "processing listing page"
            );

            let interrupted =
                self.process_page(session, checkpoint, observed, pending).await?;
            if interrupted {
                self.repo.save_checkpoint(checkpoint).await?;
                self.repo.update_session(session).await?;
                return Ok(TraversalEnd::Interrupted);
            }

            session.last_page_index = checkpoint.page_index;
            checkpoint.advance_page();
            self.repo.save_checkpoint(checkpoint).await?;
            self.repo.update_session(session).await?;

            if !has_next {
                return Ok(TraversalEnd::Finished);
            }
        }
    }

    /// Fetch the pending detail pages of one listing concurrently and
    /// commit each result as it arrives. Returns whether cancellation
    /// was observed.
    async fn process_page(
        &self,
        session: &mut CrawlSession,
        checkpoint: &mut Checkpoint,
        observed: &mut HashSet<String>,
        pending: Vec<String>,
    ) -> Result<bool> {
        let mut results = stream::iter(pending.into_iter().map(|url| {
            let http = Arc::clone(&self.http);
            let extractor = Arc::clone(&self.extractor);
            let cancellation = self.cancellation.clone();
            let store_raw_html = self.config.store_raw_html;
            async move {
                let outcome = fetch_and_parse(&http, &extractor, &cancellation, &url, store_raw_html)
                    .await;
                (url, outcome)
            }
        }))
        .buffer_unordered(self.config.max_concurrent_requests as usize);

        let mut interrupted = false;
        while let Some((url, outcome)) = results.next().await {
            match outcome {
                ItemOutcome::Parsed(record) => {
                    self.commit_record(session, checkpoint, observed, &url, *record).await?;
                }
                ItemOutcome::Failed(reason) => {
                    warn!(url, reason, "book page failed");
                    session.books_failed += 1;
                }
                ItemOutcome::Cancelled => {
                    interrupted = true;
                }
            }
        }
        Ok(interrupted)
    }

    /// Persist one parsed record, its change event if any, and the
    /// checkpoint entry, in that order.
    async fn commit_record(
        &self,
        session: &mut CrawlSession,
        checkpoint: &mut Checkpoint,
        observed: &mut HashSet<String>,
        url: &str,
        record: crate::domain::BookRecord,
    ) -> Result<()> {
        let previous = self
            .repo
            .find_by_upc(&record.upc)
            .await
            .with_context(|| format!("looking up previous record for {}", record.upc))?;
        let classification = classify(&record, previous.as_ref());

        self.repo
            .upsert_book(&record)
            .await
            .with_context(|| format!("persisting book {}", record.upc))?;
        if let Some(classification) = classification {
            let event = classification.into_event(&record.upc, &session.session_id);
            debug!(upc = %record.upc, kind = event.kind.as_str(), "change detected");
            self.repo
                .append_change_event(&event)
                .await
                .with_context(|| format!("recording change event for {}", record.upc))?;
        }

        observed.insert(record.upc.clone());
        checkpoint.mark_completed(url);
        self.repo.save_checkpoint(checkpoint).await.context("saving checkpoint")?;
        session.books_crawled += 1;
        Ok(())
    }

    /// Emit `Removed` events for known books the finished full-catalog
    /// pass did not encounter. On a resumed session the in-memory
    /// observed set misses everything committed before the interrupt,
    /// so it is widened with records persisted since the session began.
    async fn reconcile(&self, session: &CrawlSession, observed: &HashSet<String>) -> Result<()> {
        let mut seen = self.repo.upcs_seen_since(session.started_at).await?;
        seen.extend(observed.iter().cloned());
        let known = self.repo.all_upcs().await?;

        let events = reconcile_removed(&known, &seen, &session.session_id);
        if !events.is_empty() {
            info!(removed = events.len(), "books no longer listed");
        }
        for event in &events {
            self.repo
                .append_change_event(event)
                .await
                .with_context(|| format!("recording removal of {}", event.book_upc))?;
        }
        Ok(())
    }

    fn listing_url(&self, scope: &CrawlScope, page_index: u32) -> String {
        match scope {
            CrawlScope::FullCatalog => {
                let base = self.config.base_url.trim_end_matches('/');
                format!("{base}/catalogue/page-{page_index}.html")
            }
            CrawlScope::Category(first_page) if page_index == 1 => first_page.clone(),
            CrawlScope::Category(first_page) => {
                let base = first_page.trim_end_matches("index.html").trim_end_matches('/');
                format!("{base}/page-{page_index}.html")
            }
        }
    }
}

async fn fetch_and_parse(
    http: &HttpClient,
    extractor: &BookExtractor,
    cancellation: &CancellationToken,
    url: &str,
    store_raw_html: bool,
) -> ItemOutcome {
    let html = match http.fetch_text(url, cancellation).await {
        Ok(html) => html,
        Err(FetchError::Cancelled { .. }) => return ItemOutcome::Cancelled,
        Err(err) => return ItemOutcome::Failed(err.to_string()),
    };
    match extractor.parse_book(&html, url, store_raw_html) {
        Ok(record) => ItemOutcome::Parsed(Box::new(record)),
        Err(err) => ItemOutcome::Failed(err.to_string()),
    }
}
