//! End-to-end crawl scenarios against a local mock catalog.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use bookwatch::application::{CrawlMode, CrawlOrchestrator, CrawlScope};
use bookwatch::domain::{
    BookRepository, ChangeEvent, ChangeKind, Checkpoint, CrawlSession, SessionStatus,
};
use bookwatch::infrastructure::config::CrawlerConfig;
use bookwatch::infrastructure::{AppConfig, SqliteBookRepository};

fn listing_page(book_hrefs: &[&str], next: Option<&str>) -> String {
    let mut body = String::from("<html><body>");
    for href in book_hrefs {
        body.push_str(&format!(
            r#"<article class="product_pod"><h3><a href="{href}">a book</a></h3></article>"#
        ));
    }
    if let Some(next) = next {
        body.push_str(&format!(
            r#"<ul class="pager"><li class="next"><a href="{next}">next</a></li></ul>"#
        ));
    }
    body.push_str("</body></html>");
    body
}

fn detail_page(upc: &str, title: &str, price: &str, availability: &str) -> String {
    format!(
        r#"
        <html><body>
        <ul class="breadcrumb">
            <li><a href="/">Home</a></li>
            <li><a href="/catalogue/category/books_1/index.html">Books</a></li>
            <li><a href="/catalogue/category/books/poetry_23/index.html">Poetry</a></li>
            <li class="active">{title}</li>
        </ul>
        <div class="product_main">
            <h1>{title}</h1>
            <p class="price_color">{price}</p>
            <p class="availability">{availability}</p>
            <p class="star-rating Three"></p>
        </div>
        <table class="table table-striped">
            <tr><th>UPC</th><td>{upc}</td></tr>
            <tr><th>Price (excl. tax)</th><td>{price}</td></tr>
            <tr><th>Price (incl. tax)</th><td>{price}</td></tr>
            <tr><th>Tax</th><td>£0.00</td></tr>
            <tr><th>Availability</th><td>{availability}</td></tr>
            <tr><th>Number of reviews</th><td>2</td></tr>
        </table>
        </body></html>
        "#
    )
}

async fn mount_html(server: &MockServer, url_path: &str, body: String) {
    Mock::given(method("GET"))
        .and(path(url_path))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

/// Two listing pages with three books in total.
async fn mount_three_book_catalog(server: &MockServer) {
    mount_html(
        server,
        "/catalogue/page-1.html",
        listing_page(&["book-1.html", "book-2.html"], Some("page-2.html")),
    )
    .await;
    mount_html(server, "/catalogue/page-2.html", listing_page(&["book-3.html"], None)).await;
    for n in 1..=3 {
        mount_html(
            server,
            &format!("/catalogue/book-{n}.html"),
            detail_page(&format!("upc-{n}"), &format!("Book {n}"), "£19.99", "In stock (5 available)"),
        )
        .await;
    }
}

fn crawler_config(base_url: &str) -> CrawlerConfig {
    let mut config = AppConfig::default().crawler;
    config.base_url = base_url.to_string();
    config.max_concurrent_requests = 4;
    config.retry_attempts = 2;
    config.retry_delay_ms = 10;
    config.politeness_delay_ms = 1;
    config.request_timeout_secs = 5;
    config
}

async fn run_crawl(
    server: &MockServer,
    repo: &SqliteBookRepository,
    mode: CrawlMode,
    scope: CrawlScope,
) -> CrawlSession {
    let orchestrator = CrawlOrchestrator::new(
        crawler_config(&server.uri()),
        Arc::new(repo.clone()),
        CancellationToken::new(),
    )
    .unwrap();
    orchestrator.run(mode, scope).await.unwrap()
}

async fn events_for(repo: &SqliteBookRepository, session: &CrawlSession) -> Vec<ChangeEvent> {
    repo.change_events_between(
        session.started_at - Duration::minutes(1),
        Utc::now() + Duration::minutes(1),
    )
    .await
    .unwrap()
    .into_iter()
    .filter(|event| event.session_id == session.session_id)
    .collect()
}

#[tokio::test]
async fn fresh_crawl_stores_books_and_logs_new_events() {
    let server = MockServer::start().await;
    mount_three_book_catalog(&server).await;
    let repo = SqliteBookRepository::connect_in_memory().await.unwrap();

    let session = run_crawl(&server, &repo, CrawlMode::Fresh, CrawlScope::FullCatalog).await;

    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.books_found, 3);
    assert_eq!(session.books_crawled, 3);
    assert_eq!(session.books_failed, 0);
    assert_eq!(repo.count_books().await.unwrap(), 3);

    let events = events_for(&repo, &session).await;
    assert_eq!(events.len(), 3);
    assert!(events.iter().all(|e| e.kind == ChangeKind::New));

    let stored = repo.find_by_upc("upc-1").await.unwrap().unwrap();
    assert_eq!(stored.name, "Book 1");
    assert_eq!(stored.category, "Poetry");
    assert_eq!(stored.availability_count, Some(5));
    assert_eq!(stored.rating, 3);

    // Terminal sessions leave no checkpoint behind.
    assert!(repo.load_checkpoint(&session.session_id).await.unwrap().is_none());
}

#[tokio::test]
async fn recrawl_without_changes_is_silent() {
    let server = MockServer::start().await;
    mount_three_book_catalog(&server).await;
    let repo = SqliteBookRepository::connect_in_memory().await.unwrap();

    run_crawl(&server, &repo, CrawlMode::Fresh, CrawlScope::FullCatalog).await;
    let second = run_crawl(&server, &repo, CrawlMode::Fresh, CrawlScope::FullCatalog).await;

    assert_eq!(second.status, SessionStatus::Completed);
    assert_eq!(second.books_crawled, 3);
    assert!(events_for(&repo, &second).await.is_empty());
}

#[tokio::test]
async fn price_change_yields_updated_event_with_price_diff() {
    let server = MockServer::start().await;
    mount_three_book_catalog(&server).await;
    let repo = SqliteBookRepository::connect_in_memory().await.unwrap();

    run_crawl(&server, &repo, CrawlMode::Fresh, CrawlScope::FullCatalog).await;

    server.reset().await;
    // wiremock serves the first matching mock in mount order, so the
    // changed book-1 page must be mounted before the full catalog.
    mount_html(
        &server,
        "/catalogue/book-1.html",
        detail_page("upc-1", "Book 1", "£24.99", "In stock (5 available)"),
    )
    .await;
    mount_three_book_catalog(&server).await;

    let second = run_crawl(&server, &repo, CrawlMode::Fresh, CrawlScope::FullCatalog).await;
    let events = events_for(&repo, &second).await;

    assert_eq!(events.len(), 1);
    let event = &events[0];
    assert_eq!(event.kind, ChangeKind::Updated);
    assert_eq!(event.book_upc, "upc-1");
    let fields: Vec<&str> = event.field_changes.keys().map(String::as_str).collect();
    assert_eq!(fields, ["price_excl_tax", "price_incl_tax"]);
    assert_eq!(event.field_changes["price_incl_tax"].old.as_deref(), Some("19.99"));
    assert_eq!(event.field_changes["price_incl_tax"].new.as_deref(), Some("24.99"));
}

#[tokio::test]
async fn failed_detail_page_marks_errors_but_completes() {
    let server = MockServer::start().await;
    mount_html(
        &server,
        "/catalogue/page-1.html",
        listing_page(&["book-1.html", "book-2.html"], None),
    )
    .await;
    mount_html(
        &server,
        "/catalogue/book-1.html",
        detail_page("upc-1", "Book 1", "£19.99", "In stock"),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/catalogue/book-2.html"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    let repo = SqliteBookRepository::connect_in_memory().await.unwrap();

    let session = run_crawl(&server, &repo, CrawlMode::Fresh, CrawlScope::FullCatalog).await;

    assert_eq!(session.status, SessionStatus::CompletedWithErrors);
    assert_eq!(session.books_crawled, 1);
    assert_eq!(session.books_failed, 1);
    assert_eq!(repo.count_books().await.unwrap(), 1);
}

#[tokio::test]
async fn resume_skips_committed_work() {
    let server = MockServer::start().await;
    mount_html(
        &server,
        "/catalogue/page-1.html",
        listing_page(&["book-1.html", "book-2.html"], Some("page-2.html")),
    )
    .await;
    mount_html(&server, "/catalogue/page-2.html", listing_page(&["book-3.html"], None)).await;
    for n in 2..=3 {
        mount_html(
            &server,
            &format!("/catalogue/book-{n}.html"),
            detail_page(&format!("upc-{n}"), &format!("Book {n}"), "£19.99", "In stock"),
        )
        .await;
    }
    // book-1 was committed before the interrupt and must not be refetched.
    Mock::given(method("GET"))
        .and(path("/catalogue/book-1.html"))
        .respond_with(ResponseTemplate::new(200).set_body_string(detail_page(
            "upc-1",
            "Book 1",
            "£19.99",
            "In stock",
        )))
        .expect(0)
        .mount(&server)
        .await;

    let repo = SqliteBookRepository::connect_in_memory().await.unwrap();

    // Seed the state an interrupt after the first committed book leaves behind.
    let mut interrupted = CrawlSession::start(CrawlScope::FullCatalog);
    interrupted.books_found = 2;
    interrupted.books_crawled = 1;
    interrupted.finalize(SessionStatus::Interrupted, Some("crawl cancelled".to_string()));
    repo.create_session(&interrupted).await.unwrap();

    let book1_url = format!("{}/catalogue/book-1.html", server.uri());
    let mut checkpoint = Checkpoint::new(&interrupted.session_id);
    checkpoint.mark_completed(&book1_url);
    repo.save_checkpoint(&checkpoint).await.unwrap();

    let book1 = bookwatch::domain::BookRecord {
        upc: "upc-1".to_string(),
        name: "Book 1".to_string(),
        description: None,
        category: "Poetry".to_string(),
        price_incl_tax: None,
        price_excl_tax: None,
        tax_amount: None,
        availability: "In stock".to_string(),
        availability_count: Some(1),
        number_of_reviews: 2,
        rating: 3,
        image_url: None,
        url: book1_url,
        last_seen_at: Utc::now(),
        content_hash: String::new(),
        raw_html: None,
    }
    .with_content_hash();
    repo.upsert_book(&book1).await.unwrap();
    repo.append_change_event(&ChangeEvent::new("upc-1", &interrupted.session_id, ChangeKind::New))
        .await
        .unwrap();

    let session = run_crawl(&server, &repo, CrawlMode::Resume, CrawlScope::FullCatalog).await;

    assert_eq!(session.session_id, interrupted.session_id);
    assert_eq!(session.status, SessionStatus::Completed);
    // One per distinct book: the committed one plus the two still pending.
    assert_eq!(session.books_found, 3);
    assert_eq!(session.books_crawled, 3);
    assert_eq!(repo.count_books().await.unwrap(), 3);

    // The book committed before the interrupt is not reported removed.
    let events = events_for(&repo, &session).await;
    assert!(events.iter().all(|e| e.kind == ChangeKind::New));
    assert!(repo.load_checkpoint(&session.session_id).await.unwrap().is_none());
}

#[tokio::test]
async fn resume_under_a_different_scope_preserves_the_checkpoint() {
    // Nothing mounted: the category listing 404s and the run ends at
    // once. What matters is that the interrupted full-catalog session
    // keeps its resume point.
    let server = MockServer::start().await;
    let repo = SqliteBookRepository::connect_in_memory().await.unwrap();

    let mut interrupted = CrawlSession::start(CrawlScope::FullCatalog);
    interrupted.books_found = 100;
    interrupted.books_crawled = 80;
    interrupted.finalize(SessionStatus::Interrupted, Some("crawl cancelled".to_string()));
    repo.create_session(&interrupted).await.unwrap();

    let mut checkpoint = Checkpoint::new(&interrupted.session_id);
    checkpoint.page_index = 5;
    repo.save_checkpoint(&checkpoint).await.unwrap();

    let scope = CrawlScope::Category(format!(
        "{}/catalogue/category/books/travel_2/index.html",
        server.uri()
    ));
    let session = run_crawl(&server, &repo, CrawlMode::Resume, scope).await;

    // The mismatched scope gets its own session instead of adopting
    // (and finalizing) the interrupted one.
    assert_ne!(session.session_id, interrupted.session_id);
    assert_eq!(session.books_crawled, 0);

    let kept = repo.find_session(&interrupted.session_id).await.unwrap().unwrap();
    assert_eq!(kept.status, SessionStatus::Interrupted);
    let kept_checkpoint =
        repo.load_checkpoint(&interrupted.session_id).await.unwrap().unwrap();
    assert_eq!(kept_checkpoint.page_index, 5);
}

#[tokio::test]
async fn cancellation_interrupts_and_resume_finishes_the_catalog() {
    let server = MockServer::start().await;
    mount_html(
        &server,
        "/catalogue/page-1.html",
        listing_page(&["book-1.html", "book-2.html"], Some("page-2.html")),
    )
    .await;
    mount_html(&server, "/catalogue/page-2.html", listing_page(&["book-3.html"], None)).await;
    mount_html(
        &server,
        "/catalogue/book-1.html",
        detail_page("upc-1", "Book 1", "£19.99", "In stock"),
    )
    .await;
    // The second book hangs long enough for the stop signal to land.
    Mock::given(method("GET"))
        .and(path("/catalogue/book-2.html"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(detail_page("upc-2", "Book 2", "£19.99", "In stock"))
                .set_delay(std::time::Duration::from_secs(30)),
        )
        .mount(&server)
        .await;

    let repo = SqliteBookRepository::connect_in_memory().await.unwrap();
    let token = CancellationToken::new();
    let orchestrator = CrawlOrchestrator::new(
        crawler_config(&server.uri()),
        Arc::new(repo.clone()),
        token.clone(),
    )
    .unwrap();
    let run = tokio::spawn(async move {
        orchestrator.run(CrawlMode::Fresh, CrawlScope::FullCatalog).await.unwrap()
    });

    // Stop once the first book is durably committed.
    for _ in 0..500 {
        if repo.count_books().await.unwrap() >= 1 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    token.cancel();

    let session = run.await.unwrap();
    assert_eq!(session.status, SessionStatus::Interrupted);
    assert_eq!(session.books_crawled, 1);

    // The checkpoint survives at its last durable value.
    let checkpoint = repo.load_checkpoint(&session.session_id).await.unwrap().unwrap();
    assert_eq!(checkpoint.page_index, 1);
    assert!(checkpoint.is_completed(&format!("{}/catalogue/book-1.html", server.uri())));

    // Serve everything promptly and let a resume finish the catalog.
    server.reset().await;
    mount_three_book_catalog(&server).await;
    let resumed = run_crawl(&server, &repo, CrawlMode::Resume, CrawlScope::FullCatalog).await;

    assert_eq!(resumed.session_id, session.session_id);
    assert_eq!(resumed.status, SessionStatus::Completed);
    assert_eq!(resumed.books_found, 3);
    assert_eq!(resumed.books_crawled, 3);
    assert_eq!(repo.count_books().await.unwrap(), 3);
    assert!(repo.load_checkpoint(&resumed.session_id).await.unwrap().is_none());
}

#[tokio::test]
async fn vanished_book_yields_removed_event() {
    let server = MockServer::start().await;
    mount_three_book_catalog(&server).await;
    let repo = SqliteBookRepository::connect_in_memory().await.unwrap();

    run_crawl(&server, &repo, CrawlMode::Fresh, CrawlScope::FullCatalog).await;

    // Book 3 disappears from the catalog.
    server.reset().await;
    mount_html(
        &server,
        "/catalogue/page-1.html",
        listing_page(&["book-1.html", "book-2.html"], None),
    )
    .await;
    for n in 1..=2 {
        mount_html(
            &server,
            &format!("/catalogue/book-{n}.html"),
            detail_page(&format!("upc-{n}"), &format!("Book {n}"), "£19.99", "In stock (5 available)"),
        )
        .await;
    }

    let second = run_crawl(&server, &repo, CrawlMode::Fresh, CrawlScope::FullCatalog).await;
    let events = events_for(&repo, &second).await;

    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, ChangeKind::Removed);
    assert_eq!(events[0].book_upc, "upc-3");
    assert!(events[0].field_changes.is_empty());

    // Removal is an event, not a delete.
    assert_eq!(repo.count_books().await.unwrap(), 3);
}

#[tokio::test]
async fn category_scope_skips_removal_reconciliation() {
    let server = MockServer::start().await;
    let category_path = "/catalogue/category/books/travel_2/index.html";
    mount_html(&server, category_path, listing_page(&["../../../travel-book.html"], None)).await;
    mount_html(
        &server,
        "/catalogue/travel-book.html",
        detail_page("upc-travel", "On the Road", "£12.50", "In stock"),
    )
    .await;

    let repo = SqliteBookRepository::connect_in_memory().await.unwrap();
    // A book outside the category, known from an earlier crawl.
    let other = bookwatch::domain::BookRecord {
        upc: "upc-other".to_string(),
        name: "Elsewhere".to_string(),
        description: None,
        category: "Poetry".to_string(),
        price_incl_tax: None,
        price_excl_tax: None,
        tax_amount: None,
        availability: "In stock".to_string(),
        availability_count: Some(1),
        number_of_reviews: 0,
        rating: 0,
        image_url: None,
        url: "https://example.com/elsewhere.html".to_string(),
        last_seen_at: Utc::now() - Duration::days(1),
        content_hash: String::new(),
        raw_html: None,
    }
    .with_content_hash();
    repo.upsert_book(&other).await.unwrap();

    let scope = CrawlScope::Category(format!("{}{category_path}", server.uri()));
    let session = run_crawl(&server, &repo, CrawlMode::Fresh, scope).await;

    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.books_crawled, 1);

    let events = events_for(&repo, &session).await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, ChangeKind::New);
    assert_eq!(events[0].book_upc, "upc-travel");
}
