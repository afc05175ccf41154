//! HTML extraction for book listing and detail pages
//!
//! Parsing is deterministic and total: malformed numeric fields become
//! `None` instead of failing the record, and only a missing identifier
//! or name rejects the page. Listing extraction is a pure function of
//! the raw content, so it can be recomputed after a resume without
//! trusting cached links.

use regex::Regex;
use rust_decimal::Decimal;
use scraper::{ElementRef, Html, Selector};
use std::str::FromStr;
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::domain::book::{normalize_text, BookRecord};

/// Parse failure for a detail page.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExtractError {
    #[error("required field '{field}' missing: {reason}")]
    RequiredFieldMissing { field: &'static str, reason: String },

    #[error("page URL is not valid: {url}")]
    InvalidPageUrl { url: String },
}

/// Result of parsing one listing page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listing {
    /// Absolute detail-page URLs in document order, deduplicated.
    pub book_urls: Vec<String>,
    /// Absolute URL of the next listing page, if one is linked.
    pub next_page: Option<String>,
}

struct BookSelectors {
    listing_link: Selector,
    next_page: Selector,
    name: Selector,
    description: Selector,
    breadcrumb_links: Selector,
    info_rows: Selector,
    price_color: Selector,
    availability: Selector,
    star_rating: Selector,
    gallery_image: Selector,
    th: Selector,
    td: Selector,
}

/// Extractor for books.toscrape.com-shaped catalog pages.
pub struct BookExtractor {
    selectors: BookSelectors,
    availability_count_re: Regex,
    price_strip_re: Regex,
}

impl BookExtractor {
    pub fn new() -> anyhow::Result<Self> {
        let parse = |s: &str| {
            Selector::parse(s).map_err(|e| anyhow::anyhow!("invalid selector '{s}': {e:?}"))
        };
        Ok(Self {
            selectors: BookSelectors {
                listing_link: parse("article.product_pod h3 a, h3 a")?,
                next_page: parse("li.next a")?,
                name: parse("div.product_main h1, h1")?,
                description: parse("#product_description + p")?,
                breadcrumb_links: parse("ul.breadcrumb li a")?,
                info_rows: parse("table.table tr")?,
                price_color: parse("p.price_color")?,
                availability: parse("p.availability")?,
                star_rating: parse("p.star-rating")?,
                gallery_image: parse("div.item.active img, #product_gallery img")?,
                th: parse("th")?,
                td: parse("td")?,
            },
            availability_count_re: Regex::new(r"\((\d+)\s+available\)")?,
            price_strip_re: Regex::new(r"[^\d.,]")?,
        })
    }

    /// Extract detail-page links and the next-page link from a listing
    /// page. `page_url` anchors relative href resolution.
    pub fn parse_listing(&self, html: &str, page_url: &str) -> Result<Listing, ExtractError> {
        let base = Url::parse(page_url)
            .map_err(|_| ExtractError::InvalidPageUrl { url: page_url.to_string() })?;
        let document = Html::parse_document(html);

        let mut book_urls = Vec::new();
        for link in document.select(&self.selectors.listing_link) {
            if let Some(href) = link.value().attr("href") {
                if let Ok(absolute) = base.join(href) {
                    let absolute = absolute.to_string();
                    if !book_urls.contains(&absolute) {
                        book_urls.push(absolute);
                    }
                }
            }
        }

        let next_page = document
            .select(&self.selectors.next_page)
            .next()
            .and_then(|a| a.value().attr("href"))
            .and_then(|href| base.join(href).ok())
            .map(|u| u.to_string());

        debug!(page_url, books = book_urls.len(), has_next = next_page.is_some(), "parsed listing");
        Ok(Listing { book_urls, next_page })
    }

    /// Parse one detail page into a normalized record with its content
    /// hash filled in.
    pub fn parse_book(
        &self,
        html: &str,
        url: &str,
        store_raw_html: bool,
    ) -> Result<BookRecord, ExtractError> {
        let base = Url::parse(url)
            .map_err(|_| ExtractError::InvalidPageUrl { url: url.to_string() })?;
        let document = Html::parse_document(html);

        let name = self
            .select_text(&document, &self.selectors.name)
            .ok_or(ExtractError::RequiredFieldMissing {
                field: "name",
                reason: "no h1 element found".to_string(),
            })?;

        let info = self.product_information(&document);
        let upc = info
            .iter()
            .find(|(label, _)| label.eq_ignore_ascii_case("UPC"))
            .map(|(_, value)| value.clone())
            .filter(|v| !v.is_empty())
            .ok_or(ExtractError::RequiredFieldMissing {
                field: "upc",
                reason: "no UPC row in product information table".to_string(),
            })?;

        let price_incl_tax = self
            .info_value(&info, "Price (incl. tax)")
            .and_then(|v| self.parse_price(&v))
            .or_else(|| {
                self.select_text(&document, &self.selectors.price_color)
                    .and_then(|v| self.parse_price(&v))
            });
        let price_excl_tax =
            self.info_value(&info, "Price (excl. tax)").and_then(|v| self.parse_price(&v));
        let tax_amount = self
            .info_value(&info, "Tax")
            .and_then(|v| self.parse_price(&v))
            .or_else(|| match (price_incl_tax, price_excl_tax) {
                (Some(incl), Some(excl)) => Some(incl - excl),
                _ => None,
            });

        let availability = self
            .select_text(&document, &self.selectors.availability)
            .or_else(|| self.info_value(&info, "Availability"))
            .unwrap_or_default();
        let availability_count = self.parse_availability_count(&availability);

        let number_of_reviews = self
            .info_value(&info, "Number of reviews")
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(0);

        // Breadcrumb is Home / Books / <category> / <title>; the last
        // anchor is the category.
        let category = document
            .select(&self.selectors.breadcrumb_links)
            .last()
            .map(|a| normalize_text(&a.text().collect::<String>()))
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "Unknown".to_string());

        let description = self
            .select_text(&document, &self.selectors.description)
            .filter(|s| !s.is_empty());

        let rating = document
            .select(&self.selectors.star_rating)
            .next()
            .map(|el| self.parse_rating(el))
            .unwrap_or(0);

        let image_url = document
            .select(&self.selectors.gallery_image)
            .next()
            .and_then(|img| img.value().attr("src"))
            .and_then(|src| base.join(src).ok())
            .map(|u| u.to_string());

        let record = BookRecord {
            upc,
            name,
            description,
            category,
            price_incl_tax,
            price_excl_tax,
            tax_amount,
            availability,
            availability_count,
            number_of_reviews,
            rating,
            image_url,
            url: url.to_string(),
            last_seen_at: chrono::Utc::now(),
            content_hash: String::new(),
            raw_html: store_raw_html.then(|| html.to_string()),
        }
        .with_content_hash();

        Ok(record)
    }

    /// Label/value pairs from the product information table.
    fn product_information(&self, document: &Html) -> Vec<(String, String)> {
        document
            .select(&self.selectors.info_rows)
            .filter_map(|row| {
                let label = row
                    .select(&self.selectors.th)
                    .next()
                    .map(|th| normalize_text(&th.text().collect::<String>()))?;
                let value = row
                    .select(&self.selectors.td)
                    .next()
                    .map(|td| normalize_text(&td.text().collect::<String>()))?;
                Some((label, value))
            })
            .collect()
    }

    fn info_value(&self, info: &[(String, String)], label: &str) -> Option<String> {
        info.iter()
            .find(|(l, _)| l.eq_ignore_ascii_case(label))
            .map(|(_, v)| v.clone())
            .filter(|v| !v.is_empty())
    }

    fn select_text(&self, document: &Html, selector: &Selector) -> Option<String> {
        document
            .select(selector)
            .next()
            .map(|el| normalize_text(&el.text().collect::<String>()))
            .filter(|text| !text.is_empty())
    }

    /// Strip currency symbols and parse a fixed-precision decimal.
    fn parse_price(&self, text: &str) -> Option<Decimal> {
        let cleaned = self.price_strip_re.replace_all(text, "").replace(',', "");
        if cleaned.is_empty() {
            return None;
        }
        Decimal::from_str(&cleaned).ok()
    }

    /// "In stock (22 available)" -> 22; bare "In stock" -> 1;
    /// "Out of stock" -> 0; anything else is unparseable.
    fn parse_availability_count(&self, availability: &str) -> Option<u32> {
        if let Some(captures) = self.availability_count_re.captures(availability) {
            return captures[1].parse().ok();
        }
        let lower = availability.to_lowercase();
        if lower.contains("out of stock") {
            Some(0)
        } else if lower.contains("in stock") {
            Some(1)
        } else {
            None
        }
    }

    fn parse_rating(&self, element: ElementRef) -> u8 {
        element
            .value()
            .classes()
            .find_map(|class| match class {
                "One" => Some(1),
                "Two" => Some(2),
                "Three" => Some(3),
                "Four" => Some(4),
                "Five" => Some(5),
                _ => None,
            })
            .unwrap_or(0)
    }
}
