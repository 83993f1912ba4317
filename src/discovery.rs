use std::collections::HashSet;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;
use scraper::{Html, Selector};
use tracing::{info, warn};

use crate::config::Config;

static CD_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)CD\d+").unwrap());

/// A discovered, not-yet-persisted review reference.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub cd_number: String,
    pub url: String,
    pub title: String,
}

/// Discover candidate reviews: RSS feed first, news-page scrape only when
/// the feed yields nothing. Either source failing is recoverable; only both
/// coming back empty halts the run.
pub async fn discover(client: &reqwest::Client, config: &Config) -> Vec<Candidate> {
    match fetch_feed_reviews(client, config).await {
        Ok(reviews) if !reviews.is_empty() => reviews,
        Ok(_) => {
            info!("RSS feed returned no results, trying news page scrape");
            fallback(client, config).await
        }
        Err(e) => {
            warn!("Failed to fetch RSS feed: {e:#}");
            fallback(client, config).await
        }
    }
}

async fn fallback(client: &reqwest::Client, config: &Config) -> Vec<Candidate> {
    match scrape_news_page(client, config).await {
        Ok(reviews) => reviews,
        Err(e) => {
            warn!("Failed to scrape news page: {e:#}");
            Vec::new()
        }
    }
}

/// Fetch new reviews from the publisher RSS feed.
async fn fetch_feed_reviews(client: &reqwest::Client, config: &Config) -> Result<Vec<Candidate>> {
    info!("Fetching RSS feed from {}", config.rss_url);
    let xml = client
        .get(&config.rss_url)
        .send()
        .await?
        .error_for_status()?
        .text()
        .await
        .context("Failed to fetch RSS feed")?;

    let reviews = feed_candidates(parse_feed_items(&xml)?);
    info!("Found {} reviews in RSS feed", reviews.len());
    Ok(reviews)
}

struct FeedItem {
    title: String,
    link: String,
}

/// Parse RSS `<item>` title/link pairs.
fn parse_feed_items(xml: &str) -> Result<Vec<FeedItem>> {
    let mut reader = quick_xml::Reader::from_str(xml);
    let mut items = Vec::new();
    let mut in_item = false;
    let mut in_title = false;
    let mut in_link = false;
    let mut title = String::new();
    let mut link = String::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => match e.name().as_ref() {
                b"item" => {
                    in_item = true;
                    title.clear();
                    link.clear();
                }
                b"title" if in_item => in_title = true,
                b"link" if in_item => in_link = true,
                _ => {}
            },
            Ok(quick_xml::events::Event::Text(e)) if in_title || in_link => {
                let text = e.unescape()?;
                if in_title {
                    title.push_str(&text);
                } else {
                    link.push_str(&text);
                }
            }
            // Feed titles are frequently CDATA-wrapped
            Ok(quick_xml::events::Event::CData(e)) if in_title || in_link => {
                let text = String::from_utf8_lossy(&e.into_inner()).into_owned();
                if in_title {
                    title.push_str(&text);
                } else {
                    link.push_str(&text);
                }
            }
            Ok(quick_xml::events::Event::End(e)) => match e.name().as_ref() {
                b"title" => in_title = false,
                b"link" => in_link = false,
                b"item" => {
                    in_item = false;
                    items.push(FeedItem {
                        title: title.trim().to_string(),
                        link: link.trim().to_string(),
                    });
                }
                _ => {}
            },
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(e.into()),
            _ => {}
        }
        buf.clear();
    }
    Ok(items)
}

/// Keep only entries whose link carries a CD number; an entry without one is
/// dropped, not an error.
fn feed_candidates(items: Vec<FeedItem>) -> Vec<Candidate> {
    items
        .into_iter()
        .filter_map(|item| {
            let cd_number = CD_RE.find(&item.link)?.as_str().to_uppercase();
            Some(Candidate {
                cd_number,
                url: item.link,
                title: item.title,
            })
        })
        .collect()
}

/// Scrape the news listing page for review links (fallback source).
async fn scrape_news_page(client: &reqwest::Client, config: &Config) -> Result<Vec<Candidate>> {
    info!("Scraping news page from {}", config.news_url);
    let html = client
        .get(&config.news_url)
        .send()
        .await?
        .error_for_status()?
        .text()
        .await
        .context("Failed to read news page body")?;

    let reviews = news_candidates(&html, &config.publisher_base_url);
    info!("Found {} reviews on news page", reviews.len());
    Ok(reviews)
}

/// Scan every hyperlink for a CD number; first occurrence per number wins,
/// page order preserved, relative links made absolute.
fn news_candidates(html: &str, base_url: &str) -> Vec<Candidate> {
    let document = Html::parse_document(html);
    let link_selector = match Selector::parse("a[href]") {
        Ok(s) => s,
        Err(_) => return Vec::new(),
    };

    let mut seen = HashSet::new();
    let mut reviews = Vec::new();
    for link in document.select(&link_selector) {
        let Some(href) = link.value().attr("href") else {
            continue;
        };
        let Some(m) = CD_RE.find(href) else { continue };
        let cd_number = m.as_str().to_uppercase();
        if !seen.insert(cd_number.clone()) {
            continue;
        }
        let url = if href.starts_with('/') {
            format!("{base_url}{href}")
        } else {
            href.to_string()
        };
        let title = link
            .text()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        reviews.push(Candidate {
            cd_number,
            url,
            title,
        });
    }
    reviews
}

// ── Tests ──
