use reqwest::StatusCode;
use scraper::{ElementRef, Html, Selector};
use tracing::{error, info, warn};

use crate::config::Config;

// Markup regions known to hold the Plain Language Summary on publisher pages.
const PLS_SELECTORS: &[&str] = &[
    ".pls-section",
    "#pls",
    r#"[data-section="pls"]"#,
    ".plain-language-summary",
];

type Strategy = fn(&Html) -> Option<String>;

// Tried in order; first non-empty text wins.
const STRATEGIES: &[Strategy] = &[try_selectors, try_heading_siblings, try_first_paragraphs];

/// Fetch a review page and extract its Plain Language Summary. The canonical
/// publisher page is tried before the feed-provided URL; the first 200 wins.
pub async fn fetch_summary(
    client: &reqwest::Client,
    config: &Config,
    url: &str,
    cd_number: &str,
) -> Option<String> {
    let canonical = format!("{}/{}", config.publisher_base_url, cd_number);
    let mut urls_to_try = vec![canonical];
    if urls_to_try[0] != url {
        urls_to_try.push(url.to_string());
    }

    let mut body = None;
    for try_url in &urls_to_try {
        info!("Fetching review content from {try_url}");
        match client.get(try_url).send().await {
            Ok(response) if response.status() == StatusCode::OK => match response.text().await {
                Ok(text) => {
                    body = Some(text);
                    break;
                }
                Err(e) => warn!("Failed to read body from {try_url}: {e}"),
            },
            Ok(response) => warn!("Got status {} for {}", response.status(), try_url),
            Err(e) => warn!("Failed to fetch {try_url}: {e}"),
        }
    }

    let Some(body) = body else {
        error!("Could not fetch any URL for {cd_number}");
        return None;
    };

    let pls = extract_pls(&body);
    if pls.is_none() {
        warn!("Could not find Plain Language Summary for {url}");
    }
    pls
}

/// Run the extraction strategies in order over a parsed page.
pub fn extract_pls(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    STRATEGIES
        .iter()
        .find_map(|strategy| strategy(&document).filter(|text| !text.trim().is_empty()))
}

fn try_selectors(document: &Html) -> Option<String> {
    for selector in PLS_SELECTORS {
        let Ok(selector) = Selector::parse(selector) else {
            continue;
        };
        if let Some(section) = document.select(&selector).next() {
            let text = element_text(&section);
            if !text.is_empty() {
                return Some(text);
            }
        }
    }
    None
}

/// Find a "plain language" heading and collect sibling content up to the
/// next heading of equal or higher level.
fn try_heading_siblings(document: &Html) -> Option<String> {
    let headings = Selector::parse("h2, h3, h4").ok()?;
    for heading in document.select(&headings) {
        if !element_text(&heading)
            .to_lowercase()
            .contains("plain language")
        {
            continue;
        }
        let Some(level) = heading_level(heading.value().name()) else {
            continue;
        };
        let mut parts = Vec::new();
        for node in heading.next_siblings() {
            let Some(element) = ElementRef::wrap(node) else {
                continue;
            };
            if heading_level(element.value().name()).is_some_and(|l| l <= level) {
                break;
            }
            let text = element_text(&element);
            if !text.is_empty() {
                parts.push(text);
            }
        }
        if !parts.is_empty() {
            return Some(parts.join("\n\n"));
        }
    }
    None
}

/// Last resort: first five paragraphs of the main article container.
fn try_first_paragraphs(document: &Html) -> Option<String> {
    let article = Selector::parse("article").ok()?;
    let main = Selector::parse("main").ok()?;
    let paragraph = Selector::parse("p").ok()?;

    let root = document
        .select(&article)
        .next()
        .or_else(|| document.select(&main).next())?;
    let paragraphs: Vec<String> = root
        .select(&paragraph)
        .take(5)
        .map(|p| element_text(&p))
        .filter(|t| !t.is_empty())
        .collect();
    if paragraphs.is_empty() {
        None
    } else {
        Some(paragraphs.join("\n\n"))
    }
}

fn element_text(element: &ElementRef) -> String {
    element
        .text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn heading_level(name: &str) -> Option<u8> {
    match name {
        "h1" => Some(1),
        "h2" => Some(2),
        "h3" => Some(3),
        "h4" => Some(4),
        "h5" => Some(5),
        "h6" => Some(6),
        _ => None,
    }
}

// ── Tests ──
