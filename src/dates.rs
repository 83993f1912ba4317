use std::sync::Arc;
use std::sync::LazyLock;

use anyhow::Result;
use chrono::NaiveDate;
use indicatif::{ProgressBar, ProgressStyle};
use regex::Regex;
use reqwest::StatusCode;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::store::Summary;

// DOI forms seen in store URLs: the publisher's own 14651858-prefixed DOIs,
// then any /doi/ path segment.
static DOI_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"(10\.1002/14651858\.CD\d+(?:\.pub\d+)?)").unwrap(),
        Regex::new(r"doi/(10\.[^/]+/[^/]+)").unwrap(),
    ]
});

static CD_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)CD\d+").unwrap());

static DATE_PUBLISHED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""datePublished"\s*:\s*"([^"]+)""#).unwrap());

static ISO_DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{4}-\d{2}-\d{2})").unwrap());

// CrossRef date fields, most authoritative first.
const DATE_FIELDS: &[&str] = &["published", "issued", "published-online", "created"];

pub fn extract_doi(url: &str) -> Option<String> {
    DOI_PATTERNS
        .iter()
        .find_map(|pattern| pattern.captures(url).map(|c| c[1].to_string()))
}

pub fn extract_cd_number(url: &str) -> Option<String> {
    CD_RE.find(url).map(|m| m.as_str().to_uppercase())
}

/// Resolve a publication date for one record URL: CrossRef by DOI first,
/// publisher-page structured data second. Politeness sleeps are fixed and
/// per-record, not globally serialized.
pub async fn resolve_date(client: &reqwest::Client, config: &Config, url: &str) -> Option<String> {
    if let Some(doi) = extract_doi(url) {
        if let Some(date) = date_from_crossref(client, config, &doi).await {
            info!("Found date via CrossRef: {date}");
            return Some(date);
        }
        tokio::time::sleep(config.crossref_delay).await;
    }

    if let Some(cd_number) = extract_cd_number(url) {
        tokio::time::sleep(config.publisher_delay).await;
        if let Some(date) = date_from_publisher_page(client, config, &cd_number).await {
            info!("Found date via publisher page: {date}");
            return Some(date);
        }
    }

    None
}

async fn date_from_crossref(
    client: &reqwest::Client,
    config: &Config,
    doi: &str,
) -> Option<String> {
    let url = format!("{}/works/{}", config.crossref_base_url, doi);
    let response = match client.get(&url).send().await {
        Ok(response) => response,
        Err(e) => {
            debug!("CrossRef error for {doi}: {e}");
            return None;
        }
    };
    if response.status() != StatusCode::OK {
        debug!("CrossRef returned {} for {doi}", response.status());
        return None;
    }
    let data: serde_json::Value = match response.json().await {
        Ok(data) => data,
        Err(e) => {
            debug!("CrossRef body error for {doi}: {e}");
            return None;
        }
    };
    data.get("message").and_then(date_from_message)
}

/// Pick the first usable date field, degrading granularity gracefully:
/// year-month-day, else year-month, else year alone.
fn date_from_message(message: &serde_json::Value) -> Option<String> {
    for field in DATE_FIELDS {
        let Some(parts) = message
            .get(*field)
            .and_then(|f| f.get("date-parts"))
            .and_then(|p| p.get(0))
            .and_then(|p| p.as_array())
        else {
            continue;
        };
        let parts: Vec<i64> = parts.iter().filter_map(|v| v.as_i64()).collect();
        if let Some(date) = format_date_parts(&parts) {
            return Some(date);
        }
    }
    None
}

fn format_date_parts(parts: &[i64]) -> Option<String> {
    let year = *parts.first()? as i32;
    let month = parts.get(1).copied().unwrap_or(1) as u32;
    let day = parts.get(2).copied().unwrap_or(1) as u32;
    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    Some(date.format("%Y-%m-%d").to_string())
}

async fn date_from_publisher_page(
    client: &reqwest::Client,
    config: &Config,
    cd_number: &str,
) -> Option<String> {
    let url = format!("{}/{}", config.publisher_base_url, cd_number);
    let response = match client.get(&url).send().await {
        Ok(response) => response,
        Err(e) => {
            debug!("Publisher page error for {cd_number}: {e}");
            return None;
        }
    };
    if response.status() != StatusCode::OK {
        debug!(
            "Publisher page returned {} for {cd_number}",
            response.status()
        );
        return None;
    }
    let body = response.text().await.ok()?;
    date_published_from_html(&body)
}

/// Scan embedded JSON-LD for a datePublished value and keep its leading
/// calendar-date component.
fn date_published_from_html(body: &str) -> Option<String> {
    let value = DATE_PUBLISHED_RE.captures(body)?.get(1)?.as_str();
    let iso = ISO_DATE_RE.captures(value)?.get(1)?.as_str();
    NaiveDate::parse_from_str(iso, "%Y-%m-%d").ok()?;
    Some(iso.to_string())
}

/// Resolve dates for every entry still missing one, under a bounded worker
/// pool. Results are written back into `summaries` by original index, so
/// caller order is preserved regardless of completion order. Returns
/// (updated, failed) counts.
pub async fn resolve_many(
    client: &reqwest::Client,
    config: &Config,
    summaries: &mut [Summary],
) -> Result<(usize, usize)> {
    let pending: Vec<(usize, String)> = summaries
        .iter()
        .enumerate()
        .filter(|(_, s)| s.date.is_none())
        .map(|(i, s)| (i, s.url.clone()))
        .collect();
    if pending.is_empty() {
        return Ok((0, 0));
    }

    let pb = ProgressBar::new(pending.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")?
            .progress_chars("=> "),
    );

    let client = client.clone();
    let task_config = config.clone();
    let progress = pb.clone();
    let results = for_each_resolved(pending, config.date_workers, move |url| {
        let client = client.clone();
        let config = task_config.clone();
        let progress = progress.clone();
        async move {
            let date = resolve_date(&client, &config, &url).await;
            progress.inc(1);
            date
        }
    })
    .await;
    pb.finish_and_clear();

    Ok(merge_resolved(summaries, results))
}

/// Dispatch one task per item through a fixed-size semaphore and collect
/// `(index, result)` pairs as tasks complete.
async fn for_each_resolved<F, Fut>(
    pending: Vec<(usize, String)>,
    workers: usize,
    resolve: F,
) -> Vec<(usize, Option<String>)>
where
    F: Fn(String) -> Fut + Clone + Send + 'static,
    Fut: std::future::Future<Output = Option<String>> + Send + 'static,
{
    let workers = workers.max(1);
    let semaphore = Arc::new(Semaphore::new(workers));
    let (tx, mut rx) = mpsc::channel::<(usize, Option<String>)>(workers * 2);
    let total = pending.len();

    for (index, url) in pending {
        let semaphore = Arc::clone(&semaphore);
        let tx = tx.clone();
        let resolve = resolve.clone();
        tokio::spawn(async move {
            let _permit = semaphore.acquire().await.unwrap();
            let date = resolve(url).await;
            let _ = tx.send((index, date)).await;
        });
    }

    // Drop our copy of tx so rx closes when all spawned tasks finish
    drop(tx);

    let mut results = Vec::with_capacity(total);
    while let Some(result) = rx.recv().await {
        results.push(result);
    }
    results
}

/// Write resolved dates into their original slots. Each index appears at
/// most once, so no entry is written twice.
fn merge_resolved(
    summaries: &mut [Summary],
    results: Vec<(usize, Option<String>)>,
) -> (usize, usize) {
    let mut updated = 0;
    let mut failed = 0;
    for (index, date) in results {
        match date {
            Some(date) => {
                summaries[index].date = Some(date);
                updated += 1;
            }
            None => {
                warn!("Could not find date for: {}", summaries[index].url);
                failed += 1;
            }
        }
    }
    (updated, failed)
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn doi_from_publisher_url() {
        let doi = extract_doi("https://doi.org/10.1002/14651858.CD012345.pub2");
        assert_eq!(doi.as_deref(), Some("10.1002/14651858.CD012345.pub2"));
    }

    #[test]
    fn doi_from_library_path() {
        let doi =
            extract_doi("https://www.cochranelibrary.com/cdsr/doi/10.1002/14651858.CD003177.pub5/full");
        assert_eq!(doi.as_deref(), Some("10.1002/14651858.CD003177.pub5"));
    }

    #[test]
    fn generic_doi_path() {
        let doi = extract_doi("https://example.com/doi/10.5555/123456");
        assert_eq!(doi.as_deref(), Some("10.5555/123456"));
    }

    #[test]
    fn no_doi_in_catalog_url() {
        assert_eq!(extract_doi("https://www.cochrane.org/CD012345"), None);
    }

    #[test]
    fn cd_number_uppercased() {
        assert_eq!(
            extract_cd_number("https://www.cochrane.org/cd012345").as_deref(),
            Some("CD012345")
        );
        assert_eq!(extract_cd_number("https://www.cochrane.org/news"), None);
    }

    #[test]
    fn full_precision_date() {
        let message = json!({"published": {"date-parts": [[2024, 3, 15]]}});
        assert_eq!(date_from_message(&message).as_deref(), Some("2024-03-15"));
    }

    #[test]
    fn year_month_defaults_day() {
        let message = json!({"issued": {"date-parts": [[2024, 3]]}});
        assert_eq!(date_from_message(&message).as_deref(), Some("2024-03-01"));
    }

    #[test]
    fn year_only_defaults_month_and_day() {
        let message = json!({"created": {"date-parts": [[2024]]}});
        assert_eq!(date_from_message(&message).as_deref(), Some("2024-01-01"));
    }

    #[test]
    fn field_preference_order() {
        let message = json!({
            "created": {"date-parts": [[2019, 1, 1]]},
            "issued": {"date-parts": [[2024, 6, 2]]}
        });
        assert_eq!(date_from_message(&message).as_deref(), Some("2024-06-02"));
    }

    #[test]
    fn empty_parts_fall_through_to_next_field() {
        let message = json!({
            "published": {"date-parts": [[]]},
            "issued": {"date-parts": [[2020]]}
        });
        assert_eq!(date_from_message(&message).as_deref(), Some("2020-01-01"));
    }

    #[test]
    fn nonsense_calendar_date_is_rejected() {
        let message = json!({"published": {"date-parts": [[2024, 13]]}});
        assert_eq!(date_from_message(&message), None);
    }

    #[test]
    fn date_published_scan() {
        let body = r#"<script type="application/ld+json">
            {"@type": "MedicalScholarlyArticle", "datePublished": "2023-08-01T00:00:00+00:00"}
        </script>"#;
        assert_eq!(date_published_from_html(body).as_deref(), Some("2023-08-01"));
    }

    #[test]
    fn missing_date_published_yields_none() {
        assert_eq!(date_published_from_html("<html><body>no metadata</body></html>"), None);
    }

    #[tokio::test]
    async fn fan_out_pairs_results_with_original_indices() {
        let pending: Vec<(usize, String)> = (0..8).map(|i| (i, format!("record-{i}"))).collect();
        // Later records finish first, so completion order inverts
        // submission order.
        let results = for_each_resolved(pending, 3, |url| async move {
            let n: u64 = url.trim_start_matches("record-").parse().unwrap();
            tokio::time::sleep(std::time::Duration::from_millis((8 - n) * 5)).await;
            if n % 2 == 0 {
                Some(format!("2024-01-{:02}", n + 1))
            } else {
                None
            }
        })
        .await;

        assert_eq!(results.len(), 8);
        let by_index: std::collections::HashMap<usize, Option<String>> =
            results.into_iter().collect();
        assert_eq!(by_index[&0].as_deref(), Some("2024-01-01"));
        assert_eq!(by_index[&1], None);
        assert_eq!(by_index[&6].as_deref(), Some("2024-01-07"));
        assert_eq!(by_index[&7], None);
    }

    #[test]
    fn merge_writes_each_date_to_its_slot() {
        let mut summaries: Vec<Summary> = (0..4)
            .map(|i| Summary {
                question: format!("Q{i}"),
                answer: "A".into(),
                url: format!("https://www.cochrane.org/CD00000{i}"),
                notes: String::new(),
                date: (i == 1).then(|| "2019-01-01".to_string()),
                interest: None,
                tags: None,
            })
            .collect();

        // Completion order scrambled relative to indices
        let results = vec![
            (3, Some("2024-04-04".to_string())),
            (0, Some("2024-01-01".to_string())),
            (2, None),
        ];
        let (updated, failed) = merge_resolved(&mut summaries, results);
        assert_eq!((updated, failed), (2, 1));
        assert_eq!(summaries[0].date.as_deref(), Some("2024-01-01"));
        assert_eq!(summaries[1].date.as_deref(), Some("2019-01-01"));
        assert_eq!(summaries[2].date, None);
        assert_eq!(summaries[3].date.as_deref(), Some("2024-04-04"));
    }
}
