mod config;
mod dates;
mod discovery;
mod extract;
mod llm;
mod store;
mod transform;

use std::collections::HashSet;
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use config::Config;
use store::Summary;

#[derive(Parser)]
#[command(name = "cochrane_digest", about = "Cochrane review summarizer and date backfill")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Discover new reviews, summarize them, and append to the store
    Update {
        /// Discover reviews but do not call the model or modify files
        #[arg(long)]
        dry_run: bool,
        /// Maximum number of new reviews to process
        #[arg(short = 'n', long, default_value = "10")]
        max_reviews: usize,
    },
    /// Backfill missing publication dates from CrossRef and publisher pages
    AddDates,
    /// Show store statistics
    Stats,
    /// Check that the store still parses as YAML
    Validate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let config = Config::default();

    let result = match cli.command {
        Commands::Update {
            dry_run,
            max_reviews,
        } => run_update(&config, dry_run, max_reviews).await,
        Commands::AddDates => run_add_dates(&config).await,
        Commands::Stats => run_stats(&config),
        Commands::Validate => run_validate(&config),
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

/// The acquisition flow: discover, extract, summarize, enrich, append.
/// Candidates run strictly sequentially; any per-candidate failure skips
/// that candidate and the run continues.
async fn run_update(config: &Config, dry_run: bool, max_reviews: usize) -> anyhow::Result<()> {
    let existing = store::existing_cd_numbers(&config.store_path)?;
    info!(
        "Found {} existing CD numbers in {}",
        existing.len(),
        config.store_path.display()
    );

    let client = config.scrape_client()?;
    let reviews = discovery::discover(&client, config).await;
    if reviews.is_empty() {
        warn!("No reviews found from any source");
        return Ok(());
    }

    let mut new_reviews: Vec<_> = reviews
        .into_iter()
        .filter(|r| !existing.contains(&r.cd_number))
        .collect();
    info!("Found {} new reviews to process", new_reviews.len());
    if new_reviews.is_empty() {
        info!("No new reviews to add");
        return Ok(());
    }
    new_reviews.truncate(max_reviews);

    if dry_run {
        info!("DRY RUN - would process these reviews:");
        for review in &new_reviews {
            info!("  {}: {}", review.cd_number, truncate(&review.title, 60));
        }
        return Ok(());
    }

    let llm = match llm::LlmClient::from_env(config) {
        Ok(llm) => llm,
        Err(e) => {
            error!("Model client unavailable: {e:#}");
            emit_outputs(&[]);
            return Ok(());
        }
    };

    let mut processed: Vec<Summary> = Vec::new();
    for review in &new_reviews {
        info!("Processing {}...", review.cd_number);

        let Some(pls) =
            extract::fetch_summary(&client, config, &review.url, &review.cd_number).await
        else {
            warn!("Skipping {} - could not fetch content", review.cd_number);
            continue;
        };
        let Some(draft) = transform::summarize(&llm, &pls).await else {
            warn!("Skipping {} - summarization failed", review.cd_number);
            continue;
        };
        let Some((interest, tags)) = transform::enrich(&llm, &draft).await else {
            warn!("Skipping {} - enrichment failed", review.cd_number);
            continue;
        };

        processed.push(Summary {
            question: draft.question,
            answer: draft.answer,
            url: review.url.clone(),
            notes: draft.notes,
            date: None,
            interest: Some(interest),
            tags: Some(tags),
        });
        info!("Successfully processed {}", review.cd_number);
    }

    if !processed.is_empty() {
        store::append(&config.store_path, &processed)?;
        store::validate(&config.store_path)
            .context("Store validation failed after append - manual fix required")?;
    }

    emit_outputs(&processed);
    Ok(())
}

/// The backfill flow: load everything, resolve missing dates concurrently,
/// write the whole store back once.
async fn run_add_dates(config: &Config) -> anyhow::Result<()> {
    info!("Reading summaries from {}", config.store_path.display());
    let mut summaries = store::load_all(&config.store_path)?;
    if summaries.is_empty() {
        warn!("No summaries found");
        return Ok(());
    }
    info!("Found {} summaries", summaries.len());

    let without_dates = summaries.iter().filter(|s| s.date.is_none()).count();
    info!("{} entries need dates", without_dates);
    if without_dates == 0 {
        info!("All entries already have dates");
        return Ok(());
    }

    let client = config.lookup_client()?;
    let (updated, failed) = dates::resolve_many(&client, config, &mut summaries).await?;
    info!(
        "Finished: {} dates added, {} could not be found",
        updated, failed
    );

    info!("Writing updated summaries to {}", config.store_path.display());
    store::save_all(&config.store_path, &summaries)?;
    Ok(())
}

fn run_stats(config: &Config) -> anyhow::Result<()> {
    let summaries = store::load_all(&config.store_path)?;
    let total = summaries.len();
    let dated = summaries.iter().filter(|s| s.date.is_some()).count();
    let enriched = summaries.iter().filter(|s| s.interest.is_some()).count();
    let tags: HashSet<&str> = summaries
        .iter()
        .flat_map(|s| s.tags.iter().flatten())
        .map(String::as_str)
        .collect();

    println!("Entries:   {}", total);
    println!("Dated:     {}", dated);
    println!("Undated:   {}", total - dated);
    println!("Enriched:  {}", enriched);
    println!("Tags:      {}", tags.len());
    Ok(())
}

fn run_validate(config: &Config) -> anyhow::Result<()> {
    store::validate(&config.store_path)?;
    println!("YAML validation passed");
    Ok(())
}

/// Key/value lines consumed by the automation trigger (appended to
/// $GITHUB_OUTPUT by the workflow).
fn emit_outputs(processed: &[Summary]) {
    println!("count={}", processed.len());
    let urls: Vec<&str> = processed.iter().map(|s| s.url.as_str()).collect();
    println!("reviews={}", urls.join(","));
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
