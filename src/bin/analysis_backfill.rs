use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use vibequest_rust::database_ops::analysis::provider::AnalysisProvider;
use vibequest_rust::database_ops::backfill::AnalysisBackfill;
use vibequest_rust::database_ops::db::Db;
use vibequest_rust::database_ops::rankings_cache::PgRankingsCacheStore;
use vibequest_rust::util::env as env_util;

#[derive(Parser, Debug)]
#[command(
    name = "analysis_backfill",
    version,
    about = "Backfill missing AI analysis for cached ranking rows"
)]
struct Cli {
    /// Steam app ids to process, in order (omit when using --missing)
    #[arg(value_name = "APP_ID")]
    app_ids: Vec<i64>,
    /// Scan the cache for rows lacking an analysis instead of naming ids
    #[arg(long, default_value_t = false, conflicts_with = "app_ids")]
    missing: bool,
    /// Cap for --missing scans (defaults to BACKFILL_LIMIT or 500)
    #[arg(long)]
    limit: Option<i64>,
    /// Optional override for the database URL
    #[arg(long)]
    db_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_util::bootstrap_cli("analysis_backfill");
    let cli = Cli::parse();

    env_util::preflight_check(
        "analysis_backfill",
        &["SUPABASE_SERVICE_ROLE_KEY"],
        &[
            "SUPABASE_URL",
            "ANALYZE_GAME_URL",
            "SUPABASE_DB_URL",
            "DATABASE_URL",
            "ANALYZE_TIMEOUT_SECS",
            "BACKFILL_LIMIT",
            "DB_MAX_CONNS",
        ],
    )?;

    let db_url = match cli.db_url {
        Some(url) => url,
        None => env_util::db_url_prefer_session()
            .context("Set SUPABASE_IPV6_DB / SUPABASE_DB_URL / DATABASE_URL / DB_URL")?,
    };
    let max_conns: u32 = env_util::env_parse("DB_MAX_CONNS", 4);
    let db = Db::connect(&db_url, max_conns)
        .await
        .context("Db::connect failed")?;

    let store = Arc::new(PgRankingsCacheStore::new(db));
    let provider = Arc::new(AnalysisProvider::from_env()?);

    let app_ids = if cli.missing {
        let limit = cli
            .limit
            .or_else(|| env_util::env_parse_opt::<i64>("BACKFILL_LIMIT"))
            .unwrap_or(500);
        store.app_ids_missing_analysis(limit).await?
    } else {
        cli.app_ids.clone()
    };
    if app_ids.is_empty() {
        println!("nothing to backfill (0 app ids)");
        return Ok(());
    }

    println!(
        "backfilling analysis for {} app ids (endpoint={})",
        app_ids.len(),
        provider.endpoint()
    );
    let job = AnalysisBackfill::new(store, provider);
    let summary = job.run_backfill(&app_ids).await;
    println!(
        "analysis backfill complete: processed={}, enriched={}, skipped={}, failed={}",
        summary.processed,
        summary.enriched,
        summary.skipped(),
        summary.failed()
    );
    Ok(())
}
