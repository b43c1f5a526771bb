pub(crate) mod cli;
pub(crate) mod core;
pub(crate) mod schemas;
pub(crate) mod services;
pub(crate) mod tasks;

#[cfg(test)]
mod test_support;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use crate::cli::Args;
use crate::core::{config::Settings, telemetry};
use crate::services::ai_grading::{AiGradingService, GradeOptions};
use crate::services::criteria::GradingCriteria;
use crate::services::grading_cache::GradingCache;
use crate::services::progress::ProgressLedger;
use crate::services::submissions;
use crate::tasks::batch::BatchRunner;

pub async fn run() -> anyhow::Result<()> {
    let args = Args::parse();

    let settings = match &args.config {
        Some(path) => Settings::load_with_env_file(path)?,
        None => {
            dotenvy::dotenv().ok();
            Settings::load()?
        }
    };
    telemetry::init_tracing(&settings, args.log_level.as_deref())?;
    core::metrics::init(&settings)?;

    let criteria = match &args.criteria {
        Some(path) => GradingCriteria::from_file(path)?,
        None => GradingCriteria::default(),
    };

    let cache = match &settings.paths().cache_file {
        Some(path) => GradingCache::open(path).await,
        None => GradingCache::in_memory(),
    };
    if args.clear_cache {
        cache.clear().await.context("Failed to clear grading cache")?;
        tracing::info!("Grading cache cleared");
    }

    let grader = AiGradingService::from_settings(&settings, Arc::new(criteria), Arc::new(cache))?;
    let grader = Arc::new(grader);

    let paths = settings.paths();
    let reference = submissions::load_reference(&paths.base_path, &paths.reference_file).await?;
    let mut pending = submissions::discover(&paths.base_path, &paths.submission_extension).await?;

    if let Some(student) = &args.student {
        pending.retain(|submission| &submission.student_id == student);
        if pending.is_empty() {
            anyhow::bail!("No submission found for student {student}");
        }
    }

    let ledger = attach_ledger(&args, &settings).await?;

    let mut options = GradeOptions::from_settings(&settings);
    options.use_cache = !args.no_cache;
    let workers = args.parallel.map(usize::from).unwrap_or(settings.grading().max_workers);

    let runner = BatchRunner::new(grader.clone(), ledger.clone(), options, workers);
    let report = runner.run(pending, Arc::from(reference), core::shutdown::cancellation()).await;

    if let Some(path) = &args.output {
        let bytes = serde_json::to_vec_pretty(&report.records)?;
        core::fs::write_atomic(path, &bytes)
            .await
            .with_context(|| format!("Failed to write results to {}", path.display()))?;
        tracing::info!(path = %path.display(), records = report.records.len(), "Results written");
    }

    tracing::info!(
        total = report.records.len(),
        succeeded = report.succeeded(),
        failed = report.failed(),
        skipped = report.skipped,
        lost = report.lost,
        cached_fingerprints = grader.cache().len().await,
        "Grading summary"
    );
    if let Some(ledger) = &ledger {
        let stats = ledger.statistics().await;
        tracing::info!(
            path = %ledger.path().display(),
            total_completed = stats.total_completed,
            total_failed = stats.total_failed,
            last_updated = stats.last_updated.as_deref().unwrap_or("-"),
            "Progress ledger statistics"
        );
    }
    if report.not_started > 0 {
        tracing::warn!(
            not_started = report.not_started,
            "Run interrupted; rerun with --resume to continue"
        );
    }

    if let Err(err) = core::metrics::flush(&settings).await {
        tracing::warn!(error = %err, "Failed to write metrics snapshot");
    }

    Ok(())
}

/// Opens the ledger for `--resume`, `--retry-failed` and `--fresh`.
///
/// Retry mode clears the failed set up front and relies on the completed set to skip
/// everyone else, so an interrupted retry leaves its students eligible for the next run.
async fn attach_ledger(
    args: &Args,
    settings: &Settings,
) -> anyhow::Result<Option<Arc<ProgressLedger>>> {
    if !args.uses_ledger() {
        return Ok(None);
    }

    let ledger = ProgressLedger::open(&settings.paths().progress_file).await;

    if args.fresh {
        ledger.reset().await.context("Failed to reset progress ledger")?;
        tracing::info!("Progress ledger reset");
    }

    if args.retry_failed {
        let failed = ledger.failed_ids().await;
        ledger.reset_failed().await.context("Failed to reset failed entries")?;
        tracing::info!(count = failed.len(), "Retrying previously failed submissions");
    } else if args.resume {
        let completed = ledger.completed_ids().await;
        tracing::info!(completed = completed.len(), "Resuming from progress ledger");
    }

    Ok(Some(Arc::new(ledger)))
}
