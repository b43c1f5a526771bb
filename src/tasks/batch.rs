//! Drives a set of submissions through the grading client on a fixed worker pool.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{watch, Mutex};

use crate::schemas::grading::{GradingRecord, Submission};
use crate::services::ai_grading::{AiGradingService, GradeOptions};
use crate::services::progress::ProgressLedger;

#[derive(Debug, Default)]
pub(crate) struct BatchReport {
    /// One record per graded submission, in input order.
    pub(crate) records: Vec<GradingRecord>,
    /// Students already completed in the ledger.
    pub(crate) skipped: usize,
    /// Submissions never claimed because the batch was cancelled.
    pub(crate) not_started: usize,
    /// Claimed by a worker that died before recording an outcome.
    pub(crate) lost: usize,
}

impl BatchReport {
    pub(crate) fn succeeded(&self) -> usize {
        self.records.iter().filter(|record| record.success).count()
    }

    pub(crate) fn failed(&self) -> usize {
        self.records.len() - self.succeeded()
    }
}

#[derive(Debug, Clone)]
pub(crate) struct BatchRunner {
    grader: Arc<AiGradingService>,
    ledger: Option<Arc<ProgressLedger>>,
    options: GradeOptions,
    workers: usize,
}

struct Shared {
    grader: Arc<AiGradingService>,
    ledger: Option<Arc<ProgressLedger>>,
    options: GradeOptions,
    reference: Arc<str>,
    queue: Mutex<VecDeque<(usize, Submission)>>,
    graded: Mutex<Vec<(usize, GradingRecord)>>,
    claimed: AtomicUsize,
    skipped: AtomicUsize,
}

impl BatchRunner {
    pub(crate) fn new(
        grader: Arc<AiGradingService>,
        ledger: Option<Arc<ProgressLedger>>,
        options: GradeOptions,
        workers: usize,
    ) -> Self {
        Self { grader, ledger, options, workers: workers.max(1) }
    }

    /// Grades every submission not already completed in the ledger.
    ///
    /// Cancellation is checked before each claim; a submission already being graded
    /// runs to completion.
    pub(crate) async fn run(
        &self,
        submissions: Vec<Submission>,
        reference: Arc<str>,
        cancel: watch::Receiver<bool>,
    ) -> BatchReport {
        let total = submissions.len();
        let workers = self.workers.min(total.max(1));
        tracing::info!(total, workers, "Starting grading batch");

        let shared = Arc::new(Shared {
            grader: self.grader.clone(),
            ledger: self.ledger.clone(),
            options: self.options,
            reference,
            queue: Mutex::new(submissions.into_iter().enumerate().collect()),
            graded: Mutex::new(Vec::with_capacity(total)),
            claimed: AtomicUsize::new(0),
            skipped: AtomicUsize::new(0),
        });

        let mut handles = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            handles.push(tokio::spawn(worker(worker_id, shared.clone(), cancel.clone())));
        }

        for handle in handles {
            if let Err(err) = handle.await {
                tracing::error!(error = %err, "Grading worker join failed");
            }
        }

        let mut graded = std::mem::take(&mut *shared.graded.lock().await);
        graded.sort_by_key(|(index, _)| *index);

        let mut report = BatchReport {
            records: graded.into_iter().map(|(_, record)| record).collect(),
            skipped: shared.skipped.load(Ordering::SeqCst),
            not_started: shared.queue.lock().await.len(),
            lost: 0,
        };
        let claimed = shared.claimed.load(Ordering::SeqCst);
        report.lost = claimed.saturating_sub(report.records.len() + report.skipped);
        if report.lost > 0 {
            tracing::error!(lost = report.lost, "Submissions claimed without a recorded outcome");
        }

        if report.not_started > 0 {
            tracing::warn!(not_started = report.not_started, "Batch cancelled before completion");
        } else if let Some(ledger) = &self.ledger {
            if let Err(err) = ledger.clear_in_progress().await {
                tracing::error!(error = %err, "Failed to clear in-progress marker");
            }
        }

        tracing::info!(
            graded = report.records.len(),
            succeeded = report.succeeded(),
            failed = report.failed(),
            skipped = report.skipped,
            lost = report.lost,
            "Grading batch finished"
        );
        report
    }
}

async fn worker(worker_id: usize, shared: Arc<Shared>, cancel: watch::Receiver<bool>) {
    loop {
        if *cancel.borrow() {
            tracing::debug!(worker_id, "Worker stopping on cancellation");
            break;
        }

        let Some((index, submission)) = shared.queue.lock().await.pop_front() else {
            break;
        };
        shared.claimed.fetch_add(1, Ordering::SeqCst);

        match grade_one(&shared, &submission).await {
            Some(record) => shared.graded.lock().await.push((index, record)),
            None => {
                shared.skipped.fetch_add(1, Ordering::SeqCst);
            }
        }
    }
}

/// `None` when the ledger says the student is already done.
async fn grade_one(shared: &Shared, submission: &Submission) -> Option<GradingRecord> {
    let student_id = submission.student_id.as_str();

    if let Some(ledger) = &shared.ledger {
        if ledger.should_skip(student_id).await {
            tracing::info!(student_id, "Already graded; skipping");
            metrics::counter!("grading_jobs_total", "status" => "skipped").increment(1);
            return None;
        }
        if let Err(err) = ledger.mark_in_progress(student_id).await {
            tracing::error!(student_id, error = %err, "Failed to record in-progress marker");
        }
    }

    let record = shared
        .grader
        .grade(student_id, &submission.content, &shared.reference, &shared.options)
        .await;

    if let Some(ledger) = &shared.ledger {
        let written = if record.success {
            ledger.mark_completed(student_id, &record).await
        } else {
            ledger.mark_failed(student_id, &record.comment).await
        };
        if let Err(err) = written {
            tracing::error!(student_id, error = %err, "Failed to update progress ledger");
        }
    }

    let status = if record.success { "completed" } else { "failed" };
    metrics::counter!("grading_jobs_total", "status" => status).increment(1);
    tracing::info!(
        student_id,
        path = %submission.path.display(),
        success = record.success,
        score = record.score,
        from_cache = record.from_cache,
        "Submission graded"
    );

    Some(record)
}
