use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

use crate::database_ops::analysis::provider::AnalysisCompute;
use crate::database_ops::rankings_cache::{RankingPayload, RankingsCacheStore};

/// Terminal state for one app id within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppOutcome {
    Enriched,
    SkippedNotFound,
    SkippedMalformed,
    SkippedAlreadyAnalyzed,
    FailedLookup,
    FailedAnalysis,
    FailedSave,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BackfillSummary {
    pub processed: usize,
    pub enriched: usize,
    pub skipped_not_found: usize,
    pub skipped_malformed: usize,
    pub skipped_already_analyzed: usize,
    pub failed_lookup: usize,
    pub failed_analysis: usize,
    pub failed_save: usize,
}

impl BackfillSummary {
    pub fn record(&mut self, outcome: AppOutcome) {
        self.processed += 1;
        match outcome {
            AppOutcome::Enriched => self.enriched += 1,
            AppOutcome::SkippedNotFound => self.skipped_not_found += 1,
            AppOutcome::SkippedMalformed => self.skipped_malformed += 1,
            AppOutcome::SkippedAlreadyAnalyzed => self.skipped_already_analyzed += 1,
            AppOutcome::FailedLookup => self.failed_lookup += 1,
            AppOutcome::FailedAnalysis => self.failed_analysis += 1,
            AppOutcome::FailedSave => self.failed_save += 1,
        }
    }

    pub fn skipped(&self) -> usize {
        self.skipped_not_found + self.skipped_malformed + self.skipped_already_analyzed
    }

    pub fn failed(&self) -> usize {
        self.failed_lookup + self.failed_analysis + self.failed_save
    }
}

/// Fills in missing AI analysis for cached ranking rows. The store and the
/// computation seam are injected at construction so tests run against fakes.
pub struct AnalysisBackfill {
    store: Arc<dyn RankingsCacheStore>,
    compute: Arc<dyn AnalysisCompute>,
}

impl AnalysisBackfill {
    pub fn new(store: Arc<dyn RankingsCacheStore>, compute: Arc<dyn AnalysisCompute>) -> Self {
        Self { store, compute }
    }

    /// Process every app id in order. Failures and skips are logged per id
    /// and counted; one bad id never halts the batch, and the run itself
    /// never fails. Re-running with the same input is safe: rows that gained
    /// an analysis are skipped on the next pass.
    #[instrument(skip(self, app_ids))]
    pub async fn run_backfill(&self, app_ids: &[i64]) -> BackfillSummary {
        let mut summary = BackfillSummary::default();
        for &app_id in app_ids {
            let outcome = self.backfill_one(app_id).await;
            summary.record(outcome);
        }
        info!(
            processed = summary.processed,
            enriched = summary.enriched,
            skipped = summary.skipped(),
            failed = summary.failed(),
            "analysis backfill complete"
        );
        summary
    }

    async fn backfill_one(&self, app_id: i64) -> AppOutcome {
        let record = match self.store.find_by_app_id(app_id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                info!(app_id, "no cached ranking row; skipping");
                return AppOutcome::SkippedNotFound;
            }
            Err(err) => {
                error!(app_id, error = %err, "rankings cache lookup failed");
                return AppOutcome::FailedLookup;
            }
        };

        let payload = match RankingPayload::from_value(&record.data) {
            Some(payload) => payload,
            None => {
                warn!(
                    app_id,
                    record_id = record.id,
                    "cache payload is not a JSON object; skipping"
                );
                return AppOutcome::SkippedMalformed;
            }
        };

        if payload.has_analysis() {
            debug!(app_id, record_id = record.id, "analysis already present; skipping");
            return AppOutcome::SkippedAlreadyAnalyzed;
        }

        // The analysis service reads the whole payload, review arrays and all.
        let analysis = match self.compute.analyze(app_id, &record.data).await {
            Ok(analysis) => analysis,
            Err(err) => {
                error!(app_id, error = %err, "analysis computation failed");
                return AppOutcome::FailedAnalysis;
            }
        };

        let merged = payload.into_enriched(analysis);
        match self.store.save_payload(record.id, &merged).await {
            Ok(()) => {
                info!(app_id, record_id = record.id, "stored analysis");
                AppOutcome::Enriched
            }
            Err(err) => {
                error!(app_id, record_id = record.id, error = %err, "failed to store analysis");
                AppOutcome::FailedSave
            }
        }
    }
}
