//! Final result of a search job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use qa_types::{Configuration, Hyperparameters, QaResult};

use crate::space::SearchSpace;
use crate::trial::{
    Incumbent, ObjectiveDirection, SearchConfig, SearchId, SearchPhase, SearchProgress, TrialRecord,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestModel {
    pub name: String,
    pub hyperparameters: Hyperparameters,
    pub selected_features: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportMetrics {
    pub train_score: f64,
    pub validation_score: f64,
    /// Held-out score of the incumbent; `None` when scoring failed.
    pub test_score: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub iteration: usize,
    /// Raw metric value; `None` for failed trials.
    pub score: Option<f64>,
    pub config: Configuration,
}

impl From<&TrialRecord> for HistoryEntry {
    fn from(record: &TrialRecord) -> Self {
        Self {
            iteration: record.iteration,
            score: record.raw_score.filter(|s| s.is_finite()),
            config: record.config.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchSummary {
    pub total_budget: usize,
    pub classical_budget: usize,
    pub trials_run: usize,
    pub trials_failed: usize,
    pub quantum_trials: usize,
    pub candidates_skipped: usize,
    pub best_iteration: usize,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchReport {
    pub job_id: SearchId,
    pub metric: String,
    pub objective: ObjectiveDirection,
    pub best_model: BestModel,
    pub metrics: ReportMetrics,
    /// The incumbent's own importances; empty when its model reports none.
    pub feature_importance: HashMap<String, f64>,
    pub training_history: Vec<HistoryEntry>,
    pub summary: SearchSummary,
}

impl SearchReport {
    pub fn build<M>(
        config: &SearchConfig,
        space: &SearchSpace,
        progress: &SearchProgress,
        incumbent: &Incumbent<M>,
        history: &[TrialRecord],
        test_score: Option<f64>,
        classical_budget: usize,
    ) -> Self {
        let training_history = history
            .iter()
            .take(config.history_limit)
            .map(HistoryEntry::from)
            .collect();

        Self {
            job_id: config.id,
            metric: config.metric.clone(),
            objective: config.objective,
            best_model: BestModel {
                name: incumbent.config.model.clone(),
                hyperparameters: incumbent.config.hyperparameters.clone(),
                selected_features: space.decode_feature_mask(&incumbent.config.feature_mask),
            },
            metrics: ReportMetrics {
                train_score: incumbent.metrics.train_score,
                validation_score: incumbent.metrics.validation_score,
                test_score,
            },
            feature_importance: incumbent.metrics.feature_importance.clone(),
            training_history,
            summary: SearchSummary {
                total_budget: config.search_budget,
                classical_budget,
                trials_run: progress.trials_run,
                trials_failed: progress.trials_failed,
                quantum_trials: history
                    .iter()
                    .filter(|r| r.phase == SearchPhase::Quantum)
                    .count(),
                candidates_skipped: progress.candidates_skipped,
                best_iteration: incumbent.iteration,
                started_at: progress.started_at,
                finished_at: progress.finished_at,
            },
        }
    }

    pub fn to_json(&self) -> QaResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
