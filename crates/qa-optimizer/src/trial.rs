//! Trial records, incumbent tracking and search run configuration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use qa_types::{config_error, Configuration, ModelMetrics, QaResult, SearchError, TaskKind};

use crate::registry::ModelRegistry;
use crate::sampler::SamplerConfig;
use crate::space::SearchSpace;

/// Unique search job identifier.
pub type SearchId = Uuid;

/// Environment variable naming the external sampler endpoint.
pub const SAMPLER_URL_ENV: &str = "QUANTUM_SAMPLER_URL";

/// Whether we are maximizing or minimizing the metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectiveDirection {
    #[default]
    Maximize,
    Minimize,
}

impl ObjectiveDirection {
    /// Convert a raw metric value into the internal maximize-oriented score.
    pub fn orient(&self, raw: f64) -> f64 {
        match self {
            Self::Maximize => raw,
            Self::Minimize => -raw,
        }
    }

    /// Inverse of [`Self::orient`].
    pub fn raw(&self, internal: f64) -> f64 {
        self.orient(internal)
    }
}

impl std::str::FromStr for ObjectiveDirection {
    type Err = qa_types::QaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "maximize" => Ok(Self::Maximize),
            "minimize" => Ok(Self::Minimize),
            other => Err(config_error!(
                "objective must be 'maximize' or 'minimize', got '{other}'"
            )),
        }
    }
}

/// Which phase produced a trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchPhase {
    Classical,
    Quantum,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrialStatus {
    Completed,
    Failed,
}

/// One evaluated candidate. Immutable once appended to the history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialRecord {
    /// 1-based position in the history.
    pub iteration: usize,
    /// Internal maximize-oriented score; `-inf` for failed trials.
    pub score: f64,
    /// Metric value as returned by the evaluator, for completed trials.
    pub raw_score: Option<f64>,
    pub status: TrialStatus,
    pub phase: SearchPhase,
    pub config: Configuration,
    pub error: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl TrialRecord {
    pub fn completed(
        iteration: usize,
        phase: SearchPhase,
        config: Configuration,
        score: f64,
        raw_score: f64,
    ) -> Self {
        Self {
            iteration,
            score,
            raw_score: Some(raw_score),
            status: TrialStatus::Completed,
            phase,
            config,
            error: None,
            recorded_at: Utc::now(),
        }
    }

    /// A failed trial carries the worst possible score so it never becomes
    /// the incumbent.
    pub fn failed(iteration: usize, phase: SearchPhase, config: Configuration, error: String) -> Self {
        Self {
            iteration,
            score: f64::NEG_INFINITY,
            raw_score: None,
            status: TrialStatus::Failed,
            phase,
            config,
            error: Some(error),
            recorded_at: Utc::now(),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == TrialStatus::Completed
    }
}

/// Best configuration found so far, with its fitted model.
#[derive(Debug, Clone)]
pub struct Incumbent<M> {
    pub score: f64,
    pub raw_score: f64,
    pub config: Configuration,
    pub metrics: ModelMetrics,
    pub model: M,
    pub iteration: usize,
}

impl<M> Incumbent<M> {
    /// Strict improvement on the internal (maximize-oriented) scale.
    pub fn is_improved_by(&self, score: f64) -> bool {
        score > self.score
    }
}

/// Lifecycle state of a search run. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SearchState {
    Initialized,
    ClassicalRunning,
    QuantumRunning,
    Finalizing,
    Complete,
    Failed,
}

impl SearchState {
    pub fn can_transition_to(&self, next: SearchState) -> bool {
        use SearchState::*;
        matches!(
            (self, next),
            (Initialized, ClassicalRunning)
                | (ClassicalRunning, QuantumRunning)
                | (ClassicalRunning, Finalizing)
                | (QuantumRunning, Finalizing)
                | (Finalizing, Complete)
                | (Initialized | ClassicalRunning | QuantumRunning | Finalizing, Failed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SearchState::Complete | SearchState::Failed)
    }
}

impl std::fmt::Display for SearchState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// Aggregate progress of a search run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchProgress {
    pub id: SearchId,
    pub state: SearchState,
    pub total_budget: usize,
    pub trials_run: usize,
    pub trials_failed: usize,
    pub candidates_skipped: usize,
    pub best_score: Option<f64>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl SearchProgress {
    pub fn new(id: SearchId, total_budget: usize) -> Self {
        Self {
            id,
            state: SearchState::Initialized,
            total_budget,
            trials_run: 0,
            trials_failed: 0,
            candidates_skipped: 0,
            best_score: None,
            started_at: None,
            finished_at: None,
            error: None,
        }
    }

    pub fn advance(&mut self, next: SearchState) -> Result<(), SearchError> {
        if !self.state.can_transition_to(next) {
            return Err(SearchError::IllegalTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        if self.state == SearchState::Initialized {
            self.started_at = Some(Utc::now());
        }
        if next.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        self.state = next;
        Ok(())
    }

    pub fn mark_failed(&mut self, error: String) {
        if !self.state.is_terminal() {
            self.state = SearchState::Failed;
            self.finished_at = Some(Utc::now());
        }
        self.error = Some(error);
    }

    pub fn record(&mut self, record: &TrialRecord) {
        self.trials_run += 1;
        if !record.is_completed() {
            self.trials_failed += 1;
        }
    }
}

fn default_classical_fraction() -> f64 {
    0.7
}

fn default_exploration_weight() -> f64 {
    0.3
}

fn default_history_limit() -> usize {
    50
}

/// Top-level configuration for a search job.
///
/// `metric`, `objective` and `search_budget` are required when parsed from a
/// job's options; everything else has a default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "Uuid::new_v4")]
    pub id: SearchId,
    #[serde(default)]
    pub name: String,

    /// Metric the evaluator scores with (e.g. "accuracy", "rmse").
    pub metric: String,
    pub objective: ObjectiveDirection,

    /// Total number of evaluations across both phases.
    pub search_budget: usize,

    /// Cap on selected features; clamped to the feature count.
    #[serde(default)]
    pub max_features: Option<usize>,

    /// Share of the budget for the classical phase when a sampler is set.
    #[serde(default = "default_classical_fraction")]
    pub classical_fraction: f64,

    /// Probability of a pure random proposal once history exists.
    #[serde(default = "default_exploration_weight")]
    pub exploration_weight: f64,

    /// Number of history entries kept in the report.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    #[serde(default)]
    pub evaluation_timeout_secs: Option<u64>,

    /// Seed for all proposal randomness; entropy when absent.
    #[serde(default)]
    pub seed: Option<u64>,

    #[serde(default)]
    pub sampler: Option<SamplerConfig>,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl SearchConfig {
    pub fn new(metric: &str, objective: ObjectiveDirection, search_budget: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: String::new(),
            metric: metric.to_string(),
            objective,
            search_budget,
            max_features: None,
            classical_fraction: default_classical_fraction(),
            exploration_weight: default_exploration_weight(),
            history_limit: default_history_limit(),
            evaluation_timeout_secs: None,
            seed: None,
            sampler: None,
            created_at: Utc::now(),
        }
    }

    /// Parse and validate a job's options object.
    pub fn from_json(options: &str) -> QaResult<Self> {
        let config: Self = serde_json::from_str(options)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn with_max_features(mut self, max_features: usize) -> Self {
        self.max_features = Some(max_features);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_exploration_weight(mut self, weight: f64) -> Self {
        self.exploration_weight = weight;
        self
    }

    pub fn with_evaluation_timeout(mut self, secs: u64) -> Self {
        self.evaluation_timeout_secs = Some(secs);
        self
    }

    pub fn with_sampler(mut self, sampler: SamplerConfig) -> Self {
        self.sampler = Some(sampler);
        self
    }

    /// Point the quantum phase at `$QUANTUM_SAMPLER_URL` when it is set and
    /// non-empty.
    pub fn with_sampler_from_env(self) -> Self {
        match std::env::var(SAMPLER_URL_ENV) {
            Ok(url) if !url.trim().is_empty() => self.with_sampler(SamplerConfig::new(url.trim())),
            _ => self,
        }
    }

    /// Build the job's search space with this config's `max_features`.
    pub fn build_space(
        &self,
        feature_names: Vec<String>,
        task: TaskKind,
        registry: &ModelRegistry,
    ) -> QaResult<SearchSpace> {
        SearchSpace::new(feature_names, task, self.max_features, registry)
    }

    pub fn validate(&self) -> QaResult<()> {
        if !(0.0..=1.0).contains(&self.classical_fraction) {
            return Err(config_error!(
                "classical_fraction must be within [0, 1], got {}",
                self.classical_fraction
            ));
        }
        if !(0.0..=1.0).contains(&self.exploration_weight) {
            return Err(config_error!(
                "exploration_weight must be within [0, 1], got {}",
                self.exploration_weight
            ));
        }
        if self.history_limit == 0 {
            return Err(config_error!("history_limit must be at least 1"));
        }
        if self.max_features == Some(0) {
            return Err(config_error!("max_features must be at least 1"));
        }
        if let Some(sampler) = &self.sampler {
            sampler.validate()?;
        }
        Ok(())
    }

    /// Trials for the classical and quantum phases. With a sampler the
    /// classical phase gets its configured share of the budget (rounded
    /// down); without one it gets the whole budget.
    pub fn budget_split(&self, with_sampler: bool) -> (usize, usize) {
        if !with_sampler {
            return (self.search_budget, 0);
        }
        let classical = ((self.search_budget as f64 * self.classical_fraction).floor() as usize)
            .min(self.search_budget);
        (classical, self.search_budget - classical)
    }

    pub fn classical_budget(&self) -> usize {
        self.budget_split(self.sampler.is_some()).0
    }

    pub fn quantum_budget(&self) -> usize {
        self.budget_split(self.sampler.is_some()).1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> SearchConfig {
        SearchConfig::new("accuracy", ObjectiveDirection::Maximize, 20)
            .with_name("test_search")
            .with_seed(42)
    }

    #[test]
    fn objective_orientation() {
        assert_eq!(ObjectiveDirection::Maximize.orient(0.8), 0.8);
        assert_eq!(ObjectiveDirection::Minimize.orient(0.8), -0.8);
        assert_eq!(ObjectiveDirection::Minimize.raw(-0.6), 0.6);
        assert_eq!("minimize".parse::<ObjectiveDirection>().unwrap(), ObjectiveDirection::Minimize);
        assert!("upwards".parse::<ObjectiveDirection>().is_err());
    }

    #[test]
    fn budget_split_with_sampler() {
        let config = sample_config().with_sampler(SamplerConfig::new("http://localhost:8001"));
        assert_eq!(config.classical_budget(), 14);
        assert_eq!(config.quantum_budget(), 6);

        let odd = SearchConfig::new("accuracy", ObjectiveDirection::Maximize, 5)
            .with_sampler(SamplerConfig::new("http://localhost:8001"));
        assert_eq!(odd.classical_budget(), 3);
        assert_eq!(odd.quantum_budget(), 2);

        let tiny = SearchConfig::new("accuracy", ObjectiveDirection::Maximize, 1)
            .with_sampler(SamplerConfig::new("http://localhost:8001"));
        assert_eq!(tiny.classical_budget(), 0);
        assert_eq!(tiny.quantum_budget(), 1);
    }

    #[test]
    fn budget_without_sampler_is_all_classical() {
        let config = sample_config();
        assert_eq!(config.classical_budget(), 20);
        assert_eq!(config.quantum_budget(), 0);
        assert_eq!(config.budget_split(true), (14, 6));
    }

    #[test]
    fn parses_job_options() {
        let config = SearchConfig::from_json(
            r#"{"metric": "rmse", "objective": "minimize", "search_budget": 30, "max_features": 4}"#,
        )
        .unwrap();
        assert_eq!(config.objective, ObjectiveDirection::Minimize);
        assert_eq!(config.search_budget, 30);
        assert_eq!(config.max_features, Some(4));
        assert_eq!(config.classical_fraction, 0.7);
        assert_eq!(config.history_limit, 50);
        assert!(config.sampler.is_none());
    }

    #[test]
    fn rejects_invalid_job_options() {
        assert!(SearchConfig::from_json(r#"{"metric": "rmse", "objective": "sideways", "search_budget": 3}"#).is_err());
        assert!(SearchConfig::from_json(r#"{"metric": "rmse", "objective": "minimize"}"#).is_err());

        let err = SearchConfig::from_json(
            r#"{"metric": "rmse", "objective": "minimize", "search_budget": 3, "classical_fraction": 1.5}"#,
        )
        .unwrap_err();
        assert!(err.is_setup_error());
    }

    #[test]
    fn state_transitions_only_move_forward() {
        let mut progress = SearchProgress::new(Uuid::new_v4(), 10);
        assert_eq!(progress.state, SearchState::Initialized);
        assert!(progress.started_at.is_none());

        progress.advance(SearchState::ClassicalRunning).unwrap();
        assert!(progress.started_at.is_some());
        assert!(progress.advance(SearchState::Initialized).is_err());

        progress.advance(SearchState::Finalizing).unwrap();
        assert!(progress.advance(SearchState::QuantumRunning).is_err());

        progress.advance(SearchState::Complete).unwrap();
        assert!(progress.finished_at.is_some());
        assert!(progress.advance(SearchState::Failed).is_err());
    }

    #[test]
    fn failure_is_terminal() {
        let mut progress = SearchProgress::new(Uuid::new_v4(), 10);
        progress.advance(SearchState::ClassicalRunning).unwrap();
        progress.mark_failed("boom".into());
        assert_eq!(progress.state, SearchState::Failed);
        assert_eq!(progress.error.as_deref(), Some("boom"));
        assert!(progress.advance(SearchState::Finalizing).is_err());
    }

    #[test]
    fn incumbent_requires_strict_improvement() {
        let incumbent = Incumbent {
            score: 0.8,
            raw_score: 0.8,
            config: Configuration::new("svm", vec![true]),
            metrics: ModelMetrics::default(),
            model: (),
            iteration: 1,
        };
        assert!(incumbent.is_improved_by(0.81));
        assert!(!incumbent.is_improved_by(0.8));
        assert!(!incumbent.is_improved_by(f64::NEG_INFINITY));
    }

    #[test]
    fn failed_records_carry_worst_score() {
        let record = TrialRecord::failed(
            3,
            SearchPhase::Classical,
            Configuration::new("svm", vec![true]),
            "diverged".into(),
        );
        assert_eq!(record.score, f64::NEG_INFINITY);
        assert!(!record.is_completed());

        let mut progress = SearchProgress::new(Uuid::new_v4(), 10);
        progress.record(&record);
        assert_eq!(progress.trials_run, 1);
        assert_eq!(progress.trials_failed, 1);
    }
}
