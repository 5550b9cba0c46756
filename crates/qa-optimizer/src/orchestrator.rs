//! Budget-allocating search loop: a classical explore/exploit phase, an
//! optional phase fed by an external sampler, then finalization.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use qa_types::{config_error, Configuration, QaResult, SearchError, TrainingError};

use crate::evaluator::{Evaluation, Evaluator};
use crate::proposer::{CandidateProposer, ProposalContext, SequentialProposer};
use crate::report::SearchReport;
use crate::sampler::{HttpSamplerClient, RemoteSamplerProposer, SamplerClient, SamplerConfig};
use crate::space::SearchSpace;
use crate::trial::{
    Incumbent, SearchConfig, SearchPhase, SearchProgress, SearchState, TrialRecord,
};

/// Cooperative cancellation shared between a running search and its owner.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Drives one search job from its first proposal to the final report.
///
/// Trials run strictly one after another. Per-trial failures are recorded
/// and never abort the run; only setup errors, cancellation and a search
/// with no successful trial end in an error.
pub struct Orchestrator<E: Evaluator> {
    config: SearchConfig,
    space: SearchSpace,
    evaluator: E,
    classical: Box<dyn CandidateProposer>,
    quantum: Option<Box<dyn CandidateProposer>>,
    progress: SearchProgress,
    history: Vec<TrialRecord>,
    incumbent: Option<Incumbent<E::Model>>,
    cancel: CancellationFlag,
}

impl<E: Evaluator> Orchestrator<E> {
    /// Validate `config` and wire the proposers. A configured sampler gets an
    /// HTTP client; use [`Self::with_sampler_client`] to supply another.
    ///
    /// When the job sets `max_features`, `space` must carry the same cap
    /// (after clamping to its feature count); see [`SearchConfig::build_space`].
    pub fn new(config: SearchConfig, space: SearchSpace, evaluator: E) -> QaResult<Self> {
        config.validate()?;
        if let Some(requested) = config.max_features {
            let expected = requested.min(space.num_features());
            if space.max_features() != expected {
                return Err(config_error!(
                    "search space allows {} features but the job requests max_features = {requested}",
                    space.max_features()
                ));
            }
        }

        let classical = Box::new(SequentialProposer::new(config.exploration_weight, config.seed));
        let quantum: Option<Box<dyn CandidateProposer>> = match &config.sampler {
            Some(sampler) => {
                let client = HttpSamplerClient::new(sampler)
                    .map_err(|e| config_error!("failed to initialise sampler client: {e}"))?;
                Some(Box::new(RemoteSamplerProposer::new(
                    client,
                    sampler.batch_limit,
                    config.seed.map(|s| s.wrapping_add(1)),
                )))
            }
            None => None,
        };

        let progress = SearchProgress::new(config.id, config.search_budget);
        Ok(Self {
            config,
            space,
            evaluator,
            classical,
            quantum,
            progress,
            history: Vec::new(),
            incumbent: None,
            cancel: CancellationFlag::new(),
        })
    }

    /// Use `client` for the quantum phase.
    pub fn with_sampler_client<C: SamplerClient + 'static>(self, client: C) -> Self {
        let batch_limit = self
            .config
            .sampler
            .as_ref()
            .map(|s| s.batch_limit)
            .unwrap_or_else(|| SamplerConfig::default().batch_limit);
        let seed = self.config.seed.map(|s| s.wrapping_add(1));
        self.with_quantum_proposer(RemoteSamplerProposer::new(client, batch_limit, seed))
    }

    /// Replace the proposer of the quantum phase.
    pub fn with_quantum_proposer<P: CandidateProposer + 'static>(mut self, proposer: P) -> Self {
        self.quantum = Some(Box::new(proposer));
        self
    }

    /// Replace the proposer of the classical phase.
    pub fn with_classical_proposer<P: CandidateProposer + 'static>(mut self, proposer: P) -> Self {
        self.classical = Box::new(proposer);
        self
    }

    pub fn cancellation_flag(&self) -> CancellationFlag {
        self.cancel.clone()
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    pub fn space(&self) -> &SearchSpace {
        &self.space
    }

    pub fn state(&self) -> SearchState {
        self.progress.state
    }

    pub fn progress(&self) -> &SearchProgress {
        &self.progress
    }

    pub fn history(&self) -> &[TrialRecord] {
        &self.history
    }

    pub fn incumbent(&self) -> Option<&Incumbent<E::Model>> {
        self.incumbent.as_ref()
    }

    /// (classical, quantum) trial budgets for this run.
    pub fn budget_split(&self) -> (usize, usize) {
        self.config.budget_split(self.quantum.is_some())
    }

    /// Run the search to completion. Can be called once.
    pub async fn run(&mut self) -> QaResult<SearchReport> {
        self.progress.advance(SearchState::ClassicalRunning)?;
        let (classical_budget, quantum_budget) = self.budget_split();
        info!(
            job_id = %self.config.id,
            metric = %self.config.metric,
            objective = ?self.config.objective,
            features = self.space.num_features(),
            max_features = self.space.max_features(),
            classical_budget,
            quantum_budget,
            "search started"
        );

        match self.execute(classical_budget, quantum_budget).await {
            Ok(report) => Ok(report),
            Err(e) => {
                warn!(job_id = %self.config.id, error = %e, "search failed");
                self.progress.mark_failed(e.to_string());
                Err(e)
            }
        }
    }

    async fn execute(&mut self, classical_budget: usize, quantum_budget: usize) -> QaResult<SearchReport> {
        self.run_phase(SearchPhase::Classical, classical_budget).await?;

        if self.quantum.is_some() && quantum_budget > 0 {
            self.progress.advance(SearchState::QuantumRunning)?;
            self.run_phase(SearchPhase::Quantum, quantum_budget).await?;
        }

        self.check_cancelled()?;
        self.progress.advance(SearchState::Finalizing)?;
        self.finalize(classical_budget).await
    }

    async fn run_phase(&mut self, phase: SearchPhase, budget: usize) -> QaResult<()> {
        info!(job_id = %self.config.id, phase = ?phase, budget, "phase started");
        let mut remaining = budget;

        while remaining > 0 {
            self.check_cancelled()?;

            let proposer = match phase {
                SearchPhase::Classical => &mut self.classical,
                SearchPhase::Quantum => match self.quantum.as_mut() {
                    Some(proposer) => proposer,
                    None => break,
                },
            };
            let count = proposer.batch_size(remaining);
            if count == 0 {
                break;
            }

            let ctx = ProposalContext {
                space: &self.space,
                objective: self.config.objective,
                incumbent_score: self.incumbent.as_ref().map(|i| i.score),
                history: &self.history,
            };
            let proposal = proposer.propose(&ctx, count).await;
            remaining -= count;

            let candidates = match proposal {
                Ok(candidates) => candidates,
                Err(e) => {
                    warn!(
                        job_id = %self.config.id,
                        phase = ?phase,
                        error = %e,
                        "proposer unavailable, ending phase"
                    );
                    break;
                }
            };

            for candidate in candidates {
                self.check_cancelled()?;
                if let Err(e) = self.space.check_config(&candidate) {
                    self.progress.candidates_skipped += 1;
                    warn!(phase = ?phase, model = %candidate.model, "skipping invalid candidate: {}", e);
                    continue;
                }
                self.run_trial(phase, candidate).await?;
            }
        }

        info!(
            job_id = %self.config.id,
            phase = ?phase,
            trials = self.history.iter().filter(|r| r.phase == phase).count(),
            "phase finished"
        );
        Ok(())
    }

    async fn run_trial(&mut self, phase: SearchPhase, config: Configuration) -> QaResult<()> {
        let iteration = self.history.len() + 1;
        debug!(iteration, model = %config.model, features = config.selected_count(), "evaluating candidate");

        let outcome = self.evaluate(&config).await;
        if self.cancel.is_cancelled() {
            info!(iteration, "search cancelled during evaluation, discarding trial");
            return Err(self.cancelled().into());
        }

        let record = match outcome {
            Ok(evaluation) => {
                let score = self.config.objective.orient(evaluation.score);
                let record = TrialRecord::completed(iteration, phase, config, score, evaluation.score);
                self.consider_incumbent(&record, evaluation);
                record
            }
            Err(e) => {
                warn!(iteration, phase = ?phase, model = %config.model, error = %e, "trial failed");
                TrialRecord::failed(iteration, phase, config, e.to_string())
            }
        };

        self.progress.record(&record);
        self.history.push(record);
        Ok(())
    }

    async fn evaluate(&self, config: &Configuration) -> Result<Evaluation<E::Model>, TrainingError> {
        let evaluation = match self.config.evaluation_timeout_secs {
            Some(secs) => tokio::time::timeout(Duration::from_secs(secs), self.evaluator.evaluate(config))
                .await
                .map_err(|_| TrainingError::Timeout { timeout_seconds: secs })??,
            None => self.evaluator.evaluate(config).await?,
        };

        if !evaluation.score.is_finite() {
            return Err(TrainingError::NonFiniteScore {
                score: evaluation.score,
            });
        }
        Ok(evaluation)
    }

    fn consider_incumbent(&mut self, record: &TrialRecord, evaluation: Evaluation<E::Model>) {
        let improved = self
            .incumbent
            .as_ref()
            .map(|current| current.is_improved_by(record.score))
            .unwrap_or(true);
        if !improved {
            return;
        }

        info!(
            iteration = record.iteration,
            model = %record.config.model,
            score = evaluation.score,
            "new incumbent"
        );
        self.progress.best_score = Some(evaluation.score);
        self.incumbent = Some(Incumbent {
            score: record.score,
            raw_score: evaluation.score,
            config: record.config.clone(),
            metrics: evaluation.metrics,
            model: evaluation.model,
            iteration: record.iteration,
        });
    }

    async fn finalize(&mut self, classical_budget: usize) -> QaResult<SearchReport> {
        let Some(incumbent) = self.incumbent.as_ref() else {
            return Err(SearchError::Exhausted {
                budget: self.config.search_budget,
                trials: self.history.len(),
            }
            .into());
        };

        let test_score = match self
            .evaluator
            .score_holdout(&incumbent.config, &incumbent.model)
            .await
        {
            Ok(score) if score.is_finite() => Some(score),
            Ok(score) => {
                warn!(score, "held-out score is not finite");
                None
            }
            Err(e) => {
                warn!(error = %e, "held-out scoring failed");
                None
            }
        };

        self.progress.advance(SearchState::Complete)?;
        info!(
            job_id = %self.config.id,
            best_iteration = incumbent.iteration,
            best_score = incumbent.raw_score,
            test_score = ?test_score,
            trials = self.history.len(),
            "search complete"
        );

        Ok(SearchReport::build(
            &self.config,
            &self.space,
            &self.progress,
            incumbent,
            &self.history,
            test_score,
            classical_budget,
        ))
    }

    fn check_cancelled(&self) -> Result<(), SearchError> {
        if self.cancel.is_cancelled() {
            return Err(self.cancelled());
        }
        Ok(())
    }

    fn cancelled(&self) -> SearchError {
        SearchError::Cancelled {
            trials_completed: self.history.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ModelRegistry, ModelSpec};
    use crate::sampler::{SampledCandidate, SamplerRequest, SamplerResponse};
    use crate::trial::ObjectiveDirection;
    use async_trait::async_trait;
    use qa_types::{Hyperparameters, ModelMetrics, QaError, SamplerError, TaskKind};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Scores by number of selected features, or from a fixed script.
    #[derive(Default)]
    struct StubEvaluator {
        scripted: Mutex<VecDeque<Result<f64, TrainingError>>>,
        holdout: Option<f64>,
        cancel_on_call: Option<(usize, CancellationFlag)>,
        calls: Mutex<usize>,
    }

    impl StubEvaluator {
        fn new() -> Self {
            Self {
                holdout: Some(0.5),
                ..Default::default()
            }
        }

        fn scripted(scores: Vec<Result<f64, TrainingError>>) -> Self {
            Self {
                scripted: Mutex::new(scores.into()),
                ..Self::new()
            }
        }
    }

    #[async_trait]
    impl Evaluator for StubEvaluator {
        type Model = String;

        async fn evaluate(&self, config: &Configuration) -> Result<Evaluation<String>, TrainingError> {
            let call = {
                let mut calls = self.calls.lock().unwrap();
                *calls += 1;
                *calls
            };
            if let Some((at, flag)) = &self.cancel_on_call {
                if *at == call {
                    flag.cancel();
                }
            }

            let score = self
                .scripted
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(config.selected_count() as f64 / 10.0))?;
            Ok(Evaluation {
                score,
                model: format!("{}#{call}", config.model),
                metrics: ModelMetrics::new(1.0, score),
            })
        }

        async fn score_holdout(&self, _config: &Configuration, _model: &String) -> Result<f64, TrainingError> {
            self.holdout.ok_or(TrainingError::ScoringFailed {
                message: "no held-out split".into(),
            })
        }
    }

    struct StubSampler {
        result: Result<SamplerResponse, SamplerError>,
        requests: Arc<Mutex<Vec<SamplerRequest>>>,
    }

    impl StubSampler {
        fn new(result: Result<SamplerResponse, SamplerError>) -> Self {
            Self {
                result,
                requests: Arc::default(),
            }
        }
    }

    #[async_trait]
    impl SamplerClient for StubSampler {
        async fn generate(&self, request: &SamplerRequest) -> Result<SamplerResponse, SamplerError> {
            self.requests.lock().unwrap().push(request.clone());
            self.result.clone()
        }
    }

    fn tiny_space() -> SearchSpace {
        let mut registry = ModelRegistry::new();
        registry
            .register(ModelSpec::new("tiny").with_values("depth", vec![1.into(), 2.into(), 3.into()]))
            .unwrap();
        SearchSpace::new(
            vec!["a".into(), "b".into(), "c".into(), "d".into()],
            TaskKind::Classification,
            Some(2),
            &registry,
        )
        .unwrap()
    }

    fn config(budget: usize) -> SearchConfig {
        SearchConfig::new("accuracy", ObjectiveDirection::Maximize, budget).with_seed(42)
    }

    fn candidate(mask: [bool; 4]) -> SampledCandidate {
        SampledCandidate {
            feature_mask: mask.to_vec(),
            model: "tiny".into(),
            hyperparameters: Hyperparameters::new(),
        }
    }

    #[tokio::test]
    async fn classical_search_end_to_end() {
        let mut orchestrator = Orchestrator::new(config(5), tiny_space(), StubEvaluator::new()).unwrap();
        let report = orchestrator.run().await.unwrap();

        let history = orchestrator.history();
        assert_eq!(history.len(), 5);
        for (i, record) in history.iter().enumerate() {
            assert_eq!(record.iteration, i + 1);
            assert_eq!(record.phase, SearchPhase::Classical);
            assert!((1..=2).contains(&record.config.selected_count()));
            assert_eq!(record.config.model, "tiny");
        }

        assert_eq!(orchestrator.state(), SearchState::Complete);
        assert_eq!(report.training_history.len(), 5);
        assert_eq!(report.best_model.name, "tiny");
        assert_eq!(report.metrics.test_score, Some(0.5));
        assert_eq!(report.summary.classical_budget, 5);
        assert_eq!(report.summary.quantum_trials, 0);

        let best = history.iter().map(|r| r.score).fold(f64::NEG_INFINITY, f64::max);
        assert_eq!(orchestrator.incumbent().unwrap().score, best);
    }

    #[tokio::test]
    async fn zero_budget_is_exhausted() {
        let mut orchestrator = Orchestrator::new(config(0), tiny_space(), StubEvaluator::new()).unwrap();
        let err = orchestrator.run().await.unwrap_err();
        assert!(matches!(err, QaError::Search(SearchError::Exhausted { trials: 0, .. })));
        assert_eq!(orchestrator.state(), SearchState::Failed);
        assert!(orchestrator.history().is_empty());
    }

    #[tokio::test]
    async fn minimize_keeps_the_lowest_raw_score() {
        let config = SearchConfig::new("rmse", ObjectiveDirection::Minimize, 2).with_seed(1);
        let evaluator = StubEvaluator::scripted(vec![Ok(0.8), Ok(0.6)]);
        let mut orchestrator = Orchestrator::new(config, tiny_space(), evaluator).unwrap();
        let report = orchestrator.run().await.unwrap();

        let incumbent = orchestrator.incumbent().unwrap();
        assert_eq!(incumbent.raw_score, 0.6);
        assert_eq!(incumbent.iteration, 2);
        assert_eq!(incumbent.model, "tiny#2");
        assert_eq!(report.summary.best_iteration, 2);
        assert_eq!(report.metrics.validation_score, 0.6);
    }

    #[tokio::test]
    async fn failed_trials_are_recorded_and_search_continues() {
        let evaluator = StubEvaluator::scripted(vec![
            Err(TrainingError::Failed {
                message: "singular matrix".into(),
            }),
            Ok(f64::NAN),
            Ok(0.7),
        ]);
        let mut orchestrator = Orchestrator::new(config(3), tiny_space(), evaluator).unwrap();
        let report = orchestrator.run().await.unwrap();

        let history = orchestrator.history();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].score, f64::NEG_INFINITY);
        assert_eq!(history[1].score, f64::NEG_INFINITY);
        assert!(history[1].error.as_deref().unwrap_or_default().contains("NaN"));
        assert_eq!(orchestrator.incumbent().unwrap().iteration, 3);
        assert_eq!(report.summary.trials_failed, 2);
        assert!(report.training_history[0].score.is_none());
    }

    #[tokio::test]
    async fn all_failures_exhaust_the_search() {
        let failures = (0..3)
            .map(|_| {
                Err(TrainingError::Failed {
                    message: "boom".into(),
                })
            })
            .collect();
        let mut orchestrator =
            Orchestrator::new(config(3), tiny_space(), StubEvaluator::scripted(failures)).unwrap();
        let err = orchestrator.run().await.unwrap_err();
        assert!(matches!(err, QaError::Search(SearchError::Exhausted { budget: 3, trials: 3 })));
        assert_eq!(orchestrator.history().len(), 3);
    }

    #[tokio::test]
    async fn evaluation_timeout_counts_as_failure() {
        struct Slow;

        #[async_trait]
        impl Evaluator for Slow {
            type Model = ();

            async fn evaluate(&self, _config: &Configuration) -> Result<Evaluation<()>, TrainingError> {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(Evaluation {
                    score: 1.0,
                    model: (),
                    metrics: ModelMetrics::default(),
                })
            }

            async fn score_holdout(&self, _config: &Configuration, _model: &()) -> Result<f64, TrainingError> {
                Ok(1.0)
            }
        }

        let mut orchestrator =
            Orchestrator::new(config(1).with_evaluation_timeout(1), tiny_space(), Slow).unwrap();
        let err = orchestrator.run().await.unwrap_err();
        assert!(matches!(err, QaError::Search(SearchError::Exhausted { .. })));
        assert!(orchestrator.history()[0]
            .error
            .as_deref()
            .unwrap_or_default()
            .contains("Evaluation timeout"));
    }

    #[tokio::test]
    async fn holdout_failure_yields_null_test_score() {
        let evaluator = StubEvaluator {
            holdout: None,
            ..StubEvaluator::new()
        };
        let mut orchestrator = Orchestrator::new(config(2), tiny_space(), evaluator).unwrap();
        let report = orchestrator.run().await.unwrap();
        assert!(report.metrics.test_score.is_none());
        assert_eq!(orchestrator.state(), SearchState::Complete);
    }

    #[tokio::test]
    async fn quantum_phase_uses_remaining_budget() {
        let config = config(10).with_sampler(SamplerConfig::new("http://sampler.invalid"));
        let sampler = StubSampler::new(Ok(SamplerResponse {
            candidates: vec![
                candidate([true, false, false, false]),
                // Too many features: skipped without a record.
                candidate([true, true, true, false]),
                candidate([false, true, true, false]),
            ],
            samples: vec![vec![0, 0, 0, 1]],
        }));
        let requests = sampler.requests.clone();

        let mut orchestrator = Orchestrator::new(config, tiny_space(), StubEvaluator::new())
            .unwrap()
            .with_sampler_client(sampler);
        assert_eq!(orchestrator.budget_split(), (7, 3));
        let report = orchestrator.run().await.unwrap();

        // One request of 3 charged to the budget; the invalid candidate is
        // skipped and the decoded sample falls past the requested count.
        assert_eq!(requests.lock().unwrap().len(), 1);
        assert_eq!(requests.lock().unwrap()[0].num_candidates, 3);
        let quantum: Vec<_> = orchestrator
            .history()
            .iter()
            .filter(|r| r.phase == SearchPhase::Quantum)
            .collect();
        assert_eq!(quantum.len(), 2);
        assert_eq!(orchestrator.history().len(), 9);
        assert_eq!(report.summary.quantum_trials, 2);
        assert_eq!(report.summary.candidates_skipped, 1);
        assert_eq!(orchestrator.state(), SearchState::Complete);
    }

    #[tokio::test]
    async fn sampler_receives_the_raw_incumbent_metric() {
        let config = SearchConfig::new("rmse", ObjectiveDirection::Minimize, 10)
            .with_seed(3)
            .with_sampler(SamplerConfig::new("http://sampler.invalid"));
        let mut scores: Vec<Result<f64, TrainingError>> = vec![Ok(0.8)];
        scores.extend((0..6).map(|_| Ok(0.9)));
        let sampler = StubSampler::new(Ok(SamplerResponse::default()));
        let requests = sampler.requests.clone();

        let mut orchestrator =
            Orchestrator::new(config, tiny_space(), StubEvaluator::scripted(scores))
                .unwrap()
                .with_sampler_client(sampler);
        orchestrator.run().await.unwrap();

        assert_eq!(orchestrator.incumbent().unwrap().raw_score, 0.8);
        let requests = requests.lock().unwrap();
        assert!(!requests.is_empty());
        assert_eq!(requests[0].current_best_score, Some(0.8));
    }

    #[tokio::test]
    async fn job_max_features_bounds_every_trial() {
        let config = SearchConfig::from_json(
            r#"{"metric": "accuracy", "objective": "maximize", "search_budget": 20,
                "max_features": 1, "seed": 5}"#,
        )
        .unwrap();
        let names: Vec<String> = (0..6).map(|i| format!("f{i}")).collect();
        let space = config
            .build_space(names, TaskKind::Classification, &ModelRegistry::with_builtins())
            .unwrap();
        assert_eq!(space.max_features(), 1);

        let mut orchestrator = Orchestrator::new(config, space, StubEvaluator::new()).unwrap();
        orchestrator.run().await.unwrap();

        assert_eq!(orchestrator.history().len(), 20);
        assert!(orchestrator.history().iter().all(|r| r.config.selected_count() == 1));
    }

    #[tokio::test]
    async fn space_must_match_job_max_features() {
        let narrow = config(5).with_max_features(1);
        let names: Vec<String> = (0..6).map(|i| format!("f{i}")).collect();
        let wide = SearchSpace::new(
            names.clone(),
            TaskKind::Classification,
            None,
            &ModelRegistry::with_builtins(),
        )
        .unwrap();

        let err = Orchestrator::new(narrow, wide, StubEvaluator::new())
            .err()
            .unwrap();
        assert!(err.is_setup_error());

        // Over-large caps clamp identically on both sides.
        let clamped = config(5).with_max_features(10);
        let space = clamped
            .build_space(names, TaskKind::Classification, &ModelRegistry::with_builtins())
            .unwrap();
        assert!(Orchestrator::new(clamped, space, StubEvaluator::new()).is_ok());
    }

    #[tokio::test]
    async fn sampler_failure_ends_only_the_quantum_phase() {
        let config = config(10).with_sampler(SamplerConfig::new("http://sampler.invalid"));
        let sampler = StubSampler::new(Err(SamplerError::BadStatus { status: 503 }));
        let requests = sampler.requests.clone();

        let mut orchestrator = Orchestrator::new(config, tiny_space(), StubEvaluator::new())
            .unwrap()
            .with_sampler_client(sampler);
        let report = orchestrator.run().await.unwrap();

        assert_eq!(requests.lock().unwrap().len(), 1);
        assert_eq!(orchestrator.history().len(), 7);
        assert_eq!(report.summary.quantum_trials, 0);
        assert_eq!(orchestrator.state(), SearchState::Complete);
    }

    #[tokio::test]
    async fn cancellation_before_run() {
        let mut orchestrator = Orchestrator::new(config(5), tiny_space(), StubEvaluator::new()).unwrap();
        orchestrator.cancellation_flag().cancel();

        let err = orchestrator.run().await.unwrap_err();
        assert!(matches!(
            err,
            QaError::Search(SearchError::Cancelled { trials_completed: 0 })
        ));
        assert!(orchestrator.history().is_empty());
        assert_eq!(orchestrator.state(), SearchState::Failed);
    }

    #[tokio::test]
    async fn cancellation_during_evaluation_discards_the_trial() {
        let flag = CancellationFlag::new();
        let evaluator = StubEvaluator {
            cancel_on_call: Some((3, flag.clone())),
            ..StubEvaluator::new()
        };
        let mut orchestrator = Orchestrator::new(config(5), tiny_space(), evaluator).unwrap();
        orchestrator.cancel = flag;

        let err = orchestrator.run().await.unwrap_err();
        assert!(matches!(
            err,
            QaError::Search(SearchError::Cancelled { trials_completed: 2 })
        ));
        assert_eq!(orchestrator.history().len(), 2);
        assert!(orchestrator.incumbent().is_some());
    }

    #[tokio::test]
    async fn run_twice_is_rejected() {
        let mut orchestrator = Orchestrator::new(config(1), tiny_space(), StubEvaluator::new()).unwrap();
        orchestrator.run().await.unwrap();
        let err = orchestrator.run().await.unwrap_err();
        assert!(matches!(err, QaError::Search(SearchError::IllegalTransition { .. })));
        assert_eq!(orchestrator.history().len(), 1);
    }

    #[tokio::test]
    async fn invalid_config_is_a_setup_error() {
        let config = SearchConfig {
            exploration_weight: 2.0,
            ..config(5)
        };
        let err = Orchestrator::new(config, tiny_space(), StubEvaluator::new())
            .err()
            .unwrap();
        assert!(err.is_setup_error());
    }
}
