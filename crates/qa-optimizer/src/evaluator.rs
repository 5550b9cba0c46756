//! Contract for the external component that fits and scores one
//! configuration.

use async_trait::async_trait;

use qa_types::{Configuration, ModelMetrics, TrainingError};

/// Outcome of fitting one configuration.
#[derive(Debug, Clone)]
pub struct Evaluation<M> {
    /// Raw metric value as the metric defines it (not direction-adjusted).
    pub score: f64,
    pub model: M,
    pub metrics: ModelMetrics,
}

/// Fits and scores configurations on the job's data splits.
///
/// Implementations own the training data and the metric. An empty
/// hyperparameter map must be treated as "use the model defaults". Errors
/// are contained by the orchestrator and never abort a search.
#[async_trait]
pub trait Evaluator: Send + Sync {
    /// Fitted model handle, opaque to the search.
    type Model: Send + Sync;

    /// Fit `config` on the training split and score it on the validation split.
    async fn evaluate(&self, config: &Configuration)
        -> Result<Evaluation<Self::Model>, TrainingError>;

    /// Score an already fitted model on the held-out split, restricted to the
    /// features selected by `config`, with the same metric.
    async fn score_holdout(
        &self,
        config: &Configuration,
        model: &Self::Model,
    ) -> Result<f64, TrainingError>;
}
