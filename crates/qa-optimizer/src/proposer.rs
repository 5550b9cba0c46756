//! Candidate proposal strategies.
//!
//! The orchestrator drives each phase through a [`CandidateProposer`]: the
//! classical phase uses the [`SequentialProposer`], the quantum phase a remote
//! sampler (see [`crate::RemoteSamplerProposer`]).

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rand::{Rng, SeedableRng};

use qa_types::{Configuration, HyperparameterValue, Hyperparameters, SamplerError};

use crate::space::{HyperparameterDomain, ModelDomain, SearchSpace};
use crate::trial::{ObjectiveDirection, TrialRecord};

/// What a proposer may look at when producing candidates.
#[derive(Debug, Clone, Copy)]
pub struct ProposalContext<'a> {
    pub space: &'a SearchSpace,
    pub objective: ObjectiveDirection,
    /// Internal (maximize-oriented) score of the incumbent, if any.
    pub incumbent_score: Option<f64>,
    pub history: &'a [TrialRecord],
}

impl<'a> ProposalContext<'a> {
    /// The incumbent's score as the metric reports it.
    pub fn incumbent_raw_score(&self) -> Option<f64> {
        self.incumbent_score.map(|s| self.objective.raw(s))
    }

    /// Best-scoring completed record; the earliest one wins ties.
    pub fn best_record(&self) -> Option<&'a TrialRecord> {
        self.history
            .iter()
            .filter(|r| r.is_completed())
            .fold(None, |best: Option<&TrialRecord>, r| match best {
                Some(b) if b.score >= r.score => Some(b),
                _ => Some(r),
            })
    }
}

/// Common trait for all proposal strategies.
#[async_trait]
pub trait CandidateProposer: Send {
    /// Human-readable strategy name.
    fn name(&self) -> &str;

    /// How many candidates one call should ask for, given the remaining
    /// budget of the phase. Each call is charged this many trials.
    fn batch_size(&self, remaining: usize) -> usize;

    /// Produce up to `count` candidates. Candidates are not guaranteed to be
    /// valid for the space.
    async fn propose(
        &mut self,
        ctx: &ProposalContext<'_>,
        count: usize,
    ) -> Result<Vec<Configuration>, SamplerError>;
}

/// Fraction of a numeric range used as perturbation width.
const PERTURBATION_SCALE: f64 = 0.1;
/// Probability of resampling a categorical value while exploiting.
const CATEGORICAL_RESAMPLE_PROB: f64 = 0.3;
/// Probability of swapping one selected feature for an unselected one.
const FEATURE_SWAP_PROB: f64 = 0.5;

/// Explore/exploit proposer for the classical phase.
///
/// With an empty history, or with probability `exploration_weight`, draws a
/// uniformly random configuration. Otherwise perturbs the best completed
/// trial: same model, nudged hyperparameters, then a nudged feature subset.
#[derive(Debug, Clone)]
pub struct SequentialProposer {
    exploration_weight: f64,
    rng: StdRng,
}

impl SequentialProposer {
    pub fn new(exploration_weight: f64, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            exploration_weight: exploration_weight.clamp(0.0, 1.0),
            rng,
        }
    }

    fn propose_one(&mut self, ctx: &ProposalContext<'_>) -> Configuration {
        let best = ctx.best_record();
        let explore = self.rng.random_bool(self.exploration_weight);
        match best {
            Some(record) if !explore => self.exploit(ctx.space, &record.config),
            _ => ctx.space.sample_random_config(&mut self.rng),
        }
    }

    fn exploit(&mut self, space: &SearchSpace, base: &Configuration) -> Configuration {
        let Some(domain) = space.model_domain(&base.model) else {
            return space.sample_random_config(&mut self.rng);
        };

        let hyperparameters = self.perturb_hyperparameters(domain, &base.hyperparameters);
        let feature_mask = self.perturb_features(space, &base.feature_mask);
        Configuration {
            model: base.model.clone(),
            hyperparameters,
            feature_mask,
        }
    }

    fn perturb_hyperparameters(&mut self, domain: &ModelDomain, base: &Hyperparameters) -> Hyperparameters {
        let rng = &mut self.rng;
        let mut perturbed = Hyperparameters::new();

        for param in &domain.parameters {
            let value = match (&param.domain, base.get(&param.name)) {
                (HyperparameterDomain::FloatRange { low, high }, Some(v)) if v.as_f64().is_some() => {
                    let v = v.as_f64().unwrap_or(*low);
                    let width = (high - low) * PERTURBATION_SCALE;
                    let noise = if width.is_finite() && width > 0.0 {
                        rng.random_range(-width..=width)
                    } else {
                        0.0
                    };
                    HyperparameterValue::Float((v + noise).clamp(*low, *high))
                }
                (HyperparameterDomain::IntRange { low, high }, Some(v)) if v.as_i64().is_some() => {
                    let v = v.as_i64().unwrap_or(*low);
                    let width = high.abs_diff(*low) as f64 * PERTURBATION_SCALE;
                    let steps = (width.round() as i64).max(1);
                    let delta = rng.random_range(-steps..=steps);
                    HyperparameterValue::Int(v.saturating_add(delta).clamp(*low, *high))
                }
                (HyperparameterDomain::Categorical { .. }, Some(v))
                    if !rng.random_bool(CATEGORICAL_RESAMPLE_PROB) =>
                {
                    v.clone()
                }
                // Missing, mistyped or resampled.
                (other, _) => other.sample(rng),
            };
            perturbed.insert(param.name.clone(), value);
        }

        perturbed
    }

    fn perturb_features(&mut self, space: &SearchSpace, base: &[bool]) -> Vec<bool> {
        let rng = &mut self.rng;
        let mut mask: Vec<bool> = (0..space.num_features())
            .map(|i| base.get(i).copied().unwrap_or(false))
            .collect();

        let selected: Vec<usize> = (0..mask.len()).filter(|&i| mask[i]).collect();
        let current = selected.len();
        let low = current.saturating_sub(1).max(1);
        let high = (current + 1).min(space.max_features());
        if current == 0 || low > high {
            let k = rng.random_range(1..=space.max_features());
            return space.sample_feature_mask(k, rng);
        }

        let target = rng.random_range(low..=high);
        if target > current {
            let unselected: Vec<usize> = (0..mask.len()).filter(|&i| !mask[i]).collect();
            if let Some(&idx) = unselected.choose(rng) {
                mask[idx] = true;
            }
        } else if target < current {
            if let Some(&idx) = selected.choose(rng) {
                mask[idx] = false;
            }
        }

        if rng.random_bool(FEATURE_SWAP_PROB) {
            let on: Vec<usize> = (0..mask.len()).filter(|&i| mask[i]).collect();
            let off: Vec<usize> = (0..mask.len()).filter(|&i| !mask[i]).collect();
            if let (Some(&a), Some(&b)) = (on.choose(rng), off.choose(rng)) {
                mask[a] = false;
                mask[b] = true;
            }
        }

        mask
    }
}

#[async_trait]
impl CandidateProposer for SequentialProposer {
    fn name(&self) -> &str {
        "sequential"
    }

    fn batch_size(&self, remaining: usize) -> usize {
        remaining.min(1)
    }

    async fn propose(
        &mut self,
        ctx: &ProposalContext<'_>,
        count: usize,
    ) -> Result<Vec<Configuration>, SamplerError> {
        Ok((0..count).map(|_| self.propose_one(ctx)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ModelRegistry, ModelSpec};
    use crate::trial::SearchPhase;
    use qa_types::TaskKind;

    fn space() -> SearchSpace {
        let mut registry = ModelRegistry::new();
        registry
            .register(
                ModelSpec::new("tree")
                    .with_int_range("depth", 1, 30)
                    .with_float_range("learning_rate", 0.0, 1.0)
                    .with_values("criterion", vec!["gini".into(), "entropy".into()]),
            )
            .unwrap();
        let names = (0..8).map(|i| format!("f{i}")).collect();
        SearchSpace::new(names, TaskKind::Classification, Some(4), &registry).unwrap()
    }

    fn record(iteration: usize, score: f64, config: Configuration) -> TrialRecord {
        TrialRecord::completed(iteration, SearchPhase::Classical, config, score, score)
    }

    #[tokio::test]
    async fn first_proposal_is_random_and_valid() {
        let space = space();
        let mut proposer = SequentialProposer::new(0.0, Some(7));
        let ctx = ProposalContext {
            space: &space,
            objective: ObjectiveDirection::Maximize,
            incumbent_score: None,
            history: &[],
        };

        let batch = proposer.propose(&ctx, proposer.batch_size(10)).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert!(space.validate_config(&batch[0]));
    }

    #[tokio::test]
    async fn exploitation_stays_near_the_best_trial() {
        let space = space();
        let best = Configuration::new("tree", vec![true, true, false, false, false, false, false, false])
            .with_hyperparameter("depth", HyperparameterValue::Int(15))
            .with_hyperparameter("learning_rate", HyperparameterValue::Float(0.5))
            .with_hyperparameter("criterion", HyperparameterValue::Json("gini".into()));
        let worse = space.sample_random_config(&mut StdRng::seed_from_u64(1));
        let history = vec![record(1, 0.4, worse), record(2, 0.9, best)];
        let ctx = ProposalContext {
            space: &space,
            objective: ObjectiveDirection::Maximize,
            incumbent_score: Some(0.9),
            history: &history,
        };

        let mut proposer = SequentialProposer::new(0.0, Some(11));
        for _ in 0..200 {
            let candidate = proposer.propose(&ctx, 1).await.unwrap().remove(0);
            assert_eq!(candidate.model, "tree");
            assert!(space.validate_config(&candidate));

            let depth = candidate.hyperparameters["depth"].as_i64().unwrap();
            assert!((12..=18).contains(&depth), "depth {depth}");
            let lr = candidate.hyperparameters["learning_rate"].as_f64().unwrap();
            assert!((0.4..=0.6).contains(&lr), "learning_rate {lr}");
            assert!((1..=3).contains(&candidate.selected_count()));
        }
    }

    #[tokio::test]
    async fn exploitation_fills_missing_parameters() {
        let space = space();
        let bare = Configuration::new("tree", vec![true, false, false, false, false, false, false, false]);
        let history = vec![record(1, 0.5, bare)];
        let ctx = ProposalContext {
            space: &space,
            objective: ObjectiveDirection::Maximize,
            incumbent_score: Some(0.5),
            history: &history,
        };

        let mut proposer = SequentialProposer::new(0.0, Some(5));
        let candidate = proposer.propose(&ctx, 1).await.unwrap().remove(0);
        let domain = space.model_domain("tree").unwrap();
        for param in &domain.parameters {
            let value = &candidate.hyperparameters[&param.name];
            assert!(param.domain.contains(value), "{} = {value}", param.name);
        }
    }

    #[tokio::test]
    async fn failed_trials_are_never_exploited() {
        let space = space();
        let failed = TrialRecord::failed(
            1,
            SearchPhase::Classical,
            Configuration::new("tree", vec![true; 8]),
            "boom".into(),
        );
        let history = vec![failed];
        let ctx = ProposalContext {
            space: &space,
            objective: ObjectiveDirection::Maximize,
            incumbent_score: None,
            history: &history,
        };
        assert!(ctx.best_record().is_none());

        let mut proposer = SequentialProposer::new(0.0, Some(3));
        let candidate = proposer.propose(&ctx, 1).await.unwrap().remove(0);
        assert!(space.validate_config(&candidate));
    }

    #[tokio::test]
    async fn exploitation_handles_full_width_int_ranges() {
        let mut registry = ModelRegistry::new();
        registry
            .register(ModelSpec::new("wide").with_int_range("seed", i64::MIN, i64::MAX))
            .unwrap();
        let names = (0..3).map(|i| format!("f{i}")).collect();
        let space = SearchSpace::new(names, TaskKind::Classification, None, &registry).unwrap();

        let mut proposer = SequentialProposer::new(0.0, Some(21));
        for edge in [i64::MAX, i64::MIN, 0] {
            let base = Configuration::new("wide", vec![true, false, false])
                .with_hyperparameter("seed", HyperparameterValue::Int(edge));
            let history = vec![record(1, 0.5, base)];
            let ctx = ProposalContext {
                space: &space,
                objective: ObjectiveDirection::Maximize,
                incumbent_score: Some(0.5),
                history: &history,
            };

            for _ in 0..50 {
                let candidate = proposer.propose(&ctx, 1).await.unwrap().remove(0);
                assert!(candidate.hyperparameters["seed"].as_i64().is_some());
                assert!(space.validate_config(&candidate));
            }
        }
    }

    #[test]
    fn incumbent_raw_score_follows_objective() {
        let space = space();
        let ctx = ProposalContext {
            space: &space,
            objective: ObjectiveDirection::Minimize,
            incumbent_score: Some(-0.8),
            history: &[],
        };
        assert_eq!(ctx.incumbent_raw_score(), Some(0.8));

        let ctx = ProposalContext {
            objective: ObjectiveDirection::Maximize,
            incumbent_score: Some(0.8),
            ..ctx
        };
        assert_eq!(ctx.incumbent_raw_score(), Some(0.8));
    }

    #[test]
    fn best_record_prefers_earliest_tie() {
        let space = space();
        let a = Configuration::new("tree", vec![true, false, false, false, false, false, false, false]);
        let b = Configuration::new("tree", vec![false, true, false, false, false, false, false, false]);
        let history = vec![record(1, 0.7, a.clone()), record(2, 0.7, b)];
        let ctx = ProposalContext {
            space: &space,
            objective: ObjectiveDirection::Maximize,
            incumbent_score: Some(0.7),
            history: &history,
        };
        assert_eq!(ctx.best_record().unwrap().iteration, 1);
    }
}
