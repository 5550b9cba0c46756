//! Search space definitions: feature columns, per-model hyperparameter
//! domains and the feature-count cap.

use rand::seq::{index, IndexedRandom};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::warn;

use qa_types::{
    config_error, validation_error, Configuration, HyperparameterValue, Hyperparameters,
    QaResult, TaskKind,
};

use crate::registry::{ModelRegistry, ParameterSpec};

/// Describes how a hyperparameter is sampled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HyperparameterDomain {
    /// Finite set of choices.
    Categorical { values: Vec<serde_json::Value> },
    /// Integer range [low, high] inclusive.
    IntRange { low: i64, high: i64 },
    /// Continuous uniform range [low, high].
    FloatRange { low: f64, high: f64 },
}

impl HyperparameterDomain {
    /// Classify a declaration once, so sampling never has to inspect value
    /// types again. A value list becomes a range only when every value is
    /// numeric; any string, bool or null keeps it categorical.
    pub fn from_spec(spec: &ParameterSpec) -> Self {
        match spec {
            ParameterSpec::IntRange { low, high } => Self::IntRange {
                low: *low,
                high: *high,
            },
            ParameterSpec::FloatRange { low, high } => Self::FloatRange {
                low: *low,
                high: *high,
            },
            ParameterSpec::Values(values) => Self::from_values(values),
        }
    }

    fn from_values(values: &[serde_json::Value]) -> Self {
        let all_numeric = !values.is_empty() && values.iter().all(|v| v.is_number());
        if !all_numeric {
            return Self::Categorical {
                values: values.to_vec(),
            };
        }

        let ints: Option<Vec<i64>> = values.iter().map(|v| v.as_i64()).collect();
        if let Some(ints) = ints {
            let low = ints.iter().copied().min().unwrap_or_default();
            let high = ints.iter().copied().max().unwrap_or_default();
            return Self::IntRange { low, high };
        }

        let floats: Vec<f64> = values.iter().filter_map(|v| v.as_f64()).collect();
        let low = floats.iter().copied().fold(f64::INFINITY, f64::min);
        let high = floats.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Self::FloatRange { low, high }
    }

    /// Draw one value uniformly from the domain.
    pub fn sample<R: Rng>(&self, rng: &mut R) -> HyperparameterValue {
        match self {
            Self::IntRange { low, high } => HyperparameterValue::Int(rng.random_range(*low..=*high)),
            Self::FloatRange { low, high } => {
                if low < high {
                    HyperparameterValue::Float(rng.random_range(*low..=*high))
                } else {
                    HyperparameterValue::Float(*low)
                }
            }
            Self::Categorical { values } => values
                .choose(rng)
                .cloned()
                .map(HyperparameterValue::from)
                .unwrap_or(HyperparameterValue::Json(serde_json::Value::Null)),
        }
    }

    /// Whether `value` lies inside the domain.
    pub fn contains(&self, value: &HyperparameterValue) -> bool {
        match self {
            Self::IntRange { low, high } => value
                .as_i64()
                .map(|v| (*low..=*high).contains(&v))
                .unwrap_or(false),
            Self::FloatRange { low, high } => value
                .as_f64()
                .map(|v| v >= *low && v <= *high)
                .unwrap_or(false),
            Self::Categorical { values } => values.contains(&value.to_json()),
        }
    }
}

/// A single hyperparameter dimension of one model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDef {
    pub name: String,
    pub domain: HyperparameterDomain,
}

/// The hyperparameter domain of one registered model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDomain {
    pub name: String,
    pub parameters: Vec<ParameterDef>,
}

impl ModelDomain {
    /// Draw every hyperparameter independently.
    pub fn sample<R: Rng>(&self, rng: &mut R) -> Hyperparameters {
        self.parameters
            .iter()
            .map(|p| (p.name.clone(), p.domain.sample(rng)))
            .collect()
    }

    pub fn parameter(&self, name: &str) -> Option<&ParameterDef> {
        self.parameters.iter().find(|p| p.name == name)
    }
}

/// The configuration domain of one search job. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchSpace {
    feature_names: Vec<String>,
    task: TaskKind,
    max_features: usize,
    models: Vec<ModelDomain>,
}

impl SearchSpace {
    /// Derive the domain of every registered model for `task`.
    ///
    /// `max_features` defaults to the number of features and is clamped down
    /// to it when larger. `Some(0)` is rejected with a config error rather
    /// than accepted unchecked, so every space admits at least one feature.
    pub fn new(
        feature_names: Vec<String>,
        task: TaskKind,
        max_features: Option<usize>,
        registry: &ModelRegistry,
    ) -> QaResult<Self> {
        if feature_names.is_empty() {
            return Err(config_error!("feature_names must not be empty"));
        }

        let mut seen = HashSet::new();
        if let Some(dup) = feature_names.iter().find(|n| !seen.insert(n.as_str())) {
            return Err(config_error!("duplicate feature name: {dup}"));
        }

        if registry.is_empty() {
            return Err(config_error!("model registry has no models"));
        }

        let num_features = feature_names.len();
        let max_features = match max_features {
            None => num_features,
            Some(0) => return Err(config_error!("max_features must be at least 1")),
            Some(m) if m > num_features => {
                warn!(
                    requested = m,
                    num_features, "max_features exceeds feature count, clamping"
                );
                num_features
            }
            Some(m) => m,
        };

        let models = registry
            .iter()
            .map(|spec| ModelDomain {
                name: spec.name.clone(),
                parameters: spec
                    .parameters_for(task)
                    .iter()
                    .map(|decl| ParameterDef {
                        name: decl.name.clone(),
                        domain: HyperparameterDomain::from_spec(&decl.spec),
                    })
                    .collect(),
            })
            .collect();

        Ok(Self {
            feature_names,
            task,
            max_features,
            models,
        })
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn num_features(&self) -> usize {
        self.feature_names.len()
    }

    pub fn max_features(&self) -> usize {
        self.max_features
    }

    pub fn task(&self) -> TaskKind {
        self.task
    }

    pub fn is_classification(&self) -> bool {
        self.task.is_classification()
    }

    pub fn model_names(&self) -> Vec<String> {
        self.models.iter().map(|m| m.name.clone()).collect()
    }

    pub fn models(&self) -> &[ModelDomain] {
        &self.models
    }

    pub fn model_domain(&self, name: &str) -> Option<&ModelDomain> {
        self.models.iter().find(|m| m.name == name)
    }

    /// Map selected feature names onto a mask over `feature_names`.
    pub fn encode_feature_mask<S: AsRef<str>>(&self, selected: &[S]) -> QaResult<Vec<bool>> {
        let mut mask = vec![false; self.num_features()];
        for name in selected {
            let name = name.as_ref();
            let idx = self
                .feature_names
                .iter()
                .position(|f| f == name)
                .ok_or_else(|| validation_error!("unknown feature: {name}"))?;
            mask[idx] = true;
        }
        Ok(mask)
    }

    /// Selected feature names, in `feature_names` order.
    pub fn decode_feature_mask(&self, mask: &[bool]) -> Vec<String> {
        self.feature_names
            .iter()
            .zip(mask)
            .filter(|(_, selected)| **selected)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Draw a uniformly random subset of `k` features.
    pub fn sample_feature_mask<R: Rng>(&self, k: usize, rng: &mut R) -> Vec<bool> {
        let k = k.clamp(1, self.max_features);
        let mut mask = vec![false; self.num_features()];
        for idx in index::sample(rng, self.num_features(), k).into_iter() {
            mask[idx] = true;
        }
        mask
    }

    /// Model uniform over registered models, each hyperparameter uniform over
    /// its domain, then `k ~ U[1, max_features]` distinct features.
    pub fn sample_random_config<R: Rng>(&self, rng: &mut R) -> Configuration {
        let model = &self.models[rng.random_range(0..self.models.len())];
        let hyperparameters = model.sample(rng);
        let k = rng.random_range(1..=self.max_features);
        Configuration {
            model: model.name.clone(),
            hyperparameters,
            feature_mask: self.sample_feature_mask(k, rng),
        }
    }

    /// Structural check of a candidate: mask length, selected count in
    /// `[1, max_features]` and a known model. Hyperparameter values are not
    /// checked against their domains.
    pub fn validate_config(&self, candidate: &Configuration) -> bool {
        self.check_config(candidate).is_ok()
    }

    /// Same verdict as [`Self::validate_config`], with the reason on failure.
    pub fn check_config(&self, candidate: &Configuration) -> QaResult<()> {
        if candidate.feature_mask.len() != self.num_features() {
            return Err(validation_error!(
                "feature mask has {} entries, expected {}",
                candidate.feature_mask.len(),
                self.num_features()
            ));
        }

        let selected = candidate.selected_count();
        if selected == 0 || selected > self.max_features {
            return Err(validation_error!(
                "{selected} features selected, expected 1..={}",
                self.max_features
            ));
        }

        if self.model_domain(&candidate.model).is_none() {
            return Err(validation_error!("unknown model: {}", candidate.model));
        }

        Ok(())
    }
}
