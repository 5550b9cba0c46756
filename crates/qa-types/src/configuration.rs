use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A concrete hyperparameter value.
///
/// Deserialization tries `Int` before `Float`, so `5` stays an integer and
/// `5.0` becomes a float; everything else (strings, booleans, null) is kept
/// as raw JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HyperparameterValue {
    Int(i64),
    Float(f64),
    Json(serde_json::Value),
}

impl HyperparameterValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            Self::Json(v) => v.as_f64(),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Float(_) => None,
            Self::Json(v) => v.as_i64(),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Int(v) => serde_json::Value::from(*v),
            Self::Float(v) => serde_json::Value::from(*v),
            Self::Json(v) => v.clone(),
        }
    }
}

impl From<serde_json::Value> for HyperparameterValue {
    fn from(value: serde_json::Value) -> Self {
        if let Some(i) = value.as_i64() {
            Self::Int(i)
        } else if value.is_f64() {
            value.as_f64().map(Self::Float).unwrap_or(Self::Json(value))
        } else {
            Self::Json(value)
        }
    }
}

impl std::fmt::Display for HyperparameterValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Json(v) => write!(f, "{v}"),
        }
    }
}

/// Hyperparameter name to value. An empty map means "use the model defaults".
pub type Hyperparameters = HashMap<String, HyperparameterValue>;

/// Whether the target is a class label or a continuous value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    Classification,
    Regression,
}

impl TaskKind {
    pub fn from_is_classification(is_classification: bool) -> Self {
        if is_classification {
            Self::Classification
        } else {
            Self::Regression
        }
    }

    pub fn is_classification(&self) -> bool {
        matches!(self, Self::Classification)
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Classification => write!(f, "classification"),
            Self::Regression => write!(f, "regression"),
        }
    }
}

/// One point in the search domain: model family, its hyperparameters and the
/// selected input columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    pub model: String,
    #[serde(default)]
    pub hyperparameters: Hyperparameters,
    pub feature_mask: Vec<bool>,
}

impl Configuration {
    pub fn new(model: impl Into<String>, feature_mask: Vec<bool>) -> Self {
        Self {
            model: model.into(),
            hyperparameters: Hyperparameters::new(),
            feature_mask,
        }
    }

    pub fn with_hyperparameter(
        mut self,
        name: impl Into<String>,
        value: HyperparameterValue,
    ) -> Self {
        self.hyperparameters.insert(name.into(), value);
        self
    }

    /// Number of selected features.
    pub fn selected_count(&self) -> usize {
        self.feature_mask.iter().filter(|selected| **selected).count()
    }

    /// Positions of the selected features, ascending.
    pub fn selected_indices(&self) -> Vec<usize> {
        self.feature_mask
            .iter()
            .enumerate()
            .filter_map(|(i, selected)| selected.then_some(i))
            .collect()
    }
}

/// Metrics reported by an evaluator for one fitted model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelMetrics {
    pub train_score: f64,
    pub validation_score: f64,
    #[serde(default)]
    pub feature_importance: HashMap<String, f64>,
    /// Any further metric the evaluator wants to surface.
    #[serde(default)]
    pub extra: HashMap<String, f64>,
}

impl ModelMetrics {
    pub fn new(train_score: f64, validation_score: f64) -> Self {
        Self {
            train_score,
            validation_score,
            feature_importance: HashMap::new(),
            extra: HashMap::new(),
        }
    }

    pub fn with_feature_importance(mut self, importance: HashMap<String, f64>) -> Self {
        self.feature_importance = importance;
        self
    }
}
