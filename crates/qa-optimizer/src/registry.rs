//! Job-scoped model registry: built-in model families plus runtime-registered
//! custom models, each with its declared hyperparameter domain.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use qa_types::{Hyperparameters, RegistryError, TaskKind, TrainingError};

/// Opaque fitted/unfitted model produced by a factory.
pub type ModelHandle = Box<dyn std::any::Any + Send + Sync>;

/// Builds a model instance from hyperparameters. The search core never calls
/// this; evaluators look it up to construct custom models.
pub type ModelFactory =
    Arc<dyn Fn(&Hyperparameters, TaskKind) -> Result<ModelHandle, TrainingError> + Send + Sync>;

/// Names of the model families every registry created with
/// [`ModelRegistry::with_builtins`] starts with.
pub const BUILTIN_MODELS: [&str; 4] = ["random_forest", "xgboost", "svm", "logistic_regression"];

/// How a hyperparameter's domain is declared by a registrant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterSpec {
    /// A finite list of candidate values; classified into a range when all of
    /// them are numeric.
    Values(Vec<serde_json::Value>),
    /// Explicit integer range [low, high] inclusive.
    IntRange { low: i64, high: i64 },
    /// Explicit continuous range [low, high].
    FloatRange { low: f64, high: f64 },
}

/// A named hyperparameter declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDecl {
    pub name: String,
    pub spec: ParameterSpec,
}

/// Registration record for one model family.
#[derive(Clone)]
pub struct ModelSpec {
    pub name: String,
    pub description: String,
    /// Domain used for classification tasks, and for regression when no
    /// separate regression domain is declared.
    pub parameters: Vec<ParameterDecl>,
    pub regression_parameters: Option<Vec<ParameterDecl>>,
    pub factory: Option<ModelFactory>,
    builtin: bool,
}

impl std::fmt::Debug for ModelSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelSpec")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("parameters", &self.parameters)
            .field("regression_parameters", &self.regression_parameters)
            .field("has_factory", &self.factory.is_some())
            .field("builtin", &self.builtin)
            .finish()
    }
}

impl ModelSpec {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            description: format!("Custom model: {name}"),
            name,
            parameters: Vec::new(),
            regression_parameters: None,
            factory: None,
            builtin: false,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_values(mut self, name: impl Into<String>, values: Vec<serde_json::Value>) -> Self {
        self.parameters.push(ParameterDecl {
            name: name.into(),
            spec: ParameterSpec::Values(values),
        });
        self
    }

    pub fn with_int_range(mut self, name: impl Into<String>, low: i64, high: i64) -> Self {
        self.parameters.push(ParameterDecl {
            name: name.into(),
            spec: ParameterSpec::IntRange { low, high },
        });
        self
    }

    pub fn with_float_range(mut self, name: impl Into<String>, low: f64, high: f64) -> Self {
        self.parameters.push(ParameterDecl {
            name: name.into(),
            spec: ParameterSpec::FloatRange { low, high },
        });
        self
    }

    /// Declare a regression-only parameter. The first call switches the model
    /// to a separate regression domain.
    pub fn with_regression_values(
        mut self,
        name: impl Into<String>,
        values: Vec<serde_json::Value>,
    ) -> Self {
        self.regression_parameters
            .get_or_insert_with(Vec::new)
            .push(ParameterDecl {
                name: name.into(),
                spec: ParameterSpec::Values(values),
            });
        self
    }

    pub fn with_factory(mut self, factory: ModelFactory) -> Self {
        self.factory = Some(factory);
        self
    }

    pub fn is_builtin(&self) -> bool {
        self.builtin
    }

    /// The parameter declarations that apply to `task`.
    pub fn parameters_for(&self, task: TaskKind) -> &[ParameterDecl] {
        match (task, &self.regression_parameters) {
            (TaskKind::Regression, Some(regression)) => regression,
            _ => &self.parameters,
        }
    }

    fn builtin(mut self) -> Self {
        self.builtin = true;
        self
    }

    fn validate(&self) -> Result<(), RegistryError> {
        if self.name.is_empty()
            || !self
                .name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(RegistryError::InvalidName {
                name: self.name.clone(),
            });
        }

        let domains = std::iter::once(&self.parameters).chain(self.regression_parameters.iter());
        for decls in domains {
            if decls.is_empty() {
                return Err(RegistryError::EmptyDomain {
                    name: self.name.clone(),
                });
            }
            for decl in decls {
                self.validate_decl(decl)?;
            }
        }
        Ok(())
    }

    fn validate_decl(&self, decl: &ParameterDecl) -> Result<(), RegistryError> {
        let invalid = |message: &str| RegistryError::InvalidParameter {
            name: self.name.clone(),
            parameter: decl.name.clone(),
            message: message.to_string(),
        };

        match &decl.spec {
            ParameterSpec::Values(values) if values.is_empty() => {
                Err(invalid("must have a non-empty list of values"))
            }
            ParameterSpec::IntRange { low, high } if low > high => {
                Err(invalid("range low is greater than high"))
            }
            ParameterSpec::FloatRange { low, high } if !low.is_finite() || !high.is_finite() => {
                Err(invalid("range bounds must be finite"))
            }
            ParameterSpec::FloatRange { low, high } if low > high => {
                Err(invalid("range low is greater than high"))
            }
            _ => Ok(()),
        }
    }
}

/// Capability table of every model a search job may propose.
///
/// Each job owns its own registry, so jobs registering different custom
/// models never see each other's entries.
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    models: Vec<ModelSpec>,
}

impl ModelRegistry {
    /// An empty registry (no built-in models).
    pub fn new() -> Self {
        Self { models: Vec::new() }
    }

    /// A registry pre-populated with the built-in model families.
    pub fn with_builtins() -> Self {
        Self {
            models: builtin_models(),
        }
    }

    /// Register a custom model. Names must be unique across built-in and
    /// custom entries.
    pub fn register(&mut self, spec: ModelSpec) -> Result<(), RegistryError> {
        spec.validate()?;
        if self.contains(&spec.name) {
            return Err(RegistryError::AlreadyRegistered { name: spec.name });
        }
        tracing::debug!(model = %spec.name, "registered custom model");
        self.models.push(spec);
        Ok(())
    }

    /// Remove a custom model. Built-in models cannot be removed.
    pub fn unregister(&mut self, name: &str) -> Result<ModelSpec, RegistryError> {
        let idx = self
            .models
            .iter()
            .position(|m| m.name == name)
            .ok_or_else(|| RegistryError::NotRegistered {
                name: name.to_string(),
            })?;
        if self.models[idx].builtin {
            return Err(RegistryError::Builtin {
                name: name.to_string(),
            });
        }
        Ok(self.models.remove(idx))
    }

    pub fn get(&self, name: &str) -> Option<&ModelSpec> {
        self.models.iter().find(|m| m.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// All model names in registration order (built-ins first).
    pub fn names(&self) -> Vec<String> {
        self.models.iter().map(|m| m.name.clone()).collect()
    }

    pub fn custom_names(&self) -> Vec<String> {
        self.models
            .iter()
            .filter(|m| !m.builtin)
            .map(|m| m.name.clone())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModelSpec> {
        self.models.iter()
    }

    /// Drop every custom model, keeping built-ins.
    pub fn clear_custom(&mut self) {
        self.models.retain(|m| m.builtin);
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

fn builtin_models() -> Vec<ModelSpec> {
    vec![
        ModelSpec::new("random_forest")
            .with_description("Random forest ensemble")
            .with_values("n_estimators", vec![json!(50), json!(100), json!(200)])
            .with_values(
                "max_depth",
                vec![json!(null), json!(5), json!(10), json!(20)],
            )
            .with_values("min_samples_split", vec![json!(2), json!(5), json!(10)])
            .builtin(),
        ModelSpec::new("xgboost")
            .with_description("Gradient boosted trees")
            .with_values("n_estimators", vec![json!(50), json!(100), json!(200)])
            .with_values("max_depth", vec![json!(3), json!(5), json!(7)])
            .with_values("learning_rate", vec![json!(0.01), json!(0.1), json!(0.3)])
            .builtin(),
        ModelSpec::new("svm")
            .with_description("Support vector machine")
            .with_values("C", vec![json!(0.1), json!(1.0), json!(10.0)])
            .with_values("kernel", vec![json!("linear"), json!("rbf")])
            .builtin(),
        // Regression falls back to ridge, which takes `alpha` instead of `C`.
        ModelSpec::new("logistic_regression")
            .with_description("Logistic regression (ridge for regression tasks)")
            .with_values("C", vec![json!(0.01), json!(0.1), json!(1.0), json!(10.0)])
            .with_values("max_iter", vec![json!(100), json!(500), json!(1000)])
            .with_regression_values(
                "alpha",
                vec![json!(0.01), json!(0.1), json!(1.0), json!(10.0)],
            )
            .builtin(),
    ]
}
