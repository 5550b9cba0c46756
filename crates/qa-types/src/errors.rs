use thiserror::Error;

/// Main error type for the hybrid search
#[derive(Error, Debug)]
pub enum QaError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Training error: {0}")]
    Training(#[from] TrainingError),

    #[error("Sampler error: {0}")]
    Sampler(#[from] SamplerError),

    #[error("Search error: {0}")]
    Search(#[from] SearchError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failures raised by an evaluator for a single configuration
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TrainingError {
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Unknown model: {model}")]
    UnknownModel { model: String },

    #[error("Training failed: {message}")]
    Failed { message: String },

    #[error("Scoring failed: {message}")]
    ScoringFailed { message: String },

    #[error("Non-finite score reported: {score}")]
    NonFiniteScore { score: f64 },

    #[error("Evaluation timeout: took longer than {timeout_seconds} seconds")]
    Timeout { timeout_seconds: u64 },
}

/// Failures of the external bitstring sampler
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SamplerError {
    #[error("Sampler unavailable: {message}")]
    Unavailable { message: String },

    #[error("Sampler returned HTTP status {status}")]
    BadStatus { status: u16 },

    #[error("Sampler request timed out after {timeout_seconds} seconds")]
    Timeout { timeout_seconds: u64 },

    #[error("Sampler transport error: {message}")]
    Transport { message: String },

    #[error("Malformed sampler response: {message}")]
    InvalidResponse { message: String },

    #[error("Sampler request rejected locally: {message}")]
    InvalidRequest { message: String },
}

/// Terminal outcomes of a search run
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SearchError {
    #[error("Search exhausted: no successful evaluation in {trials} trials (budget {budget})")]
    Exhausted { budget: usize, trials: usize },

    #[error("Search cancelled after {trials_completed} trials")]
    Cancelled { trials_completed: usize },

    #[error("Illegal state transition: {from} -> {to}")]
    IllegalTransition { from: String, to: String },
}

/// Model registry errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistryError {
    #[error("Invalid model name: {name:?} (alphanumeric and underscores only)")]
    InvalidName { name: String },

    #[error("Model '{name}' is already registered. Unregister it first to replace it")]
    AlreadyRegistered { name: String },

    #[error("Model '{name}' is not registered")]
    NotRegistered { name: String },

    #[error("Model '{name}' is built in and cannot be unregistered")]
    Builtin { name: String },

    #[error("Model '{name}' declares no hyperparameters")]
    EmptyDomain { name: String },

    #[error("Hyperparameter '{parameter}' of model '{name}' is invalid: {message}")]
    InvalidParameter {
        name: String,
        parameter: String,
        message: String,
    },
}

/// Result type alias for search operations
pub type QaResult<T> = Result<T, QaError>;

impl QaError {
    /// Whether this error is raised at setup time (before any trial runs).
    pub fn is_setup_error(&self) -> bool {
        matches!(self, QaError::Config(_) | QaError::Registry(_))
    }
}

/// Macro for creating validation errors
#[macro_export]
macro_rules! validation_error {
    ($($arg:tt)*) => {
        $crate::QaError::Validation(format!($($arg)*))
    };
}

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::QaError::Config(format!($($arg)*))
    };
}
