//! External candidate sampler: wire contract, HTTP client and the proposer
//! that drives the quantum phase.

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use qa_types::{config_error, Configuration, Hyperparameters, QaResult, SamplerError};

use crate::proposer::{CandidateProposer, ProposalContext};
use crate::qubo::{dedup_by_mask, QuboDecoder, QuboEncoder, QuboMatrix};

/// Largest feature count the sampler service accepts.
pub const MAX_SAMPLER_FEATURES: usize = 100;
/// Largest `num_candidates` the sampler service accepts.
pub const MAX_CANDIDATES_PER_REQUEST: usize = 50;

/// Connection settings for the external sampler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplerConfig {
    /// Base URL, e.g. "http://localhost:8001".
    pub url: String,

    /// Per-request timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Candidates requested per call.
    #[serde(default = "default_batch_limit")]
    pub batch_limit: usize,
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_batch_limit() -> usize {
    10
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self::new("http://localhost:8001")
    }
}

impl SamplerConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            timeout_secs: default_timeout_secs(),
            batch_limit: default_batch_limit(),
        }
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    pub fn with_batch_limit(mut self, batch_limit: usize) -> Self {
        self.batch_limit = batch_limit;
        self
    }

    pub fn validate(&self) -> QaResult<()> {
        if self.url.trim().is_empty() {
            return Err(config_error!("sampler url must not be empty"));
        }
        if !(1..=MAX_CANDIDATES_PER_REQUEST).contains(&self.batch_limit) {
            return Err(config_error!(
                "sampler batch_limit must be within 1..={MAX_CANDIDATES_PER_REQUEST}, got {}",
                self.batch_limit
            ));
        }
        if self.timeout_secs == 0 {
            return Err(config_error!("sampler timeout_secs must be at least 1"));
        }
        Ok(())
    }

    /// Full URL of the generate endpoint.
    pub fn generate_url(&self) -> String {
        format!("{}/generate", self.url.trim_end_matches('/'))
    }
}

/// Shape of the search space as the sampler sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplerSearchSpace {
    pub num_features: usize,
    pub max_features: usize,
    pub model_names: Vec<String>,
}

/// Body of `POST /generate`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplerRequest {
    pub search_space: SamplerSearchSpace,
    /// Incumbent metric value as reported by the evaluator. Advisory; the
    /// sampler may ignore it.
    pub current_best_score: Option<f64>,
    pub num_candidates: usize,
    pub qubo: QuboMatrix,
}

/// A fully formed candidate returned by the sampler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampledCandidate {
    pub feature_mask: Vec<bool>,
    pub model: String,
    #[serde(default)]
    pub hyperparameters: Hyperparameters,
}

impl From<SampledCandidate> for Configuration {
    fn from(candidate: SampledCandidate) -> Self {
        Configuration {
            model: candidate.model,
            hyperparameters: candidate.hyperparameters,
            feature_mask: candidate.feature_mask,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SamplerResponse {
    #[serde(default)]
    pub candidates: Vec<SampledCandidate>,
    /// Raw bitstrings to be decoded locally.
    #[serde(default)]
    pub samples: Vec<Vec<u8>>,
}

/// Transport to a candidate sampler.
#[async_trait]
pub trait SamplerClient: Send + Sync {
    async fn generate(&self, request: &SamplerRequest) -> Result<SamplerResponse, SamplerError>;
}

/// reqwest-backed sampler client.
#[derive(Debug, Clone)]
pub struct HttpSamplerClient {
    client: reqwest::Client,
    endpoint: String,
    timeout_secs: u64,
}

impl HttpSamplerClient {
    pub fn new(config: &SamplerConfig) -> Result<Self, SamplerError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| SamplerError::Transport {
                message: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            endpoint: config.generate_url(),
            timeout_secs: config.timeout_secs,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn map_transport(&self, e: reqwest::Error) -> SamplerError {
        if e.is_timeout() {
            SamplerError::Timeout {
                timeout_seconds: self.timeout_secs,
            }
        } else if e.is_connect() {
            SamplerError::Unavailable {
                message: format!("cannot reach {}: {e}", self.endpoint),
            }
        } else {
            SamplerError::Transport {
                message: format!("HTTP request failed: {e}"),
            }
        }
    }
}

#[async_trait]
impl SamplerClient for HttpSamplerClient {
    async fn generate(&self, request: &SamplerRequest) -> Result<SamplerResponse, SamplerError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(request)
            .send()
            .await
            .map_err(|e| self.map_transport(e))?;

        if !response.status().is_success() {
            return Err(SamplerError::BadStatus {
                status: response.status().as_u16(),
            });
        }

        let body = response.text().await.map_err(|e| self.map_transport(e))?;
        serde_json::from_str(&body).map_err(|e| SamplerError::InvalidResponse {
            message: format!("failed to parse sampler response: {e}"),
        })
    }
}

/// Proposer backed by an external sampler.
///
/// Each call builds the cardinality QUBO for the space, asks the sampler for
/// candidates, decodes any raw bitstrings it returns and merges both sources
/// into at most `count` candidates with distinct masks.
pub struct RemoteSamplerProposer<C> {
    client: C,
    batch_limit: usize,
    encoder: QuboEncoder,
    decoder: QuboDecoder,
    rng: StdRng,
}

impl<C: SamplerClient> RemoteSamplerProposer<C> {
    pub fn new(client: C, batch_limit: usize, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            client,
            batch_limit: batch_limit.clamp(1, MAX_CANDIDATES_PER_REQUEST),
            encoder: QuboEncoder::default(),
            decoder: QuboDecoder,
            rng,
        }
    }

    pub fn with_encoder(mut self, encoder: QuboEncoder) -> Self {
        self.encoder = encoder;
        self
    }

    fn build_request(&self, ctx: &ProposalContext<'_>, count: usize) -> Result<SamplerRequest, SamplerError> {
        let space = ctx.space;
        if !(1..=MAX_SAMPLER_FEATURES).contains(&space.num_features()) {
            return Err(SamplerError::InvalidRequest {
                message: format!(
                    "sampler accepts 1..={MAX_SAMPLER_FEATURES} features, space has {}",
                    space.num_features()
                ),
            });
        }

        Ok(SamplerRequest {
            search_space: SamplerSearchSpace {
                num_features: space.num_features(),
                max_features: space.max_features(),
                model_names: space.model_names(),
            },
            current_best_score: ctx.incumbent_raw_score().filter(|s| s.is_finite()),
            num_candidates: count.clamp(1, MAX_CANDIDATES_PER_REQUEST),
            qubo: self.encoder.encode(space),
        })
    }
}

#[async_trait]
impl<C: SamplerClient> CandidateProposer for RemoteSamplerProposer<C> {
    fn name(&self) -> &str {
        "remote_sampler"
    }

    fn batch_size(&self, remaining: usize) -> usize {
        remaining.min(self.batch_limit)
    }

    async fn propose(
        &mut self,
        ctx: &ProposalContext<'_>,
        count: usize,
    ) -> Result<Vec<Configuration>, SamplerError> {
        let request = self.build_request(ctx, count)?;
        let response = self.client.generate(&request).await?;

        debug!(
            candidates = response.candidates.len(),
            samples = response.samples.len(),
            "sampler responded"
        );

        let mut merged: Vec<Configuration> =
            response.candidates.into_iter().map(Configuration::from).collect();
        merged.extend(
            self.decoder
                .decode(&response.samples, ctx.space, count, &mut self.rng),
        );
        Ok(dedup_by_mask(merged, count))
    }
}
