//! # qa-optimizer
//!
//! Budgeted hybrid model search.
//!
//! Provides the job-scoped model registry, the search space over model
//! families, hyperparameters and feature subsets, the QUBO bridge to
//! bitstring samplers, candidate proposers, and the orchestrator that spends
//! a fixed evaluation budget across a classical phase and an optional
//! external-sampler phase before reporting the best configuration.

mod evaluator;
mod orchestrator;
mod proposer;
mod qubo;
mod registry;
mod report;
mod sampler;
mod space;
mod trial;

pub use evaluator::{Evaluation, Evaluator};
pub use orchestrator::{CancellationFlag, Orchestrator};
pub use proposer::{CandidateProposer, ProposalContext, SequentialProposer};
pub use qubo::{dedup_by_mask, QuboDecoder, QuboEncoder, QuboMatrix};
pub use registry::{
    ModelFactory, ModelHandle, ModelRegistry, ModelSpec, ParameterDecl, ParameterSpec,
    BUILTIN_MODELS,
};
pub use report::{BestModel, HistoryEntry, ReportMetrics, SearchReport, SearchSummary};
pub use sampler::{
    HttpSamplerClient, RemoteSamplerProposer, SampledCandidate, SamplerClient, SamplerConfig,
    SamplerRequest, SamplerResponse, SamplerSearchSpace, MAX_CANDIDATES_PER_REQUEST,
    MAX_SAMPLER_FEATURES,
};
pub use space::{HyperparameterDomain, ModelDomain, ParameterDef, SearchSpace};
pub use trial::{
    Incumbent, ObjectiveDirection, SearchConfig, SearchId, SearchPhase, SearchProgress,
    SearchState, TrialRecord, TrialStatus, SAMPLER_URL_ENV,
};
