pub mod composer;
pub mod config;
pub mod corrective;
pub mod depth;
pub mod fusion;
pub mod graph_evidence;
pub mod pipeline;
pub mod router;
#[cfg(any(test, feature = "test-util"))]
pub mod stubs;
pub mod synthesizer;

pub use composer::{compose, ComposedContext, EvidenceOrigin, Provenance};
pub use config::{ComplexityJudge, ConfigError, RagConfig, RetrievalMode};
pub use corrective::{FilterOutcome, RelevanceFilter};
pub use depth::{heuristic_complexity, Complexity, DepthDecision, DepthPlanner};
pub use fusion::{fuse, FusionRetriever, RetrievedChunk};
pub use graph_evidence::{GraphEvidence, GraphEvidenceExtractor};
pub use pipeline::{
    HybridRagEngine, PipelineStage, Providers, QueryPlan, QueryRequest, QueryResult, QueryStatus, StageCounts,
};
pub use router::QueryRouter;
pub use synthesizer::{AnswerSynthesizer, Synthesis};
