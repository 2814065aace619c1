use extract::{CompletionProvider, ExtractionProvider, ProviderError};
use index::{EmbeddingProvider, GraphStore, Indexer, IndexerOptions, RetryPolicy, VectorIndex};
use ingest::TextExtractor;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::composer::{compose, Provenance};
use crate::config::{ConfigError, RagConfig, RetrievalMode};
use crate::corrective::{FilterOutcome, RelevanceFilter};
use crate::depth::{Complexity, DepthPlanner};
use crate::fusion::{fuse, FusionRetriever};
use crate::graph_evidence::GraphEvidenceExtractor;
use crate::router::QueryRouter;
use crate::synthesizer::{AnswerSynthesizer, Synthesis};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Routing,
    Retrieving,
    Composing,
    Synthesizing,
    Done,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct QueryRequest {
    pub question: String,
    /// Bypass routing and use this mode.
    #[serde(default)]
    pub mode: Option<RetrievalMode>,
}

impl QueryRequest {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            mode: None,
        }
    }

    pub fn with_mode(mut self, mode: RetrievalMode) -> Self {
        self.mode = Some(mode);
        self
    }
}

/// Per-query decisions made right after routing. `depth` is zero and
/// `queries` empty when the mode skips the vector path.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    pub mode: RetrievalMode,
    pub depth: usize,
    pub complexity: Option<Complexity>,
    pub queries: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StageCounts {
    pub query_variants: usize,
    pub depth: usize,
    pub chunks_retrieved: usize,
    pub chunks_after_filter: usize,
    pub chunks_in_context: usize,
    /// Graph evidence gathered, before the context budget is applied.
    pub entities_found: usize,
    pub relationships_found: usize,
    pub entities_in_context: usize,
    pub relationships_in_context: usize,
    pub chunks_dropped_for_budget: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum QueryStatus {
    Answered,
    /// Answer generation failed; earlier degradations never end up here.
    Failed { error: ProviderError },
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult {
    pub query_id: Uuid,
    pub question: String,
    pub mode: Option<RetrievalMode>,
    pub status: QueryStatus,
    pub answer: Option<String>,
    pub provenance: Vec<Provenance>,
    pub counts: StageCounts,
    pub stages: Vec<PipelineStage>,
}

impl QueryResult {
    pub fn is_answered(&self) -> bool {
        matches!(self.status, QueryStatus::Answered)
    }
}

/// The external collaborators one engine talks to.
#[derive(Clone)]
pub struct Providers {
    pub completion: Arc<dyn CompletionProvider>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub vectors: Arc<dyn VectorIndex>,
    pub graph: Arc<dyn GraphStore>,
    pub extractor: Arc<dyn ExtractionProvider>,
}

/// Query-local state, never shared between queries.
#[derive(Default)]
struct QueryTrace {
    mode: Option<RetrievalMode>,
    counts: StageCounts,
    stages: Vec<PipelineStage>,
    provenance: Vec<Provenance>,
}

impl QueryTrace {
    fn enter(&mut self, stage: PipelineStage) {
        self.stages.push(stage);
    }
}

struct VectorEvidence {
    retrieved: usize,
    filtered: FilterOutcome,
}

pub struct HybridRagEngine {
    config: Arc<RagConfig>,
    providers: Providers,
    ingest_lock: Arc<Mutex<()>>,
}

impl HybridRagEngine {
    pub fn new(config: Arc<RagConfig>, providers: Providers) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            providers,
            ingest_lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    /// An indexer writing into the same stores this engine reads. Every
    /// indexer from one engine shares a write lock, so their ingestions
    /// never interleave.
    pub fn indexer(&self, text_extractor: Arc<dyn TextExtractor>, retry: RetryPolicy) -> Indexer {
        Indexer::new(
            text_extractor,
            self.providers.embedder.clone(),
            self.providers.vectors.clone(),
            self.providers.graph.clone(),
            self.providers.extractor.clone(),
            IndexerOptions {
                chunker: self.config.chunker_config(),
                provider_timeout: self.config.provider_timeout(),
                retry,
                build_graph: self.config.graph_enabled,
            },
        )
        .with_write_lock(self.ingest_lock.clone())
    }

    pub async fn query(&self, request: QueryRequest) -> QueryResult {
        self.query_with_cancel(request, CancellationToken::new()).await
    }

    /// Run a query that stops as soon as `token` is cancelled. Outstanding
    /// provider calls are dropped; the shared stores are only read.
    pub async fn query_with_cancel(&self, request: QueryRequest, token: CancellationToken) -> QueryResult {
        let query_id = Uuid::new_v4();
        let span = info_span!("query", query_id = %query_id);

        async move {
            info!(question = %request.question, forced_mode = ?request.mode, "Query started");
            let mut trace = QueryTrace::default();

            let outcome = tokio::select! {
                biased;
                _ = token.cancelled() => None,
                result = self.run(&request, &mut trace) => Some(result),
            };

            let (status, answer) = match outcome {
                Some(Ok(synthesis)) => {
                    trace.enter(PipelineStage::Done);
                    trace.provenance = synthesis.provenance;
                    (QueryStatus::Answered, Some(synthesis.answer))
                }
                Some(Err(error)) => {
                    trace.enter(PipelineStage::Failed);
                    warn!(error = %error, "Answer generation failed");
                    (QueryStatus::Failed { error }, None)
                }
                None => {
                    warn!(stage = ?trace.stages.last(), "Query cancelled");
                    trace.enter(PipelineStage::Failed);
                    (QueryStatus::Cancelled, None)
                }
            };

            info!(status = ?status, counts = ?trace.counts, "Query finished");
            QueryResult {
                query_id,
                question: request.question,
                mode: trace.mode,
                status,
                answer,
                provenance: trace.provenance,
                counts: trace.counts,
                stages: trace.stages,
            }
        }
        .instrument(span)
        .await
    }

    async fn run(&self, request: &QueryRequest, trace: &mut QueryTrace) -> Result<Synthesis, ProviderError> {
        let config = self.config.as_ref();
        let providers = &self.providers;
        let question = request.question.as_str();

        trace.enter(PipelineStage::Routing);
        let mode = QueryRouter::new(config, providers.completion.as_ref())
            .route(question, request.mode)
            .await;
        trace.mode = Some(mode);
        info!(mode = %mode, "Query routed");

        let plan = self.plan(question, mode).await;
        trace.counts.query_variants = plan.queries.len();
        trace.counts.depth = plan.depth;
        info!(
            depth = plan.depth,
            complexity = ?plan.complexity,
            variants = plan.queries.len(),
            "Query planned"
        );

        // Vector and graph retrieval are independent; a mode that does not
        // use one path never touches its providers.
        trace.enter(PipelineStage::Retrieving);
        let vector_path = async {
            if mode.uses_vector() {
                Some(self.retrieve_vector(question, &plan).await)
            } else {
                None
            }
        };
        let graph_path = async {
            if mode.uses_graph() {
                let extractor =
                    GraphEvidenceExtractor::new(config, providers.extractor.as_ref(), providers.graph.as_ref());
                Some(extractor.collect(question).await)
            } else {
                None
            }
        };
        let (vector, graph) = tokio::join!(vector_path, graph_path);
        let graph = graph.unwrap_or_default();

        let chunks = match vector {
            Some(evidence) => {
                trace.counts.chunks_retrieved = evidence.retrieved;
                trace.counts.chunks_after_filter = evidence.filtered.kept.len();
                info!(
                    retrieved = evidence.retrieved,
                    rejected = evidence.filtered.rejected,
                    kept = evidence.filtered.kept.len(),
                    fell_back = evidence.filtered.fell_back,
                    "Vector evidence retrieved"
                );
                evidence.filtered.kept
            }
            None => Vec::new(),
        };
        trace.counts.entities_found = graph.entities.len();
        trace.counts.relationships_found = graph.relationships.len();
        if mode.uses_graph() {
            info!(
                mentions = graph.mentions.len(),
                resolved = graph.resolved.len(),
                entities = graph.entities.len(),
                relationships = graph.relationships.len(),
                "Graph evidence retrieved"
            );
        }

        trace.enter(PipelineStage::Composing);
        let context = compose(chunks, &graph, config.context_budget);
        trace.counts.chunks_in_context = context.chunks.len();
        trace.counts.entities_in_context = context.entities.len();
        trace.counts.relationships_in_context = context.relationships.len();
        trace.counts.chunks_dropped_for_budget = context.dropped_chunks;
        trace.provenance = context.provenance();
        info!(
            chars = context.char_len(),
            budget = config.context_budget,
            dropped_chunks = context.dropped_chunks,
            dropped_graph_items = context.dropped_graph_items,
            "Context composed"
        );

        trace.enter(PipelineStage::Synthesizing);
        AnswerSynthesizer::new(config, providers.completion.as_ref())
            .synthesize(&context, question, mode)
            .await
    }

    fn fusion(&self) -> FusionRetriever<'_> {
        FusionRetriever::new(
            self.config.as_ref(),
            self.providers.completion.as_ref(),
            self.providers.embedder.as_ref(),
            self.providers.vectors.as_ref(),
        )
    }

    async fn plan(&self, question: &str, mode: RetrievalMode) -> QueryPlan {
        if !mode.uses_vector() {
            return QueryPlan {
                mode,
                depth: 0,
                complexity: None,
                queries: Vec::new(),
            };
        }

        let planner = DepthPlanner::new(self.config.as_ref(), self.providers.completion.as_ref());
        let fusion = self.fusion();
        let (depth, queries) = tokio::join!(planner.plan(question), fusion.expand(question));
        QueryPlan {
            mode,
            depth: depth.depth,
            complexity: depth.complexity,
            queries,
        }
    }

    async fn retrieve_vector(&self, question: &str, plan: &QueryPlan) -> VectorEvidence {
        let config = self.config.as_ref();
        let providers = &self.providers;

        let lists = self.fusion().retrieve(&plan.queries).await;
        let pool = if config.relevance_filter {
            plan.depth * config.filter_headroom
        } else {
            plan.depth
        };
        let candidates = fuse(&lists, pool);
        let retrieved = candidates.len();

        let filtered = RelevanceFilter::new(config, providers.completion.as_ref())
            .filter(question, candidates, plan.depth)
            .await;

        VectorEvidence {
            retrieved,
            filtered,
        }
    }
}
