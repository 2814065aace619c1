use extract::{with_timeout, CompletionProvider, CompletionRequest, ProviderKind};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{ComplexityJudge, RagConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Simple,
    Medium,
    Complex,
}

const RELATIONAL_MARKERS: &[&str] = &[
    "compare",
    "comparison",
    "difference",
    "differ",
    "versus",
    "vs",
    "between",
    "connected",
    "connection",
    "relationship",
    "related",
    "relate",
    "impact",
    "affect",
    "affects",
    "influence",
    "why",
    "how",
    "explain",
];

/// Cheap lexical estimate of how much evidence a question needs.
pub fn heuristic_complexity(question: &str) -> Complexity {
    let words: Vec<&str> = question.split_whitespace().collect();
    let mut score = 0;

    if words.len() > 12 {
        score += 1;
    }
    if words.len() > 25 {
        score += 1;
    }

    let lowered = question.to_lowercase();
    let has_marker = lowered
        .split(|c: char| !c.is_alphanumeric())
        .any(|word| RELATIONAL_MARKERS.contains(&word));
    if has_marker {
        score += 1;
    }

    if lowered.contains(" and ") || lowered.contains(',') || lowered.contains(';') {
        score += 1;
    }

    let proper_nouns = words
        .iter()
        .skip(1)
        .filter(|w| w.chars().next().is_some_and(char::is_uppercase))
        .count();
    if proper_nouns >= 2 {
        score += 1;
    }

    match score {
        0 => Complexity::Simple,
        1 | 2 => Complexity::Medium,
        _ => Complexity::Complex,
    }
}

fn parse_complexity(reply: &str) -> Option<Complexity> {
    let reply = reply.to_lowercase();
    [
        ("simple", Complexity::Simple),
        ("medium", Complexity::Medium),
        ("complex", Complexity::Complex),
    ]
    .into_iter()
    .filter_map(|(word, level)| reply.find(word).map(|pos| (pos, level)))
    .min_by_key(|(pos, _)| *pos)
    .map(|(_, level)| level)
}

fn build_complexity_prompt(question: &str) -> String {
    format!(
        "Rate how complex this question is to answer from a document collection.\n\n\
         Question: {}\n\n\
         Reply with one word: simple, medium or complex.",
        question
    )
}

/// The depth chosen for a query, with the complexity it was derived from
/// when adaptive depth is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepthDecision {
    pub depth: usize,
    pub complexity: Option<Complexity>,
}

pub struct DepthPlanner<'a> {
    config: &'a RagConfig,
    llm: &'a dyn CompletionProvider,
}

impl<'a> DepthPlanner<'a> {
    pub fn new(config: &'a RagConfig, llm: &'a dyn CompletionProvider) -> Self {
        Self { config, llm }
    }

    pub fn depth_for(&self, complexity: Complexity) -> usize {
        match complexity {
            Complexity::Simple => self.config.depth_min,
            Complexity::Medium => self.config.depth_default,
            Complexity::Complex => self.config.depth_max,
        }
    }

    /// Always lands within `[depth_min, depth_max]`.
    pub async fn plan(&self, question: &str) -> DepthDecision {
        if !self.config.adaptive_depth {
            return DepthDecision {
                depth: self.config.depth_default,
                complexity: None,
            };
        }

        let complexity = match self.config.complexity_judge {
            ComplexityJudge::Heuristic => Some(heuristic_complexity(question)),
            ComplexityJudge::Llm => self.judge(question).await,
        };

        let depth = complexity
            .map(|c| self.depth_for(c))
            .unwrap_or(self.config.depth_default)
            .clamp(self.config.depth_min, self.config.depth_max);

        debug!(?complexity, depth, "Retrieval depth planned");
        DepthDecision { depth, complexity }
    }

    async fn judge(&self, question: &str) -> Option<Complexity> {
        let request = CompletionRequest::judgment(build_complexity_prompt(question));
        match with_timeout(
            ProviderKind::Completion,
            self.config.provider_timeout(),
            self.llm.complete(&request),
        )
        .await
        {
            Ok(reply) => {
                let parsed = parse_complexity(&reply);
                if parsed.is_none() {
                    warn!(reply = %reply.trim(), "Unrecognized complexity rating");
                }
                parsed
            }
            Err(e) => {
                warn!(error = %e, "Complexity judgment failed, using default depth");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stubs::ScriptedCompletion;
    use std::time::Duration;

    #[test]
    fn test_heuristic_levels() {
        assert_eq!(heuristic_complexity("What is the repo rate?"), Complexity::Simple);
        assert_eq!(heuristic_complexity("How does inflation work?"), Complexity::Medium);
        assert_eq!(
            heuristic_complexity(
                "Compare how the Reserve Bank and the Federal Reserve affect home loan rates, \
                 and explain why the two approaches differ for borrowers over time"
            ),
            Complexity::Complex
        );
    }

    #[tokio::test]
    async fn test_depth_follows_complexity() {
        let config = RagConfig::default();
        let llm = ScriptedCompletion::new();
        let planner = DepthPlanner::new(&config, &llm);

        assert_eq!(planner.plan("What is the repo rate?").await.depth, 3);
        assert_eq!(planner.plan("How does inflation work?").await.depth, 5);
        assert_eq!(llm.call_count(), 0);
    }

    #[tokio::test]
    async fn test_disabled_adaptive_depth_uses_default() {
        let config = RagConfig { adaptive_depth: false, ..RagConfig::default() };
        let llm = ScriptedCompletion::new();
        let decision = DepthPlanner::new(&config, &llm).plan("What is the repo rate?").await;

        assert_eq!(decision, DepthDecision { depth: 5, complexity: None });
    }

    #[tokio::test]
    async fn test_llm_judge_rating_is_used() {
        let config = RagConfig { complexity_judge: ComplexityJudge::Llm, ..RagConfig::default() };
        let llm = ScriptedCompletion::new().reply("Rate how complex", "Complex.");
        let decision = DepthPlanner::new(&config, &llm).plan("short").await;

        assert_eq!(decision.complexity, Some(Complexity::Complex));
        assert_eq!(decision.depth, 8);
    }

    #[tokio::test(start_paused = true)]
    async fn test_llm_judge_timeout_uses_default() {
        let config = RagConfig {
            complexity_judge: ComplexityJudge::Llm,
            provider_timeout_ms: 50,
            ..RagConfig::default()
        };
        let llm = ScriptedCompletion::new().delay("Rate how complex", Duration::from_secs(5), "simple");
        let decision = DepthPlanner::new(&config, &llm).plan("short").await;

        assert_eq!(decision.depth, 5);
        assert_eq!(decision.complexity, None);
    }
}
