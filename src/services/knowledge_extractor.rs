//! Knowledge extraction from expert analyses.
//!
//! Maps the structured analysis into typed knowledge entries, then
//! reconciles them against the agent's existing store: near-duplicates
//! (bag-of-words Jaccard >= 0.8 within a kind) validate the existing row
//! instead of inserting, and contradictions damp the existing row's
//! confidence. Applying the same analysis twice therefore inserts nothing
//! and bumps each matched row's `times_validated` by exactly one.

use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{ExpertAnalysis, KnowledgeEntry, KnowledgeKind};
use crate::domain::ports::KnowledgeRepository;
use crate::services::templates::ExecutionTemplate;

/// Initial confidence for insights mined from recommendations.
const INSIGHT_CONFIDENCE: f64 = 0.6;
/// Initial confidence for template parameter preferences.
const PARAMETER_PREF_CONFIDENCE: f64 = 0.6;
/// Initial confidence for negative pattern rules.
const PATTERN_RULE_CONFIDENCE: f64 = 0.7;
/// Token-overlap threshold for deduplication.
const DEDUP_JACCARD: f64 = 0.8;

/// Outcome counts of one application.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct KnowledgeOutcome {
    pub inserted: usize,
    pub validated: usize,
    pub contradicted: usize,
}

pub struct KnowledgeExtractor {
    repo: Arc<dyn KnowledgeRepository>,
}

impl KnowledgeExtractor {
    pub fn new(repo: Arc<dyn KnowledgeRepository>) -> Self {
        Self { repo }
    }

    /// Fold one analysis into the agent's knowledge store.
    pub async fn apply_analysis(
        &self,
        agent_id: Uuid,
        iteration_number: i64,
        analysis: &ExpertAnalysis,
        signals_found: i64,
    ) -> DomainResult<KnowledgeOutcome> {
        let candidates = dedupe_batch(extract_candidates(
            agent_id,
            iteration_number,
            analysis,
            signals_found,
        ));

        let mut existing = self.repo.list_for_agent(agent_id).await?;
        let mut outcome = KnowledgeOutcome::default();

        for candidate in candidates {
            if let Some(matched) = existing
                .iter_mut()
                .find(|e| e.kind == candidate.kind && jaccard(&e.insight, &candidate.insight) >= DEDUP_JACCARD)
            {
                matched.validate();
                self.repo.update(matched).await?;
                outcome.validated += 1;
                continue;
            }

            for entry in existing.iter_mut().filter(|e| {
                e.kind == candidate.kind
                    && e.pattern_tag.is_some()
                    && e.pattern_tag == candidate.pattern_tag
                    && e.is_negative() != candidate.is_negative()
            }) {
                entry.contradict();
                self.repo.update(entry).await?;
                outcome.contradicted += 1;
            }

            self.repo.insert(&candidate).await?;
            existing.push(candidate);
            outcome.inserted += 1;
        }

        Ok(outcome)
    }
}

/// Map the analysis schema into typed candidate entries, in a fixed order.
pub fn extract_candidates(
    agent_id: Uuid,
    iteration_number: i64,
    analysis: &ExpertAnalysis,
    signals_found: i64,
) -> Vec<KnowledgeEntry> {
    let mut candidates = Vec::new();

    let recommendation_groups = [
        &analysis.recommendations.scanning,
        &analysis.recommendations.execution,
        &analysis.recommendations.risk_management,
    ];
    for group in recommendation_groups {
        for text in group {
            if text.trim().is_empty() {
                continue;
            }
            candidates.push(KnowledgeEntry::new(
                agent_id,
                KnowledgeKind::Insight,
                text.trim(),
                INSIGHT_CONFIDENCE,
                iteration_number,
            ));
        }
    }

    let comparison = analysis.execution_analysis.template_comparison.trim();
    if !comparison.is_empty() {
        let lowered = comparison.to_lowercase();
        for template in ExecutionTemplate::all() {
            if lowered.contains(template.tag()) {
                candidates.push(
                    KnowledgeEntry::new(
                        agent_id,
                        KnowledgeKind::ParameterPref,
                        comparison,
                        PARAMETER_PREF_CONFIDENCE,
                        iteration_number,
                    )
                    .with_pattern_tag(template.tag()),
                );
            }
        }
    }

    for issue in &analysis.execution_analysis.exit_timing_issues {
        let issue = issue.trim();
        if issue.is_empty() {
            continue;
        }
        candidates.push(KnowledgeEntry::new(
            agent_id,
            KnowledgeKind::PatternRule,
            phrase_negatively(issue),
            PATTERN_RULE_CONFIDENCE,
            iteration_number,
        ));
    }

    if signals_found == 0 {
        candidates.push(KnowledgeEntry::new(
            agent_id,
            KnowledgeKind::PatternRule,
            "Avoid scan filters so restrictive they emit zero signals; the last scan found none.",
            PATTERN_RULE_CONFIDENCE,
            iteration_number,
        ));
    }

    candidates
}

/// Collapse near-duplicate candidates within one batch so a matched
/// existing row is validated exactly once per application.
fn dedupe_batch(candidates: Vec<KnowledgeEntry>) -> Vec<KnowledgeEntry> {
    let mut kept: Vec<KnowledgeEntry> = Vec::new();
    for candidate in candidates {
        let duplicate = kept
            .iter()
            .any(|k| k.kind == candidate.kind && jaccard(&k.insight, &candidate.insight) >= DEDUP_JACCARD);
        if !duplicate {
            kept.push(candidate);
        }
    }
    kept
}

/// Pattern rules are phrased as warnings.
fn phrase_negatively(issue: &str) -> String {
    let lowered = issue.to_lowercase();
    if lowered.starts_with("avoid") || lowered.starts_with("never") || lowered.starts_with("do not")
    {
        issue.to_string()
    } else {
        let mut chars = issue.chars();
        let first = chars.next().map(|c| c.to_lowercase().to_string()).unwrap_or_default();
        format!("Avoid {}{}", first, chars.as_str())
    }
}

/// Bag-of-words Jaccard over lowercase alphanumeric tokens.
pub fn jaccard(a: &str, b: &str) -> f64 {
    let tokens_a = tokenize(a);
    let tokens_b = tokenize(b);
    if tokens_a.is_empty() && tokens_b.is_empty() {
        return 1.0;
    }
    let intersection = tokens_a.intersection(&tokens_b).count();
    let union = tokens_a.union(&tokens_b).count();
    if union == 0 {
        return 0.0;
    }
    intersection as f64 / union as f64
}

fn tokenize(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}
