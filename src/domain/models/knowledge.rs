//! Knowledge entries: durable lessons referenced by future prompt assembly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of lesson a knowledge entry captures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KnowledgeKind {
    /// General observation from the analysis recommendations.
    #[serde(rename = "INSIGHT")]
    Insight,
    /// Preference for a specific execution template's parameters.
    #[serde(rename = "PARAMETER_PREF")]
    ParameterPref,
    /// Negative rule ("avoid ...") mined from exit-timing issues.
    #[serde(rename = "PATTERN_RULE")]
    PatternRule,
}

impl KnowledgeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insight => "INSIGHT",
            Self::ParameterPref => "PARAMETER_PREF",
            Self::PatternRule => "PATTERN_RULE",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "INSIGHT" => Some(Self::Insight),
            "PARAMETER_PREF" => Some(Self::ParameterPref),
            "PATTERN_RULE" => Some(Self::PatternRule),
            _ => None,
        }
    }
}

/// A durable lesson learned, with revisable confidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    pub id: Uuid,
    pub agent_id: Uuid,
    pub kind: KnowledgeKind,
    pub pattern_tag: Option<String>,
    /// Human-readable lesson, one to two sentences.
    pub insight: String,
    pub supporting_data: Option<serde_json::Value>,
    /// Belief strength in [0, 1].
    pub confidence: f64,
    pub learned_from_iteration: i64,
    pub times_validated: i64,
    pub last_validated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl KnowledgeEntry {
    pub fn new(
        agent_id: Uuid,
        kind: KnowledgeKind,
        insight: impl Into<String>,
        confidence: f64,
        learned_from_iteration: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            agent_id,
            kind,
            pattern_tag: None,
            insight: insight.into(),
            supporting_data: None,
            confidence: confidence.clamp(0.0, 1.0),
            learned_from_iteration,
            times_validated: 0,
            last_validated_at: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_pattern_tag(mut self, tag: impl Into<String>) -> Self {
        self.pattern_tag = Some(tag.into());
        self
    }

    pub fn with_supporting_data(mut self, data: serde_json::Value) -> Self {
        self.supporting_data = Some(data);
        self
    }

    /// Consistent evidence: bump validation count, nudge confidence up.
    pub fn validate(&mut self) {
        self.times_validated += 1;
        self.confidence = (self.confidence + 0.05).min(1.0);
        self.last_validated_at = Some(Utc::now());
    }

    /// Contradicting evidence: damp confidence, floored at zero.
    pub fn contradict(&mut self) {
        self.confidence = (self.confidence - 0.1).max(0.0);
    }

    /// Negative-polarity lessons warn away from something.
    pub fn is_negative(&self) -> bool {
        let text = self.insight.to_lowercase();
        text.contains("avoid")
            || text.contains("never")
            || text.contains("do not")
            || text.contains("don't")
    }
}
