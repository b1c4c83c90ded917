//! Expert-analysis schema requested from the LLM.
//!
//! Every field is defaulted so a partial or sloppy response still
//! deserializes; the extractor treats missing sections as empty.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternQuality {
    pub signal_clarity: String,
    pub market_conditions: String,
    pub edge_strength: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionAnalysis {
    pub template_comparison: String,
    pub exit_timing_issues: Vec<String>,
    pub stop_loss_effectiveness: String,
    pub take_profit_effectiveness: String,
    pub suggested_improvements: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Recommendations {
    pub scanning: Vec<String>,
    pub execution: Vec<String>,
    pub risk_management: Vec<String>,
}

/// The fixed analysis structure (spec'd prompt schema).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpertAnalysis {
    pub overall_assessment: String,
    pub pattern_quality: PatternQuality,
    pub execution_analysis: ExecutionAnalysis,
    pub recommendations: Recommendations,
}

impl ExpertAnalysis {
    /// Ordered refinement list surfaced on the iteration row: suggested
    /// improvements first, then scanning / execution / risk recommendations.
    pub fn refinements(&self) -> Vec<String> {
        let mut out = Vec::new();
        out.extend(self.execution_analysis.suggested_improvements.iter().cloned());
        out.extend(self.recommendations.scanning.iter().cloned());
        out.extend(self.recommendations.execution.iter().cloned());
        out.extend(self.recommendations.risk_management.iter().cloned());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_deserializes() {
        let json = r#"{"overall_assessment": "weak edge", "recommendations": {"scanning": ["widen the RSI band"]}}"#;
        let analysis: ExpertAnalysis = serde_json::from_str(json).unwrap();
        assert_eq!(analysis.overall_assessment, "weak edge");
        assert_eq!(analysis.recommendations.scanning.len(), 1);
        assert!(analysis.execution_analysis.exit_timing_issues.is_empty());
    }

    #[test]
    fn test_refinements_order() {
        let analysis = ExpertAnalysis {
            execution_analysis: ExecutionAnalysis {
                suggested_improvements: vec!["a".to_string()],
                ..Default::default()
            },
            recommendations: Recommendations {
                scanning: vec!["b".to_string()],
                execution: vec!["c".to_string()],
                risk_management: vec!["d".to_string()],
            },
            ..Default::default()
        };
        assert_eq!(analysis.refinements(), vec!["a", "b", "c", "d"]);
    }
}
