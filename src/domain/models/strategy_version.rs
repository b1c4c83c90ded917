//! Promoted strategy snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A promoted snapshot of a scanner/executor pair with its metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyVersion {
    pub id: Uuid,
    pub agent_id: Uuid,
    /// Semantic version string, e.g. "1.2.0".
    pub version: String,
    pub scan_source: String,
    /// `None` means the template library filled the executor role.
    pub executor_source: Option<String>,
    pub win_rate: f64,
    pub sharpe_ratio: f64,
    pub total_return: f64,
    pub winning_template: String,
    /// Exactly one version per agent may carry this flag.
    pub is_current: bool,
    pub parent_version_id: Option<Uuid>,
    pub change_summary: String,
    pub created_at: DateTime<Utc>,
}

impl StrategyVersion {
    pub fn new(agent_id: Uuid, version: impl Into<String>, scan_source: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            agent_id,
            version: version.into(),
            scan_source: scan_source.into(),
            executor_source: None,
            win_rate: 0.0,
            sharpe_ratio: 0.0,
            total_return: 0.0,
            winning_template: String::new(),
            is_current: false,
            parent_version_id: None,
            change_summary: String::new(),
            created_at: Utc::now(),
        }
    }

    /// Bump the minor component of a semver string; unparsable input
    /// restarts the sequence.
    pub fn next_version(parent: Option<&str>) -> String {
        match parent.map(parse_semver) {
            Some(Some((major, minor, _))) => format!("{major}.{}.0", minor + 1),
            _ => "1.0.0".to_string(),
        }
    }
}

fn parse_semver(s: &str) -> Option<(u32, u32, u32)> {
    let mut parts = s.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    let patch = parts.next()?.parse().ok()?;
    Some((major, minor, patch))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_version_from_none() {
        assert_eq!(StrategyVersion::next_version(None), "1.0.0");
    }

    #[test]
    fn test_next_version_bumps_minor() {
        assert_eq!(StrategyVersion::next_version(Some("1.2.3")), "1.3.0");
    }

    #[test]
    fn test_next_version_garbage_resets() {
        assert_eq!(StrategyVersion::next_version(Some("v2")), "1.0.0");
    }
}
