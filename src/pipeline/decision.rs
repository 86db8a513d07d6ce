// Decision policy. Maps (risk, confidence) to a moderation action.
//
// Sits downstream of the core: it reads only `risk_score` and `confidence`.

use std::fmt;

use serde::{Deserialize, Serialize};

const AUTO_RISK: f64 = 75.0;
const AUTO_CONFIDENCE: f64 = 0.8;
const REVIEW_RISK: f64 = 50.0;
const REVIEW_CONFIDENCE: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    AutoAction,
    QueueReview,
    NoAction,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::AutoAction => "AUTO_ACTION",
            Decision::QueueReview => "QUEUE_REVIEW",
            Decision::NoAction => "NO_ACTION",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn decision_policy(risk_score: f64, confidence: f64) -> Decision {
    if risk_score >= AUTO_RISK && confidence >= AUTO_CONFIDENCE {
        Decision::AutoAction
    } else if risk_score >= REVIEW_RISK && confidence >= REVIEW_CONFIDENCE {
        Decision::QueueReview
    } else {
        Decision::NoAction
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thresholds_are_inclusive() {
        assert_eq!(decision_policy(75.0, 0.8), Decision::AutoAction);
        assert_eq!(decision_policy(50.0, 0.5), Decision::QueueReview);
        assert_eq!(decision_policy(49.99, 1.0), Decision::NoAction);
    }

    #[test]
    fn test_high_risk_low_confidence_is_review() {
        assert_eq!(decision_policy(95.0, 0.6), Decision::QueueReview);
        assert_eq!(decision_policy(95.0, 0.3), Decision::NoAction);
    }

    #[test]
    fn test_serializes_screaming_case() {
        assert_eq!(
            serde_json::to_string(&Decision::QueueReview).unwrap(),
            "\"QUEUE_REVIEW\""
        );
    }
}
