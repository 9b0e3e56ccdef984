use serde::{Deserialize, Serialize};

use crate::insight::InsightOutcome;

/// Query string of the live stream endpoint
#[derive(Debug, Default, Deserialize)]
pub struct StreamQuery {
    /// Restrict the stream to one game
    pub game: Option<String>,
}

/// Response body of `POST /api/insights`, mirroring the backend's shape
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsightReply {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<InsightOutcome> for InsightReply {
    fn from(outcome: InsightOutcome) -> Self {
        let error = |message: &str| Self {
            success: false,
            summary: None,
            model: None,
            error: Some(message.to_string()),
        };
        match outcome {
            InsightOutcome::Generated(insight) => Self {
                success: true,
                summary: Some(insight.summary),
                model: Some(insight.model),
                error: None,
            },
            InsightOutcome::Deduplicated => error("an identical request is already in progress"),
            InsightOutcome::Throttled => error("insight backend is rate limited"),
            InsightOutcome::Failed(reason) => error(&reason),
            InsightOutcome::Unavailable => error("insights are unavailable"),
        }
    }
}
