use axum::{extract::State, http::StatusCode, Json};
use tracing::debug;

use crate::api::{state::AppState, types::InsightReply};
use crate::domain::InsightRequest;
use crate::insight::InsightOutcome;

/// POST /api/insights
///
/// Runs the request through the shared queue, so it is rate limited and
/// deduplicated together with the notification pipeline's requests.
pub async fn request_insight(
    State(state): State<AppState>,
    Json(request): Json<InsightRequest>,
) -> (StatusCode, Json<InsightReply>) {
    debug!("On-demand insight requested: {}", request.key());
    let outcome = state.insights.enqueue(request).resolve().await;

    let status = match &outcome {
        InsightOutcome::Generated(_) => StatusCode::OK,
        InsightOutcome::Deduplicated => StatusCode::CONFLICT,
        InsightOutcome::Throttled => StatusCode::TOO_MANY_REQUESTS,
        InsightOutcome::Failed(_) => StatusCode::BAD_GATEWAY,
        InsightOutcome::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, Json(InsightReply::from(outcome)))
}
