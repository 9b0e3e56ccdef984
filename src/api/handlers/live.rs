use axum::{
    extract::{Query, State},
    response::sse::{Event, Sse},
};
use futures_util::stream::{Stream, StreamExt};

use crate::api::{state::AppState, types::StreamQuery};
use crate::error::ScorecastError;
use crate::stream::StreamMessage;

fn to_sse_event(message: StreamMessage) -> Result<Event, ScorecastError> {
    Ok(Event::default()
        .event(message.event_name())
        .data(message.data()?))
}

/// GET /api/live/stream?game=<id>
///
/// The connection ends after `reconnect` or when the client goes away;
/// dropping the response stream stops the session's timers.
pub async fn live_stream(
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
) -> Sse<impl Stream<Item = Result<Event, ScorecastError>>> {
    let game = query.game.filter(|g| !g.trim().is_empty());
    Sse::new(state.broadcaster.subscribe(game).map(to_sse_event))
}
