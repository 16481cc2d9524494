use std::{convert::Infallible, sync::Arc, time::Duration};

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::{Stream, StreamExt};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::{
    dao::models::GameEntity,
    dto::{game::GameView, sse::ServerEvent},
    state::SharedState,
};

/// Name of the SSE event carrying the full game list.
pub const GAMES_EVENT: &str = "games";

/// Stream of `games` events: the current list first, then one event per store
/// notification.
///
/// The store subscription lives inside the stream, so dropping the stream (client
/// disconnect) unsubscribes. Snapshots arriving faster than the client reads are
/// coalesced; only the latest one is sent.
pub fn game_events(state: &SharedState) -> impl Stream<Item = ServerEvent> + Send + use<> {
    let (tx, mut rx) = watch::channel::<Option<Vec<GameEntity>>>(None);
    let tx = Arc::new(tx);

    let sink = tx.clone();
    let subscription = state
        .store()
        .subscribe(Box::new(move |games: Vec<GameEntity>| {
            let _ = sink.send(Some(games));
        }));
    let store = state.store().clone();

    async_stream::stream! {
        let _subscription = subscription;

        match store.list_games().await {
            Ok(games) => {
                // A notification that raced the initial read is newer; keep it.
                tx.send_if_modified(|current| {
                    if current.is_none() {
                        *current = Some(games);
                        true
                    } else {
                        false
                    }
                });
            }
            Err(err) => warn!(error = %err, "failed to load games for new SSE client"),
        }

        while rx.changed().await.is_ok() {
            let snapshot = rx.borrow_and_update().clone();
            let Some(games) = snapshot else { continue };
            let views: Vec<GameView> = games.into_iter().map(Into::into).collect();
            match ServerEvent::json(Some(GAMES_EVENT.to_string()), &views) {
                Ok(event) => yield event,
                Err(err) => warn!(error = %err, "failed to serialise games event"),
            }
        }
    }
}

/// Convert server events into an SSE response with periodic keep-alives.
pub fn to_sse_stream<S>(events: S) -> Sse<impl Stream<Item = Result<Event, Infallible>>>
where
    S: Stream<Item = ServerEvent> + Send + 'static,
{
    let stream = events.map(|payload| {
        let mut event = Event::default().data(payload.data);
        if let Some(name) = payload.event {
            event = event.event(name);
        }
        Ok(event)
    });

    info!("games SSE stream opened");
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}
