use axum::{
    extract::{Path, Query, State, WebSocketUpgrade},
    response::IntoResponse,
};
use futures::StreamExt;
use serde::Deserialize;

use crate::api::state::AppState;
use crate::chat::{Connection, NotificationSocket};

#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    pub token: Option<String>,
}

/// GET /ws/chat/:room_id/?token=... - authorization happens after the upgrade
pub async fn chat_socket(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(room_id): Path<i64>,
    Query(query): Query<TokenQuery>,
) -> impl IntoResponse {
    let connection = Connection::new(
        state.dispatcher.clone(),
        state.identity.clone(),
        room_id,
        query.token,
    );

    ws.on_upgrade(move |socket| async move {
        let (sink, stream) = socket.split();
        connection.run(sink, stream).await;
    })
}

/// GET /ws/notifications/?token=...
pub async fn notification_socket(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<TokenQuery>,
) -> impl IntoResponse {
    let socket_handler = NotificationSocket::new(
        state.dispatcher.clone(),
        state.identity.clone(),
        query.token,
    );

    ws.on_upgrade(move |socket| async move {
        let (sink, stream) = socket.split();
        socket_handler.run(sink, stream).await;
    })
}
