//! Per-socket lifecycle for chat rooms.
//!
//! `Connecting -> Authorizing -> Joined -> (Receiving <-> Sending) -> Closed`.
//! A socket that fails authorization is closed with a policy-violation code
//! before it joins any group.

use std::fmt::Display;
use std::sync::Arc;

use axum::extract::ws::{close_code, CloseFrame, Message};
use futures::{Sink, SinkExt, Stream, StreamExt};
use tracing::Instrument;
use uuid::Uuid;

use crate::auth::IdentityResolver;
use crate::broker::{Event, GroupName};
use crate::chat::dispatcher::{Dispatcher, Session};
use crate::chat::protocol::OutboundFrame;
use crate::db::RoomRepository;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Authorizing,
    Joined,
    Receiving,
    Sending,
    Closed,
}

pub struct Connection {
    id: Uuid,
    room_id: i64,
    token: Option<String>,
    state: ConnectionState,
    dispatcher: Dispatcher,
    identity: Arc<IdentityResolver>,
}

impl Connection {
    pub fn new(
        dispatcher: Dispatcher,
        identity: Arc<IdentityResolver>,
        room_id: i64,
        token: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            room_id,
            token,
            state: ConnectionState::Connecting,
            dispatcher,
            identity,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    fn transition(&mut self, next: ConnectionState) {
        if self.state != next {
            tracing::trace!(from = ?self.state, to = ?next, "connection state");
            self.state = next;
        }
    }

    /// Resolves the token and checks room membership. `None` means refuse.
    pub async fn authorize(&mut self) -> Option<Session> {
        self.transition(ConnectionState::Authorizing);

        let identity = self
            .identity
            .resolve(self.dispatcher.db(), self.token.as_deref())
            .await;
        let Some(user) = identity.into_user() else {
            tracing::warn!(
                conn_id = %self.id,
                room_id = self.room_id,
                "anonymous connection refused"
            );
            return None;
        };

        match RoomRepository::is_participant(self.dispatcher.db(), user.id, self.room_id).await {
            Ok(true) => Some(Session {
                conn_id: self.id,
                user,
                room_id: self.room_id,
            }),
            Ok(false) => {
                tracing::warn!(
                    conn_id = %self.id,
                    room_id = self.room_id,
                    user_id = user.id,
                    "non-participant connection refused"
                );
                None
            }
            Err(e) => {
                tracing::error!(
                    conn_id = %self.id,
                    room_id = self.room_id,
                    user_id = user.id,
                    error = ?e,
                    "membership check failed"
                );
                None
            }
        }
    }

    /// Drives the socket until the client leaves or the broker shuts down.
    pub async fn run<Si, St>(self, sink: Si, stream: St)
    where
        Si: Sink<Message> + Unpin + Send,
        Si::Error: Display,
        St: Stream<Item = Result<Message, axum::Error>> + Unpin + Send,
    {
        let span = tracing::info_span!(
            "ws",
            conn_id = %self.id,
            room_id = self.room_id,
            user_id = tracing::field::Empty
        );
        self.serve(sink, stream).instrument(span).await
    }

    async fn serve<Si, St>(mut self, mut sink: Si, mut stream: St)
    where
        Si: Sink<Message> + Unpin + Send,
        Si::Error: Display,
        St: Stream<Item = Result<Message, axum::Error>> + Unpin + Send,
    {
        let Some(session) = self.authorize().await else {
            refuse(&mut sink, close_code::POLICY, "unauthorized").await;
            self.transition(ConnectionState::Closed);
            return;
        };
        tracing::Span::current().record("user_id", session.user.id);

        let broker = Arc::clone(self.dispatcher.broker());
        let mut room = match broker.subscribe(&GroupName::room(self.room_id)).await {
            Ok(subscription) => subscription,
            Err(e) => {
                tracing::error!(error = ?e, "could not join room group");
                refuse(&mut sink, close_code::ERROR, "unavailable").await;
                self.transition(ConnectionState::Closed);
                return;
            }
        };
        let mut personal = match broker.subscribe(&GroupName::user(session.user.id)).await {
            Ok(subscription) => subscription,
            Err(e) => {
                tracing::error!(error = ?e, "could not join user group");
                refuse(&mut sink, close_code::ERROR, "unavailable").await;
                self.transition(ConnectionState::Closed);
                return;
            }
        };
        self.transition(ConnectionState::Joined);
        tracing::info!("chat connection joined");

        loop {
            tokio::select! {
                incoming = stream.next() => match incoming {
                    Some(Ok(Message::Text(text))) => {
                        self.transition(ConnectionState::Receiving);
                        let replies = self.dispatcher.handle_text(&session, &text).await;
                        if !self.write_all(&mut sink, replies).await {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!(error = %e, "transport error");
                        break;
                    }
                },
                event = room.recv() => match event {
                    Some(event) => {
                        if !self.deliver(&mut sink, &session, &event).await {
                            break;
                        }
                    }
                    None => break,
                },
                event = personal.recv() => match event {
                    Some(event) => {
                        if !self.deliver(&mut sink, &session, &event).await {
                            break;
                        }
                    }
                    None => break,
                },
            }
        }

        drop(room);
        drop(personal);
        self.transition(ConnectionState::Closed);
        tracing::info!("chat connection closed");
    }

    async fn deliver<Si>(&mut self, sink: &mut Si, session: &Session, event: &Event) -> bool
    where
        Si: Sink<Message> + Unpin + Send,
        Si::Error: Display,
    {
        self.transition(ConnectionState::Sending);
        match self.dispatcher.render(session, event).await {
            Ok(Some(frame)) => send_frame(sink, &frame).await,
            Ok(None) => true,
            Err(e) => {
                tracing::error!(event = event.kind(), error = ?e, "could not render event");
                true
            }
        }
    }

    async fn write_all<Si>(&mut self, sink: &mut Si, frames: Vec<OutboundFrame>) -> bool
    where
        Si: Sink<Message> + Unpin + Send,
        Si::Error: Display,
    {
        if !frames.is_empty() {
            self.transition(ConnectionState::Sending);
        }
        for frame in &frames {
            if !send_frame(sink, frame).await {
                return false;
            }
        }
        true
    }
}

/// Writes one frame; `false` means the transport is gone.
pub(crate) async fn send_frame<Si>(sink: &mut Si, frame: &OutboundFrame) -> bool
where
    Si: Sink<Message> + Unpin + Send,
    Si::Error: Display,
{
    let text = match frame.to_text() {
        Ok(text) => text,
        Err(e) => {
            tracing::error!(error = %e, "could not encode frame");
            return true;
        }
    };

    match sink.send(Message::Text(text)).await {
        Ok(()) => true,
        Err(e) => {
            tracing::debug!(error = %e, "socket write failed");
            false
        }
    }
}

/// Sends a close frame and closes the sink. Errors are irrelevant here.
pub(crate) async fn refuse<Si>(sink: &mut Si, code: u16, reason: &'static str)
where
    Si: Sink<Message> + Unpin + Send,
    Si::Error: Display,
{
    let _ = sink
        .send(Message::Close(Some(CloseFrame {
            code,
            reason: reason.into(),
        })))
        .await;
    let _ = sink.close().await;
}
