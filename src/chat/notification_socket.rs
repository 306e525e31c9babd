//! Sockets that only follow a user's personal notification group.

use std::fmt::Display;
use std::sync::Arc;

use axum::extract::ws::{close_code, Message};
use futures::{Sink, Stream, StreamExt};
use tracing::Instrument;
use uuid::Uuid;

use crate::auth::IdentityResolver;
use crate::broker::GroupName;
use crate::chat::connection::{refuse, send_frame};
use crate::chat::dispatcher::{personal_frame, Dispatcher};

pub struct NotificationSocket {
    id: Uuid,
    token: Option<String>,
    dispatcher: Dispatcher,
    identity: Arc<IdentityResolver>,
}

impl NotificationSocket {
    pub fn new(
        dispatcher: Dispatcher,
        identity: Arc<IdentityResolver>,
        token: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            token,
            dispatcher,
            identity,
        }
    }

    pub async fn run<Si, St>(self, sink: Si, stream: St)
    where
        Si: Sink<Message> + Unpin + Send,
        Si::Error: Display,
        St: Stream<Item = Result<Message, axum::Error>> + Unpin + Send,
    {
        let span = tracing::info_span!(
            "notifications",
            conn_id = %self.id,
            user_id = tracing::field::Empty
        );
        self.serve(sink, stream).instrument(span).await
    }

    async fn serve<Si, St>(self, mut sink: Si, mut stream: St)
    where
        Si: Sink<Message> + Unpin + Send,
        Si::Error: Display,
        St: Stream<Item = Result<Message, axum::Error>> + Unpin + Send,
    {
        let identity = self
            .identity
            .resolve(self.dispatcher.db(), self.token.as_deref())
            .await;
        let Some(user) = identity.into_user() else {
            tracing::warn!("anonymous notification socket refused");
            refuse(&mut sink, close_code::POLICY, "unauthorized").await;
            return;
        };
        tracing::Span::current().record("user_id", user.id);

        let group = GroupName::user(user.id);
        let mut personal = match self.dispatcher.broker().subscribe(&group).await {
            Ok(subscription) => subscription,
            Err(e) => {
                tracing::error!(error = ?e, "could not join user group");
                refuse(&mut sink, close_code::ERROR, "unavailable").await;
                return;
            }
        };
        tracing::info!("notification socket joined");

        loop {
            tokio::select! {
                incoming = stream.next() => match incoming {
                    Some(Ok(Message::Text(text))) => {
                        let replies = self.dispatcher.handle_notification_text(&user, &text).await;
                        let mut open = true;
                        for frame in &replies {
                            open = send_frame(&mut sink, frame).await;
                            if !open {
                                break;
                            }
                        }
                        if !open {
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
                event = personal.recv() => match event {
                    Some(event) => {
                        if let Some(frame) = personal_frame(&event) {
                            if !send_frame(&mut sink, &frame).await {
                                break;
                            }
                        }
                    }
                    None => break,
                },
            }
        }

        tracing::info!("notification socket closed");
    }
}
