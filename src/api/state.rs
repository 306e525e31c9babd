use std::sync::Arc;
use sqlx::{Pool, Sqlite};
use crate::auth::IdentityResolver;
use crate::broker::Broker;
use crate::chat::Dispatcher;
use crate::config::Config;

#[derive(Clone)]
pub struct AppState {
    pub db: Pool<Sqlite>,
    pub config: Arc<Config>,
    pub identity: Arc<IdentityResolver>,
    pub broker: Arc<dyn Broker>,
    pub dispatcher: Dispatcher,
}

impl AppState {
    pub fn new(db: Pool<Sqlite>, config: Arc<Config>, broker: Arc<dyn Broker>) -> Self {
        let identity = Arc::new(IdentityResolver::new(&config.jwt_secret));
        let dispatcher = Dispatcher::new(
            db.clone(),
            broker.clone(),
            config.notification_preview_chars,
        );

        Self {
            db,
            config,
            identity,
            broker,
            dispatcher,
        }
    }
}
