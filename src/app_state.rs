// Application state management

use std::path::PathBuf;
use std::sync::Arc;

use axum::http::HeaderMap;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::auth::Caller;
use crate::config::Config;
use crate::effects::{
    Notifier, SentimentTrigger, SideEffects, TracingNotifier, TracingSentiment, WebhookNotifier, WebhookSentiment,
};
use crate::error::StoreError;
use crate::market_resolve::MarketEngine;
use crate::store::Store;

pub type SharedState = Arc<AppState>;

pub struct AppState {
    pub engine: MarketEngine,
    pub admin_token: Option<String>,
    /// Where the store is saved on shutdown; in-memory only when None
    pub data_path: Option<PathBuf>,
}

impl AppState {
    pub fn new(engine: MarketEngine, admin_token: Option<String>) -> Self {
        Self {
            engine,
            admin_token,
            data_path: None,
        }
    }

    /// Load the saved store (or start empty) and wire the collaborators.
    /// Must run inside a tokio runtime; the returned handle is the effect
    /// delivery task.
    pub fn from_config(config: &Config) -> Result<(Self, JoinHandle<()>), StoreError> {
        info!("🚀 Initializing arena prediction market...");

        let store = if config.data_path.exists() {
            let store = Store::load_from_path(&config.data_path)?;
            info!("📂 Loaded state from {}", config.data_path.display());
            store
        } else {
            info!("📂 No saved state at {}, starting fresh", config.data_path.display());
            Store::new()
        };

        let notifier: Arc<dyn Notifier> = match &config.notify_webhook_url {
            Some(url) => Arc::new(WebhookNotifier::new(url.clone())),
            None => Arc::new(TracingNotifier),
        };
        let sentiment: Arc<dyn SentimentTrigger> = match &config.sentiment_webhook_url {
            Some(url) => Arc::new(WebhookSentiment::new(url.clone())),
            None => Arc::new(TracingSentiment),
        };
        let (effects, handle) = SideEffects::spawn(notifier, sentiment);

        let engine = MarketEngine::new(Arc::new(store), effects)
            .with_arena_defaults(config.arena_defaults.clone())
            .with_hidden_watchers(config.hidden_market_watchers.clone());

        if config.admin_token.is_none() {
            warn!("⚠️ ADMIN_TOKEN not set: only market creators can resolve, nobody can delete");
        }

        let state = Self {
            engine,
            admin_token: config.admin_token.clone(),
            data_path: Some(config.data_path.clone()),
        };
        Ok((state, handle))
    }

    pub fn caller(&self, headers: &HeaderMap) -> Caller {
        Caller::from_headers(headers, self.admin_token.as_deref())
    }

    /// Save state to disk
    pub fn save_to_disk(&self) -> Result<(), StoreError> {
        match &self.data_path {
            Some(path) => self.engine.store().save_to_path(path),
            None => Ok(()),
        }
    }
}
