// ============================================================================
// Side effects - notifications & sentiment analysis
// ============================================================================
//
// Collaborator calls that follow a committed bet or resolution:
//   - sentiment analysis of the market after each bet
//   - BET_WON / BET_LOST / MARKET_RESOLVED notifications after resolution
//
// The engine only enqueues; a background task delivers. Delivery failures are
// logged and dropped, they never touch points or market state.
// ============================================================================

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::EffectError;

/// Effects waiting for delivery; further effects are dropped while it is full
pub const EFFECT_QUEUE_CAPACITY: usize = 1024;

// ============================================================================
// EVENTS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    BetWon,
    BetLost,
    MarketResolved,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SideEffect {
    /// Ask the sentiment service to re-read a market after a bet
    Sentiment { market_id: String, text: String },
    /// Tell a user something happened
    Notify { user_id: String, kind: EventKind, payload: Value },
}

// ============================================================================
// COLLABORATOR TRAITS
// ============================================================================

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, user_id: &str, kind: EventKind, payload: &Value) -> Result<(), EffectError>;
}

#[async_trait]
pub trait SentimentTrigger: Send + Sync {
    async fn trigger(&self, market_id: &str, text: &str) -> Result<(), EffectError>;
}

/// Logs notifications instead of delivering them
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, user_id: &str, kind: EventKind, payload: &Value) -> Result<(), EffectError> {
        info!(user_id, ?kind, %payload, "🔔 Notification");
        Ok(())
    }
}

/// Logs sentiment requests instead of sending them
pub struct TracingSentiment;

#[async_trait]
impl SentimentTrigger for TracingSentiment {
    async fn trigger(&self, market_id: &str, text: &str) -> Result<(), EffectError> {
        debug!(market_id, text, "📈 Sentiment analysis requested");
        Ok(())
    }
}

/// POSTs notifications as JSON to a webhook
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, user_id: &str, kind: EventKind, payload: &Value) -> Result<(), EffectError> {
        let body = serde_json::json!({
            "user_id": user_id,
            "type": kind,
            "payload": payload,
        });
        post_json(&self.client, &self.url, &body).await
    }
}

/// POSTs `{market_id, text}` to a sentiment service
pub struct WebhookSentiment {
    client: reqwest::Client,
    url: String,
}

impl WebhookSentiment {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl SentimentTrigger for WebhookSentiment {
    async fn trigger(&self, market_id: &str, text: &str) -> Result<(), EffectError> {
        let body = serde_json::json!({ "market_id": market_id, "text": text });
        post_json(&self.client, &self.url, &body).await
    }
}

async fn post_json(client: &reqwest::Client, url: &str, body: &Value) -> Result<(), EffectError> {
    let resp = client.post(url).json(body).send().await?;
    if !resp.status().is_success() {
        return Err(EffectError::Status(resp.status().as_u16()));
    }
    Ok(())
}

// ============================================================================
// DISPATCHER
// ============================================================================

/// Fire-and-forget handle the engine emits through. Cloning is cheap.
#[derive(Clone, Default)]
pub struct SideEffects {
    tx: Option<mpsc::Sender<SideEffect>>,
}

impl SideEffects {
    /// Drops every effect
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Hand effects to a receiver the caller owns
    pub fn channel() -> (Self, mpsc::Receiver<SideEffect>) {
        Self::with_capacity(EFFECT_QUEUE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> (Self, mpsc::Receiver<SideEffect>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx: Some(tx) }, rx)
    }

    /// Start a delivery task on the current tokio runtime
    pub fn spawn(notifier: Arc<dyn Notifier>, sentiment: Arc<dyn SentimentTrigger>) -> (Self, JoinHandle<()>) {
        let (effects, mut rx) = Self::channel();
        let handle = tokio::spawn(async move {
            while let Some(effect) = rx.recv().await {
                deliver(notifier.as_ref(), sentiment.as_ref(), effect).await;
            }
            debug!("Side effect channel closed");
        });
        (effects, handle)
    }

    /// Never blocks: a full queue or a stopped delivery task drops the effect.
    pub fn emit(&self, effect: SideEffect) {
        let Some(tx) = &self.tx else {
            return;
        };
        match tx.try_send(effect) {
            Ok(()) => {}
            Err(TrySendError::Full(dropped)) => {
                warn!(effect = ?dropped, "⚠️ Side effect dropped: delivery queue is full");
            }
            Err(TrySendError::Closed(_)) => {
                warn!("⚠️ Side effect dropped: delivery task has stopped");
            }
        }
    }
}

async fn deliver(notifier: &dyn Notifier, sentiment: &dyn SentimentTrigger, effect: SideEffect) {
    match effect {
        SideEffect::Sentiment { market_id, text } => {
            if let Err(e) = sentiment.trigger(&market_id, &text).await {
                warn!(market_id = %market_id, error = %e, "⚠️ Sentiment trigger failed");
            }
        }
        SideEffect::Notify { user_id, kind, payload } => {
            if let Err(e) = notifier.notify(&user_id, kind, &payload).await {
                warn!(user_id = %user_id, ?kind, error = %e, "⚠️ Notification failed");
            }
        }
    }
}
