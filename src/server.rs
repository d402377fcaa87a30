// src/server.rs
//! Webhook transport: updates are decoded, queued, and handed to one worker
//! that runs the pipeline on them strictly one at a time.

use std::{net::SocketAddr, sync::Arc};

use anyhow::Result;
use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::{get, post},
};
use subtle::ConstantTimeEq;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::model::InboundEvent;
use crate::pipeline::Pipeline;
use crate::platform::telegram::Update;

pub const SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";

#[derive(Clone)]
pub struct WebhookState {
    events: mpsc::UnboundedSender<InboundEvent>,
    secret: Option<Arc<str>>,
}

impl WebhookState {
    pub fn new(events: mpsc::UnboundedSender<InboundEvent>, secret: Option<String>) -> Self {
        Self {
            events,
            secret: secret.filter(|s| !s.is_empty()).map(Arc::from),
        }
    }

    fn authorized(&self, headers: &HeaderMap) -> bool {
        let Some(expected) = self.secret.as_deref() else {
            return true;
        };
        headers
            .get(SECRET_HEADER)
            .map(|got| bool::from(got.as_bytes().ct_eq(expected.as_bytes())))
            .unwrap_or(false)
    }
}

/// Runs the pipeline over queued events in arrival order.
pub fn spawn_worker(pipeline: Arc<Pipeline>) -> (mpsc::UnboundedSender<InboundEvent>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<InboundEvent>();
    let handle = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            pipeline.dispatch(&event).await;
        }
        debug!("event worker stopped");
    });
    (tx, handle)
}

pub fn router(webhook_path: &str, state: WebhookState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route(webhook_path, post(webhook))
        .with_state(state)
}

async fn webhook(
    State(state): State<WebhookState>,
    headers: HeaderMap,
    Json(update): Json<Update>,
) -> StatusCode {
    if !state.authorized(&headers) {
        warn!(update = update.update_id, "webhook call with bad secret token");
        return StatusCode::UNAUTHORIZED;
    }
    let update_id = update.update_id;
    let Some(event) = update.into_event() else {
        debug!(update = update_id, "update without message ignored");
        return StatusCode::OK;
    };
    if state.events.send(event).is_err() {
        warn!(update = update_id, "event worker gone, update dropped");
        return StatusCode::SERVICE_UNAVAILABLE;
    }
    StatusCode::OK
}

pub async fn serve(addr: SocketAddr, app: Router) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested");
        })
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ChatId, MessageId};

    async fn start(secret: Option<&str>) -> (String, mpsc::UnboundedReceiver<InboundEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let app = router("/webhook", WebhookState::new(tx, secret.map(str::to_string)));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}", addr), rx)
    }

    const UPDATE: &str = r#"{"update_id":1,"message":{"message_id":8,"chat":{"id":-5},"from":{"id":3,"first_name":"A"},"text":"pm me"}}"#;

    #[tokio::test]
    async fn message_updates_are_queued() {
        let (base, mut rx) = start(None).await;
        let resp = reqwest::Client::new()
            .post(format!("{base}/webhook"))
            .header("content-type", "application/json")
            .body(UPDATE)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);

        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.chat_id, ChatId(-5));
        assert_eq!(ev.message_id, MessageId(8));
        assert_eq!(ev.text.as_deref(), Some("pm me"));
    }

    #[tokio::test]
    async fn secret_token_is_enforced() {
        let (base, mut rx) = start(Some("s3cret")).await;
        let client = reqwest::Client::new();

        let denied = client
            .post(format!("{base}/webhook"))
            .header("content-type", "application/json")
            .header(SECRET_HEADER, "wrong")
            .body(UPDATE)
            .send()
            .await
            .unwrap();
        assert_eq!(denied.status(), 401);

        let ok = client
            .post(format!("{base}/webhook"))
            .header("content-type", "application/json")
            .header(SECRET_HEADER, "s3cret")
            .body(UPDATE)
            .send()
            .await
            .unwrap();
        assert_eq!(ok.status(), 200);
        assert_eq!(rx.recv().await.unwrap().message_id, MessageId(8));
        assert!(rx.try_recv().is_err(), "denied update must not be queued");
    }

    #[tokio::test]
    async fn health_and_ignored_updates() {
        let (base, mut rx) = start(None).await;
        let client = reqwest::Client::new();

        let health = client.get(format!("{base}/health")).send().await.unwrap();
        assert_eq!(health.text().await.unwrap(), "ok");

        let resp = client
            .post(format!("{base}/webhook"))
            .header("content-type", "application/json")
            .body(r#"{"update_id":2,"callback_query":{"id":"x"}}"#)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        assert!(rx.try_recv().is_err());
    }
}
