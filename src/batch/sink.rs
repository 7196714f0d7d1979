use crate::models::CheckpointStore;
use anyhow::{Context, Result};
use reqwest::Client;
use std::time::Duration;
use tracing::{info, warn};

/// Forwards the final results to an HTTP endpoint (e.g. an automation webhook)
pub struct WebhookSink {
    client: Client,
    url: String,
}

impl WebhookSink {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create webhook HTTP client")?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }

    /// POST the store as JSON. Returns whether the endpoint accepted it;
    /// failures are logged and never propagated.
    pub async fn deliver(&self, store: &CheckpointStore) -> bool {
        match self.client.post(&self.url).json(store).send().await {
            Ok(response) if response.status().is_success() => {
                info!("📤 Sent {} items to {} ({})", store.len(), self.url, response.status());
                true
            }
            Ok(response) => {
                warn!("Webhook {} rejected results: {}", self.url, response.status());
                false
            }
            Err(e) => {
                warn!("Failed to send results to {}: {}", self.url, e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PriceRecord;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::Value;
    use std::sync::{Arc, Mutex};

    async fn receiver(status: StatusCode) -> (String, Arc<Mutex<Vec<Value>>>) {
        let received = Arc::new(Mutex::new(Vec::new()));
        let inbox = received.clone();
        let app = Router::new().route(
            "/hook",
            post(move |Json(body): Json<Value>| {
                let inbox = inbox.clone();
                async move {
                    inbox.lock().unwrap().push(body);
                    status
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}/hook", addr), received)
    }

    fn sample_store() -> CheckpointStore {
        let mut store = CheckpointStore::new();
        store.insert(
            "smart tv 50 polegadas",
            PriceRecord::failed("not found", None, "2024-03-01 10:00:00".to_string()),
        );
        store
    }

    #[tokio::test]
    async fn delivers_final_document() {
        let (url, received) = receiver(StatusCode::OK).await;
        let sink = WebhookSink::new(url).unwrap();

        assert!(sink.deliver(&sample_store()).await);

        let bodies = received.lock().unwrap();
        assert_eq!(bodies.len(), 1);
        assert_eq!(bodies[0]["smart tv 50 polegadas"]["error"], "not found");
    }

    #[tokio::test]
    async fn rejected_delivery_is_not_fatal() {
        let (url, _) = receiver(StatusCode::INTERNAL_SERVER_ERROR).await;
        let sink = WebhookSink::new(url).unwrap();
        assert!(!sink.deliver(&sample_store()).await);
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_not_fatal() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let sink = WebhookSink::new(format!("http://{}/hook", addr)).unwrap();
        assert!(!sink.deliver(&sample_store()).await);
    }
}
