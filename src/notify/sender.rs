//! Message sender -- one outbound SMS to one phone number, no retries.

use std::sync::Mutex;
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::MessagingConfig;

#[derive(Debug, Error)]
pub enum SendError {
    #[error("messaging provider unreachable: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("messaging provider returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("messaging provider returned a non-JSON body: {0}")]
    Malformed(String),
}

/// Outcome of a single send attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendReceipt {
    pub success: bool,
    /// Raw provider response, or an `{"error": ..}` object for transport failures.
    pub response: Value,
}

impl SendReceipt {
    pub fn failed(err: &SendError) -> Self {
        Self {
            success: false,
            response: json!({ "error": err.to_string() }),
        }
    }
}

/// Trait for anything that can deliver a message body to a phone number.
#[async_trait::async_trait]
pub trait MessageSender: Send + Sync {
    async fn send(&self, phone: &str, body: &str) -> SendReceipt;
}

/// HTTP SMS gateway client.
///
/// Success is taken from the boolean `status` field of the JSON reply, not
/// from the HTTP status code alone.
pub struct HttpSmsSender {
    client: Client,
    url: String,
    api_key: String,
    country_code: String,
}

impl HttpSmsSender {
    pub fn new(cfg: &MessagingConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url: cfg.provider_url.clone(),
            api_key: cfg.api_key.clone(),
            country_code: cfg.country_code.clone(),
        })
    }

    async fn post(&self, phone: &str, body: &str) -> Result<Value, SendError> {
        let mut req = self.client.post(&self.url).json(&json!({
            "phone": phone,
            "message": body,
            "country_code": self.country_code,
        }));
        if !self.api_key.is_empty() {
            req = req.bearer_auth(&self.api_key);
        }

        let resp = req.send().await?;
        let status = resp.status();
        let text = resp.text().await?;

        match serde_json::from_str::<Value>(&text) {
            Ok(v) => Ok(v),
            Err(_) if !status.is_success() => Err(SendError::Http {
                status: status.as_u16(),
                body: text,
            }),
            Err(_) => Err(SendError::Malformed(text)),
        }
    }
}

/// Whether a provider reply reports a delivered message.
pub fn provider_accepted(response: &Value) -> bool {
    response.get("status").and_then(Value::as_bool).unwrap_or(false)
}

#[async_trait::async_trait]
impl MessageSender for HttpSmsSender {
    async fn send(&self, phone: &str, body: &str) -> SendReceipt {
        match self.post(phone, body).await {
            Ok(response) => {
                let success = provider_accepted(&response);
                debug!(%phone, success, "provider replied");
                SendReceipt { success, response }
            }
            Err(e) => {
                warn!(%phone, error = %e, "send failed");
                SendReceipt::failed(&e)
            }
        }
    }
}

/// A message captured by [`RecordingSender`].
#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    pub phone: String,
    pub body: String,
}

/// In-memory sender that records every message instead of delivering it.
/// Phones listed in `failing` get an unsuccessful receipt.
#[derive(Default)]
pub struct RecordingSender {
    sent: Mutex<Vec<SentMessage>>,
    failing: Vec<String>,
}

impl RecordingSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_for(phones: &[&str]) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            failing: phones.iter().map(|p| p.to_string()).collect(),
        }
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().map(|v| v.clone()).unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl MessageSender for RecordingSender {
    async fn send(&self, phone: &str, body: &str) -> SendReceipt {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(SentMessage {
                phone: phone.to_string(),
                body: body.to_string(),
            });
        }
        let success = !self.failing.iter().any(|p| p == phone);
        SendReceipt {
            success,
            response: json!({ "status": success, "phone": phone }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use axum::extract::State;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};

    type Captured = Arc<Mutex<Vec<(Option<String>, Value)>>>;

    /// Local gateway that records each request and answers with `reply`.
    async fn gateway(reply: (StatusCode, &'static str)) -> (HttpSmsSender, Captured) {
        let captured: Captured = Arc::default();
        let app = Router::new()
            .route(
                "/send",
                post(
                    move |State(seen): State<Captured>, headers: HeaderMap, Json(body): Json<Value>| async move {
                        let auth = headers
                            .get("authorization")
                            .and_then(|v| v.to_str().ok())
                            .map(str::to_string);
                        seen.lock().unwrap().push((auth, body));
                        reply
                    },
                ),
            )
            .with_state(captured.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let cfg = MessagingConfig {
            provider_url: format!("http://{}/send", addr),
            api_key: "key-1".to_string(),
            timeout_secs: 5,
            ..MessagingConfig::default()
        };
        (HttpSmsSender::new(&cfg).unwrap(), captured)
    }

    #[tokio::test]
    async fn test_gateway_request_carries_phone_message_and_country_code() {
        let (sender, captured) = gateway((StatusCode::OK, r#"{"status":true,"id":"m-1"}"#)).await;
        let receipt = sender.send("0901000111", "[OR SCHEDULE] Ward A").await;
        assert!(receipt.success);
        assert_eq!(receipt.response["id"], "m-1");

        let seen = captured.lock().unwrap();
        assert_eq!(seen.len(), 1);
        let (auth, body) = &seen[0];
        assert_eq!(auth.as_deref(), Some("Bearer key-1"));
        assert_eq!(body["phone"], "0901000111");
        assert_eq!(body["message"], "[OR SCHEDULE] Ward A");
        assert_eq!(body["country_code"], "84");
    }

    #[tokio::test]
    async fn test_gateway_ok_with_false_status_is_failed_receipt() {
        let (sender, _) = gateway((StatusCode::OK, r#"{"status":false,"reason":"blocked"}"#)).await;
        let receipt = sender.send("0901", "body").await;
        assert!(!receipt.success);
        assert_eq!(receipt.response["reason"], "blocked");
    }

    #[tokio::test]
    async fn test_gateway_error_page_maps_to_http_error() {
        let (sender, _) = gateway((StatusCode::BAD_GATEWAY, "upstream down")).await;
        match sender.post("0901", "body").await {
            Err(SendError::Http { status, body }) => {
                assert_eq!(status, 502);
                assert_eq!(body, "upstream down");
            }
            other => panic!("expected HTTP error, got {:?}", other),
        }

        let receipt = sender.send("0901", "body").await;
        assert!(!receipt.success);
        assert!(receipt.response["error"].as_str().unwrap().contains("HTTP 502"));
    }

    #[tokio::test]
    async fn test_gateway_ok_with_non_json_body_is_malformed() {
        let (sender, _) = gateway((StatusCode::OK, "queued")).await;
        assert!(matches!(sender.post("0901", "body").await, Err(SendError::Malformed(b)) if b == "queued"));
    }

    #[test]
    fn test_provider_accepted_reads_status_flag() {
        assert!(provider_accepted(&json!({ "status": true, "id": 5 })));
        assert!(!provider_accepted(&json!({ "status": false })));
        assert!(!provider_accepted(&json!({ "status": "ok" })));
        assert!(!provider_accepted(&json!({})));
    }

    #[tokio::test]
    async fn test_recording_sender_records_and_fails_selected() {
        let sender = RecordingSender::failing_for(&["222"]);
        assert!(sender.send("111", "hello").await.success);
        assert!(!sender.send("222", "hello").await.success);
        assert_eq!(sender.sent().len(), 2);
        assert_eq!(sender.sent()[0].phone, "111");
    }

    #[tokio::test]
    async fn test_unreachable_provider_is_a_failed_receipt() {
        let cfg = MessagingConfig {
            provider_url: "http://127.0.0.1:1/send".to_string(),
            timeout_secs: 2,
            ..MessagingConfig::default()
        };
        let sender = HttpSmsSender::new(&cfg).unwrap();
        let receipt = sender.send("0901", "body").await;
        assert!(!receipt.success);
        assert!(receipt.response.get("error").is_some());
    }
}
