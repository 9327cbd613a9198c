use std::time::Duration;

use async_trait::async_trait;

use crate::domain::error::WebhookError;
use crate::domain::gateways::WebhookTransport;

/// Transporte HTTP de webhooks salientes.
///
/// Entrega con timeout de 30 segundos; cualquier respuesta fuera de 2xx
/// se reporta para que el despachador reprograme con backoff.
pub struct ReqwestWebhookTransport {
    http: reqwest::Client,
}

impl ReqwestWebhookTransport {
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("reqwest client");
        Self { http }
    }
}

impl Default for ReqwestWebhookTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WebhookTransport for ReqwestWebhookTransport {
    async fn deliver(
        &self,
        url: &str,
        event_id: &str,
        event_type: &str,
        signature: &str,
        body: &[u8],
    ) -> Result<(), WebhookError> {
        let response = self
            .http
            .post(url)
            .header("Content-Type", "application/json")
            .header("X-Event-Id", event_id)
            .header("X-Event-Type", event_type)
            .header("X-Signature", signature)
            .body(body.to_vec())
            .send()
            .await
            .map_err(|e| WebhookError::Delivery(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(WebhookError::NonSuccessStatus(status.as_u16()))
        }
    }
}
