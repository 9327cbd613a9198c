use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::entities::{QueueJob, QueueName};
use crate::domain::gateways::WebhookTransport;
use crate::domain::repository::MerchantRepository;
use crate::domain::types::MerchantId;
use crate::domain::webhooks::JOB_TYPE_WEBHOOK_DELIVER;
use crate::jobs::worker_pool::{JobFailure, JobHandler};

/// Calendario de reintentos de entrega: 1m, 5m, 15m, 1h, 6h, 24h.
const RETRY_SCHEDULE_MINUTES: [i64; 6] = [1, 5, 15, 60, 360, 1440];

/// Firma HMAC-SHA256 del cuerpo con el secreto del comercio, en hex.
pub fn sign_payload(secret: &str, body: &[u8]) -> String {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Handler de entrega de webhooks.
///
/// Entrega al-menos-una-vez: el `event_id` del payload acompaña todos
/// los reintentos y es la llave de deduplicación del comercio. Las
/// fallas nunca tocan el estado del pago; solo reprograman la entrega.
pub struct WebhookDeliveryHandler {
    merchant_repo: Arc<dyn MerchantRepository>,
    transport: Arc<dyn WebhookTransport>,
}

impl WebhookDeliveryHandler {
    pub fn new(
        merchant_repo: Arc<dyn MerchantRepository>,
        transport: Arc<dyn WebhookTransport>,
    ) -> Self {
        Self {
            merchant_repo,
            transport,
        }
    }
}

#[async_trait]
impl JobHandler for WebhookDeliveryHandler {
    fn job_type(&self) -> &'static str {
        JOB_TYPE_WEBHOOK_DELIVER
    }

    async fn handle(&self, job: &QueueJob) -> Result<(), JobFailure> {
        let event_id = job.payload["event_id"]
            .as_str()
            .ok_or_else(|| JobFailure("payload missing event_id".to_string()))?;
        let event_type = job.payload["event_type"]
            .as_str()
            .ok_or_else(|| JobFailure("payload missing event_type".to_string()))?;
        let merchant_id = job.payload["merchant_id"]
            .as_str()
            .and_then(|id| Uuid::from_str(id).ok())
            .map(MerchantId)
            .ok_or_else(|| JobFailure("payload missing merchant_id".to_string()))?;

        let merchant = self
            .merchant_repo
            .find_by_id(merchant_id)
            .await
            .map_err(|e| JobFailure(e.to_string()))?
            .ok_or_else(|| JobFailure(format!("unknown merchant {}", merchant_id)))?;

        let Some(url) = merchant.webhook_url.as_deref() else {
            // Nothing to deliver; drop the job without retrying
            info!(
                "Merchant {} has no webhook URL, dropping event {}",
                merchant_id, event_id
            );
            return Ok(());
        };

        let body = serde_json::to_vec(&job.payload)
            .map_err(|e| JobFailure(format!("payload serialization: {}", e)))?;
        let signature = sign_payload(&merchant.webhook_secret, &body);

        match self
            .transport
            .deliver(url, event_id, event_type, &signature, &body)
            .await
        {
            Ok(()) => {
                info!("Delivered {} ({}) to {}", event_type, event_id, merchant_id);
                Ok(())
            }
            Err(e) => {
                warn!(
                    "Webhook delivery failed for {} (attempt {}): {}",
                    event_id, job.attempt, e
                );
                Err(JobFailure(e.to_string()))
            }
        }
    }

    /// Calendario fijo del despachador en lugar del exponencial por
    /// defecto del pool.
    fn backoff(&self, attempt: i32) -> Duration {
        let index = (attempt.max(1) as usize - 1).min(RETRY_SCHEDULE_MINUTES.len() - 1);
        Duration::minutes(RETRY_SCHEDULE_MINUTES[index])
    }

    /// Los reintentos bajan a la cola de menor prioridad.
    fn retry_queue(&self, _original: QueueName) -> QueueName {
        QueueName::WEBHOOKS_RETRY
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use mockall::mock;
    use serde_json::json;

    use crate::domain::entities::Merchant;
    use crate::domain::error::{MerchantError, WebhookError};
    use crate::domain::types::JobId;

    mock! {
        pub MerchantRepositoryImpl {}

        #[async_trait]
        impl MerchantRepository for MerchantRepositoryImpl {
            async fn create(&self, merchant: Merchant) -> Result<Merchant, MerchantError>;
            async fn find_by_id(&self, id: MerchantId) -> Result<Option<Merchant>, MerchantError>;
            async fn find_by_api_key_hash(&self, api_key_hash: &str) -> Result<Option<Merchant>, MerchantError>;
        }
    }

    mock! {
        pub WebhookTransportImpl {}

        #[async_trait]
        impl WebhookTransport for WebhookTransportImpl {
            async fn deliver(&self, url: &str, event_id: &str, event_type: &str, signature: &str, body: &[u8]) -> Result<(), WebhookError>;
        }
    }

    fn merchant_with_webhook(id: MerchantId) -> Merchant {
        Merchant {
            id,
            name: "Cafe Saigon".to_string(),
            api_key_hash: "hash".to_string(),
            webhook_url: Some("https://merchant.example/webhooks".to_string()),
            webhook_secret: "shhh".to_string(),
            kyc_approved: true,
            is_active: true,
            created_at: Utc::now(),
        }
    }

    fn delivery_queue_job(merchant_id: MerchantId, attempt: i32) -> QueueJob {
        QueueJob {
            id: JobId::new(),
            queue: QueueName::WEBHOOKS,
            job_type: JOB_TYPE_WEBHOOK_DELIVER.to_string(),
            payload: json!({
                "event_id": Uuid::new_v4().to_string(),
                "event_type": "payment.completed",
                "merchant_id": merchant_id.0.to_string(),
                "payment": { "status": "COMPLETED" }
            }),
            attempt,
            max_attempts: 6,
            not_before: Utc::now(),
            locked_until: None,
            last_error: None,
            dead_letter: false,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_signature_is_stable_hmac_sha256() {
        // Known vector: HMAC-SHA256("key", "The quick brown fox jumps over the lazy dog")
        let signature = sign_payload("key", b"The quick brown fox jumps over the lazy dog");
        assert_eq!(
            signature,
            "f7bc83f430538424b13298e6aa6fb143ef4d59a14946175997479dbc2d1a3cd8"
        );
    }

    #[test]
    fn test_backoff_follows_schedule() {
        let handler = WebhookDeliveryHandler::new(
            Arc::new(MockMerchantRepositoryImpl::new()),
            Arc::new(MockWebhookTransportImpl::new()),
        );
        assert_eq!(handler.backoff(1), Duration::minutes(1));
        assert_eq!(handler.backoff(2), Duration::minutes(5));
        assert_eq!(handler.backoff(3), Duration::minutes(15));
        assert_eq!(handler.backoff(4), Duration::hours(1));
        assert_eq!(handler.backoff(5), Duration::hours(6));
        assert_eq!(handler.backoff(6), Duration::hours(24));
        // Beyond the schedule it stays at the last step
        assert_eq!(handler.backoff(9), Duration::hours(24));
    }

    #[tokio::test]
    async fn test_successful_delivery_signs_body() {
        // Arrange
        let merchant_id = MerchantId::new();
        let job = delivery_queue_job(merchant_id, 1);

        let mut mock_repo = MockMerchantRepositoryImpl::new();
        let merchant = merchant_with_webhook(merchant_id);
        let secret = merchant.webhook_secret.clone();
        mock_repo
            .expect_find_by_id()
            .times(1)
            .returning(move |_| Ok(Some(merchant.clone())));

        let expected_body = serde_json::to_vec(&job.payload).unwrap();
        let expected_signature = sign_payload(&secret, &expected_body);

        let mut mock_transport = MockWebhookTransportImpl::new();
        mock_transport
            .expect_deliver()
            .withf(move |url, _, event_type, signature, body| {
                url == "https://merchant.example/webhooks"
                    && event_type == "payment.completed"
                    && signature == expected_signature
                    && body == expected_body.as_slice()
            })
            .times(1)
            .returning(|_, _, _, _, _| Ok(()));

        let handler =
            WebhookDeliveryHandler::new(Arc::new(mock_repo), Arc::new(mock_transport));

        // Act
        let result = handler.handle(&job).await;

        // Assert
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_non_2xx_response_fails_for_retry() {
        // Arrange
        let merchant_id = MerchantId::new();
        let job = delivery_queue_job(merchant_id, 2);

        let mut mock_repo = MockMerchantRepositoryImpl::new();
        let merchant = merchant_with_webhook(merchant_id);
        mock_repo
            .expect_find_by_id()
            .returning(move |_| Ok(Some(merchant.clone())));

        let mut mock_transport = MockWebhookTransportImpl::new();
        mock_transport
            .expect_deliver()
            .returning(|_, _, _, _, _| Err(WebhookError::NonSuccessStatus(503)));

        let handler =
            WebhookDeliveryHandler::new(Arc::new(mock_repo), Arc::new(mock_transport));

        // Act
        let result = handler.handle(&job).await;

        // Assert
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_merchant_without_webhook_url_drops_silently() {
        // Arrange
        let merchant_id = MerchantId::new();
        let job = delivery_queue_job(merchant_id, 1);

        let mut mock_repo = MockMerchantRepositoryImpl::new();
        let mut merchant = merchant_with_webhook(merchant_id);
        merchant.webhook_url = None;
        mock_repo
            .expect_find_by_id()
            .returning(move |_| Ok(Some(merchant.clone())));

        let mut mock_transport = MockWebhookTransportImpl::new();
        mock_transport.expect_deliver().times(0);

        let handler =
            WebhookDeliveryHandler::new(Arc::new(mock_repo), Arc::new(mock_transport));

        // Act & Assert
        assert!(handler.handle(&job).await.is_ok());
    }
}
