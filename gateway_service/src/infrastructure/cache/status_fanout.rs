use async_trait::async_trait;
use futures_util::StreamExt;
use redis::AsyncCommands;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::domain::error::FanoutError;
use crate::domain::gateways::{StatusFanout, StatusUpdate};
use crate::domain::types::PaymentId;

/// Fan-out de estado por pago sobre Redis pub/sub.
///
/// El bus es distribuido a propósito: cualquier instancia del API puede
/// atender el WebSocket de un pago procesado por otra. No guarda estado;
/// los suscriptores que se desconectan consultan el estado actual al
/// reconectar.
pub struct RedisStatusFanout {
    client: redis::Client,
    publisher: redis::aio::ConnectionManager,
}

impl RedisStatusFanout {
    pub async fn connect(redis_url: &str) -> Result<Self, FanoutError> {
        let client =
            redis::Client::open(redis_url).map_err(|e| FanoutError::Bus(e.to_string()))?;
        let publisher = client
            .get_connection_manager()
            .await
            .map_err(|e| FanoutError::Bus(e.to_string()))?;
        Ok(Self { client, publisher })
    }

    fn channel_for(payment_id: PaymentId) -> String {
        format!("payment.status.{}", payment_id)
    }
}

#[async_trait]
impl StatusFanout for RedisStatusFanout {
    async fn publish(&self, update: &StatusUpdate) -> Result<(), FanoutError> {
        let payload =
            serde_json::to_string(update).map_err(|e| FanoutError::Bus(e.to_string()))?;
        let mut conn = self.publisher.clone();
        let _: () = conn
            .publish(Self::channel_for(update.payment_id), payload)
            .await
            .map_err(|e| FanoutError::Bus(e.to_string()))?;
        Ok(())
    }

    async fn subscribe(
        &self,
        payment_id: PaymentId,
    ) -> Result<mpsc::Receiver<StatusUpdate>, FanoutError> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| FanoutError::Bus(e.to_string()))?;
        pubsub
            .subscribe(Self::channel_for(payment_id))
            .await
            .map_err(|e| FanoutError::Bus(e.to_string()))?;

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            let mut stream = pubsub.on_message();
            while let Some(message) = stream.next().await {
                let Ok(payload) = message.get_payload::<String>() else {
                    continue;
                };
                match serde_json::from_str::<StatusUpdate>(&payload) {
                    Ok(update) => {
                        if tx.send(update).await.is_err() {
                            // Subscriber went away; drop the pubsub
                            debug!("Status subscriber for {} disconnected", payment_id);
                            return;
                        }
                    }
                    Err(e) => warn!("Malformed status update on bus: {}", e),
                }
            }
        });

        Ok(rx)
    }
}
