use chrono::Utc;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::domain::entities::{Payment, QueueName, WebhookEventType};
use crate::domain::repository::NewQueueJob;

/// Tipo de trabajo de entrega de webhook en la cola.
pub const JOB_TYPE_WEBHOOK_DELIVER: &str = "webhook.deliver";

/// Instantánea del pago incluida en cada payload de webhook.
///
/// El comercio siempre recibe el estado actual completo y reconcilia a
/// partir de él; los montos de token viajan como unidades base en string
/// para no perder precisión en JSON.
pub fn payment_snapshot(payment: &Payment) -> Value {
    json!({
        "payment_id": payment.id,
        "reference": payment.reference,
        "status": payment.status,
        "amount_vnd": payment.amount_vnd.minor_units(),
        "crypto_amount": {
            "base_units": payment.crypto_amount.base_units().to_string(),
            "decimals": payment.crypto_amount.decimals(),
        },
        "token": payment.token,
        "chain": payment.chain,
        "wallet_address": payment.wallet_address,
        "order_id": payment.order_id,
        "tx_hash": payment.tx_hash,
        "overpayment_note": payment.overpayment_note,
        "failure_reason": payment.failure_reason,
        "created_at": payment.created_at,
        "expires_at": payment.expires_at,
        "completed_at": payment.completed_at,
    })
}

/// Construye el trabajo de entrega para una transición de estado.
///
/// El `event_id` nace aquí y acompaña todos los reintentos: es la llave
/// con la que el comercio deduplica entregas repetidas.
pub fn delivery_job(payment: &Payment, event: WebhookEventType, max_attempts: i32) -> NewQueueJob {
    NewQueueJob {
        queue: QueueName::WEBHOOKS,
        job_type: JOB_TYPE_WEBHOOK_DELIVER.to_string(),
        payload: json!({
            "event_id": Uuid::new_v4(),
            "event_type": event.as_str(),
            "merchant_id": payment.merchant_id,
            "payment": payment_snapshot(payment),
        }),
        max_attempts,
        not_before: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use common::{Chain, TokenAmount, TokenSymbol, VndAmount};
    use rust_decimal::Decimal;

    use crate::domain::types::{MerchantId, WalletAddress};

    fn sample_payment() -> Payment {
        Payment::new(
            MerchantId::new(),
            VndAmount::new(2_300_000).unwrap(),
            TokenAmount::from_base_units(100_000_000, 6),
            TokenSymbol::new("USDT").unwrap(),
            Chain::Solana,
            WalletAddress::new("wallet"),
            Decimal::from(23_000),
            Duration::minutes(30),
            Some("order-7".to_string()),
        )
        .unwrap()
    }

    #[test]
    fn test_delivery_job_carries_event_id_and_snapshot() {
        let payment = sample_payment();
        let job = delivery_job(&payment, WebhookEventType::PaymentCompleted, 6);

        assert_eq!(job.queue, QueueName::WEBHOOKS);
        assert_eq!(job.job_type, JOB_TYPE_WEBHOOK_DELIVER);
        assert_eq!(job.max_attempts, 6);
        assert_eq!(job.payload["event_type"], "payment.completed");
        assert!(job.payload["event_id"].as_str().is_some());
        assert_eq!(
            job.payload["payment"]["amount_vnd"],
            serde_json::json!(2_300_000)
        );
        assert_eq!(
            job.payload["payment"]["crypto_amount"]["base_units"],
            "100000000"
        );
        assert_eq!(job.payload["payment"]["order_id"], "order-7");
    }
}
