use std::sync::Arc;

use chrono::Duration;
use common::{money, Chain, TokenSymbol, VndAmount};

use crate::domain::entities::{Merchant, Payment};
use crate::domain::error::PaymentError;
use crate::domain::gateways::RateSource;
use crate::domain::repository::PaymentRepository;
use crate::domain::types::WalletAddress;
use crate::use_cases::payment_engine::PaymentEngine;

/// Parámetros de facturación del despliegue: token y cadena sobre los
/// que se emiten las facturas, billetera receptora y TTL.
#[derive(Debug, Clone)]
pub struct InvoicePolicy {
    pub chain: Chain,
    pub token: TokenSymbol,
    pub token_decimals: u8,
    pub wallet_address: WalletAddress,
    pub ttl: Duration,
}

/// Caso de uso: crear una factura y dejarla lista para cobrar.
///
/// Bloquea la tasa de cambio, convierte el monto VND a unidades base del
/// token, persiste la factura (CREATED) y la promueve a PENDING a través
/// del motor, que asigna el TTL efectivo y emite `payment.pending`.
pub struct CreatePaymentUseCase {
    payment_repo: Arc<dyn PaymentRepository>,
    rate_source: Arc<dyn RateSource>,
    engine: Arc<PaymentEngine>,
    policy: InvoicePolicy,
}

impl CreatePaymentUseCase {
    pub fn new(
        payment_repo: Arc<dyn PaymentRepository>,
        rate_source: Arc<dyn RateSource>,
        engine: Arc<PaymentEngine>,
        policy: InvoicePolicy,
    ) -> Self {
        Self {
            payment_repo,
            rate_source,
            engine,
            policy,
        }
    }

    #[tracing::instrument(
        name = "CreatePaymentUseCase::execute",
        skip(self, merchant),
        fields(merchant_id = %merchant.id)
    )]
    pub async fn execute(
        &self,
        merchant: &Merchant,
        amount_vnd: i64,
        order_id: Option<String>,
    ) -> Result<Payment, PaymentError> {
        let amount = VndAmount::new(amount_vnd)
            .map_err(|e| PaymentError::ValidationError(e.to_string()))?;

        let rate = self.rate_source.lock_rate(&self.policy.token).await?;
        let crypto_amount = money::token_amount_for_vnd(amount, rate, self.policy.token_decimals)
            .map_err(|e| PaymentError::ValidationError(e.to_string()))?;

        let payment = Payment::new(
            merchant.id,
            amount,
            crypto_amount,
            self.policy.token.clone(),
            self.policy.chain,
            self.policy.wallet_address.clone(),
            rate,
            self.policy.ttl,
            order_id,
        )?;

        let created = self.payment_repo.create(payment).await?;
        self.engine.activate(created.id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use common::{PaymentReference, TokenAmount};
    use mockall::mock;
    use rust_decimal::Decimal;
    use uuid::Uuid;

    use crate::domain::entities::{
        ComplianceVerdict, PaymentEvent, PaymentStatus, QueueJob, QueueName, WebhookEventType,
    };
    use crate::domain::error::{ComplianceError, FanoutError, QueueError};
    use crate::domain::gateways::{ComplianceGateway, StatusFanout, StatusUpdate};
    use crate::domain::ledger::PostingGroup;
    use crate::domain::repository::{NewQueueJob, QueueJobRepository, TransitionRequest};
    use crate::domain::types::{JobId, MerchantId, PaymentId, TxHash};
    use crate::domain::types::WalletAddress;
    use crate::use_cases::payment_engine::EnginePolicy;

    mock! {
        pub PaymentRepositoryImpl {}

        #[async_trait]
        impl PaymentRepository for PaymentRepositoryImpl {
            async fn create(&self, payment: Payment) -> Result<Payment, PaymentError>;
            async fn find_by_id(&self, id: PaymentId) -> Result<Option<Payment>, PaymentError>;
            async fn find_by_reference(&self, chain: Chain, reference: &PaymentReference) -> Result<Option<Payment>, PaymentError>;
            async fn transition(&self, id: PaymentId, expected: PaymentStatus, request: TransitionRequest, webhook: Option<WebhookEventType>) -> Result<Payment, PaymentError>;
            async fn bind_transaction(&self, id: PaymentId, blockchain_tx_id: Uuid, tx_hash: &TxHash, block_height: Option<i64>, verdict: ComplianceVerdict, webhook: Option<WebhookEventType>) -> Result<Payment, PaymentError>;
            async fn complete_with_ledger(&self, id: PaymentId, blockchain_tx_id: Uuid, groups: Vec<PostingGroup>, overpayment_note: Option<String>, webhook: Option<WebhookEventType>) -> Result<Payment, PaymentError>;
            async fn fail_compliance_blocked(&self, id: PaymentId, blockchain_tx_id: Uuid, reason: &str, webhook: Option<WebhookEventType>) -> Result<Payment, PaymentError>;
            async fn claim_expired(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Payment>, PaymentError>;
            async fn list_events(&self, id: PaymentId) -> Result<Vec<PaymentEvent>, PaymentError>;
        }
    }

    mock! {
        pub QueueJobRepositoryImpl {}

        #[async_trait]
        impl QueueJobRepository for QueueJobRepositoryImpl {
            async fn enqueue(&self, job: NewQueueJob) -> Result<QueueJob, QueueError>;
            async fn claim(&self, queue: QueueName, limit: i64, visibility: Duration) -> Result<Vec<QueueJob>, QueueError>;
            async fn complete(&self, id: JobId) -> Result<(), QueueError>;
            async fn retry_later(&self, id: JobId, queue: QueueName, not_before: DateTime<Utc>, error: &str) -> Result<(), QueueError>;
            async fn mark_dead_letter(&self, id: JobId, error: &str) -> Result<(), QueueError>;
        }
    }

    mock! {
        pub RateSourceImpl {}

        #[async_trait]
        impl RateSource for RateSourceImpl {
            async fn lock_rate(&self, token: &TokenSymbol) -> Result<Decimal, PaymentError>;
        }
    }

    mock! {
        pub ComplianceGatewayImpl {}

        #[async_trait]
        impl ComplianceGateway for ComplianceGatewayImpl {
            async fn screen_address(&self, chain: Chain, address: &crate::domain::types::WalletAddress) -> Result<ComplianceVerdict, ComplianceError>;
        }
    }

    mock! {
        pub StatusFanoutImpl {}

        #[async_trait]
        impl StatusFanout for StatusFanoutImpl {
            async fn publish(&self, update: &StatusUpdate) -> Result<(), FanoutError>;
            async fn subscribe(&self, payment_id: PaymentId) -> Result<tokio::sync::mpsc::Receiver<StatusUpdate>, FanoutError>;
        }
    }

    fn merchant() -> Merchant {
        Merchant {
            id: MerchantId::new(),
            name: "Cafe Saigon".to_string(),
            api_key_hash: "hash".to_string(),
            webhook_url: Some("https://merchant.example/webhooks".to_string()),
            webhook_secret: "secret".to_string(),
            kyc_approved: true,
            is_active: true,
            created_at: Utc::now(),
        }
    }

    fn policy() -> InvoicePolicy {
        InvoicePolicy {
            chain: Chain::Solana,
            token: TokenSymbol::new("USDT").unwrap(),
            token_decimals: 6,
            wallet_address: WalletAddress::new("9xQeWvG816bUx9EPjHmaT23yvVM2ZWbrrpZb9PusVFin"),
            ttl: Duration::minutes(30),
        }
    }

    fn engine_with(payment_repo: MockPaymentRepositoryImpl) -> Arc<PaymentEngine> {
        let mut fanout = MockStatusFanoutImpl::new();
        fanout.expect_publish().returning(|_| Ok(()));
        Arc::new(PaymentEngine::new(
            Arc::new(payment_repo),
            Arc::new(MockQueueJobRepositoryImpl::new()),
            Arc::new(MockComplianceGatewayImpl::new()),
            Arc::new(fanout),
            EnginePolicy::default(),
        ))
    }

    #[tokio::test]
    async fn test_create_locks_rate_and_activates() {
        // Arrange
        let mut mock_repo = MockPaymentRepositoryImpl::new();
        let mut mock_rate = MockRateSourceImpl::new();

        mock_rate
            .expect_lock_rate()
            .times(1)
            .returning(|_| Ok(Decimal::from(23_000)));

        mock_repo
            .expect_create()
            .withf(|payment: &Payment| {
                payment.status == PaymentStatus::CREATED
                    && payment.crypto_amount == TokenAmount::from_base_units(100_000_000, 6)
                    && payment.locked_rate == Decimal::from(23_000)
            })
            .times(1)
            .returning(|payment| Ok(payment));

        let mut engine_repo = MockPaymentRepositoryImpl::new();
        engine_repo
            .expect_transition()
            .withf(|_, expected, request, webhook| {
                *expected == PaymentStatus::CREATED
                    && request.to == PaymentStatus::PENDING
                    && *webhook == Some(WebhookEventType::PaymentPending)
            })
            .times(1)
            .returning(|id, _, _, _| {
                let mut p = sample_created(id);
                p.status = PaymentStatus::PENDING;
                Ok(p)
            });

        let use_case = CreatePaymentUseCase::new(
            Arc::new(mock_repo),
            Arc::new(mock_rate),
            engine_with(engine_repo),
            policy(),
        );

        // Act
        let result = use_case
            .execute(&merchant(), 2_300_000, Some("order-9".to_string()))
            .await;

        // Assert
        let payment = result.unwrap();
        assert_eq!(payment.status, PaymentStatus::PENDING);
    }

    fn sample_created(id: PaymentId) -> Payment {
        let mut payment = Payment::new(
            MerchantId::new(),
            VndAmount::new(2_300_000).unwrap(),
            TokenAmount::from_base_units(100_000_000, 6),
            TokenSymbol::new("USDT").unwrap(),
            Chain::Solana,
            WalletAddress::new("9xQeWvG816bUx9EPjHmaT23yvVM2ZWbrrpZb9PusVFin"),
            Decimal::from(23_000),
            Duration::minutes(30),
            None,
        )
        .unwrap();
        payment.id = id;
        payment
    }

    #[tokio::test]
    async fn test_create_rejects_non_positive_amount() {
        // Arrange
        let use_case = CreatePaymentUseCase::new(
            Arc::new(MockPaymentRepositoryImpl::new()),
            Arc::new(MockRateSourceImpl::new()),
            engine_with(MockPaymentRepositoryImpl::new()),
            policy(),
        );

        // Act
        let result = use_case.execute(&merchant(), 0, None).await;

        // Assert
        assert!(matches!(result, Err(PaymentError::ValidationError(_))));
    }
}
