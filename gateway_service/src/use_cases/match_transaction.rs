use std::sync::Arc;

use tracing::{info, instrument};

use crate::domain::entities::{BlockchainTransaction, Payment, PaymentStatus};
use crate::domain::error::PaymentError;
use crate::domain::repository::{BlockchainTxRepository, PaymentRepository};
use crate::use_cases::payment_engine::{ObservationOutcome, PaymentEngine};

/// Resultado del intento de matching de una transferencia observada.
///
/// "No hay pago" y "validación fallida" son resultados locales, no
/// errores: quedan registrados en la fila de la transacción y el pago no
/// se toca.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchOutcome {
    /// La transacción no trae referencia parseada.
    NoReference,
    /// Ningún pago abierto responde a `(chain, reference)`.
    NoPayment,
    /// La validación falló; la razón quedó en `unmatched_reason`.
    ValidationFailed(&'static str),
    /// Monto por debajo de lo esperado; el pago sigue PENDING.
    AmountLow,
    /// Sobrepago fuera de tolerancia; el pago pasó a FAILED.
    AmountHigh,
    /// Resultado del motor al aceptar la observación.
    Engine(ObservationOutcome),
}

/// Caso de uso: correlacionar una transferencia on-chain con su factura.
///
/// Valida destinatario, token, monto y estado del pago; si todo pasa,
/// delega la transición al motor. La propiedad exactly-once descansa en
/// la restricción de unicidad sobre el hash y el CAS de estado, de modo
/// que es correcto bajo orden de llegada arbitrario y matchers
/// concurrentes.
pub struct MatchTransactionUseCase {
    payment_repo: Arc<dyn PaymentRepository>,
    blockchain_tx_repo: Arc<dyn BlockchainTxRepository>,
    engine: Arc<PaymentEngine>,
}

impl MatchTransactionUseCase {
    pub fn new(
        payment_repo: Arc<dyn PaymentRepository>,
        blockchain_tx_repo: Arc<dyn BlockchainTxRepository>,
        engine: Arc<PaymentEngine>,
    ) -> Self {
        Self {
            payment_repo,
            blockchain_tx_repo,
            engine,
        }
    }

    #[instrument(
        name = "MatchTransactionUseCase::execute",
        skip(self, tx),
        fields(chain = %tx.chain, tx_hash = %tx.tx_hash)
    )]
    pub async fn execute(&self, tx: BlockchainTransaction) -> Result<MatchOutcome, PaymentError> {
        let Some(reference) = tx.reference.clone() else {
            return Ok(MatchOutcome::NoReference);
        };

        // 1. Lookup por (chain, reference). Miss no es error.
        let Some(payment) = self
            .payment_repo
            .find_by_reference(tx.chain, &reference)
            .await?
        else {
            self.mark_unmatched(&tx, "no payment").await?;
            return Ok(MatchOutcome::NoPayment);
        };

        // 2. Validaciones estáticas contra la factura
        if tx.to_address != payment.wallet_address {
            self.mark_unmatched(&tx, "recipient mismatch").await?;
            return Ok(MatchOutcome::ValidationFailed("recipient mismatch"));
        }
        if tx.token_symbol.as_ref() != Some(&payment.token) {
            self.mark_unmatched(&tx, "token mismatch").await?;
            return Ok(MatchOutcome::ValidationFailed("token mismatch"));
        }
        if !matches!(
            payment.status,
            PaymentStatus::PENDING | PaymentStatus::CONFIRMING
        ) {
            self.mark_unmatched(&tx, "payment not open").await?;
            return Ok(MatchOutcome::ValidationFailed("payment not open"));
        }
        if let Some(bound_hash) = &payment.tx_hash {
            if *bound_hash != tx.tx_hash {
                self.mark_unmatched(&tx, "payment bound to different tx")
                    .await?;
                return Ok(MatchOutcome::ValidationFailed(
                    "payment bound to different tx",
                ));
            }
        }

        // 3. Política de montos
        let overpayment_note = match self.check_amount(&payment, &tx) {
            AmountCheck::Exact => None,
            AmountCheck::WithinTolerance(note) => Some(note),
            AmountCheck::Low => {
                // Queda esperando un top-up dentro del TTL
                self.mark_unmatched(&tx, "amount_low").await?;
                return Ok(MatchOutcome::AmountLow);
            }
            AmountCheck::High => {
                self.mark_unmatched(&tx, "amount_high").await?;
                info!("Overpayment outside tolerance, failing payment {}", payment.id);
                self.engine
                    .fail_open_payment(&payment, "OVERPAYMENT".to_string())
                    .await?;
                return Ok(MatchOutcome::AmountHigh);
            }
        };

        // 4. El motor ejecuta la transición (liga/completa/retiene)
        let outcome = self
            .engine
            .process_observation(payment, &tx, overpayment_note)
            .await?;
        Ok(MatchOutcome::Engine(outcome))
    }

    fn check_amount(&self, payment: &Payment, tx: &BlockchainTransaction) -> AmountCheck {
        let expected = payment.crypto_amount.base_units();
        let observed = tx.amount.base_units();
        if observed == expected {
            return AmountCheck::Exact;
        }
        if observed < expected {
            return AmountCheck::Low;
        }

        let tolerance_bps = self.engine.policy().overpayment_tolerance_bps as u128;
        let allowed_max = expected + expected * tolerance_bps / 10_000;
        if observed <= allowed_max {
            AmountCheck::WithinTolerance(format!(
                "overpaid: received {} base units, expected {}",
                observed, expected
            ))
        } else {
            AmountCheck::High
        }
    }

    async fn mark_unmatched(
        &self,
        tx: &BlockchainTransaction,
        reason: &str,
    ) -> Result<(), PaymentError> {
        self.blockchain_tx_repo
            .mark_unmatched(tx.id, reason)
            .await
            .map_err(|e| PaymentError::RepositoryError(e.to_string()))
    }
}

enum AmountCheck {
    Exact,
    Low,
    High,
    WithinTolerance(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{DateTime, Duration, Utc};
    use common::{Chain, PaymentReference, TokenAmount, TokenSymbol, VndAmount};
    use mockall::mock;
    use mockall::predicate::*;
    use rust_decimal::Decimal;
    use serde_json::Value;
    use uuid::Uuid;

    use crate::domain::entities::{
        BlockchainTxStatus, ComplianceVerdict, PaymentEvent, QueueJob, QueueName,
        WebhookEventType,
    };
    use crate::domain::error::{ComplianceError, FanoutError, IngestError, QueueError};
    use crate::domain::gateways::{ComplianceGateway, StatusFanout, StatusUpdate};
    use crate::domain::ledger::PostingGroup;
    use crate::domain::repository::{NewQueueJob, QueueJobRepository, TransitionRequest};
    use crate::domain::types::{JobId, MerchantId, PaymentId, TxHash, WalletAddress};
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
        pub BlockchainTxRepositoryImpl {}

        #[async_trait]
        impl BlockchainTxRepository for BlockchainTxRepositoryImpl {
            async fn insert_if_new(&self, tx: BlockchainTransaction) -> Result<Option<BlockchainTransaction>, IngestError>;
            async fn find_by_id(&self, id: Uuid) -> Result<Option<BlockchainTransaction>, IngestError>;
            async fn find_by_hash(&self, chain: Chain, tx_hash: &TxHash) -> Result<Option<BlockchainTransaction>, IngestError>;
            async fn mark_unmatched(&self, id: Uuid, reason: &str) -> Result<(), IngestError>;
            async fn update_confirmations(&self, id: Uuid, confirmations: i64) -> Result<(), IngestError>;
            async fn mark_finalized(&self, id: Uuid) -> Result<BlockchainTransaction, IngestError>;
            async fn list_unfinalized(&self, chain: Chain, limit: i64) -> Result<Vec<BlockchainTransaction>, IngestError>;
            async fn sum_finalized_base_units(&self, token: &TokenSymbol) -> Result<Decimal, IngestError>;
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
        pub ComplianceGatewayImpl {}

        #[async_trait]
        impl ComplianceGateway for ComplianceGatewayImpl {
            async fn screen_address(&self, chain: Chain, address: &WalletAddress) -> Result<ComplianceVerdict, ComplianceError>;
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

    fn pending_payment() -> Payment {
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
        payment.status = PaymentStatus::PENDING;
        payment
    }

    fn tx_for(payment: &Payment, base_units: u128) -> BlockchainTransaction {
        BlockchainTransaction {
            id: Uuid::new_v4(),
            chain: payment.chain,
            network: "mainnet".to_string(),
            tx_hash: TxHash::new("3nB7xK"),
            from_address: WalletAddress::new("sender"),
            to_address: payment.wallet_address.clone(),
            token_mint: "Es9vMFrzaCERmJfrF4H2FYD4KCoNkY11McCe8BenwNYB".to_string(),
            token_symbol: Some(payment.token.clone()),
            amount: TokenAmount::from_base_units(base_units, 6),
            memo: Some(payment.reference.as_str().to_string()),
            reference: Some(payment.reference.clone()),
            confirmations: 40,
            is_finalized: true,
            block_height: Some(250_000_000),
            payment_id: None,
            is_matched: false,
            matched_at: None,
            unmatched_reason: None,
            status: BlockchainTxStatus::FINALIZED,
            raw: Value::Null,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn engine_with(payment_repo: MockPaymentRepositoryImpl) -> Arc<PaymentEngine> {
        let mut compliance = MockComplianceGatewayImpl::new();
        compliance
            .expect_screen_address()
            .returning(|_, _| Ok(ComplianceVerdict::CLEAR));
        let mut fanout = MockStatusFanoutImpl::new();
        fanout.expect_publish().returning(|_| Ok(()));
        Arc::new(PaymentEngine::new(
            Arc::new(payment_repo),
            Arc::new(MockQueueJobRepositoryImpl::new()),
            Arc::new(compliance),
            Arc::new(fanout),
            EnginePolicy::default(),
        ))
    }

    #[tokio::test]
    async fn test_unknown_reference_records_no_payment() {
        // Arrange
        let payment = pending_payment();
        let tx = tx_for(&payment, 100_000_000);

        let mut mock_payment_repo = MockPaymentRepositoryImpl::new();
        mock_payment_repo
            .expect_find_by_reference()
            .times(1)
            .returning(|_, _| Ok(None));

        let mut mock_btx_repo = MockBlockchainTxRepositoryImpl::new();
        mock_btx_repo
            .expect_mark_unmatched()
            .with(eq(tx.id), eq("no payment"))
            .times(1)
            .returning(|_, _| Ok(()));

        let use_case = MatchTransactionUseCase::new(
            Arc::new(mock_payment_repo),
            Arc::new(mock_btx_repo),
            engine_with(MockPaymentRepositoryImpl::new()),
        );

        // Act
        let outcome = use_case.execute(tx).await.unwrap();

        // Assert
        assert_eq!(outcome, MatchOutcome::NoPayment);
    }

    #[tokio::test]
    async fn test_amount_low_leaves_payment_pending() {
        // Arrange: 50 USDT against a 100 USDT invoice
        let payment = pending_payment();
        let tx = tx_for(&payment, 50_000_000);

        let mut mock_payment_repo = MockPaymentRepositoryImpl::new();
        let found = payment.clone();
        mock_payment_repo
            .expect_find_by_reference()
            .returning(move |_, _| Ok(Some(found.clone())));

        let mut mock_btx_repo = MockBlockchainTxRepositoryImpl::new();
        mock_btx_repo
            .expect_mark_unmatched()
            .with(eq(tx.id), eq("amount_low"))
            .times(1)
            .returning(|_, _| Ok(()));

        // The engine must not be reached at all
        let mut engine_repo = MockPaymentRepositoryImpl::new();
        engine_repo.expect_bind_transaction().times(0);
        engine_repo.expect_transition().times(0);

        let use_case = MatchTransactionUseCase::new(
            Arc::new(mock_payment_repo),
            Arc::new(mock_btx_repo),
            engine_with(engine_repo),
        );

        // Act
        let outcome = use_case.execute(tx).await.unwrap();

        // Assert
        assert_eq!(outcome, MatchOutcome::AmountLow);
    }

    #[tokio::test]
    async fn test_overpayment_outside_tolerance_fails_payment() {
        // Arrange: 150 USDT against 100 USDT with zero tolerance
        let payment = pending_payment();
        let tx = tx_for(&payment, 150_000_000);

        let mut mock_payment_repo = MockPaymentRepositoryImpl::new();
        let found = payment.clone();
        mock_payment_repo
            .expect_find_by_reference()
            .returning(move |_, _| Ok(Some(found.clone())));

        let mut mock_btx_repo = MockBlockchainTxRepositoryImpl::new();
        mock_btx_repo
            .expect_mark_unmatched()
            .with(eq(tx.id), eq("amount_high"))
            .times(1)
            .returning(|_, _| Ok(()));

        let mut engine_repo = MockPaymentRepositoryImpl::new();
        let failed = {
            let mut p = payment.clone();
            p.status = PaymentStatus::FAILED;
            p.failure_reason = Some("OVERPAYMENT".to_string());
            p
        };
        engine_repo
            .expect_transition()
            .withf(|_, expected, request, webhook| {
                *expected == PaymentStatus::PENDING
                    && request.to == PaymentStatus::FAILED
                    && *webhook == Some(WebhookEventType::PaymentFailed)
            })
            .times(1)
            .returning(move |_, _, _, _| Ok(failed.clone()));

        let use_case = MatchTransactionUseCase::new(
            Arc::new(mock_payment_repo),
            Arc::new(mock_btx_repo),
            engine_with(engine_repo),
        );

        // Act
        let outcome = use_case.execute(tx).await.unwrap();

        // Assert
        assert_eq!(outcome, MatchOutcome::AmountHigh);
    }

    #[tokio::test]
    async fn test_recipient_mismatch_records_reason() {
        // Arrange
        let payment = pending_payment();
        let mut tx = tx_for(&payment, 100_000_000);
        tx.to_address = WalletAddress::new("somebody-else");

        let mut mock_payment_repo = MockPaymentRepositoryImpl::new();
        let found = payment.clone();
        mock_payment_repo
            .expect_find_by_reference()
            .returning(move |_, _| Ok(Some(found.clone())));

        let mut mock_btx_repo = MockBlockchainTxRepositoryImpl::new();
        mock_btx_repo
            .expect_mark_unmatched()
            .with(eq(tx.id), eq("recipient mismatch"))
            .times(1)
            .returning(|_, _| Ok(()));

        let use_case = MatchTransactionUseCase::new(
            Arc::new(mock_payment_repo),
            Arc::new(mock_btx_repo),
            engine_with(MockPaymentRepositoryImpl::new()),
        );

        // Act
        let outcome = use_case.execute(tx).await.unwrap();

        // Assert
        assert_eq!(
            outcome,
            MatchOutcome::ValidationFailed("recipient mismatch")
        );
    }

    #[tokio::test]
    async fn test_exact_match_reaches_engine_and_completes() {
        // Arrange
        let payment = pending_payment();
        let tx = tx_for(&payment, 100_000_000);

        let mut mock_payment_repo = MockPaymentRepositoryImpl::new();
        let found = payment.clone();
        mock_payment_repo
            .expect_find_by_reference()
            .returning(move |_, _| Ok(Some(found.clone())));

        let mock_btx_repo = MockBlockchainTxRepositoryImpl::new();

        let mut engine_repo = MockPaymentRepositoryImpl::new();
        let bound = {
            let mut p = payment.clone();
            p.status = PaymentStatus::CONFIRMING;
            p.tx_hash = Some(tx.tx_hash.clone());
            p
        };
        let completed = {
            let mut p = bound.clone();
            p.status = PaymentStatus::COMPLETED;
            p
        };
        engine_repo
            .expect_bind_transaction()
            .times(1)
            .returning(move |_, _, _, _, _, _| Ok(bound.clone()));
        engine_repo
            .expect_complete_with_ledger()
            .times(1)
            .returning(move |_, _, _, _, _| Ok(completed.clone()));

        let use_case = MatchTransactionUseCase::new(
            Arc::new(mock_payment_repo),
            Arc::new(mock_btx_repo),
            engine_with(engine_repo),
        );

        // Act
        let outcome = use_case.execute(tx).await.unwrap();

        // Assert
        assert_eq!(
            outcome,
            MatchOutcome::Engine(ObservationOutcome::Completed)
        );
    }
}
